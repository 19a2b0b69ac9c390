use ulid::Ulid;

use crate::model::{DaySheet, MINUTES_PER_DAY, ReservationStatus, Window};

use super::EngineError;

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::Validation(
            "reservation window must have positive duration".into(),
        ));
    }
    if window.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation(
            "reservation window must end by 24:00".into(),
        ));
    }
    Ok(())
}

/// First confirmed reservation on the sheet whose window overlaps `window`.
/// Cancelled, completed and no-show entries never conflict.
pub(crate) fn first_conflict(sheet: &DaySheet, window: &Window) -> Option<(Ulid, Window)> {
    sheet
        .overlapping(window)
        .find(|r| r.status == ReservationStatus::Confirmed)
        .map(|r| (r.id, r.window))
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_windows(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &w in sorted {
        if let Some(last) = merged.last_mut()
            && w.start <= last.end
        {
            last.end = last.end.max(w.end);
            continue;
        }
        merged.push(w);
    }
    merged
}

pub fn subtract_windows(base: &[Window], to_remove: &[Window]) -> Vec<Window> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Window::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Window::new(current_start, current_end));
        }
    }

    result
}

/// Free windows for one day: the full day minus merged confirmed reservations.
/// A fully-booked day yields an empty vec.
pub fn free_windows(sheet: &DaySheet) -> Vec<Window> {
    let booked = merge_windows(&sheet.confirmed_windows());
    subtract_windows(&[Window::new(0, MINUTES_PER_DAY)], &booked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlightType, Minute, Reservation};

    const H: Minute = 60;

    fn entry(start: Minute, end: Minute, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            member_id: Ulid::new(),
            window: Window::new(start, end),
            flight_type: FlightType::Solo,
            status,
            cancelled_by: None,
        }
    }

    fn sheet_with(entries: Vec<Reservation>) -> DaySheet {
        let mut sheet = DaySheet::default();
        for e in entries {
            sheet.insert(e);
        }
        sheet
    }

    // ── subtract_windows ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Window::new(100, 200), Window::new(300, 400)];
        let remove = vec![Window::new(200, 300)];
        let result = subtract_windows(&base, &remove);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Window::new(100, 200)];
        let remove = vec![Window::new(50, 250)];
        let result = subtract_windows(&base, &remove);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_partial_left() {
        let base = vec![Window::new(100, 200)];
        let remove = vec![Window::new(50, 150)];
        let result = subtract_windows(&base, &remove);
        assert_eq!(result, vec![Window::new(150, 200)]);
    }

    #[test]
    fn subtract_partial_right() {
        let base = vec![Window::new(100, 200)];
        let remove = vec![Window::new(150, 250)];
        let result = subtract_windows(&base, &remove);
        assert_eq!(result, vec![Window::new(100, 150)]);
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Window::new(100, 300)];
        let remove = vec![Window::new(150, 200)];
        let result = subtract_windows(&base, &remove);
        assert_eq!(result, vec![Window::new(100, 150), Window::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Window::new(0, 1000)];
        let remove = vec![
            Window::new(100, 200),
            Window::new(400, 500),
            Window::new(800, 900),
        ];
        let result = subtract_windows(&base, &remove);
        assert_eq!(
            result,
            vec![
                Window::new(0, 100),
                Window::new(200, 400),
                Window::new(500, 800),
                Window::new(900, 1000),
            ]
        );
    }

    // ── merge_windows ────────────────────────────────

    #[test]
    fn merge_windows_basic() {
        let windows = vec![
            Window::new(100, 300),
            Window::new(200, 400),
            Window::new(500, 600),
        ];
        let merged = merge_windows(&windows);
        assert_eq!(merged, vec![Window::new(100, 400), Window::new(500, 600)]);
    }

    #[test]
    fn merge_windows_adjacent() {
        let windows = vec![Window::new(100, 200), Window::new(200, 300)];
        let merged = merge_windows(&windows);
        assert_eq!(merged, vec![Window::new(100, 300)]);
    }

    // ── first_conflict ────────────────────────────────

    #[test]
    fn conflict_finds_confirmed() {
        let booked = entry(9 * H, 10 * H, ReservationStatus::Confirmed);
        let booked_id = booked.id;
        let sheet = sheet_with(vec![booked]);

        let hit = first_conflict(&sheet, &Window::new(9 * H + 30, 11 * H));
        assert_eq!(hit, Some((booked_id, Window::new(9 * H, 10 * H))));
    }

    #[test]
    fn conflict_ignores_terminal_entries() {
        let sheet = sheet_with(vec![
            entry(9 * H, 10 * H, ReservationStatus::Cancelled),
            entry(10 * H, 11 * H, ReservationStatus::Completed),
            entry(11 * H, 12 * H, ReservationStatus::NoShow),
        ]);

        assert_eq!(first_conflict(&sheet, &Window::new(9 * H, 12 * H)), None);
    }

    #[test]
    fn adjacent_windows_do_not_conflict() {
        let sheet = sheet_with(vec![entry(9 * H, 10 * H, ReservationStatus::Confirmed)]);

        assert_eq!(first_conflict(&sheet, &Window::new(10 * H, 11 * H)), None);
        assert_eq!(first_conflict(&sheet, &Window::new(8 * H, 9 * H)), None);
    }

    // ── free_windows ────────────────────────────────

    #[test]
    fn free_windows_empty_sheet() {
        let sheet = DaySheet::default();
        assert_eq!(free_windows(&sheet), vec![Window::new(0, MINUTES_PER_DAY)]);
    }

    #[test]
    fn free_windows_around_booking() {
        let sheet = sheet_with(vec![entry(10 * H, 10 * H + 30, ReservationStatus::Confirmed)]);
        assert_eq!(
            free_windows(&sheet),
            vec![
                Window::new(0, 10 * H),
                Window::new(10 * H + 30, MINUTES_PER_DAY),
            ]
        );
    }

    #[test]
    fn free_windows_skip_cancelled() {
        let sheet = sheet_with(vec![
            entry(10 * H, 11 * H, ReservationStatus::Cancelled),
            entry(14 * H, 15 * H, ReservationStatus::Confirmed),
        ]);
        assert_eq!(
            free_windows(&sheet),
            vec![
                Window::new(0, 14 * H),
                Window::new(15 * H, MINUTES_PER_DAY),
            ]
        );
    }

    #[test]
    fn free_windows_fully_booked() {
        let sheet = sheet_with(vec![
            entry(0, 12 * H, ReservationStatus::Confirmed),
            entry(12 * H, MINUTES_PER_DAY, ReservationStatus::Confirmed),
        ]);
        assert!(free_windows(&sheet).is_empty());
    }

    // ── validate_window ────────────────────────────────

    #[test]
    fn validate_rejects_empty_window() {
        assert!(matches!(
            validate_window(&Window { start: 600, end: 600 }),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_window(&Window { start: 660, end: 600 }),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_past_midnight() {
        assert!(matches!(
            validate_window(&Window { start: 1400, end: 1500 }),
            Err(EngineError::Validation(_))
        ));
        assert!(validate_window(&Window::new(1380, MINUTES_PER_DAY)).is_ok());
    }
}
