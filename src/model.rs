use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;
use ulid::Ulid;

/// Minutes since local midnight — the only time-of-day type.
pub type Minute = u16;

/// One past the last bookable minute; `24:00` as a window end.
pub const MINUTES_PER_DAY: Minute = 1440;

/// Render a minute-of-day as `HH:MM` (`1440` renders as `24:00`).
pub fn fmt_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` into a minute-of-day. Accepts `24:00` as a window end.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    let total = h * 60 + m;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// Calendar dates as `"YYYY-MM-DD"` strings wherever they are serialized.
/// The bare `time::Date` serde impl writes a (year, ordinal) tuple.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use time::Date;

    pub fn parse(s: &str) -> Option<Date> {
        let fmt = time::macros::format_description!("[year]-[month]-[day]");
        Date::parse(s, fmt).ok()
    }

    pub fn serialize<S: Serializer>(date: &Date, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&date.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Date, D::Error> {
        let s = String::deserialize(de)?;
        parse(&s).ok_or_else(|| D::Error::custom(format!("invalid date: {s}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(d) => ser.serialize_some(&d.to_string()),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<Date>, D::Error> {
            match Option::<String>::deserialize(de)? {
                Some(s) => parse(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid date: {s}"))),
                None => Ok(None),
            }
        }
    }
}

/// Half-open window `[start, end)` on a single day sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minute,
    pub end: Minute,
}

impl Window {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", fmt_hhmm(self.start), fmt_hhmm(self.end))
    }
}

/// Operational category of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightType {
    /// Member alone on board.
    Solo,
    /// With an instructor on board.
    Dual,
    /// Pilot in command, possibly with passengers.
    Pic,
}

impl FlightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightType::Solo => "solo",
            FlightType::Dual => "dual",
            FlightType::Pic => "pic",
        }
    }
}

/// Membership rating tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Student,
    Private,
    Commercial,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Student => "student",
            Rating::Private => "private",
            Rating::Commercial => "commercial",
        }
    }
}

/// Which flight types a requirement row binds.
///
/// `Either` and `Checkout` are wildcards: they match every flight type.
/// `Checkout` additionally marks the row as an aircraft-checkout gate in
/// club paperwork, but the engine enforces both identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    Solo,
    Dual,
    Pic,
    Either,
    Checkout,
}

impl RequirementKind {
    pub fn applies_to(&self, flight_type: FlightType) -> bool {
        match self {
            RequirementKind::Either | RequirementKind::Checkout => true,
            RequirementKind::Solo => flight_type == FlightType::Solo,
            RequirementKind::Dual => flight_type == FlightType::Dual,
            RequirementKind::Pic => flight_type == FlightType::Pic,
        }
    }
}

/// One requirement row attached to an aircraft. A member must satisfy every
/// row whose kind matches the requested flight type before booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Ulid,
    pub qualification_id: Ulid,
    /// Display name of the qualification, echoed verbatim in denial messages.
    pub qualification_name: String,
    pub kind: RequirementKind,
    /// Minimum total logged flight time, in minutes.
    pub min_minutes_total: Option<u32>,
    /// Minimum logged flight time on this aircraft's type, in minutes.
    pub min_minutes_on_type: Option<u32>,
    /// Row only passes while an instructor is on the duty roster.
    pub requires_instructor: bool,
    /// Row only passes while the member holds a current medical certificate.
    pub requires_medical: bool,
}

/// Lifecycle state of a reservation. `Confirmed` is the only non-terminal
/// state; terminal entries stay on the day sheet but release their window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
        }
    }
}

/// Who cancelled a reservation. Operator cancellations carry a mandatory
/// reason and are the only way to cancel someone else's booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelActor {
    Member(Ulid),
    Operator { id: String, reason: String },
}

/// A single entry on an aircraft's day sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub member_id: Ulid,
    pub window: Window,
    pub flight_type: FlightType,
    pub status: ReservationStatus,
    /// Set when `status` is `Cancelled`.
    pub cancelled_by: Option<CancelActor>,
}

/// All reservations for one aircraft on one calendar day, sorted by
/// `window.start`. Terminal entries are kept for history; only `Confirmed`
/// entries occupy their window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySheet {
    pub entries: Vec<Reservation>,
}

impl DaySheet {
    /// Insert an entry maintaining sort order by window.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .entries
            .binary_search_by_key(&reservation.window.start, |r| r.window.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, reservation);
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.entries.iter_mut().find(|r| r.id == id)
    }

    /// Return entries (any status) whose window overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .entries
            .partition_point(|r| r.window.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |r| r.window.end > query.start)
    }

    /// Windows of confirmed entries, in start order.
    pub fn confirmed_windows(&self) -> Vec<Window> {
        self.entries
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .map(|r| r.window)
            .collect()
    }

    /// Confirmed entries on the sheet. Terminal entries never count against
    /// the day's capacity.
    pub fn confirmed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .count()
    }
}

/// In-memory state for one aircraft: metadata, requirement rows, and the
/// day sheets keyed by calendar date.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub id: Ulid,
    pub registration: String,
    pub type_designation: String,
    /// Seats on board (1 or 2). Dual flights need a two-seater.
    pub seats: u8,
    /// Grounded aircraft reject every booking until ungrounded.
    pub grounded: bool,
    /// Retired aircraft are kept for history but never bookable again.
    pub active: bool,
    pub requirements: Vec<Requirement>,
    pub days: BTreeMap<Date, DaySheet>,
}

impl AircraftState {
    pub fn new(id: Ulid, registration: String, type_designation: String, seats: u8) -> Self {
        Self {
            id,
            registration,
            type_designation,
            seats,
            grounded: false,
            active: true,
            requirements: Vec::new(),
            days: BTreeMap::new(),
        }
    }

    pub fn day_sheet(&self, date: &Date) -> Option<&DaySheet> {
        self.days.get(date)
    }

    pub fn day_sheet_mut(&mut self, date: Date) -> &mut DaySheet {
        self.days.entry(date).or_default()
    }

    /// Insert or replace a requirement row by its id.
    pub fn upsert_requirement(&mut self, row: Requirement) {
        if let Some(existing) = self.requirements.iter_mut().find(|r| r.id == row.id) {
            *existing = row;
        } else {
            self.requirements.push(row);
        }
    }

    pub fn remove_requirement(&mut self, row_id: Ulid) -> Option<Requirement> {
        if let Some(pos) = self.requirements.iter().position(|r| r.id == row_id) {
            Some(self.requirements.remove(pos))
        } else {
            None
        }
    }
}

/// One qualification held (or once held) by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationRecord {
    pub qualification_id: Ulid,
    pub qualification_name: String,
    /// Instructor sign-off to fly this qualification solo.
    pub solo_endorsement: bool,
    /// The sign-off itself. An expired record is treated as not held
    /// regardless of this flag.
    pub qualified: bool,
    /// Last day the record is valid, inclusive. `None` never expires.
    #[serde(default, with = "iso_date::option")]
    pub expires_on: Option<Date>,
}

impl QualificationRecord {
    /// True if the record counts as held on `date`. Expiration overrides
    /// the `qualified` flag.
    pub fn valid_on(&self, date: Date) -> bool {
        self.qualified && !self.expires_on.is_some_and(|d| d < date)
    }
}

/// Logged flight time, in minutes, total and broken down by type designation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightMinutes {
    pub total: u32,
    pub on_type: BTreeMap<String, u32>,
}

impl FlightMinutes {
    pub fn on_type(&self, type_designation: &str) -> u32 {
        self.on_type.get(type_designation).copied().unwrap_or(0)
    }
}

/// Immutable snapshot of one member's credentials. Replaced wholesale by
/// roster sync; reservations in flight keep validating against the snapshot
/// they started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub id: Ulid,
    pub name: String,
    pub rating: Rating,
    pub records: Vec<QualificationRecord>,
    /// Last day the medical certificate is valid, inclusive.
    #[serde(default, with = "iso_date::option")]
    pub medical_valid_until: Option<Date>,
    /// `None` means the club does not track hours for this member; hour
    /// minimums are then skipped entirely.
    pub flight_minutes: Option<FlightMinutes>,
}

impl MemberSnapshot {
    pub fn record_for(&self, qualification_id: &Ulid) -> Option<&QualificationRecord> {
        self.records
            .iter()
            .find(|r| &r.qualification_id == qualification_id)
    }
}

/// The event types — this is the WAL record format. State is rebuilt by
/// replaying these in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AircraftRegistered {
        id: Ulid,
        registration: String,
        type_designation: String,
        seats: u8,
    },
    AircraftGrounded {
        id: Ulid,
    },
    AircraftUngrounded {
        id: Ulid,
    },
    AircraftRetired {
        id: Ulid,
    },
    RequirementSet {
        aircraft_id: Ulid,
        row: Requirement,
    },
    RequirementCleared {
        aircraft_id: Ulid,
        row_id: Ulid,
    },
    MemberSynced {
        snapshot: MemberSnapshot,
    },
    DutyPosted {
        date: Date,
    },
    DutyCleared {
        date: Date,
    },
    ReservationBooked {
        id: Ulid,
        aircraft_id: Ulid,
        member_id: Ulid,
        date: Date,
        window: Window,
        flight_type: FlightType,
    },
    ReservationCancelled {
        id: Ulid,
        aircraft_id: Ulid,
        date: Date,
        by: CancelActor,
    },
    ReservationCompleted {
        id: Ulid,
        aircraft_id: Ulid,
        date: Date,
    },
    ReservationNoShow {
        id: Ulid,
        aircraft_id: Ulid,
        date: Date,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub aircraft_id: Ulid,
    pub member_id: Ulid,
    pub date: Date,
    pub window: Window,
    pub flight_type: FlightType,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AircraftInfo {
    pub id: Ulid,
    pub registration: String,
    pub type_designation: String,
    pub seats: u8,
    pub grounded: bool,
    pub active: bool,
}

/// One aircraft a member may book, with the free windows left on its sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookableAircraft {
    pub aircraft: AircraftInfo,
    pub free: Vec<Window>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

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

    #[test]
    fn window_basics() {
        let w = Window::new(9 * 60, 10 * 60);
        assert_eq!(w.duration_min(), 60);
        assert_eq!(w.to_string(), "[09:00, 10:00)");
    }

    #[test]
    fn window_overlap() {
        let a = Window::new(540, 600);
        let b = Window::new(570, 660);
        let c = Window::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn hhmm_roundtrip() {
        assert_eq!(parse_hhmm("09:00"), Some(540));
        assert_eq!(parse_hhmm("9:05"), Some(545));
        assert_eq!(parse_hhmm("24:00"), Some(MINUTES_PER_DAY));
        assert_eq!(fmt_hhmm(545), "09:05");
        assert_eq!(fmt_hhmm(MINUTES_PER_DAY), "24:00");
    }

    #[test]
    fn hhmm_rejects_garbage() {
        assert_eq!(parse_hhmm("24:01"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(parse_hhmm("12"), None);
        assert_eq!(parse_hhmm("-1:00"), None);
    }

    #[test]
    fn requirement_kind_wildcards() {
        assert!(RequirementKind::Either.applies_to(FlightType::Solo));
        assert!(RequirementKind::Either.applies_to(FlightType::Dual));
        assert!(RequirementKind::Checkout.applies_to(FlightType::Pic));
        assert!(RequirementKind::Solo.applies_to(FlightType::Solo));
        assert!(!RequirementKind::Solo.applies_to(FlightType::Pic));
        assert!(!RequirementKind::Dual.applies_to(FlightType::Solo));
    }

    #[test]
    fn sheet_insert_keeps_order() {
        let mut sheet = DaySheet::default();
        sheet.insert(entry(600, 660, ReservationStatus::Confirmed));
        sheet.insert(entry(480, 540, ReservationStatus::Confirmed));
        sheet.insert(entry(540, 600, ReservationStatus::Confirmed));
        assert_eq!(sheet.entries[0].window.start, 480);
        assert_eq!(sheet.entries[1].window.start, 540);
        assert_eq!(sheet.entries[2].window.start, 600);
    }

    #[test]
    fn sheet_overlapping_skips_outside() {
        let mut sheet = DaySheet::default();
        sheet.insert(entry(60, 120, ReservationStatus::Confirmed));
        sheet.insert(entry(450, 600, ReservationStatus::Confirmed));
        sheet.insert(entry(1000, 1100, ReservationStatus::Confirmed));

        let hits: Vec<_> = sheet.overlapping(&Window::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].window, Window::new(450, 600));
    }

    #[test]
    fn sheet_overlapping_adjacent_not_included() {
        // Entry ending exactly at query.start is NOT overlapping (half-open)
        let mut sheet = DaySheet::default();
        sheet.insert(entry(100, 200, ReservationStatus::Confirmed));
        let hits: Vec<_> = sheet.overlapping(&Window::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn sheet_confirmed_windows_skip_terminal() {
        let mut sheet = DaySheet::default();
        sheet.insert(entry(480, 540, ReservationStatus::Confirmed));
        sheet.insert(entry(540, 600, ReservationStatus::Cancelled));
        sheet.insert(entry(600, 660, ReservationStatus::NoShow));
        assert_eq!(sheet.confirmed_windows(), vec![Window::new(480, 540)]);
        assert_eq!(sheet.confirmed_count(), 1);
    }

    #[test]
    fn requirement_upsert_replaces_by_id() {
        let mut state = AircraftState::new(Ulid::new(), "G-7".into(), "Glider".into(), 1);
        let row_id = Ulid::new();
        let row = Requirement {
            id: row_id,
            qualification_id: Ulid::new(),
            qualification_name: "glider rating".into(),
            kind: RequirementKind::Either,
            min_minutes_total: None,
            min_minutes_on_type: None,
            requires_instructor: false,
            requires_medical: false,
        };
        state.upsert_requirement(row.clone());
        assert_eq!(state.requirements.len(), 1);

        let mut updated = row;
        updated.min_minutes_total = Some(600);
        state.upsert_requirement(updated);
        assert_eq!(state.requirements.len(), 1);
        assert_eq!(state.requirements[0].min_minutes_total, Some(600));

        assert!(state.remove_requirement(row_id).is_some());
        assert!(state.remove_requirement(row_id).is_none());
        assert!(state.requirements.is_empty());
    }

    #[test]
    fn record_expiry_overrides_qualified() {
        let rec = QualificationRecord {
            qualification_id: Ulid::new(),
            qualification_name: "high performance".into(),
            solo_endorsement: false,
            qualified: true,
            expires_on: Some(date!(2026 - 06 - 30)),
        };
        // Valid through the expiry date itself, invalid after.
        assert!(rec.valid_on(date!(2026 - 06 - 30)));
        assert!(!rec.valid_on(date!(2026 - 07 - 01)));

        let unsigned = QualificationRecord {
            qualified: false,
            expires_on: None,
            ..rec
        };
        assert!(!unsigned.valid_on(date!(2026 - 01 - 01)));
    }

    #[test]
    fn flight_minutes_unknown_type_is_zero() {
        let fm = FlightMinutes {
            total: 1500,
            on_type: BTreeMap::from([("ASK-21".into(), 900)]),
        };
        assert_eq!(fm.on_type("ASK-21"), 900);
        assert_eq!(fm.on_type("DG-1000"), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationBooked {
            id: Ulid::new(),
            aircraft_id: Ulid::new(),
            member_id: Ulid::new(),
            date: date!(2026 - 07 - 04),
            window: Window::new(540, 660),
            flight_type: FlightType::Dual,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn snapshot_dates_are_iso_strings_in_json() {
        let snapshot = MemberSnapshot {
            id: Ulid::new(),
            name: "Jo Soaring".into(),
            rating: Rating::Private,
            records: vec![QualificationRecord {
                qualification_id: Ulid::new(),
                qualification_name: "field checkout".into(),
                solo_endorsement: false,
                qualified: true,
                expires_on: Some(date!(2027 - 03 - 31)),
            }],
            medical_valid_until: None,
            flight_minutes: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["records"][0]["expires_on"], "2027-03-31");
        assert_eq!(json["medical_valid_until"], serde_json::Value::Null);

        let back: MemberSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn iso_date_parse_rejects_garbage() {
        assert_eq!(iso_date::parse("2026-07-04"), Some(date!(2026 - 07 - 04)));
        assert!(iso_date::parse("not-a-date").is_none());
        assert!(iso_date::parse("2026-13-01").is_none());
        assert!(iso_date::parse("04/07/2026").is_none());
    }
}
