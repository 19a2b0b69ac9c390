use time::Date;
use ulid::Ulid;

use crate::model::*;
use crate::validator;

use super::schedule::free_windows;
use super::{Engine, EngineError};

/// Optional filters for reservation listings. Present filters must all match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationFilter {
    pub aircraft: Option<Ulid>,
    pub member: Option<Ulid>,
    pub date: Option<Date>,
}

fn aircraft_info(ac: &AircraftState) -> AircraftInfo {
    AircraftInfo {
        id: ac.id,
        registration: ac.registration.clone(),
        type_designation: ac.type_designation.clone(),
        seats: ac.seats,
        grounded: ac.grounded,
        active: ac.active,
    }
}

impl Engine {
    /// Aircraft this member may book for the flight type and date, each with
    /// the free windows left on its sheet. Grounded, retired and
    /// qualification-denied airframes are filtered server-side — the list
    /// never contains an option the member would be refused.
    pub async fn bookable_aircraft(
        &self,
        member_id: &Ulid,
        flight_type: FlightType,
        date: Date,
    ) -> Result<Vec<BookableAircraft>, EngineError> {
        let snapshot = self
            .directory
            .get(member_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown member: {member_id}")))?;
        if date < self.clock.today() {
            return Err(EngineError::Validation("cannot book a date in the past".into()));
        }
        let on_duty = self.roster.instructor_on_duty(date);

        let aircraft_ids: Vec<Ulid> = self.fleet.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for id in aircraft_ids {
            let Some(ac) = self.get_aircraft(&id) else {
                continue;
            };
            let guard = ac.read().await;
            if !guard.active || guard.grounded {
                continue;
            }
            if !validator::authorize(&snapshot, &guard, flight_type, date, on_duty).is_empty() {
                continue;
            }
            let free = guard
                .day_sheet(&date)
                .map_or_else(|| vec![Window::new(0, MINUTES_PER_DAY)], free_windows);
            out.push(BookableAircraft {
                aircraft: aircraft_info(&guard),
                free,
            });
        }
        out.sort_by(|a, b| a.aircraft.registration.cmp(&b.aircraft.registration));
        Ok(out)
    }

    /// Reservations matching the filter, any status, ordered by date then
    /// window start. An aircraft filter bounds the scan to that airframe.
    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let aircraft_ids: Vec<Ulid> = match filter.aircraft {
            Some(id) => {
                if !self.fleet.contains_key(&id) {
                    return Err(EngineError::NotFound(id));
                }
                vec![id]
            }
            None => self.fleet.iter().map(|e| *e.key()).collect(),
        };

        let mut out = Vec::new();
        for id in aircraft_ids {
            let Some(ac) = self.get_aircraft(&id) else {
                continue;
            };
            let guard = ac.read().await;
            for (date, sheet) in &guard.days {
                if filter.date.is_some_and(|d| d != *date) {
                    continue;
                }
                for r in &sheet.entries {
                    if filter.member.is_some_and(|m| m != r.member_id) {
                        continue;
                    }
                    out.push(ReservationInfo {
                        id: r.id,
                        aircraft_id: guard.id,
                        member_id: r.member_id,
                        date: *date,
                        window: r.window,
                        flight_type: r.flight_type,
                        status: r.status,
                    });
                }
            }
        }
        out.sort_by_key(|r| (r.date, r.window.start));
        Ok(out)
    }

    pub async fn list_fleet(&self) -> Vec<AircraftInfo> {
        let aircraft_ids: Vec<Ulid> = self.fleet.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(aircraft_ids.len());
        for id in aircraft_ids {
            let Some(ac) = self.get_aircraft(&id) else {
                continue;
            };
            let guard = ac.read().await;
            out.push(aircraft_info(&guard));
        }
        out.sort_by(|a, b| a.registration.cmp(&b.registration));
        out
    }

    pub async fn get_requirements(&self, aircraft_id: &Ulid) -> Result<Vec<Requirement>, EngineError> {
        let ac = self
            .get_aircraft(aircraft_id)
            .ok_or(EngineError::NotFound(*aircraft_id))?;
        let guard = ac.read().await;
        Ok(guard.requirements.clone())
    }
}
