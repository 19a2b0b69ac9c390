use std::sync::Arc;

use time::{Date, Duration};
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::validator;

use super::schedule::{first_conflict, validate_window};
use super::{Engine, EngineError, WalCommand};

/// One booking attempt, as handed to the scheduler.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub member_id: Ulid,
    pub aircraft_id: Ulid,
    pub date: Date,
    pub window: Window,
    pub flight_type: FlightType,
}

fn info_at(ac: &AircraftState, date: Date, id: Ulid) -> Option<ReservationInfo> {
    ac.day_sheet(&date).and_then(|s| s.get(id)).map(|r| ReservationInfo {
        id: r.id,
        aircraft_id: ac.id,
        member_id: r.member_id,
        date,
        window: r.window,
        flight_type: r.flight_type,
        status: r.status,
    })
}

impl Engine {
    // ── Fleet administration ─────────────────────────────

    pub async fn register_aircraft(
        &self,
        registration: String,
        type_designation: String,
        seats: u8,
    ) -> Result<AircraftInfo, EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.fleet.len() >= MAX_FLEET_SIZE {
            return Err(EngineError::LimitExceeded("fleet is full"));
        }
        if registration.is_empty() {
            return Err(EngineError::Validation("registration is required".into()));
        }
        if registration.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("registration too long"));
        }
        if type_designation.is_empty() {
            return Err(EngineError::Validation("type designation is required".into()));
        }
        if type_designation.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("type designation too long"));
        }
        if !(1..=2).contains(&seats) {
            return Err(EngineError::Validation("seats must be 1 or 2".into()));
        }

        let id = Ulid::new();
        let event = Event::AircraftRegistered {
            id,
            registration: registration.clone(),
            type_designation: type_designation.clone(),
            seats,
        };
        self.wal_append(&event).await?;
        let info = AircraftInfo {
            id,
            registration: registration.clone(),
            type_designation: type_designation.clone(),
            seats,
            grounded: false,
            active: true,
        };
        let ac = AircraftState::new(id, registration, type_designation, seats);
        self.fleet.insert(id, Arc::new(RwLock::new(ac)));
        Ok(info)
    }

    /// Ground (maintenance hold) or unground an aircraft. Setting the flag to
    /// its current value is an idempotent no-op with no WAL traffic.
    pub async fn set_grounded(&self, id: Ulid, grounded: bool) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let ac = self.get_aircraft(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ac.write().await;
        if guard.grounded == grounded {
            return Ok(());
        }
        let event = if grounded {
            Event::AircraftGrounded { id }
        } else {
            Event::AircraftUngrounded { id }
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Retire an aircraft from the fleet. The airframe and its history stay
    /// queryable; it never accepts another booking.
    pub async fn retire_aircraft(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let ac = self.get_aircraft(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ac.write().await;
        if !guard.active {
            return Ok(());
        }
        let event = Event::AircraftRetired { id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Requirement registry ─────────────────────────────

    /// Insert or replace a requirement row. The next `book` call sees the new
    /// row — no restart, no cache to invalidate.
    pub async fn set_requirement(
        &self,
        aircraft_id: Ulid,
        row: Requirement,
    ) -> Result<Requirement, EngineError> {
        let _gate = self.compact_gate.read().await;
        if row.qualification_name.is_empty() {
            return Err(EngineError::Validation("qualification name is required".into()));
        }
        if row.qualification_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("qualification name too long"));
        }
        let ac = self
            .get_aircraft(&aircraft_id)
            .ok_or(EngineError::NotFound(aircraft_id))?;
        let mut guard = ac.write().await;
        let replacing = guard.requirements.iter().any(|r| r.id == row.id);
        if !replacing && guard.requirements.len() >= MAX_REQUIREMENTS_PER_AIRCRAFT {
            return Err(EngineError::LimitExceeded("too many requirement rows on aircraft"));
        }

        let event = Event::RequirementSet {
            aircraft_id,
            row: row.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(row)
    }

    pub async fn clear_requirement(
        &self,
        aircraft_id: Ulid,
        row_id: Ulid,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let ac = self
            .get_aircraft(&aircraft_id)
            .ok_or(EngineError::NotFound(aircraft_id))?;
        let mut guard = ac.write().await;
        if !guard.requirements.iter().any(|r| r.id == row_id) {
            return Err(EngineError::NotFound(row_id));
        }
        let event = Event::RequirementCleared { aircraft_id, row_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Credential and duty replicas ─────────────────────

    /// Replace a member's credential snapshot (push from the membership
    /// subsystem). Bookings already in flight keep validating against the
    /// snapshot they started with.
    pub async fn sync_member(&self, snapshot: MemberSnapshot) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if snapshot.name.is_empty() {
            return Err(EngineError::Validation("member name is required".into()));
        }
        if snapshot.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("member name too long"));
        }
        if snapshot.records.len() > MAX_RECORDS_PER_MEMBER {
            return Err(EngineError::LimitExceeded("too many qualification records"));
        }
        if !self.directory.contains(&snapshot.id) && self.directory.len() >= MAX_MEMBERS {
            return Err(EngineError::LimitExceeded("member directory is full"));
        }

        let event = Event::MemberSynced {
            snapshot: snapshot.clone(),
        };
        self.wal_append(&event).await?;
        self.directory.upsert(snapshot);
        Ok(())
    }

    pub async fn post_duty(&self, date: Date) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.roster.instructor_on_duty(date) {
            return Ok(());
        }
        let event = Event::DutyPosted { date };
        self.wal_append(&event).await?;
        self.roster.post(date);
        Ok(())
    }

    pub async fn clear_duty(&self, date: Date) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if !self.roster.instructor_on_duty(date) {
            return Ok(());
        }
        let event = Event::DutyCleared { date };
        self.wal_append(&event).await?;
        self.roster.clear(date);
        Ok(())
    }

    // ── Scheduler ────────────────────────────────────────

    /// Book an aircraft for a window. The aircraft's write lock is held from
    /// validation through commit: of two racing requests for overlapping
    /// windows, whichever acquires the lock first wins and the other observes
    /// `TimeConflict`.
    pub async fn book(&self, request: BookingRequest) -> Result<ReservationInfo, EngineError> {
        let result = self.book_inner(request).await;
        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(EngineError::QualificationDenied { .. }) => "qualification",
            Err(EngineError::TimeConflict { .. }) => "conflict",
            Err(EngineError::Grounded(_)) => "grounded",
            Err(_) => "rejected",
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn book_inner(&self, request: BookingRequest) -> Result<ReservationInfo, EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_window(&request.window)?;

        let today = self.clock.today();
        if request.date < today {
            return Err(EngineError::Validation("cannot book a date in the past".into()));
        }
        if (request.date - today).whole_days() > MAX_BOOKING_HORIZON_DAYS {
            return Err(EngineError::LimitExceeded("date beyond the booking horizon"));
        }

        let snapshot = self
            .directory
            .get(&request.member_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown member: {}", request.member_id)))?;
        let ac = self.get_aircraft(&request.aircraft_id).ok_or_else(|| {
            EngineError::Validation(format!("unknown aircraft: {}", request.aircraft_id))
        })?;

        let mut guard = ac.write().await;

        // Airframe availability short-circuits before any qualification logic.
        if !guard.active {
            return Err(EngineError::Validation("aircraft is retired".into()));
        }
        if guard.grounded {
            return Err(EngineError::Grounded(guard.id));
        }

        if guard
            .day_sheet(&request.date)
            .is_some_and(|s| s.confirmed_count() >= MAX_RESERVATIONS_PER_DAY)
        {
            return Err(EngineError::LimitExceeded("day sheet is full"));
        }

        let denials = validator::authorize(
            &snapshot,
            &guard,
            request.flight_type,
            request.date,
            self.roster.instructor_on_duty(request.date),
        );
        if !denials.is_empty() {
            return Err(EngineError::QualificationDenied { missing: denials });
        }

        if let Some(sheet) = guard.day_sheet(&request.date)
            && let Some((with, window)) = first_conflict(sheet, &request.window)
        {
            return Err(EngineError::TimeConflict { window, with });
        }

        let id = Ulid::new();
        let event = Event::ReservationBooked {
            id,
            aircraft_id: request.aircraft_id,
            member_id: request.member_id,
            date: request.date,
            window: request.window,
            flight_type: request.flight_type,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(ReservationInfo {
            id,
            aircraft_id: request.aircraft_id,
            member_id: request.member_id,
            date: request.date,
            window: request.window,
            flight_type: request.flight_type,
            status: ReservationStatus::Confirmed,
        })
    }

    // ── Lifecycle ────────────────────────────────────────

    /// Cancel a reservation, releasing its window immediately. Members may
    /// cancel only their own; operators may cancel any, with a mandatory
    /// reason. Cancelling an already-cancelled reservation is a no-op.
    pub async fn cancel(&self, id: Ulid, by: CancelActor) -> Result<ReservationInfo, EngineError> {
        let _gate = self.compact_gate.read().await;
        if let CancelActor::Operator { reason, .. } = &by {
            if reason.trim().is_empty() {
                return Err(EngineError::Validation(
                    "a reason is required for operator cancellations".into(),
                ));
            }
            if reason.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("cancellation reason too long"));
            }
        }

        let (aircraft_id, date, mut guard) = self.resolve_reservation_write(&id).await?;

        let (owner, status) = match guard.day_sheet(&date).and_then(|s| s.get(id)) {
            Some(r) => (r.member_id, r.status),
            None => return Err(EngineError::NotFound(id)),
        };

        if let CancelActor::Member(member_id) = &by
            && *member_id != owner
        {
            return Err(EngineError::NotPermitted(
                "only the booking member or an operator may cancel",
            ));
        }

        match status {
            ReservationStatus::Cancelled => {
                return info_at(&guard, date, id).ok_or(EngineError::NotFound(id));
            }
            ReservationStatus::Confirmed => {}
            other => {
                return Err(EngineError::Validation(format!(
                    "cannot cancel a {} reservation",
                    other.as_str()
                )));
            }
        }

        let event = Event::ReservationCancelled {
            id,
            aircraft_id,
            date,
            by: by.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        if let CancelActor::Operator { id: operator_id, reason } = &by {
            tracing::info!(
                target: "audit",
                reservation = %id,
                aircraft = %aircraft_id,
                operator = %operator_id,
                reason = %reason,
                "operator cancellation"
            );
        }
        metrics::counter!(crate::observability::RESERVATION_TRANSITIONS_TOTAL, "to" => "cancelled")
            .increment(1);

        info_at(&guard, date, id).ok_or(EngineError::NotFound(id))
    }

    pub async fn complete(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        self.transition(id, ReservationStatus::Completed).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        self.transition(id, ReservationStatus::NoShow).await
    }

    /// Confirmed → terminal transition. Repeating a transition the entry is
    /// already in is a no-op; crossing between terminal states is an error.
    async fn transition(
        &self,
        id: Ulid,
        target: ReservationStatus,
    ) -> Result<ReservationInfo, EngineError> {
        let _gate = self.compact_gate.read().await;
        let (aircraft_id, date, mut guard) = self.resolve_reservation_write(&id).await?;

        let status = guard
            .day_sheet(&date)
            .and_then(|s| s.get(id))
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;

        if status == target {
            return info_at(&guard, date, id).ok_or(EngineError::NotFound(id));
        }
        if status != ReservationStatus::Confirmed {
            return Err(EngineError::Validation(format!(
                "cannot mark a {} reservation {}",
                status.as_str(),
                target.as_str()
            )));
        }

        let event = match target {
            ReservationStatus::Completed => Event::ReservationCompleted { id, aircraft_id, date },
            ReservationStatus::NoShow => Event::ReservationNoShow { id, aircraft_id, date },
            _ => unreachable!("cancellation has its own path"),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATION_TRANSITIONS_TOTAL, "to" => target.as_str())
            .increment(1);

        info_at(&guard, date, id).ok_or(EngineError::NotFound(id))
    }

    // ── WAL compaction ───────────────────────────────────

    /// Rewrite the WAL with the minimal event set for current state. Day
    /// sheets and duty dates older than the retention window are dropped;
    /// the flight-log subsystem owns long-term history.
    ///
    /// Holds the compact gate exclusive from collection through the rewrite
    /// ack: a commit acknowledged before the rewrite is in the snapshot, a
    /// commit after it appends to the new file. Neither can be lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;
        let cutoff = self.clock.today() - Duration::days(RETENTION_DAYS);
        let mut events = Vec::new();

        for snapshot in self.directory.snapshots() {
            events.push(Event::MemberSynced {
                snapshot: (*snapshot).clone(),
            });
        }
        for date in self.roster.days() {
            if date < cutoff {
                continue;
            }
            events.push(Event::DutyPosted { date });
        }

        let aircraft_ids: Vec<Ulid> = self.fleet.iter().map(|e| *e.key()).collect();
        for id in aircraft_ids {
            let Some(ac) = self.get_aircraft(&id) else {
                continue;
            };
            let guard = ac.read().await;

            events.push(Event::AircraftRegistered {
                id: guard.id,
                registration: guard.registration.clone(),
                type_designation: guard.type_designation.clone(),
                seats: guard.seats,
            });
            if guard.grounded {
                events.push(Event::AircraftGrounded { id: guard.id });
            }
            if !guard.active {
                events.push(Event::AircraftRetired { id: guard.id });
            }
            for row in &guard.requirements {
                events.push(Event::RequirementSet {
                    aircraft_id: guard.id,
                    row: row.clone(),
                });
            }

            for (date, sheet) in &guard.days {
                if *date < cutoff {
                    continue;
                }
                for r in &sheet.entries {
                    events.push(Event::ReservationBooked {
                        id: r.id,
                        aircraft_id: guard.id,
                        member_id: r.member_id,
                        date: *date,
                        window: r.window,
                        flight_type: r.flight_type,
                    });
                    match r.status {
                        ReservationStatus::Confirmed => {}
                        ReservationStatus::Completed => {
                            events.push(Event::ReservationCompleted {
                                id: r.id,
                                aircraft_id: guard.id,
                                date: *date,
                            });
                        }
                        ReservationStatus::NoShow => {
                            events.push(Event::ReservationNoShow {
                                id: r.id,
                                aircraft_id: guard.id,
                                date: *date,
                            });
                        }
                        ReservationStatus::Cancelled => {
                            events.push(Event::ReservationCancelled {
                                id: r.id,
                                aircraft_id: guard.id,
                                date: *date,
                                by: r
                                    .cancelled_by
                                    .clone()
                                    .unwrap_or(CancelActor::Member(r.member_id)),
                            });
                        }
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
