mod booking;
mod error;
mod queries;
mod schedule;

pub use booking::BookingRequest;
pub use error::EngineError;
pub use queries::ReservationFilter;
pub use schedule::{free_windows, merge_windows, subtract_windows};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::MemberDirectory;
use crate::model::*;
use crate::roster::DutyRoster;
use crate::wal::Wal;

pub type SharedAircraftState = Arc<RwLock<AircraftState>>;

// ── Club-local clock ─────────────────────────────────────

/// Wall clock in the club's time zone. The offset is explicit configuration;
/// "today" for past-date and horizon checks is never the host's zone by
/// accident.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    pub fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    /// Whole-hour offset from UTC. Returns `None` for offsets `time` rejects.
    pub fn with_offset_hours(hours: i8) -> Option<Self> {
        UtcOffset::from_hms(hours, 0, 0)
            .ok()
            .map(|offset| Self { offset })
    }

    pub fn today(&self) -> Date {
        OffsetDateTime::now_utc().to_offset(self.offset).date()
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL, batching appends for group commit.
/// Blocks on the first Append, then drains every Append already queued,
/// writes them all, and pays one fsync for the whole batch before acking
/// the senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Commit the open batch before the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub fleet: DashMap<Ulid, SharedAircraftState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Replica of the membership subsystem's credential snapshots.
    pub directory: MemberDirectory,
    /// Replica of the duty roster: which dates have an instructor on duty.
    pub roster: DutyRoster,
    /// Reverse lookup: reservation id → (aircraft id, date).
    pub(super) reservation_index: DashMap<Ulid, (Ulid, Date)>,
    /// Serializes compaction against commits. Every state-changing operation
    /// holds this shared, acquired before any aircraft lock; `compact_wal`
    /// holds it exclusive from snapshot collection through the rewrite ack,
    /// so the snapshot misses no acknowledged event.
    pub(super) compact_gate: RwLock<()>,
    pub(super) clock: Clock,
}

/// Apply an event directly to an AircraftState (no locking — caller holds
/// the lock). Fleet registration and the member/duty replicas are applied at
/// the engine level, not here.
fn apply_to_aircraft(ac: &mut AircraftState, event: &Event, index: &DashMap<Ulid, (Ulid, Date)>) {
    match event {
        Event::AircraftGrounded { .. } => ac.grounded = true,
        Event::AircraftUngrounded { .. } => ac.grounded = false,
        Event::AircraftRetired { .. } => ac.active = false,
        Event::RequirementSet { row, .. } => ac.upsert_requirement(row.clone()),
        Event::RequirementCleared { row_id, .. } => {
            ac.remove_requirement(*row_id);
        }
        Event::ReservationBooked {
            id,
            aircraft_id,
            member_id,
            date,
            window,
            flight_type,
        } => {
            ac.day_sheet_mut(*date).insert(Reservation {
                id: *id,
                member_id: *member_id,
                window: *window,
                flight_type: *flight_type,
                status: ReservationStatus::Confirmed,
                cancelled_by: None,
            });
            index.insert(*id, (*aircraft_id, *date));
        }
        Event::ReservationCancelled { id, date, by, .. } => {
            if let Some(sheet) = ac.days.get_mut(date)
                && let Some(entry) = sheet.get_mut(*id)
            {
                entry.status = ReservationStatus::Cancelled;
                entry.cancelled_by = Some(by.clone());
            }
        }
        Event::ReservationCompleted { id, date, .. } => {
            set_status(ac, *date, *id, ReservationStatus::Completed)
        }
        Event::ReservationNoShow { id, date, .. } => {
            set_status(ac, *date, *id, ReservationStatus::NoShow)
        }
        Event::AircraftRegistered { .. }
        | Event::MemberSynced { .. }
        | Event::DutyPosted { .. }
        | Event::DutyCleared { .. } => {}
    }
}

/// Terminal entries stay on the sheet for history; only the status flips.
fn set_status(ac: &mut AircraftState, date: Date, id: Ulid, status: ReservationStatus) {
    if let Some(sheet) = ac.days.get_mut(&date)
        && let Some(entry) = sheet.get_mut(id)
    {
        entry.status = status;
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: Clock) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            fleet: DashMap::new(),
            wal_tx,
            directory: MemberDirectory::new(),
            roster: DutyRoster::new(),
            reservation_index: DashMap::new(),
            compact_gate: RwLock::new(()),
            clock,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never blocking_write here:
        // this runs inside an async context.
        for event in &events {
            match event {
                Event::AircraftRegistered {
                    id,
                    registration,
                    type_designation,
                    seats,
                } => {
                    let ac = AircraftState::new(
                        *id,
                        registration.clone(),
                        type_designation.clone(),
                        *seats,
                    );
                    engine.fleet.insert(*id, Arc::new(RwLock::new(ac)));
                }
                Event::MemberSynced { snapshot } => {
                    engine.directory.upsert(snapshot.clone());
                }
                Event::DutyPosted { date } => {
                    engine.roster.post(*date);
                }
                Event::DutyCleared { date } => {
                    engine.roster.clear(*date);
                }
                other => {
                    if let Some(aircraft_id) = event_aircraft_id(other)
                        && let Some(entry) = engine.fleet.get(&aircraft_id)
                    {
                        let ac_arc = entry.clone();
                        let mut guard = ac_arc.try_write().expect("replay: uncontended write");
                        apply_to_aircraft(&mut guard, other, &engine.reservation_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub fn get_aircraft(&self, id: &Ulid) -> Option<SharedAircraftState> {
        self.fleet.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, in that order. State never reflects an event
    /// the WAL has not accepted; a WAL failure leaves state untouched.
    pub(super) async fn persist_and_apply(
        &self,
        ac: &mut AircraftState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_aircraft(ac, event, &self.reservation_index);
        Ok(())
    }

    /// Resolve a reservation id to its aircraft and acquire the write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(Ulid, Date, tokio::sync::OwnedRwLockWriteGuard<AircraftState>), EngineError> {
        let (aircraft_id, date) = self
            .reservation_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let ac = self
            .get_aircraft(&aircraft_id)
            .ok_or(EngineError::NotFound(aircraft_id))?;
        let guard = ac.write_owned().await;
        Ok((aircraft_id, date, guard))
    }
}

/// Extract the aircraft id from an event that targets one aircraft.
fn event_aircraft_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AircraftGrounded { id }
        | Event::AircraftUngrounded { id }
        | Event::AircraftRetired { id } => Some(*id),
        Event::RequirementSet { aircraft_id, .. }
        | Event::RequirementCleared { aircraft_id, .. }
        | Event::ReservationBooked { aircraft_id, .. }
        | Event::ReservationCancelled { aircraft_id, .. }
        | Event::ReservationCompleted { aircraft_id, .. }
        | Event::ReservationNoShow { aircraft_id, .. } => Some(*aircraft_id),
        Event::AircraftRegistered { .. }
        | Event::MemberSynced { .. }
        | Event::DutyPosted { .. }
        | Event::DutyCleared { .. } => None,
    }
}
