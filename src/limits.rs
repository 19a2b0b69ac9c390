//! Hard guard rails. Every inbound mutation is checked against these before it
//! can touch engine state or the WAL.

/// Max aircraft in the fleet.
pub const MAX_FLEET_SIZE: usize = 64;

/// Max members in the directory.
pub const MAX_MEMBERS: usize = 4096;

/// Max requirement rows attached to a single aircraft.
pub const MAX_REQUIREMENTS_PER_AIRCRAFT: usize = 32;

/// Max qualification records carried by a single member snapshot.
pub const MAX_RECORDS_PER_MEMBER: usize = 64;

/// Max reservation entries on one aircraft's day sheet (all statuses).
pub const MAX_RESERVATIONS_PER_DAY: usize = 96;

/// How far into the future a reservation may start, in days.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 180;

/// Day sheets older than this are dropped during WAL compaction.
pub const RETENTION_DAYS: i64 = 90;

/// Max length for registrations, type designations, and member names.
pub const MAX_NAME_LEN: usize = 120;

/// Max length for an operator cancellation reason.
pub const MAX_REASON_LEN: usize = 500;
