//! Flight-line reservation engine for a flying club: an in-memory fleet
//! schedule guarded by qualification rules, persisted through a write-ahead
//! log and served over HTTP.

pub mod compactor;
pub mod directory;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod roster;
pub mod validator;
pub mod wal;
