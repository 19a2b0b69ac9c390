use ulid::Ulid;

use crate::model::Window;
use crate::validator::Denial;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    QualificationDenied { missing: Vec<Denial> },
    TimeConflict { window: Window, with: Ulid },
    Grounded(Ulid),
    NotPermitted(&'static str),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::QualificationDenied { missing } => {
                write!(f, "qualification denied:")?;
                for d in missing {
                    write!(f, " [{d}]")?;
                }
                Ok(())
            }
            EngineError::TimeConflict { window, with } => {
                write!(f, "requested {window} conflicts with reservation {with}")
            }
            EngineError::Grounded(id) => write!(f, "aircraft is grounded: {id}"),
            EngineError::NotPermitted(msg) => write!(f, "not permitted: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
