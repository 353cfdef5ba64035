//! Camera-level logic: decoded records and the session state machine.

pub mod record;
pub mod session;

pub use record::{PictureInfoRecord, StatusRecord};
pub use session::{Event, Operation, RunReport, Session, SessionConfig, SessionState};
