mod cache;
mod controller;
mod events;
mod gate;
mod machine;
mod plan;
mod sync;
mod view;

// Public API of the session subsystem.
pub use crate::error::{ControllerError, StartError, SyncError};
pub use controller::{ExamSessionController, OpenedSession};
pub use events::{Directive, RecoveryAction, SessionEvent, SessionNotice, SubmissionTrigger};
pub use machine::{SessionMachine, Step, SubmissionResolution};
pub use plan::attempt_question_order;
pub use sync::{SubmissionRetryService, SyncReport};
pub use view::SessionOverview;
