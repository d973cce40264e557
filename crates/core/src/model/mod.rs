mod answer;
mod backend;
mod exam;
mod identity;
mod ids;
mod session;
mod violation;

pub use ids::{ExamId, ParseIdError, QuestionId, SessionId};

pub use answer::{AnswerValue, ConfidenceLevel, ParseConfidenceError};
pub use backend::{BackendConfig, BackendConfigDraft, BackendConfigError};
pub use exam::{
    Availability, AvailabilityWindow, ExamManifest, ManifestError, ProctorSettings,
};
pub use identity::{IdentityDraft, IdentityError, StudentIdentity};
pub use session::{
    ExamSession, LifecycleState, ParseLifecycleError, SessionStateError,
};
pub use violation::{Escalation, ViolationKind, ViolationLedger, ViolationRecord};
