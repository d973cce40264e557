mod contract;
mod http;
mod progress;

pub use contract::{
    GradedSubmission, GradingClient, GradingOutcome, GradingRequest, HeartbeatReply,
    ProgressSummary, RemoteSessionStatus, SessionBackend, SessionOutcome, SessionToken,
    StartSessionRequest, StartedSession,
};
pub use http::{HttpGradingClient, HttpSessionBackend, config_from_env};
pub use progress::HttpProgressStore;
