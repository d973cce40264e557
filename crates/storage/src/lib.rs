#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    PendingSubmission, PendingSubmissionStore, ProgressSnapshot, ProgressStore, Storage,
    StorageError, SubmissionMarkStore, SubmissionReceipt,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
