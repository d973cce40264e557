use thiserror::Error;

use crate::model::BackendConfigError;
use crate::model::IdentityError;
use crate::model::ManifestError;
use crate::model::SessionStateError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    SessionState(#[from] SessionStateError),
    #[error(transparent)]
    BackendConfig(#[from] BackendConfigError),
}
