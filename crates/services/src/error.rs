//! Shared error types for the services crate.

use thiserror::Error;

use amigo_core::model::{CodeModuleError, LessonError, SessionError, StepError};
use amigo_core::template::TemplateError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Raised by the authentication gate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("not authenticated")]
    Unauthorized,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `LessonService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LessonServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `StepService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Module(#[from] CodeModuleError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Lesson(#[from] LessonServiceError),
    #[error(transparent)]
    Step(#[from] StepServiceError),
}

macro_rules! unauthorized_check {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                /// Whether the call was rejected by the authentication gate.
                #[must_use]
                pub fn is_unauthorized(&self) -> bool {
                    matches!(self, Self::Auth(AuthError::Unauthorized))
                }
            }
        )+
    };
}

unauthorized_check!(LessonServiceError, StepServiceError, SessionServiceError);

/// Storage `NotFound` becomes `Ok(None)`; other failures pass through.
pub(crate) fn found<T>(result: Result<T, StorageError>) -> Result<Option<T>, StorageError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}
