mod service;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionServiceError;
pub use service::SessionService;
pub use view::{SessionStepView, SessionView};
pub use workflow::{ProgressionService, StepCompletion};
