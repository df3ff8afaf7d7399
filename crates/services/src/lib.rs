#![forbid(unsafe_code)]

pub mod app_services;
pub mod auth;
pub mod error;
pub mod lesson_service;
pub mod sandbox;
pub mod sessions;
pub mod step_service;

pub use amigo_core::Clock;

pub use app_services::AppServices;
pub use auth::{AuthService, RequestContext};
pub use error::{
    AppServicesError, AuthError, LessonServiceError, SessionServiceError, StepServiceError,
};
pub use lesson_service::LessonService;
pub use sandbox::SandboxView;
pub use sessions::{
    ProgressionService, SessionService, SessionStepView, SessionView, StepCompletion,
};
pub use step_service::StepService;
