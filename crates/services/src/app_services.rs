use std::sync::Arc;

use amigo_core::model::{Lesson, LessonStatus};
use amigo_core::template::BuiltinTemplates;
use storage::repository::{Storage, StorageError};
use tracing::info;

use crate::Clock;
use crate::auth::{AuthService, RequestContext};
use crate::error::AppServicesError;
use crate::lesson_service::LessonService;
use crate::sessions::{ProgressionService, SessionService};
use crate::step_service::StepService;

const DEMO_TITLE: &str = "Thinking in React";
const DEMO_TEST: &str = "app.spec.tsx";
const DEMO_TEST_SOURCE: &str = "import { render } from '@testing-library/react';
import App from './app';

test('renders a greeting', () => {
  const { getByText } = render(<App />);
  getByText(/hello/i);
});
";

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    auth: Arc<AuthService>,
    lessons: Arc<LessonService>,
    steps: Arc<StepService>,
    sessions: Arc<SessionService>,
    progression: Arc<ProgressionService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage, migrating the schema first.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock))
    }

    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), clock)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        Self {
            auth: Arc::new(AuthService::new(clock, Arc::clone(&storage.auth_tokens))),
            lessons: Arc::new(LessonService::new(clock, Arc::clone(&storage.lessons))),
            steps: Arc::new(StepService::new(
                clock,
                Arc::clone(&storage.steps),
                Arc::clone(&storage.progress),
                Arc::new(BuiltinTemplates),
            )),
            sessions: Arc::new(SessionService::new(
                clock,
                Arc::clone(&storage.lessons),
                Arc::clone(&storage.sessions),
            )),
            progression: Arc::new(ProgressionService::new(
                Arc::clone(&storage.lessons),
                Arc::clone(&storage.steps),
                Arc::clone(&storage.sessions),
                Arc::clone(&storage.progress),
            )),
        }
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn lessons(&self) -> Arc<LessonService> {
        Arc::clone(&self.lessons)
    }

    #[must_use]
    pub fn steps(&self) -> Arc<StepService> {
        Arc::clone(&self.steps)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionService> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn progression(&self) -> Arc<ProgressionService> {
        Arc::clone(&self.progression)
    }

    /// Create a small published lesson authored by the caller.
    ///
    /// The second step starts from the React template and carries a test
    /// file guarded by one checkpoint.
    /// An existing lesson with the demo title is returned as is.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if any authoring call fails, including
    /// `Unauthorized` for anonymous callers.
    pub async fn seed_demo(&self, ctx: &RequestContext) -> Result<Lesson, AppServicesError> {
        let existing = self.lessons.my_lessons(ctx).await?;
        if let Some(lesson) = existing.into_iter().find(|l| l.title() == DEMO_TITLE) {
            return Ok(lesson);
        }

        let lesson = self
            .lessons
            .create_lesson(ctx, DEMO_TITLE, Some("Components, props and state".into()))
            .await?;
        let first = lesson.steps().first().ok_or(StorageError::NotFound)?.id;
        self.steps
            .update_step_instructions(ctx, first, "## Step 1\n\nExport a component that says hello.")
            .await?;

        let second = self
            .steps
            .create_step(ctx, "Step 2", lesson.id(), None, Some("react"))
            .await?
            .ok_or(StorageError::NotFound)?;
        self.steps
            .create_code_module(ctx, second.id, DEMO_TEST, Some(DEMO_TEST_SOURCE))
            .await?;
        self.steps
            .create_checkpoint(ctx, second.id, Some(DEMO_TEST))
            .await?;

        let lesson = self
            .lessons
            .update_lesson_status(ctx, lesson.id(), LessonStatus::Published)
            .await?
            .ok_or(StorageError::NotFound)?;
        info!(lesson_id = %lesson.id(), "demo lesson seeded");
        Ok(lesson)
    }
}
