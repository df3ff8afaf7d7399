use std::sync::Arc;

use amigo_core::model::{Lesson, LessonDraft, LessonId, LessonStatus, StepDraft};
use storage::repository::LessonRepository;
use tracing::info;

use crate::Clock;
use crate::auth::RequestContext;
use crate::error::LessonServiceError;

/// Lesson authoring and the lesson catalogue.
#[derive(Clone)]
pub struct LessonService {
    clock: Clock,
    lessons: Arc<dyn LessonRepository>,
}

impl LessonService {
    #[must_use]
    pub fn new(clock: Clock, lessons: Arc<dyn LessonRepository>) -> Self {
        Self { clock, lessons }
    }

    /// Create a lesson owned by the caller, seeded with one default step.
    ///
    /// The seed step carries the placeholder instructions and a single empty
    /// `app.tsx` that is not an entry module.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers,
    /// `LessonServiceError::Lesson` for a blank title,
    /// `LessonServiceError::Storage` if persistence fails.
    pub async fn create_lesson(
        &self,
        ctx: &RequestContext,
        title: &str,
        description: Option<String>,
    ) -> Result<Lesson, LessonServiceError> {
        let owner = ctx.require_user()?;
        let now = self.clock.now();
        let draft = LessonDraft::new(owner, title, description, now)?;
        let lesson = self
            .lessons
            .create_lesson(&draft, &StepDraft::seed(now))
            .await?;
        info!(lesson_id = %lesson.id(), owner = %owner, "lesson created");
        Ok(lesson)
    }

    /// # Errors
    ///
    /// Returns `LessonServiceError::Storage` if repository access fails.
    pub async fn lesson(&self, id: LessonId) -> Result<Option<Lesson>, LessonServiceError> {
        Ok(self.lessons.get_lesson(id).await?)
    }

    /// All lessons, or only those in `status`.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::Storage` if repository access fails.
    pub async fn lessons(
        &self,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>, LessonServiceError> {
        Ok(self.lessons.list_lessons(status).await?)
    }

    /// Lessons the caller authored.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers.
    pub async fn my_lessons(&self, ctx: &RequestContext) -> Result<Vec<Lesson>, LessonServiceError> {
        let owner = ctx.require_user()?;
        Ok(self.lessons.list_lessons_by_owner(owner).await?)
    }

    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers,
    /// `LessonServiceError::Lesson` for a blank title.
    pub async fn update_lesson_title(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        title: &str,
    ) -> Result<Option<Lesson>, LessonServiceError> {
        self.edit(ctx, id, |lesson| lesson.retitle(title)).await
    }

    /// A blank description clears it.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers.
    pub async fn update_lesson_description(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        description: &str,
    ) -> Result<Option<Lesson>, LessonServiceError> {
        self.edit(ctx, id, |lesson| {
            lesson.set_description(description);
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers.
    pub async fn update_lesson_status(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        status: LessonStatus,
    ) -> Result<Option<Lesson>, LessonServiceError> {
        self.edit(ctx, id, |lesson| {
            lesson.set_status(status);
            Ok(())
        })
        .await
    }

    /// Hard delete. Returns whether a lesson was removed.
    ///
    /// # Errors
    ///
    /// Returns `LessonServiceError::Auth` for anonymous callers.
    pub async fn delete_lesson(
        &self,
        ctx: &RequestContext,
        id: LessonId,
    ) -> Result<bool, LessonServiceError> {
        ctx.require_user()?;
        let deleted = self.lessons.delete_lesson(id).await?;
        if deleted {
            info!(lesson_id = %id, "lesson deleted");
        }
        Ok(deleted)
    }

    async fn edit<F>(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        apply: F,
    ) -> Result<Option<Lesson>, LessonServiceError>
    where
        F: FnOnce(&mut Lesson) -> Result<(), amigo_core::model::LessonError>,
    {
        ctx.require_user()?;
        let Some(mut lesson) = self.lessons.get_lesson(id).await? else {
            return Ok(None);
        };
        apply(&mut lesson)?;
        self.lessons.update_lesson(&lesson).await?;
        info!(lesson_id = %id, "lesson updated");
        Ok(Some(lesson))
    }
}
