use std::sync::Arc;

use amigo_core::model::{Session, SessionError, SessionId, Step, StepId};
use amigo_core::progression::complete_in_session;
use serde::Serialize;
use storage::repository::{
    LessonRepository, ProgressPersistence, SessionRepository, StepRepository,
};
use tracing::info;

use crate::auth::RequestContext;
use crate::error::SessionServiceError;

/// Outcome of completing a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepCompletion {
    pub step: Step,
    pub session: Option<Session>,
    /// Step created after the completed one; `None` once the lesson is done.
    pub next_step: Option<StepId>,
    /// Whether the session's active-step pointer moved.
    pub moved: bool,
}

/// Step completion and session advance.
#[derive(Clone)]
pub struct ProgressionService {
    lessons: Arc<dyn LessonRepository>,
    steps: Arc<dyn StepRepository>,
    sessions: Arc<dyn SessionRepository>,
    progress: Arc<dyn ProgressPersistence>,
}

impl ProgressionService {
    #[must_use]
    pub fn new(
        lessons: Arc<dyn LessonRepository>,
        steps: Arc<dyn StepRepository>,
        sessions: Arc<dyn SessionRepository>,
        progress: Arc<dyn ProgressPersistence>,
    ) -> Self {
        Self {
            lessons,
            steps,
            sessions,
            progress,
        }
    }

    /// Mark a step complete and, when a session is given, record it there
    /// and move the session on to the next step.
    ///
    /// Both records are written in one transaction. Completing a step twice
    /// leaves the same state behind. A missing step, a missing lesson, or a
    /// session the caller does not own yields `None`.
    ///
    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers,
    /// `SessionServiceError::Session` if the session tracks another lesson,
    /// `SessionServiceError::Storage` if the transaction fails.
    pub async fn complete_step(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        session_id: Option<SessionId>,
    ) -> Result<Option<StepCompletion>, SessionServiceError> {
        let owner = ctx.require_user()?;
        let Some(mut step) = self.steps.get_step(step_id).await? else {
            return Ok(None);
        };

        let mut session = match session_id {
            Some(id) => match self.sessions.get_session(id).await? {
                Some(session) if session.owner_id() == owner => Some(session),
                _ => return Ok(None),
            },
            None => None,
        };

        step.complete();

        let mut next_step = None;
        let mut moved = false;
        if let Some(session) = session.as_mut() {
            let Some(lesson) = self.lessons.get_lesson(step.lesson_id).await? else {
                return Ok(None);
            };
            if session.lesson_id() != lesson.id() {
                return Err(SessionError::UnknownStep(step_id).into());
            }
            let advance = complete_in_session(session, lesson.steps(), step_id)?;
            next_step = advance.next_step;
            moved = advance.moved;
        }

        self.progress
            .apply_completion(&step, session.as_ref())
            .await?;
        info!(
            step_id = %step_id,
            session_id = ?session.as_ref().map(Session::id),
            next_step = ?next_step,
            moved,
            "step completed"
        );

        Ok(Some(StepCompletion {
            step,
            session,
            next_step,
            moved,
        }))
    }
}
