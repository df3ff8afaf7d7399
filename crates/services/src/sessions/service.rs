use std::sync::Arc;

use amigo_core::model::{LessonId, Session, SessionDraft, SessionId, StepId, UserId};
use storage::repository::{LessonRepository, SessionRepository, StorageError};
use tracing::info;

use crate::Clock;
use crate::auth::RequestContext;
use crate::error::SessionServiceError;
use super::view::SessionView;

/// A student's sessions: one per lesson, owned by the caller.
///
/// Sessions of other users are treated as missing.
#[derive(Clone)]
pub struct SessionService {
    clock: Clock,
    lessons: Arc<dyn LessonRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl SessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        lessons: Arc<dyn LessonRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            clock,
            lessons,
            sessions,
        }
    }

    /// Return the caller's session for a lesson, creating it at the first step.
    ///
    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers,
    /// `SessionServiceError::Session` if the lesson has no steps.
    pub async fn start_session(
        &self,
        ctx: &RequestContext,
        lesson_id: LessonId,
    ) -> Result<Option<Session>, SessionServiceError> {
        let owner = ctx.require_user()?;
        if let Some(existing) = self.sessions.find_session(owner, lesson_id).await? {
            return Ok(Some(existing));
        }
        let Some(lesson) = self.lessons.get_lesson(lesson_id).await? else {
            return Ok(None);
        };

        let draft = SessionDraft::for_lesson(owner, &lesson, self.clock.now())?;
        match self.sessions.insert_session(&draft).await {
            Ok(session) => {
                info!(session_id = %session.id(), lesson_id = %lesson_id, "session started");
                Ok(Some(session))
            }
            // Lost a race with a concurrent start for the same lesson.
            Err(StorageError::Conflict) => Ok(self.sessions.find_session(owner, lesson_id).await?),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers.
    pub async fn session(
        &self,
        ctx: &RequestContext,
        lesson_id: LessonId,
    ) -> Result<Option<Session>, SessionServiceError> {
        let owner = ctx.require_user()?;
        Ok(self.sessions.find_session(owner, lesson_id).await?)
    }

    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers.
    pub async fn sessions(&self, ctx: &RequestContext) -> Result<Vec<Session>, SessionServiceError> {
        let owner = ctx.require_user()?;
        Ok(self.sessions.list_sessions(owner).await?)
    }

    /// Move the active-step pointer explicitly, in either direction.
    ///
    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers,
    /// `SessionServiceError::Session` if the step is not in the lesson.
    pub async fn set_next_step(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        step_id: StepId,
    ) -> Result<Option<Session>, SessionServiceError> {
        let owner = ctx.require_user()?;
        let Some(mut session) = self.owned(owner, session_id).await? else {
            return Ok(None);
        };
        let Some(lesson) = self.lessons.get_lesson(session.lesson_id()).await? else {
            return Ok(None);
        };
        session.move_to(step_id, lesson.steps())?;
        self.sessions.update_session(&session).await?;
        info!(session_id = %session_id, step_id = %step_id, "session moved");
        Ok(Some(session))
    }

    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers.
    pub async fn delete_session(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
    ) -> Result<bool, SessionServiceError> {
        let owner = ctx.require_user()?;
        if self.owned(owner, session_id).await?.is_none() {
            return Ok(false);
        }
        let deleted = self.sessions.delete_session(session_id).await?;
        if deleted {
            info!(session_id = %session_id, "session deleted");
        }
        Ok(deleted)
    }

    /// Progress of the caller through a lesson.
    ///
    /// # Errors
    ///
    /// Returns `SessionServiceError::Auth` for anonymous callers.
    pub async fn progress(
        &self,
        ctx: &RequestContext,
        lesson_id: LessonId,
    ) -> Result<Option<SessionView>, SessionServiceError> {
        let owner = ctx.require_user()?;
        let Some(session) = self.sessions.find_session(owner, lesson_id).await? else {
            return Ok(None);
        };
        let Some(lesson) = self.lessons.get_lesson(lesson_id).await? else {
            return Ok(None);
        };
        Ok(Some(SessionView::new(&session, &lesson)))
    }

    async fn owned(
        &self,
        owner: UserId,
        id: SessionId,
    ) -> Result<Option<Session>, SessionServiceError> {
        Ok(self
            .sessions
            .get_session(id)
            .await?
            .filter(|s| s.owner_id() == owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amigo_core::model::{LessonDraft, SessionError, StepDraft, StepState};
    use amigo_core::template::Template;
    use amigo_core::time::{fixed_clock, fixed_now};
    use chrono::Duration;
    use storage::repository::{InMemoryRepository, StepRepository};

    fn student() -> RequestContext {
        RequestContext::authenticated(UserId::new(2))
    }

    fn service(repo: &InMemoryRepository) -> SessionService {
        SessionService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    async fn two_step_lesson(repo: &InMemoryRepository) -> (LessonId, StepId, StepId) {
        let draft = LessonDraft::new(UserId::new(1), "Loops", None, fixed_now()).unwrap();
        let lesson = repo
            .create_lesson(&draft, &StepDraft::seed(fixed_now()))
            .await
            .unwrap();
        let second = StepDraft::from_template(
            "Two",
            Template::default(),
            fixed_now() + Duration::minutes(1),
        )
        .unwrap();
        let second = repo.insert_step(lesson.id(), &second).await.unwrap();
        (lesson.id(), lesson.steps()[0].id, second.id)
    }

    #[tokio::test]
    async fn start_session_is_idempotent_per_lesson() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, first, _) = two_step_lesson(&repo).await;

        let started = svc.start_session(&student(), lesson_id).await.unwrap().unwrap();
        assert_eq!(started.current_step(), Some(first));
        let again = svc.start_session(&student(), lesson_id).await.unwrap().unwrap();
        assert_eq!(again.id(), started.id());
        assert_eq!(svc.sessions(&student()).await.unwrap().len(), 1);

        assert!(
            svc.start_session(&student(), LessonId::new(404))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            svc.start_session(&RequestContext::anonymous(), lesson_id)
                .await
                .unwrap_err()
                .is_unauthorized()
        );
    }

    #[tokio::test]
    async fn set_next_step_validates_membership() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, _, second) = two_step_lesson(&repo).await;
        let session = svc.start_session(&student(), lesson_id).await.unwrap().unwrap();

        let moved = svc
            .set_next_step(&student(), session.id(), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.current_step(), Some(second));

        let err = svc
            .set_next_step(&student(), session.id(), StepId::new(999))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionServiceError::Session(SessionError::UnknownStep(_))
        ));
    }

    #[tokio::test]
    async fn other_users_sessions_look_missing() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, _, second) = two_step_lesson(&repo).await;
        let session = svc.start_session(&student(), lesson_id).await.unwrap().unwrap();
        let stranger = RequestContext::authenticated(UserId::new(3));

        assert!(
            svc.set_next_step(&stranger, session.id(), second)
                .await
                .unwrap()
                .is_none()
        );
        assert!(!svc.delete_session(&stranger, session.id()).await.unwrap());
        assert!(svc.delete_session(&student(), session.id()).await.unwrap());
        assert!(svc.session(&student(), lesson_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_view_reports_states_in_lesson_order() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, first, second) = two_step_lesson(&repo).await;
        svc.start_session(&student(), lesson_id).await.unwrap();

        let view = svc.progress(&student(), lesson_id).await.unwrap().unwrap();
        assert_eq!(view.progress.total, 2);
        assert_eq!(view.progress.percent_complete, 0);
        let states: Vec<_> = view.steps.iter().map(|s| (s.step_id, s.state)).collect();
        assert_eq!(
            states,
            [(first, StepState::InProgress), (second, StepState::NotStarted)]
        );
    }

    #[tokio::test]
    async fn deleting_the_active_step_hands_over_to_the_next_one() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, first, second) = two_step_lesson(&repo).await;
        svc.start_session(&student(), lesson_id).await.unwrap();

        assert!(repo.delete_step(first).await.unwrap());

        let view = svc.progress(&student(), lesson_id).await.unwrap().unwrap();
        assert_eq!(view.current_step, Some(second));
        let states: Vec<_> = view.steps.iter().map(|s| (s.step_id, s.state)).collect();
        assert_eq!(states, [(second, StepState::InProgress)]);
        assert_eq!(view.progress.total, 1);
    }
}
