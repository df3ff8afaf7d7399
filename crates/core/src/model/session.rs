use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{LessonId, SessionId, StepId, UserId};
use crate::model::lesson::Lesson;
use crate::model::step::StepOutline;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("lesson has no steps to start a session on")]
    EmptyLesson,

    #[error("step {0} is not part of this session's lesson")]
    UnknownStep(StepId),
}

/// Where a student stands on one step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    InProgress,
    Completed,
}

/// Per-step completion record inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStep {
    pub step_id: StepId,
    pub is_completed: bool,
}

/// Aggregate progress over a session's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub total: usize,
    pub completed: usize,
    pub percent_complete: u8,
}

impl SessionProgress {
    /// Percent is floored; an empty total counts as zero percent.
    #[must_use]
    pub fn new(total: usize, completed: usize) -> Self {
        let percent = completed.saturating_mul(100) / total.max(1);
        Self {
            total,
            completed,
            percent_complete: u8::try_from(percent.min(100)).unwrap_or(100),
        }
    }
}

/// A student's traversal of a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    id: SessionId,
    owner_id: UserId,
    lesson_id: LessonId,
    current_step: Option<StepId>,
    steps: Vec<SessionStep>,
    created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn from_persisted(
        id: SessionId,
        owner_id: UserId,
        lesson_id: LessonId,
        current_step: Option<StepId>,
        steps: Vec<SessionStep>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            lesson_id,
            current_step,
            steps,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    /// The active step. `None` only once the lesson has no steps left.
    #[must_use]
    pub fn current_step(&self) -> Option<StepId> {
        self.current_step
    }

    #[must_use]
    pub fn steps(&self) -> &[SessionStep] {
        &self.steps
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_step_completed(&self, step_id: StepId) -> bool {
        self.steps
            .iter()
            .any(|s| s.step_id == step_id && s.is_completed)
    }

    #[must_use]
    pub fn step_state(&self, step_id: StepId) -> StepState {
        if self.is_step_completed(step_id) {
            StepState::Completed
        } else if self.current_step == Some(step_id) {
            StepState::InProgress
        } else {
            StepState::NotStarted
        }
    }

    /// Records completion of a step. Returns false when it was already completed.
    ///
    /// Steps added to the lesson after the session started get a record on
    /// first completion.
    pub fn mark_completed(&mut self, step_id: StepId) -> bool {
        match self.steps.iter_mut().find(|s| s.step_id == step_id) {
            Some(entry) if entry.is_completed => false,
            Some(entry) => {
                entry.is_completed = true;
                true
            }
            None => {
                self.steps.push(SessionStep {
                    step_id,
                    is_completed: true,
                });
                true
            }
        }
    }

    /// Move the active-step pointer to a step of `lesson`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownStep` if the step is not in the lesson.
    pub fn move_to(&mut self, step_id: StepId, lesson: &[StepOutline]) -> Result<(), SessionError> {
        if !lesson.iter().any(|s| s.id == step_id) {
            return Err(SessionError::UnknownStep(step_id));
        }
        if !self.steps.iter().any(|s| s.step_id == step_id) {
            self.steps.push(SessionStep {
                step_id,
                is_completed: false,
            });
        }
        self.current_step = Some(step_id);
        Ok(())
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let completed = self.steps.iter().filter(|s| s.is_completed).count();
        SessionProgress::new(self.steps.len(), completed)
    }
}

/// A session that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub owner_id: UserId,
    pub lesson_id: LessonId,
    pub current_step: StepId,
    pub steps: Vec<StepId>,
    pub created_at: DateTime<Utc>,
}

impl SessionDraft {
    /// Start at the lesson's first step with nothing completed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EmptyLesson` if the lesson has no steps.
    pub fn for_lesson(
        owner_id: UserId,
        lesson: &Lesson,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        let first = lesson.first_step().ok_or(SessionError::EmptyLesson)?;
        Ok(Self {
            owner_id,
            lesson_id: lesson.id(),
            current_step: first.id,
            steps: lesson.steps().iter().map(|s| s.id).collect(),
            created_at,
        })
    }
}
