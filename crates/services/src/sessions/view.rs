use amigo_core::model::{
    Lesson, LessonId, Session, SessionId, SessionProgress, StepId, StepState,
};
use serde::Serialize;

/// One lesson step as seen from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStepView {
    pub step_id: StepId,
    pub name: String,
    pub state: StepState,
}

/// Presentation-agnostic progress of a student through a lesson.
///
/// Counts are taken over the lesson's current steps, so steps added after
/// the session started show up as not started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub lesson_id: LessonId,
    pub current_step: Option<StepId>,
    pub progress: SessionProgress,
    pub steps: Vec<SessionStepView>,
}

impl SessionView {
    #[must_use]
    pub fn new(session: &Session, lesson: &Lesson) -> Self {
        let steps: Vec<SessionStepView> = lesson
            .steps()
            .iter()
            .map(|outline| SessionStepView {
                step_id: outline.id,
                name: outline.name.clone(),
                state: session.step_state(outline.id),
            })
            .collect();
        let completed = steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .count();

        Self {
            session_id: session.id(),
            lesson_id: lesson.id(),
            current_step: session.current_step(),
            progress: SessionProgress::new(steps.len(), completed),
            steps,
        }
    }
}
