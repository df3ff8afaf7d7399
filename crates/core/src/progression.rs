//! Next-step selection and session advance.

use serde::Serialize;

use crate::model::{Session, SessionError, StepId, StepOutline};

/// The step created right after `current`, if any.
///
/// Picks the smallest creation key strictly greater than `current`'s; the
/// input does not need to be sorted. Returns `None` when `current` is the
/// last step or is not in `steps`.
#[must_use]
pub fn next_step(steps: &[StepOutline], current: StepId) -> Option<&StepOutline> {
    let current_key = steps.iter().find(|s| s.id == current)?.creation_key();
    steps
        .iter()
        .filter(|s| s.creation_key() > current_key)
        .min_by_key(|s| s.creation_key())
}

/// Where a session pointing at `removed` goes once that step is deleted.
///
/// The step created right after it wins, then the one right before it.
/// Returns `None` when `removed` is the only step or is not in `steps`.
#[must_use]
pub fn step_after_removal(steps: &[StepOutline], removed: StepId) -> Option<StepId> {
    let removed_key = steps.iter().find(|s| s.id == removed)?.creation_key();
    next_step(steps, removed)
        .or_else(|| {
            steps
                .iter()
                .filter(|s| s.creation_key() < removed_key)
                .max_by_key(|s| s.creation_key())
        })
        .map(|s| s.id)
}

/// What completing a step did to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Advance {
    /// Step created after the completed one; `None` means the lesson is done.
    pub next_step: Option<StepId>,
    /// Whether the session's active-step pointer moved.
    pub moved: bool,
}

/// Record `completed` in the session and move the pointer forward.
///
/// The pointer only ever moves forward in creation order, so completing an
/// earlier step again leaves a student's later position alone. When no next
/// step exists the pointer is left unchanged.
///
/// # Errors
///
/// Returns `SessionError::UnknownStep` if `completed` is not in `steps`.
pub fn complete_in_session(
    session: &mut Session,
    steps: &[StepOutline],
    completed: StepId,
) -> Result<Advance, SessionError> {
    if !steps.iter().any(|s| s.id == completed) {
        return Err(SessionError::UnknownStep(completed));
    }
    session.mark_completed(completed);

    let Some(next) = next_step(steps, completed) else {
        return Ok(Advance {
            next_step: None,
            moved: false,
        });
    };

    let current_key = session
        .current_step()
        .and_then(|id| steps.iter().find(|s| s.id == id))
        .map(StepOutline::creation_key);
    let forward = current_key.is_none_or(|key| next.creation_key() > key);

    if forward {
        session.move_to(next.id, steps)?;
    }

    Ok(Advance {
        next_step: Some(next.id),
        moved: forward,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LessonId, SessionId, SessionStep, UserId};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn outline(id: u64, offset_secs: i64) -> StepOutline {
        StepOutline {
            id: StepId::new(id),
            name: format!("Step {id}"),
            is_completed: false,
            created_at: fixed_now() + Duration::seconds(offset_secs),
        }
    }

    fn steps() -> Vec<StepOutline> {
        // Deliberately unsorted; step 30 shares a timestamp with step 20.
        vec![outline(20, 10), outline(10, 0), outline(40, 30), outline(30, 10)]
    }

    fn session(current: u64) -> Session {
        Session::from_persisted(
            SessionId::new(1),
            UserId::new(1),
            LessonId::new(1),
            Some(StepId::new(current)),
            steps()
                .iter()
                .map(|s| SessionStep {
                    step_id: s.id,
                    is_completed: false,
                })
                .collect(),
            fixed_now(),
        )
    }

    #[test]
    fn next_step_follows_creation_order() {
        let steps = steps();
        assert_eq!(next_step(&steps, StepId::new(10)).map(|s| s.id), Some(StepId::new(20)));
        assert_eq!(next_step(&steps, StepId::new(20)).map(|s| s.id), Some(StepId::new(30)));
        assert_eq!(next_step(&steps, StepId::new(30)).map(|s| s.id), Some(StepId::new(40)));
        assert_eq!(next_step(&steps, StepId::new(40)), None);
        assert_eq!(next_step(&steps, StepId::new(99)), None);
    }

    #[test]
    fn removal_prefers_the_following_step() {
        let steps = steps();
        assert_eq!(step_after_removal(&steps, StepId::new(10)), Some(StepId::new(20)));
        assert_eq!(step_after_removal(&steps, StepId::new(30)), Some(StepId::new(40)));
        assert_eq!(step_after_removal(&steps, StepId::new(40)), Some(StepId::new(30)));
        assert_eq!(step_after_removal(&[outline(7, 0)], StepId::new(7)), None);
        assert_eq!(step_after_removal(&steps, StepId::new(99)), None);
    }

    #[test]
    fn completing_current_step_advances_pointer() {
        let steps = steps();
        let mut session = session(10);
        let advance = complete_in_session(&mut session, &steps, StepId::new(10)).unwrap();
        assert_eq!(advance.next_step, Some(StepId::new(20)));
        assert!(advance.moved);
        assert_eq!(session.current_step(), Some(StepId::new(20)));
        assert!(session.is_step_completed(StepId::new(10)));
    }

    #[test]
    fn completing_last_step_keeps_pointer() {
        let steps = steps();
        let mut session = session(40);
        let advance = complete_in_session(&mut session, &steps, StepId::new(40)).unwrap();
        assert_eq!(advance.next_step, None);
        assert!(!advance.moved);
        assert_eq!(session.current_step(), Some(StepId::new(40)));
    }

    #[test]
    fn completing_twice_is_stable() {
        let steps = steps();
        let mut session = session(10);
        complete_in_session(&mut session, &steps, StepId::new(10)).unwrap();
        let snapshot = session.clone();
        let advance = complete_in_session(&mut session, &steps, StepId::new(10)).unwrap();
        assert!(!advance.moved);
        assert_eq!(session, snapshot);
    }

    #[test]
    fn earlier_completion_never_moves_pointer_back() {
        let steps = steps();
        let mut session = session(40);
        let advance = complete_in_session(&mut session, &steps, StepId::new(10)).unwrap();
        assert!(!advance.moved);
        assert_eq!(session.current_step(), Some(StepId::new(40)));
    }

    #[test]
    fn unknown_step_is_rejected() {
        let steps = steps();
        let mut session = session(10);
        let err = complete_in_session(&mut session, &steps, StepId::new(5)).unwrap_err();
        assert_eq!(err, SessionError::UnknownStep(StepId::new(5)));
    }
}
