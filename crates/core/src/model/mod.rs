mod checkpoint;
pub mod code_module;
mod ids;
mod lesson;
mod session;
mod step;

pub use checkpoint::Checkpoint;
pub use code_module::{
    CodeModule, CodeModuleError, Dependency, DependencyDraft, ModuleDraft, TEST_FILE_MARKER,
    is_test_file,
};
pub use ids::{
    CheckpointId, CodeModuleId, DependencyId, LessonId, ParseIdError, SessionId, StepId, UserId,
};
pub use lesson::{Lesson, LessonDraft, LessonError, LessonStatus};
pub use session::{Session, SessionDraft, SessionError, SessionProgress, SessionStep, StepState};
pub use step::{
    DEFAULT_INSTRUCTIONS, SEED_MODULE_NAME, SEED_STEP_NAME, Step, StepDraft, StepError, StepOutline,
};
