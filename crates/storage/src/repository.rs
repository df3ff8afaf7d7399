use async_trait::async_trait;
use chrono::{DateTime, Utc};
use amigo_core::model::{
    Checkpoint, CheckpointId, CodeModule, CodeModuleId, Dependency, DependencyDraft,
    DependencyId, Lesson, LessonDraft, LessonId, LessonStatus, ModuleDraft, Session,
    SessionDraft, SessionId, SessionStep, Step, StepDraft, StepId, StepOutline, UserId,
};
use amigo_core::progression::step_after_removal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Repository contract for lessons.
#[async_trait]
pub trait LessonRepository: Send + Sync {
    /// Store a lesson together with its first step in one write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if either record cannot be stored.
    async fn create_lesson(
        &self,
        lesson: &LessonDraft,
        seed: &StepDraft,
    ) -> Result<Lesson, StorageError>;

    /// Fetch a lesson with its step outline in creation order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures; a missing lesson is `Ok(None)`.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// List lessons ordered by id, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn list_lessons(&self, status: Option<LessonStatus>)
    -> Result<Vec<Lesson>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn list_lessons_by_owner(&self, owner: UserId) -> Result<Vec<Lesson>, StorageError>;

    /// Persist title, description and status.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is gone.
    async fn update_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// Hard delete; steps, their children and sessions go with it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures. `Ok(false)` if nothing was deleted.
    async fn delete_lesson(&self, id: LessonId) -> Result<bool, StorageError>;
}

/// Repository contract for steps and the records they own.
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Append a step (with its modules and dependencies) to a lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is missing,
    /// `StorageError::Conflict` on duplicate module names.
    async fn insert_step(&self, lesson_id: LessonId, draft: &StepDraft)
    -> Result<Step, StorageError>;

    /// Fetch a step with modules, dependencies and checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures; a missing step is `Ok(None)`.
    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StorageError>;

    /// Persist name, instructions, completion flag and checkpoint pointer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is gone.
    async fn update_step(&self, step: &Step) -> Result<(), StorageError>;

    /// Point the step at one of its own checkpoints, leaving every other
    /// column alone.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is gone or the checkpoint
    /// is not one of its own.
    async fn set_current_checkpoint(
        &self,
        step_id: StepId,
        checkpoint_id: CheckpointId,
    ) -> Result<(), StorageError>;

    /// Hard delete; checkpoints, modules and dependencies go with it.
    ///
    /// Sessions whose active step this was move to the step created right
    /// after it, or else right before it; the pointer is cleared only when
    /// the lesson has no other step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures. `Ok(false)` if nothing was deleted.
    async fn delete_step(&self, id: StepId) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is missing.
    async fn insert_checkpoint(
        &self,
        step_id: StepId,
        test: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Checkpoint, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is missing,
    /// `StorageError::Conflict` if the name is taken within the step.
    async fn insert_module(
        &self,
        step_id: StepId,
        draft: &ModuleDraft,
    ) -> Result<CodeModule, StorageError>;

    /// Persist a module's name and value. Entry changes go through `set_entry_module`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the module is gone,
    /// `StorageError::Conflict` if the new name is taken within the step.
    async fn update_module(&self, module: &CodeModule) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures. `Ok(false)` if nothing was deleted.
    async fn delete_module(&self, id: CodeModuleId) -> Result<bool, StorageError>;

    /// Make `module_id` the step's only entry module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the module is not in the step.
    async fn set_entry_module(
        &self,
        step_id: StepId,
        module_id: CodeModuleId,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is missing.
    async fn insert_dependency(
        &self,
        step_id: StepId,
        draft: &DependencyDraft,
    ) -> Result<Dependency, StorageError>;
}

/// Repository contract for student sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is missing.
    async fn insert_session(&self, draft: &SessionDraft) -> Result<Session, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures; a missing session is `Ok(None)`.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError>;

    /// The session `owner` has on `lesson_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn find_session(
        &self,
        owner: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<Session>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn list_sessions(&self, owner: UserId) -> Result<Vec<Session>, StorageError>;

    /// Persist the active-step pointer and per-step flags.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session is gone.
    async fn update_session(&self, session: &Session) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures. `Ok(false)` if nothing was deleted.
    async fn delete_session(&self, id: SessionId) -> Result<bool, StorageError>;
}

/// Writes that touch more than one record and must land together.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// Persist a step's completion and, when given, the advanced session,
    /// in a single transaction.
    ///
    /// Only the step's completion flag is written; its name, instructions
    /// and checkpoint pointer keep their stored values.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session belongs to another lesson,
    /// `StorageError::NotFound` if either record is gone. Nothing is written on error.
    async fn apply_completion(
        &self,
        step: &Step,
        session: Option<&Session>,
    ) -> Result<(), StorageError>;

    /// Persist a checkpoint's completion together with the step's new
    /// checkpoint pointer. No other step column is written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the checkpoint belongs to another step,
    /// `StorageError::NotFound` if either record is gone.
    async fn apply_checkpoint(
        &self,
        step: &Step,
        checkpoint: &Checkpoint,
    ) -> Result<(), StorageError>;
}

/// Opaque login tokens mapped to users.
#[async_trait]
pub trait AuthTokenRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the token already exists.
    async fn insert_token(
        &self,
        token: &str,
        user: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures; unknown tokens are `Ok(None)`.
    async fn user_for_token(&self, token: &str) -> Result<Option<UserId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn revoke_token(&self, token: &str) -> Result<bool, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct LessonRow {
    owner_id: UserId,
    title: String,
    description: Option<String>,
    status: LessonStatus,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StepRow {
    lesson_id: LessonId,
    name: String,
    instructions: String,
    is_completed: bool,
    current_checkpoint_id: Option<CheckpointId>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    lessons: BTreeMap<LessonId, LessonRow>,
    steps: BTreeMap<StepId, StepRow>,
    checkpoints: BTreeMap<CheckpointId, Checkpoint>,
    modules: BTreeMap<CodeModuleId, CodeModule>,
    dependencies: BTreeMap<DependencyId, Dependency>,
    sessions: BTreeMap<SessionId, Session>,
    tokens: HashMap<String, UserId>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn outlines(&self, lesson_id: LessonId) -> Vec<StepOutline> {
        self.steps
            .iter()
            .filter(|(_, row)| row.lesson_id == lesson_id)
            .map(|(id, row)| StepOutline {
                id: *id,
                name: row.name.clone(),
                is_completed: row.is_completed,
                created_at: row.created_at,
            })
            .collect()
    }

    fn lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let Some(row) = self.lessons.get(&id) else {
            return Ok(None);
        };
        Lesson::from_persisted(
            id,
            row.owner_id,
            row.title.clone(),
            row.description.clone(),
            row.status,
            row.created_at,
            self.outlines(id),
        )
        .map(Some)
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn step(&self, id: StepId) -> Option<Step> {
        let row = self.steps.get(&id)?;
        let mut step = Step {
            id,
            lesson_id: row.lesson_id,
            name: row.name.clone(),
            instructions: row.instructions.clone(),
            is_completed: row.is_completed,
            current_checkpoint_id: row.current_checkpoint_id,
            created_at: row.created_at,
            code_modules: self
                .modules
                .values()
                .filter(|m| m.step_id == id)
                .cloned()
                .collect(),
            dependencies: self
                .dependencies
                .values()
                .filter(|d| d.step_id == id)
                .cloned()
                .collect(),
            checkpoints: self
                .checkpoints
                .values()
                .filter(|c| c.step_id == id)
                .cloned()
                .collect(),
        };
        step.normalize_order();
        Some(step)
    }

    fn module_name_taken(&self, step_id: StepId, name: &str, except: Option<CodeModuleId>) -> bool {
        self.modules
            .values()
            .any(|m| m.step_id == step_id && m.name == name && Some(m.id) != except)
    }

    fn add_step(&mut self, lesson_id: LessonId, draft: &StepDraft) -> Result<Step, StorageError> {
        if !self.lessons.contains_key(&lesson_id) {
            return Err(StorageError::NotFound);
        }
        let mut names: Vec<&str> = draft.modules.iter().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(StorageError::Conflict);
        }

        let step_id = StepId::new(self.allocate());
        self.steps.insert(
            step_id,
            StepRow {
                lesson_id,
                name: draft.name.clone(),
                instructions: draft.instructions.clone(),
                is_completed: false,
                current_checkpoint_id: None,
                created_at: draft.created_at,
            },
        );
        for module in &draft.modules {
            let id = CodeModuleId::new(self.allocate());
            self.modules.insert(
                id,
                CodeModule {
                    id,
                    step_id,
                    name: module.name.clone(),
                    value: module.value.clone(),
                    is_entry: module.is_entry,
                },
            );
        }
        for dependency in &draft.dependencies {
            self.push_dependency(step_id, dependency);
        }
        self.step(step_id).ok_or(StorageError::NotFound)
    }

    fn push_dependency(&mut self, step_id: StepId, draft: &DependencyDraft) -> Dependency {
        let id = DependencyId::new(self.allocate());
        let dependency = Dependency {
            id,
            step_id,
            package: draft.package.clone(),
            version: draft.version.clone(),
        };
        self.dependencies.insert(id, dependency.clone());
        dependency
    }

    /// Removes a step with its children. Sessions that pointed at it move to
    /// the neighbouring step of the same lesson.
    fn remove_step(&mut self, id: StepId) -> bool {
        let Some(row) = self.steps.get(&id) else {
            return false;
        };
        let replacement = step_after_removal(&self.outlines(row.lesson_id), id);
        self.steps.remove(&id);
        self.checkpoints.retain(|_, c| c.step_id != id);
        self.modules.retain(|_, m| m.step_id != id);
        self.dependencies.retain(|_, d| d.step_id != id);
        for session in self.sessions.values_mut() {
            let current = match session.current_step() {
                Some(current) if current == id => replacement,
                other => other,
            };
            let mut steps: Vec<SessionStep> = session
                .steps()
                .iter()
                .filter(|s| s.step_id != id)
                .cloned()
                .collect();
            if let Some(current) = current {
                if !steps.iter().any(|s| s.step_id == current) {
                    steps.push(SessionStep {
                        step_id: current,
                        is_completed: false,
                    });
                }
            }
            *session = Session::from_persisted(
                session.id(),
                session.owner_id(),
                session.lesson_id(),
                current,
                steps,
                session.created_at(),
            );
        }
        true
    }

    fn point_at_checkpoint(
        &mut self,
        step_id: StepId,
        checkpoint_id: Option<CheckpointId>,
    ) -> Result<(), StorageError> {
        let row = self.steps.get_mut(&step_id).ok_or(StorageError::NotFound)?;
        row.current_checkpoint_id = checkpoint_id;
        Ok(())
    }

    fn write_step(&mut self, step: &Step) -> Result<(), StorageError> {
        let row = self.steps.get_mut(&step.id).ok_or(StorageError::NotFound)?;
        row.name.clone_from(&step.name);
        row.instructions.clone_from(&step.instructions);
        row.is_completed = step.is_completed;
        row.current_checkpoint_id = step.current_checkpoint_id;
        Ok(())
    }
}

/// In-memory repository for tests and prototyping.
///
/// All state sits behind one mutex, so every trait call is atomic, which
/// is what the multi-record `ProgressPersistence` writes rely on.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl LessonRepository for InMemoryRepository {
    async fn create_lesson(
        &self,
        lesson: &LessonDraft,
        seed: &StepDraft,
    ) -> Result<Lesson, StorageError> {
        let mut state = self.state()?;
        let id = LessonId::new(state.allocate());
        state.lessons.insert(
            id,
            LessonRow {
                owner_id: lesson.owner_id,
                title: lesson.title.clone(),
                description: lesson.description.clone(),
                status: lesson.status,
                created_at: lesson.created_at,
            },
        );
        if let Err(e) = state.add_step(id, seed) {
            state.lessons.remove(&id);
            return Err(e);
        }
        state.lesson(id)?.ok_or(StorageError::NotFound)
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        self.state()?.lesson(id)
    }

    async fn list_lessons(
        &self,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>, StorageError> {
        let state = self.state()?;
        let mut lessons = Vec::new();
        for (id, row) in &state.lessons {
            if status.is_some_and(|s| s != row.status) {
                continue;
            }
            lessons.extend(state.lesson(*id)?);
        }
        Ok(lessons)
    }

    async fn list_lessons_by_owner(&self, owner: UserId) -> Result<Vec<Lesson>, StorageError> {
        let state = self.state()?;
        let mut lessons = Vec::new();
        for (id, row) in &state.lessons {
            if row.owner_id == owner {
                lessons.extend(state.lesson(*id)?);
            }
        }
        Ok(lessons)
    }

    async fn update_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let mut state = self.state()?;
        let row = state
            .lessons
            .get_mut(&lesson.id())
            .ok_or(StorageError::NotFound)?;
        row.title = lesson.title().to_owned();
        row.description = lesson.description().map(str::to_owned);
        row.status = lesson.status();
        Ok(())
    }

    async fn delete_lesson(&self, id: LessonId) -> Result<bool, StorageError> {
        let mut state = self.state()?;
        if state.lessons.remove(&id).is_none() {
            return Ok(false);
        }
        let step_ids: Vec<StepId> = state
            .steps
            .iter()
            .filter(|(_, row)| row.lesson_id == id)
            .map(|(step_id, _)| *step_id)
            .collect();
        for step_id in step_ids {
            state.remove_step(step_id);
        }
        state.sessions.retain(|_, s| s.lesson_id() != id);
        Ok(true)
    }
}

#[async_trait]
impl StepRepository for InMemoryRepository {
    async fn insert_step(
        &self,
        lesson_id: LessonId,
        draft: &StepDraft,
    ) -> Result<Step, StorageError> {
        self.state()?.add_step(lesson_id, draft)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StorageError> {
        Ok(self.state()?.step(id))
    }

    async fn update_step(&self, step: &Step) -> Result<(), StorageError> {
        self.state()?.write_step(step)
    }

    async fn set_current_checkpoint(
        &self,
        step_id: StepId,
        checkpoint_id: CheckpointId,
    ) -> Result<(), StorageError> {
        let mut state = self.state()?;
        if state
            .checkpoints
            .get(&checkpoint_id)
            .is_none_or(|c| c.step_id != step_id)
        {
            return Err(StorageError::NotFound);
        }
        state.point_at_checkpoint(step_id, Some(checkpoint_id))
    }

    async fn delete_step(&self, id: StepId) -> Result<bool, StorageError> {
        Ok(self.state()?.remove_step(id))
    }

    async fn insert_checkpoint(
        &self,
        step_id: StepId,
        test: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Checkpoint, StorageError> {
        let mut state = self.state()?;
        if !state.steps.contains_key(&step_id) {
            return Err(StorageError::NotFound);
        }
        let checkpoint = Checkpoint {
            id: CheckpointId::new(state.allocate()),
            step_id,
            is_completed: false,
            test,
            created_at,
        };
        state.checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(checkpoint)
    }

    async fn insert_module(
        &self,
        step_id: StepId,
        draft: &ModuleDraft,
    ) -> Result<CodeModule, StorageError> {
        let mut state = self.state()?;
        if !state.steps.contains_key(&step_id) {
            return Err(StorageError::NotFound);
        }
        if state.module_name_taken(step_id, &draft.name, None) {
            return Err(StorageError::Conflict);
        }
        if draft.is_entry && state.modules.values().any(|m| m.step_id == step_id && m.is_entry) {
            return Err(StorageError::Conflict);
        }
        let module = CodeModule {
            id: CodeModuleId::new(state.allocate()),
            step_id,
            name: draft.name.clone(),
            value: draft.value.clone(),
            is_entry: draft.is_entry,
        };
        state.modules.insert(module.id, module.clone());
        Ok(module)
    }

    async fn update_module(&self, module: &CodeModule) -> Result<(), StorageError> {
        let mut state = self.state()?;
        let step_id = state
            .modules
            .get(&module.id)
            .map(|m| m.step_id)
            .ok_or(StorageError::NotFound)?;
        if state.module_name_taken(step_id, &module.name, Some(module.id)) {
            return Err(StorageError::Conflict);
        }
        let stored = state
            .modules
            .get_mut(&module.id)
            .ok_or(StorageError::NotFound)?;
        stored.name.clone_from(&module.name);
        stored.value.clone_from(&module.value);
        Ok(())
    }

    async fn delete_module(&self, id: CodeModuleId) -> Result<bool, StorageError> {
        Ok(self.state()?.modules.remove(&id).is_some())
    }

    async fn set_entry_module(
        &self,
        step_id: StepId,
        module_id: CodeModuleId,
    ) -> Result<(), StorageError> {
        let mut state = self.state()?;
        if !state
            .modules
            .get(&module_id)
            .is_some_and(|m| m.step_id == step_id)
        {
            return Err(StorageError::NotFound);
        }
        for module in state.modules.values_mut().filter(|m| m.step_id == step_id) {
            module.is_entry = module.id == module_id;
        }
        Ok(())
    }

    async fn insert_dependency(
        &self,
        step_id: StepId,
        draft: &DependencyDraft,
    ) -> Result<Dependency, StorageError> {
        let mut state = self.state()?;
        if !state.steps.contains_key(&step_id) {
            return Err(StorageError::NotFound);
        }
        Ok(state.push_dependency(step_id, draft))
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn insert_session(&self, draft: &SessionDraft) -> Result<Session, StorageError> {
        let mut state = self.state()?;
        if !state.lessons.contains_key(&draft.lesson_id) {
            return Err(StorageError::NotFound);
        }
        let id = SessionId::new(state.allocate());
        let session = Session::from_persisted(
            id,
            draft.owner_id,
            draft.lesson_id,
            Some(draft.current_step),
            draft
                .steps
                .iter()
                .map(|step_id| SessionStep {
                    step_id: *step_id,
                    is_completed: false,
                })
                .collect(),
            draft.created_at,
        );
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn find_session(
        &self,
        owner: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<Session>, StorageError> {
        Ok(self
            .state()?
            .sessions
            .values()
            .find(|s| s.owner_id() == owner && s.lesson_id() == lesson_id)
            .cloned())
    }

    async fn list_sessions(&self, owner: UserId) -> Result<Vec<Session>, StorageError> {
        Ok(self
            .state()?
            .sessions
            .values()
            .filter(|s| s.owner_id() == owner)
            .cloned()
            .collect())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut state = self.state()?;
        let stored = state
            .sessions
            .get_mut(&session.id())
            .ok_or(StorageError::NotFound)?;
        *stored = session.clone();
        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> Result<bool, StorageError> {
        Ok(self.state()?.sessions.remove(&id).is_some())
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn apply_completion(
        &self,
        step: &Step,
        session: Option<&Session>,
    ) -> Result<(), StorageError> {
        let mut state = self.state()?;
        if !state.steps.contains_key(&step.id) {
            return Err(StorageError::NotFound);
        }
        if let Some(session) = session {
            if session.lesson_id() != step.lesson_id {
                return Err(StorageError::Conflict);
            }
            if !state.sessions.contains_key(&session.id()) {
                return Err(StorageError::NotFound);
            }
        }

        if let Some(row) = state.steps.get_mut(&step.id) {
            row.is_completed = step.is_completed;
        }
        if let Some(session) = session {
            state.sessions.insert(session.id(), session.clone());
        }
        Ok(())
    }

    async fn apply_checkpoint(
        &self,
        step: &Step,
        checkpoint: &Checkpoint,
    ) -> Result<(), StorageError> {
        if checkpoint.step_id != step.id {
            return Err(StorageError::Conflict);
        }
        let mut state = self.state()?;
        if !state.checkpoints.contains_key(&checkpoint.id) || !state.steps.contains_key(&step.id) {
            return Err(StorageError::NotFound);
        }
        state.point_at_checkpoint(step.id, step.current_checkpoint_id)?;
        state.checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthTokenRepository for InMemoryRepository {
    async fn insert_token(
        &self,
        token: &str,
        user: UserId,
        _created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.state()?;
        if state.tokens.contains_key(token) {
            return Err(StorageError::Conflict);
        }
        state.tokens.insert(token.to_owned(), user);
        Ok(())
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<UserId>, StorageError> {
        Ok(self.state()?.tokens.get(token).copied())
    }

    async fn revoke_token(&self, token: &str) -> Result<bool, StorageError> {
        Ok(self.state()?.tokens.remove(token).is_some())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub lessons: Arc<dyn LessonRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub progress: Arc<dyn ProgressPersistence>,
    pub auth_tokens: Arc<dyn AuthTokenRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            lessons: Arc::new(repo.clone()),
            steps: Arc::new(repo.clone()),
            sessions: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            auth_tokens: Arc::new(repo),
        }
    }
}
