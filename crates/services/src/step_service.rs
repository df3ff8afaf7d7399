use std::sync::Arc;

use amigo_core::model::{
    Checkpoint, CheckpointId, CodeModule, CodeModuleId, Dependency, DependencyDraft, LessonId,
    ModuleDraft, Step, StepDraft, StepError, StepId,
};
use amigo_core::resolver::{pending_assignment, resolve_modules};
use amigo_core::template::{Template, TemplateCatalog};
use storage::repository::{ProgressPersistence, StepRepository, StorageError};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::auth::RequestContext;
use crate::error::{StepServiceError, found};
use crate::sandbox::SandboxView;

/// Step reads, checkpoint resolution and step authoring.
///
/// Lookups of missing records come back as `Ok(None)` (or `Ok(false)` for
/// deletes); every mutation except `update_step_checkpoint` requires an
/// authenticated caller.
#[derive(Clone)]
pub struct StepService {
    clock: Clock,
    steps: Arc<dyn StepRepository>,
    progress: Arc<dyn ProgressPersistence>,
    templates: Arc<dyn TemplateCatalog>,
}

impl StepService {
    #[must_use]
    pub fn new(
        clock: Clock,
        steps: Arc<dyn StepRepository>,
        progress: Arc<dyn ProgressPersistence>,
        templates: Arc<dyn TemplateCatalog>,
    ) -> Self {
        Self {
            clock,
            steps,
            progress,
            templates,
        }
    }

    /// Plain read with no side effects.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Storage` if repository access fails.
    pub async fn get_step(&self, id: StepId) -> Result<Option<Step>, StepServiceError> {
        Ok(self.steps.get_step(id).await?)
    }

    /// Read a step, writing back its current checkpoint when it has none yet.
    ///
    /// The first incomplete checkpoint is assigned once; later reads see the
    /// stored pointer even after that checkpoint is passed.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Storage` if repository access fails.
    pub async fn resolve_and_persist_checkpoint(
        &self,
        id: StepId,
    ) -> Result<Option<Step>, StepServiceError> {
        let Some(mut step) = self.steps.get_step(id).await? else {
            return Ok(None);
        };
        if let Some(checkpoint_id) = pending_assignment(&step) {
            step.set_current_checkpoint(checkpoint_id)?;
            let stored = self.steps.set_current_checkpoint(id, checkpoint_id).await;
            if found(stored)?.is_none() {
                return Ok(None);
            }
            debug!(step_id = %id, checkpoint_id = %checkpoint_id, "assigned current checkpoint");
        }
        Ok(Some(step))
    }

    /// Files the sandbox should load for a step's current checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Storage` if repository access fails.
    pub async fn sandbox(&self, id: StepId) -> Result<Option<SandboxView>, StepServiceError> {
        let Some(step) = self.resolve_and_persist_checkpoint(id).await? else {
            return Ok(None);
        };
        let resolved = resolve_modules(&step);
        if let Some(test) = &resolved.missing_test {
            warn!(step_id = %id, test = %test, "checkpoint test module is missing");
        }
        Ok(Some(SandboxView::new(&step, resolved)))
    }

    /// Append a step to a lesson.
    ///
    /// Files come from `previous_step` when given (test files excluded),
    /// otherwise from the named template, otherwise from the catalog's
    /// default. Returns `None` when the lesson or the previous step is missing.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Template` for an unknown template name,
    /// `StepServiceError::Step` for a blank name.
    pub async fn create_step(
        &self,
        ctx: &RequestContext,
        name: &str,
        lesson_id: LessonId,
        previous_step: Option<StepId>,
        template: Option<&str>,
    ) -> Result<Option<Step>, StepServiceError> {
        ctx.require_user()?;

        let source = match (previous_step, template) {
            (Some(previous), _) => match self.steps.get_step(previous).await? {
                Some(step) => Template::from_step(&step),
                None => return Ok(None),
            },
            (None, Some(name)) => self.templates.template(name)?,
            (None, None) => self.templates.default_template(),
        };
        let draft = StepDraft::from_template(name, source, self.clock.now())?;

        let step = found(self.steps.insert_step(lesson_id, &draft).await)?;
        if let Some(step) = &step {
            info!(step_id = %step.id, lesson_id = %lesson_id, "step created");
        }
        Ok(step)
    }

    /// Set the step's current checkpoint.
    ///
    /// Anonymous callers get the modified step back but nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Step` if the checkpoint is not the step's.
    pub async fn update_step_checkpoint(
        &self,
        ctx: &RequestContext,
        id: StepId,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<Step>, StepServiceError> {
        let Some(mut step) = self.steps.get_step(id).await? else {
            return Ok(None);
        };
        step.set_current_checkpoint(checkpoint_id)?;
        if ctx.is_authenticated() {
            if found(self.steps.set_current_checkpoint(id, checkpoint_id).await)?.is_none() {
                return Ok(None);
            }
            info!(step_id = %id, checkpoint_id = %checkpoint_id, "checkpoint pointer updated");
        }
        Ok(Some(step))
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn update_step_instructions(
        &self,
        ctx: &RequestContext,
        id: StepId,
        instructions: &str,
    ) -> Result<Option<Step>, StepServiceError> {
        self.edit(ctx, id, |step| {
            instructions.clone_into(&mut step.instructions);
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Step` for a blank name.
    pub async fn update_step_name(
        &self,
        ctx: &RequestContext,
        id: StepId,
        name: &str,
    ) -> Result<Option<Step>, StepServiceError> {
        self.edit(ctx, id, |step| step.rename(name)).await
    }

    /// Hard delete; checkpoints, modules and dependencies go with it.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn delete_step(
        &self,
        ctx: &RequestContext,
        id: StepId,
    ) -> Result<bool, StepServiceError> {
        ctx.require_user()?;
        let deleted = self.steps.delete_step(id).await?;
        if deleted {
            info!(step_id = %id, "step deleted");
        }
        Ok(deleted)
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn create_checkpoint(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        test: Option<&str>,
    ) -> Result<Option<Checkpoint>, StepServiceError> {
        ctx.require_user()?;
        let test = test.map(str::trim).filter(|t| !t.is_empty()).map(str::to_owned);
        let checkpoint = found(
            self.steps
                .insert_checkpoint(step_id, test, self.clock.now())
                .await,
        )?;
        if let Some(checkpoint) = &checkpoint {
            info!(step_id = %step_id, checkpoint_id = %checkpoint.id, "checkpoint created");
        }
        Ok(checkpoint)
    }

    /// Mark a checkpoint passed and move the step on to the next open one.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Step` if the checkpoint is not the step's.
    pub async fn complete_checkpoint(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<Step>, StepServiceError> {
        ctx.require_user()?;
        let Some(mut step) = self.steps.get_step(step_id).await? else {
            return Ok(None);
        };
        let passed = step.complete_checkpoint(checkpoint_id)?;
        self.progress.apply_checkpoint(&step, &passed).await?;
        info!(
            step_id = %step_id,
            checkpoint_id = %checkpoint_id,
            next = ?step.current_checkpoint_id,
            "checkpoint passed"
        );
        Ok(Some(step))
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Module` for a blank name,
    /// `StepServiceError::Step` if the name is already used in the step.
    pub async fn create_code_module(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        name: &str,
        value: Option<&str>,
    ) -> Result<Option<CodeModule>, StepServiceError> {
        ctx.require_user()?;
        let draft = ModuleDraft::new(name, value.unwrap_or_default(), false)?;
        let module = match self.steps.insert_module(step_id, &draft).await {
            Ok(module) => module,
            Err(StorageError::NotFound) => return Ok(None),
            Err(StorageError::Conflict) => {
                return Err(StepError::DuplicateModule(draft.name.clone()).into());
            }
            Err(e) => return Err(e.into()),
        };
        info!(step_id = %step_id, module_id = %module.id, "code module created");
        Ok(Some(module))
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn update_code_module_value(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        module_id: CodeModuleId,
        value: &str,
    ) -> Result<Option<CodeModule>, StepServiceError> {
        self.edit_module(ctx, step_id, module_id, |module| {
            value.clone_into(&mut module.value);
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Module` for a blank name,
    /// `StepServiceError::Step` if the name is already used in the step.
    pub async fn rename_code_module(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        module_id: CodeModuleId,
        name: &str,
    ) -> Result<Option<CodeModule>, StepServiceError> {
        let renamed = ModuleDraft::new(name, "", false)?.name;
        self.edit_module(ctx, step_id, module_id, |module| {
            module.name = renamed;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn delete_code_module(
        &self,
        ctx: &RequestContext,
        id: CodeModuleId,
    ) -> Result<bool, StepServiceError> {
        ctx.require_user()?;
        let deleted = self.steps.delete_module(id).await?;
        if deleted {
            info!(module_id = %id, "code module deleted");
        }
        Ok(deleted)
    }

    /// Make one module the step's entry, clearing the flag on all others.
    ///
    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers.
    pub async fn set_entry_module(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        module_id: CodeModuleId,
    ) -> Result<Option<Step>, StepServiceError> {
        ctx.require_user()?;
        if found(self.steps.set_entry_module(step_id, module_id).await)?.is_none() {
            return Ok(None);
        }
        info!(step_id = %step_id, module_id = %module_id, "entry module set");
        Ok(self.steps.get_step(step_id).await?)
    }

    /// # Errors
    ///
    /// Returns `StepServiceError::Auth` for anonymous callers,
    /// `StepServiceError::Module` for a blank package name.
    pub async fn add_dependency(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        package: &str,
        version: &str,
    ) -> Result<Option<Dependency>, StepServiceError> {
        ctx.require_user()?;
        let draft = DependencyDraft::new(package, version)?;
        let dependency = found(self.steps.insert_dependency(step_id, &draft).await)?;
        if let Some(dependency) = &dependency {
            info!(step_id = %step_id, package = %dependency.package, "dependency added");
        }
        Ok(dependency)
    }

    async fn edit<F>(
        &self,
        ctx: &RequestContext,
        id: StepId,
        apply: F,
    ) -> Result<Option<Step>, StepServiceError>
    where
        F: FnOnce(&mut Step) -> Result<(), StepError>,
    {
        ctx.require_user()?;
        let Some(mut step) = self.steps.get_step(id).await? else {
            return Ok(None);
        };
        apply(&mut step)?;
        self.steps.update_step(&step).await?;
        info!(step_id = %id, "step updated");
        Ok(Some(step))
    }

    async fn edit_module<F>(
        &self,
        ctx: &RequestContext,
        step_id: StepId,
        module_id: CodeModuleId,
        apply: F,
    ) -> Result<Option<CodeModule>, StepServiceError>
    where
        F: FnOnce(&mut CodeModule) -> Result<(), StepError>,
    {
        ctx.require_user()?;
        let Some(step) = self.steps.get_step(step_id).await? else {
            return Ok(None);
        };
        let Some(mut module) = step.module(module_id).cloned() else {
            return Ok(None);
        };
        apply(&mut module)?;
        match self.steps.update_module(&module).await {
            Ok(()) => {}
            Err(StorageError::NotFound) => return Ok(None),
            Err(StorageError::Conflict) => {
                return Err(StepError::DuplicateModule(module.name.clone()).into());
            }
            Err(e) => return Err(e.into()),
        }
        info!(step_id = %step_id, module_id = %module_id, "code module updated");
        Ok(Some(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amigo_core::model::{DEFAULT_INSTRUCTIONS, LessonDraft, UserId};
    use amigo_core::template::BuiltinTemplates;
    use amigo_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, LessonRepository};

    fn author() -> RequestContext {
        RequestContext::authenticated(UserId::new(1))
    }

    fn service(repo: &InMemoryRepository) -> StepService {
        StepService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(BuiltinTemplates),
        )
    }

    async fn seeded(repo: &InMemoryRepository) -> (LessonId, StepId) {
        let draft = LessonDraft::new(UserId::new(1), "Lesson", None, fixed_clock().now()).unwrap();
        let lesson = repo
            .create_lesson(&draft, &StepDraft::seed(fixed_clock().now()))
            .await
            .unwrap();
        (lesson.id(), lesson.steps()[0].id)
    }

    #[tokio::test]
    async fn first_read_assigns_and_persists_checkpoint() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        let first = svc
            .create_checkpoint(&author(), step_id, Some("a.spec.tsx"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            svc.get_step(step_id).await.unwrap().unwrap().current_checkpoint_id,
            None
        );
        let step = svc
            .resolve_and_persist_checkpoint(step_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.current_checkpoint_id, Some(first.id));
        let stored = repo.get_step(step_id).await.unwrap().unwrap();
        assert_eq!(stored.current_checkpoint_id, Some(first.id));

        // A later checkpoint does not move an assigned pointer.
        svc.create_checkpoint(&author(), step_id, None).await.unwrap();
        let again = svc
            .resolve_and_persist_checkpoint(step_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.current_checkpoint_id, Some(first.id));
    }

    #[tokio::test]
    async fn step_without_checkpoints_keeps_pointer_unset() {
        let repo = InMemoryRepository::new();
        let (_, step_id) = seeded(&repo).await;
        let step = service(&repo)
            .resolve_and_persist_checkpoint(step_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.current_checkpoint_id, None);
    }

    #[tokio::test]
    async fn sandbox_scopes_to_current_test_and_reports_missing_one() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        for name in ["index.ts", "a.spec.ts", "b.spec.ts"] {
            svc.create_code_module(&author(), step_id, name, Some("//"))
                .await
                .unwrap();
        }
        svc.create_checkpoint(&author(), step_id, Some("a.spec.ts"))
            .await
            .unwrap();

        let view = svc.sandbox(step_id).await.unwrap().unwrap();
        let files: Vec<_> = view.files.keys().map(String::as_str).collect();
        assert_eq!(files, ["a.spec.ts", "app.tsx", "index.ts"]);

        let missing_step = svc
            .create_step(&author(), "Two", repo_lesson(&repo, step_id).await, None, Some("javascript"))
            .await
            .unwrap()
            .unwrap();
        svc.create_checkpoint(&author(), missing_step.id, Some("gone.spec.js"))
            .await
            .unwrap();
        let view = svc.sandbox(missing_step.id).await.unwrap().unwrap();
        assert_eq!(view.missing_test.as_deref(), Some("gone.spec.js"));
        assert!(view.files.keys().all(|name| !name.contains("spec")));
    }

    async fn repo_lesson(repo: &InMemoryRepository, step_id: StepId) -> LessonId {
        repo.get_step(step_id).await.unwrap().unwrap().lesson_id
    }

    #[tokio::test]
    async fn cloning_a_step_drops_test_files() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, step_id) = seeded(&repo).await;
        svc.delete_code_module(
            &author(),
            repo.get_step(step_id).await.unwrap().unwrap().code_modules[0].id,
        )
        .await
        .unwrap();
        svc.create_code_module(&author(), step_id, "x.spec.ts", None)
            .await
            .unwrap();
        svc.create_code_module(&author(), step_id, "y.ts", Some("export {}"))
            .await
            .unwrap();

        let next = svc
            .create_step(&author(), "Next", lesson_id, Some(step_id), Some("react"))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = next.code_modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["y.ts"]);
        assert_eq!(next.code_modules[0].value, "export {}");
        assert_eq!(next.instructions, DEFAULT_INSTRUCTIONS);
        assert!(!next.is_completed);
    }

    #[tokio::test]
    async fn create_step_handles_missing_sources_and_templates() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (lesson_id, _) = seeded(&repo).await;

        let from_default = svc
            .create_step(&author(), "React", lesson_id, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            from_default.entry_module().map(|m| m.name.as_str()),
            Some("index.tsx")
        );
        assert!(from_default.code_modules.iter().all(|m| !m.is_test()));

        let missing_prev = svc
            .create_step(&author(), "X", lesson_id, Some(StepId::new(999)), None)
            .await
            .unwrap();
        assert!(missing_prev.is_none());
        let missing_lesson = svc
            .create_step(&author(), "X", LessonId::new(999), None, None)
            .await
            .unwrap();
        assert!(missing_lesson.is_none());

        let err = svc
            .create_step(&author(), "X", lesson_id, None, Some("cobol"))
            .await
            .unwrap_err();
        assert!(matches!(err, StepServiceError::Template(_)));
    }

    #[tokio::test]
    async fn anonymous_checkpoint_update_is_returned_not_stored() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        let checkpoint = svc
            .create_checkpoint(&author(), step_id, None)
            .await
            .unwrap()
            .unwrap();

        let step = svc
            .update_step_checkpoint(&RequestContext::anonymous(), step_id, checkpoint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.current_checkpoint_id, Some(checkpoint.id));
        assert_eq!(
            repo.get_step(step_id).await.unwrap().unwrap().current_checkpoint_id,
            None
        );

        svc.update_step_checkpoint(&author(), step_id, checkpoint.id)
            .await
            .unwrap();
        assert_eq!(
            repo.get_step(step_id).await.unwrap().unwrap().current_checkpoint_id,
            Some(checkpoint.id)
        );
    }

    #[tokio::test]
    async fn completing_checkpoints_advances_then_clears_pointer() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        let first = svc
            .create_checkpoint(&author(), step_id, None)
            .await
            .unwrap()
            .unwrap();
        let second = svc
            .create_checkpoint(&author(), step_id, None)
            .await
            .unwrap()
            .unwrap();

        let step = svc
            .complete_checkpoint(&author(), step_id, first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.current_checkpoint_id, Some(second.id));

        svc.complete_checkpoint(&author(), step_id, second.id)
            .await
            .unwrap();
        let stored = repo.get_step(step_id).await.unwrap().unwrap();
        assert_eq!(stored.current_checkpoint_id, None);
        assert!(stored.checkpoints.iter().all(|c| c.is_completed));
    }

    #[tokio::test]
    async fn module_authoring_keeps_names_unique_and_one_entry() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        let index = svc
            .create_code_module(&author(), step_id, "index.tsx", None)
            .await
            .unwrap()
            .unwrap();

        let err = svc
            .create_code_module(&author(), step_id, "index.tsx", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepServiceError::Step(StepError::DuplicateModule(_))));

        let err = svc
            .rename_code_module(&author(), step_id, index.id, "app.tsx")
            .await
            .unwrap_err();
        assert!(matches!(err, StepServiceError::Step(StepError::DuplicateModule(_))));

        let renamed = svc
            .rename_code_module(&author(), step_id, index.id, "main.tsx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "main.tsx");
        let updated = svc
            .update_code_module_value(&author(), step_id, index.id, "render()")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.value, "render()");

        let step = svc
            .set_entry_module(&author(), step_id, index.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.entry_module().map(|m| m.id), Some(index.id));
        assert_eq!(step.code_modules.iter().filter(|m| m.is_entry).count(), 1);

        assert!(svc.delete_code_module(&author(), index.id).await.unwrap());
        assert!(!svc.delete_code_module(&author(), index.id).await.unwrap());
    }

    #[tokio::test]
    async fn step_edits_require_authentication() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let (_, step_id) = seeded(&repo).await;
        let anon = RequestContext::anonymous();

        assert!(
            svc.update_step_name(&anon, step_id, "x")
                .await
                .unwrap_err()
                .is_unauthorized()
        );
        assert!(svc.delete_step(&anon, step_id).await.unwrap_err().is_unauthorized());
        assert!(
            svc.add_dependency(&anon, step_id, "react", "18")
                .await
                .unwrap_err()
                .is_unauthorized()
        );
        assert!(repo.get_step(step_id).await.unwrap().is_some());

        let step = svc
            .update_step_instructions(&author(), step_id, "# Go")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.instructions, "# Go");
        let step = svc
            .update_step_name(&author(), step_id, "  Renamed ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.name, "Renamed");
        let dependency = svc
            .add_dependency(&author(), step_id, "lodash", "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dependency.version, "latest");

        assert!(svc.delete_step(&author(), step_id).await.unwrap());
        assert!(svc.get_step(step_id).await.unwrap().is_none());
        assert!(!svc.delete_step(&author(), step_id).await.unwrap());
    }
}
