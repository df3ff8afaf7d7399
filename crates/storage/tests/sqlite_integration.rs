use amigo_core::model::{
    DependencyDraft, LessonDraft, LessonStatus, ModuleDraft, SessionDraft, StepDraft, UserId,
};
use amigo_core::template::{BuiltinTemplate, Template};
use amigo_core::time::fixed_now;
use chrono::Duration;
use storage::repository::{
    AuthTokenRepository, LessonRepository, ProgressPersistence, SessionRepository, Storage,
    StepRepository, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn lesson_draft(owner: u64, title: &str) -> LessonDraft {
    LessonDraft::new(UserId::new(owner), title, None, fixed_now()).unwrap()
}

#[tokio::test]
async fn create_lesson_persists_seed_step_and_module() {
    let repo = connect("memdb_seed").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Hooks"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();

    assert_eq!(lesson.status(), LessonStatus::Draft);
    assert_eq!(lesson.steps().len(), 1);
    assert_eq!(lesson.steps()[0].name, "Step 1");

    let step = repo.get_step(lesson.steps()[0].id).await.unwrap().unwrap();
    assert_eq!(step.lesson_id, lesson.id());
    assert_eq!(step.code_modules.len(), 1);
    assert_eq!(step.code_modules[0].name, "app.tsx");
    assert!(!step.code_modules[0].is_entry);
    assert!(step.checkpoints.is_empty());
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
}

#[tokio::test]
async fn steps_and_checkpoints_come_back_in_creation_order() {
    let repo = connect("memdb_order").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Order"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();

    // Same timestamp as the seed step: ties fall back to id.
    let twin = StepDraft::from_template("Twin", Template::default(), fixed_now()).unwrap();
    let twin = repo.insert_step(lesson.id(), &twin).await.unwrap();
    let early = StepDraft::from_template(
        "Early",
        Template::default(),
        fixed_now() - Duration::minutes(5),
    )
    .unwrap();
    let early = repo.insert_step(lesson.id(), &early).await.unwrap();

    let lesson = repo.get_lesson(lesson.id()).await.unwrap().unwrap();
    let names: Vec<_> = lesson.steps().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Early", "Step 1", "Twin"]);
    assert_eq!(lesson.steps()[0].id, early.id);
    assert_eq!(lesson.steps()[2].id, twin.id);

    let later = repo
        .insert_checkpoint(twin.id, Some("b.spec.tsx".into()), fixed_now() + Duration::seconds(1))
        .await
        .unwrap();
    let first = repo
        .insert_checkpoint(twin.id, Some("a.spec.tsx".into()), fixed_now())
        .await
        .unwrap();
    let step = repo.get_step(twin.id).await.unwrap().unwrap();
    let ids: Vec<_> = step.checkpoints.iter().map(|c| c.id).collect();
    assert_eq!(ids, [first.id, later.id]);
}

#[tokio::test]
async fn template_step_keeps_entry_and_dependencies() {
    let repo = connect("memdb_template").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "React"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let draft =
        StepDraft::from_template("React", BuiltinTemplate::React.template(), fixed_now()).unwrap();
    let step = repo.insert_step(lesson.id(), &draft).await.unwrap();

    assert!(step.code_modules.iter().all(|m| !m.is_test()));
    assert_eq!(step.entry_module().map(|m| m.name.as_str()), Some("index.tsx"));
    assert!(step.dependencies.iter().any(|d| d.package == "react"));
}

#[tokio::test]
async fn module_constraints_map_to_conflict() {
    let repo = connect("memdb_modules").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Modules"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let step_id = lesson.steps()[0].id;

    let duplicate = repo
        .insert_module(step_id, &ModuleDraft::new("app.tsx", "", false).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(duplicate, StorageError::Conflict));

    let index = repo
        .insert_module(step_id, &ModuleDraft::new("index.tsx", "", true).unwrap())
        .await
        .unwrap();
    let second_entry = repo
        .insert_module(step_id, &ModuleDraft::new("main.tsx", "", true).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(second_entry, StorageError::Conflict));

    let app = repo.get_step(step_id).await.unwrap().unwrap();
    let app_id = app.module_named("app.tsx").unwrap().id;
    repo.set_entry_module(step_id, app_id).await.unwrap();
    let step = repo.get_step(step_id).await.unwrap().unwrap();
    assert_eq!(step.entry_module().map(|m| m.id), Some(app_id));
    assert!(!step.module(index.id).unwrap().is_entry);

    let missing = repo
        .insert_module(
            amigo_core::model::StepId::new(9_999),
            &ModuleDraft::new("x.ts", "", false).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, StorageError::NotFound));
}

#[tokio::test]
async fn deleting_the_active_step_moves_sessions_along() {
    let repo = connect("memdb_cascade").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Cascade"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let first = lesson.steps()[0].id;
    let later = StepDraft::from_template("Two", Template::default(), fixed_now() + Duration::minutes(1))
        .unwrap();
    let second = repo.insert_step(lesson.id(), &later).await.unwrap().id;
    repo.insert_checkpoint(first, None, fixed_now()).await.unwrap();
    repo.insert_dependency(first, &DependencyDraft::new("react", "18.2.0").unwrap())
        .await
        .unwrap();
    let lesson = repo.get_lesson(lesson.id()).await.unwrap().unwrap();
    let session = repo
        .insert_session(&SessionDraft::for_lesson(UserId::new(2), &lesson, fixed_now()).unwrap())
        .await
        .unwrap();
    assert_eq!(session.current_step(), Some(first));

    assert!(repo.delete_step(first).await.unwrap());
    assert!(!repo.delete_step(first).await.unwrap());
    assert!(repo.get_step(first).await.unwrap().is_none());

    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.current_step(), Some(second));
    let tracked: Vec<_> = stored.steps().iter().map(|s| s.step_id).collect();
    assert_eq!(tracked, [second]);

    // With nothing left to move to, the pointer is cleared.
    assert!(repo.delete_step(second).await.unwrap());
    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.current_step(), None);
    assert!(stored.steps().is_empty());

    assert!(repo.delete_lesson(lesson.id()).await.unwrap());
    assert!(repo.get_session(session.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_the_last_step_moves_sessions_back() {
    let repo = connect("memdb_delete_last").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Backwards"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let first = lesson.steps()[0].id;
    let later = StepDraft::from_template("Two", Template::default(), fixed_now() + Duration::minutes(1))
        .unwrap();
    let second = repo.insert_step(lesson.id(), &later).await.unwrap().id;
    let lesson = repo.get_lesson(lesson.id()).await.unwrap().unwrap();
    let mut session = repo
        .insert_session(&SessionDraft::for_lesson(UserId::new(2), &lesson, fixed_now()).unwrap())
        .await
        .unwrap();
    session.move_to(second, lesson.steps()).unwrap();
    repo.update_session(&session).await.unwrap();

    assert!(repo.delete_step(second).await.unwrap());
    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.current_step(), Some(first));
}

#[tokio::test]
async fn narrow_step_writes_keep_other_columns() {
    let repo = connect("memdb_narrow_writes").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Narrow"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let step_id = lesson.steps()[0].id;
    let checkpoint = repo.insert_checkpoint(step_id, None, fixed_now()).await.unwrap();
    let mut stale = repo.get_step(step_id).await.unwrap().unwrap();

    let mut renamed = stale.clone();
    renamed.rename("Renamed").unwrap();
    repo.update_step(&renamed).await.unwrap();

    repo.set_current_checkpoint(step_id, checkpoint.id).await.unwrap();
    stale.complete();
    repo.apply_completion(&stale, None).await.unwrap();

    let stored = repo.get_step(step_id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Renamed");
    assert!(stored.is_completed);
    assert_eq!(stored.current_checkpoint_id, Some(checkpoint.id));

    let other = repo
        .create_lesson(&lesson_draft(1, "Other"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let err = repo
        .set_current_checkpoint(other.steps()[0].id, checkpoint.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn one_session_per_student_and_lesson() {
    let repo = connect("memdb_unique_session").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Once"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let draft = SessionDraft::for_lesson(UserId::new(2), &lesson, fixed_now()).unwrap();
    repo.insert_session(&draft).await.unwrap();

    let err = repo.insert_session(&draft).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    let found = repo
        .find_session(UserId::new(2), lesson.id())
        .await
        .unwrap();
    assert!(found.is_some());
    assert_eq!(repo.list_sessions(UserId::new(2)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn completion_writes_step_and_session_together() {
    let repo = connect("memdb_completion").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Progress"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let next = StepDraft::from_template("Two", Template::default(), fixed_now() + Duration::minutes(1))
        .unwrap();
    let next = repo.insert_step(lesson.id(), &next).await.unwrap();
    let lesson = repo.get_lesson(lesson.id()).await.unwrap().unwrap();
    let mut session = repo
        .insert_session(&SessionDraft::for_lesson(UserId::new(2), &lesson, fixed_now()).unwrap())
        .await
        .unwrap();

    let mut step = repo.get_step(lesson.steps()[0].id).await.unwrap().unwrap();
    step.complete();
    amigo_core::progression::complete_in_session(&mut session, lesson.steps(), step.id).unwrap();
    repo.apply_completion(&step, Some(&session)).await.unwrap();

    let stored = repo.get_step(step.id).await.unwrap().unwrap();
    assert!(stored.is_completed);
    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.current_step(), Some(next.id));
    assert!(stored.is_step_completed(step.id));
    assert_eq!(stored.progress().percent_complete, 50);
}

#[tokio::test]
async fn failed_completion_leaves_step_untouched() {
    let repo = connect("memdb_completion_rollback").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Rollback"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let session = repo
        .insert_session(&SessionDraft::for_lesson(UserId::new(2), &lesson, fixed_now()).unwrap())
        .await
        .unwrap();
    let mut step = repo.get_step(lesson.steps()[0].id).await.unwrap().unwrap();
    step.complete();

    // The session row disappears between read and write.
    assert!(repo.delete_session(session.id()).await.unwrap());
    let err = repo.apply_completion(&step, Some(&session)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let stored = repo.get_step(step.id).await.unwrap().unwrap();
    assert!(!stored.is_completed);
}

#[tokio::test]
async fn checkpoint_completion_moves_pointer() {
    let repo = connect("memdb_checkpoint").await;
    let lesson = repo
        .create_lesson(&lesson_draft(1, "Checkpoints"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let step_id = lesson.steps()[0].id;
    let first = repo.insert_checkpoint(step_id, None, fixed_now()).await.unwrap();
    let second = repo
        .insert_checkpoint(step_id, None, fixed_now() + Duration::seconds(1))
        .await
        .unwrap();

    let mut step = repo.get_step(step_id).await.unwrap().unwrap();
    let mut done = first.clone();
    done.is_completed = true;
    step.set_current_checkpoint(second.id).unwrap();
    repo.apply_checkpoint(&step, &done).await.unwrap();

    let stored = repo.get_step(step_id).await.unwrap().unwrap();
    assert_eq!(stored.current_checkpoint_id, Some(second.id));
    assert!(stored.checkpoint(first.id).unwrap().is_completed);
}

#[tokio::test]
async fn lessons_filter_by_status_and_owner() {
    let repo = connect("memdb_lessons").await;
    let mut published = repo
        .create_lesson(&lesson_draft(1, "Public"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    repo.create_lesson(&lesson_draft(2, "Private"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    published.set_status(LessonStatus::Published);
    published.set_description("Intro to hooks");
    repo.update_lesson(&published).await.unwrap();

    let public = repo
        .list_lessons(Some(LessonStatus::Published))
        .await
        .unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].description(), Some("Intro to hooks"));
    assert_eq!(repo.list_lessons(None).await.unwrap().len(), 2);
    assert_eq!(repo.list_lessons_by_owner(UserId::new(2)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn auth_tokens_resolve_and_revoke() {
    let repo = connect("memdb_tokens").await;
    repo.insert_token("abc", UserId::new(7), fixed_now()).await.unwrap();
    let err = repo
        .insert_token("abc", UserId::new(8), fixed_now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    assert_eq!(repo.user_for_token("abc").await.unwrap(), Some(UserId::new(7)));
    assert!(repo.revoke_token("abc").await.unwrap());
    assert_eq!(repo.user_for_token("abc").await.unwrap(), None);
}

#[tokio::test]
async fn storage_sqlite_wires_every_repository() {
    let storage = Storage::sqlite("sqlite:file:memdb_storage?mode=memory&cache=shared")
        .await
        .expect("storage");
    let lesson = storage
        .lessons
        .create_lesson(&lesson_draft(1, "Wired"), &StepDraft::seed(fixed_now()))
        .await
        .unwrap();
    let step = storage
        .steps
        .get_step(lesson.steps()[0].id)
        .await
        .unwrap();
    assert!(step.is_some());
}
