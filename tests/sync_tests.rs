//! Integration tests for the assignment synchronization protocol.
//!
//! Every property runs against both the SQLite `Database` and the in-memory
//! `MemoryStore`, driven through the public services.

use serde_json::{Value, json};
use std::sync::Arc;
use taskboard::config::QueryConfig;
use taskboard::db::{Database, DocumentStore, MemoryStore};
use taskboard::error::ErrorCode;
use taskboard::query::{Filter, QueryOptions, QueryOutput};
use taskboard::services::Services;
use taskboard::types::{Task, TaskInput, UNASSIGNED, User, UserInput};

/// One fresh store of each kind.
fn stores() -> Vec<(&'static str, Arc<dyn DocumentStore>)> {
    vec![
        (
            "sqlite",
            Arc::new(Database::open_in_memory().expect("Failed to create in-memory database")),
        ),
        ("memory", Arc::new(MemoryStore::new())),
    ]
}

fn setup(store: Arc<dyn DocumentStore>) -> Services {
    Services::new(store, &QueryConfig::default())
}

fn create_user(services: &Services, name: &str) -> User {
    services
        .users
        .create(UserInput::from_json(&json!({
            "name": name,
            "email": format!("{}@example.com", name),
        })))
        .expect("Failed to create user")
}

fn task_body(name: &str, assignee: &str) -> Value {
    json!({
        "name": name,
        "deadline": "2026-12-01T00:00:00Z",
        "assignedUser": assignee,
    })
}

fn create_task(services: &Services, name: &str, assignee: &str) -> Task {
    services
        .tasks
        .create(TaskInput::from_json(&task_body(name, assignee)))
        .expect("Failed to create task")
}

fn reload_user(services: &Services, id: &str) -> User {
    services.synchronizer().users().find_by_id(id).unwrap().expect("user exists")
}

fn reload_task(services: &Services, id: &str) -> Task {
    services.synchronizer().tasks().find_by_id(id).unwrap().expect("task exists")
}

fn occurrences(user: &User, task_id: &str) -> usize {
    user.pending_tasks.iter().filter(|id| *id == task_id).count()
}

mod task_side_tests {
    use super::*;

    #[test]
    fn assigned_task_is_listed_by_assignee_with_cached_name() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "write docs", &ada.id);

            assert_eq!(task.assigned_user_name, "ada", "{kind}");
            assert_eq!(occurrences(&reload_user(&services, &ada.id), &task.id), 1, "{kind}");
        }
    }

    #[test]
    fn client_supplied_assignee_name_is_ignored() {
        for (kind, store) in stores() {
            let services = setup(store);
            let mut body = task_body("t", "");
            body["assignedUserName"] = json!("Mallory");
            let task = services.tasks.create(TaskInput::from_json(&body)).unwrap();
            assert_eq!(task.assigned_user_name, UNASSIGNED, "{kind}");
        }
    }

    #[test]
    fn replacing_twice_with_same_assignee_lists_task_once() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            for _ in 0..2 {
                services
                    .tasks
                    .replace(&task.id, TaskInput::from_json(&task_body("t", &ada.id)))
                    .unwrap();
            }
            assert_eq!(occurrences(&reload_user(&services, &ada.id), &task.id), 1, "{kind}");
        }
    }

    #[test]
    fn reassignment_moves_task_between_pending_sets() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let bob = create_user(&services, "bob");
            let task = create_task(&services, "t", &ada.id);

            let moved = services
                .tasks
                .replace(&task.id, TaskInput::from_json(&task_body("t", &bob.id)))
                .unwrap();

            assert_eq!(moved.assigned_user_name, "bob", "{kind}");
            assert_eq!(occurrences(&reload_user(&services, &ada.id), &task.id), 0, "{kind}");
            assert_eq!(occurrences(&reload_user(&services, &bob.id), &task.id), 1, "{kind}");
        }
    }

    #[test]
    fn unassigning_removes_from_previous_assignee() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            let cleared = services
                .tasks
                .replace(&task.id, TaskInput::from_json(&task_body("t", "")))
                .unwrap();

            assert_eq!(cleared.assigned_user, "", "{kind}");
            assert_eq!(cleared.assigned_user_name, UNASSIGNED, "{kind}");
            assert!(reload_user(&services, &ada.id).pending_tasks.is_empty(), "{kind}");
        }
    }

    #[test]
    fn replace_keeps_id_and_creation_date() {
        for (kind, store) in stores() {
            let services = setup(store);
            let task = create_task(&services, "before", "");
            let replaced = services
                .tasks
                .replace(&task.id, TaskInput::from_json(&task_body("after", "")))
                .unwrap();

            assert_eq!(replaced.id, task.id, "{kind}");
            assert_eq!(replaced.date_created, task.date_created, "{kind}");
            assert_eq!(reload_task(&services, &task.id).name, "after", "{kind}");
        }
    }

    #[test]
    fn dangling_assignee_rejects_create_without_writing() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ghost = taskboard::types::new_id();

            let err = services
                .tasks
                .create(TaskInput::from_json(&task_body("t", &ghost)))
                .unwrap_err();

            assert_eq!(err.code, ErrorCode::ReferenceNotFound, "{kind}");
            assert_eq!(err.message, "Assigned user not found", "{kind}");
            let count = services
                .tasks
                .list(&QueryOptions {
                    count: true,
                    ..Default::default()
                })
                .unwrap();
            assert!(matches!(count, QueryOutput::Count(0)), "{kind}");
        }
    }

    #[test]
    fn dangling_assignee_leaves_replaced_task_unmodified() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            let err = services
                .tasks
                .replace(&task.id, TaskInput::from_json(&task_body("renamed", "not-a-user")))
                .unwrap_err();

            assert_eq!(err.code, ErrorCode::ReferenceNotFound, "{kind}");
            assert_eq!(reload_task(&services, &task.id), task, "{kind}");
        }
    }

    #[test]
    fn deleting_task_removes_it_from_assignee() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let keep = create_task(&services, "keep", &ada.id);
            let drop = create_task(&services, "drop", &ada.id);

            let deleted = services.tasks.delete(&drop.id).unwrap();
            assert_eq!(deleted.id, drop.id, "{kind}");
            assert_eq!(reload_user(&services, &ada.id).pending_tasks, vec![keep.id.clone()], "{kind}");

            let err = services.tasks.get(&drop.id, None).unwrap_err();
            assert_eq!(err.code, ErrorCode::NotFound, "{kind}");
        }
    }
}

mod user_side_tests {
    use super::*;

    fn user_body(name: &str, pending: &[&str]) -> Value {
        json!({
            "name": name,
            "email": format!("{}@example.com", name),
            "pendingTasks": pending,
        })
    }

    #[test]
    fn deleting_user_unassigns_all_its_tasks() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let t1 = create_task(&services, "t1", &ada.id);
            let t2 = create_task(&services, "t2", &ada.id);

            services.users.delete(&ada.id).unwrap();

            for id in [&t1.id, &t2.id] {
                let task = reload_task(&services, id);
                assert_eq!(task.assigned_user, "", "{kind}");
                assert_eq!(task.assigned_user_name, UNASSIGNED, "{kind}");
            }
            assert!(services.synchronizer().users().find_by_id(&ada.id).unwrap().is_none(), "{kind}");
        }
    }

    #[test]
    fn added_pending_task_is_claimed_from_previous_owner() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let bob = create_user(&services, "bob");
            let task = create_task(&services, "t", &ada.id);

            services
                .users
                .replace(&bob.id, UserInput::from_json(&user_body("bob", &[task.id.as_str()])))
                .unwrap();

            let task = reload_task(&services, &task.id);
            assert_eq!(task.assigned_user, bob.id, "{kind}");
            assert_eq!(task.assigned_user_name, "bob", "{kind}");
            assert!(reload_user(&services, &ada.id).pending_tasks.is_empty(), "{kind}");
        }
    }

    #[test]
    fn removed_pending_task_is_unassigned() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            services
                .users
                .replace(&ada.id, UserInput::from_json(&user_body("ada", &[])))
                .unwrap();

            let task = reload_task(&services, &task.id);
            assert_eq!(task.assigned_user, "", "{kind}");
            assert_eq!(task.assigned_user_name, UNASSIGNED, "{kind}");
        }
    }

    #[test]
    fn user_created_with_pending_tasks_claims_them() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            let bob = services
                .users
                .create(UserInput::from_json(&user_body("bob", &[task.id.as_str(), task.id.as_str()])))
                .unwrap();

            assert_eq!(bob.pending_tasks, vec![task.id.clone()], "{kind}");
            assert_eq!(reload_task(&services, &task.id).assigned_user, bob.id, "{kind}");
            assert!(reload_user(&services, &ada.id).pending_tasks.is_empty(), "{kind}");
        }
    }

    #[test]
    fn unknown_pending_task_rejects_user_create_without_writing() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);
            let ghost = taskboard::types::new_id();

            for bad in [ghost.as_str(), "not-even-an-id"] {
                let err = services
                    .users
                    .create(UserInput::from_json(&user_body("bob", &[task.id.as_str(), bad])))
                    .unwrap_err();

                assert_eq!(err.code, ErrorCode::ReferenceNotFound, "{kind}: {bad}");
                assert_eq!(err.message, "Pending task not found", "{kind}: {bad}");
                assert_eq!(err.field.as_deref(), Some(format!("pendingTasks:{}", bad).as_str()), "{kind}");
            }

            let users = services
                .users
                .list(&QueryOptions {
                    count: true,
                    ..Default::default()
                })
                .unwrap();
            assert!(matches!(users, QueryOutput::Count(1)), "{kind}");
            assert_eq!(reload_task(&services, &task.id).assigned_user, ada.id, "{kind}");
            assert_eq!(reload_user(&services, &ada.id).pending_tasks, vec![task.id.clone()], "{kind}");
        }
    }

    #[test]
    fn unknown_pending_task_leaves_replaced_user_unmodified() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let bob = create_user(&services, "bob");
            let task = create_task(&services, "t", &ada.id);
            let ghost = taskboard::types::new_id();

            let err = services
                .users
                .replace(&bob.id, UserInput::from_json(&user_body("robert", &[task.id.as_str(), ghost.as_str()])))
                .unwrap_err();

            assert_eq!(err.code, ErrorCode::ReferenceNotFound, "{kind}");
            assert_eq!(reload_user(&services, &bob.id), bob, "{kind}");
            assert_eq!(reload_task(&services, &task.id).assigned_user, ada.id, "{kind}");
        }
    }

    #[test]
    fn dangling_id_already_pending_survives_replace() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);
            // Delete behind the synchronizer's back so the id dangles.
            services.synchronizer().tasks().delete_by_id(&task.id).unwrap();

            let ada = services
                .users
                .replace(&ada.id, UserInput::from_json(&user_body("ada", &[task.id.as_str()])))
                .unwrap();

            assert_eq!(ada.pending_tasks, vec![task.id.clone()], "{kind}");
        }
    }

    #[test]
    fn duplicate_email_keeps_first_user() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");

            let err = services
                .users
                .create(UserInput::from_json(&json!({"name": "other", "email": "ada@example.com"})))
                .unwrap_err();

            assert_eq!(err.code, ErrorCode::DuplicateEmail, "{kind}");
            assert_eq!(err.message, "Email already exists", "{kind}");
            assert_eq!(reload_user(&services, &ada.id), ada, "{kind}");
            let users = services
                .synchronizer()
                .users()
                .find(&Filter::eq("email", "ada@example.com"))
                .unwrap();
            assert_eq!(users.len(), 1, "{kind}");
        }
    }

    #[test]
    fn duplicate_email_on_replace_is_rejected() {
        for (kind, store) in stores() {
            let services = setup(store);
            create_user(&services, "ada");
            let bob = create_user(&services, "bob");

            let err = services
                .users
                .replace(
                    &bob.id,
                    UserInput::from_json(&json!({"name": "bob", "email": "ada@example.com"})),
                )
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::DuplicateEmail, "{kind}");
            assert_eq!(reload_user(&services, &bob.id).email, "bob@example.com", "{kind}");
        }
    }

    #[test]
    fn missing_fields_fail_validation() {
        for (kind, store) in stores() {
            let services = setup(store);
            let err = services.users.create(UserInput::from_json(&json!({"name": "x"}))).unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationError, "{kind}");
            assert_eq!(err.message, "User must have name and email", "{kind}");

            let err = services.tasks.create(TaskInput::from_json(&json!({"name": "x"}))).unwrap_err();
            assert_eq!(err.message, "Task must have name and deadline", "{kind}");
        }
    }

    #[test]
    fn malformed_id_is_distinct_from_not_found() {
        for (kind, store) in stores() {
            let services = setup(store);
            let err = services.users.get("not-an-id", None).unwrap_err();
            assert_eq!(err.code, ErrorCode::MalformedId, "{kind}");

            let err = services.users.get(&taskboard::types::new_id(), None).unwrap_err();
            assert_eq!(err.code, ErrorCode::NotFound, "{kind}");
            assert_eq!(err.message, "User not found", "{kind}");
        }
    }
}

mod invariant_tests {
    use super::*;

    /// Check both directions of the invariant over every stored document.
    fn assert_consistent(services: &Services, kind: &str) {
        let sync = services.synchronizer();
        let report = sync.audit().unwrap();
        assert!(report.is_consistent(), "{kind}: {:?}", report.violations);
    }

    #[test]
    fn mixed_workload_stays_consistent() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let bob = create_user(&services, "bob");
            let t1 = create_task(&services, "t1", &ada.id);
            let t2 = create_task(&services, "t2", &ada.id);
            let t3 = create_task(&services, "t3", "");

            services
                .tasks
                .replace(&t1.id, TaskInput::from_json(&task_body("t1", &bob.id)))
                .unwrap();
            services
                .users
                .replace(
                    &bob.id,
                    UserInput::from_json(&json!({
                        "name": "bob", "email": "bob@example.com",
                        "pendingTasks": [t1.id, t3.id],
                    })),
                )
                .unwrap();
            services.tasks.delete(&t2.id).unwrap();
            assert_consistent(&services, kind);

            services.users.delete(&bob.id).unwrap();
            assert_consistent(&services, kind);
        }
    }

    #[test]
    fn failed_secondary_write_is_reported_and_repairable() {
        let store = Arc::new(MemoryStore::new());
        let services = setup(store.clone());
        let ada = create_user(&services, "ada");

        store.fail_writes_to(taskboard::types::USERS);
        let err = services
            .tasks
            .create(TaskInput::from_json(&task_body("t", &ada.id)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SyncFailed);
        store.heal();

        let sync = services.synchronizer();
        let report = sync.audit().unwrap();
        assert_eq!(report.violations.len(), 1);
        sync.repair(&report).unwrap();
        assert_consistent(&services, "memory");
        assert_eq!(reload_user(&services, &ada.id).pending_tasks.len(), 1);
    }

    #[test]
    fn renamed_user_leaves_stale_cached_name_until_repair() {
        for (kind, store) in stores() {
            let services = setup(store);
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);

            services
                .users
                .replace(
                    &ada.id,
                    UserInput::from_json(&json!({
                        "name": "Ada L.", "email": "ada@example.com",
                        "pendingTasks": [task.id],
                    })),
                )
                .unwrap();

            let sync = services.synchronizer();
            let report = sync.audit().unwrap();
            assert_eq!(report.violations.len(), 1, "{kind}");
            sync.repair(&report).unwrap();
            assert_eq!(reload_task(&services, &task.id).assigned_user_name, "Ada L.", "{kind}");
        }
    }
}

mod persistence_tests {
    use super::*;

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskboard.db");

        let (ada_id, task_id) = {
            let services = setup(Arc::new(Database::open(&path).unwrap()));
            let ada = create_user(&services, "ada");
            let task = create_task(&services, "t", &ada.id);
            (ada.id, task.id)
        };

        let services = setup(Arc::new(Database::open(&path).unwrap()));
        assert_eq!(reload_user(&services, &ada_id).pending_tasks, vec![task_id.clone()]);
        assert_eq!(reload_task(&services, &task_id).assigned_user, ada_id);
    }
}
