use asupersync::runtime::RuntimeBuilder;
use relmap::prelude::*;
use relmap::{QueryErrorKind, ShapeErrorKind};
use relmap_core::testing::RecordingExecutor;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, Default)]
struct AssignRoles {
    user_id: i64,
    role_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
struct UserView {
    role_ids: Vec<i64>,
    role_names: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Address {
    id: Option<i64>,
    city: String,
    created_at: Option<String>,
}

#[derive(Debug, Default)]
struct Customer {
    id: i64,
    addresses: Vec<Address>,
}

fn user_roles() -> ManyToManyConfig<User, AssignRoles, UserView> {
    ManyToManyConfig::<User, AssignRoles, UserView>::new("users", "roles")
        .name_column("role_names")
        .exclude_id(0)
        .main_id(|r| Ok(r.user_id))
        .ref_ids(|r| Ok(r.role_ids.clone()))
        .set_result(|view, links| {
            view.role_ids = links.ids.clone();
            view.role_names = links.names.join(", ");
        })
        .invalidate(["users:*"])
}

fn customer_addresses() -> OneToManyConfig<Customer, Address> {
    OneToManyConfig::<Customer, Address>::new("addresses", "customer_id")
        .parent_id(|c| Ok(c.id))
        .items(|c| &mut c.addresses)
        .insert_columns(["city"])
        .returning([ReturnProp::timestamp("created_at")])
}

fn engine_with_cache(cache: Arc<dyn CacheInvalidator>) -> RelationEngine {
    let registry = RelationRegistry::new();
    registry
        .register_one_to_one(
            "employee.department",
            OneToOneConfig::new("departments", "department_id").name_column("department_name"),
        )
        .unwrap();
    registry
        .register_one_to_many("customer.addresses", customer_addresses())
        .unwrap();
    registry
        .register_many_to_many("user.roles", user_roles())
        .unwrap();
    registry
        .register_ref_search(
            "user.roles",
            RefSearchConfig::for_many_to_many(&user_roles()),
        )
        .unwrap();
    RelationEngine::new(Arc::new(registry), cache)
}

fn engine() -> RelationEngine {
    engine_with_cache(Arc::new(relmap::NoopInvalidator))
}

#[test]
fn many_to_many_replaces_links_in_request_order() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.on_once(
        "DELETE FROM \"user_roles\"",
        vec![
            Row::from_pairs([("role_id", 1_i64)]),
            Row::from_pairs([("role_id", 2_i64)]),
            Row::from_pairs([("role_id", 3_i64)]),
        ],
    );
    exec.on_once(
        "SELECT \"r\".\"name\" AS name",
        vec![
            Row::from_pairs([("name", "Reviewer")]),
            Row::from_pairs([("name", "Author")]),
        ],
    );
    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&invalidated);
    let engine = engine_with_cache(Arc::new(move |patterns: &[String]| {
        sink.lock().unwrap().extend_from_slice(patterns);
    }));

    let request = AssignRoles {
        user_id: 7,
        role_ids: vec![2, 4, 2, 0],
    };
    let mut view = UserView::default();
    let links = rt.block_on(async {
        unwrap_outcome(
            engine
                .upsert_many_to_many(&cx, &exec, "user.roles", &User::default(), &request, &mut view)
                .await,
        )
    });

    assert_eq!(links.ids, vec![2, 4]);
    assert_eq!(links.removed, vec![1, 3]);
    assert_eq!(view.role_ids, vec![2, 4]);
    assert_eq!(view.role_names, "Reviewer, Author");

    let executed = exec.executed();
    assert_eq!(executed.len(), 4);
    assert!(executed[1].0.starts_with("INSERT INTO \"user_roles\""));
    let linked: Vec<&Value> = executed[1].1.iter().skip(1).step_by(3).collect();
    assert_eq!(linked, vec![&Value::BigInt(2), &Value::BigInt(4)]);
    assert!(executed[2].0.contains("string_agg(\"r\".\"name\", $1 ORDER BY ids.ord)"));
    assert_eq!(executed[2].1[1], Value::from(vec![2_i64, 4]));
    assert_eq!(*invalidated.lock().unwrap(), vec!["users:*".to_string()]);
}

#[test]
fn many_to_many_empty_set_clears_names() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.on_once(
        "DELETE FROM",
        vec![Row::from_pairs([("role_id", 5_i64)])],
    );

    let request = AssignRoles {
        user_id: 7,
        role_ids: Vec::new(),
    };
    let mut view = UserView {
        role_ids: vec![5],
        role_names: "Owner".to_string(),
    };
    let links = rt.block_on(async {
        unwrap_outcome(
            engine()
                .upsert_many_to_many(&cx, &exec, "user.roles", &User::default(), &request, &mut view)
                .await,
        )
    });

    assert!(links.ids.is_empty());
    assert_eq!(links.removed, vec![5]);
    assert!(view.role_ids.is_empty());
    assert_eq!(view.role_names, "");

    let executed = exec.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].0.starts_with("DELETE FROM \"user_roles\""));
    assert_eq!(
        executed[1].0,
        "UPDATE \"users\" SET \"role_names\" = $1 WHERE \"id\" = $2"
    );
    assert_eq!(executed[1].1, vec![Value::Text(String::new()), Value::BigInt(7)]);
}

#[test]
fn many_to_many_failure_leaves_output_untouched_and_tags_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.fail_on("INSERT INTO", "foreign key violation");

    let request = AssignRoles {
        user_id: 7,
        role_ids: vec![9],
    };
    let mut view = UserView::default();
    let outcome = rt.block_on(async {
        engine()
            .upsert_many_to_many(&cx, &exec, "user.roles", &User::default(), &request, &mut view)
            .await
    });

    match outcome {
        Outcome::Err(Error::Query(q)) => {
            assert_eq!(q.operation.as_deref(), Some("upsert_many_to_many"));
            assert_eq!(q.relation.as_deref(), Some("user.roles"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(view.role_ids.is_empty());
    assert_eq!(exec.call_count(), 2);
}

#[test]
fn one_to_many_resubmit_updates_in_place() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.on_once(
        "INSERT INTO \"addresses\"",
        vec![Row::from_pairs([
            ("id", Value::BigInt(41)),
            ("created_at", Value::from("2024-05-01T10:00:00Z")),
        ])],
    );
    exec.on_once(
        "UPDATE \"addresses\"",
        vec![Row::from_pairs([
            ("id", Value::BigInt(41)),
            ("created_at", Value::from("2024-05-01T10:00:00Z")),
        ])],
    );
    let engine = engine();
    let mut customer = Customer {
        id: 3,
        addresses: vec![Address {
            id: None,
            city: "Hanoi".to_string(),
            created_at: None,
        }],
    };

    let first = rt.block_on(async {
        unwrap_outcome(
            engine
                .upsert_one_to_many::<Customer, Address, _>(&cx, &exec, "customer.addresses", &mut customer)
                .await,
        )
    });
    assert_eq!(first, UpsertReport { inserted: 1, updated: 0 });
    assert_eq!(customer.addresses[0].id, Some(41));

    let second = rt.block_on(async {
        unwrap_outcome(
            engine
                .upsert_one_to_many::<Customer, Address, _>(&cx, &exec, "customer.addresses", &mut customer)
                .await,
        )
    });
    assert_eq!(second, UpsertReport { inserted: 0, updated: 1 });
    assert_eq!(customer.addresses.len(), 1);
    assert_eq!(customer.addresses[0].id, Some(41));

    let statements = exec.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("INSERT INTO \"addresses\""));
    assert!(statements[1].starts_with("UPDATE \"addresses\""));
    assert!(statements[1].contains("WHERE \"customer_id\" = $2 AND \"id\" = $3"));
}

#[test]
fn unknown_keys_are_not_found() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    let engine = engine();

    let mut customer = Customer::default();
    let outcome = rt.block_on(async {
        engine
            .upsert_one_to_many::<Customer, Address, _>(&cx, &exec, "customer.orders", &mut customer)
            .await
    });
    assert!(matches!(outcome, Outcome::Err(ref e) if e.is_not_found()));
    assert!(
        engine
            .one_to_one_assignments("employee.manager", Some(1), None)
            .unwrap_err()
            .is_not_found()
    );
    assert_eq!(exec.call_count(), 0);
}

#[test]
fn wrong_type_parameters_are_shape_errors() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();

    let mut ids: Vec<i64> = Vec::new();
    let outcome = rt.block_on(async {
        engine()
            .upsert_many_to_many::<User, AssignRoles, Vec<i64>, _>(
                &cx,
                &exec,
                "user.roles",
                &User::default(),
                &AssignRoles::default(),
                &mut ids,
            )
            .await
    });
    match outcome {
        Outcome::Err(Error::Shape(shape)) => assert_eq!(shape.kind, ShapeErrorKind::TypeMismatch),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = RelationRegistry::new();
    registry
        .register_many_to_many("user.roles", user_roles())
        .unwrap();
    let err = registry
        .register_many_to_many("user.roles", user_roles())
        .unwrap_err();
    assert!(err.is_config_error());
    assert_eq!(registry.keys_many_to_many(), vec!["user.roles".to_string()]);
}

#[test]
fn one_to_one_writes_fk_and_name() {
    let assignments = engine()
        .one_to_one_assignments("employee.department", Some(4), Some("Finance"))
        .unwrap();
    assert_eq!(
        assignments,
        vec![
            ("department_id".to_string(), Value::BigInt(4)),
            ("department_name".to_string(), Value::Text("Finance".to_string())),
        ]
    );
}

#[test]
fn ref_search_excludes_linked_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.on_count("COUNT(*)", 2);
    exec.on_once(
        "LIMIT",
        vec![Row::from_pairs([("id", Value::BigInt(4)), ("name", Value::from("Author"))])],
    );

    let request = SearchRequest::new("AUTH", PageRequest::new(5, 0));
    let result = rt.block_on(async {
        unwrap_outcome(
            engine()
                .search_refs::<Row, _>(&cx, &exec, "user.roles", &request, &[RefFilter::exclude_linked(7)])
                .await,
        )
    });
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.total, 2);

    let executed = exec.executed();
    assert!(executed[1].0.contains(
        "NOT EXISTS (SELECT 1 FROM \"user_roles\" WHERE \"user_roles\".\"role_id\" = \"roles\".\"id\" AND \"user_roles\".\"user_id\" = $1)"
    ));
    assert!(executed[1].1.contains(&Value::Text("%auth%".to_string())));
}

#[test]
fn query_errors_carry_operation_context() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let exec = RecordingExecutor::new();
    exec.fail_on("departments", "relation does not exist");

    let outcome = rt.block_on(async {
        engine()
            .resolve_one_to_one_name(&cx, &exec, "employee.department", 4)
            .await
    });
    match outcome {
        Outcome::Err(Error::Query(q)) => {
            assert_eq!(q.kind, QueryErrorKind::Database);
            assert_eq!(q.operation.as_deref(), Some("resolve_one_to_one_name"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
