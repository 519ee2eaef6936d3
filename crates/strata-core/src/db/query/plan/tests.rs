use super::*;
use crate::{
    adapter::ExecOptions,
    config::{RepoConfig, RestartType},
    db::query::{Expr, JoinKind, Predicate, Query, SelectItem},
    error::{ErrorClass, InternalError},
    model::Source,
    obs::sink::{MetricsSink, with_metrics_sink},
    test_support::{MemoryAdapter, POSTS, USERS},
};
use std::sync::{Barrier, Mutex};
use ulid::Ulid;

fn start(registry: &Registry, config: RepoConfig) -> RepoEntry<MemoryAdapter> {
    let started = registry
        .start(MemoryAdapter::default(), config, RestartType::Permanent)
        .expect("fixture adapter should start");

    registry
        .lookup::<MemoryAdapter>(started.id)
        .expect("started repo should resolve")
}

fn users_named(name: &str) -> Query {
    Query::from_schema(&USERS).filter(Predicate::eq(Expr::field(0, "name"), Expr::value(name)))
}

fn prepare(
    registry: &Registry,
    operation: Operation,
    queryable: impl Queryable,
) -> Result<PreparedQuery<MemoryAdapter>, QueryError> {
    prepare_query_in(registry, operation, "app", queryable)
}

fn plan_err(operation: Operation, query: Query) -> PlanError {
    match plan_query(operation, &MemoryAdapter::default(), query) {
        Err(QueryError::Plan(err)) => err,
        other => panic!("expected a planning error, got {other:?}"),
    }
}

//
// cache protocol
//

#[test]
fn identical_shapes_share_key_and_skip_prepare() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let first = prepare(&registry, Operation::All, users_named("ann")).expect("first plan");
    let second = prepare(&registry, Operation::All, users_named("bob")).expect("second plan");

    assert_eq!(first.key, second.key, "literal values must not enter the key");
    assert_ne!(first.params, second.params);
    assert_eq!(entry.adapter().prepare_count(), 1);
    assert!(matches!(first.plan, QueryPlan::Cache { .. }));
    assert!(matches!(second.plan, QueryPlan::Cache { .. }));
    assert_eq!(entry.cache().len(), 1);

    let stats = entry.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn no_cache_statements_are_prepared_every_time() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));
    let query = || {
        Query::from_schema(&USERS).filter(Predicate::eq(
            Expr::field(0, "age"),
            Expr::fragment("floor(random() * 10)"),
        ))
    };

    for _ in 0..3 {
        let prepared = prepare(&registry, Operation::All, query()).expect("fragment query plans");
        assert!(matches!(prepared.plan, QueryPlan::NoCache(_)));
    }

    assert_eq!(entry.adapter().prepare_count(), 3);
    assert!(entry.cache().is_empty());
}

#[test]
fn registered_statement_is_reused_after_execute() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let first = prepare(&registry, Operation::All, users_named("ann")).expect("first plan");
    entry
        .adapter()
        .execute(
            entry.meta(),
            &first.metadata,
            first.plan,
            &first.params,
            &ExecOptions::default(),
        )
        .expect("fixture execute succeeds");

    let second = prepare(&registry, Operation::All, users_named("ann")).expect("second plan");
    let QueryPlan::Cached { cached, slot } = second.plan else {
        panic!("executed statement should come back registered");
    };
    assert_eq!(cached.handle, 1);
    assert_eq!(cached.statement.text, "all public.users");
    assert_eq!(slot.key(), &second.key);
    assert_eq!(entry.adapter().prepare_count(), 1);
}

#[test]
fn rejected_cached_statement_is_evicted_and_prepared_again() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let first = prepare(&registry, Operation::All, users_named("ann")).expect("first plan");
    if let QueryPlan::Cache { slot, prepared } = &first.plan {
        slot.store(crate::test_support::RegisteredStatement {
            handle: 9,
            statement: (**prepared).clone(),
        });
    }
    entry.adapter().reject_cached();

    let second = prepare(&registry, Operation::All, users_named("ann")).expect("re-plan");

    assert!(matches!(second.plan, QueryPlan::Cache { .. }));
    assert_eq!(entry.adapter().prepare_count(), 2);
    assert_eq!(entry.cache().len(), 1);
}

#[test]
fn statement_registered_by_a_racing_planner_is_adopted_when_valid() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let key = prepare(&registry, Operation::All, users_named("ann"))
        .expect("first plan")
        .key;
    entry.cache().evict(&key);
    entry
        .adapter()
        .register_during_next_prepare(entry.cache().clone(), key);

    let second = prepare(&registry, Operation::All, users_named("ann")).expect("second plan");

    let QueryPlan::Cached { cached, .. } = second.plan else {
        panic!("a valid registered statement should be adopted");
    };
    assert_eq!(cached.handle, 1);
}

#[test]
fn rejected_statement_from_a_racing_planner_is_not_adopted() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let key = prepare(&registry, Operation::All, users_named("ann"))
        .expect("first plan")
        .key;
    entry.cache().evict(&key);
    entry
        .adapter()
        .register_during_next_prepare(entry.cache().clone(), key);
    entry.adapter().reject_cached();

    let second = prepare(&registry, Operation::All, users_named("ann")).expect("second plan");

    let QueryPlan::Cache { prepared, .. } = second.plan else {
        panic!("a rejected registered statement must not be handed out");
    };
    assert_eq!(prepared.text, "all public.users");
    let Some(CacheEntry::Prepared(stored)) = entry.cache().get(&key) else {
        panic!("the fresh statement should replace the rejected one");
    };
    assert!(Arc::ptr_eq(&stored, &prepared));
    assert_eq!(entry.adapter().prepare_count(), 2);
}

#[test]
fn concurrent_prepares_leave_one_entry() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));
    let barrier = Barrier::new(2);

    let plans: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    prepare(&registry, Operation::All, users_named("ann"))
                        .expect("concurrent plan succeeds")
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("planner thread panicked"))
            .collect()
    });

    assert_eq!(entry.cache().len(), 1);
    for prepared in &plans {
        let slot = prepared.plan.slot().expect("cacheable plan carries a slot");
        assert_eq!(slot.key(), &plans[0].key);
        assert!(entry.cache().contains(slot.key()));
    }
}

#[test]
fn disabled_cache_never_stores() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app").without_query_cache());

    for _ in 0..2 {
        let prepared = prepare(&registry, Operation::All, users_named("ann")).expect("plan");
        assert!(matches!(prepared.plan, QueryPlan::NoCache(_)));
    }

    assert_eq!(entry.adapter().prepare_count(), 2);
    assert!(entry.cache().is_empty());
}

#[test]
fn planning_emits_metrics_events() {
    #[derive(Default)]
    struct Capture(Mutex<Vec<MetricsEvent>>);

    impl MetricsSink for Capture {
        fn record(&self, event: MetricsEvent) {
            self.0.lock().expect("capture lock").push(event);
        }
    }

    let registry = Registry::new();
    start(&registry, RepoConfig::named("app"));
    let capture = Arc::new(Capture::default());

    with_metrics_sink(capture.clone(), || {
        prepare(&registry, Operation::All, users_named("ann")).expect("first plan");
        prepare(&registry, Operation::All, users_named("ann")).expect("second plan");
    });

    assert_eq!(
        *capture.0.lock().expect("capture lock"),
        vec![
            MetricsEvent::Plan {
                operation: Operation::All
            },
            MetricsEvent::CacheMiss,
            MetricsEvent::Prepare {
                operation: Operation::All,
                cacheable: true
            },
            MetricsEvent::CacheInsert,
            MetricsEvent::Plan {
                operation: Operation::All
            },
            MetricsEvent::CacheHit,
        ]
    );
}

#[test]
fn planning_failure_touches_no_cache() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));

    let err = prepare(
        &registry,
        Operation::All,
        Query::from_schema(&USERS).filter(Predicate::eq(Expr::field(0, "email"), Expr::value("x"))),
    )
    .expect_err("unknown field must fail");

    assert!(matches!(err, QueryError::Plan(PlanError::UnknownField { .. })));
    assert_eq!(InternalError::from(err).class, ErrorClass::Planning);
    assert_eq!(entry.adapter().prepare_count(), 0);
    assert!(entry.cache().is_empty());
}

#[test]
fn unknown_repo_fails_with_registry_error() {
    let registry = Registry::new();
    let err = prepare(&registry, Operation::All, users_named("ann"))
        .expect_err("repo was never started");

    assert!(matches!(err, QueryError::Registry(RegistryError::NotStarted(_))));
}

//
// select and metadata
//

#[test]
fn all_without_select_selects_whole_source_in_declared_order() {
    let registry = Registry::new();
    start(&registry, RepoConfig::named("app"));

    let prepared = prepare(&registry, Operation::All, &USERS).expect("schema query plans");
    let metadata = prepared.metadata;

    assert_eq!(
        metadata.sources,
        vec![SourceMeta {
            source: Source::new("users").with_prefix("public"),
            schema: Some("accounts::User"),
        }]
    );
    let select = metadata.select.expect("select injected");
    let names: Vec<_> = select.names().collect();
    assert_eq!(
        names,
        vec![
            Some("id"),
            Some("name"),
            Some("age"),
            Some("active"),
            Some("role")
        ]
    );
}

#[test]
fn config_prefix_applies_to_sources_without_one() {
    let registry = Registry::new();
    let mut config = RepoConfig::named("app");
    config.prefix = Some("tenant_a".to_string());
    start(&registry, config);

    let query = Query::from_schema(&POSTS).join(
        JoinKind::Inner,
        &USERS,
        Predicate::eq(Expr::field(0, "user_id"), Expr::field(1, "id")),
    );
    let prepared = prepare(&registry, Operation::All, query).expect("join plans");
    let sources: Vec<_> = prepared
        .metadata
        .sources
        .iter()
        .map(|meta| meta.source.to_string())
        .collect();

    assert_eq!(sources, vec!["tenant_a.posts", "public.users"]);
    assert_eq!(prepared.metadata.prefix.as_deref(), Some("tenant_a"));
}

#[test]
fn name_lookup_prefers_first_declared_source() {
    let on = Predicate::eq(Expr::field(0, "user_id"), Expr::field(1, "id"));
    let query = Query::from_schema(&POSTS)
        .join(JoinKind::Left, &USERS, on)
        .select(vec![SelectItem::Source(1), SelectItem::Source(0)]);

    let (planned, _) =
        plan_query(Operation::All, &MemoryAdapter::default(), query).expect("join plans");
    let select = planned.select.expect("explicit select");

    assert_eq!(select.len(), USERS.fields.len() + POSTS.fields.len());
    let name = select.field("name").expect("both sources expose name");
    assert_eq!(name.binding, Some(0));
    assert_eq!(select.position("name"), Some(USERS.fields.len() + 2));
    assert_eq!(select.position("role"), Some(4));
}

//
// plan_query
//

#[test]
fn plan_query_is_deterministic_and_cache_free() {
    let registry = Registry::new();
    let entry = start(&registry, RepoConfig::named("app"));
    let id = Ulid::new();
    let query = Query::from_schema(&USERS)
        .filter(Predicate::eq(Expr::field(0, "id"), Expr::value(id)))
        .filter(Predicate::eq(Expr::field(0, "active"), Expr::value(true)));

    let first = plan_query(Operation::All, entry.adapter(), query.clone()).expect("plans");
    let second = plan_query(Operation::All, entry.adapter(), query).expect("plans");

    assert_eq!(first, second);
    assert!(first.0.select.is_none(), "plan_query injects no select");
    assert_eq!(entry.adapter().prepare_count(), 0);
    assert!(entry.cache().is_empty());

    // Params are dumped through the adapter's dumpers.
    assert_eq!(
        first.1.into_vec(),
        vec![Value::Blob(id.to_bytes().to_vec()), Value::Int(1)]
    );
}

#[test]
fn literals_become_positional_params_in_statement_order() {
    let query = Query::from_schema(&USERS)
        .filter(Predicate::gt(Expr::field(0, "age"), Expr::value(30)))
        .filter(Predicate::like(Expr::field(0, "role"), Expr::value("adm%")))
        .limit(10)
        .offset(20);

    let (planned, params) =
        plan_query(Operation::All, &MemoryAdapter::default(), query).expect("plans");

    assert_eq!(
        planned.predicate,
        Some(Predicate::And(vec![
            Predicate::gt(Expr::field(0, "age"), Expr::Param(0)),
            Predicate::like(Expr::field(0, "role"), Expr::Param(1)),
        ]))
    );
    assert_eq!(planned.limit, Some(Expr::Param(2)));
    assert_eq!(planned.offset, Some(Expr::Param(3)));
    assert_eq!(
        params.into_vec(),
        vec![
            Value::Int(30),
            Value::from("adm%"),
            Value::Int(10),
            Value::Int(20)
        ]
    );
}

#[test]
fn nested_conjunctions_are_flattened() {
    let age = || Predicate::gt(Expr::field(0, "age"), Expr::value(1));
    let query = Query::from_schema(&USERS)
        .filter(Predicate::And(vec![age(), Predicate::And(vec![age()])]))
        .filter(age());

    let (planned, _) =
        plan_query(Operation::DeleteAll, &MemoryAdapter::default(), query).expect("plans");

    let Some(Predicate::And(conjuncts)) = planned.predicate else {
        panic!("three filters fold into one conjunction");
    };
    assert_eq!(conjuncts.len(), 3);
    assert!(conjuncts.iter().all(|p| !matches!(p, Predicate::And(_))));
}

#[test]
fn operation_is_part_of_the_key() {
    let registry = Registry::new();
    start(&registry, RepoConfig::named("app"));

    let delete = prepare(&registry, Operation::DeleteAll, users_named("ann")).expect("plans");
    let update = prepare(
        &registry,
        Operation::UpdateAll,
        users_named("ann").set("age", Expr::value(3)),
    )
    .expect("plans");
    let other_field = prepare(
        &registry,
        Operation::DeleteAll,
        Query::from_schema(&USERS)
            .filter(Predicate::eq(Expr::field(0, "role"), Expr::value("admin"))),
    )
    .expect("plans");

    assert_ne!(delete.key, update.key);
    assert_ne!(delete.key, other_field.key);
}

//
// planning errors
//

#[test]
fn unknown_binding_is_rejected() {
    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS).filter(Predicate::eq(Expr::field(3, "id"), Expr::value(1))),
    );

    assert!(matches!(
        err,
        PlanError::UnknownBinding {
            binding: 3,
            sources: 1
        }
    ));
}

#[test]
fn mistyped_literal_is_rejected() {
    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS).filter(Predicate::eq(Expr::field(0, "age"), Expr::value("old"))),
    );
    assert!(matches!(err, PlanError::InvalidValue { field, .. } if field == "age"));

    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS)
            .filter(Predicate::eq(Expr::field(0, "role"), Expr::value("owner"))),
    );
    assert!(matches!(err, PlanError::InvalidValue { field, .. } if field == "role"));
}

#[test]
fn like_requires_text() {
    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS)
            .filter(Predicate::like(Expr::field(0, "age"), Expr::value("1%"))),
    );

    assert!(matches!(err, PlanError::LikeOnNonText { .. }));
}

#[test]
fn invalid_limit_and_offset_are_rejected() {
    let err = plan_err(Operation::All, Query::from_schema(&USERS).limit(-1));
    assert!(matches!(err, PlanError::InvalidLimit { clause: "limit", .. }));

    let err = plan_err(Operation::All, Query::from_schema(&USERS).offset("ten"));
    assert!(matches!(err, PlanError::InvalidLimit { clause: "offset", .. }));
}

#[test]
fn operations_reject_foreign_clauses() {
    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS).set("age", Expr::value(1)),
    );
    assert!(matches!(err, PlanError::UnsupportedClause { clause: "set", .. }));

    let err = plan_err(Operation::UpdateAll, Query::from_schema(&USERS));
    assert!(matches!(err, PlanError::MissingUpdates));

    let err = plan_err(
        Operation::UpdateAll,
        Query::from_schema(&USERS)
            .set("age", Expr::value(1))
            .distinct(),
    );
    assert!(matches!(
        err,
        PlanError::UnsupportedClause {
            operation: Operation::UpdateAll,
            clause: "distinct"
        }
    ));

    let err = plan_err(Operation::DeleteAll, Query::from_schema(&USERS).limit(5));
    assert!(matches!(
        err,
        PlanError::UnsupportedClause {
            operation: Operation::DeleteAll,
            clause: "limit"
        }
    ));
}

#[test]
fn duplicate_assignment_is_rejected() {
    let err = plan_err(
        Operation::UpdateAll,
        Query::from_schema(&USERS)
            .set("age", Expr::value(1))
            .set("age", Expr::value(2)),
    );

    assert!(matches!(err, PlanError::DuplicateUpdate { field } if field == "age"));
}

#[test]
fn caller_placeholders_are_rejected() {
    let err = plan_err(
        Operation::All,
        Query::from_schema(&USERS).filter(Predicate::eq(Expr::field(0, "age"), Expr::Param(0))),
    );

    assert!(matches!(err, PlanError::UnexpectedParam { index: 0 }));
}

#[test]
fn schemaless_sources_bind_untyped() {
    let query = Query::from_source(Source::new("events"))
        .filter(Predicate::eq(Expr::field(0, "kind"), Expr::value("login")))
        .select_fields(0, &["kind", "at"]);

    let (planned, params) =
        plan_query(Operation::All, &MemoryAdapter::default(), query).expect("schemaless plans");

    assert_eq!(params.len(), 1);
    let select = planned.select.expect("explicit select kept");
    assert!(select.fields.iter().all(|field| field.kind.is_none()));
}

#[test]
fn missing_dumper_surfaces_as_adapter_error() {
    let result = plan_query(
        Operation::All,
        &crate::test_support::OtherAdapter,
        users_named("ann"),
    );

    assert!(matches!(
        result,
        Err(QueryError::Adapter(AdapterError::MissingDumper { .. }))
    ));
}
