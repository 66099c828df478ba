//! Prepare, connect and hook pairing behavior

use std::sync::Arc;

use db_tracer::{
    CallContext, CommandTag, ConnInfo, ConnectStart, EndPayload, LogLevel, LogPolicy,
    OperationKind, Outcome, PrepareStart, QueryStart, StartPayload, TraceError, TraceHooks,
};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::Context;
use serde_json::json;

use crate::helpers::{attr, DriverError, Harness};

#[test]
fn test_prepare_records_statement_name() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::new(5);

    let mut ctx = h.tracer.prepare_start(
        CallContext::new(),
        &conn,
        PrepareStart::new("stmt_1", "-- name: GetUser :one\nSELECT * FROM users WHERE id = $1"),
    );
    h.tracer
        .prepare_end(&mut ctx, &conn, true, Outcome::done())
        .unwrap();

    let span = h.only_span();
    assert_eq!(span.name, "postgresql.prepare");
    assert_eq!(span.span_kind, SpanKind::Client);
    assert_eq!(attr(&span, "db.prepared_statement.name").as_deref(), Some("stmt_1"));
    assert_eq!(attr(&span, "db.query.name").as_deref(), Some("GetUser"));
    assert_eq!(attr(&span, "pgx.operation.type").as_deref(), Some("prepare"));

    assert_eq!(h.duration_count(["prepare", "GetUser", "one", "success"]), 1);

    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "prepare");
    assert_eq!(records[0].attribute("name"), Some(&json!("stmt_1")));
    assert_eq!(records[0].attribute("already_prepared"), Some(&json!(true)));
}

#[test]
fn test_connect_attributes() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();

    let mut ctx = h.tracer.connect_start(
        CallContext::new(),
        &conn,
        ConnectStart::new("db.internal", 5433, "app").with_user("svc"),
    );
    h.tracer.connect_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let span = h.only_span();
    assert_eq!(span.name, "postgresql.connect");
    assert_eq!(attr(&span, "server.address").as_deref(), Some("db.internal"));
    assert_eq!(attr(&span, "server.port").as_deref(), Some("5433"));
    assert_eq!(attr(&span, "db.name").as_deref(), Some("app"));
    assert_eq!(attr(&span, "db.user").as_deref(), Some("svc"));
    assert_eq!(attr(&span, "db.system").as_deref(), Some("postgresql"));

    assert_eq!(h.duration_count(["connect", "connect", "connect", "success"]), 1);

    let record = &h.records()[0];
    assert_eq!(record.message, "connect");
    assert_eq!(record.attribute("host"), Some(&json!("db.internal")));
    assert_eq!(record.attribute("port"), Some(&json!(5433)));
    assert_eq!(record.attribute("database"), Some(&json!("app")));
}

#[test]
fn test_connect_failure_logged() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();
    let err = DriverError("connection refused");

    let mut ctx = h.tracer.connect_start(
        CallContext::new(),
        &conn,
        ConnectStart::new("localhost", 5432, "app"),
    );
    h.tracer
        .connect_end(&mut ctx, &conn, Outcome::failed(&err))
        .unwrap();

    assert_eq!(h.only_span().status, Status::error("connection refused"));
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, LogLevel::Error);
    assert_eq!(records[0].attribute("error"), Some(&json!("connection refused")));
}

#[test]
fn test_end_without_start_is_unpaired() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();
    let mut ctx = CallContext::new();

    let err = h
        .tracer
        .query_end(&mut ctx, &conn, Outcome::done())
        .unwrap_err();
    assert!(matches!(
        err,
        TraceError::Unpaired {
            kind: OperationKind::Query
        }
    ));
    assert!(h.spans().is_empty());
    assert!(h.records().is_empty());
    assert_eq!(h.duration_count(["query", "unknown", "unknown", "success"]), 0);
}

#[test]
fn test_end_of_other_kind_is_unpaired() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();

    let mut ctx = h
        .tracer
        .query_start(CallContext::new(), &conn, QueryStart::new("SELECT 1"));
    let err = h
        .tracer
        .batch_end(&mut ctx, &conn, Outcome::done())
        .unwrap_err();
    assert!(matches!(
        err,
        TraceError::Unpaired {
            kind: OperationKind::Batch
        }
    ));

    // The query is still in flight and ends normally
    assert!(ctx.is_tracing(OperationKind::Query));
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();
    assert_eq!(h.only_span().name, "postgresql.query");
}

#[test]
fn test_second_end_is_unpaired() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();
    let tag = CommandTag::from("SELECT 1");

    let mut ctx = h
        .tracer
        .query_start(CallContext::new(), &conn, QueryStart::new("SELECT 1"));
    h.tracer
        .query_end(&mut ctx, &conn, Outcome::success(&tag))
        .unwrap();
    assert!(h
        .tracer
        .query_end(&mut ctx, &conn, Outcome::success(&tag))
        .is_err());

    assert_eq!(h.spans().len(), 1);
    assert_eq!(h.duration_count(["query", "unknown", "unknown", "success"]), 1);
}

#[test]
fn test_restart_abandons_stale_span() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();

    let ctx = h.tracer.query_start(
        CallContext::new(),
        &conn,
        QueryStart::new("-- name: First :one\nSELECT 1"),
    );
    let mut ctx = h.tracer.query_start(
        ctx,
        &conn,
        QueryStart::new("-- name: Second :one\nSELECT 2"),
    );
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let spans = h.spans();
    assert_eq!(spans.len(), 2);
    assert_eq!(attr(&spans[0], "db.query.name").as_deref(), Some("First"));
    assert!(matches!(spans[0].status, Status::Error { .. }));
    assert_eq!(attr(&spans[1], "db.query.name").as_deref(), Some("Second"));
    assert_eq!(spans[1].status, Status::Ok);

    // Only the completed operation is measured
    assert_eq!(h.duration_count(["query", "First", "one", "success"]), 0);
    assert_eq!(h.duration_count(["query", "Second", "one", "success"]), 1);
}

#[test]
fn test_dropped_context_ends_span() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();

    let ctx = h
        .tracer
        .query_start(CallContext::new(), &conn, QueryStart::new("SELECT 1"));
    assert!(h.spans().is_empty());
    drop(ctx);

    assert_eq!(h.spans().len(), 1);
    assert!(h.records().is_empty());
    assert_eq!(h.duration_count(["query", "unknown", "unknown", "success"]), 0);
}

#[test]
fn test_span_parented_to_caller_context() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();

    let parent = h.provider.tracer("app").start("handle_request");
    let parent_cx = Context::current_with_span(parent);
    let parent_span_context = parent_cx.span().span_context().clone();

    let mut ctx = h.tracer.query_start(
        CallContext::with_parent(parent_cx.clone()),
        &conn,
        QueryStart::new("SELECT 1"),
    );
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let spans = h.spans();
    let child = spans
        .iter()
        .find(|s| s.name == "postgresql.query")
        .expect("query span exported");
    assert_eq!(child.parent_span_id, parent_span_context.span_id());
    assert_eq!(child.span_context.trace_id(), parent_span_context.trace_id());
}

#[test]
fn test_kinds_on_one_context_are_independent() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();

    let ctx = h.tracer.connect_start(
        CallContext::new(),
        &conn,
        ConnectStart::new("localhost", 5432, "app"),
    );
    let mut ctx = h
        .tracer
        .query_start(ctx, &conn, QueryStart::new("SELECT 1"));
    assert!(ctx.is_tracing(OperationKind::Connect));
    assert!(ctx.is_tracing(OperationKind::Query));

    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();
    assert!(!ctx.is_tracing(OperationKind::Query));
    assert!(ctx.is_tracing(OperationKind::Connect));

    h.tracer.connect_end(&mut ctx, &conn, Outcome::done()).unwrap();
    let names: Vec<_> = h.spans().iter().map(|s| s.name.to_string()).collect();
    assert_eq!(names, vec!["postgresql.query", "postgresql.connect"]);
}

#[test]
fn test_generic_hooks_through_trait_object() {
    let h = Harness::new(LogPolicy::All);
    let hooks: Arc<dyn TraceHooks> = h.tracer.clone();
    let conn = ConnInfo::new(77);
    let tag = CommandTag::from("DELETE 4");

    let mut ctx = hooks.start(
        CallContext::new(),
        &conn,
        StartPayload::from(QueryStart::new("-- name: PurgeSessions :execrows\nDELETE FROM sessions")),
    );
    hooks
        .end(&mut ctx, &conn, EndPayload::Query(Outcome::success(&tag)))
        .unwrap();

    assert_eq!(h.duration_count(["query", "PurgeSessions", "execrows", "success"]), 1);
    let record = &h.records()[0];
    assert_eq!(record.kind, OperationKind::Query);
    assert_eq!(record.attribute("row_count"), Some(&json!(4)));
    assert_eq!(record.attribute("pid"), Some(&json!(77)));
}

#[test]
fn test_caller_values_survive_round_trip() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();

    let mut ctx = CallContext::new();
    ctx.set("request_id", String::from("req-123"));
    let mut ctx = h
        .tracer
        .query_start(ctx, &conn, QueryStart::new("SELECT 1"));
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();

    assert_eq!(ctx.get::<String>("request_id").map(String::as_str), Some("req-123"));
}

#[test]
fn test_operations_nest_under_returned_context() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::new(3);

    let ctx = h.tracer.query_start(
        CallContext::new(),
        &conn,
        QueryStart::new("-- name: ListOrders :many\nSELECT * FROM orders"),
    );
    assert!(ctx.parent().has_active_span());
    let query_span_id = ctx.parent().span().span_context().span_id();

    let mut ctx = h.tracer.connect_start(
        ctx,
        &conn,
        ConnectStart::new("localhost", 5432, "app"),
    );
    h.tracer.connect_end(&mut ctx, &conn, Outcome::done()).unwrap();

    // Back to the query span once the nested operation ends
    assert_eq!(ctx.parent().span().span_context().span_id(), query_span_id);

    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();
    assert!(!ctx.parent().has_active_span());

    let spans = h.spans();
    assert_eq!(spans.len(), 2);
    let connect = &spans[0];
    let query = &spans[1];
    assert_eq!(connect.name, "postgresql.connect");
    assert_eq!(query.span_context.span_id(), query_span_id);
    assert_eq!(connect.parent_span_id, query_span_id);
    assert_eq!(connect.span_context.trace_id(), query.span_context.trace_id());
}

#[test]
fn test_restarted_operation_not_parented_to_stale_span() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();

    let ctx = h
        .tracer
        .query_start(CallContext::new(), &conn, QueryStart::new("SELECT 1"));
    let mut ctx = h
        .tracer
        .query_start(ctx, &conn, QueryStart::new("SELECT 2"));
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let spans = h.spans();
    assert_eq!(spans.len(), 2);
    assert_ne!(spans[1].parent_span_id, spans[0].span_context.span_id());
    assert!(!ctx.parent().has_active_span());
}

#[test]
fn test_connection_identity_on_every_operation() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::new(12).with_host("replica-2").with_database("orders");

    let mut ctx = h.tracer.query_start(
        CallContext::new(),
        &conn,
        QueryStart::new("-- name: CountOrders :one\nSELECT count(*) FROM orders"),
    );
    h.tracer.query_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let span = h.only_span();
    assert_eq!(attr(&span, "server.address").as_deref(), Some("replica-2"));
    assert_eq!(attr(&span, "db.name").as_deref(), Some("orders"));

    let record = &h.records()[0];
    assert_eq!(record.attribute("host"), Some(&json!("replica-2")));
    assert_eq!(record.attribute("database"), Some(&json!("orders")));
    assert_eq!(record.attribute("pid"), Some(&json!(12)));
}
