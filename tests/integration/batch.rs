//! Batch tracing with per-statement callbacks

use db_tracer::{
    BatchQuery, BatchStart, CallContext, CommandTag, ConnInfo, LogLevel, LogPolicy,
    OperationKind, Outcome, TraceError, TraceHooks,
};
use opentelemetry::trace::Status;
use serde_json::json;

use crate::helpers::{attr, DriverError, Harness};

fn batch_queries_total(h: &Harness, labels: [&str; 3]) -> f64 {
    h.tracer
        .metrics()
        .batch_queries_total
        .with_label_values(&labels)
        .get()
}

#[test]
fn test_batch_statements_recorded_on_batch_span() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::new(11);
    let insert = CommandTag::from("INSERT 0 1");
    let err = DriverError("duplicate key value violates unique constraint");

    let mut ctx = h.tracer.batch_start(CallContext::new(), &conn, BatchStart::new(2));
    h.tracer
        .batch_query(
            &mut ctx,
            &conn,
            BatchQuery::new("-- name: CreateUser :exec\nINSERT INTO users VALUES ($1)", Outcome::success(&insert)),
        )
        .unwrap();
    h.tracer
        .batch_query(
            &mut ctx,
            &conn,
            BatchQuery::new("-- name: CreateUser :exec\nINSERT INTO users VALUES ($1)", Outcome::failed(&err)),
        )
        .unwrap();
    h.tracer.batch_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let span = h.only_span();
    assert_eq!(span.name, "postgresql.batch");
    assert_eq!(span.status, Status::Ok);
    assert_eq!(attr(&span, "db.batch.size").as_deref(), Some("2"));

    let events: Vec<_> = span
        .events
        .events
        .iter()
        .filter(|e| e.name == "batch.query")
        .collect();
    assert_eq!(events.len(), 2);
    assert!(events[0]
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "db.query.name" && kv.value.as_str() == "CreateUser"));
    assert!(events[1]
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "exception.message"));

    assert_eq!(batch_queries_total(&h, ["CreateUser", "exec", "success"]), 1.0);
    assert_eq!(batch_queries_total(&h, ["CreateUser", "exec", "error"]), 1.0);
    assert_eq!(h.duration_count(["batch", "batch", "batch", "success"]), 1);

    // Only the failed statement is logged under ErrorsOnly
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "batch query");
    assert_eq!(records[0].level, LogLevel::Error);
    assert_eq!(records[0].attribute("query_name"), Some(&json!("CreateUser")));
    assert_eq!(records[0].attribute("pid"), Some(&json!(11)));
}

#[test]
fn test_batch_logs_with_all_policy() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();
    let tag = CommandTag::from("UPDATE 3");

    let mut ctx = h.tracer.batch_start(CallContext::new(), &conn, BatchStart::new(1));
    h.tracer
        .batch_query(&mut ctx, &conn, BatchQuery::new("UPDATE users SET active = true", Outcome::success(&tag)))
        .unwrap();
    h.tracer.batch_end(&mut ctx, &conn, Outcome::done()).unwrap();

    let records = h.records();
    let messages: Vec<_> = records.iter().map(|r| r.message).collect();
    assert_eq!(messages, vec!["batch query", "batch"]);
    assert_eq!(records[0].attribute("row_count"), Some(&json!(3)));
    assert_eq!(records[0].attribute("query_name"), Some(&json!("unknown")));
    assert_eq!(records[1].attribute("batch_size"), Some(&json!(1)));
}

#[test]
fn test_batch_query_without_batch_start() {
    let h = Harness::new(LogPolicy::All);
    let conn = ConnInfo::default();
    let mut ctx = CallContext::new();

    let err = h
        .tracer
        .batch_query(&mut ctx, &conn, BatchQuery::new("SELECT 1", Outcome::done()))
        .unwrap_err();
    assert!(matches!(
        err,
        TraceError::Unpaired {
            kind: OperationKind::Batch
        }
    ));
    assert!(h.spans().is_empty());
    assert!(h.records().is_empty());
}

#[test]
fn test_batch_failure() {
    let h = Harness::new(LogPolicy::ErrorsOnly);
    let conn = ConnInfo::default();
    let err = DriverError("batch aborted");

    let mut ctx = h.tracer.batch_start(CallContext::new(), &conn, BatchStart::new(5));
    h.tracer
        .batch_end(&mut ctx, &conn, Outcome::failed(&err))
        .unwrap();

    assert_eq!(h.only_span().status, Status::error("batch aborted"));
    assert_eq!(h.duration_count(["batch", "batch", "batch", "error"]), 1);
    assert_eq!(h.records()[0].attribute("batch_size"), Some(&json!(5)));
}
