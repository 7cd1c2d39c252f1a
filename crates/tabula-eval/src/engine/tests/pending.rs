use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use super::common::*;
use crate::engine::Engine;
use crate::operator::AsyncOperator;
use crate::token::Token;

fn with_lookup() -> Engine {
    let e = engine();
    e.registry()
        .register_operator(Arc::new(AsyncOperator::external("lookup", vec![DataType::Number], DataType::Number)))
        .unwrap();
    e
}

#[test]
fn test_pending_result_is_posted_and_propagates() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 3);
    e.set_value(cell(&e, t, 1, 1), 7.0).unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 + 1").unwrap();

    let summary = e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(value(&e, t, 1, 2), None);
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();

    let posted = e.post_result(tx, 42.0).unwrap();
    assert_eq!(posted.changed, 2);
    assert_eq!(number(&e, t, 1, 2), Some(42.0));
    assert_eq!(number(&e, t, 1, 3), Some(43.0));
    assert_eq!(e.pending_transaction(cell(&e, t, 1, 2)), None);

    // each transaction resolves once
    assert!(e.post_result(tx, 1.0).is_none());
    assert_eq!(number(&e, t, 1, 2), Some(42.0));
}

#[test]
fn test_cell_keeps_prior_value_while_pending() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1) * 2").unwrap();
    let first = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    e.post_result(first, 10.0).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(20.0));

    e.set_value(cell(&e, t, 1, 1), 2.0).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(20.0));
    let second = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    assert_ne!(first, second);
    e.post_result(second, 11.0).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(22.0));
}

#[test]
fn test_memoized_results_are_reused() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 3.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1) + 1").unwrap();
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    e.post_result(tx, 5.0).unwrap();

    let again = e.recalculate(column(&e, t, 2)).unwrap();
    assert_eq!(again.pending, 0);
    assert_eq!(number(&e, t, 1, 2), Some(6.0));
    assert_eq!(e.pending_count(), 0);
}

#[test]
fn test_newer_evaluation_supersedes_older_transaction() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    let old = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();

    e.recalculate(column(&e, t, 2)).unwrap();
    e.recalculate(column(&e, t, 2)).unwrap();
    let current = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    assert_ne!(old, current);
    assert_eq!(e.pending_count(), 1);

    assert!(e.post_result(old, 99.0).is_none());
    assert_eq!(value(&e, t, 1, 2), None);
    assert!(e.post_result(current, 4.0).is_some());
    assert_eq!(number(&e, t, 1, 2), Some(4.0));
}

#[test]
fn test_replacing_the_derivation_retires_its_transactions() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();

    e.set_derivation(column(&e, t, 2), "col 1 * 5").unwrap();
    assert!(e.post_result(tx, 42.0).is_none());
    assert_eq!(number(&e, t, 1, 2), Some(5.0));
}

#[test]
fn test_withdrawn_transactions_are_ignored() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    assert!(e.withdraw(tx));
    assert!(!e.withdraw(tx));
    assert!(e.post_result(tx, 1.0).is_none());
}

#[test]
fn test_error_results_are_written_as_errors() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();
    e.post_result(tx, Token::Error(ErrorCode::Unspecified)).unwrap();
    assert_eq!(value(&e, t, 1, 2), Some(Value::Error(ErrorCode::Unspecified)));
}

#[test]
fn test_job_backed_operator_completes_on_the_pool() {
    let e = engine();
    e.registry()
        .register_operator(Arc::new(AsyncOperator::new(
            "fetchdouble",
            vec![DataType::Number],
            DataType::Number,
            |args: Vec<Value>| match args.first().and_then(Value::as_number) {
                Some(n) => Token::number(n * 2.0),
                None => Token::Error(ErrorCode::InvalidOperand),
            },
        )))
        .unwrap();
    let t = e.create_table(None, 2, 3);
    fill_column(&e, t, 1, &[3.0, 4.0]);
    e.set_derivation(column(&e, t, 3), "col 2 + 1").unwrap();
    e.set_derivation(column(&e, t, 2), "fetchdouble(col 1)").unwrap();

    assert!(eventually(|| number(&e, t, 2, 3) == Some(9.0)));
    assert!(eventually(|| number(&e, t, 1, 3) == Some(7.0)));
    assert_eq!(number(&e, t, 1, 2), Some(6.0));
    assert!(eventually(|| e.pending_count() == 0));
}

#[test]
fn test_panicking_job_settles_as_an_error() {
    let e = engine();
    e.registry()
        .register_operator(Arc::new(AsyncOperator::new(
            "boom",
            vec![DataType::Number],
            DataType::Number,
            |_: Vec<Value>| -> Token { panic!("remote lookup failed") },
        )))
        .unwrap();
    let t = e.create_table(None, 1, 3);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 + 1").unwrap();
    e.set_derivation(column(&e, t, 2), "boom(col 1)").unwrap();

    assert!(eventually(|| e.pending_count() == 0));
    assert!(eventually(|| value(&e, t, 1, 2) == Some(Value::Error(ErrorCode::Unspecified))));
    assert_eq!(e.pending_transaction(cell(&e, t, 1, 2)), None);
}

#[test]
fn test_shutdown_drops_pending_work() {
    let e = with_lookup();
    let t = e.create_table(None, 1, 2);
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(column(&e, t, 2), "lookup(col 1)").unwrap();
    let tx = e.pending_transaction(cell(&e, t, 1, 2)).unwrap();

    e.shutdown();
    assert_eq!(e.pending_count(), 0);
    assert!(e.post_result(tx, 1.0).is_none());
    // synchronous work carries on
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(2.0));
}
