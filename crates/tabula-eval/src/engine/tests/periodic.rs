use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tabula_common::{DataType, Value};

use super::common::*;
use crate::derivation::DerivationOptions;
use crate::operator::{FunctionOperator, OpCaps};

#[test]
fn test_interval_derivations_tick() {
    let e = engine();
    let counter = Arc::new(AtomicU64::new(0));
    let ticks = Arc::clone(&counter);
    e.registry()
        .register_operator(Arc::new(
            FunctionOperator::new("ticks", vec![DataType::Number], DataType::Number, move |_: &[Value]| {
                Ok(Value::Number(ticks.fetch_add(1, Ordering::SeqCst) as f64 + 1.0))
            })
            .with_caps(OpCaps::VOLATILE),
        ))
        .unwrap();
    let t = e.create_table(None, 1, 2);
    let target = cell(&e, t, 1, 1);
    e.set_derivation(column(&e, t, 2), "col 1 * 10").unwrap();
    e.set_derivation_with(target, "ticks(0)", DerivationOptions::default().every(Duration::from_millis(10)))
        .unwrap();

    assert!(eventually(|| number(&e, t, 1, 1).is_some_and(|n| n >= 3.0)));
    assert!(eventually(|| number(&e, t, 1, 2).is_some_and(|n| n >= 30.0)));

    // clearing stops the ticks
    e.clear_derivation(target).unwrap();
    let stopped = counter.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(60));
    assert!(counter.load(Ordering::SeqCst) <= stopped + 1);
}
