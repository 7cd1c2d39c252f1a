//! Common test helpers
use std::time::{Duration, Instant};

use tabula_common::{ElementRef, TableId, Value};

use crate::config::{EngineConfig, PoolConfig};
use crate::engine::Engine;

pub fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> Engine {
    let config = EngineConfig {
        pending_pool: PoolConfig::new("test-pending").with_threads(2),
        listener_pool: PoolConfig::new("test-listener").with_threads(1),
        ..config
    };
    Engine::new(config).unwrap()
}

/// 1-based cell lookup that must succeed.
pub fn cell(engine: &Engine, table: TableId, row: usize, column: usize) -> ElementRef {
    engine.cell(table, row, column).unwrap().unwrap()
}

pub fn column(engine: &Engine, table: TableId, index: usize) -> ElementRef {
    engine.column(table, index).unwrap().unwrap()
}

pub fn row(engine: &Engine, table: TableId, index: usize) -> ElementRef {
    engine.row(table, index).unwrap().unwrap()
}

pub fn number(engine: &Engine, table: TableId, r: usize, c: usize) -> Option<f64> {
    engine
        .value(cell(engine, table, r, c))
        .unwrap()
        .and_then(|v| v.as_number())
}

pub fn value(engine: &Engine, table: TableId, r: usize, c: usize) -> Option<Value> {
    engine.value(cell(engine, table, r, c)).unwrap()
}

/// Fill column `c` with `values`, top to bottom.
pub fn fill_column(engine: &Engine, table: TableId, c: usize, values: &[f64]) {
    for (i, v) in values.iter().enumerate() {
        engine.set_value(cell(engine, table, i + 1, c), *v).unwrap();
    }
}

/// Poll until `done` holds; false on timeout.
pub fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}
