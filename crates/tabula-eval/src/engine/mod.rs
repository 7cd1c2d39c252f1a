//! Tabula derivation engine
//!
//! Owns the tables, compiles derivations against them, and keeps derived
//! values current. Every mutation runs as one wave under its table's lock:
//! the affected derivations are ordered so each one sees all of its inputs
//! settled, evaluated once, and the resulting value changes are handed to
//! listeners in a single batch after the lock is released.

mod error;
pub mod graph;
mod wave;

#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use graph::{DependencyGraph, EdgeSet};
pub use wave::AssemblyId;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{ColumnId, ElementKind, ElementRef, ErrorCode, RowId, TableId, Value};

use crate::compiler::{CompileError, Compiler, ParseResult, canonical_infix};
use crate::config::EngineConfig;
use crate::coordinator::{PendingCoordinator, ResultSink, TransactionRecord};
use crate::derivation::{Derivation, DerivationOptions, Read};
use crate::evaluator::{Evaluator, StaticContext};
use crate::listener::{ListenerId, Listeners, ValueChange, ValueListener};
use crate::periodic::{PeriodicScheduler, PeriodicTarget};
use crate::registry::Registry;
use crate::table::{Slot, Table};
use crate::token::{PendingJob, Token, TransactionId};
use wave::WavePlanner;

/// Outcome of one recalculation wave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcSummary {
    pub assembly: AssemblyId,
    /// Derivations evaluated, each counted once however many cells it
    /// computed.
    pub evaluated: usize,
    /// Cells whose stored value changed.
    pub changed: usize,
    /// Cells left waiting on an asynchronous result.
    pub pending: usize,
    /// Cells skipped because they depend on themselves.
    pub cyclic: Vec<ElementRef>,
}

struct Wave {
    summary: RecalcSummary,
    touched: EdgeSet,
    changed: FxHashSet<Slot>,
    evaluated: FxHashSet<ElementRef>,
    changes: Vec<ValueChange>,
    deferred: Vec<(TransactionId, PendingJob)>,
}

impl Wave {
    fn new(assembly: AssemblyId) -> Self {
        Self {
            summary: RecalcSummary {
                assembly,
                ..RecalcSummary::default()
            },
            touched: EdgeSet::default(),
            changed: FxHashSet::default(),
            evaluated: FxHashSet::default(),
            changes: Vec::new(),
            deferred: Vec::new(),
        }
    }

    fn touch(&mut self, triggers: impl IntoIterator<Item = ElementRef>) {
        for t in triggers {
            self.touched.insert(t);
        }
    }

    /// Whether the derivation computing `at` reads a value this wave changed.
    fn reads_changed(&self, table: &Table, owner: &ElementRef, at: Slot) -> bool {
        let Some(derivation) = table.derivation(owner) else {
            return false;
        };
        derivation.reads().iter().any(|read| {
            if read.whole {
                self.touched.contains(&read.element)
            } else {
                table.cells_read(read, at).iter().any(|cell| self.changed.contains(cell))
            }
        })
    }
}

/// Appends slots, skipping ones already present.
fn extend_unique(slots: &mut Vec<Slot>, seen: &mut FxHashSet<Slot>, more: impl IntoIterator<Item = Slot>) {
    for slot in more {
        if seen.insert(slot) {
            slots.push(slot);
        }
    }
}

pub(crate) struct EngineInner {
    registry: Registry,
    tables: RwLock<FxHashMap<TableId, Arc<Mutex<Table>>>>,
    next_table: AtomicU32,
    generation: AtomicU64,
    assembly: AtomicU64,
    coordinator: PendingCoordinator,
    listeners: Listeners,
    periodic: PeriodicScheduler,
    config: EngineConfig,
}

impl ResultSink for EngineInner {
    fn deliver(self: Arc<Self>, transaction: TransactionId, result: Token) {
        Engine { inner: self }.post_result(transaction, result);
    }
}

impl PeriodicTarget for EngineInner {
    fn tick(self: Arc<Self>, target: ElementRef, generation: u64) {
        Engine { inner: self }.tick(target, generation);
    }
}

/// Handle to a derivation engine. Clones share the same tables.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let inner = Arc::new(EngineInner {
            registry: Registry::new(),
            tables: RwLock::new(FxHashMap::default()),
            next_table: AtomicU32::new(1),
            generation: AtomicU64::new(1),
            assembly: AtomicU64::new(1),
            coordinator: PendingCoordinator::new(&config.pending_pool)?,
            listeners: Listeners::new(&config.listener_pool)?,
            periodic: PeriodicScheduler::new(),
            config,
        });
        let target: Weak<dyn PeriodicTarget> = Arc::downgrade(&inner) as Weak<dyn PeriodicTarget>;
        inner.periodic.start(target)?;
        tracing::debug!(
            pending_threads = inner.config.pending_pool.num_threads,
            precision = inner.config.default_precision,
            "engine started"
        );
        Ok(Self { inner })
    }

    pub fn with_defaults() -> Result<Self, EngineError> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Operators available to derivations compiled by this engine.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn table(&self, id: TableId) -> Result<Arc<Mutex<Table>>, EngineError> {
        self.inner
            .tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownTable(id))
    }

    fn begin_wave(&self) -> Wave {
        Wave::new(AssemblyId(self.inner.assembly.fetch_add(1, Ordering::Relaxed)))
    }

    /* ───────────────────────── tables ───────────────────────── */

    pub fn create_table(&self, label: Option<&str>, rows: usize, columns: usize) -> TableId {
        let id = TableId(self.inner.next_table.fetch_add(1, Ordering::Relaxed));
        let table = Table::new(id, label, rows, columns, self.inner.config.auto_recalculate);
        self.inner.tables.write().insert(id, Arc::new(Mutex::new(table)));
        tracing::debug!(table = %id, rows, columns, "table created");
        id
    }

    /// Drop a table with its derivations and any work still pending for it.
    pub fn delete_table(&self, id: TableId) -> Result<(), EngineError> {
        let shared = self
            .inner
            .tables
            .write()
            .remove(&id)
            .ok_or(EngineError::UnknownTable(id))?;
        // let an in-flight wave finish first
        let _table = shared.lock();
        let withdrawn = self.inner.coordinator.withdraw_where(|r| r.cell.table() == id);
        self.inner.periodic.cancel_where(|t| t.table() == id);
        tracing::debug!(table = %id, withdrawn, "table deleted");
        Ok(())
    }

    pub fn tables(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.inner.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Read access to a table under its lock.
    pub fn with_table<R>(&self, id: TableId, f: impl FnOnce(&Table) -> R) -> Result<R, EngineError> {
        let shared = self.table(id)?;
        let table = shared.lock();
        Ok(f(&table))
    }

    /// Row at 1-based `index`.
    pub fn row(&self, table: TableId, index: usize) -> Result<Option<ElementRef>, EngineError> {
        self.with_table(table, |t| t.row(index))
    }

    /// Column at 1-based `index`.
    pub fn column(&self, table: TableId, index: usize) -> Result<Option<ElementRef>, EngineError> {
        self.with_table(table, |t| t.column(index))
    }

    /// Cell at 1-based `(row, column)`.
    pub fn cell(&self, table: TableId, row: usize, column: usize) -> Result<Option<ElementRef>, EngineError> {
        self.with_table(table, |t| t.cell(row, column))
    }

    pub fn find(&self, table: TableId, kind: ElementKind, label: &str) -> Result<Option<ElementRef>, EngineError> {
        self.with_table(table, |t| t.find(kind, label))
    }

    /* ───────────────────────── structure ───────────────────────── */

    /// Append a row; derivations covering it compute its cells right away
    /// when the table recalculates automatically.
    pub fn add_row(&self, table: TableId, label: Option<&str>) -> Result<ElementRef, EngineError> {
        let shared = self.table(table)?;
        let mut t = shared.lock();
        let r = t.add_row(label);
        let cells: Vec<(RowId, ColumnId)> = t.columns().iter().map(|c| (r, *c)).collect();
        let wave = self.grow(&mut t, &cells);
        drop(t);
        if let Some(wave) = wave {
            self.finish(wave);
        }
        Ok(ElementRef::Row(table, r))
    }

    pub fn add_column(&self, table: TableId, label: Option<&str>) -> Result<ElementRef, EngineError> {
        let shared = self.table(table)?;
        let mut t = shared.lock();
        let c = t.add_column(label);
        let cells: Vec<(RowId, ColumnId)> = t.rows().iter().map(|r| (*r, c)).collect();
        let wave = self.grow(&mut t, &cells);
        drop(t);
        if let Some(wave) = wave {
            self.finish(wave);
        }
        Ok(ElementRef::Column(table, c))
    }

    /// Recompute after new empty cells appeared.
    fn grow(&self, table: &mut Table, cells: &[(RowId, ColumnId)]) -> Option<Wave> {
        if !table.is_auto_recalculate() || cells.is_empty() {
            return None;
        }
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("grow", table = %table.id(), assembly = %wave.summary.assembly).entered();
        let mut roots = Vec::new();
        let mut seen = FxHashSet::default();
        for (r, c) in cells {
            wave.touch(table.cell_triggers(*r, *c));
            if table.owner_of(*r, *c).is_some() {
                extend_unique(&mut roots, &mut seen, [(*r, *c)]);
            }
        }
        for (r, c) in cells {
            extend_unique(&mut roots, &mut seen, table.dependents_of(*r, *c));
        }
        self.run_wave(table, &mut wave, &roots, true);
        Some(wave)
    }

    /// Group rows, columns, and cells of one table under a subset.
    pub fn add_subset(
        &self,
        table: TableId,
        label: Option<&str>,
        members: &[ElementRef],
    ) -> Result<ElementRef, EngineError> {
        let shared = self.table(table)?;
        let mut t = shared.lock();
        for m in members {
            let allowed = matches!(m, ElementRef::Row(..) | ElementRef::Column(..) | ElementRef::Cell(..));
            if !allowed || !t.contains(m) {
                return Err(EngineError::UnknownElement(*m));
            }
        }
        let s = t.add_subset(label, members.to_vec());
        Ok(ElementRef::Subset(table, s))
    }

    /// Delete a row, column, or subset. Derivations on the deleted element
    /// go with it; derivations reading it re-evaluate to
    /// `InvalidTableOperand`.
    pub fn delete_element(&self, element: ElementRef) -> Result<RecalcSummary, EngineError> {
        let shared = self.table(element.table())?;
        let mut table = shared.lock();
        if !table.contains(&element) {
            return Err(EngineError::UnknownElement(element));
        }
        let mut triggers = EdgeSet::default();
        match element {
            ElementRef::Row(_, r) => {
                for c in table.columns() {
                    for t in table.cell_triggers(r, *c) {
                        triggers.insert(t);
                    }
                }
            }
            ElementRef::Column(_, c) => {
                for r in table.rows() {
                    for t in table.cell_triggers(*r, c) {
                        triggers.insert(t);
                    }
                }
            }
            ElementRef::Subset(..) => {
                triggers.insert(element);
            }
            ElementRef::Table(_) | ElementRef::Cell(..) => return Err(EngineError::NotDeletable(element)),
        }
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("delete", element = %element, assembly = %wave.summary.assembly).entered();

        for doomed in table.doomed_by(&element) {
            self.detach(&mut table, &doomed);
        }
        self.inner.coordinator.withdraw_where(|r| match element {
            ElementRef::Row(_, row) => r.cell.row() == Some(row),
            ElementRef::Column(_, column) => r.cell.column() == Some(column),
            _ => false,
        });
        match element {
            ElementRef::Row(_, r) => table.delete_row(r),
            ElementRef::Column(_, c) => table.delete_column(c),
            ElementRef::Subset(_, s) => table.delete_subset(s),
            _ => false,
        };
        let triggers = triggers.to_vec();
        wave.touch(triggers.iter().copied());
        if table.is_auto_recalculate() {
            let mut roots = Vec::new();
            let mut seen = FxHashSet::default();
            for reader in table.readers_of(&triggers) {
                extend_unique(&mut roots, &mut seen, table.positions(&reader));
            }
            self.run_wave(&mut table, &mut wave, &roots, true);
        }
        drop(table);
        Ok(self.finish(wave))
    }

    /// Relabel an element. Compiled derivations keep their references;
    /// only their rendered infix text picks up the new name.
    pub fn set_label(&self, element: ElementRef, label: Option<&str>) -> Result<(), EngineError> {
        let shared = self.table(element.table())?;
        let mut table = shared.lock();
        if !table.contains(&element) {
            return Err(EngineError::UnknownElement(element));
        }
        table.set_label(element, label.map(str::to_string));
        let texts: Vec<(ElementRef, String)> = table
            .derivations
            .iter()
            .map(|(target, d)| (*target, d.infix().render(&*table)))
            .collect();
        for (target, text) in texts {
            if let Some(d) = table.derivations.get_mut(&target) {
                d.set_infix_text(text);
            }
        }
        Ok(())
    }

    /* ───────────────────────── values ───────────────────────── */

    /// Store a value in a cell. A derivation owned by the cell itself is
    /// cleared first; dependents recalculate when the table is automatic.
    pub fn set_value(&self, cell: ElementRef, value: impl Into<Value>) -> Result<RecalcSummary, EngineError> {
        self.write_input(cell, Some(value.into()))
    }

    pub fn clear_value(&self, cell: ElementRef) -> Result<RecalcSummary, EngineError> {
        self.write_input(cell, None)
    }

    fn write_input(&self, cell: ElementRef, value: Option<Value>) -> Result<RecalcSummary, EngineError> {
        let ElementRef::Cell(id, row, column) = cell else {
            return Err(EngineError::NotACell(cell));
        };
        let shared = self.table(id)?;
        let mut table = shared.lock();
        if !table.contains(&cell) {
            return Err(EngineError::UnknownElement(cell));
        }
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("write", cell = %cell, assembly = %wave.summary.assembly).entered();
        if self.detach(&mut table, &cell).is_some() {
            tracing::debug!(%cell, "derivation cleared by direct write");
        }
        if self.store(&mut table, &mut wave, row, column, value) && table.is_auto_recalculate() {
            let dependents = table.dependents_of(row, column);
            self.run_wave(&mut table, &mut wave, &dependents, true);
        }
        drop(table);
        Ok(self.finish(wave))
    }

    pub fn value(&self, cell: ElementRef) -> Result<Option<Value>, EngineError> {
        if !matches!(cell, ElementRef::Cell(..)) {
            return Err(EngineError::NotACell(cell));
        }
        let shared = self.table(cell.table())?;
        let table = shared.lock();
        if !table.contains(&cell) {
            return Err(EngineError::UnknownElement(cell));
        }
        Ok(table.value(&cell))
    }

    /* ───────────────────────── derivations ───────────────────────── */

    pub fn set_derivation(&self, target: ElementRef, expression: &str) -> Result<RecalcSummary, EngineError> {
        self.set_derivation_with(target, expression, DerivationOptions::default())
    }

    /// Compile `expression` and attach it to `target`, replacing any
    /// previous derivation. A rejected expression leaves the previous
    /// derivation and all values as they were.
    ///
    /// The target is evaluated immediately; its dependents follow when the
    /// table recalculates automatically.
    pub fn set_derivation_with(
        &self,
        target: ElementRef,
        expression: &str,
        options: DerivationOptions,
    ) -> Result<RecalcSummary, EngineError> {
        if !target.is_derivable() {
            return Err(EngineError::NotDerivable(target));
        }
        let shared = self.table(target.table())?;
        let mut table = shared.lock();
        if !table.contains(&target) {
            return Err(EngineError::UnknownElement(target));
        }
        let derivation = {
            let _span = tracing::info_span!("compile", target = %target).entered();
            self.compile_derivation(&table, target, expression, &options)?
        };
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("set_derivation", target = %target, assembly = %wave.summary.assembly).entered();

        self.detach(&mut table, &target);
        let (interval, generation) = (derivation.interval(), derivation.generation());
        table.graph.link(target, derivation.references());
        table.derivations.insert(target, derivation);
        if let Some(every) = interval {
            self.inner.periodic.schedule(target, every, generation);
        }
        let propagate = table.is_auto_recalculate();
        let roots = table.positions(&target);
        self.run_wave(&mut table, &mut wave, &roots, propagate);
        drop(table);
        Ok(self.finish(wave))
    }

    fn compile_derivation(
        &self,
        table: &Table,
        target: ElementRef,
        expression: &str,
        options: &DerivationOptions,
    ) -> Result<Derivation, EngineError> {
        let parsed = Compiler::new(&self.inner.registry, table).compile(expression);
        if let Some(stack) = parsed.stack() {
            if let Some(via) = table.circular_read(&target, &Read::collect(stack)) {
                let position = parsed.reference_position(&via).unwrap_or(0);
                tracing::debug!(%target, %via, "derivation rejected as circular");
                return Err(CompileError::new("circular reference", position).into());
            }
        }
        let postfix = parsed.into_result()?;
        let infix = canonical_infix(&postfix)?;
        let text = infix.render(table);
        let precision = options.precision.unwrap_or(self.inner.config.default_precision);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        Ok(Derivation::new(
            target,
            expression,
            postfix,
            infix,
            text,
            precision,
            options.interval,
            generation,
        ))
    }

    /// Remove the derivation on `target`. Its cells keep their last values
    /// unless a row or column derivation takes them over.
    pub fn clear_derivation(&self, target: ElementRef) -> Result<bool, EngineError> {
        let shared = self.table(target.table())?;
        let mut table = shared.lock();
        let positions = table.positions(&target);
        if self.detach(&mut table, &target).is_none() {
            return Ok(false);
        }
        let inherited: Vec<Slot> = positions
            .into_iter()
            .filter(|(r, c)| table.owner_of(*r, *c).is_some())
            .collect();
        if inherited.is_empty() || !table.is_auto_recalculate() {
            return Ok(true);
        }
        let mut wave = self.begin_wave();
        self.run_wave(&mut table, &mut wave, &inherited, true);
        drop(table);
        self.finish(wave);
        Ok(true)
    }

    pub fn derivation(&self, target: ElementRef) -> Result<Option<Derivation>, EngineError> {
        self.with_table(target.table(), |t| t.derivation(&target).cloned())
    }

    /// Detach a derivation along with its edges, memo, pending work, and
    /// periodic schedule.
    fn detach(&self, table: &mut Table, target: &ElementRef) -> Option<Derivation> {
        let old = table.derivations.remove(target)?;
        table.graph.unlink(target);
        table.forget_memo(target);
        self.inner.coordinator.withdraw_where(|r| r.owner == *target);
        self.inner.periodic.cancel(target);
        Some(old)
    }

    /* ───────────────────────── recalculation ───────────────────────── */

    /// Evaluate `target` and everything downstream of it, whatever the
    /// table's auto-recalculation setting.
    pub fn recalculate(&self, target: ElementRef) -> Result<RecalcSummary, EngineError> {
        if let ElementRef::Table(id) = target {
            return self.recalculate_table(id);
        }
        let shared = self.table(target.table())?;
        let mut table = shared.lock();
        if !table.contains(&target) {
            return Err(EngineError::UnknownElement(target));
        }
        let roots = match target {
            _ if table.derivation(&target).is_some() => table.positions(&target),
            ElementRef::Cell(_, r, c) => table.dependents_of(r, c),
            other => {
                let mut roots = Vec::new();
                let mut seen = FxHashSet::default();
                for reader in table.readers_of(&[other]) {
                    extend_unique(&mut roots, &mut seen, table.positions(&reader));
                }
                roots
            }
        };
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("recalculate", target = %target, assembly = %wave.summary.assembly).entered();
        self.run_wave(&mut table, &mut wave, &roots, true);
        drop(table);
        Ok(self.finish(wave))
    }

    /// Evaluate every derivation of a table once.
    pub fn recalculate_table(&self, id: TableId) -> Result<RecalcSummary, EngineError> {
        let shared = self.table(id)?;
        let mut table = shared.lock();
        let mut targets: Vec<ElementRef> = table.derivations.keys().copied().collect();
        targets.sort();
        let roots: Vec<Slot> = targets.iter().flat_map(|t| table.positions(t)).collect();
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("recalculate_table", table = %id, assembly = %wave.summary.assembly).entered();
        self.run_wave(&mut table, &mut wave, &roots, true);
        drop(table);
        Ok(self.finish(wave))
    }

    pub fn is_auto_recalculate(&self, table: TableId) -> Result<bool, EngineError> {
        self.with_table(table, |t| t.is_auto_recalculate())
    }

    /// Switching automatic recalculation back on brings the table up to date.
    pub fn set_auto_recalculate(&self, table: TableId, on: bool) -> Result<(), EngineError> {
        let was = {
            let shared = self.table(table)?;
            let mut t = shared.lock();
            let was = t.is_auto_recalculate();
            t.set_auto_recalculate(on);
            was
        };
        if on && !was {
            self.recalculate_table(table)?;
        }
        Ok(())
    }

    /// Derivations that read `element`.
    pub fn affects(&self, element: ElementRef) -> Result<Vec<ElementRef>, EngineError> {
        self.with_table(element.table(), |t| {
            t.graph.affects(&element).map(EdgeSet::to_vec).unwrap_or_default()
        })
    }

    /// Elements the derivation on `target` reads.
    pub fn affected_by(&self, target: ElementRef) -> Result<Vec<ElementRef>, EngineError> {
        self.with_table(target.table(), |t| {
            t.graph.affected_by(&target).map(EdgeSet::to_vec).unwrap_or_default()
        })
    }

    fn run_wave(&self, table: &mut Table, wave: &mut Wave, roots: &[Slot], propagate: bool) {
        let plan = WavePlanner::new(table, self.inner.config.max_wave_nodes).plan(roots, propagate);
        let id = table.id();
        for group in &plan.cycles {
            let cells: Vec<ElementRef> = group.iter().map(|(r, c)| ElementRef::Cell(id, *r, *c)).collect();
            tracing::warn!(
                assembly = %wave.summary.assembly,
                cells = cells.len(),
                first = %cells[0],
                "skipping circular cells"
            );
            wave.summary.cyclic.extend(cells);
        }
        let roots: FxHashSet<Slot> = roots.iter().copied().collect();
        for (row, column) in plan.order {
            let Some(owner) = table.owner_of(row, column) else {
                continue;
            };
            if roots.contains(&(row, column)) || wave.reads_changed(table, &owner, (row, column)) {
                self.evaluate_cell(table, wave, owner, row, column);
            }
        }
    }

    fn evaluate_cell(&self, table: &mut Table, wave: &mut Wave, node: ElementRef, row: RowId, column: ColumnId) {
        let Some(d) = table.derivation(&node) else {
            return;
        };
        let (postfix, precision, generation) = (d.shared_postfix(), d.precision(), d.generation());
        let coordinator = &self.inner.coordinator;
        let transaction = coordinator.next_transaction();
        let token = Evaluator::new(&self.inner.registry).evaluate(&postfix, &table.scope(node, row, column, transaction));
        let cell = ElementRef::Cell(table.id(), row, column);
        wave.evaluated.insert(node);
        match token {
            Token::Pending(pending) => {
                let record = TransactionRecord::new(
                    pending.transaction(),
                    node,
                    cell,
                    generation,
                    pending.memo_key().unwrap_or_default(),
                    pending.args().to_vec(),
                );
                coordinator.register(record);
                if let Some(job) = pending.take_job() {
                    wave.deferred.push((pending.transaction(), job));
                }
                wave.summary.pending += 1;
            }
            settled => {
                if let Some(stale) = coordinator.pending_for(&cell) {
                    coordinator.withdraw(stale);
                }
                let value = settled.into_value().map(|v| v.rounded(precision));
                self.store(table, wave, row, column, value);
            }
        }
    }

    /// Write a cell, recording the change; false when the value is unchanged.
    fn store(&self, table: &mut Table, wave: &mut Wave, row: RowId, column: ColumnId, value: Option<Value>) -> bool {
        let old = table.put(row, column, value.clone());
        if old == value {
            return false;
        }
        wave.touch(table.cell_triggers(row, column));
        wave.changed.insert((row, column));
        wave.summary.changed += 1;
        wave.changes.push(ValueChange {
            element: ElementRef::Cell(table.id(), row, column),
            old,
            new: value,
            assembly: wave.summary.assembly,
        });
        true
    }

    /// Start deferred work and notify listeners; the table lock must be released.
    fn finish(&self, wave: Wave) -> RecalcSummary {
        let Wave {
            mut summary,
            evaluated,
            changes,
            deferred,
            ..
        } = wave;
        summary.evaluated = evaluated.len();
        if !deferred.is_empty() {
            let sink: Weak<dyn ResultSink> = Arc::downgrade(&self.inner) as Weak<dyn ResultSink>;
            for (transaction, job) in deferred {
                if let Err(e) = self.inner.coordinator.submit(transaction, job, Weak::clone(&sink)) {
                    tracing::warn!(%transaction, "pending work not started: {e}");
                    self.inner.coordinator.withdraw(transaction);
                }
            }
        }
        self.inner.listeners.dispatch(changes);
        tracing::debug!(
            assembly = %summary.assembly,
            evaluated = summary.evaluated,
            changed = summary.changed,
            pending = summary.pending,
            "wave finished"
        );
        summary
    }

    fn tick(&self, target: ElementRef, generation: u64) {
        let Ok(shared) = self.table(target.table()) else {
            self.inner.periodic.cancel(&target);
            return;
        };
        let mut table = shared.lock();
        if table.derivation(&target).map(Derivation::generation) != Some(generation) {
            return;
        }
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("periodic", target = %target, assembly = %wave.summary.assembly).entered();
        table.forget_memo(&target);
        let propagate = table.is_auto_recalculate();
        let roots = table.positions(&target);
        self.run_wave(&mut table, &mut wave, &roots, propagate);
        drop(table);
        self.finish(wave);
    }

    /* ───────────────────────── ad-hoc ───────────────────────── */

    /// Compile without attaching; references resolve against `table` when given.
    pub fn compile(&self, table: Option<TableId>, formula: &str) -> Result<ParseResult, EngineError> {
        let registry = &self.inner.registry;
        match table {
            Some(id) => self.with_table(id, |t| Compiler::new(registry, t).compile(formula)),
            None => Ok(Compiler::standalone(registry).compile(formula)),
        }
    }

    /// Compile and evaluate once, outside any row or column. Asynchronous
    /// operators come back as an untracked pending token.
    pub fn evaluate(&self, table: Option<TableId>, formula: &str) -> Result<Token, EngineError> {
        let registry = &self.inner.registry;
        let evaluator = Evaluator::new(registry);
        let transaction = self.inner.coordinator.next_transaction();
        match table {
            Some(id) => {
                let shared = self.table(id)?;
                let t = shared.lock();
                let stack = Compiler::new(registry, &*t).compile(formula).into_result()?;
                Ok(evaluator.evaluate(&stack, &t.detached_scope(transaction)))
            }
            None => {
                let stack = Compiler::standalone(registry).compile(formula).into_result()?;
                Ok(evaluator.evaluate(&stack, &StaticContext::with_transaction(transaction)))
            }
        }
    }

    /* ───────────────────────── asynchronous results ───────────────────────── */

    /// Deliver the result of a pending transaction. The waiting cell is
    /// re-evaluated with the result in place and its dependents follow.
    ///
    /// Returns `None` when the transaction is unknown, already delivered,
    /// or belongs to a derivation that has since been replaced.
    pub fn post_result(&self, transaction: TransactionId, result: impl Into<Token>) -> Option<RecalcSummary> {
        let Some(record) = self.inner.coordinator.take(transaction) else {
            tracing::debug!(%transaction, "result for an unknown or retired transaction ignored");
            return None;
        };
        let shared = self.table(record.cell.table()).ok()?;
        let mut table = shared.lock();
        let ElementRef::Cell(_, row, column) = record.cell else {
            return None;
        };
        let current = table.derivation(&record.owner).map(Derivation::generation) == Some(record.generation)
            && table.contains(&record.cell)
            && table.owner_of(row, column) == Some(record.owner);
        if !current {
            tracing::debug!(%transaction, cell = %record.cell, "stale result dropped");
            return None;
        }
        let result = match result.into() {
            Token::Pending(_) => Token::Error(ErrorCode::InvalidPendingOperator),
            other => other,
        };
        let mut wave = self.begin_wave();
        let _span = tracing::info_span!("post_result", %transaction, cell = %record.cell, assembly = %wave.summary.assembly).entered();
        table.remember(record.owner, record.cell, record.memo_key, result);
        self.evaluate_cell(&mut table, &mut wave, record.owner, row, column);
        if table.is_auto_recalculate() && wave.changed.contains(&(row, column)) {
            let dependents = table.dependents_of(row, column);
            self.run_wave(&mut table, &mut wave, &dependents, true);
        }
        drop(table);
        Some(self.finish(wave))
    }

    /// Transaction a cell is waiting on, if any.
    pub fn pending_transaction(&self, cell: ElementRef) -> Option<TransactionId> {
        self.inner.coordinator.pending_for(&cell)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.coordinator.pending_count()
    }

    /// Abandon a pending transaction; its result will be ignored.
    pub fn withdraw(&self, transaction: TransactionId) -> bool {
        self.inner.coordinator.withdraw(transaction)
    }

    /* ───────────────────────── listeners and lifecycle ───────────────────────── */

    pub fn add_listener(&self, listener: impl ValueListener + 'static) -> ListenerId {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Stop background work. Pending transactions are dropped, periodic
    /// derivations stop ticking, and listeners receive nothing further;
    /// synchronous operations keep working.
    pub fn shutdown(&self) {
        self.inner.coordinator.shutdown();
        self.inner.listeners.close();
        self.inner.periodic.stop();
        tracing::info!("engine shut down");
    }
}
