//! In-memory tables: element structure, cell values, and the derivations
//! attached to them.
//!
//! A table is only ever touched under its engine lock; everything here is
//! single-threaded. Derivations are owned by their target element, and the
//! table is the anchor every reference in them resolves against.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tabula_common::{ColumnId, ElementKind, ElementRef, ErrorCode, RowId, SubsetId, TableId, Value};
use tabula_parse::column_letters;

use crate::compiler::ReferenceResolver;
use crate::derivation::{Derivation, Read};
use crate::engine::graph::DependencyGraph;
use crate::operator::OperatorContext;
use crate::token::{ReferenceNamer, Token, TransactionId};

/// Elements a single cell write is visible through.
pub(crate) type Triggers = SmallVec<[ElementRef; 8]>;

/// A cell position within one table.
pub(crate) type Slot = (RowId, ColumnId);

/// A named group of rows, columns, and cells.
#[derive(Debug, Clone)]
pub struct Subset {
    id: SubsetId,
    label: Option<String>,
    members: Vec<ElementRef>,
}

impl Subset {
    pub fn id(&self) -> SubsetId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn members(&self) -> &[ElementRef] {
        &self.members
    }

    fn covers(&self, table: TableId, row: RowId, column: ColumnId) -> bool {
        self.members.iter().any(|m| {
            *m == ElementRef::Row(table, row)
                || *m == ElementRef::Column(table, column)
                || *m == ElementRef::Cell(table, row, column)
        })
    }
}

#[derive(Debug)]
pub struct Table {
    id: TableId,
    label: Option<String>,
    rows: Vec<RowId>,
    columns: Vec<ColumnId>,
    labels: FxHashMap<ElementRef, String>,
    cells: FxHashMap<(RowId, ColumnId), Value>,
    subsets: Vec<Subset>,
    next_id: u32,
    auto_recalculate: bool,
    pub(crate) derivations: FxHashMap<ElementRef, Derivation>,
    pub(crate) graph: DependencyGraph,
    /// Delivered async results per (derivation, cell), keyed by invocation.
    memo: FxHashMap<(ElementRef, ElementRef), FxHashMap<String, Token>>,
}

impl Table {
    pub(crate) fn new(id: TableId, label: Option<&str>, rows: usize, columns: usize, auto_recalculate: bool) -> Self {
        let mut table = Self {
            id,
            label: label.map(str::to_string),
            rows: Vec::with_capacity(rows),
            columns: Vec::with_capacity(columns),
            labels: FxHashMap::default(),
            cells: FxHashMap::default(),
            subsets: Vec::new(),
            next_id: 1,
            auto_recalculate,
            derivations: FxHashMap::default(),
            graph: DependencyGraph::new(),
            memo: FxHashMap::default(),
        };
        for _ in 0..rows {
            table.add_row(None);
        }
        for _ in 0..columns {
            table.add_column(None);
        }
        table
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /* ───────────────────────── structure ───────────────────────── */

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn rows(&self) -> &[RowId] {
        &self.rows
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }

    pub fn subsets(&self) -> &[Subset] {
        &self.subsets
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Row at 1-based `index`.
    pub fn row(&self, index: usize) -> Option<ElementRef> {
        let r = *self.rows.get(index.checked_sub(1)?)?;
        Some(ElementRef::Row(self.id, r))
    }

    /// Column at 1-based `index`.
    pub fn column(&self, index: usize) -> Option<ElementRef> {
        let c = *self.columns.get(index.checked_sub(1)?)?;
        Some(ElementRef::Column(self.id, c))
    }

    /// Cell at 1-based `(row, column)`.
    pub fn cell(&self, row: usize, column: usize) -> Option<ElementRef> {
        let r = *self.rows.get(row.checked_sub(1)?)?;
        let c = *self.columns.get(column.checked_sub(1)?)?;
        Some(ElementRef::Cell(self.id, r, c))
    }

    pub fn subset(&self, index: usize) -> Option<ElementRef> {
        let s = self.subsets.get(index.checked_sub(1)?)?;
        Some(ElementRef::Subset(self.id, s.id))
    }

    /// 0-based position of a row.
    pub fn row_index(&self, row: RowId) -> Option<usize> {
        self.rows.iter().position(|r| *r == row)
    }

    /// 0-based position of a column.
    pub fn column_index(&self, column: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    fn subset_index(&self, subset: SubsetId) -> Option<usize> {
        self.subsets.iter().position(|s| s.id == subset)
    }

    pub fn contains(&self, element: &ElementRef) -> bool {
        if element.table() != self.id {
            return false;
        }
        match *element {
            ElementRef::Table(_) => true,
            ElementRef::Row(_, r) => self.row_index(r).is_some(),
            ElementRef::Column(_, c) => self.column_index(c).is_some(),
            ElementRef::Cell(_, r, c) => self.row_index(r).is_some() && self.column_index(c).is_some(),
            ElementRef::Subset(_, s) => self.subset_index(s).is_some(),
        }
    }

    pub fn label_of(&self, element: &ElementRef) -> Option<&str> {
        match element {
            ElementRef::Table(_) => self.label(),
            ElementRef::Subset(_, s) => self
                .subset_index(*s)
                .and_then(|i| self.subsets[i].label()),
            other => self.labels.get(other).map(String::as_str),
        }
    }

    /// Case-insensitive label lookup.
    pub fn find(&self, kind: ElementKind, label: &str) -> Option<ElementRef> {
        let label = label.trim();
        let matches = |l: Option<&str>| l.is_some_and(|l| l.eq_ignore_ascii_case(label));
        match kind {
            ElementKind::Table => matches(self.label()).then_some(ElementRef::Table(self.id)),
            ElementKind::Row => self
                .rows
                .iter()
                .map(|r| ElementRef::Row(self.id, *r))
                .find(|e| matches(self.label_of(e))),
            ElementKind::Column => self
                .columns
                .iter()
                .map(|c| ElementRef::Column(self.id, *c))
                .find(|e| matches(self.label_of(e))),
            ElementKind::Subset => self
                .subsets
                .iter()
                .find(|s| matches(s.label()))
                .map(|s| ElementRef::Subset(self.id, s.id)),
            ElementKind::Cell => None,
        }
    }

    pub(crate) fn set_label(&mut self, element: ElementRef, label: Option<String>) {
        match element {
            ElementRef::Table(_) => self.label = label,
            ElementRef::Subset(_, s) => {
                if let Some(i) = self.subset_index(s) {
                    self.subsets[i].label = label;
                }
            }
            other => match label {
                Some(l) => {
                    self.labels.insert(other, l);
                }
                None => {
                    self.labels.remove(&other);
                }
            },
        }
    }

    pub(crate) fn add_row(&mut self, label: Option<&str>) -> RowId {
        let r = RowId(self.allocate());
        self.rows.push(r);
        if let Some(l) = label {
            self.labels.insert(ElementRef::Row(self.id, r), l.to_string());
        }
        r
    }

    pub(crate) fn add_column(&mut self, label: Option<&str>) -> ColumnId {
        let c = ColumnId(self.allocate());
        self.columns.push(c);
        if let Some(l) = label {
            self.labels.insert(ElementRef::Column(self.id, c), l.to_string());
        }
        c
    }

    pub(crate) fn add_subset(&mut self, label: Option<&str>, members: Vec<ElementRef>) -> SubsetId {
        let s = SubsetId(self.allocate());
        self.subsets.push(Subset {
            id: s,
            label: label.map(str::to_string),
            members,
        });
        s
    }

    /// Remove a row, its cells, and its labels. Derivations must be
    /// detached by the caller first.
    pub(crate) fn delete_row(&mut self, row: RowId) -> bool {
        let Some(index) = self.row_index(row) else {
            return false;
        };
        self.rows.remove(index);
        self.cells.retain(|(r, _), _| *r != row);
        self.labels.retain(|e, _| e.row() != Some(row));
        for s in &mut self.subsets {
            s.members.retain(|m| m.row() != Some(row));
        }
        self.memo.retain(|(_, cell), _| cell.row() != Some(row));
        true
    }

    pub(crate) fn delete_column(&mut self, column: ColumnId) -> bool {
        let Some(index) = self.column_index(column) else {
            return false;
        };
        self.columns.remove(index);
        self.cells.retain(|(_, c), _| *c != column);
        self.labels.retain(|e, _| e.column() != Some(column));
        for s in &mut self.subsets {
            s.members.retain(|m| m.column() != Some(column));
        }
        self.memo.retain(|(_, cell), _| cell.column() != Some(column));
        true
    }

    pub(crate) fn delete_subset(&mut self, subset: SubsetId) -> bool {
        match self.subset_index(subset) {
            Some(i) => {
                self.subsets.remove(i);
                true
            }
            None => false,
        }
    }

    /// Derivable elements that disappear with `element`.
    pub(crate) fn doomed_by(&self, element: &ElementRef) -> Vec<ElementRef> {
        self.derivations
            .keys()
            .filter(|target| match *element {
                ElementRef::Row(_, r) => target.row() == Some(r),
                ElementRef::Column(_, c) => target.column() == Some(c),
                _ => *target == element,
            })
            .copied()
            .collect()
    }

    /* ───────────────────────── values ───────────────────────── */

    pub fn is_auto_recalculate(&self) -> bool {
        self.auto_recalculate
    }

    pub(crate) fn set_auto_recalculate(&mut self, on: bool) {
        self.auto_recalculate = on;
    }

    pub fn get(&self, row: RowId, column: ColumnId) -> Option<&Value> {
        self.cells.get(&(row, column))
    }

    /// Value of a cell element; `None` when empty or not a live cell.
    pub fn value(&self, element: &ElementRef) -> Option<Value> {
        match *element {
            ElementRef::Cell(t, r, c) if t == self.id => self.get(r, c).cloned(),
            _ => None,
        }
    }

    /// Store or clear a cell; returns the previous value.
    pub(crate) fn put(&mut self, row: RowId, column: ColumnId, value: Option<Value>) -> Option<Value> {
        match value {
            Some(v) => self.cells.insert((row, column), v),
            None => self.cells.remove(&(row, column)),
        }
    }

    fn cell_value(&self, row: RowId, column: ColumnId) -> Option<Value> {
        self.get(row, column).cloned()
    }

    /// Every value an element spans, row-major for tables and subsets.
    pub fn values_of(&self, element: &ElementRef) -> Result<Vec<Option<Value>>, ErrorCode> {
        if !self.contains(element) {
            return Err(ErrorCode::InvalidTableOperand);
        }
        Ok(match *element {
            ElementRef::Cell(_, r, c) => vec![self.cell_value(r, c)],
            ElementRef::Column(_, c) => self.rows.iter().map(|r| self.cell_value(*r, c)).collect(),
            ElementRef::Row(_, r) => self.columns.iter().map(|c| self.cell_value(r, *c)).collect(),
            ElementRef::Table(_) | ElementRef::Subset(..) => self
                .covered(element)
                .into_iter()
                .map(|(r, c)| self.cell_value(r, c))
                .collect(),
        })
    }

    /// Cells an element covers, row-major.
    fn covered(&self, element: &ElementRef) -> Vec<Slot> {
        match *element {
            ElementRef::Cell(_, r, c) if self.row_index(r).is_some() && self.column_index(c).is_some() => {
                vec![(r, c)]
            }
            ElementRef::Cell(..) => Vec::new(),
            ElementRef::Row(_, r) if self.row_index(r).is_some() => self.columns.iter().map(|c| (r, *c)).collect(),
            ElementRef::Column(_, c) if self.column_index(c).is_some() => self.rows.iter().map(|r| (*r, c)).collect(),
            ElementRef::Row(..) | ElementRef::Column(..) => Vec::new(),
            ElementRef::Table(_) => self
                .rows
                .iter()
                .flat_map(|r| self.columns.iter().map(move |c| (*r, *c)))
                .collect(),
            ElementRef::Subset(_, s) => {
                let Some(subset) = self.subset_index(s).map(|i| &self.subsets[i]) else {
                    return Vec::new();
                };
                self.rows
                    .iter()
                    .flat_map(|r| self.columns.iter().map(move |c| (*r, *c)))
                    .filter(|(r, c)| subset.covers(self.id, *r, *c))
                    .collect()
            }
        }
    }

    /* ───────────────────────── derivations ───────────────────────── */

    pub fn derivation(&self, target: &ElementRef) -> Option<&Derivation> {
        self.derivations.get(target)
    }

    /// The derivation computing a cell: its own, else its row's, else its
    /// column's.
    pub fn owner_of(&self, row: RowId, column: ColumnId) -> Option<ElementRef> {
        [
            ElementRef::Cell(self.id, row, column),
            ElementRef::Row(self.id, row),
            ElementRef::Column(self.id, column),
        ]
        .into_iter()
        .find(|e| self.derivations.contains_key(e))
    }

    /// Cells a derivation on `target` writes, or would write once attached:
    /// the ones it covers that no more specific derivation claims.
    pub(crate) fn positions(&self, target: &ElementRef) -> Vec<Slot> {
        if !target.is_derivable() || !self.contains(target) {
            return Vec::new();
        }
        let mut cells = self.covered(target);
        cells.retain(|(r, c)| self.claims(target, *r, *c));
        cells
    }

    fn claims(&self, target: &ElementRef, row: RowId, column: ColumnId) -> bool {
        [
            ElementRef::Cell(self.id, row, column),
            ElementRef::Row(self.id, row),
            ElementRef::Column(self.id, column),
        ]
        .iter()
        .take_while(|e| *e != target)
        .all(|e| !self.derivations.contains_key(e))
    }

    /// Elements through which a write to `(row, column)` is observed.
    pub(crate) fn cell_triggers(&self, row: RowId, column: ColumnId) -> Triggers {
        let t = self.id;
        let mut out: Triggers = SmallVec::new();
        out.push(ElementRef::Cell(t, row, column));
        out.push(ElementRef::Row(t, row));
        out.push(ElementRef::Column(t, column));
        out.push(ElementRef::Table(t));
        for s in &self.subsets {
            if s.covers(t, row, column) {
                out.push(ElementRef::Subset(t, s.id));
            }
        }
        out
    }

    /// Derivations reading any of `triggers`, in edge order.
    pub(crate) fn readers_of(&self, triggers: &[ElementRef]) -> Vec<ElementRef> {
        self.graph.readers_of(triggers)
    }

    fn whole_cells(&self, element: &ElementRef) -> Vec<Slot> {
        if !self.contains(element) {
            return Vec::new();
        }
        self.covered(element)
    }

    /// Cells `read` sees while computing the cell at `at`.
    pub(crate) fn cells_read(&self, read: &Read, at: Slot) -> Vec<Slot> {
        if read.whole {
            return self.whole_cells(&read.element);
        }
        let (row, column) = at;
        let cell = match read.element {
            ElementRef::Cell(_, r, c) => (r, c),
            ElementRef::Column(_, c) => (row, c),
            ElementRef::Row(_, r) => (r, column),
            // scalar reads of a table or subset see nothing
            ElementRef::Table(_) | ElementRef::Subset(..) => return Vec::new(),
        };
        self.whole_cells(&ElementRef::Cell(self.id, cell.0, cell.1))
    }

    /// Derived cells that read `(row, column)`, in edge order.
    pub(crate) fn dependents_of(&self, row: RowId, column: ColumnId) -> Vec<Slot> {
        let triggers = self.cell_triggers(row, column);
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for reader in self.readers_of(&triggers) {
            let Some(derivation) = self.derivations.get(&reader) else {
                continue;
            };
            let positions = self.positions(&reader);
            for read in derivation.reads().iter().filter(|r| triggers.contains(&r.element)) {
                let hits = positions.iter().filter(|(r, c)| match (read.whole, read.element) {
                    (true, _) | (false, ElementRef::Cell(..)) => true,
                    (false, ElementRef::Column(..)) => *r == row,
                    (false, ElementRef::Row(..)) => *c == column,
                    (false, _) => false,
                });
                for cell in hits {
                    if seen.insert(*cell) {
                        out.push(*cell);
                    }
                }
            }
        }
        out
    }

    /// The first of `reads` through which a derivation on `target` would
    /// see a cell it writes, directly or through the derivations of the
    /// cells in between.
    pub(crate) fn circular_read(&self, target: &ElementRef, reads: &[Read]) -> Option<ElementRef> {
        let written = self.positions(target);
        let writes: FxHashSet<Slot> = written.iter().copied().collect();
        if writes.is_empty() {
            return None;
        }
        let mut visited: FxHashSet<Slot> = FxHashSet::default();
        let mut expanded: FxHashSet<(ElementRef, ElementRef)> = FxHashSet::default();
        for read in reads {
            let mut stack: Vec<Slot> = if read.whole {
                self.whole_cells(&read.element)
            } else {
                written.iter().flat_map(|at| self.cells_read(read, *at)).collect()
            };
            while let Some(cell) = stack.pop() {
                if writes.contains(&cell) {
                    return Some(read.element);
                }
                if !visited.insert(cell) {
                    continue;
                }
                let Some(owner) = self.owner_of(cell.0, cell.1) else {
                    continue;
                };
                let Some(derivation) = self.derivations.get(&owner) else {
                    continue;
                };
                for next in derivation.reads() {
                    if next.whole && !expanded.insert((owner, next.element)) {
                        continue;
                    }
                    stack.extend(self.cells_read(next, cell));
                }
            }
        }
        None
    }

    pub(crate) fn remember(&mut self, node: ElementRef, cell: ElementRef, key: String, result: Token) {
        self.memo.entry((node, cell)).or_default().insert(key, result);
    }

    pub(crate) fn forget_memo(&mut self, node: &ElementRef) {
        self.memo.retain(|(n, _), _| n != node);
    }

    pub(crate) fn memoized(&self, node: &ElementRef, cell: &ElementRef, key: &str) -> Option<Token> {
        self.memo.get(&(*node, *cell))?.get(key).cloned()
    }

    /// Evaluation scope for the cell `(row, column)` computed by `node`.
    pub(crate) fn scope(&self, node: ElementRef, row: RowId, column: ColumnId, transaction: TransactionId) -> EvalScope<'_> {
        EvalScope {
            table: self,
            node: Some(node),
            row: Some(row),
            column: Some(column),
            transaction,
        }
    }

    /// Scope for ad-hoc evaluation outside any row or column.
    pub(crate) fn detached_scope(&self, transaction: TransactionId) -> EvalScope<'_> {
        EvalScope {
            table: self,
            node: None,
            row: None,
            column: None,
            transaction,
        }
    }
}

impl ReferenceResolver for Table {
    fn anchor(&self) -> TableId {
        self.id
    }

    fn resolve_index(&self, kind: ElementKind, index: usize) -> Option<ElementRef> {
        match kind {
            ElementKind::Row => self.row(index),
            ElementKind::Column => self.column(index),
            ElementKind::Subset => self.subset(index),
            ElementKind::Table => (index == 1).then_some(ElementRef::Table(self.id)),
            ElementKind::Cell => None,
        }
    }

    fn resolve_label(&self, kind: ElementKind, label: &str) -> Option<ElementRef> {
        self.find(kind, label)
    }

    fn resolve_cell(&self, row: usize, column: usize) -> Option<ElementRef> {
        self.cell(row, column)
    }
}

/// Spells references so that the text compiles back to the same elements.
impl ReferenceNamer for Table {
    fn reference_name(&self, element: &ElementRef) -> String {
        if element.table() != self.id {
            return element.to_string();
        }
        let labelled = |prefix: &str, index: Option<usize>| match self.label_of(element) {
            Some(l) => format!("{prefix} {}", tabula_parse::quote_text(l)),
            None => match index {
                Some(i) => format!("{prefix} {}", i + 1),
                None => element.to_string(),
            },
        };
        match *element {
            ElementRef::Table(_) => "table".to_string(),
            ElementRef::Row(_, r) => labelled("row", self.row_index(r)),
            ElementRef::Column(_, c) => labelled("col", self.column_index(c)),
            ElementRef::Subset(_, s) => labelled("subset", self.subset_index(s)),
            ElementRef::Cell(_, r, c) => match (self.row_index(r), self.column_index(c)) {
                (Some(ri), Some(ci)) => format!("cell {}{}", column_letters(ci + 1), ri + 1),
                _ => element.to_string(),
            },
        }
    }
}

/// What a derivation sees while computing one cell.
pub struct EvalScope<'t> {
    table: &'t Table,
    node: Option<ElementRef>,
    row: Option<RowId>,
    column: Option<ColumnId>,
    transaction: TransactionId,
}

impl EvalScope<'_> {
    fn current_cell(&self) -> Option<ElementRef> {
        Some(ElementRef::Cell(self.table.id, self.row?, self.column?))
    }

    fn cell_token(&self, row: RowId, column: ColumnId) -> Token {
        let t = self.table;
        if t.row_index(row).is_none() || t.column_index(column).is_none() {
            return Token::Error(ErrorCode::InvalidTableOperand);
        }
        Token::from_value(t.cell_value(row, column))
    }
}

impl OperatorContext for EvalScope<'_> {
    fn transaction(&self) -> TransactionId {
        self.transaction
    }

    fn resolve(&self, element: &ElementRef) -> Token {
        if element.table() != self.table.id {
            return Token::Error(ErrorCode::InvalidTableOperand);
        }
        match *element {
            ElementRef::Cell(_, r, c) => self.cell_token(r, c),
            ElementRef::Column(_, c) => match self.row {
                Some(r) => self.cell_token(r, c),
                None if self.table.column_index(c).is_none() => Token::Error(ErrorCode::InvalidTableOperand),
                None => Token::Error(ErrorCode::ReferenceRequired),
            },
            ElementRef::Row(_, r) => match self.column {
                Some(c) => self.cell_token(r, c),
                None if self.table.row_index(r).is_none() => Token::Error(ErrorCode::InvalidTableOperand),
                None => Token::Error(ErrorCode::ReferenceRequired),
            },
            ElementRef::Table(_) | ElementRef::Subset(..) => Token::Error(ErrorCode::InvalidTableOperand),
        }
    }

    fn values(&self, element: &ElementRef) -> Result<Vec<Option<Value>>, ErrorCode> {
        self.table.values_of(element)
    }

    fn position(&self, element: &ElementRef) -> Option<usize> {
        let t = self.table;
        match *element {
            ElementRef::Column(..) => t.row_index(self.row?),
            ElementRef::Row(..) => t.column_index(self.column?),
            ElementRef::Cell(..) => Some(0),
            ElementRef::Table(_) | ElementRef::Subset(..) => {
                let here = (self.row?, self.column?);
                t.covered(element).iter().position(|p| *p == here)
            }
        }
    }

    fn memoized(&self, key: &str) -> Option<Token> {
        self.table.memoized(&self.node?, &self.current_cell()?, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::registry::Registry;
    use crate::token::EquationStack;

    fn grid() -> Table {
        let mut t = Table::new(TableId(1), Some("Sales"), 3, 2, true);
        let (r, c) = (t.rows.clone(), t.columns.clone());
        t.set_label(ElementRef::Column(t.id, c[0]), Some("Price".into()));
        for (i, row) in r.iter().enumerate() {
            t.put(*row, c[0], Some(Value::Number((i + 1) as f64)));
        }
        t
    }

    #[test]
    fn elements_resolve_by_index_and_label() {
        let t = grid();
        assert_eq!(t.resolve_index(ElementKind::Column, 1), t.column(1));
        assert_eq!(t.resolve_label(ElementKind::Column, "price"), t.column(1));
        assert_eq!(t.resolve_label(ElementKind::Table, "SALES"), Some(ElementRef::Table(t.id())));
        assert_eq!(t.resolve_cell(3, 2), t.cell(3, 2));
        assert_eq!(t.resolve_index(ElementKind::Row, 4), None);
        assert_eq!(t.resolve_index(ElementKind::Row, 0), None);
    }

    #[test]
    fn references_are_named_for_recompilation() {
        let t = grid();
        let name = |e: Option<ElementRef>| e.map(|e| t.reference_name(&e));
        assert_eq!(name(t.column(1)), Some("col \"Price\"".to_string()));
        assert_eq!(name(t.column(2)), Some("col 2".to_string()));
        assert_eq!(name(t.cell(3, 2)), Some("cell B3".to_string()));
        assert_eq!(t.reference_name(&ElementRef::Table(t.id())), "table");
    }

    #[test]
    fn scalar_resolution_follows_the_current_position() {
        let t = grid();
        let (r, c) = (t.rows.clone(), t.columns.clone());
        let node = ElementRef::Column(t.id, c[1]);
        let scope = t.scope(node, r[2], c[1], TransactionId(1));
        let price = ElementRef::Column(t.id, c[0]);
        assert_eq!(scope.resolve(&price), Token::number(3.0));
        assert_eq!(scope.resolve(&ElementRef::Column(t.id, c[1])), Token::Null);
        assert_eq!(scope.resolve(&ElementRef::Table(t.id)), Token::Error(ErrorCode::InvalidTableOperand));
        assert_eq!(scope.position(&price), Some(2));
        assert_eq!(scope.values(&price).map(|v| v.len()), Ok(3));

        let detached = t.detached_scope(TransactionId(1));
        assert_eq!(detached.resolve(&price), Token::Error(ErrorCode::ReferenceRequired));
        assert_eq!(
            detached.resolve(&ElementRef::Column(t.id, ColumnId(99))),
            Token::Error(ErrorCode::InvalidTableOperand)
        );
    }

    #[test]
    fn cell_owner_prefers_the_most_specific_derivation() {
        let mut t = grid();
        let (r, c) = (t.rows.clone(), t.columns.clone());
        let col = ElementRef::Column(t.id, c[1]);
        let row = ElementRef::Row(t.id, r[0]);
        t.derivations.insert(col, dummy(col));
        t.derivations.insert(row, dummy(row));
        assert_eq!(t.owner_of(r[0], c[1]), Some(row));
        assert_eq!(t.owner_of(r[1], c[1]), Some(col));
        assert_eq!(t.positions(&col), vec![(r[1], c[1]), (r[2], c[1])]);
        assert_eq!(t.positions(&row).len(), 2);
    }

    #[test]
    fn subsets_and_triggers() {
        let mut t = grid();
        let (r, c) = (t.rows.clone(), t.columns.clone());
        let s = t.add_subset(Some("Top"), vec![ElementRef::Row(t.id, r[0])]);
        let subset = ElementRef::Subset(t.id, s);
        assert_eq!(t.values_of(&subset), Ok(vec![Some(Value::Number(1.0)), None]));
        assert!(t.cell_triggers(r[0], c[1]).contains(&subset));
        assert!(!t.cell_triggers(r[1], c[1]).contains(&subset));

        assert!(t.delete_row(r[0]));
        assert_eq!(t.values_of(&subset), Ok(vec![]));
        assert_eq!(
            t.values_of(&ElementRef::Row(t.id, r[0])),
            Err(ErrorCode::InvalidTableOperand)
        );
    }

    fn compiled(t: &Table, formula: &str) -> EquationStack {
        let registry = Registry::new();
        Compiler::new(&registry, t).compile(formula).into_result().unwrap()
    }

    fn derive(t: &mut Table, target: ElementRef, formula: &str) {
        let postfix = compiled(t, formula);
        let d = Derivation::new(target, formula, postfix, EquationStack::infix(Vec::new()), formula.into(), 15, None, 0);
        t.graph.link(target, d.references());
        t.derivations.insert(target, d);
    }

    /// Column 2 doubles column 1; row 3 totals rows 1 and 2.
    fn totals() -> Table {
        let mut t = grid();
        let (col, total) = (t.column(2).unwrap(), t.row(3).unwrap());
        derive(&mut t, col, "col 1 * 2");
        derive(&mut t, total, "row 1 + row 2");
        t
    }

    #[test]
    fn reads_tell_ranges_from_single_cells() {
        let t = grid();
        let (c1, c2) = (t.column(1).unwrap(), t.column(2).unwrap());
        assert_eq!(
            Read::collect(&compiled(&t, "sum(col 1) + col 2 * col 1")),
            vec![
                Read { element: c1, whole: true },
                Read { element: c2, whole: false }
            ]
        );
        assert_eq!(
            Read::collect(&compiled(&t, "col 2")),
            vec![Read { element: c2, whole: false }]
        );
    }

    #[test]
    fn dependents_follow_how_each_cell_is_read() {
        let t = totals();
        let (r, c) = (t.rows.clone(), t.columns.clone());
        assert_eq!(t.positions(&t.column(2).unwrap()), vec![(r[0], c[1]), (r[1], c[1])]);
        assert_eq!(t.dependents_of(r[0], c[0]), vec![(r[2], c[0]), (r[0], c[1])]);
        assert_eq!(t.dependents_of(r[0], c[1]), vec![(r[2], c[1])]);
        assert!(t.dependents_of(r[2], c[0]).is_empty());
    }

    #[test]
    fn circular_reads_are_traced_cell_by_cell() {
        let t = totals();
        let (a1, a2, b3) = (t.cell(1, 1).unwrap(), t.cell(2, 1).unwrap(), t.cell(3, 2).unwrap());
        let col2 = t.column(2).unwrap();
        // the column and the totals row overlap without reading each other
        assert_eq!(t.circular_read(&col2, t.derivation(&col2).unwrap().reads()), None);
        let total = t.row(3).unwrap();
        assert_eq!(t.circular_read(&total, t.derivation(&total).unwrap().reads()), None);

        // A1 would read B3, which totals B1, which reads A1
        assert_eq!(t.circular_read(&a1, &Read::collect(&compiled(&t, "cell B3"))), Some(b3));
        // B1 reads A1, not A2
        let b1 = t.cell(1, 2).unwrap();
        assert_eq!(t.circular_read(&a2, &Read::collect(&compiled(&t, "cell B1"))), None);
        assert_eq!(t.circular_read(&a2, &Read::collect(&compiled(&t, "sum(col 2)"))), Some(col2));
        assert_eq!(t.circular_read(&col2, &Read::collect(&compiled(&t, "cell B1 + 1"))), Some(b1));
    }

    fn dummy(target: ElementRef) -> Derivation {
        Derivation::new(
            target,
            "1",
            EquationStack::postfix(vec![Token::number(1.0)]),
            EquationStack::infix(vec![Token::number(1.0)]),
            "1".into(),
            15,
            None,
            0,
        )
    }
}
