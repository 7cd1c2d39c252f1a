//! Compiled formulas attached to rows, columns, and cells.

use std::sync::Arc;
use std::time::Duration;

use tabula_common::{DataType, ElementRef};

use crate::token::{EquationStack, IdNamer, Token};

/// Per-derivation settings supplied with `set_derivation`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationOptions {
    /// Significant digits; the engine default applies when unset.
    pub precision: Option<u32>,
    /// Re-evaluate on this interval in addition to input changes.
    pub interval: Option<Duration>,
}

impl DerivationOptions {
    pub fn precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// How a derivation reads one of its references.
///
/// A scalar read sees a single cell: a column in the current row, a row in
/// the current column, or a cell. A whole read, made by an operator that
/// declares a [`DataType::Reference`] argument, sees every cell of the
/// element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read {
    pub element: ElementRef,
    pub whole: bool,
}

impl Read {
    /// Reads of a postfix stack in order of first use. An element read both
    /// ways appears once, as a whole read.
    pub fn collect(postfix: &EquationStack) -> Vec<Read> {
        let mut reads: Vec<Read> = Vec::new();
        let mut note = |element: ElementRef, whole: bool| match reads.iter_mut().find(|r| r.element == element) {
            Some(read) => read.whole |= whole,
            None => reads.push(Read { element, whole }),
        };
        let mut operands: Vec<Option<ElementRef>> = Vec::new();
        for token in postfix {
            match token {
                Token::Reference(r) => operands.push(Some(*r)),
                Token::Operator(op) => {
                    let Some(start) = operands.len().checked_sub(op.arity()) else {
                        break;
                    };
                    let declared = op.arg_types();
                    for (i, arg) in operands.drain(start..).enumerate() {
                        if let Some(element) = arg {
                            note(element, declared.get(i) == Some(&DataType::Reference));
                        }
                    }
                    operands.push(None);
                }
                _ => operands.push(None),
            }
        }
        for element in operands.into_iter().flatten() {
            note(element, false);
        }
        reads
    }
}

/// A successfully compiled derivation.
///
/// Replaced wholesale by a later `set_derivation`; the generation number
/// tells stale asynchronous results apart from current ones.
#[derive(Debug, Clone)]
pub struct Derivation {
    target: ElementRef,
    expression: String,
    postfix: Arc<EquationStack>,
    infix: EquationStack,
    infix_text: String,
    precision: u32,
    interval: Option<Duration>,
    generation: u64,
    references: Vec<ElementRef>,
    reads: Vec<Read>,
}

impl Derivation {
    pub(crate) fn new(
        target: ElementRef,
        expression: &str,
        postfix: EquationStack,
        infix: EquationStack,
        infix_text: String,
        precision: u32,
        interval: Option<Duration>,
        generation: u64,
    ) -> Self {
        let references = postfix.references();
        let reads = Read::collect(&postfix);
        Self {
            target,
            expression: expression.trim().to_string(),
            postfix: Arc::new(postfix),
            infix,
            infix_text,
            precision,
            interval,
            generation,
            references,
            reads,
        }
    }

    pub fn target(&self) -> ElementRef {
        self.target
    }

    /// The text as entered.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn postfix(&self) -> &EquationStack {
        &self.postfix
    }

    pub(crate) fn shared_postfix(&self) -> Arc<EquationStack> {
        Arc::clone(&self.postfix)
    }

    pub fn infix(&self) -> &EquationStack {
        &self.infix
    }

    /// Canonical infix text; compiles back to the same postfix stack.
    pub fn infix_text(&self) -> &str {
        &self.infix_text
    }

    pub(crate) fn set_infix_text(&mut self, text: String) {
        self.infix_text = text;
    }

    /// Postfix rendering with element ids, e.g. `T1!C1 T1!C1 *`.
    pub fn postfix_text(&self) -> String {
        self.postfix.render(&IdNamer)
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Elements this derivation reads, in order of first use.
    pub fn references(&self) -> &[ElementRef] {
        &self.references
    }

    /// How each reference is read.
    pub fn reads(&self) -> &[Read] {
        &self.reads
    }
}
