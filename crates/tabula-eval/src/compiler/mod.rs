//! Derivation compiler.
//!
//! Turns formula text into a postfix [`EquationStack`]:
//!
//! 1. the lexer splits the text into lexemes,
//! 2. each lexeme is classified as a reference, a registry token, or a literal,
//! 3. a shunting-yard pass orders tokens by operator priority,
//! 4. the postfix stack is checked by simulating its stack depth.
//!
//! Failures are reported with the byte offset of the offending lexeme
//! and never modify anything; installing a compiled stack is the engine's
//! business.

mod infix;

pub use infix::canonical_infix;

use std::sync::Arc;

use tabula_common::{ElementKind, ElementRef, TableId, Value};
use tabula_parse::{Lexeme, LexemeKind, Lexer, parse_a1, reference_prefix};
use thiserror::Error;

use crate::operator::Operator;
use crate::registry::Registry;
use crate::token::{EquationStack, ReferenceNamer, Token, TokenType};

/// Resolves reference designators against the table a formula belongs to.
pub trait ReferenceResolver {
    /// The table references are resolved in.
    fn anchor(&self) -> TableId;

    /// 1-based positional lookup of a row, column, or subset.
    fn resolve_index(&self, kind: ElementKind, index: usize) -> Option<ElementRef>;

    /// Case-insensitive label lookup.
    fn resolve_label(&self, kind: ElementKind, label: &str) -> Option<ElementRef>;

    /// Cell at 1-based `(row, column)`.
    fn resolve_cell(&self, row: usize, column: usize) -> Option<ElementRef>;
}

/// A failed compilation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (at position {position})")]
pub struct CompileError {
    pub message: String,
    /// Byte offset into the source text.
    pub position: usize,
}

impl CompileError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Outcome of compiling one formula.
#[derive(Debug, Clone)]
pub struct ParseResult {
    success: bool,
    position: Option<usize>,
    message: Option<String>,
    stack: Option<EquationStack>,
    positions: Vec<usize>,
}

impl ParseResult {
    fn ok(stack: EquationStack, positions: Vec<usize>) -> Self {
        Self {
            success: true,
            position: None,
            message: None,
            stack: Some(stack),
            positions,
        }
    }

    fn failed(err: CompileError) -> Self {
        Self {
            success: false,
            position: Some(err.position),
            message: Some(err.message),
            stack: None,
            positions: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Byte offset of the failure within the source text.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The postfix stack, when compilation succeeded.
    pub fn stack(&self) -> Option<&EquationStack> {
        self.stack.as_ref()
    }

    /// Byte offset of each postfix token in the source text.
    pub fn token_positions(&self) -> &[usize] {
        &self.positions
    }

    /// Byte offset of the first use of `element`.
    pub fn reference_position(&self, element: &ElementRef) -> Option<usize> {
        let stack = self.stack.as_ref()?;
        stack
            .iter()
            .position(|t| t.reference() == Some(*element))
            .and_then(|i| self.positions.get(i).copied())
    }

    pub fn into_result(self) -> Result<EquationStack, CompileError> {
        match self.stack {
            Some(stack) if self.success => Ok(stack),
            _ => Err(CompileError::new(
                self.message.unwrap_or_else(|| "compilation failed".into()),
                self.position.unwrap_or(0),
            )),
        }
    }
}

/// Pending entries of the shunting-yard operator stack.
#[derive(Debug)]
enum Frame {
    /// Infix or prefix operator waiting for its right-hand operands.
    Operator { op: Arc<dyn Operator>, pos: usize },
    /// An open parenthesis, possibly the argument list of a call.
    Paren {
        pos: usize,
        call: Option<Arc<dyn Operator>>,
        commas: usize,
        output_mark: usize,
    },
}

/// Compiles formula text against a registry and, optionally, a table.
pub struct Compiler<'a> {
    registry: &'a Registry,
    resolver: Option<&'a dyn ReferenceResolver>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry, resolver: &'a dyn ReferenceResolver) -> Self {
        Self {
            registry,
            resolver: Some(resolver),
        }
    }

    /// A compiler for formulas that reference no table.
    pub fn standalone(registry: &'a Registry) -> Self {
        Self {
            registry,
            resolver: None,
        }
    }

    pub fn compile(&self, formula: &str) -> ParseResult {
        match self.compile_tokens(formula) {
            Ok((tokens, positions)) => {
                ParseResult::ok(EquationStack::postfix(tokens), positions)
            }
            Err(err) => {
                tracing::debug!(formula, position = err.position, "compile failed: {}", err.message);
                ParseResult::failed(err)
            }
        }
    }

    fn compile_tokens(&self, formula: &str) -> Result<(Vec<Token>, Vec<usize>), CompileError> {
        let lexer = Lexer::new(formula).map_err(|e| CompileError::new(e.message, e.pos))?;
        let items = &lexer.items;
        if items.is_empty() {
            return Err(CompileError::new("empty formula", 0));
        }

        let mut output: Vec<(Token, usize)> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut expect_operand = true;
        let mut i = 0;

        while i < items.len() {
            let lexeme = &items[i];
            let pos = lexeme.start;
            match lexeme.kind {
                LexemeKind::Number => {
                    let n = lexeme
                        .as_number()
                        .ok_or_else(|| CompileError::new("invalid number", pos))?;
                    push_operand(&mut output, &mut expect_operand, Token::literal(Value::Number(n)), pos)?;
                }
                LexemeKind::Text => {
                    let token = Token::literal(Value::Text(lexeme.value.clone()));
                    push_operand(&mut output, &mut expect_operand, token, pos)?;
                }
                LexemeKind::Ident | LexemeKind::Symbol => {
                    if lexeme.kind == LexemeKind::Ident {
                        if let Some((reference, consumed)) = self.reference_at(items, i)? {
                            push_operand(&mut output, &mut expect_operand, Token::Reference(reference), pos)?;
                            i += consumed;
                            continue;
                        }
                    }
                    match self.registry.look_up_token(&lexeme.value) {
                        Some(Token::Operator(op)) => {
                            let next_is_paren = items
                                .get(i + 1)
                                .is_some_and(|n| n.kind == LexemeKind::LeftParen);
                            let consumed_paren = self.place_operator(
                                op,
                                pos,
                                next_is_paren,
                                &mut output,
                                &mut frames,
                                &mut expect_operand,
                            )?;
                            if consumed_paren {
                                i += 1;
                            }
                        }
                        Some(constant) => {
                            push_operand(&mut output, &mut expect_operand, constant, pos)?;
                        }
                        None if lexeme.kind == LexemeKind::Ident => {
                            let reference = self.bare_label(&lexeme.value).ok_or_else(|| {
                                CompileError::new(format!("unknown name '{}'", lexeme.value), pos)
                            })?;
                            push_operand(&mut output, &mut expect_operand, Token::Reference(reference), pos)?;
                        }
                        None => {
                            return Err(CompileError::new(
                                format!("unknown operator '{}'", lexeme.value),
                                pos,
                            ));
                        }
                    }
                }
                LexemeKind::LeftParen => {
                    if !expect_operand {
                        return Err(CompileError::new("expected an operator before '('", pos));
                    }
                    frames.push(Frame::Paren {
                        pos,
                        call: None,
                        commas: 0,
                        output_mark: output.len(),
                    });
                }
                LexemeKind::Comma => {
                    if expect_operand {
                        return Err(CompileError::new("missing argument before ','", pos));
                    }
                    drain_operators(&mut frames, &mut output);
                    match frames.last_mut() {
                        Some(Frame::Paren {
                            call: Some(_),
                            commas,
                            ..
                        }) => *commas += 1,
                        _ => {
                            return Err(CompileError::new(
                                "',' outside of a function argument list",
                                pos,
                            ));
                        }
                    }
                    expect_operand = true;
                }
                LexemeKind::RightParen => {
                    self.close_paren(pos, &mut output, &mut frames, &mut expect_operand)?;
                }
            }
            i += 1;
        }

        if expect_operand {
            return Err(CompileError::new(
                "unexpected end of formula, operand expected",
                formula.len(),
            ));
        }
        while let Some(frame) = frames.pop() {
            match frame {
                Frame::Operator { op, pos } => output.push((Token::Operator(op), pos)),
                Frame::Paren { pos, .. } => {
                    return Err(CompileError::new("unmatched '('", pos));
                }
            }
        }

        validate_depth(&output)?;
        Ok(output.into_iter().unzip())
    }

    /// Place an operator token; returns whether the following `(` was consumed.
    fn place_operator(
        &self,
        op: Arc<dyn Operator>,
        pos: usize,
        next_is_paren: bool,
        output: &mut Vec<(Token, usize)>,
        frames: &mut Vec<Frame>,
        expect_operand: &mut bool,
    ) -> Result<bool, CompileError> {
        let token_type = op.token_type();
        match token_type {
            TokenType::BinaryOp if *expect_operand => match op.label() {
                "-" => {
                    let neg = self.prefix_minus(pos)?;
                    frames.push(Frame::Operator { op: neg, pos });
                    Ok(false)
                }
                // unary plus is a no-op
                "+" => Ok(false),
                label => Err(CompileError::new(
                    format!("missing left operand for '{label}'"),
                    pos,
                )),
            },
            TokenType::BinaryOp => {
                let priority = op.priority();
                let right_assoc = op.caps().contains(crate::operator::OpCaps::RIGHT_ASSOC);
                while let Some(Frame::Operator { op: top, .. }) = frames.last() {
                    let top_priority = top.priority();
                    if top_priority > priority || (top_priority == priority && !right_assoc) {
                        if let Some(Frame::Operator { op, pos }) = frames.pop() {
                            output.push((Token::Operator(op), pos));
                        }
                    } else {
                        break;
                    }
                }
                frames.push(Frame::Operator { op, pos });
                *expect_operand = true;
                Ok(false)
            }
            TokenType::UnaryOp => {
                if !*expect_operand {
                    return Err(CompileError::new(
                        format!("'{}' must precede its operand", op.symbol()),
                        pos,
                    ));
                }
                frames.push(Frame::Operator { op, pos });
                Ok(false)
            }
            t if t.is_function() => {
                if !*expect_operand {
                    return Err(CompileError::new(
                        format!("expected an operator before '{}'", op.label()),
                        pos,
                    ));
                }
                if next_is_paren {
                    frames.push(Frame::Paren {
                        pos,
                        call: Some(op),
                        commas: 0,
                        output_mark: output.len(),
                    });
                    return Ok(true);
                }
                match op.arity() {
                    0 => {
                        output.push((Token::Operator(op), pos));
                        *expect_operand = false;
                    }
                    1 => frames.push(Frame::Operator { op, pos }),
                    n => {
                        return Err(CompileError::new(
                            format!("'{}' takes {n} arguments and needs parentheses", op.label()),
                            pos,
                        ));
                    }
                }
                Ok(false)
            }
            other => Err(CompileError::new(
                format!("unexpected {other:?} '{}'", op.label()),
                pos,
            )),
        }
    }

    fn prefix_minus(&self, pos: usize) -> Result<Arc<dyn Operator>, CompileError> {
        match self.registry.look_up_token("neg") {
            Some(Token::Operator(op)) if op.token_type() == TokenType::UnaryOp => Ok(op),
            _ => Err(CompileError::new("no prefix negation operator registered", pos)),
        }
    }

    fn close_paren(
        &self,
        pos: usize,
        output: &mut Vec<(Token, usize)>,
        frames: &mut Vec<Frame>,
        expect_operand: &mut bool,
    ) -> Result<(), CompileError> {
        if *expect_operand {
            // only an empty argument list may close here
            let empty_call = matches!(
                frames.last(),
                Some(Frame::Paren { call: Some(_), commas: 0, output_mark, .. }) if *output_mark == output.len()
            );
            if !empty_call {
                return Err(CompileError::new("missing operand before ')'", pos));
            }
        }
        drain_operators(frames, output);
        match frames.pop() {
            Some(Frame::Paren {
                call,
                commas,
                output_mark,
                pos: open,
            }) => {
                if let Some(op) = call {
                    let args = if output.len() == output_mark { 0 } else { commas + 1 };
                    if args != op.arity() {
                        return Err(CompileError::new(
                            format!(
                                "'{}' expects {} argument{}, found {args}",
                                op.label(),
                                op.arity(),
                                if op.arity() == 1 { "" } else { "s" }
                            ),
                            open,
                        ));
                    }
                    output.push((Token::Operator(op), open));
                }
                *expect_operand = false;
                Ok(())
            }
            _ => Err(CompileError::new("unmatched ')'", pos)),
        }
    }

    /// Reference starting at `items[i]`, with the number of lexemes it spans.
    fn reference_at(
        &self,
        items: &[Lexeme],
        i: usize,
    ) -> Result<Option<(ElementRef, usize)>, CompileError> {
        let Some(kind) = reference_prefix(&items[i].value) else {
            return Ok(None);
        };
        let next = items.get(i + 1);
        let designator = next.filter(|n| match n.kind {
            LexemeKind::Number | LexemeKind::Text => true,
            LexemeKind::Ident => self.registry.look_up_token(&n.value).is_none(),
            _ => false,
        });
        let Some(resolver) = self.resolver else {
            if designator.is_some() || kind == ElementKind::Table {
                return Err(CompileError::new(
                    "references need a table to resolve against",
                    items[i].start,
                ));
            }
            return Ok(None);
        };
        let Some(d) = designator else {
            // a bare `table` is the anchor table; other bare prefixes are names
            return Ok((kind == ElementKind::Table)
                .then(|| (ElementRef::Table(resolver.anchor()), 1)));
        };

        let unresolved = || {
            CompileError::new(
                format!("unresolved {kind} reference '{}'", d.source_form()),
                d.start,
            )
        };
        let resolved = match (kind, d.kind) {
            (ElementKind::Cell, LexemeKind::Ident) => {
                let (row, col) = parse_a1(&d.value).ok_or_else(unresolved)?;
                (resolver.resolve_cell(row, col), 2)
            }
            (ElementKind::Cell, LexemeKind::Number) => {
                let row = positive_index(d).ok_or_else(unresolved)?;
                let col_lexeme = items
                    .get(i + 2)
                    .filter(|l| l.kind == LexemeKind::Number)
                    .ok_or_else(|| {
                        CompileError::new("cell reference needs a row and a column", d.start)
                    })?;
                let col = positive_index(col_lexeme).ok_or_else(unresolved)?;
                (resolver.resolve_cell(row, col), 3)
            }
            (_, LexemeKind::Number) => {
                let index = positive_index(d).ok_or_else(unresolved)?;
                (resolver.resolve_index(kind, index), 2)
            }
            (_, _) => (resolver.resolve_label(kind, &d.value), 2),
        };
        match resolved {
            (Some(r), consumed) => Ok(Some((r, consumed))),
            (None, _) => Err(unresolved()),
        }
    }

    /// A bare identifier names a column, a row, or a subset, in that order.
    fn bare_label(&self, word: &str) -> Option<ElementRef> {
        let resolver = self.resolver?;
        [ElementKind::Column, ElementKind::Row, ElementKind::Subset]
            .into_iter()
            .find_map(|kind| resolver.resolve_label(kind, word))
    }
}

fn positive_index(lexeme: &Lexeme) -> Option<usize> {
    let n = lexeme.as_number()?;
    (n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as usize)
}

fn push_operand(
    output: &mut Vec<(Token, usize)>,
    expect_operand: &mut bool,
    token: Token,
    pos: usize,
) -> Result<(), CompileError> {
    if !*expect_operand {
        return Err(CompileError::new("expected an operator", pos));
    }
    output.push((token, pos));
    *expect_operand = false;
    Ok(())
}

/// Move operators down to the nearest open parenthesis into the output.
fn drain_operators(frames: &mut Vec<Frame>, output: &mut Vec<(Token, usize)>) {
    while let Some(Frame::Operator { .. }) = frames.last() {
        if let Some(Frame::Operator { op, pos }) = frames.pop() {
            output.push((Token::Operator(op), pos));
        }
    }
}

/// Simulate evaluation depth: every operator must find its operands and
/// exactly one value must remain.
fn validate_depth(output: &[(Token, usize)]) -> Result<(), CompileError> {
    let mut depth = 0usize;
    for (token, pos) in output {
        match token {
            Token::Operator(op) => {
                let arity = op.arity();
                if depth < arity {
                    return Err(CompileError::new(
                        format!("'{}' is missing operands", op.label()),
                        *pos,
                    ));
                }
                depth = depth - arity + 1;
            }
            _ => depth += 1,
        }
    }
    match depth {
        1 => Ok(()),
        _ => Err(CompileError::new(
            "formula does not reduce to a single value",
            output.last().map_or(0, |(_, p)| *p),
        )),
    }
}

/// Compile and render the canonical infix form in one step.
pub fn compile_canonical(
    compiler: &Compiler<'_>,
    formula: &str,
    namer: &dyn ReferenceNamer,
) -> Result<(EquationStack, EquationStack, String), CompileError> {
    let postfix = compiler.compile(formula).into_result()?;
    let infix = canonical_infix(&postfix)?;
    let text = infix.render(namer);
    Ok((postfix, infix, text))
}
