//! Tokens, pending work, and equation stacks.
//!
//! A compiled derivation is an [`EquationStack`] of [`Token`]s in postfix
//! order. Tokens carry operands, operators, element references, and the two
//! non-value outcomes of evaluation: an error code or a pending
//! asynchronous result.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use parking_lot::Mutex;
use tabula_common::{DataType, ElementKind, ElementRef, ErrorCode, Value};

use crate::operator::Operator;

/// Classification of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Operand,
    Constant,
    Null,
    BuiltIn,
    UnaryOp,
    BinaryOp,
    UnaryFunc,
    BinaryFunc,
    StatOp,
    TransformOp,
    GenericFunc,
    TableRef,
    ColumnRef,
    RowRef,
    CellRef,
    SubsetRef,
    Comma,
    LeftParen,
    RightParen,
    EvaluationError,
    Pending,
}

impl TokenType {
    /// Function-like operators are written `label(args)` or, for one
    /// argument, as a prefix without parentheses.
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            TokenType::BuiltIn
                | TokenType::UnaryFunc
                | TokenType::BinaryFunc
                | TokenType::StatOp
                | TokenType::TransformOp
                | TokenType::GenericFunc
        )
    }

    pub fn is_operator(&self) -> bool {
        self.is_function() || matches!(self, TokenType::UnaryOp | TokenType::BinaryOp)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TokenType::TableRef
                | TokenType::ColumnRef
                | TokenType::RowRef
                | TokenType::CellRef
                | TokenType::SubsetRef
        )
    }

    pub fn for_reference(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Table => TokenType::TableRef,
            ElementKind::Column => TokenType::ColumnRef,
            ElementKind::Row => TokenType::RowRef,
            ElementKind::Cell => TokenType::CellRef,
            ElementKind::Subset => TokenType::SubsetRef,
        }
    }

    /// Binding priority used when an operator does not declare its own.
    pub fn default_priority(&self) -> u8 {
        match self {
            TokenType::BinaryOp => 5,
            TokenType::UnaryOp => 7,
            _ => 9,
        }
    }
}

/// Identity of one asynchronous evaluation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Deferred computation that produces the final token of a pending result.
pub type PendingJob = Box<dyn FnOnce() -> Token + Send + 'static>;

/// An asynchronous result that has not arrived yet.
///
/// Returned by `ASYNC` operators. Carries the transaction it belongs to,
/// the argument values it was computed from, and optionally a job that the
/// engine submits to its worker pool once the wave has finished.
#[derive(Clone)]
pub struct Pending {
    transaction: TransactionId,
    args: Vec<Value>,
    memo_key: Option<Arc<str>>,
    job: Option<Arc<Mutex<Option<PendingJob>>>>,
}

impl Pending {
    /// Pending result whose value is computed by `job` on the pending pool.
    pub fn deferred(
        transaction: TransactionId,
        args: Vec<Value>,
        job: impl FnOnce() -> Token + Send + 'static,
    ) -> Self {
        Self {
            transaction,
            args,
            memo_key: None,
            job: Some(Arc::new(Mutex::new(Some(Box::new(job))))),
        }
    }

    /// Pending result completed from outside through `post_result`.
    pub fn external(transaction: TransactionId, args: Vec<Value>) -> Self {
        Self {
            transaction,
            args,
            memo_key: None,
            job: None,
        }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn memo_key(&self) -> Option<&str> {
        self.memo_key.as_deref()
    }

    pub fn has_job(&self) -> bool {
        self.job.as_ref().is_some_and(|j| j.lock().is_some())
    }

    /// Take the job out; later clones observe `None`.
    pub fn take_job(&self) -> Option<PendingJob> {
        self.job.as_ref().and_then(|j| j.lock().take())
    }

    pub(crate) fn stamped(mut self, transaction: TransactionId, memo_key: &str) -> Self {
        self.transaction = transaction;
        self.memo_key = Some(Arc::from(memo_key));
        self
    }
}

impl Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("transaction", &self.transaction)
            .field("args", &self.args)
            .field("memo_key", &self.memo_key)
            .field("has_job", &self.has_job())
            .finish()
    }
}

/// One token of an equation stack, or the result of evaluating one.
#[derive(Clone)]
pub enum Token {
    /// A literal operand.
    Operand(Value),
    /// A named or anonymous constant (`pi`, `true`, a numeric literal).
    Constant {
        label: Option<Arc<str>>,
        value: Value,
    },
    Null,
    Operator(Arc<dyn Operator>),
    Reference(ElementRef),
    Comma,
    LeftParen,
    RightParen,
    Error(ErrorCode),
    Pending(Pending),
}

impl Token {
    /// Operand from a value; error values become [`Token::Error`].
    pub fn operand(value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Error(e) => Token::Error(e),
            v => Token::Operand(v),
        }
    }

    pub fn from_value(value: Option<Value>) -> Self {
        value.map_or(Token::Null, Token::operand)
    }

    pub fn literal(value: Value) -> Self {
        Token::Constant { label: None, value }
    }

    pub fn named(label: &str, value: Value) -> Self {
        Token::Constant {
            label: Some(Arc::from(label)),
            value,
        }
    }

    pub fn number(n: f64) -> Self {
        Token::Operand(Value::Number(n))
    }

    pub fn token_type(&self) -> TokenType {
        match self {
            Token::Operand(_) => TokenType::Operand,
            Token::Constant { .. } => TokenType::Constant,
            Token::Null => TokenType::Null,
            Token::Operator(op) => op.token_type(),
            Token::Reference(r) => TokenType::for_reference(r.kind()),
            Token::Comma => TokenType::Comma,
            Token::LeftParen => TokenType::LeftParen,
            Token::RightParen => TokenType::RightParen,
            Token::Error(_) => TokenType::EvaluationError,
            Token::Pending(_) => TokenType::Pending,
        }
    }

    /// The value carried by operands and constants.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Token::Operand(v) | Token::Constant { value: v, .. } => Some(v),
            _ => None,
        }
    }

    /// The cell value this token stands for once evaluation has finished.
    ///
    /// `Null` is an empty cell. Tokens that are not values (operators,
    /// punctuation, unresolved references, pending results) yield
    /// `InvalidOperand`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Token::Operand(v) | Token::Constant { value: v, .. } => Some(v),
            Token::Null => None,
            Token::Error(e) => Some(Value::Error(e)),
            Token::Pending(_) => Some(Value::Error(ErrorCode::InvalidPendingOperator)),
            _ => Some(Value::Error(ErrorCode::InvalidOperand)),
        }
    }

    pub fn operator(&self) -> Option<&Arc<dyn Operator>> {
        match self {
            Token::Operator(op) => Some(op),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<ElementRef> {
        match self {
            Token::Reference(r) => Some(*r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<ErrorCode> {
        match self {
            Token::Error(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Token::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Token::Error(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Token::Pending(_))
    }

    /// Type used to resolve operator overloads.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Token::Operand(v) | Token::Constant { value: v, .. } => Some(v.data_type()),
            Token::Reference(_) => Some(DataType::Reference),
            Token::Error(_) => Some(DataType::Error),
            _ => None,
        }
    }

    /// Text of this token as it appears in a formula.
    ///
    /// References render through `namer`, since their display form depends on
    /// the table they belong to.
    pub fn render(&self, namer: &dyn ReferenceNamer) -> String {
        match self {
            Token::Operand(v) => render_value(v),
            Token::Constant { label: Some(l), .. } => l.to_string(),
            Token::Constant { label: None, value } => render_value(value),
            Token::Null => "null".to_string(),
            Token::Operator(op) => op.symbol().to_string(),
            Token::Reference(r) => namer.reference_name(r),
            Token::Comma => ",".to_string(),
            Token::LeftParen => "(".to_string(),
            Token::RightParen => ")".to_string(),
            Token::Error(e) => e.as_str().to_string(),
            Token::Pending(_) => "pending".to_string(),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Text(s) => tabula_parse::quote_text(s),
        other => other.to_string(),
    }
}

impl From<Value> for Token {
    fn from(value: Value) -> Self {
        Token::operand(value)
    }
}

impl From<ErrorCode> for Token {
    fn from(e: ErrorCode) -> Self {
        Token::Error(e)
    }
}

impl From<f64> for Token {
    fn from(n: f64) -> Self {
        Token::number(n)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Operand(a), Token::Operand(b)) => a == b,
            (
                Token::Constant { label: la, value: va },
                Token::Constant { label: lb, value: vb },
            ) => la == lb && va == vb,
            (Token::Null, Token::Null)
            | (Token::Comma, Token::Comma)
            | (Token::LeftParen, Token::LeftParen)
            | (Token::RightParen, Token::RightParen) => true,
            (Token::Operator(a), Token::Operator(b)) => {
                a.label() == b.label() && a.token_type() == b.token_type()
            }
            (Token::Reference(a), Token::Reference(b)) => a == b,
            (Token::Error(a), Token::Error(b)) => a == b,
            (Token::Pending(a), Token::Pending(b)) => a.transaction == b.transaction,
            _ => false,
        }
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Operand(v) => write!(f, "Operand({v:?})"),
            Token::Constant { label, value } => match label {
                Some(l) => write!(f, "Constant({l} = {value:?})"),
                None => write!(f, "Constant({value:?})"),
            },
            Token::Null => write!(f, "Null"),
            Token::Operator(op) => write!(f, "{:?}({})", op.token_type(), op.label()),
            Token::Reference(r) => write!(f, "Reference({r})"),
            Token::Comma => write!(f, "Comma"),
            Token::LeftParen => write!(f, "LeftParen"),
            Token::RightParen => write!(f, "RightParen"),
            Token::Error(e) => write!(f, "Error({e})"),
            Token::Pending(p) => write!(f, "Pending({})", p.transaction),
        }
    }
}

/// Renders references the way a formula would spell them.
pub trait ReferenceNamer {
    fn reference_name(&self, element: &ElementRef) -> String;
}

/// Falls back to the element's id form; used when no table is at hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdNamer;

impl ReferenceNamer for IdNamer {
    fn reference_name(&self, element: &ElementRef) -> String {
        element.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFlavor {
    Infix,
    Postfix,
}

/// An ordered token sequence, either as written (infix) or ready to
/// evaluate (postfix).
#[derive(Debug, Clone, PartialEq)]
pub struct EquationStack {
    flavor: StackFlavor,
    tokens: Vec<Token>,
}

impl EquationStack {
    pub fn new(flavor: StackFlavor, tokens: Vec<Token>) -> Self {
        Self { flavor, tokens }
    }

    pub fn postfix(tokens: Vec<Token>) -> Self {
        Self::new(StackFlavor::Postfix, tokens)
    }

    pub fn infix(tokens: Vec<Token>) -> Self {
        Self::new(StackFlavor::Infix, tokens)
    }

    pub fn flavor(&self) -> StackFlavor {
        self.flavor
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    /// Distinct element references, in order of first appearance.
    pub fn references(&self) -> Vec<ElementRef> {
        let mut out: Vec<ElementRef> = Vec::new();
        for r in self.tokens.iter().filter_map(Token::reference) {
            if !out.contains(&r) {
                out.push(r);
            }
        }
        out
    }

    /// Postfix stacks render space separated (`2 3 4 * +`); infix stacks
    /// render with formula spacing (`sum(col 2) * 2`).
    pub fn render(&self, namer: &dyn ReferenceNamer) -> String {
        match self.flavor {
            StackFlavor::Postfix => self
                .tokens
                .iter()
                .map(|t| t.render(namer))
                .collect::<Vec<_>>()
                .join(" "),
            StackFlavor::Infix => render_infix_tokens(&self.tokens, namer),
        }
    }
}

fn render_infix_tokens(tokens: &[Token], namer: &dyn ReferenceNamer) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for token in tokens {
        let tight = match (prev, token) {
            (None, _) => true,
            (_, Token::RightParen | Token::Comma) => true,
            (Some(Token::LeftParen), _) => true,
            (Some(Token::Operator(op)), next) => match op.token_type() {
                // symbolic prefix operators hug their operand
                TokenType::UnaryOp => !op.symbol().starts_with(|c: char| c.is_alphabetic()),
                // function name directly followed by its argument list
                t => t.is_function() && matches!(next, Token::LeftParen),
            },
            _ => false,
        };
        if !tight {
            out.push(' ');
        }
        out.push_str(&token.render(namer));
        prev = Some(token);
    }
    out
}

impl Display for EquationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&IdNamer))
    }
}

impl<'a> IntoIterator for &'a EquationStack {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}
