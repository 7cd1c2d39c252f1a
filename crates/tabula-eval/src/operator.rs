//! The operator contract and user-defined operators.

use std::fmt::{self, Debug};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabula_common::{DataType, ElementRef, ErrorCode, Value};

use crate::token::{Pending, Token, TokenType, TransactionId};

bitflags::bitflags! {
    /// Evaluation properties of an operator.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct OpCaps: u8 {
        /// Same arguments, same result.
        const PURE        = 0b0000_0001;
        /// Result may change between evaluations (`rand`, `now`).
        const VOLATILE    = 0b0000_0010;
        /// Null arguments are passed through instead of short-circuiting to null.
        const ALLOW_NULLS = 0b0000_0100;
        /// Error arguments are passed through instead of propagating.
        const ALLOW_ERRORS = 0b0000_1000;
        /// May return a pending result completed later by the coordinator.
        const ASYNC       = 0b0001_0000;
        /// Binary operator groups right to left (`^`).
        const RIGHT_ASSOC = 0b0010_0000;
    }
}

/// What an operator can ask of the evaluation it runs in.
pub trait OperatorContext {
    /// Transaction assigned to this evaluation; stamped on pending results.
    fn transaction(&self) -> TransactionId;

    /// Scalar value of a reference at the current evaluation position.
    fn resolve(&self, element: &ElementRef) -> Token;

    /// Every value an element spans, in table order. Empty cells are `None`.
    fn values(&self, element: &ElementRef) -> Result<Vec<Option<Value>>, ErrorCode>;

    /// Index of the current evaluation position within [`values`](Self::values).
    fn position(&self, element: &ElementRef) -> Option<usize>;

    /// Previously delivered result of an asynchronous operator call.
    fn memoized(&self, _key: &str) -> Option<Token> {
        None
    }

    fn now(&self) -> DateTime<Utc> {
        #[cfg(feature = "system-clock")]
        {
            Utc::now()
        }
        #[cfg(not(feature = "system-clock"))]
        {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

/// An operator, function, or statistical operation usable in a derivation.
///
/// Operators receive their arguments already resolved: references are
/// replaced by values unless the declared argument type is
/// [`DataType::Reference`], errors and nulls have been handled according to
/// [`caps`](Operator::caps), and the argument count matches
/// [`arity`](Operator::arity).
pub trait Operator: Debug + Send + Sync + 'static {
    /// Canonical (lowercase) label.
    fn label(&self) -> &str;

    /// Additional labels the operator is registered under.
    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    /// How the operator is written in infix text; defaults to the label.
    fn symbol(&self) -> &str {
        self.label()
    }

    fn token_type(&self) -> TokenType;

    fn arg_types(&self) -> &[DataType];

    fn arity(&self) -> usize {
        self.arg_types().len()
    }

    fn result_type(&self) -> DataType {
        DataType::Any
    }

    /// Binding priority; larger binds tighter.
    fn priority(&self) -> u8 {
        self.token_type().default_priority()
    }

    fn caps(&self) -> OpCaps {
        OpCaps::PURE
    }

    /// Registry label under which user overloads of this operator are looked up.
    fn overload_symbol(&self) -> Option<&str> {
        None
    }

    fn evaluate(&self, args: &[Token], ctx: &dyn OperatorContext) -> Token;
}

/* ───────────────────────── argument helpers ───────────────────────── */

pub fn number_arg(token: &Token) -> Result<f64, ErrorCode> {
    match token {
        Token::Operand(Value::Number(n)) | Token::Constant { value: Value::Number(n), .. } => {
            Ok(*n)
        }
        Token::Error(e) => Err(*e),
        Token::Null => Err(ErrorCode::OperandRequired),
        Token::Reference(_) => Err(ErrorCode::ReferenceRequired),
        _ => Err(ErrorCode::OperandDataTypeMismatch),
    }
}

pub fn text_arg(token: &Token) -> Result<&str, ErrorCode> {
    match token {
        Token::Operand(Value::Text(s)) | Token::Constant { value: Value::Text(s), .. } => Ok(s),
        Token::Error(e) => Err(*e),
        Token::Null => Err(ErrorCode::OperandRequired),
        _ => Err(ErrorCode::OperandDataTypeMismatch),
    }
}

/// Booleans, and numbers read as `!= 0`.
pub fn bool_arg(token: &Token) -> Result<bool, ErrorCode> {
    match token.value() {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(*n != 0.0),
        Some(_) => Err(ErrorCode::OperandDataTypeMismatch),
        None => Err(token.error().unwrap_or(ErrorCode::OperandRequired)),
    }
}

pub fn value_arg(token: &Token) -> Result<Value, ErrorCode> {
    match token {
        Token::Operand(v) | Token::Constant { value: v, .. } => Ok(v.clone()),
        Token::Error(e) => Err(*e),
        Token::Null => Err(ErrorCode::OperandRequired),
        _ => Err(ErrorCode::InvalidOperand),
    }
}

pub fn reference_arg(token: &Token) -> Result<ElementRef, ErrorCode> {
    match token {
        Token::Reference(r) => Ok(*r),
        Token::Error(e) => Err(*e),
        _ => Err(ErrorCode::ReferenceRequired),
    }
}

/// Marshal arguments into values, checking them against declared types.
fn typed_values(args: &[Token], declared: &[DataType]) -> Result<Vec<Value>, ErrorCode> {
    args.iter()
        .zip(declared)
        .map(|(arg, ty)| {
            let value = value_arg(arg)?;
            if ty.accepts(value.data_type()) {
                Ok(value)
            } else {
                Err(ErrorCode::OperandDataTypeMismatch)
            }
        })
        .collect()
}

fn function_token_type(arity: usize) -> TokenType {
    match arity {
        1 => TokenType::UnaryFunc,
        2 => TokenType::BinaryFunc,
        _ => TokenType::GenericFunc,
    }
}

/* ───────────────────────── user operators ───────────────────────── */

pub type FunctionHandler = Arc<dyn Fn(&[Value]) -> Result<Value, ErrorCode> + Send + Sync>;

/// A synchronous operator backed by a closure.
///
/// Used both for user functions and for operator overloads; overloads set
/// their token type to `UnaryOp` or `BinaryOp` with
/// [`with_token_type`](Self::with_token_type).
#[derive(Clone)]
pub struct FunctionOperator {
    label: String,
    token_type: TokenType,
    arg_types: Vec<DataType>,
    result_type: DataType,
    priority: Option<u8>,
    caps: OpCaps,
    handler: FunctionHandler,
}

impl FunctionOperator {
    pub fn new(
        label: impl Into<String>,
        arg_types: impl Into<Vec<DataType>>,
        result_type: DataType,
        handler: impl Fn(&[Value]) -> Result<Value, ErrorCode> + Send + Sync + 'static,
    ) -> Self {
        let arg_types = arg_types.into();
        Self {
            label: label.into().to_ascii_lowercase(),
            token_type: function_token_type(arg_types.len()),
            arg_types,
            result_type,
            priority: None,
            caps: OpCaps::PURE,
            handler: Arc::new(handler),
        }
    }

    pub fn with_token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = token_type;
        self
    }

    pub fn with_caps(mut self, caps: OpCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl Debug for FunctionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionOperator")
            .field("label", &self.label)
            .field("token_type", &self.token_type)
            .field("arg_types", &self.arg_types)
            .field("result_type", &self.result_type)
            .finish()
    }
}

impl Operator for FunctionOperator {
    fn label(&self) -> &str {
        &self.label
    }

    fn token_type(&self) -> TokenType {
        self.token_type
    }

    fn arg_types(&self) -> &[DataType] {
        &self.arg_types
    }

    fn result_type(&self) -> DataType {
        self.result_type
    }

    fn priority(&self) -> u8 {
        self.priority
            .unwrap_or_else(|| self.token_type.default_priority())
    }

    fn caps(&self) -> OpCaps {
        self.caps
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        match typed_values(args, &self.arg_types).and_then(|values| (self.handler)(&values)) {
            Ok(v) => Token::operand(v),
            Err(e) => Token::Error(e),
        }
    }
}

pub type AsyncHandler = Arc<dyn Fn(Vec<Value>) -> Token + Send + Sync>;

#[derive(Clone)]
enum Completion {
    /// Computed on the pending pool.
    Job(AsyncHandler),
    /// Delivered by the embedder through `post_result`.
    External,
}

/// An operator whose result arrives asynchronously.
///
/// Evaluating it yields a [`Token::Pending`]; the cell keeps its previous
/// value until the result is posted, after which the derivation is
/// re-evaluated with the delivered value in place.
#[derive(Clone)]
pub struct AsyncOperator {
    label: String,
    arg_types: Vec<DataType>,
    result_type: DataType,
    completion: Completion,
}

impl AsyncOperator {
    pub fn new(
        label: impl Into<String>,
        arg_types: impl Into<Vec<DataType>>,
        result_type: DataType,
        handler: impl Fn(Vec<Value>) -> Token + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into().to_ascii_lowercase(),
            arg_types: arg_types.into(),
            result_type,
            completion: Completion::Job(Arc::new(handler)),
        }
    }

    pub fn external(
        label: impl Into<String>,
        arg_types: impl Into<Vec<DataType>>,
        result_type: DataType,
    ) -> Self {
        Self {
            label: label.into().to_ascii_lowercase(),
            arg_types: arg_types.into(),
            result_type,
            completion: Completion::External,
        }
    }
}

impl Debug for AsyncOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperator")
            .field("label", &self.label)
            .field("arg_types", &self.arg_types)
            .field("external", &matches!(self.completion, Completion::External))
            .finish()
    }
}

impl Operator for AsyncOperator {
    fn label(&self) -> &str {
        &self.label
    }

    fn token_type(&self) -> TokenType {
        function_token_type(self.arg_types.len())
    }

    fn arg_types(&self) -> &[DataType] {
        &self.arg_types
    }

    fn result_type(&self) -> DataType {
        self.result_type
    }

    fn caps(&self) -> OpCaps {
        OpCaps::ASYNC
    }

    fn evaluate(&self, args: &[Token], ctx: &dyn OperatorContext) -> Token {
        let values = match typed_values(args, &self.arg_types) {
            Ok(v) => v,
            Err(e) => return Token::Error(e),
        };
        let pending = match &self.completion {
            Completion::Job(handler) => {
                let handler = Arc::clone(handler);
                let job_args = values.clone();
                Pending::deferred(ctx.transaction(), values, move || handler(job_args))
            }
            Completion::External => Pending::external(ctx.transaction(), values),
        };
        Token::Pending(pending)
    }
}
