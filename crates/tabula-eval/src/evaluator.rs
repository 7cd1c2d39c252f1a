//! Postfix stack machine.
//!
//! Operands and references are pushed; an operator of arity `n` pops the
//! `n` most recent entries (left to right), is applied, and its result is
//! pushed. Evaluation never fails with `Err`: structural problems, type
//! mismatches and numeric edge cases come back as [`Token::Error`], and an
//! asynchronous operator that defers stops the run with [`Token::Pending`].
//! Nothing here writes to a table.

use std::sync::Arc;

use smallvec::SmallVec;
use tabula_common::{DataType, ElementRef, ErrorCode, Value};

use crate::operator::{OpCaps, Operator, OperatorContext};
use crate::registry::Registry;
use crate::token::{EquationStack, IdNamer, StackFlavor, Token, TransactionId};

type Args = SmallVec<[Token; 4]>;

pub struct Evaluator<'r> {
    registry: &'r Registry,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn evaluate(&self, stack: &EquationStack, ctx: &dyn OperatorContext) -> Token {
        if stack.flavor() != StackFlavor::Postfix {
            return Token::Error(ErrorCode::InvalidOperand);
        }
        let mut operands: Vec<Token> = Vec::with_capacity(stack.len());
        for token in stack {
            match token {
                Token::Operator(op) => {
                    let arity = op.arity();
                    if operands.len() < arity {
                        return Token::Error(ErrorCode::StackUnderflow);
                    }
                    let args: Args = operands.drain(operands.len() - arity..).collect();
                    let result = self.apply(op, args, ctx);
                    if result.is_pending() {
                        return result;
                    }
                    operands.push(result);
                }
                Token::Comma | Token::LeftParen | Token::RightParen => {
                    return Token::Error(ErrorCode::InvalidOperand);
                }
                other => operands.push(other.clone()),
            }
        }
        match operands.len() {
            0 => Token::Error(ErrorCode::StackUnderflow),
            1 => match operands.pop() {
                Some(Token::Reference(r)) => ctx.resolve(&r),
                Some(result) => result,
                None => Token::Error(ErrorCode::StackUnderflow),
            },
            _ => Token::Error(ErrorCode::StackOverflow),
        }
    }

    fn apply(&self, op: &Arc<dyn Operator>, mut args: Args, ctx: &dyn OperatorContext) -> Token {
        let declared = op.arg_types();
        for (i, arg) in args.iter_mut().enumerate() {
            let wants_reference = declared.get(i) == Some(&DataType::Reference);
            if let (Token::Reference(r), false) = (&*arg, wants_reference) {
                *arg = ctx.resolve(r);
            }
        }

        let caps = op.caps();
        if !caps.contains(OpCaps::ALLOW_ERRORS) {
            if let Some(e) = args.iter().find_map(Token::error) {
                return Token::Error(e);
            }
        }
        if !caps.contains(OpCaps::ALLOW_NULLS) && args.iter().any(Token::is_null) {
            return Token::Null;
        }

        let op = self.overload_for(op, &args).unwrap_or_else(|| Arc::clone(op));
        let key = memo_key(&op, &args);
        if op.caps().contains(OpCaps::ASYNC) {
            if let Some(memo) = ctx.memoized(&key) {
                return memo;
            }
        }

        match op.evaluate(&args, ctx) {
            Token::Operand(Value::Number(n)) if n.is_nan() => Token::Error(ErrorCode::NaN),
            Token::Operand(Value::Number(n)) if n.is_infinite() => {
                Token::Error(ErrorCode::Infinity)
            }
            Token::Pending(p) if op.caps().contains(OpCaps::ASYNC) => {
                Token::Pending(p.stamped(ctx.transaction(), &key))
            }
            Token::Pending(_) => Token::Error(ErrorCode::InvalidPendingOperator),
            result => result,
        }
    }

    /// A user overload registered for exactly these argument types.
    fn overload_for(&self, op: &Arc<dyn Operator>, args: &[Token]) -> Option<Arc<dyn Operator>> {
        let symbol = op.overload_symbol()?;
        if self.registry.overload_count() == 0 {
            return None;
        }
        let types: Option<SmallVec<[DataType; 4]>> = args.iter().map(Token::data_type).collect();
        self.registry.find_overload(symbol, &types?)
    }
}

/// Identity of one operator invocation: `label(arg, ...)`.
pub fn memo_key(op: &Arc<dyn Operator>, args: &[Token]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.render(&IdNamer)).collect();
    format!("{}({})", op.label(), rendered.join(", "))
}

/// Context for evaluating formulas that reference no table.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticContext {
    transaction: TransactionId,
}

impl StaticContext {
    pub fn with_transaction(transaction: TransactionId) -> Self {
        Self { transaction }
    }
}

impl OperatorContext for StaticContext {
    fn transaction(&self) -> TransactionId {
        self.transaction
    }

    fn resolve(&self, _element: &ElementRef) -> Token {
        Token::Error(ErrorCode::ReferenceRequired)
    }

    fn values(&self, _element: &ElementRef) -> Result<Vec<Option<Value>>, ErrorCode> {
        Err(ErrorCode::ReferenceRequired)
    }

    fn position(&self, _element: &ElementRef) -> Option<usize> {
        None
    }
}
