//! Canonical infix form of a postfix stack.
//!
//! Rebuilt from the postfix tokens so that redundant parentheses disappear
//! and function calls are always written `label(args)`. Recompiling the
//! rendered text yields the same postfix stack.

use std::sync::Arc;

use super::CompileError;
use crate::operator::{OpCaps, Operator};
use crate::token::{EquationStack, StackFlavor, Token, TokenType};

/// Priority of atoms and function calls; never parenthesised.
const ATOM: u8 = u8::MAX;

struct Fragment {
    tokens: Vec<Token>,
    priority: u8,
}

impl Fragment {
    fn atom(token: Token) -> Self {
        Self {
            tokens: vec![token],
            priority: ATOM,
        }
    }

    fn wrapped(self, wrap: bool) -> Vec<Token> {
        if !wrap {
            return self.tokens;
        }
        let mut out = Vec::with_capacity(self.tokens.len() + 2);
        out.push(Token::LeftParen);
        out.extend(self.tokens);
        out.push(Token::RightParen);
        out
    }
}

pub fn canonical_infix(postfix: &EquationStack) -> Result<EquationStack, CompileError> {
    if postfix.flavor() != StackFlavor::Postfix {
        return Err(CompileError::new("expected a postfix stack", 0));
    }
    let mut stack: Vec<Fragment> = Vec::new();
    for (i, token) in postfix.iter().enumerate() {
        let Token::Operator(op) = token else {
            stack.push(Fragment::atom(token.clone()));
            continue;
        };
        let arity = op.arity();
        if stack.len() < arity {
            return Err(CompileError::new(
                format!("'{}' is missing operands", op.label()),
                i,
            ));
        }
        let args = stack.split_off(stack.len() - arity);
        stack.push(apply(op, args));
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(EquationStack::infix(root.tokens)),
        _ => Err(CompileError::new(
            "stack does not reduce to a single expression",
            postfix.len(),
        )),
    }
}

fn apply(op: &Arc<dyn Operator>, args: Vec<Fragment>) -> Fragment {
    let priority = op.priority();
    let token = Token::Operator(Arc::clone(op));
    match op.token_type() {
        TokenType::BinaryOp => match <[Fragment; 2]>::try_from(args) {
            Ok([lhs, rhs]) => {
                let right_assoc = op.caps().contains(OpCaps::RIGHT_ASSOC);
                let wrap_left = lhs.priority < priority || (lhs.priority == priority && right_assoc);
                let wrap_right =
                    rhs.priority < priority || (rhs.priority == priority && !right_assoc);
                let mut tokens = lhs.wrapped(wrap_left);
                tokens.push(token);
                tokens.extend(rhs.wrapped(wrap_right));
                Fragment { tokens, priority }
            }
            Err(args) => call(token, args),
        },
        TokenType::UnaryOp => match <[Fragment; 1]>::try_from(args) {
            Ok([operand]) => {
                let wrap = operand.priority < priority;
                let mut tokens = vec![token];
                tokens.extend(operand.wrapped(wrap));
                Fragment { tokens, priority }
            }
            Err(args) => call(token, args),
        },
        _ => call(token, args),
    }
}

/// `label(arg, arg, ...)`
fn call(token: Token, args: Vec<Fragment>) -> Fragment {
    let mut tokens = vec![token, Token::LeftParen];
    for (i, arg) in args.into_iter().enumerate() {
        if i > 0 {
            tokens.push(Token::Comma);
        }
        tokens.extend(arg.tokens);
    }
    tokens.push(Token::RightParen);
    Fragment {
        tokens,
        priority: ATOM,
    }
}
