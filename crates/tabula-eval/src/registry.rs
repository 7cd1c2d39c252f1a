//! Operator registry.
//!
//! Built-in operators live in a process-wide table built once on first use.
//! Each [`Registry`] layers user registrations and operator overloads on top
//! of it; lookups consult the overlay first, so a user operator may shadow a
//! built-in label.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tabula_common::DataType;
use thiserror::Error;

use crate::builtins;
use crate::operator::Operator;
use crate::token::{Token, TokenType};

/// Labels and argument signatures that may carry user overloads.
pub const OVERLOADABLE: [&str; 4] = ["+", "-", "*", "/"];

/// Most arguments a generic user function may declare.
pub const MAX_GENERIC_ARITY: usize = 5;

static BUILTINS: Lazy<FxHashMap<String, Token>> = Lazy::new(builtins::builtin_table);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("label '{0}' is already registered")]
    Duplicate(String),
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("'{label}' declares {declared} arguments but a {token_type:?} takes {expected}")]
    ArityMismatch {
        label: String,
        token_type: TokenType,
        declared: usize,
        expected: String,
    },
    #[error("{0:?} cannot be registered as a user operator")]
    UnsupportedTokenType(TokenType),
    #[error("'{0}' cannot be overloaded")]
    NotOverloadable(String),
    #[error("an overload of '{label}' for ({signature}) already exists")]
    DuplicateOverload { label: String, signature: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OverloadKey {
    label: String,
    arg_types: Vec<DataType>,
}

/// Label → token resolution with user registrations and overloads.
#[derive(Debug, Default)]
pub struct Registry {
    overlay: DashMap<String, Token>,
    overloads: DashMap<OverloadKey, Arc<dyn Operator>>,
    /// Held while the overlay is checked and written as one step.
    writes: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a label (case-insensitive) to its token, user registrations first.
    pub fn look_up_token(&self, label: &str) -> Option<Token> {
        let key = label.trim().to_ascii_lowercase();
        if let Some(t) = self.overlay.get(&key) {
            return Some(t.value().clone());
        }
        BUILTINS.get(&key).cloned()
    }

    pub fn is_builtin(label: &str) -> bool {
        BUILTINS.contains_key(&label.trim().to_ascii_lowercase())
    }

    /// All labels the built-in table answers to.
    pub fn builtin_labels() -> impl Iterator<Item = &'static str> {
        BUILTINS.keys().map(String::as_str)
    }

    /// Register a user operator under its label and aliases.
    ///
    /// Only `BuiltIn`, `UnaryFunc`, `BinaryFunc`, and `GenericFunc`
    /// operators may be registered; the declared arity must fit the token
    /// type. Registering a label that already has a user entry fails;
    /// shadowing a built-in is allowed.
    pub fn register_operator(&self, op: Arc<dyn Operator>) -> Result<(), RegistryError> {
        let label = op.label().trim().to_ascii_lowercase();
        if label.is_empty() {
            return Err(RegistryError::EmptyLabel);
        }
        let token_type = op.token_type();
        let expected = match token_type {
            TokenType::UnaryFunc => 1..=1,
            TokenType::BinaryFunc => 2..=2,
            TokenType::GenericFunc | TokenType::BuiltIn => 0..=MAX_GENERIC_ARITY,
            other => return Err(RegistryError::UnsupportedTokenType(other)),
        };
        if !expected.contains(&op.arity()) {
            return Err(RegistryError::ArityMismatch {
                label,
                token_type,
                declared: op.arity(),
                expected: if expected.start() == expected.end() {
                    expected.start().to_string()
                } else {
                    format!("{}..={}", expected.start(), expected.end())
                },
            });
        }
        let labels: Vec<String> = std::iter::once(label)
            .chain(op.aliases().iter().map(|a| a.to_ascii_lowercase()))
            .collect();
        let _writes = self.writes.lock();
        if let Some(taken) = labels.iter().find(|l| self.overlay.contains_key(*l)) {
            return Err(RegistryError::Duplicate(taken.clone()));
        }
        for l in labels {
            if Self::is_builtin(&l) {
                tracing::debug!(label = %l, "user operator shadows a built-in");
            }
            self.overlay.insert(l, Token::Operator(Arc::clone(&op)));
        }
        Ok(())
    }

    /// Remove a user operator along with every alias that points at it.
    pub fn deregister_operator(&self, label: &str) -> bool {
        let key = label.trim().to_ascii_lowercase();
        let _writes = self.writes.lock();
        let Some((_, token)) = self.overlay.remove(&key) else {
            return false;
        };
        if let Token::Operator(op) = token {
            self.overlay.retain(|_, t| match t {
                Token::Operator(other) => !Arc::ptr_eq(other, &op),
                _ => true,
            });
        }
        true
    }

    /// Register an overload of `+ - * /` for a specific argument signature.
    pub fn overload_operator(&self, label: &str, op: Arc<dyn Operator>) -> Result<(), RegistryError> {
        let label = label.trim().to_string();
        if !OVERLOADABLE.contains(&label.as_str()) {
            return Err(RegistryError::NotOverloadable(label));
        }
        let expected = match op.token_type() {
            TokenType::UnaryOp => 1,
            TokenType::BinaryOp => 2,
            other => return Err(RegistryError::UnsupportedTokenType(other)),
        };
        if op.arity() != expected {
            return Err(RegistryError::ArityMismatch {
                label,
                token_type: op.token_type(),
                declared: op.arity(),
                expected: expected.to_string(),
            });
        }
        let key = OverloadKey {
            label,
            arg_types: op.arg_types().to_vec(),
        };
        match self.overloads.entry(key) {
            Entry::Occupied(taken) => Err(RegistryError::DuplicateOverload {
                signature: signature(&taken.key().arg_types),
                label: taken.key().label.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(op);
                Ok(())
            }
        }
    }

    pub fn deregister_overload(&self, label: &str, arg_types: &[DataType]) -> bool {
        let key = OverloadKey {
            label: label.trim().to_string(),
            arg_types: arg_types.to_vec(),
        };
        self.overloads.remove(&key).is_some()
    }

    /// Overload registered for exactly these argument types.
    pub fn find_overload(&self, label: &str, arg_types: &[DataType]) -> Option<Arc<dyn Operator>> {
        if self.overloads.is_empty() {
            return None;
        }
        let key = OverloadKey {
            label: label.to_string(),
            arg_types: arg_types.to_vec(),
        };
        self.overloads.get(&key).map(|o| Arc::clone(o.value()))
    }

    /// Labels of all user registrations, sorted.
    pub fn user_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.overlay.iter().map(|e| e.key().clone()).collect();
        labels.sort();
        labels
    }

    pub fn overload_count(&self) -> usize {
        self.overloads.len()
    }
}

fn signature(types: &[DataType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::FunctionOperator;
    use tabula_common::Value;

    fn unary(label: &str) -> Arc<dyn Operator> {
        Arc::new(FunctionOperator::new(label, [DataType::Number], DataType::Number, |v| {
            Ok(v[0].clone())
        }))
    }

    #[test]
    fn builtins_resolve_by_label_and_alias() {
        let reg = Registry::new();
        let plus = reg.look_up_token("+").expect("plus");
        assert_eq!(plus.token_type(), TokenType::BinaryOp);
        assert_eq!(reg.look_up_token("ADD"), Some(plus));
        assert_eq!(reg.look_up_token("avg"), reg.look_up_token("mean"));
        assert_eq!(
            reg.look_up_token("pi").and_then(|t| t.value().cloned()),
            Some(Value::Number(std::f64::consts::PI))
        );
        assert_eq!(reg.look_up_token("null"), Some(Token::Null));
        assert!(reg.look_up_token("no_such_thing").is_none());
    }

    #[test]
    fn user_operators_shadow_builtins_but_not_each_other() {
        let reg = Registry::new();
        reg.register_operator(unary("abs")).unwrap();
        let abs = reg.look_up_token("abs").unwrap();
        assert!(format!("{abs:?}").contains("abs"));
        assert!(matches!(
            reg.register_operator(unary("abs")),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(reg.deregister_operator("ABS"));
        assert!(!reg.deregister_operator("abs"));
        assert!(reg.look_up_token("abs").is_some(), "built-in visible again");
    }

    #[test]
    fn arity_must_match_the_token_type() {
        let reg = Registry::new();
        let bad = FunctionOperator::new("pair", [DataType::Number], DataType::Number, |v| {
            Ok(v[0].clone())
        })
        .with_token_type(TokenType::BinaryFunc);
        assert!(matches!(
            reg.register_operator(Arc::new(bad)),
            Err(RegistryError::ArityMismatch { declared: 1, .. })
        ));
        let six = FunctionOperator::new("six", vec![DataType::Any; 6], DataType::Any, |_| {
            Ok(Value::Number(6.0))
        });
        assert!(reg.register_operator(Arc::new(six)).is_err());
        let op = FunctionOperator::new("op", [DataType::Any, DataType::Any], DataType::Any, |_| {
            Ok(Value::Number(0.0))
        })
        .with_token_type(TokenType::BinaryOp);
        assert_eq!(
            reg.register_operator(Arc::new(op)),
            Err(RegistryError::UnsupportedTokenType(TokenType::BinaryOp))
        );
    }

    #[test]
    fn overloads_are_keyed_by_signature() {
        let reg = Registry::new();
        let money = [DataType::Custom("money"), DataType::Custom("money")];
        let add = FunctionOperator::new("+", money, DataType::Custom("money"), |v| Ok(v[0].clone()))
            .with_token_type(TokenType::BinaryOp);
        let add: Arc<dyn Operator> = Arc::new(add);
        reg.overload_operator("+", Arc::clone(&add)).unwrap();
        assert!(reg.find_overload("+", &money).is_some());
        assert!(reg.find_overload("+", &[DataType::Number, DataType::Number]).is_none());
        assert!(matches!(
            reg.overload_operator("+", add),
            Err(RegistryError::DuplicateOverload { .. })
        ));
        assert!(matches!(
            reg.overload_operator("^", unary("x")),
            Err(RegistryError::NotOverloadable(_))
        ));
        assert!(reg.deregister_overload("+", &money));
        assert_eq!(reg.overload_count(), 0);
    }

    #[test]
    fn concurrent_registrations_of_one_label_admit_one() {
        let reg = Registry::new();
        let start = std::sync::Barrier::new(4);
        let admitted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        start.wait();
                        reg.register_operator(unary("twice")).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(false))
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, 1);
        assert_eq!(reg.user_labels(), vec!["twice".to_string()]);
    }

    #[test]
    fn concurrent_overloads_of_one_signature_admit_one() {
        let reg = Registry::new();
        let start = std::sync::Barrier::new(4);
        let admitted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let neg = FunctionOperator::new("-", [DataType::Boolean], DataType::Boolean, |v| {
                            Ok(v[0].clone())
                        })
                        .with_token_type(TokenType::UnaryOp);
                        start.wait();
                        reg.overload_operator("-", Arc::new(neg)).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(false))
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, 1);
        assert_eq!(reg.overload_count(), 1);
    }
}
