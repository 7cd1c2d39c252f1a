//! Derivations for Tabula tables: an operator registry, a compiler from
//! infix text to postfix equation stacks, a stack evaluator, and an engine
//! that keeps derived rows, columns, and cells up to date as their inputs
//! change.

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod derivation;
pub mod engine;
pub mod evaluator;
pub mod listener;
pub mod operator;
pub mod registry;
pub mod table;
pub mod token;

mod periodic;
mod pool;

pub use compiler::{CompileError, Compiler, ParseResult, ReferenceResolver};
pub use config::{EngineConfig, PoolConfig};
pub use derivation::{Derivation, DerivationOptions, Read};
pub use engine::{AssemblyId, Engine, EngineError, RecalcSummary};
pub use evaluator::Evaluator;
pub use listener::{ListenerId, ValueChange, ValueListener};
pub use operator::{AsyncOperator, FunctionOperator, OpCaps, Operator, OperatorContext};
pub use registry::{Registry, RegistryError};
pub use table::Table;
pub use token::{EquationStack, Pending, Token, TokenType, TransactionId};
