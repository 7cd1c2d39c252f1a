use rayon::ThreadPoolBuildError;
use tabula_common::{ElementRef, TableId};
use thiserror::Error;

use crate::compiler::CompileError;
use crate::coordinator::CoordinatorError;
use crate::registry::RegistryError;

/// Failures of engine operations.
///
/// Evaluation problems are not reported here: they end up as error values
/// in the affected cells.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no table {0}")]
    UnknownTable(TableId),
    #[error("no element {0}")]
    UnknownElement(ElementRef),
    #[error("{0} cannot carry a derivation")]
    NotDerivable(ElementRef),
    #[error("{0} is not a cell")]
    NotACell(ElementRef),
    #[error("{0} cannot be deleted on its own")]
    NotDeletable(ElementRef),
    /// The expression was rejected; the previous derivation is untouched.
    #[error("derivation rejected: {0}")]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("could not start worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
    #[error("could not start periodic scheduler: {0}")]
    Spawn(#[from] std::io::Error),
}

impl EngineError {
    /// The compile failure behind a rejected derivation, if that is what this is.
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            EngineError::Compile(e) => Some(e),
            _ => None,
        }
    }
}
