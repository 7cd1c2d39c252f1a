//! Meta crate that re-exports the Tabula building blocks with sensible
//! defaults. Pick layers with feature flags; the underlying crates stay
//! reachable for deeper integration.

#[cfg(feature = "common")]
pub use tabula_common as common;

#[cfg(feature = "parse")]
pub use tabula_parse as parse;

#[cfg(feature = "eval")]
pub use tabula_eval as eval;

#[cfg(feature = "common")]
pub use tabula_common::{CustomData, DataType, ElementKind, ElementRef, ErrorCode, TableId, Value};

#[cfg(feature = "eval")]
pub use tabula_eval::{
    AssemblyId, CompileError, Engine, EngineConfig, EngineError, ParseResult, RecalcSummary,
    Registry, Token, ValueChange, ValueListener,
};
