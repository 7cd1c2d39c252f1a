pub mod lexer;
pub mod reference;

pub use lexer::{LexError, Lexeme, LexemeKind, Lexer, quote_text};
pub use reference::{column_letters, parse_a1, reference_prefix};

// Re-export common types
pub use tabula_common::{ElementKind, ErrorCode, Value};
