pub mod element;
pub mod error;
pub mod value;

pub use element::*;
pub use error::*;
pub use value::*;
