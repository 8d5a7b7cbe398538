pub mod error;
pub mod types;

pub use error::{DataError, Result};
pub use types::{CommonFields, DataAction, EntityKind, Field, fields};
