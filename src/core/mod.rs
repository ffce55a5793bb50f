pub mod error;
pub mod types;
pub mod value;

pub use error::{MirrorError, ReconcileError, Result};
pub use types::{FieldType, Record};
pub use value::Value;
