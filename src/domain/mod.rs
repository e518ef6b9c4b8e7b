//! Domain types shared across ferry.
//!
//! - Value: scalar cells and row records
//! - Table: reshaped output ready for export

pub mod table;
pub mod value;

// Re-export commonly used types
pub use table::Table;
pub use value::{Row, Value};
