//! # Value and Type System
//!
//! Column data types and runtime values for the row engine. The type enum
//! is fieldless; length limits live on the column definition so that two
//! `VARCHAR` columns of different lengths share a type.
//!
//! Values carry a total order (`compare_values`) used by every ordered
//! index: SQL nulls sort low, numbers compare across integer/double class,
//! text compares binary. The order must be total and stable because index
//! nodes are positioned by it.

mod data_type;
mod value;

pub use data_type::DataType;
pub use value::{compare_values, Value};
