//! Engine configuration constants.

mod constants;

pub use constants::*;
