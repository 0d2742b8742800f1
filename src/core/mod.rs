//! Core types, constants, errors and the native engine boundary.

pub mod completion;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use completion::*;
pub use constants::*;
pub use error::*;
pub use traits::*;
pub use types::*;
