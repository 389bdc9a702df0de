//! Repository implementations for database operations

pub mod bots;
pub mod operations;
pub mod signals;

pub use bots::*;
pub use operations::*;
pub use signals::*;
