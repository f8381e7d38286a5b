//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod hash;

pub use error::ShardKvError;
pub use hash::fnv1a_32;
pub use print::{logger_init, IDENT};
