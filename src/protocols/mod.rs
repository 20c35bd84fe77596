//! Protocol implementations.
//!
//! - `resp`: Redis RESP protocol for cache operations

pub mod resp;
