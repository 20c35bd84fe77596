//! RESP (Redis Serialization Protocol) implementation.
//!
//! Supports the RESP2 subset used by this server: simple strings, bulk
//! strings and arrays on input; status, bulk, null and error replies.

pub mod handler;
pub mod parser;

pub use handler::RespHandler;
pub use parser::{parse, Frame, ParseResult, ProtocolError};
