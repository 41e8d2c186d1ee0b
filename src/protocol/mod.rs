//! RESP Protocol Implementation
//!
//! This module provides the wire-format layer of the client: typed RESP
//! values, command framing, and an incremental reply decoder.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe protocol used by Redis and compatible
//! key-value stores. A client sends commands as arrays of bulk strings
//! and receives typed replies in strict submission order.
//!
//! The connection layer treats this module as a black box: it feeds raw
//! inbound bytes to [`RespParser`] and gets back typed [`RespValue`]
//! replies, without interpreting them beyond the error prefix.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum, serialization, and command framing
//! - `parser`: Incremental decoder for the inbound reply stream
//!
//! ## Example
//!
//! ```ignore
//! use kvpipe::protocol::{encode_command, parse_message, RespValue};
//!
//! // Framing an outgoing command
//! let frame = encode_command(&[b"GET", b"name"]);
//!
//! // Decoding an incoming reply
//! let data = b"$4\r\nAriz\r\n";
//! let (reply, consumed) = parse_message(data).unwrap().unwrap();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::{encode_command, RespValue};
