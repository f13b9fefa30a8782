//! GELF encoding and delivery
//!
//! [`GelfMessage`] turns a flattened audit record into a GELF 1.1 payload;
//! a [`Transport`] delivers it. [`UdpTransport`] is the stock transport.

pub mod message;
pub mod transport;

pub use message::GelfMessage;
pub use transport::{chunk_payload, GelfHost, Transport, UdpTransport, DEFAULT_HOST, DEFAULT_PORT, MAX_CHUNKS};
