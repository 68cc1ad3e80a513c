//! Wire protocol for the tally transaction sync server.
//!
//! A single JSON envelope covers the RPC request/response cycle and the
//! server-initiated event push used for live scrape progress.

mod envelope;

pub use envelope::{
    decode_message, encode_message, error_codes, Event, Message, Request, Response, RpcError,
};
