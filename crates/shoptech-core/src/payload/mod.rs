//! Structured platform payload: schema and validation.

mod parser;
pub mod schema;

pub use parser::{
    PayloadError, PlatformPayload, MAX_LIST_ENTRIES, MAX_REASONING_CHARS, MAX_SIGNAL_CHARS,
    REASONING_SENTENCES,
};
pub use schema::{payload_schema, service_schema, validate_payload_schema, SchemaError};
