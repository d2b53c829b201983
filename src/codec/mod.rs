//! Content negotiation: media ranges, codecs, and the registry
//!
//! A codec is a capability record (payload kind + media ranges) plus a
//! conversion function. The registry holds readers and writers in
//! registration order and is frozen after startup; negotiation selects the
//! most specific compatible codec, with earlier registrations winning ties.

mod media_type;
mod registry;

pub use media_type::{parse_accept, MediaRange};
pub use registry::{
    CodecError, CodecRegistry, CodecResult, EncodedBody, NegotiatedWriter, Payload, PayloadKind,
    Reader, Writer,
};
