pub mod accumulator;
pub mod decoder;
pub mod framer;
pub mod wire;

pub use accumulator::{snapshot_stream, MessageAccumulator};
pub use decoder::{decode_envelope_line, decode_wire_line, event_stream};
pub use framer::{line_stream, LineFramer};
pub use wire::{reencode_line, split_wire_line, Envelope};
