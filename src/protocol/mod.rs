//! Wire protocol: the signed envelope and its stream framing

pub mod codec;
pub mod envelope;

pub use codec::{encode_frame, EnvelopeReader, EnvelopeWriter, DEFAULT_MAX_FRAME_LEN};
pub use envelope::Envelope;
