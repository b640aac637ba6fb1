pub mod decoder;
pub mod stream;

pub use decoder::{decode_iter, find_object_end, DecodeIter, JsonObjectDecoder};
pub use stream::{decode_stream, EnvelopeStream};
