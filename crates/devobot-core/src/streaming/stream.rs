use std::pin::Pin;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::decoder::JsonObjectDecoder;
use crate::error::ClientError;
use crate::models::Envelope;

/// Lazily decoded envelopes of one send/edit response. Consumed once.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope, ClientError>>;

struct DecodeState<S, T> {
    source: Pin<Box<S>>,
    decoder: JsonObjectDecoder<T>,
    finished: bool,
}

/// Decode a stream of raw byte chunks into a stream of JSON values.
///
/// Values are produced in arrival order. Malformed fragments are dropped;
/// a transport error is yielded once and ends the stream. Dropping the
/// returned stream releases the source without reading it to the end.
pub fn decode_stream<S, B, E, T>(source: S) -> impl Stream<Item = Result<T, ClientError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ClientError>,
    T: DeserializeOwned,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: JsonObjectDecoder::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(value) = state.decoder.next_object() {
                return Some((Ok(value), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => state.decoder.push(chunk.as_ref()),
                Some(Err(err)) => {
                    let err: ClientError = err.into();
                    state.finished = true;
                    state.decoder.discard();
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    let last = state.decoder.finish();
                    return last.map(|value| (Ok(value), state));
                }
            }
        }
    })
}

/// Envelope stream over an HTTP response body
pub fn envelope_stream(response: reqwest::Response) -> EnvelopeStream {
    decode_stream(response.bytes_stream()).boxed()
}
