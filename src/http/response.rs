//! Response relay.
//!
//! # Responsibilities
//! - Copy upstream status and headers verbatim
//! - Decide between streamed and buffered delivery
//! - Stream payloads in bounded chunks, touching the activity clock per chunk
//!
//! # Design Decisions
//! - Streamed and buffered delivery both go through a body stream; hyper
//!   writes each frame as soon as it is polled, and the next upstream chunk
//!   is only read after the previous one was written (natural backpressure)
//! - Streamed delivery re-chunks to at most [`STREAM_CHUNK_BYTES`] and counts
//!   as traffic, so a long SSE stream keeps the backend alive
//! - Buffered delivery is a single pass-through copy with no activity updates

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use futures_util::{stream, Stream, TryStreamExt};

use crate::lifecycle::ActivityClock;

/// Largest chunk written to the client in one flush when streaming.
pub const STREAM_CHUNK_BYTES: usize = 1024;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// How a response body is delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Bounded chunks, flushed one by one.
    Streamed,
    /// One pass-through copy.
    Buffered,
}

impl Delivery {
    pub fn for_headers(headers: &HeaderMap) -> Self {
        if is_streaming(headers) {
            Delivery::Streamed
        } else {
            Delivery::Buffered
        }
    }
}

/// Whether upstream headers announce an incremental payload.
pub fn is_streaming(headers: &HeaderMap) -> bool {
    if content_type_contains(headers, "text/event-stream") {
        return true;
    }

    let chunked = has_token(headers, &TRANSFER_ENCODING, "chunked");

    if content_type_contains(headers, "application/json")
        && (chunked || has_token(headers, &X_ACCEL_BUFFERING, "no"))
    {
        return true;
    }

    if chunked {
        return true;
    }

    has_token(headers, &CACHE_CONTROL, "no-cache") && has_token(headers, &CONNECTION, "keep-alive")
}

fn content_type_contains(headers: &HeaderMap, needle: &str) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains(needle))
        .unwrap_or(false)
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Turn an upstream response into the client response.
pub fn relay(upstream: reqwest::Response, clock: Arc<ActivityClock>) -> (Response, Delivery) {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let delivery = Delivery::for_headers(&headers);

    let body_stream = upstream
        .bytes_stream()
        .inspect_err(|e| tracing::warn!(error = %e, "Error relaying response body"));

    let body = match delivery {
        Delivery::Streamed => Body::from_stream(bounded_chunks(body_stream, clock)),
        Delivery::Buffered => Body::from_stream(body_stream),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    (response, delivery)
}

/// Split upstream chunks to at most [`STREAM_CHUNK_BYTES`] and record
/// activity for every chunk handed to the client.
pub fn bounded_chunks<S, E>(
    upstream: S,
    clock: Arc<ActivityClock>,
) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    upstream
        .map_ok(|chunk| stream::iter(split_chunk(chunk).into_iter().map(Ok::<Bytes, E>)))
        .try_flatten()
        .inspect_ok(move |_| clock.touch())
}

fn split_chunk(mut chunk: Bytes) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(chunk.len().div_ceil(STREAM_CHUNK_BYTES));
    while chunk.len() > STREAM_CHUNK_BYTES {
        pieces.push(chunk.split_to(STREAM_CHUNK_BYTES));
    }
    if !chunk.is_empty() {
        pieces.push(chunk);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use futures_util::StreamExt;
    use std::convert::Infallible;
    use std::time::Duration;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn event_stream_is_always_streamed() {
        assert!(is_streaming(&headers(&[("content-type", "text/event-stream")])));
        assert!(is_streaming(&headers(&[(
            "content-type",
            "text/event-stream; charset=utf-8"
        )])));
    }

    #[test]
    fn plain_json_is_buffered() {
        let h = headers(&[("content-type", "application/json"), ("content-length", "42")]);
        assert!(!is_streaming(&h));
        assert_eq!(Delivery::for_headers(&h), Delivery::Buffered);
    }

    #[test]
    fn json_with_streaming_signals_is_streamed() {
        assert!(is_streaming(&headers(&[
            ("content-type", "application/json"),
            ("x-accel-buffering", "no"),
        ])));
        assert!(is_streaming(&headers(&[
            ("content-type", "application/json"),
            ("transfer-encoding", "chunked"),
        ])));
    }

    #[test]
    fn chunked_alone_is_streamed() {
        assert!(is_streaming(&headers(&[("transfer-encoding", "gzip, chunked")])));
    }

    #[test]
    fn no_cache_needs_keep_alive() {
        assert!(!is_streaming(&headers(&[("cache-control", "no-cache")])));
        assert!(is_streaming(&headers(&[
            ("cache-control", "no-cache"),
            ("connection", "Keep-Alive"),
        ])));
    }

    #[test]
    fn no_buffering_without_json_is_buffered() {
        assert!(!is_streaming(&headers(&[
            ("content-type", "text/html"),
            ("x-accel-buffering", "no"),
        ])));
    }

    #[test]
    fn split_chunk_bounds_sizes() {
        let pieces = split_chunk(Bytes::from(vec![7u8; 2500]));
        let sizes: Vec<_> = pieces.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
        assert!(split_chunk(Bytes::new()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_chunks_touch_clock_per_chunk() {
        let clock = Arc::new(ActivityClock::new());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.idle_for(), Duration::from_secs(30));

        let upstream = stream::iter(vec![
            Ok::<_, Infallible>(Bytes::from_static(b"data: one\n\n")),
            Ok(Bytes::from(vec![b'x'; 1500])),
        ]);
        let mut chunks = Box::pin(bounded_chunks(upstream, clock.clone()));

        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"data: one\n\n");
        assert_eq!(clock.idle_for(), Duration::ZERO);

        let rest: Vec<Bytes> = chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(rest.iter().map(Bytes::len).collect::<Vec<_>>(), vec![1024, 476]);
    }
}
