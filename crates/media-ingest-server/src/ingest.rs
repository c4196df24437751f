//! Frame accumulation and finalization for ingest sessions.
//!
//! Transport-facing pieces live in `api::ingest`; this module holds the
//! per-session buffer, the stop conditions, and the handoff to the store.

use std::fmt;
use std::sync::Arc;

use actix_http::ws::Item;
use actix_web::web::{self, Bytes};
use actix_web_actors::ws;

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::MediaStore;

/// Text payload a client sends to end a stream gracefully.
pub const STOP_SENTINEL: &str = "StreamingStopped";

/// Default codec frame limit (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Resource limits applied to every ingest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Largest single websocket frame accepted by the codec.
    pub max_frame_bytes: usize,
    /// Optional cap on the accumulated buffer; `None` means unbounded.
    pub max_buffer_bytes: Option<usize>,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_buffer_bytes: None,
        }
    }
}

/// Why a session left the streaming state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Client sent the stop sentinel.
    Sentinel,
    /// Client sent a close frame.
    PeerClosed { reason: Option<String> },
    /// Frame stream ended without a close frame.
    Disconnected,
    /// Read or protocol failure on the connection.
    ReadError(String),
    /// Appending a message would exceed the configured buffer cap.
    BufferOverflow { limit: usize, attempted: usize },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Sentinel => write!(f, "streaming stopped by client"),
            StopReason::PeerClosed { reason: Some(reason) } => {
                write!(f, "peer closed connection: {reason}")
            }
            StopReason::PeerClosed { reason: None } => write!(f, "peer closed connection"),
            StopReason::Disconnected => write!(f, "connection dropped"),
            StopReason::ReadError(err) => write!(f, "error reading message from client: {err}"),
            StopReason::BufferOverflow { limit, attempted } => write!(
                f,
                "buffer overflow: {attempted} bytes exceeds limit of {limit} bytes"
            ),
        }
    }
}

/// Result of feeding one frame into an [`IngestBuffer`].
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Pong(Bytes),
    Stop(StopReason),
}

/// In-progress fragmented message.
struct Fragment {
    data: Vec<u8>,
}

/// Accumulated media bytes for a single session.
pub struct IngestBuffer {
    data: Vec<u8>,
    total_len: u64,
    max_bytes: Option<usize>,
    fragment: Option<Fragment>,
}

impl IngestBuffer {
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            total_len: 0,
            max_bytes,
            fragment: None,
        }
    }

    /// Sum of accepted message lengths.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Feed one item from the websocket stream.
    pub fn accept(&mut self, item: Result<ws::Message, ws::ProtocolError>) -> FrameOutcome {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => return FrameOutcome::Stop(StopReason::ReadError(err.to_string())),
        };
        match msg {
            ws::Message::Binary(bytes) => self.accept_message(&bytes),
            ws::Message::Text(text) => self.accept_message(text.as_bytes()),
            ws::Message::Continuation(item) => self.accept_fragment(item),
            ws::Message::Ping(bytes) => FrameOutcome::Pong(bytes),
            ws::Message::Pong(_) | ws::Message::Nop => FrameOutcome::Continue,
            ws::Message::Close(reason) => FrameOutcome::Stop(StopReason::PeerClosed {
                reason: reason.and_then(|r| r.description),
            }),
        }
    }

    fn accept_fragment(&mut self, item: Item) -> FrameOutcome {
        match item {
            Item::FirstText(bytes) | Item::FirstBinary(bytes) => {
                if self.fragment.is_some() {
                    return protocol_error("continuation already started");
                }
                if !could_be_sentinel(&[], &bytes) {
                    if let Some(stop) = self.check_capacity(bytes.len()) {
                        return stop;
                    }
                }
                self.fragment = Some(Fragment {
                    data: bytes.to_vec(),
                });
                FrameOutcome::Continue
            }
            Item::Continue(bytes) => {
                let Some(fragment) = self.fragment.as_ref() else {
                    return protocol_error("continuation not started");
                };
                if !could_be_sentinel(&fragment.data, &bytes) {
                    if let Some(stop) = self.check_capacity(fragment.data.len() + bytes.len()) {
                        return stop;
                    }
                }
                if let Some(fragment) = self.fragment.as_mut() {
                    fragment.data.extend_from_slice(&bytes);
                }
                FrameOutcome::Continue
            }
            Item::Last(bytes) => {
                let Some(mut fragment) = self.fragment.take() else {
                    return protocol_error("continuation not started");
                };
                fragment.data.extend_from_slice(&bytes);
                self.accept_message(&fragment.data)
            }
        }
    }

    fn accept_message(&mut self, payload: &[u8]) -> FrameOutcome {
        if payload == STOP_SENTINEL.as_bytes() {
            return FrameOutcome::Stop(StopReason::Sentinel);
        }
        if let Some(stop) = self.check_capacity(payload.len()) {
            return stop;
        }
        self.data.extend_from_slice(payload);
        self.total_len += payload.len() as u64;
        FrameOutcome::Continue
    }

    fn check_capacity(&self, incoming: usize) -> Option<FrameOutcome> {
        let limit = self.max_bytes?;
        let attempted = self.data.len().saturating_add(incoming);
        (attempted > limit).then(|| FrameOutcome::Stop(StopReason::BufferOverflow { limit, attempted }))
    }
}

/// True while `head` followed by `tail` can still complete to the stop sentinel.
fn could_be_sentinel(head: &[u8], tail: &[u8]) -> bool {
    let sentinel = STOP_SENTINEL.as_bytes();
    head.len() + tail.len() <= sentinel.len()
        && sentinel.starts_with(head)
        && sentinel[head.len()..].starts_with(tail)
}

fn protocol_error(detail: &str) -> FrameOutcome {
    FrameOutcome::Stop(StopReason::ReadError(format!("protocol violation: {detail}")))
}

/// Unregister the connection and take its buffered bytes.
pub fn close_session(
    id: ConnectionId,
    registry: &ConnectionRegistry,
    buffer: IngestBuffer,
) -> Vec<u8> {
    registry.unregister(id);
    tracing::info!(
        connection_id = %id,
        total_len = buffer.total_len(),
        "total length of media data received"
    );
    buffer.into_bytes()
}

/// Write a finished session's bytes to the store on the blocking pool.
///
/// A persist failure is logged; the buffered data is dropped.
pub async fn persist_session(id: ConnectionId, store: Arc<MediaStore>, data: Vec<u8>) {
    let bytes = data.len();
    let path = store.path().to_path_buf();
    match web::block(move || store.persist(&data)).await {
        Ok(Ok(())) => tracing::info!(
            connection_id = %id,
            path = %path.display(),
            bytes,
            "media data saved"
        ),
        Ok(Err(err)) => tracing::error!(
            connection_id = %id,
            error = %err,
            "error saving media data to file"
        ),
        Err(err) => tracing::error!(
            connection_id = %id,
            error = %err,
            "media persist task failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(bytes: &'static [u8]) -> Result<ws::Message, ws::ProtocolError> {
        Ok(ws::Message::Binary(Bytes::from_static(bytes)))
    }

    fn text(text: &'static str) -> Result<ws::Message, ws::ProtocolError> {
        Ok(ws::Message::Text(text.into()))
    }

    fn temp_store(label: &str) -> MediaStore {
        let root = std::env::temp_dir().join(format!(
            "media-ingest-server-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        MediaStore::new(root.join("media_data.raw"))
    }

    #[test]
    fn binary_frames_concatenate_in_order() {
        let mut buffer = IngestBuffer::new(None);
        assert_eq!(buffer.accept(binary(&[0x01, 0x02])), FrameOutcome::Continue);
        assert_eq!(buffer.accept(binary(&[0x03])), FrameOutcome::Continue);
        assert_eq!(
            buffer.accept(text(STOP_SENTINEL)),
            FrameOutcome::Stop(StopReason::Sentinel)
        );
        assert_eq!(buffer.total_len(), 3);
        assert_eq!(buffer.into_bytes(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn sentinel_requires_exact_match() {
        let mut buffer = IngestBuffer::new(None);
        assert_eq!(buffer.accept(text("streamingstopped")), FrameOutcome::Continue);
        assert_eq!(buffer.accept(text("StreamingStopped\n")), FrameOutcome::Continue);
        assert_eq!(
            buffer.into_bytes(),
            b"streamingstoppedStreamingStopped\n".to_vec()
        );
    }

    #[test]
    fn sentinel_bytes_in_binary_frame_also_stop() {
        let mut buffer = IngestBuffer::new(None);
        assert_eq!(
            buffer.accept(binary(b"StreamingStopped")),
            FrameOutcome::Stop(StopReason::Sentinel)
        );
        assert_eq!(buffer.total_len(), 0);
    }

    #[test]
    fn read_error_stops_and_keeps_data() {
        let mut buffer = IngestBuffer::new(None);
        buffer.accept(binary(&[0xFF]));
        let outcome = buffer.accept(Err(ws::ProtocolError::Overflow));
        assert!(matches!(outcome, FrameOutcome::Stop(StopReason::ReadError(_))));
        assert_eq!(buffer.into_bytes(), vec![0xFF]);
    }

    #[test]
    fn close_frame_and_ping_are_handled() {
        let mut buffer = IngestBuffer::new(None);
        assert_eq!(
            buffer.accept(Ok(ws::Message::Ping(Bytes::from_static(b"hi")))),
            FrameOutcome::Pong(Bytes::from_static(b"hi"))
        );
        assert_eq!(
            buffer.accept(Ok(ws::Message::Close(None))),
            FrameOutcome::Stop(StopReason::PeerClosed { reason: None })
        );
        assert!(buffer.into_bytes().is_empty());
    }

    #[test]
    fn fragmented_messages_are_reassembled() {
        let mut buffer = IngestBuffer::new(None);
        let frames = [
            Item::FirstBinary(Bytes::from_static(&[1])),
            Item::Continue(Bytes::from_static(&[2])),
            Item::Last(Bytes::from_static(&[3])),
        ];
        for item in frames {
            assert_eq!(
                buffer.accept(Ok(ws::Message::Continuation(item))),
                FrameOutcome::Continue
            );
        }
        assert_eq!(buffer.total_len(), 3);

        let sentinel = [
            Item::FirstText(Bytes::from_static(b"Streaming")),
            Item::Last(Bytes::from_static(b"Stopped")),
        ];
        let outcomes: Vec<_> = sentinel
            .into_iter()
            .map(|item| buffer.accept(Ok(ws::Message::Continuation(item))))
            .collect();
        assert_eq!(outcomes[1], FrameOutcome::Stop(StopReason::Sentinel));
        assert_eq!(buffer.into_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn continuation_without_start_is_a_read_error() {
        let mut buffer = IngestBuffer::new(None);
        let outcome = buffer.accept(Ok(ws::Message::Continuation(Item::Last(
            Bytes::from_static(&[9]),
        ))));
        assert!(matches!(outcome, FrameOutcome::Stop(StopReason::ReadError(_))));
    }

    #[test]
    fn buffer_cap_stops_before_overflowing_message() {
        let mut buffer = IngestBuffer::new(Some(4));
        assert_eq!(buffer.accept(binary(&[1, 2, 3])), FrameOutcome::Continue);
        assert_eq!(
            buffer.accept(binary(&[4, 5])),
            FrameOutcome::Stop(StopReason::BufferOverflow {
                limit: 4,
                attempted: 5
            })
        );
        assert_eq!(buffer.into_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn fragmented_sentinel_wins_over_tight_cap() {
        let mut buffer = IngestBuffer::new(Some(4));
        let items = [
            Item::FirstText(Bytes::from_static(b"Streaming")),
            Item::Continue(Bytes::from_static(b"Stop")),
            Item::Last(Bytes::from_static(b"ped")),
        ];
        let outcomes: Vec<_> = items
            .into_iter()
            .map(|item| buffer.accept(Ok(ws::Message::Continuation(item))))
            .collect();
        assert_eq!(outcomes[0], FrameOutcome::Continue);
        assert_eq!(outcomes[1], FrameOutcome::Continue);
        assert_eq!(outcomes[2], FrameOutcome::Stop(StopReason::Sentinel));
    }

    #[test]
    fn fragment_diverging_from_sentinel_hits_cap() {
        let mut buffer = IngestBuffer::new(Some(4));
        assert_eq!(
            buffer.accept(Ok(ws::Message::Continuation(Item::FirstText(
                Bytes::from_static(b"Stream")
            )))),
            FrameOutcome::Continue
        );
        assert_eq!(
            buffer.accept(Ok(ws::Message::Continuation(Item::Continue(
                Bytes::from_static(b"ed")
            )))),
            FrameOutcome::Stop(StopReason::BufferOverflow {
                limit: 4,
                attempted: 8
            })
        );
    }

    #[test]
    fn close_session_unregisters_and_returns_bytes() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.register(id);

        let mut buffer = IngestBuffer::new(None);
        buffer.accept(binary(&[0xFF]));
        let data = close_session(id, &registry, buffer);

        assert!(!registry.contains(id));
        assert_eq!(data, vec![0xFF]);
    }

    #[actix_web::test]
    async fn persist_session_writes_store() {
        let store = Arc::new(temp_store("persist-session"));
        persist_session(ConnectionId::new(), store.clone(), vec![0x01, 0x02]).await;
        assert_eq!(std::fs::read(store.path()).unwrap(), vec![0x01, 0x02]);
    }

    #[actix_web::test]
    async fn persist_session_with_no_frames_writes_empty_store() {
        let store = Arc::new(temp_store("persist-empty"));
        persist_session(ConnectionId::new(), store.clone(), Vec::new()).await;
        assert_eq!(std::fs::read(store.path()).unwrap(), Vec::<u8>::new());
    }

    #[actix_web::test]
    async fn persist_failure_is_logged_not_raised() {
        let dir = std::env::temp_dir().join(format!(
            "media-ingest-server-finalize-fail-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(dir.join("occupied")).unwrap();
        let store = Arc::new(MediaStore::new(dir.join("occupied")));

        persist_session(ConnectionId::new(), store.clone(), vec![1]).await;
        assert!(store.path().is_dir());
    }
}
