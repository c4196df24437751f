//! Websocket ingest endpoint.
//!
//! Each upgraded connection runs as one actor that buffers incoming frames
//! and persists them when the stream ends.

use std::sync::Arc;

use actix::prelude::*;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use crate::ingest::{close_session, persist_session, FrameOutcome, IngestBuffer, StopReason};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::state::AppState;
use crate::store::MediaStore;

pub struct IngestWs {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    store: Arc<MediaStore>,
    buffer: Option<IngestBuffer>,
    stop_reason: Option<StopReason>,
}

impl IngestWs {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<MediaStore>,
        max_buffer_bytes: Option<usize>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            registry,
            store,
            buffer: Some(IngestBuffer::new(max_buffer_bytes)),
            stop_reason: None,
        }
    }

    fn log_stop(&self, reason: &StopReason) {
        match reason {
            StopReason::Sentinel => {
                tracing::info!(connection_id = %self.id, "streaming stopped by client");
            }
            StopReason::PeerClosed { .. } | StopReason::Disconnected => {
                tracing::info!(connection_id = %self.id, reason = %reason, "ingest connection ended");
            }
            StopReason::ReadError(_) => {
                tracing::warn!(connection_id = %self.id, error = %reason, "ingest read failed");
            }
            StopReason::BufferOverflow { .. } => {
                tracing::warn!(connection_id = %self.id, error = %reason, "ingest buffer limit reached");
            }
        }
    }
}

impl Actor for IngestWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        self.registry.register(self.id);
        tracing::info!(
            connection_id = %self.id,
            active = self.registry.len(),
            "websocket connection established"
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if self.stop_reason.is_none() {
            self.log_stop(&StopReason::Disconnected);
        }
        if let Some(buffer) = self.buffer.take() {
            let data = close_session(self.id, &self.registry, buffer);
            actix::spawn(persist_session(self.id, self.store.clone(), data));
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for IngestWs {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if self.stop_reason.is_some() {
            return;
        }
        let Some(buffer) = self.buffer.as_mut() else { return };
        match buffer.accept(item) {
            FrameOutcome::Continue => {}
            FrameOutcome::Pong(bytes) => ctx.pong(&bytes),
            FrameOutcome::Stop(reason) => {
                self.log_stop(&reason);
                self.stop_reason = Some(reason);
                ctx.stop();
            }
        }
    }
}

#[get("/media")]
/// Upgrade to a websocket and ingest binary media frames.
pub async fn media_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = IngestWs::new(
        state.registry.clone(),
        state.store.clone(),
        state.limits.max_buffer_bytes,
    );
    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(state.limits.max_frame_bytes)
        .start()
        .map_err(|err| {
            tracing::warn!(error = %err, "could not establish websocket connection");
            err
        })
}
