//! Playback of the most recently persisted stream.

use actix_web::{get, web, HttpResponse, Responder};

use crate::state::AppState;
use crate::store::MEDIA_CONTENT_TYPE;

#[utoipa::path(
    get,
    path = "/playback",
    responses(
        (status = 200, description = "Persisted media bytes served as video/webm"),
        (status = 500, description = "Could not read media file")
    )
)]
#[get("/playback")]
/// Return the persisted media bytes verbatim.
pub async fn playback(state: web::Data<AppState>) -> impl Responder {
    match state.store.retrieve().await {
        Ok(data) => HttpResponse::Ok().content_type(MEDIA_CONTENT_TYPE).body(data),
        Err(err) => {
            tracing::warn!(error = %err, "playback read failed");
            err.into_response()
        }
    }
}
