use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::playback::playback,
        api::health::health,
    ),
    components(
        schemas(
            api::HealthResponse,
        )
    ),
    tags(
        (name = "media-ingest-server", description = "Media stream ingest and playback API")
    )
)]
pub struct ApiDoc;
