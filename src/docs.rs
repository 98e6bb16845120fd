//! OpenAPI document and Swagger UI for the sync API.

use crate::server::{ErrorBody, SyncRequest, SyncResponse, ValidationIssue};
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ban Sync API",
        description = "Keep a Cloudflare firewall rule in step with the bans reported by fail2ban"
    ),
    paths(crate::server::sync_bans, crate::server::health),
    components(schemas(SyncRequest, SyncResponse, ErrorBody, ValidationIssue)),
    tags(
        (name = "sync", description = "Ban list synchronisation"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

/// Swagger UI under `/docs`, the raw document at `/openapi.json`, and `/`
/// redirecting to the UI.
pub fn docs_router() -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/docs/") }))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}
