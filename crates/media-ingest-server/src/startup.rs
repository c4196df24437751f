//! Actix server startup + app wiring.
//!
//! Resolves configuration, builds the shared state, and registers routes and middleware.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::{Context as _, Result};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config;
use crate::openapi;
use crate::registry::ConnectionRegistry;
use crate::state::AppState;
use crate::store::{MediaStore, DEFAULT_STORE_PATH};

const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let store_path = resolve_store_path(args.store_path, &cfg);
    let limits = config::limits_from_config(&cfg)?;
    let cors_origins = config::cors_origins_from_config(&cfg);
    tracing::info!(
        bind = %bind,
        store_path = %store_path.display(),
        max_frame_bytes = limits.max_frame_bytes,
        max_buffer_bytes = ?limits.max_buffer_bytes,
        cors_origins = ?cors_origins,
        "starting media-ingest-server"
    );

    let state = web::Data::new(AppState::new(MediaStore::new(store_path), limits));
    setup_shutdown(state.registry.clone());

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .max_age(3600);
        if cors_origins.is_empty() {
            cors = cors.allow_any_origin();
        }
        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::media_ws)
            .service(api::playback)
            .service(api::health)
    })
    .bind(bind)
    .with_context(|| format!("bind {bind}"))?
    .run()
    .await?;

    Ok(())
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    path != "/health" && !path.starts_with("/swagger-ui/")
}

/// User-Agent header for the request log, `-` when absent or not UTF-8.
fn user_agent(req: &ServiceRequest) -> String {
    req.headers()
        .get("User-Agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Actix middleware that filters noisy paths from logging.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

/// Service wrapper that applies the logging filter.
struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req.connection_info().realip_remote_addr().unwrap_or("-").to_string();
        let ua = user_agent(&req);
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    user_agent = %ua,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load server config from disk, falling back to defaults.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")))
        .filter(|path| path.exists());
    match auto_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using config beside executable");
            config::ServerConfig::load(&path)
        }
        None => Ok(config::ServerConfig::default()),
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(bind: Option<SocketAddr>, cfg: &config::ServerConfig) -> Result<SocketAddr> {
    if let Some(addr) = bind {
        return Ok(addr);
    }
    match config::bind_from_config(cfg)? {
        Some(addr) => Ok(addr),
        None => DEFAULT_BIND
            .parse()
            .with_context(|| format!("parse default bind {DEFAULT_BIND}")),
    }
}

/// Resolve the store path from args + config.
fn resolve_store_path(path: Option<PathBuf>, cfg: &config::ServerConfig) -> PathBuf {
    path.or_else(|| config::store_path_from_config(cfg))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
}

/// Install Ctrl+C handler that stops the actix system.
///
/// Sessions still streaming at shutdown are not persisted.
fn setup_shutdown(registry: Arc<ConnectionRegistry>) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!(active_streams = registry.len(), "shutdown requested");
        if let Some(system) = actix_web::rt::System::try_current() {
            system.stop();
        } else {
            std::process::exit(0);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_and_swagger_are_not_logged() {
        assert!(!should_log_path("/health"));
        assert!(!should_log_path("/swagger-ui/index.html"));
        assert!(should_log_path("/media"));
        assert!(should_log_path("/playback"));
    }

    #[test]
    fn user_agent_is_read_from_header() {
        let req = actix_web::test::TestRequest::default()
            .insert_header(("User-Agent", "recorder/1.0"))
            .to_srv_request();
        assert_eq!(user_agent(&req), "recorder/1.0");

        let req = actix_web::test::TestRequest::default().to_srv_request();
        assert_eq!(user_agent(&req), "-");
    }

    #[test]
    fn cli_bind_overrides_config() {
        let cfg = config::ServerConfig {
            bind: Some("127.0.0.1:9000".to_string()),
            ..config::ServerConfig::default()
        };
        let cli: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        assert_eq!(resolve_bind(Some(cli), &cfg).unwrap(), cli);
        assert_eq!(
            resolve_bind(None, &cfg).unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_bind(None, &config::ServerConfig::default()).unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn store_path_falls_back_to_default() {
        let cfg = config::ServerConfig::default();
        assert_eq!(resolve_store_path(None, &cfg), PathBuf::from("media_data.raw"));

        let cfg = config::ServerConfig {
            store_path: Some("from-config.raw".to_string()),
            ..config::ServerConfig::default()
        };
        assert_eq!(resolve_store_path(None, &cfg), PathBuf::from("from-config.raw"));
        assert_eq!(
            resolve_store_path(Some(PathBuf::from("from-cli.raw")), &cfg),
            PathBuf::from("from-cli.raw")
        );
    }
}
