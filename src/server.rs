//! Thin HTTP frontend: routes URL paths to the registry and maps results
//! onto status codes, bodies and content types.

use std::borrow::Cow;
use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::registry::DictionaryRegistry;

const HTML_UTF8: &str = "text/html; charset=utf-8";

pub struct AppState {
    pub registry: DictionaryRegistry,
    pub max_word_length: usize,
}

/// Fixed extension -> MIME mapping. Anything unknown is served as HTML.
pub fn content_type_for(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "html" => HTML_UTF8,
        "js" => "application/javascript",
        "ico" => "image/x-icon",
        "css" => "text/css",
        "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "spx" => "audio/ogg",
        "ogg" => "audio/ogg",
        "eot" => "font/opentype",
        "svg" => "image/svg+xml",
        "ttf" => "application/font-ttf",
        "woff" => "application/font-woff",
        "woff2" => "application/font-woff2",
        _ => return None,
    })
}

fn extension_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn is_resource_path(path: &str) -> bool {
    extension_of(path)
        .as_deref()
        .and_then(content_type_for)
        .is_some()
}

/// Reject empty words, overlong words and path-traversal shapes.
pub fn validate_word(word: &str, max_length: usize) -> bool {
    if word.is_empty() || word.chars().count() > max_length {
        return false;
    }
    !(word.contains("..") || word.contains('/') || word.contains('\\'))
}

async fn catalog(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.registry.catalog())
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let loaded = state.registry.loaded_count();
    let body = json!({
        "status": if loaded > 0 { "healthy" } else { "unhealthy" },
        "dictionaries": loaded,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if loaded > 0 {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn dispatch(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let tail = req.match_info().query("tail");
    let path: Cow<'_, str> = urlencoding::decode(tail).unwrap_or(Cow::Borrowed(tail));
    debug!(path = %path, "request");
    route_request(&state, &path)
}

fn route_request(state: &AppState, path: &str) -> HttpResponse {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return HttpResponse::Ok().json(state.registry.catalog());
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() == 1 {
        let segment = segments[0];
        if is_resource_path(segment) {
            return resource_response(state, None, segment);
        }
        return word_response(state, None, segment);
    }

    let head = segments[0];
    let rest = segments[1..].join("/");
    if state.registry.knows_route(head) {
        if is_resource_path(&rest) {
            return resource_response(state, Some(head), &rest);
        }
        return word_response(state, Some(head), &rest);
    }

    if is_resource_path(path) {
        return resource_response(state, None, path);
    }
    not_found()
}

fn resource_response(state: &AppState, route: Option<&str>, path: &str) -> HttpResponse {
    let bytes = match route {
        Some(route) => state.registry.routed_resource(route, path),
        None => state.registry.find_resource(path),
    };
    match bytes {
        Some(bytes) => {
            let content_type = extension_of(path)
                .as_deref()
                .and_then(content_type_for)
                .unwrap_or(HTML_UTF8);
            HttpResponse::Ok().content_type(content_type).body(bytes)
        }
        None => not_found(),
    }
}

fn word_response(state: &AppState, route: Option<&str>, word: &str) -> HttpResponse {
    if !validate_word(word, state.max_word_length) {
        return HttpResponse::BadRequest()
            .content_type(HTML_UTF8)
            .body("<h1>Error: Invalid word</h1>");
    }
    let dict = match route {
        Some(route) => state.registry.by_route(route),
        None => state.registry.default_dictionary(),
    };
    let Some(dict) = dict else {
        return word_not_found(word);
    };
    match state.registry.define(dict, word) {
        Ok(Some(body)) => HttpResponse::Ok().content_type(HTML_UTF8).body(body),
        Ok(None) => word_not_found(word),
        Err(err) => {
            error!(word, error = %err, "lookup failed");
            HttpResponse::InternalServerError()
                .content_type(HTML_UTF8)
                .body("<h1>Error: Word lookup failed</h1>")
        }
    }
}

fn word_not_found(word: &str) -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(HTML_UTF8)
        .body(format!("<h1>Word '{word}' not found</h1>"))
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(HTML_UTF8)
        .body("<h1>404 - Not Found</h1>")
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(catalog))
        .route("/health", web::get().to(health))
        .route("/api/dicts", web::get().to(catalog))
        .route("/api/dictionaries", web::get().to(catalog))
        .route("/{tail:.*}", web::get().to(dispatch));
}

/// Run the server until shutdown. The worker pool is bounded by
/// `max_threads` (`server_type = "simple"` pins it to one); requests are
/// independent and all shared state is read-only behind `web::Data`.
pub async fn run(config: ServerConfig, registry: DictionaryRegistry) -> std::io::Result<()> {
    let workers = match config.server_type.as_str() {
        "simple" => 1,
        "gunicorn" => {
            warn!("server_type \"gunicorn\" has no direct equivalent, using the threaded pool");
            config.max_threads
        }
        _ => config.max_threads,
    };
    let host = if config.host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        config.host.clone()
    };
    let state = web::Data::new(AppState {
        registry,
        max_word_length: config.max_word_length,
    });

    info!(%host, port = config.port, workers, "server ready");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .workers(workers)
        .backlog(config.request_queue_size)
        .client_request_timeout(Duration::from_secs(config.connection_timeout))
        .bind((host.as_str(), config.port))?
        .run()
        .await
}
