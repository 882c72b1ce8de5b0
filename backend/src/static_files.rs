use axum::{
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "../frontend/dist/"]
#[allow_missing = true]
struct Assets;

pub fn assets_embedded() -> bool {
    Assets::get("index.html").is_some()
}

pub async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    // API paths never fall through to the SPA.
    if path.starts_with("api/") {
        return (StatusCode::NOT_FOUND, axum::Json(shared::ApiError::not_found("No such endpoint")))
            .into_response();
    }

    if let Some(content) = Assets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            content.data.into_owned(),
        )
            .into_response();
    }

    // For SPA routing, serve index.html for non-file paths
    if let Some(content) = Assets::get("index.html") {
        return (
            [(header::CONTENT_TYPE, "text/html".to_string())],
            content.data.into_owned(),
        )
            .into_response();
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
