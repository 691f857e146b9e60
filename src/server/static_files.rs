//! Embedded dashboard assets

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "src/server/assets/"]
pub struct Assets;

pub fn serve_static(path: &str) -> Response {
    let path = match path.trim_start_matches('/') {
        "" => "index.html",
        p => p,
    };

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

pub async fn index() -> Response {
    serve_static("index.html")
}

pub async fn asset(Path(path): Path<String>) -> Response {
    serve_static(&path)
}
