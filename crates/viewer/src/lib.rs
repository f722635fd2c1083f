//! Static viewer page embedded in the binary.
//!
//! Everything under `assets/` is compiled in and served under `/view`.

use axum::{
    body::Body,
    extract::Request,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use include_dir::{Dir, include_dir};
use mime_guess::from_path;

/// Route prefix the viewer is mounted under.
pub const VIEW_PREFIX: &str = "/view";

pub static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Serve a viewer asset for a request under [`VIEW_PREFIX`].
pub async fn serve_viewer(req: Request) -> Response<Body> {
    let path = req
        .uri()
        .path()
        .strip_prefix(VIEW_PREFIX)
        .unwrap_or_default()
        .trim_start_matches('/');

    asset_response(path)
}

/// Build the response for an asset path relative to `assets/`.
///
/// The empty path maps to `index.html`.
pub fn asset_response(path: &str) -> Response<Body> {
    let file = if path.is_empty() {
        ASSETS.get_file("index.html")
    } else {
        ASSETS
            .get_file(path)
            .or_else(|| ASSETS.get_file(format!("{path}.html")))
    };

    match file {
        Some(file) => {
            let mime = from_path(file.path()).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.contents(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
