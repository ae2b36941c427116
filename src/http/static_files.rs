//! Static file serving with directory listings.
//!
//! Files are served by tower-http's `ServeDir` (content types, ranges,
//! conditional requests, `index.html` for directories). When a directory has no
//! `index.html`, `ServeDir` falls through to [`list_directory`], which renders a
//! plain HTML index of the directory's entries.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use html_escape::{encode_double_quoted_attribute, encode_text};
use tower_http::services::ServeDir;

/// Create the file service rooted at `serve_dir`.
pub fn create_static_service(serve_dir: &Path) -> ServeDir<MethodRouter> {
    let root = Arc::new(serve_dir.to_path_buf());
    ServeDir::new(serve_dir).fallback(get(list_directory).with_state(root))
}

/// Render a listing for directories without an index file.
///
/// Anything that is not a directory under the root is a 404.
async fn list_directory(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(dir) = resolve(&root, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    match read_entries(&dir).await {
        Ok(entries) => Html(render_listing(&entries)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, dir = %dir.display(), "Failed to read directory");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading directory").into_response()
        }
    }
}

/// Map a request path onto the filesystem, refusing anything that could leave
/// the root.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let mut path = root.to_path_buf();

    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }

    Some(path)
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    name: String,
    is_dir: bool,
}

async fn read_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn render_listing(entries: &[Entry]) -> String {
    let mut body = String::from("<!DOCTYPE html>\n<meta charset=\"utf-8\">\n<pre>\n");

    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let href = format!("{}{suffix}", urlencoding::encode(&entry.name));
        body.push_str(&format!(
            "<a href=\"{}\">{}{suffix}</a>\n",
            encode_double_quoted_attribute(&href),
            encode_text(&entry.name),
        ));
    }

    body.push_str("</pre>\n");
    body
}
