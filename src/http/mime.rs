//! MIME type detection based on file extensions.

use std::path::Path;

/// Fallback for unknown or missing extensions.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Returns the `Content-Type` for `path`, judged by its extension.
///
/// ```
/// # use hearth::http::mime::from_path;
/// # use std::path::Path;
/// assert_eq!(from_path(Path::new("index.HTML")), "text/html; charset=UTF-8");
/// assert_eq!(from_path(Path::new("archive")), "application/octet-stream");
/// ```
pub fn from_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return DEFAULT_MIME;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=UTF-8",
        "css" => "text/css; charset=UTF-8",
        "js" | "mjs" => "application/javascript; charset=UTF-8",
        "json" => "application/json",
        "txt" | "md" => "text/plain; charset=UTF-8",
        "xml" => "application/xml",
        "csv" => "text/csv; charset=UTF-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => DEFAULT_MIME,
    }
}
