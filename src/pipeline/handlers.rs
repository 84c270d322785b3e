use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::pipeline::Handler;

/// Serves files and directory listings below a document root.
#[derive(Debug, Clone)]
pub struct FileHandler {
    root: PathBuf,
}

impl FileHandler {
    /// Fails when `root` does not exist.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            root: fs::canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request target onto a path inside the root.
    ///
    /// Dot segments and percent-encoding are resolved first; the result is
    /// canonicalized so symlinks cannot lead outside the root either.
    pub fn resolve(&self, target: &str) -> Option<PathBuf> {
        let base = Url::parse("file:///").ok()?;
        let url = base.join(target).ok()?;
        let relative = url.to_file_path().ok()?;
        let relative = relative.strip_prefix("/").ok()?;

        let path = fs::canonicalize(self.root.join(relative)).ok()?;
        path.starts_with(&self.root).then_some(path)
    }

    fn serve_file(&self, request: &Request, path: &Path) -> Option<Response> {
        let body = match fs::read(path) {
            Ok(body) => body,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "file not readable");
                return None;
            }
        };

        Some(
            ResponseBuilder::new(StatusCode::OK)
                .version(request.version)
                .header("Content-Type", mime::from_path(path))
                .body(body)
                .build(),
        )
    }

    fn serve_directory(&self, request: &Request, path: &Path) -> Option<Response> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let display = format!("/{}", relative.display());

        let mut entries: Vec<_> = fs::read_dir(path).ok()?.filter_map(Result::ok).collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut rows = String::new();
        let _ = writeln!(
            rows,
            "<tr><td>parent</td><td><a href=\"{}/../\">Parent directory</a></td><td></td><td>-</td></tr>",
            escape_html(&display)
        );

        for entry in entries {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let kind = if metadata.is_dir() { "dir" } else { "file" };
            let modified = metadata
                .modified()
                .map(|time| DateTime::<Utc>::from(time).format("%d-%b-%Y %H:%M").to_string())
                .unwrap_or_default();
            let size = if metadata.is_dir() {
                "-".to_string()
            } else {
                metadata.len().to_string()
            };
            let _ = writeln!(
                rows,
                "<tr><td>{kind}</td><td><a href=\"{href}/{name}\">{name}</a></td><td>{modified}</td><td>{size}</td></tr>",
                href = escape_html(&display),
                name = escape_html(&name),
            );
        }

        let title = escape_html(&display);
        let body = format!(
            "<html><head><title>Index of {title}</title></head><body>\n\
             <h1>Index of {title}</h1>\n<table>\n{rows}</table>\n</body></html>\n"
        );

        Some(
            ResponseBuilder::new(StatusCode::OK)
                .version(request.version)
                .header("Content-Type", "text/html; charset=UTF-8")
                .body(body)
                .build(),
        )
    }
}

impl Handler for FileHandler {
    fn handle(&self, request: &Request) -> Option<Response> {
        if !matches!(request.method, Method::GET | Method::HEAD) {
            return None;
        }

        let path = self.resolve(request.path())?;
        if path == self.root {
            return None;
        }

        if path.is_file() {
            self.serve_file(request, &path)
        } else if path.is_dir() {
            self.serve_directory(request, &path)
        } else {
            None
        }
    }
}

/// Answers every request with a 404 page.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn handle(&self, request: &Request) -> Option<Response> {
        let mut response = Response::not_found();
        response.version = request.version;
        Some(response)
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
