//! The HTTP side: data files, health endpoints and hit logging.
//!
//! ```text
//! GET /health          one `name\tSTATUS` line per concern
//! GET /health/{name}   `OK` or `CONCERN`; 404 for unknown names
//! GET /<anything>      file under the data root; directories get an index
//!                      only when listings are enabled, else 404
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::health::{Concern, Health};

/// How often the per-directory hit tally is logged and reset.
pub const HIT_LOG_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Hit counting
// ---------------------------------------------------------------------------

/// Successful file requests, tallied by directory.
#[derive(Debug, Default)]
pub struct HitCounter {
    hits: Mutex<BTreeMap<String, u64>>,
}

impl HitCounter {
    pub fn record(&self, request_path: &str) {
        let dir = match request_path.rsplit_once('/') {
            Some(("", _)) | None => "/",
            Some((dir, _)) => dir,
        };
        if let Ok(mut hits) = self.hits.lock() {
            *hits.entry(dir.to_string()).or_default() += 1;
        }
    }

    /// Return the tally so far and start a new one.
    pub fn take(&self) -> BTreeMap<String, u64> {
        self.hits
            .lock()
            .map(|mut hits| std::mem::take(&mut *hits))
            .unwrap_or_default()
    }

    /// Log and reset the tally every `period`, forever.
    pub fn spawn_logger(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                for (dir, count) in self.take() {
                    info!("{count} hits on {dir} in the last {period:?}");
                }
            }
        })
    }
}

async fn count_hits(State(hits): State<Arc<HitCounter>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if response.status().is_success() && !path.starts_with("/health") {
        hits.record(&path);
    }
    response
}

// ---------------------------------------------------------------------------
// Health handlers
// ---------------------------------------------------------------------------

async fn health_report(State(health): State<Arc<Health>>) -> String {
    health.report().await
}

async fn health_concern(State(health): State<Arc<Health>>, UrlPath(name): UrlPath<String>) -> Response {
    match Concern::from_name(&name) {
        Some(concern) => health.status(concern).await.to_string().into_response(),
        None => (StatusCode::NOT_FOUND, format!("no such health concern: {name}\n")).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Directory listings
// ---------------------------------------------------------------------------

/// Map a URL path onto the data root.  `None` for anything that would
/// escape it.
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in url_path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

async fn render_index(dir: &Path, url_path: &str) -> std::io::Result<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut html = format!(
        "<!doctype html>\n<title>Index of {0}</title>\n<h1>Index of {0}</h1>\n<pre>\n",
        escape_html(url_path)
    );
    for name in names {
        let name = escape_html(&name);
        let _ = writeln!(html, "<a href=\"{name}\">{name}</a>");
    }
    html.push_str("</pre>\n");
    Ok(html)
}

/// Answer requests for directories under the data root with an index page;
/// everything else passes through to the file server.
async fn list_directories(State(root): State<Arc<PathBuf>>, request: Request, next: Next) -> Response {
    let url_path = request.uri().path().to_string();
    let Some(dir) = resolve(&root, &url_path) else {
        return next.run(request).await;
    };
    if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
        return next.run(request).await;
    }
    // Relative links in the index only work below a trailing slash.
    if !url_path.ends_with('/') {
        return Redirect::permanent(&format!("{url_path}/")).into_response();
    }
    match render_index(&dir, &url_path).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            warn!(path = %dir.display(), "listing directory: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router and listener
// ---------------------------------------------------------------------------

/// The whole HTTP surface.  With `listings`, directory requests get an
/// index page instead of 404.
pub fn router(data_root: &Path, listings: bool, health: Arc<Health>, hits: Arc<HitCounter>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_report))
        .route("/health/{name}", get(health_concern))
        .fallback_service(ServeDir::new(data_root));
    if listings {
        let root = Arc::new(data_root.to_path_buf());
        router = router.layer(middleware::from_fn_with_state(root, list_directories));
    }
    router
        .layer(middleware::from_fn_with_state(hits, count_hits))
        .layer(TraceLayer::new_for_http())
        .with_state(health)
}

/// Bind `host:port`, falling back to every interface on the same port when
/// `host` can't be bound.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            warn!("binding {host}:{port} failed ({err}); trying all interfaces");
            TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
        }
    }
}

pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving on {addr}");
    }
    axum::serve(listener, router.into_make_service()).await
}
