//! Placidtest Module Server
//!
//! Serves the host page and test modules to the browser, with an
//! on-the-fly transform producing source maps. One server per process,
//! created lazily and shared by every concurrent test session; the stack
//! remapper consults the same transform results in-process via
//! [`ModuleServer::transform_request`].

pub mod transform;

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use placidtest_common::{Error, Result};
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use transform::{PassthroughTransform, Transform, TransformOutput};

/// Query parameter addressing an inline-code pseudo-module.
pub const INLINE_CODE_PARAM: &str = "inline-code";

/// Static host page served at `/`. Tests drive the page by importing
/// modules into it; the markup is just a visible placeholder.
const HOST_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <link rel="icon" href="data:;base64,=" />
    <title>placidtest</title>
  </head>
  <body>
    <h1 style="position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%)">
      Your test will run here
    </h1>
    <script>console.log('[placidtest] host page ready');</script>
  </body>
</html>
"#;

/// Module server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory module paths resolve against (usually the project root)
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// The in-process development server test pages load modules from.
pub struct ModuleServer {
    root: PathBuf,
    transform: Arc<dyn Transform>,
    cache: DashMap<String, Arc<TransformOutput>>,
    port: OnceCell<u16>,
}

impl ModuleServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_transform(config, Arc::new(PassthroughTransform))
    }

    pub fn with_transform(config: ServerConfig, transform: Arc<dyn Transform>) -> Arc<Self> {
        Arc::new(Self {
            root: config.root,
            transform,
            cache: DashMap::new(),
            port: OnceCell::new(),
        })
    }

    /// Bind an ephemeral localhost port and start serving in the background.
    /// Returns the bound port; binding twice is a usage error.
    pub async fn bind(self: &Arc<Self>) -> Result<u16> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        self.port
            .set(port)
            .map_err(|_| Error::Usage("module server is already bound".to_string()))?;

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("module server exited: {e}");
            }
        });

        info!(port, "module server listening");
        Ok(port)
    }

    /// Origin tests and the remapper use to recognize served URLs.
    pub fn base_url(&self) -> Result<String> {
        let port = self
            .port
            .get()
            .ok_or_else(|| Error::Server("module server is not bound".to_string()))?;
        Ok(format!("http://localhost:{port}"))
    }

    /// Project root module paths resolve against.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Transform result for a served path (including any query), computed
    /// on demand and cached for the lifetime of the process.
    pub async fn transform_request(&self, path_and_query: &str) -> Result<Arc<TransformOutput>> {
        let key = path_and_query.trim_start_matches('/').to_string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let (path, query) = match key.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (key.as_str(), None),
        };

        let output = match query.and_then(inline_code) {
            Some(fragment) => self.transform.transform(path, &fragment)?,
            None => {
                let disk = self.resolve(path)?;
                let source = tokio::fs::read_to_string(&disk).await.map_err(|e| {
                    Error::Server(format!("cannot read module {}: {e}", disk.display()))
                })?;
                self.transform.transform(path, &source)?
            }
        };

        debug!(path, "transformed module");
        let output = Arc::new(output);
        self.cache.insert(key, output.clone());
        Ok(output)
    }

    /// Resolve a served path onto the disk, refusing escapes from the root.
    pub fn resolve(&self, served_path: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(served_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(Error::Server(format!(
                "refusing module path outside project root: {served_path}"
            )));
        }
        Ok(self.root.join(relative))
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(host_page))
            .fallback(serve_module)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any))
            .with_state(self.clone())
    }
}

/// Process-wide server instance, created lazily on first use.
static SHARED: tokio::sync::OnceCell<Arc<ModuleServer>> = tokio::sync::OnceCell::const_new();

/// The memoized per-process module server, bound on first call.
pub async fn shared() -> Result<Arc<ModuleServer>> {
    SHARED
        .get_or_try_init(|| async {
            let server = ModuleServer::new(ServerConfig::default());
            server.bind().await?;
            Ok::<_, Error>(server)
        })
        .await
        .map(Arc::clone)
}

/// Build the URL that executes `code` as an inline module, addressed under
/// `test_path` so relative imports and stack remapping resolve against the
/// test's own file.
pub fn inline_code_url(base_url: &str, test_path: &str, code: &str) -> String {
    format!(
        "{base_url}/{}?{INLINE_CODE_PARAM}={}",
        test_path.trim_start_matches('/'),
        utf8_percent_encode(code, NON_ALPHANUMERIC)
    )
}

/// Extract and decode the inline-code parameter from a raw query string.
pub fn inline_code(query: &str) -> Option<String> {
    for pair in query.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name == INLINE_CODE_PARAM {
            return percent_decode_str(value)
                .decode_utf8()
                .ok()
                .map(|s| s.into_owned());
        }
    }
    None
}

async fn host_page() -> Html<&'static str> {
    Html(HOST_PAGE)
}

async fn serve_module(State(server): State<Arc<ModuleServer>>, uri: Uri) -> Response {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{query}", uri.path()),
        None => uri.path().to_string(),
    };

    match server.transform_request(&path_and_query).await {
        Ok(output) => {
            let mut code = output.code.clone();
            if let Some(map) = &output.map {
                let mut buf = Vec::new();
                if map.to_writer(&mut buf).is_ok() {
                    code.push_str("\n//# sourceMappingURL=data:application/json;base64,");
                    code.push_str(&BASE64.encode(&buf));
                }
            }
            (
                [(header::CONTENT_TYPE, "application/javascript")],
                code,
            )
                .into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn server_at(root: &std::path::Path) -> Arc<ModuleServer> {
        ModuleServer::new(ServerConfig {
            root: root.to_path_buf(),
        })
    }

    #[test]
    fn inline_code_url_round_trips() {
        let url = inline_code_url("http://localhost:3000", "tests/app.rs", "throw new Error('x')");
        let query = url.split_once('?').unwrap().1;
        assert_eq!(inline_code(query).unwrap(), "throw new Error('x')");
    }

    #[test]
    fn inline_code_ignores_other_params() {
        assert_eq!(inline_code("import&foo=1"), None);
        assert_eq!(inline_code("inline-code=abc"), Some("abc".to_string()));
    }

    #[tokio::test]
    async fn transform_request_reads_files_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod.js"), "export const x = 1;\n").unwrap();
        let server = server_at(dir.path());

        let out = server.transform_request("mod.js").await.unwrap();
        assert_eq!(out.code, "export const x = 1;\n");
        assert!(out.map.is_some());
    }

    #[tokio::test]
    async fn transform_request_serves_inline_fragments_without_disk() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());

        // app.rs does not exist on disk; the fragment is the module source
        let out = server
            .transform_request("tests/app.rs?inline-code=throw%20new%20Error%28%22x%22%29")
            .await
            .unwrap();
        assert_eq!(out.code, "throw new Error(\"x\")");
    }

    #[tokio::test]
    async fn transform_request_caches_by_path_and_query() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod.js"), "1\n").unwrap();
        let server = server_at(dir.path());

        let first = server.transform_request("mod.js").await.unwrap();
        std::fs::write(dir.path().join("mod.js"), "2\n").unwrap();
        let second = server.transform_request("mod.js").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn resolve_refuses_parent_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());
        assert!(server.resolve("../etc/passwd").is_err());
        assert!(server.resolve("src/lib.rs").is_ok());
    }

    #[tokio::test]
    async fn root_route_serves_host_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = server_at(dir.path()).router();

        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<title>placidtest</title>"));
    }

    #[tokio::test]
    async fn module_route_appends_source_map() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod.js"), "export const x = 1;\n").unwrap();
        let app = server_at(dir.path()).router();

        let resp = app
            .oneshot(Request::builder().uri("/mod.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("export const x = 1;"));
        assert!(text.contains("sourceMappingURL=data:application/json;base64,"));
    }

    #[tokio::test]
    async fn missing_module_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = server_at(dir.path()).router();

        let resp = app
            .oneshot(Request::builder().uri("/nope.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bind_assigns_an_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());
        let port = server.bind().await.unwrap();
        assert!(port > 1024);
        assert_eq!(server.base_url().unwrap(), format!("http://localhost:{port}"));
        assert!(server.bind().await.is_err());
    }
}
