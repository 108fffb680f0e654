//! A single test's browser session
//!
//! Each session owns one page in its own isolated browser context on the
//! shared browser. Test code executes as ES modules served by the
//! in-process module server; failures come back with their stacks
//! remapped to on-disk positions. Browser console output is forwarded to
//! the terminal so `console.log` debugging works from inside the page.

use crate::connection::Connection;
use crate::remap::StackRemapper;
use chromiumoxide::cdp::js_protocol::runtime::{
    EvaluateParams, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::Page;
use futures::StreamExt;
use placidtest_common::{Error, Mode, Result};
use placidtest_server::{inline_code_url, ModuleServer};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Lines the page logs itself, filtered out of the forwarded console.
const SELF_MARKER: &str = "[placidtest]";

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection: Arc<Connection>,
    page: Page,
    remapper: StackRemapper,
    base_url: String,
    test_path: String,
    mode: Mode,
    forwarders: Vec<JoinHandle<()>>,
}

/// What the import wrapper reports back from the page.
#[derive(Debug, Deserialize)]
struct ImportOutcome {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

impl Session {
    /// Open a fresh isolated page on the shared browser, pointed at the
    /// host page, with console and exception forwarding attached.
    pub async fn create(
        connection: Arc<Connection>,
        server: Arc<ModuleServer>,
        test_path: String,
        mode: Mode,
    ) -> Result<Self> {
        let base_url = server.base_url()?;
        let remapper = StackRemapper::new(server.clone())?;
        let page = connection.new_isolated_page(&base_url).await?;

        let mut forwarders = Vec::new();
        forwarders.push(forward_console(&page).await?);
        forwarders.push(forward_exceptions(&page, StackRemapper::new(server)?).await?);

        debug!(%test_path, "session page ready");
        Ok(Self {
            inner: Arc::new(SessionInner {
                connection,
                page,
                remapper,
                base_url,
                test_path,
                mode,
                forwarders,
            }),
        })
    }

    pub fn page(&self) -> &Page {
        &self.inner.page
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// The shared-browser connection this session's page lives on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.connection
    }

    /// Run `code` as an ES module in the page. The code may use top-level
    /// `import`; relative specifiers resolve against the test file's
    /// directory. Throws from the module come back as [`Error::TestFailure`]
    /// with a remapped stack.
    pub async fn run_js(&self, code: &str) -> Result<()> {
        let url = inline_code_url(&self.inner.base_url, &self.inner.test_path, code);
        self.import_module(&url).await
    }

    /// Load a JS module from disk into the page. Specifiers starting with
    /// `.` resolve against the test file's directory, anything else
    /// against the project root.
    pub async fn load_js(&self, spec: &str) -> Result<()> {
        let served = if spec.starts_with('.') {
            resolve_relative(&self.inner.test_path, spec)
        } else {
            spec.trim_start_matches('/').to_string()
        };
        let url = format!("{}/{served}", self.inner.base_url);
        self.import_module(&url).await
    }

    /// Load a stylesheet from disk into the page, resolved against the
    /// test file's directory.
    pub async fn load_css(&self, spec: &str) -> Result<()> {
        let served = resolve_relative(&self.inner.test_path, spec);
        let url = format!("{}/{served}", self.inner.base_url);
        let expr = format!(
            r#"(() => {{
                const link = document.createElement('link');
                link.rel = 'stylesheet';
                link.href = {url_json};
                document.head.append(link);
                return new Promise((resolve, reject) => {{
                    link.onload = resolve;
                    link.onerror = () => reject(new Error('failed to load stylesheet ' + {url_json}));
                }});
            }})()"#,
            url_json = serde_json::to_string(&url)?,
        );
        self.evaluate_ok(&expr).await
    }

    /// Replace the page body with `html`.
    pub async fn inject_html(&self, html: &str) -> Result<()> {
        let expr = format!(
            "document.body.innerHTML = {};",
            serde_json::to_string(html)?
        );
        self.evaluate_ok(&expr).await
    }

    /// Append a `<style>` element containing `css` to the page head.
    pub async fn inject_css(&self, css: &str) -> Result<()> {
        let expr = format!(
            r#"(() => {{
                const style = document.createElement('style');
                style.textContent = {};
                document.head.append(style);
            }})()"#,
            serde_json::to_string(css)?
        );
        self.evaluate_ok(&expr).await
    }

    /// Halt the test here and keep the page open for inspection. Only
    /// meaningful headed; in headless mode there is no window to look at,
    /// so calling it is reported as a usage error at the call site.
    #[track_caller]
    pub fn debug(&self) -> Error {
        if self.inner.mode.is_headless() {
            let caller = std::panic::Location::caller();
            Error::Usage(format!(
                "debug() has no effect in headless mode, run the test headed ({}:{})",
                caller.file(),
                caller.line()
            ))
        } else {
            Error::DebugHalt
        }
    }

    /// Print `text` inside the page console. Used by the runner to show
    /// the failure next to the page it happened in. The `%c` directive
    /// keeps the line out of the console forwarder.
    pub(crate) async fn relay_to_page_console(&self, text: &str) -> Result<()> {
        let expr = format!(
            "console.log({}, 'color: inherit')",
            serde_json::to_string(&format!("%c{text}"))?
        );
        self.evaluate_ok(&expr).await
    }

    /// Close this session's page and stop its forwarders. The browser and
    /// its other sessions keep running.
    pub(crate) async fn close_page(&self) {
        for task in &self.inner.forwarders {
            task.abort();
        }
        // Page::close consumes the receiver; clone the handle out of the
        // shared inner state.
        let _ = self.inner.page.clone().close().await;
    }

    /// Stop forwarders without closing the page; used when `debug()`
    /// leaves the page open.
    pub(crate) fn detach(&self) {
        for task in &self.inner.forwarders {
            task.abort();
        }
    }

    async fn import_module(&self, url: &str) -> Result<()> {
        let expr = format!(
            r#"(async () => {{
                try {{
                    await import({url_json});
                    return {{ ok: true }};
                }} catch (error) {{
                    return {{
                        ok: false,
                        message: error instanceof Error ? error.message : String(error),
                        stack: error instanceof Error ? error.stack : undefined,
                    }};
                }}
            }})()"#,
            url_json = serde_json::to_string(url)?,
        );

        let params = EvaluateParams::builder()
            .expression(expr)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(Error::Server)?;
        let result = self.inner.page.evaluate(params).await?;
        let outcome: ImportOutcome = match result.value() {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                return Err(Error::Server(
                    "module import returned no result".to_string(),
                ))
            }
        };

        if outcome.ok {
            return Ok(());
        }
        let raw = outcome
            .stack
            .or(outcome.message)
            .unwrap_or_else(|| "unknown error".to_string());
        Err(Error::TestFailure(self.inner.remapper.remap(&raw).await))
    }

    async fn evaluate_ok(&self, expr: &str) -> Result<()> {
        let params = EvaluateParams::builder()
            .expression(expr)
            .await_promise(true)
            .build()
            .map_err(Error::Server)?;
        self.inner.page.evaluate(params).await?;
        Ok(())
    }
}

/// Resolve a `./`-style specifier against the directory of `test_path`.
fn resolve_relative(test_path: &str, spec: &str) -> String {
    let mut parts: Vec<&str> = test_path.split('/').collect();
    parts.pop();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn stringify_console_arg(arg: &RemoteObject) -> String {
    if let Some(value) = &arg.value {
        match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        }
    } else {
        arg.description.clone().unwrap_or_else(|| "undefined".to_string())
    }
}

async fn forward_console(page: &Page) -> Result<JoinHandle<()>> {
    let mut events = page.event_listener::<EventConsoleApiCalled>().await?;
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = event
                .args
                .iter()
                .map(stringify_console_arg)
                .collect::<Vec<_>>()
                .join(" ");
            // Skip the harness's own lines and styled relays.
            if text.starts_with(SELF_MARKER) || text.contains("%c") {
                continue;
            }
            tracing::info!(target: "browser", "{text}");
        }
    }))
}

async fn forward_exceptions(page: &Page, remapper: StackRemapper) -> Result<JoinHandle<()>> {
    let mut events = page.event_listener::<EventExceptionThrown>().await?;
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let details = &event.exception_details;
            let raw = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            tracing::error!(target: "browser", "{}", remapper.remap(&raw).await);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_specifiers_resolve_against_the_test_directory() {
        assert_eq!(
            resolve_relative("tests/app.rs", "./helper.js"),
            "tests/helper.js"
        );
        assert_eq!(
            resolve_relative("tests/nested/app.rs", "../shared/util.js"),
            "tests/shared/util.js"
        );
        assert_eq!(resolve_relative("app.rs", "./x.js"), "x.js");
    }

    #[test]
    fn console_args_prefer_plain_values() {
        let arg: RemoteObject = serde_json::from_value(serde_json::json!({
            "type": "string",
            "value": "hello"
        }))
        .unwrap();
        assert_eq!(stringify_console_arg(&arg), "hello");

        let arg: RemoteObject = serde_json::from_value(serde_json::json!({
            "type": "number",
            "value": 7
        }))
        .unwrap();
        assert_eq!(stringify_console_arg(&arg), "7");
    }
}
