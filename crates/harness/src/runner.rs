//! Test runner entry points
//!
//! Wraps a user's async test body with session setup and teardown:
//! arbitrate a shared browser, open an isolated page, run the body, then
//! tear down so the browser stays available for the next worker. Failures
//! are formatted with a FAIL banner and relayed into the page console so
//! the terminal and the browser show the same diagnostic.

use crate::arbiter::EndpointArbiter;
use crate::connection::CdpConnect;
use crate::launch::DetachedLauncher;
use crate::session::Session;
use crate::store::EndpointStore;
use placidtest_common::{ArbitrationKey, BrowserKind, Error, Mode, Result};
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tracing::debug;

/// A failure diagnostic crossing the page boundary: a message plus any
/// structured payloads the page attached, already serialized to plain
/// JSON values.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub elements: Vec<serde_json::Value>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elements: Vec::new(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<serde_json::Value>) -> Self {
        self.elements = elements;
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for element in &self.elements {
            write!(f, "\n{element:#}")?;
        }
        Ok(())
    }
}

impl From<Diagnostic> for Error {
    fn from(diagnostic: Diagnostic) -> Self {
        Error::TestFailure(diagnostic.to_string())
    }
}

/// Configuration for one browser-backed test.
pub struct BrowserTest {
    mode: Mode,
    test_path: String,
    name: Option<String>,
}

impl BrowserTest {
    /// Headless test anchored at the calling file.
    // No Default impl: trait methods cannot carry #[track_caller], so
    // default() would anchor every test at this file instead of the
    // caller's.
    #[allow(clippy::new_without_default)]
    #[track_caller]
    pub fn new() -> Self {
        Self::at(Mode::Headless, Location::caller())
    }

    /// Headed test: a visible browser window, devtools open, and
    /// `debug()` available.
    #[track_caller]
    pub fn headed() -> Self {
        Self::at(Mode::Headed, Location::caller())
    }

    fn at(mode: Mode, caller: &Location<'_>) -> Self {
        Self {
            mode,
            test_path: caller.file().replace('\\', "/"),
            name: None,
        }
    }

    /// Name shown in the FAIL banner; defaults to the test file path.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Acquire a shared browser, run `test_fn` in a fresh session, and
    /// tear down. The browser itself is never closed here; other workers
    /// may be using it.
    pub async fn run<F, Fut>(self, test_fn: F) -> Result<()>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let key = ArbitrationKey::new(BrowserKind::Chromium, self.mode);
        let arbiter =
            EndpointArbiter::new(EndpointStore::at_default(), DetachedLauncher::new(), CdpConnect);
        let connection = Arc::new(arbiter.acquire(key).await?);
        let server = placidtest_server::shared().await?;
        let session = Session::create(
            connection.clone(),
            server,
            self.test_path.clone(),
            self.mode,
        )
        .await?;

        let result = test_fn(session.clone()).await;
        match result {
            Ok(()) => {
                session.close_page().await;
                connection.disconnect();
                Ok(())
            }
            Err(error) if error.is_debug_halt() => {
                // Leave the page open for inspection; only detach.
                debug!("debug() halted teardown, page left open");
                session.detach();
                connection.disconnect();
                Err(error)
            }
            Err(error) => {
                let name = self.name.as_deref().unwrap_or(&self.test_path);
                let formatted = format_failure(name, &error);
                eprintln!("{formatted}");
                let _ = session.relay_to_page_console(&formatted).await;
                if self.mode.is_headless() {
                    session.close_page().await;
                } else {
                    session.detach();
                }
                connection.disconnect();
                Err(error)
            }
        }
    }
}

/// Run a headless browser test with the default configuration.
#[track_caller]
pub fn with_browser<F, Fut>(test_fn: F) -> impl Future<Output = Result<()>>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    BrowserTest::new().run(test_fn)
}

fn format_failure(name: &str, error: &Error) -> String {
    let message = match error {
        Error::TestFailure(message) => message.clone(),
        other => other.to_string(),
    };
    format!(" FAIL \n\n\u{25cf} {name}\n\n{}\n", indent(&message, 2))
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_banner_names_the_test_and_indents_the_message() {
        let error = Error::TestFailure("boom\n    at file.js:1:1".to_string());
        let formatted = format_failure("my test", &error);
        assert!(formatted.starts_with(" FAIL \n"));
        assert!(formatted.contains("\u{25cf} my test\n"));
        assert!(formatted.contains("  boom\n      at file.js:1:1"));
    }

    #[test]
    fn indent_preserves_blank_lines() {
        assert_eq!(indent("a\n\nb", 2), "  a\n\n  b");
    }

    #[test]
    fn diagnostic_renders_message_and_elements() {
        let diagnostic = Diagnostic::new("element was detached")
            .with_elements(vec![serde_json::json!({"tag": "button"})]);
        let text = diagnostic.to_string();
        assert!(text.starts_with("element was detached\n"));
        assert!(text.contains("\"tag\""));

        let error: Error = diagnostic.into();
        assert!(matches!(error, Error::TestFailure(_)));
    }

    #[test]
    fn browser_test_captures_the_calling_file() {
        let test = BrowserTest::new();
        assert!(test.test_path.ends_with("runner.rs"));
        assert_eq!(test.mode, Mode::Headless);
        assert_eq!(BrowserTest::headed().mode, Mode::Headed);
    }
}
