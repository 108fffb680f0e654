//! Placidtest
//!
//! Browser-backed test harness. Test workers share one browser per
//! (browser, mode) slot on the machine, arbitrated through a persisted
//! endpoint document; each test gets an isolated page, runs its code as
//! ES modules from an in-process server, and sees failures with stacks
//! remapped to on-disk positions.
//!
//! ```no_run
//! use placidtest::{BrowserTest, Result};
//!
//! async fn shows_a_greeting() -> Result<()> {
//!     BrowserTest::new()
//!         .run(|session| async move {
//!             session.inject_html("<h1>hi</h1>").await?;
//!             session.run_js("document.querySelector('h1').focus()").await?;
//!             Ok(())
//!         })
//!         .await
//! }
//! ```

pub mod arbiter;
pub mod connection;
pub mod launch;
pub mod remap;
pub mod runner;
pub mod session;
pub mod store;

pub use arbiter::{ArbiterConfig, Connect, EndpointArbiter, LaunchBrowser};
pub use connection::{CdpConnect, Connection};
pub use launch::DetachedLauncher;
pub use placidtest_common::{ArbitrationKey, BrowserKind, Error, Mode, Result};
pub use remap::{StackFrame, StackRemapper};
pub use runner::{with_browser, BrowserTest, Diagnostic};
pub use session::Session;
pub use store::{CasOutcome, EndpointState, EndpointStore};
