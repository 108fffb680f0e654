//! Connection to a running shared browser
//!
//! Workers attach to a browser someone else launched, so the cardinal
//! rule is: disconnecting must never close the browser. Each test gets an
//! isolated browser context, and teardown only ever detaches. The one
//! exception is [`Connection::kill`], used on a browser this process
//! launched and then lost the publish race for.

use crate::arbiter::Connect;
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::CloseParams;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::Page;
use futures::StreamExt;
use placidtest_common::{Error, Result};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Connection {
    browser: Browser,
    handler_task: JoinHandle<()>,
    endpoint: String,
}

impl Connection {
    /// Attach to the browser at `endpoint`.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let (browser, mut handler) = Browser::connect(endpoint).await.map_err(|e| {
            Error::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        // Commands stall unless the handler stream is drained.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        debug!(%endpoint, "attached to browser");
        Ok(Self {
            browser,
            handler_task,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a page in a fresh isolated browser context, so tests sharing
    /// the browser cannot see each other's cookies, storage, or tabs.
    pub async fn new_isolated_page(&self, url: &str) -> Result<Page> {
        let context = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?;
        let params = CreateTargetParams::builder()
            .url(url)
            .browser_context_id(context.browser_context_id.clone())
            .build()
            .map_err(Error::Launch)?;
        let page = self.browser.new_page(params).await?;
        Ok(page)
    }

    /// Detach from the browser, leaving it running for other workers.
    pub fn disconnect(&self) {
        self.handler_task.abort();
    }

    /// Close the browser itself. Only valid on a browser this process
    /// owns and nobody else will ever connect to.
    pub async fn kill(&self) -> Result<()> {
        self.browser.execute(CloseParams::default()).await?;
        self.handler_task.abort();
        Ok(())
    }
}

/// Production [`Connect`] implementation over the Chrome DevTools
/// Protocol.
pub struct CdpConnect;

#[async_trait]
impl Connect for CdpConnect {
    type Conn = Connection;

    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        Connection::connect(endpoint).await
    }

    async fn kill(&self, endpoint: &str) -> Result<()> {
        let conn = Connection::connect(endpoint).await?;
        conn.kill().await
    }
}
