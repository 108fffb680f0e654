//! Detached browser launcher
//!
//! Runs in its own session so the browser it starts outlives the test
//! worker that requested it. Protocol: one JSON request line on stdin, one
//! JSON reply line on stdout, then the process idles until the browser
//! disconnects and exits. Logs go to stderr; stdout is the wire channel.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use placidtest_common::BrowserKind;
use placidtest_launcher::{LaunchReply, LaunchRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let request = match read_request().await {
        Ok(request) => request,
        Err(reason) => {
            send_reply(&LaunchReply::error(reason)).await;
            std::process::exit(1);
        }
    };

    match launch(&request).await {
        Ok((browser, handler_task, endpoint)) => {
            send_reply(&LaunchReply::endpoint(endpoint.clone())).await;
            info!(%endpoint, "browser started, waiting for disconnect");
            let _ = handler_task.await;
            info!("browser disconnected, exiting");
            drop(browser);
        }
        Err(reason) => {
            error!(%reason, "launch failed");
            send_reply(&LaunchReply::error(reason)).await;
            std::process::exit(1);
        }
    }
}

async fn read_request() -> Result<LaunchRequest, String> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|e| format!("failed to read launch request: {e}"))?;
    serde_json::from_str(line.trim()).map_err(|e| format!("invalid launch request: {e}"))
}

async fn send_reply(reply: &LaunchReply) {
    // Unserializable replies are impossible for this type; a broken pipe
    // means the requesting worker is gone, so there is nobody to tell.
    if let Ok(mut line) = serde_json::to_string(reply) {
        line.push('\n');
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(line.as_bytes()).await;
        let _ = stdout.flush().await;
    }
}

async fn launch(request: &LaunchRequest) -> Result<(Browser, JoinHandle<()>, String), String> {
    match request.browser {
        BrowserKind::Chromium => {}
    }

    let mut builder = BrowserConfig::builder()
        // Don't pop up "Chrome is not your default browser"
        .arg("--no-default-browser-check")
        .arg("--disable-infobars");
    if !request.headless {
        builder = builder.with_head().arg("--auto-open-devtools-for-tabs");
    }
    let config = builder.build()?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| format!("browser failed to launch: {e}"))?;

    // The handler must be polled for any command below to complete; the
    // stream ends when the browser goes away.
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    // Close the startup page so tests always begin from a clean target list.
    if let Ok(pages) = browser.pages().await {
        for page in pages {
            let _ = page.close().await;
        }
    }

    let endpoint = browser.websocket_address().to_string();
    Ok((browser, handler_task, endpoint))
}
