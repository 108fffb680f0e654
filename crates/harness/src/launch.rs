//! Spawning the detached launcher
//!
//! The browser must outlive the test worker that starts it, so the worker
//! never launches a browser directly. It spawns `placidtest-launcher` in
//! its own process group, hands it one request line on stdin, and reads
//! one reply line back. After that the launcher is on its own.

use crate::arbiter::LaunchBrowser;
use async_trait::async_trait;
use placidtest_common::{ArbitrationKey, Error, Result};
use placidtest_launcher::{LaunchReply, LaunchRequest};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

const LAUNCHER_BIN: &str = "placidtest-launcher";

pub struct DetachedLauncher {
    binary: PathBuf,
}

impl DetachedLauncher {
    pub fn new() -> Self {
        Self {
            binary: launcher_binary(),
        }
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl Default for DetachedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the launcher binary: explicit override, then next to the
/// running test binary (cargo places both under `target/<profile>/`),
/// then `$PATH`.
fn launcher_binary() -> PathBuf {
    if let Some(path) = std::env::var_os("PLACIDTEST_LAUNCHER") {
        return PathBuf::from(path);
    }
    let name = format!("{LAUNCHER_BIN}{}", std::env::consts::EXE_SUFFIX);
    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(PathBuf::from);
        while let Some(d) = dir {
            let candidate = d.join(&name);
            if candidate.is_file() {
                return candidate;
            }
            // Test binaries live one level down in target/<profile>/deps.
            dir = d.parent().map(PathBuf::from);
            if d.file_name().map_or(true, |n| n != "deps") {
                break;
            }
        }
    }
    PathBuf::from(name)
}

#[async_trait]
impl LaunchBrowser for DetachedLauncher {
    async fn launch(&self, key: ArbitrationKey) -> Result<String> {
        debug!(%key, binary = %self.binary.display(), "spawning detached launcher");

        let mut command = Command::new(&self.binary);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to spawn {}: {e}", self.binary.display())))?;

        let request = LaunchRequest {
            browser: key.browser,
            headless: key.mode.is_headless(),
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("launcher stdin unavailable".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("launcher stdout unavailable".to_string()))?;
        let mut reply_line = String::new();
        BufReader::new(stdout).read_line(&mut reply_line).await?;
        if reply_line.trim().is_empty() {
            return Err(Error::Launch(
                "launcher exited before reporting an endpoint".to_string(),
            ));
        }

        let reply: LaunchReply = serde_json::from_str(reply_line.trim())?;
        reply.into_result().map_err(Error::Launch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        std::env::set_var("PLACIDTEST_LAUNCHER", "/opt/custom/launcher");
        let path = launcher_binary();
        std::env::remove_var("PLACIDTEST_LAUNCHER");
        assert_eq!(path, PathBuf::from("/opt/custom/launcher"));
    }
}
