//! Browser identity types shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported browser families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chromium,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(BrowserKind::Chromium),
            other => Err(format!("unrecognized browser: {other}")),
        }
    }
}

/// Whether the browser runs with a visible window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Headless,
    Headed,
}

impl Mode {
    pub fn from_headless(headless: bool) -> Self {
        if headless {
            Mode::Headless
        } else {
            Mode::Headed
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self, Mode::Headless)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Headless => "headless",
            Mode::Headed => "headed",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies which shared browser slot is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArbitrationKey {
    pub browser: BrowserKind,
    pub mode: Mode,
}

impl ArbitrationKey {
    pub fn new(browser: BrowserKind, mode: Mode) -> Self {
        Self { browser, mode }
    }
}

impl fmt::Display for ArbitrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.browser, self.mode)
    }
}
