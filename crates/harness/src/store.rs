//! Shared browser endpoint store
//!
//! One JSON document on disk, shared by every test worker process on the
//! machine, mapping `(browser, mode)` to the current endpoint slot:
//!
//! ```json
//! { "chromium": { "headless": "ws://127.0.0.1:9222/...", "headed": "starting" } }
//! ```
//!
//! There is no file lock. Mutations go through
//! [`EndpointStore::try_compare_and_set`], which re-reads the document and
//! only writes when the slot still holds the previous value the caller
//! observed; the arbitration protocol is built entirely on that check.
//! Mutations within one process are additionally serialized so concurrent
//! sessions in a single worker never interleave a read-modify-write.

use placidtest_common::{ArbitrationKey, Result};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Sentinel marking a launch believed to be in progress.
pub const STARTING: &str = "starting";

/// Value of one endpoint slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointState {
    Absent,
    Starting,
    Endpoint(String),
}

impl EndpointState {
    fn from_slot(slot: Option<&Value>) -> Self {
        match slot.and_then(Value::as_str) {
            None | Some("") => EndpointState::Absent,
            Some(s) if s == STARTING => EndpointState::Starting,
            Some(s) => EndpointState::Endpoint(s.to_string()),
        }
    }

    fn to_slot(&self) -> Option<Value> {
        match self {
            EndpointState::Absent => None,
            EndpointState::Starting => Some(Value::String(STARTING.to_string())),
            EndpointState::Endpoint(endpoint) => Some(Value::String(endpoint.clone())),
        }
    }
}

/// Outcome of a compare-and-set attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The slot still held the expected previous value and now holds the
    /// new one.
    Won,
    /// A concurrent writer got there first; here is what the slot holds.
    Lost(EndpointState),
}

/// The persisted endpoint document.
pub struct EndpointStore {
    path: PathBuf,
}

// Serializes read-modify-write cycles within this process; cross-process
// writers are handled by the compare-previous check, not by this lock.
static WRITE_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

impl EndpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the machine-wide default location.
    pub fn at_default() -> Self {
        Self::new(placidtest_common::default_store_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value of the slot for `key`.
    pub async fn read(&self, key: &ArbitrationKey) -> EndpointState {
        let doc = self.read_document().await;
        Self::get(&doc, key)
    }

    /// Write `next` into the slot for `key`, but only if the slot still
    /// holds `previous`. A lost attempt reports the concurrent value and
    /// leaves the document untouched.
    pub async fn try_compare_and_set(
        &self,
        key: &ArbitrationKey,
        previous: &EndpointState,
        next: EndpointState,
    ) -> Result<CasOutcome> {
        let _guard = WRITE_LOCK.lock().await;

        let mut doc = self.read_document().await;
        let current = Self::get(&doc, key);
        if current != *previous {
            trace!(%key, "compare-and-set lost");
            return Ok(CasOutcome::Lost(current));
        }

        Self::set(&mut doc, key, &next);
        self.write_document(&doc).await?;
        trace!(%key, "compare-and-set won");
        Ok(CasOutcome::Won)
    }

    /// A missing, unreadable, or malformed document reads as empty; the
    /// next write repairs it.
    async fn read_document(&self) -> Map<String, Value> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Err(_) => Map::new(),
        }
    }

    async fn write_document(&self, doc: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write through a temp file and rename so a concurrent reader
        // never observes a partial document.
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let text = serde_json::to_string_pretty(&Value::Object(doc.clone()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn get(doc: &Map<String, Value>, key: &ArbitrationKey) -> EndpointState {
        let slot = doc
            .get(key.browser.as_str())
            .and_then(Value::as_object)
            .and_then(|slots| slots.get(key.mode.as_str()));
        EndpointState::from_slot(slot)
    }

    fn set(doc: &mut Map<String, Value>, key: &ArbitrationKey, state: &EndpointState) {
        let entry = doc
            .entry(key.browser.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(slots) = entry {
            match state.to_slot() {
                Some(value) => {
                    slots.insert(key.mode.as_str().to_string(), value);
                }
                None => {
                    slots.remove(key.mode.as_str());
                }
            }
        }
    }
}
