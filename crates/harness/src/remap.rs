//! Stack trace remapping
//!
//! Failures surface in the browser with stacks full of served URLs and
//! transformed line numbers. This module rewrites each frame back to the
//! on-disk file and original position, using the same transform results
//! the module server produced, so editors and terminals can jump straight
//! to the failing line. Frames that cannot be remapped are kept verbatim;
//! a stack with a few raw frames beats no stack.

use futures::future::join_all;
use once_cell::sync::Lazy;
use placidtest_server::{inline_code, ModuleServer};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?:(?P<function>.*?)\s+\()?(?P<url>[^()\s]+):(?P<line>\d+):(?P<col>\d+)\)?\s*$")
        .unwrap()
});

/// One parsed `at ...` line of a V8 stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Option<String>,
    pub url: String,
    /// 1-based, as printed by the browser.
    pub line: u32,
    pub column: u32,
}

impl StackFrame {
    pub fn parse(text: &str) -> Option<Self> {
        let caps = FRAME_RE.captures(text)?;
        Some(Self {
            function: caps
                .name("function")
                .map(|m| m.as_str().to_string())
                .filter(|f| !f.is_empty()),
            url: caps["url"].to_string(),
            line: caps["line"].parse().ok()?,
            column: caps["col"].parse().ok()?,
        })
    }
}

pub struct StackRemapper {
    server: Arc<ModuleServer>,
    base_url: String,
}

impl StackRemapper {
    pub fn new(server: Arc<ModuleServer>) -> placidtest_common::Result<Self> {
        let base_url = server.base_url()?;
        Ok(Self { server, base_url })
    }

    /// For tests that have not bound the server to a port.
    #[cfg(test)]
    fn with_base_url(server: Arc<ModuleServer>, base_url: impl Into<String>) -> Self {
        Self {
            server,
            base_url: base_url.into(),
        }
    }

    /// Rewrite every frame of `raw_stack` that points at a served module.
    /// Frames are remapped concurrently; output order matches input order.
    pub async fn remap(&self, raw_stack: &str) -> String {
        let lines = join_all(raw_stack.lines().map(|line| self.remap_line(line)));
        lines.await.join("\n")
    }

    async fn remap_line(&self, line: &str) -> String {
        match self.try_remap(line).await {
            Some(remapped) => remapped,
            None => line.to_string(),
        }
    }

    async fn try_remap(&self, line: &str) -> Option<String> {
        let frame = StackFrame::parse(line)?;
        // Require a path boundary after the origin so a port that merely
        // extends ours (localhost:92 vs localhost:9222) is not claimed.
        let served = frame
            .url
            .strip_prefix(self.base_url.as_str())
            .filter(|rest| rest.starts_with('/'))?;

        let output = self.server.transform_request(served).await.ok()?;
        let map = output.map.as_ref()?;
        // Browser positions are 1-based, map lookups 0-based.
        let token =
            map.lookup_token(frame.line.checked_sub(1)?, frame.column.checked_sub(1)?)?;
        let mut src_line = token.get_src_line();
        let src_col = token.get_src_col();

        let (path, query) = match served.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (served, None),
        };
        let disk = self.server.resolve(path).ok()?;

        // Inline fragments are addressed under the test file but their
        // line numbers start at the fragment, not the file. Locate the
        // fragment verbatim in the file and shift by the lines above it.
        if let Some(fragment) = query.and_then(inline_code) {
            src_line += self.fragment_line_offset(&disk, &fragment).await?;
        }

        trace!(url = %frame.url, file = %disk.display(), "remapped frame");
        Some(format_frame(
            frame.function.as_deref(),
            &disk,
            src_line + 1,
            src_col + 1,
        ))
    }

    async fn fragment_line_offset(&self, disk: &Path, fragment: &str) -> Option<u32> {
        let contents = tokio::fs::read_to_string(disk).await.ok()?;
        let start = contents.find(fragment)?;
        Some(contents[..start].matches('\n').count() as u32)
    }
}

fn format_frame(function: Option<&str>, disk: &std::path::Path, line: u32, column: u32) -> String {
    match function {
        Some(function) => format!("    at {function} ({}:{line}:{column})", disk.display()),
        None => format!("    at {}:{line}:{column}", disk.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placidtest_server::{inline_code_url, ServerConfig};

    fn server_at(root: &std::path::Path) -> Arc<ModuleServer> {
        ModuleServer::new(ServerConfig {
            root: root.to_path_buf(),
        })
    }

    #[test]
    fn parses_frame_with_function_name() {
        let frame =
            StackFrame::parse("    at doThing (http://localhost:3000/mod.js:4:9)").unwrap();
        assert_eq!(frame.function.as_deref(), Some("doThing"));
        assert_eq!(frame.url, "http://localhost:3000/mod.js");
        assert_eq!(frame.line, 4);
        assert_eq!(frame.column, 9);
    }

    #[test]
    fn parses_bare_frame() {
        let frame = StackFrame::parse("    at http://localhost:3000/mod.js:2:1").unwrap();
        assert_eq!(frame.function, None);
        assert_eq!(frame.line, 2);
    }

    #[test]
    fn non_frame_lines_do_not_parse() {
        assert_eq!(StackFrame::parse("Error: boom"), None);
        assert_eq!(StackFrame::parse(""), None);
    }

    #[tokio::test]
    async fn frames_from_other_origins_stay_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:9");

        let raw = "    at https://cdn.example.com/lib.js:10:2";
        assert_eq!(remapper.remap(raw).await, raw);
    }

    #[tokio::test]
    async fn origin_match_requires_a_path_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:92");

        // Shares the textual prefix but is a different port entirely.
        let raw = "    at http://localhost:9222/mod.js:1:1";
        assert_eq!(remapper.remap(raw).await, raw);
    }

    #[tokio::test]
    async fn served_file_frame_maps_to_disk_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod.js"), "const a = 1;\nboom();\n").unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:9");

        let raw = "Error: boom\n    at http://localhost:9/mod.js:2:3";
        let expected_path = dir.path().join("mod.js");
        let remapped = remapper.remap(raw).await;
        assert_eq!(
            remapped,
            format!("Error: boom\n    at {}:2:1", expected_path.display())
        );
    }

    /// Maps generated columns 0 and 5 of line 0 to source columns 0 and
    /// 10, so token selection is observable mid-line.
    struct SplitLineTransform;

    impl placidtest_server::Transform for SplitLineTransform {
        fn transform(
            &self,
            served_path: &str,
            source: &str,
        ) -> placidtest_common::Result<placidtest_server::TransformOutput> {
            let mut builder = sourcemap::SourceMapBuilder::new(Some(served_path));
            builder.add(0, 0, 0, 0, Some(served_path), None, false);
            builder.add(0, 5, 0, 10, Some(served_path), None, false);
            Ok(placidtest_server::TransformOutput {
                code: source.to_string(),
                map: Some(builder.into_sourcemap()),
            })
        }
    }

    #[tokio::test]
    async fn column_lookup_is_zero_based_against_the_map() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mod.js"), "abcdefghij\n").unwrap();
        let server = ModuleServer::with_transform(
            ServerConfig {
                root: dir.path().to_path_buf(),
            },
            Arc::new(SplitLineTransform),
        );
        let remapper = StackRemapper::with_base_url(server, "http://localhost:9");
        let disk = dir.path().join("mod.js");

        // 1-based column 5 sits before the second token's boundary, so it
        // must resolve through the first token.
        assert_eq!(
            remapper
                .remap("    at http://localhost:9/mod.js:1:5")
                .await,
            format!("    at {}:1:1", disk.display())
        );
        // 1-based column 6 is the second token.
        assert_eq!(
            remapper
                .remap("    at http://localhost:9/mod.js:1:6")
                .await,
            format!("    at {}:1:11", disk.display())
        );
    }

    #[tokio::test]
    async fn inline_fragment_frame_shifts_to_its_position_in_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        let fragment = "throw new Error(\"x\")";
        std::fs::write(
            dir.path().join("tests/app.rs"),
            format!("fn first() {{}}\n\nlet js = r#\"{fragment}\"#;\n"),
        )
        .unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:9");

        let url = inline_code_url("http://localhost:9", "tests/app.rs", fragment);
        let raw = format!("    at {url}:1:1");
        let remapped = remapper.remap(&raw).await;

        // Fragment sits on line 3 of the file (two newlines above it).
        let expected_path = dir.path().join("tests/app.rs");
        assert_eq!(
            remapped,
            format!("    at {}:3:1", expected_path.display())
        );
    }

    #[tokio::test]
    async fn fragment_missing_from_file_leaves_frame_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/app.rs"), "nothing matching here\n").unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:9");

        let url = inline_code_url("http://localhost:9", "tests/app.rs", "boom()");
        let raw = format!("    at {url}:1:1");
        assert_eq!(remapper.remap(&raw).await, raw);
    }

    #[tokio::test]
    async fn unreadable_module_leaves_frame_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let remapper = StackRemapper::with_base_url(server_at(dir.path()), "http://localhost:9");

        let raw = "    at http://localhost:9/missing.js:1:1";
        assert_eq!(remapper.remap(raw).await, raw);
    }
}
