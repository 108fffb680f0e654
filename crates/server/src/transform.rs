//! Module transform boundary
//!
//! The real transform machinery (bundler, TS, CSS preprocessors) lives
//! behind this trait. The harness only depends on the contract: code out,
//! optionally a source map describing where the code came from.

use placidtest_common::Result;
use sourcemap::{SourceMap, SourceMapBuilder};

/// Result of transforming one served module.
pub struct TransformOutput {
    pub code: String,
    pub map: Option<SourceMap>,
}

/// On-the-fly transform for served modules.
pub trait Transform: Send + Sync {
    /// `served_path` is the URL path the module is addressed by (without
    /// origin or query); `source` is the module source text.
    fn transform(&self, served_path: &str, source: &str) -> Result<TransformOutput>;
}

/// Default transform: code passes through untouched, with an identity
/// source map (line i, column 0 maps to line i, column 0 of the source).
pub struct PassthroughTransform;

impl Transform for PassthroughTransform {
    fn transform(&self, served_path: &str, source: &str) -> Result<TransformOutput> {
        let mut builder = SourceMapBuilder::new(Some(served_path));
        for (line, _) in source.lines().enumerate() {
            builder.add(line as u32, 0, line as u32, 0, Some(served_path), None, false);
        }
        Ok(TransformOutput {
            code: source.to_string(),
            map: Some(builder.into_sourcemap()),
        })
    }
}
