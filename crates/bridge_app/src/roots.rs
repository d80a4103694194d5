//! Loading the root-folder layout used to resolve document contexts.
//!
//! The file is a JSON list:
//!
//! ```json
//! [{"root": "/shows/bbb/sh010", "context": {"project": {"type": "Project", "id": 70}}}]
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use bridge_engine::{Context, PrefixResolver};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RootEntry {
    root: PathBuf,
    context: Context,
}

/// Parse a roots document into a resolver.
pub fn parse_roots(source: &str) -> anyhow::Result<PrefixResolver> {
    let entries: Vec<RootEntry> = serde_json::from_str(source).context("invalid roots file")?;
    Ok(entries
        .into_iter()
        .fold(PrefixResolver::new(), |resolver, entry| {
            resolver.with_root(entry.root, entry.context)
        }))
}

/// Read the roots file at `path`.
pub fn load_roots(path: &Path) -> anyhow::Result<PrefixResolver> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read roots file {}", path.display()))?;
    parse_roots(&source)
}
