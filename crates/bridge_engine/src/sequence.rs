//! Image sequence paths.
//!
//! Render and footage paths describe a frame sequence either with a
//! placeholder token (`###`, `@@@`, `[###]`, `%04d`) or by naming one frame
//! of it (`plate.0001.exr`).

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// A frame placeholder anywhere in a path.
static SEQUENCE_TOKEN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\[?([#@]+|%0\dd)\]?"));

/// A trailing frame number or placeholder in a file root.
static FRAME_SUFFIX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(^|[._\- ])\[?([0-9#@]+|%0\d+d)\]?$"));

/// Returns `true` if `path` contains a frame placeholder.
#[must_use]
pub fn is_sequence_pattern(path: &str) -> bool {
    SEQUENCE_TOKEN
        .as_ref()
        .is_ok_and(|re| re.is_match(path))
}

/// Substitute `frame` for the placeholder in `pattern`, zero-padded to the
/// placeholder's width. Returns `None` if `pattern` has no placeholder.
#[must_use]
pub fn frame_path(pattern: &str, frame: u64) -> Option<String> {
    let re = SEQUENCE_TOKEN.as_ref().ok()?;
    let caps = re.captures(pattern)?;
    let token = caps.get(1)?.as_str();
    let width = if token.starts_with('%') {
        token
            .trim_start_matches("%0")
            .trim_end_matches('d')
            .parse::<usize>()
            .ok()?
    } else {
        token.len()
    };
    let whole = caps.get(0)?;
    Some(format!(
        "{}{frame:0width$}{}",
        &pattern[..whole.start()],
        &pattern[whole.end()..]
    ))
}

/// The time range a render queue item covers, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSpan {
    pub start: f64,
    pub duration: f64,
    pub frame_duration: f64,
    /// Frames skipped between rendered frames.
    pub skip_frames: u64,
}

impl RenderSpan {
    /// Frame numbers rendered by this span.
    pub fn frames(&self) -> impl Iterator<Item = u64> + use<> {
        let (first, count) = if self.frame_duration > 0.0 {
            (
                to_frames(self.start, self.frame_duration),
                to_frames(self.duration, self.frame_duration),
            )
        } else {
            (0, 0)
        };
        let step = usize::try_from(self.skip_frames)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        (first..first + count).step_by(step)
    }
}

/// Whole frames in `seconds`. Rounds to three decimals first so float noise
/// (`0.9999999`) does not lose a frame.
fn to_frames(seconds: f64, frame_duration: f64) -> u64 {
    let frames = ((seconds / frame_duration) * 1000.0).round() / 1000.0;
    frames.trunc().max(0.0) as u64
}

/// First and last frame of the sequence `path` belongs to, found by listing
/// sibling files with the same prefix and extension.
///
/// `path` may name a frame (`plate.0001.exr`) or use a placeholder
/// (`plate.####.exr`). Returns `None` when the name carries no frame part or
/// no matching file exists.
#[must_use]
pub fn find_sequence_range(path: &Path) -> Option<(u64, u64)> {
    let re = FRAME_SUFFIX.as_ref().ok()?;
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let root = path.file_stem()?.to_str()?;
    let ext = path.extension().and_then(|e| e.to_str());

    let caps = re.captures(root)?;
    let frame_part = caps.get(2)?;
    // Keep the separator, drop the frame part.
    let prefix = root[..frame_part.start()].trim_end_matches('[');

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list sequence directory");
            return None;
        }
    };

    let mut range: Option<(u64, u64)> = None;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate.extension().and_then(|e| e.to_str()) != ext {
            continue;
        }
        let Some(stem) = candidate.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(rest) = stem.strip_prefix(prefix) else {
            continue;
        };
        let Some(frame) = re
            .captures(stem)
            .filter(|c| c.get(2).is_some_and(|m| m.as_str() == rest))
            .and_then(|c| c.get(2)?.as_str().parse::<u64>().ok())
        else {
            continue;
        };
        range = Some(match range {
            Some((lo, hi)) => (lo.min(frame), hi.max(frame)),
            None => (frame, frame),
        });
    }
    range
}
