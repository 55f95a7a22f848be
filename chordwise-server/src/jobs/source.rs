//! Source reference validation
//!
//! A submission is accepted only when the external 11-character video
//! identifier can be extracted from a known watch-URL shape. Validation
//! happens before any job state is created.

use chordwise_common::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Watch-URL forms: `...?v=<id>`, `...&v=<id>`, `youtu.be/<id>`
fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:[?&]v=|youtu\.be/)([A-Za-z0-9_-]{11})(?:[&#?/]|$)")
            .expect("video id pattern is valid")
    })
}

/// A validated external media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    url: String,
    video_id: String,
}

impl SourceReference {
    /// Validate a raw submission string
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 2048 {
            return Err(Error::Validation(
                "source_reference must be a non-empty URL".to_string(),
            ));
        }

        let captures = video_id_pattern().captures(trimmed).ok_or_else(|| {
            Error::Validation(format!(
                "source_reference has no recognizable video id: {}",
                trimmed
            ))
        })?;

        Ok(Self {
            url: trimmed.to_string(),
            video_id: captures[1].to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}
