//! Timestamped lyrics parsing.
//!
//! The on-disk format is line-oriented: a timed line is
//! `[MM:SS.ff]text` (or a 3-digit fraction), a metadata line is
//! `[key:value]`. Parsing is total - malformed lines are dropped, never
//! surfaced as errors.

use std::collections::HashMap;
use std::time::Duration;

/// A single timed lyric line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// Offset from the start of the audio source.
    pub time: Duration,
    /// Display text. May be empty (rendered as a placeholder by the UI).
    pub text: String,
}

/// Parsed lyrics: time-ordered cues plus free-form metadata tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LyricsDocument {
    /// Cues sorted ascending by time; equal times keep input order.
    pub cues: Vec<Cue>,
    /// `[key:value]` tags, last write wins on duplicate keys.
    pub metadata: HashMap<String, String>,
}

impl LyricsDocument {
    /// Parse raw lyrics text into a document.
    ///
    /// Never fails: lines matching neither the timed-cue pattern nor the
    /// metadata pattern are silently skipped.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut cues = Vec::new();
        let mut metadata = HashMap::new();

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Timed-cue pattern first: only the FIRST time tag on a line is
            // the timestamp; any further tags are part of the text.
            if let Some((time, rest)) = split_time_tag(line) {
                cues.push(Cue {
                    time,
                    text: rest.trim().to_string(),
                });
                continue;
            }

            if let Some((key, value)) = parse_metadata_tag(line) {
                metadata.insert(key, value);
            }
        }

        // Stable sort: equal-time cues preserve their relative input order.
        cues.sort_by_key(|c| c.time);

        Self { cues, metadata }
    }

    /// Whether the document carries any cues.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

/// Split a leading `[MM:SS.fff]` tag off a line.
///
/// Minutes and seconds are exactly two digits; the fraction is 1-3 digits,
/// right-padded to milliseconds (`.5` and `.50` both mean 500ms). Returns
/// the tag's time and the remainder of the line.
fn split_time_tag(line: &str) -> Option<(Duration, &str)> {
    let inner = line.strip_prefix('[')?;
    let end = inner.find(']')?;
    let tag = &inner[..end];
    let rest = &inner[end + 1..];

    // 2-digit minutes, 2-digit seconds, 1-3 digit fraction: 7-9 bytes total.
    let bytes = tag.as_bytes();
    if bytes.len() < 7 || bytes.len() > 9 || bytes[2] != b':' || bytes[5] != b'.' {
        return None;
    }
    let minutes = &tag[..2];
    let seconds = &tag[3..5];
    let fraction = &tag[6..];

    if !is_digits(minutes) || !is_digits(seconds) || !is_digits(fraction) {
        return None;
    }

    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let fraction_value: u64 = fraction.parse().ok()?;
    // Right-pad to three digits: ".5" -> 500ms, ".50" -> 500ms.
    let millis = match fraction.len() {
        1 => fraction_value * 100,
        2 => fraction_value * 10,
        _ => fraction_value,
    };

    let time = Duration::from_millis(minutes * 60_000 + seconds * 1000 + millis);
    Some((time, rest))
}

/// Parse a whole-line `[key:value]` metadata tag.
///
/// The key and value are recorded verbatim (value not trimmed). Timed tags
/// never reach here - the cue pattern is tried first. A digit-only key is a
/// malformed timestamp (e.g. `[00:59]` missing its fraction), not metadata,
/// and is rejected.
fn parse_metadata_tag(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let colon = inner.find(':')?;
    let key = &inner[..colon];
    if key.is_empty() || is_digits(key) {
        return None;
    }
    let value = &inner[colon + 1..];
    Some((key.to_string(), value.to_string()))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
