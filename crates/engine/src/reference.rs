//! Repository reference detection.
//!
//! Scans user text for an embedded GitLab-style repository URL and extracts a
//! normalized project slug, revision, and sub-path hint. Detection is
//! advisory: no match is `None`, never an error.

use regex::Regex;
use std::sync::OnceLock;

/// A detected repository reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoReference {
    /// Best-effort project slug (`namespace/project[/more]`), percent-decoded.
    pub project_path: String,
    /// Revision from a `/-/tree|blob|raw/<ref>` suffix.
    pub ref_name: Option<String>,
    /// Sub-path following the revision.
    pub sub_path: Option<String>,
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https?://[^/\s]*gitlab[^/\s]*/(\S+)").expect("valid reference pattern")
    })
}

/// Detect the first repository reference in `text`.
pub fn detect(text: &str) -> Option<RepoReference> {
    let captures = url_pattern().captures(text)?;
    let raw = captures.get(1)?.as_str();

    // Drop query/fragment, then punctuation a URL picks up from prose.
    let raw = raw.split(['?', '#']).next().unwrap_or(raw);
    let raw = raw.trim_end_matches(['.', ',', ';', ':', '!', ')', '>', '\'', '"']);

    let (slug, suffix) = match raw.split_once("/-/") {
        Some((slug, suffix)) => (slug, Some(suffix)),
        None => (raw, None),
    };

    let project_path = normalize_path(slug);
    if project_path.is_empty() {
        return None;
    }

    let (ref_name, sub_path) = suffix.map(parse_suffix).unwrap_or((None, None));

    let reference = RepoReference {
        project_path,
        ref_name,
        sub_path,
    };
    tracing::debug!(
        project_path = %reference.project_path,
        ref_name = ?reference.ref_name,
        sub_path = ?reference.sub_path,
        "detected repository reference"
    );
    Some(reference)
}

/// Split a `/-/` suffix into revision and sub-path. Only the tree/blob/raw
/// views carry them; other views (issues, merge requests) yield nothing.
fn parse_suffix(suffix: &str) -> (Option<String>, Option<String>) {
    let mut segments = suffix.split('/');
    match segments.next() {
        Some("tree") | Some("blob") | Some("raw") => {}
        _ => return (None, None),
    }

    let ref_name = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(percent_decode);
    let rest: Vec<String> = segments
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect();
    let sub_path = if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    };
    (ref_name, sub_path)
}

/// Trim slashes and percent-decode each segment of a slug.
fn normalize_path(slug: &str) -> String {
    slug.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Minimal percent-decoding; invalid escapes pass through untouched.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| segment.to_string())
}
