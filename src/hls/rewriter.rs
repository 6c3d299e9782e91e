//! Line-oriented playlist rewriting.
//!
//! Every reference in a playlist (segment lines, `URI="..."` attributes of
//! `EXT-X-KEY`, `EXT-X-MAP`, `EXT-X-MEDIA`, ...) is resolved against the URL
//! the playlist was fetched from and re-encoded as a gateway URL, so the
//! player's follow-up requests come back through the proxy. Everything else,
//! including line terminators, is copied through byte-for-byte.
//!
//! The rewriter works on raw text rather than a parsed playlist: parse and
//! serialize round-trips drop unknown tags and normalise attribute quoting,
//! and both must survive here untouched.

use tracing::debug;
use url::{Url, form_urlencoded};

/// Classification of one playlist line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `#` line carrying a quoted `URI=` attribute
    TagWithUri,
    /// Any other `#` line (`#EXTM3U`, `#EXTINF:...`, comments)
    Tag,
    /// Empty or whitespace-only
    Blank,
    /// Bare segment or sub-playlist reference
    Uri,
}

/// Classify a single line (without its terminator).
pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        if has_quoted_uri(trimmed) {
            LineKind::TagWithUri
        } else {
            LineKind::Tag
        }
    } else if trimmed.is_empty() {
        LineKind::Blank
    } else {
        LineKind::Uri
    }
}

fn has_quoted_uri(line: &str) -> bool {
    line.match_indices("URI=")
        .any(|(idx, _)| matches!(line.as_bytes().get(idx + 4), Some(b'"' | b'\'')))
}

/// How rewritten references point back at the gateway.
#[derive(Debug, Clone)]
pub struct ProxyLink {
    proxy_path: String,
    referer_origin: Option<String>,
}

impl ProxyLink {
    /// Link to the gateway mounted at `proxy_path` (e.g. `/api/proxy`).
    pub fn new(proxy_path: impl Into<String>) -> Self {
        Self {
            proxy_path: proxy_path.into(),
            referer_origin: None,
        }
    }

    /// Carry `origin` as the `ref` parameter on links that leave it.
    ///
    /// Sub-CDNs frequently check the Referer of the embedding site rather
    /// than their own, so cross-origin references keep the origin the
    /// playlist was requested under.
    pub fn with_referer_origin(mut self, origin: impl Into<String>) -> Self {
        self.referer_origin = Some(origin.into());
        self
    }

    /// Encode an absolute URL as `{proxy_path}?url=<percent-encoded>`.
    pub fn encode(&self, absolute: &str) -> String {
        let mut link = format!("{}?url={}", self.proxy_path, encode_component(absolute));
        if let Some(origin) = &self.referer_origin {
            let same_origin = Url::parse(absolute)
                .map(|u| u.origin().ascii_serialization() == *origin)
                .unwrap_or(false);
            if !same_origin {
                link.push_str("&ref=");
                link.push_str(&encode_component(origin));
            }
        }
        link
    }
}

fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Resolve a playlist reference against the URL the playlist came from.
///
/// Tie-break order: already absolute, protocol-relative (`//host/...`),
/// root-relative (`/path`), then relative to the source's directory.
/// Returns `None` for empty or unresolvable references.
pub fn resolve_reference(reference: &str, source: &Url) -> Option<String> {
    if reference.is_empty() {
        return None;
    }
    if Url::parse(reference).is_ok() {
        return Some(reference.to_string());
    }
    if reference.starts_with("//") {
        return Some(format!("{}:{}", source.scheme(), reference));
    }
    if reference.starts_with('/') {
        let host = source.host_str()?;
        let port = source.port().map(|p| format!(":{p}")).unwrap_or_default();
        return Some(format!("{}://{}{}{}", source.scheme(), host, port, reference));
    }
    source.join(reference).ok().map(String::from)
}

/// Output of [`rewrite_playlist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPlaylist {
    pub body: String,
    /// Number of references re-pointed at the gateway
    pub references: usize,
}

/// Rewrite every reference in `text` to flow through the gateway.
///
/// `source` is the absolute URL the playlist was fetched from. Lines whose
/// reference cannot be resolved, and tags with an unquoted or unterminated
/// `URI=` value, are left exactly as they were.
pub fn rewrite_playlist(text: &str, source: &Url, link: &ProxyLink) -> RewrittenPlaylist {
    let mut body = String::with_capacity(text.len() * 2);
    let mut references = 0;

    for raw in text.split_inclusive('\n') {
        let (line, ending) = split_line_ending(raw);

        match classify(line) {
            LineKind::TagWithUri => {
                let rewritten = rewrite_uri_attributes(line, |value| {
                    let resolved = resolve_reference(value, source)?;
                    references += 1;
                    Some(link.encode(&resolved))
                });
                body.push_str(&rewritten);
            }
            LineKind::Tag | LineKind::Blank => body.push_str(line),
            LineKind::Uri => match resolve_reference(line.trim(), source) {
                Some(resolved) => {
                    references += 1;
                    body.push_str(&link.encode(&resolved));
                }
                None => {
                    debug!("Leaving unresolvable playlist line as-is: {}", line);
                    body.push_str(line);
                }
            },
        }

        body.push_str(ending);
    }

    debug!("Rewrote {} playlist references from {}", references, source);

    RewrittenPlaylist { body, references }
}

/// Split a line produced by `split_inclusive('\n')` into content and terminator.
fn split_line_ending(raw: &str) -> (&str, &str) {
    let content_len = if raw.ends_with("\r\n") {
        raw.len() - 2
    } else if raw.ends_with('\n') {
        raw.len() - 1
    } else {
        raw.len()
    };
    raw.split_at(content_len)
}

/// Replace each quoted `URI=` value in `line` with `rewrite(value)`.
///
/// The original quote character and all surrounding text are kept. An
/// unquoted value is skipped; an unterminated quote stops processing and the
/// remainder of the line is copied verbatim.
fn rewrite_uri_attributes(line: &str, mut rewrite: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(line.len() + 64);
    let mut rest = line;

    while let Some(idx) = rest.find("URI=") {
        let (head, tail) = rest.split_at(idx + 4);
        out.push_str(head);
        rest = tail;

        let quote = match rest.as_bytes().first() {
            Some(b'"') => '"',
            Some(b'\'') => '\'',
            _ => continue,
        };
        let quoted = &rest[1..];
        let Some(end) = quoted.find(quote) else {
            break;
        };

        let value = &quoted[..end];
        out.push(quote);
        match rewrite(value) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(value),
        }
        out.push(quote);
        rest = &quoted[end + 1..];
    }

    out.push_str(rest);
    out
}
