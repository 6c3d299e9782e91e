//! HLS helpers: playlist detection and the proxy rewriter.

pub mod rewriter;

/// Content type served for every rewritten playlist.
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Whether a URL path names an `.m3u8` playlist.
pub fn is_m3u8_path(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".m3u8")
}

/// Decide whether an upstream response is a playlist that must be rewritten.
///
/// True when the target path ends in `.m3u`/`.m3u8`, or the upstream content
/// type names an mpegurl flavour (`application/vnd.apple.mpegurl`,
/// `application/x-mpegURL`, `audio/mpegurl`, ...).
pub fn is_playlist(path: &str, content_type: Option<&str>) -> bool {
    let path = path.to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return true;
    }
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
        .unwrap_or(false)
}

/// Content type to substitute for a media segment whose origin sent none,
/// or only a generic one.
pub fn segment_content_type(path: &str) -> Option<&'static str> {
    let path = path.to_ascii_lowercase();
    if path.ends_with(".m4s") {
        Some("video/iso.segment")
    } else if path.ends_with(".ts") {
        Some("video/mp2t")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_by_extension() {
        assert!(is_playlist("/live/index.m3u8", None));
        assert!(is_playlist("/channels/list.m3u", Some("text/plain")));
        assert!(is_playlist("/LIVE/INDEX.M3U8", None));
    }

    #[test]
    fn playlist_by_content_type() {
        assert!(is_playlist("/live/manifest", Some("application/vnd.apple.mpegurl")));
        assert!(is_playlist("/live/manifest", Some("application/x-mpegURL")));
        assert!(is_playlist("/play", Some("audio/mpegurl; charset=utf-8")));
    }

    #[test]
    fn segments_are_not_playlists() {
        assert!(!is_playlist("/live/seg1.ts", Some("video/mp2t")));
        assert!(!is_playlist("/live/key.bin", None));
        assert!(!is_playlist("/live/init.mp4", Some("video/mp4")));
    }

    #[test]
    fn m3u8_detection_ignores_case() {
        assert!(is_m3u8_path("/a/b/Index.M3U8"));
        assert!(!is_m3u8_path("/a/b/list.m3u"));
    }

    #[test]
    fn segment_fallback_types() {
        assert_eq!(segment_content_type("/a/seg.ts"), Some("video/mp2t"));
        assert_eq!(segment_content_type("/a/chunk.m4s"), Some("video/iso.segment"));
        assert_eq!(segment_content_type("/a/key.bin"), None);
    }
}
