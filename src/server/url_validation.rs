use crate::error::GatewayError;
use reqwest::redirect::Policy;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Parse and vet a proxy target (SSRF protection).
///
/// Accepts only absolute `http://` and `https://` URLs with a host. Unless
/// `allow_private` is set, `localhost` and IP literals in loopback, private
/// or link-local ranges are rejected.
///
/// **Hostnames** are accepted without DNS resolution; DNS rebinding is a
/// known limitation.
///
/// # Errors
/// Returns [`GatewayError::InvalidTarget`] for:
/// - Invalid or relative URLs
/// - Non-HTTP(S) schemes
/// - Blocked hosts (see above)
pub fn validate_target_url(raw: &str, allow_private: bool) -> Result<Url, GatewayError> {
    let parsed = Url::parse(raw)
        .map_err(|_| GatewayError::InvalidTarget(format!("not an absolute URL: {raw}")))?;

    // Only allow HTTP(S)
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(GatewayError::InvalidTarget(format!(
                "scheme '{scheme}' not allowed, only http/https permitted"
            )));
        }
    }

    // Require a host
    let host = parsed
        .host()
        .ok_or_else(|| GatewayError::InvalidTarget(format!("no host in URL: {raw}")))?;

    if !allow_private {
        check_host(host)?;
    }

    Ok(parsed)
}

/// Reject `localhost` names and IP literals in blocked ranges.
fn check_host(host: Host<&str>) -> Result<(), GatewayError> {
    match host {
        Host::Ipv4(ip) if is_blocked_ipv4(ip) => Err(GatewayError::InvalidTarget(format!(
            "private or reserved IPv4 address not allowed: {ip}"
        ))),
        Host::Ipv6(ip) if is_blocked_ipv6(ip) => Err(GatewayError::InvalidTarget(format!(
            "private or reserved IPv6 address not allowed: {ip}"
        ))),
        Host::Domain(name) if is_localhost_name(name) => Err(GatewayError::InvalidTarget(
            "localhost is not allowed".to_string(),
        )),
        _ => Ok(()),
    }
}

/// `localhost`, `localhost.` and anything under `.localhost` (RFC 6761).
fn is_localhost_name(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    name == "localhost" || name.ends_with(".localhost")
}

/// Maximum hops followed, matching reqwest's default policy.
const MAX_REDIRECTS: usize = 10;

/// Redirect policy for the upstream client.
///
/// With `allow_private` unset every hop goes through the same checks as the
/// initial target, so an origin cannot bounce the gateway onto an internal
/// address.
pub fn redirect_policy(allow_private: bool) -> Policy {
    if allow_private {
        return Policy::limited(MAX_REDIRECTS);
    }

    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match validate_target_url(attempt.url().as_str(), false) {
            Ok(_) => attempt.follow(),
            Err(blocked) => attempt.error(blocked),
        }
    })
}

/// The validation failure behind a redirect the policy refused, if any.
pub fn blocked_redirect(error: &reqwest::Error) -> Option<&GatewayError> {
    if !error.is_redirect() {
        return None;
    }

    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<GatewayError>() {
            return Some(blocked);
        }
        source = std::error::Error::source(inner);
    }
    None
}

/// Returns `true` for IPv4 addresses in private or reserved ranges.
///
/// Blocked ranges:
/// - `0.0.0.0/8`     : "this" network (RFC 1122)
/// - `10.0.0.0/8`    : RFC 1918 private
/// - `127.0.0.0/8`   : loopback
/// - `169.254.0.0/16`: link-local / cloud-metadata
/// - `172.16.0.0/12` : RFC 1918 private
/// - `192.168.0.0/16`: RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    let (a, b) = (octets[0], octets[1]);

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Returns `true` for IPv6 loopback, unspecified (`::`), link-local
/// (`fe80::/10`) and unique-local (`fc00::/7`) addresses, and for
/// IPv4-mapped addresses (`::ffff:a.b.c.d`) whose IPv4 part is blocked.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_loopback()
        || ip.is_unspecified()
        || (s[0] & 0xffc0) == 0xfe80
        || (s[0] & 0xfe00) == 0xfc00
        || ip.to_ipv4_mapped().is_some_and(is_blocked_ipv4)
}
