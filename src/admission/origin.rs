//! Origin parsing and auto-allow pattern matching.
//!
//! Origins arrive in several shapes (`http://localhost:5173/app`,
//! `localhost:5173`, `[::1]:8080`, `Example.COM`). They are normalized to a
//! lowercase `host[:port]` key before any comparison, and whitelist entries
//! are normalized the same way when stored.

use std::fmt;
use std::net::IpAddr;

/// A normalized origin: lowercase host plus optional port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
}

impl Origin {
    /// Parse an origin from a URL or a bare `host[:port]`.
    ///
    /// Returns `None` for empty hosts and unparseable ports.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let rest = match input.find("://") {
            Some(idx) => &input[idx + 3..],
            None => input,
        };
        let authority = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        let authority = match authority.rfind('@') {
            Some(idx) => &authority[idx + 1..],
            None => authority,
        };

        let (host, port) = parse_host_port(authority)?;
        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_lowercase(),
            port,
        })
    }

    /// Key used in whitelists: `host` or `host:port`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Whether the host is a loopback or unspecified address, or `localhost`.
    pub fn is_loopback(&self) -> bool {
        if self.host == "localhost" {
            return true;
        }
        match self.host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => write!(f, "{}:{}", host, port),
            None => f.write_str(&host),
        }
    }
}

/// Split an authority into host and optional port.
///
/// Handles bracketed IPv6 literals (`[::1]:8080`) and bare ones (`::1`),
/// which never carry a port.
fn parse_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let after = &rest[end + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some((host, port));
    }

    if authority.parse::<IpAddr>().is_ok() {
        return Some((authority, None));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

/// Check a host against an auto-allow pattern.
///
/// - `*.local` matches `app.local` and `a.b.local`, but not `local`
/// - `dev.*` matches `dev.example.com`, but not `dev`
/// - anything else is an exact match
pub fn matches_pattern(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        if host.ends_with(suffix) {
            let prefix_len = host.len() - suffix.len();
            prefix_len > 0 && host.as_bytes().get(prefix_len - 1) == Some(&b'.')
        } else {
            false
        }
    } else if let Some(prefix) = pattern.strip_suffix(".*") {
        host.len() > prefix.len() + 1
            && host.starts_with(prefix)
            && host.as_bytes().get(prefix.len()) == Some(&b'.')
    } else {
        pattern == host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_host_port() {
        let origin = Origin::parse("localhost:5173").unwrap();
        assert_eq!(origin.host, "localhost");
        assert_eq!(origin.port, Some(5173));
        assert_eq!(origin.key(), "localhost:5173");
    }

    #[test]
    fn test_parse_url() {
        let origin = Origin::parse("https://User:pw@App.Example.com:8443/path?q=1#x").unwrap();
        assert_eq!(origin.host, "app.example.com");
        assert_eq!(origin.port, Some(8443));
    }

    #[test]
    fn test_parse_without_port() {
        let origin = Origin::parse("http://example.com/").unwrap();
        assert_eq!(origin.key(), "example.com");
        assert_eq!(origin.port, None);
    }

    #[test]
    fn test_parse_ipv6() {
        let origin = Origin::parse("http://[::1]:3000/").unwrap();
        assert_eq!(origin.host, "::1");
        assert_eq!(origin.port, Some(3000));
        assert_eq!(origin.key(), "[::1]:3000");
        assert!(origin.is_loopback());
    }

    #[test]
    fn test_parse_bare_ipv6() {
        let origin = Origin::parse("::1").unwrap();
        assert_eq!(origin.host, "::1");
        assert_eq!(origin.port, None);
        assert_eq!(origin.key(), "[::1]");
        assert!(origin.is_loopback());

        let origin = Origin::parse("fe80::1").unwrap();
        assert_eq!(origin.host, "fe80::1");
        assert!(!origin.is_loopback());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Origin::parse("").is_none());
        assert!(Origin::parse("http://").is_none());
        assert!(Origin::parse("example.com:notaport").is_none());
        assert!(Origin::parse("[::1").is_none());
    }

    #[test]
    fn test_loopback() {
        assert!(Origin::parse("localhost").unwrap().is_loopback());
        assert!(Origin::parse("127.0.0.1:8000").unwrap().is_loopback());
        assert!(Origin::parse("127.4.5.6").unwrap().is_loopback());
        assert!(Origin::parse("0.0.0.0:3000").unwrap().is_loopback());
        assert!(!Origin::parse("10.0.0.1").unwrap().is_loopback());
        assert!(!Origin::parse("localhost.evil.com").unwrap().is_loopback());
    }

    #[test]
    fn test_suffix_patterns() {
        assert!(matches_pattern("*.local", "myapp.local"));
        assert!(matches_pattern("*.local", "a.b.local"));
        assert!(!matches_pattern("*.local", "local"));
        assert!(!matches_pattern("*.local", "notlocal"));
        assert!(matches_pattern("*.localhost", "api.localhost"));
    }

    #[test]
    fn test_prefix_patterns() {
        assert!(matches_pattern("dev.*", "dev.example.com"));
        assert!(matches_pattern("staging.*", "staging.shop.io"));
        assert!(matches_pattern("local.*", "local.test"));
        assert!(!matches_pattern("dev.*", "dev"));
        assert!(!matches_pattern("dev.*", "dev."));
        assert!(!matches_pattern("dev.*", "devops.example.com"));
        assert!(!matches_pattern("dev.*", "www.dev.example.com"));
    }

    #[test]
    fn test_exact_pattern() {
        assert!(matches_pattern("myhost", "myhost"));
        assert!(!matches_pattern("myhost", "myhost2"));
    }
}
