//! Privacy sanitization for captured text.
//!
//! Every string that leaves the capture boundary passes through [`sanitize`].
//! The relay runs it a second time on the privileged side, since the monitored
//! context is not trusted to have done so.
//!
//! # Pass Order
//!
//! Replacements are irreversible, so the order is part of the contract:
//!
//! 1. Email addresses → `[EMAIL]`
//! 2. `Bearer <token>` → `[TOKEN]`
//! 3. `password: value` / `password=value` → `password=[REDACTED]`
//! 4. Digit runs of 13–19 characters → `[CARD]`
//! 5. Alphanumeric runs of 32+ characters with at least one letter and one
//!    digit → `[API_KEY]`
//! 6. JWT triples (`eyJ….eyJ….…`) → `[JWT]`
//!
//! A JWT whose segments are long enough to look like keys is consumed by pass 5
//! before pass 6 sees it. Either way no raw segment survives.
//!
//! Page URLs go through [`sanitize_url`] instead: the host decides admission,
//! so only the path, query and fragment are rewritten.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Replacement for email addresses.
pub const EMAIL_MARKER: &str = "[EMAIL]";
/// Replacement for bearer tokens.
pub const TOKEN_MARKER: &str = "[TOKEN]";
/// Replacement for password fragments.
pub const PASSWORD_MARKER: &str = "password=[REDACTED]";
/// Replacement for card-like digit runs.
pub const CARD_MARKER: &str = "[CARD]";
/// Replacement for key-like tokens.
pub const API_KEY_MARKER: &str = "[API_KEY]";
/// Replacement for JSON web tokens.
pub const JWT_MARKER: &str = "[JWT]";

/// Minimum length of a run treated as a key.
const API_KEY_MIN_LEN: usize = 32;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email pattern")
});

static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*").expect("bearer pattern")
});

static PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)password["']?\s*[:=]\s*["']?[^\s"',;&}]+["']?"#).expect("password pattern")
});

static CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{13,19}\b").expect("card pattern"));

static KEY_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_\-]{32,}").expect("key pattern"));

static JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_\-]+\.eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+").expect("jwt pattern")
});

/// Remove secrets and PII from `text`.
///
/// Total and side-effect free: any input produces an output, and text with
/// nothing sensitive in it is returned unchanged.
pub fn sanitize(text: &str) -> String {
    let result = EMAIL.replace_all(text, EMAIL_MARKER);
    let result = BEARER.replace_all(&result, TOKEN_MARKER);
    let result = PASSWORD.replace_all(&result, PASSWORD_MARKER);
    let result = CARD.replace_all(&result, CARD_MARKER);
    let result = KEY_RUN.replace_all(&result, |caps: &Captures<'_>| {
        let run = &caps[0];
        if looks_like_key(run) {
            API_KEY_MARKER.to_string()
        } else {
            run.to_string()
        }
    });
    JWT.replace_all(&result, JWT_MARKER).into_owned()
}

/// Sanitize a URL, keeping its scheme and host intact.
///
/// Userinfo (`user:pass@`) is dropped; everything after the authority goes
/// through [`sanitize`].
pub fn sanitize_url(url: &str) -> String {
    let (scheme, rest) = match url.find("://") {
        Some(idx) => url.split_at(idx + 3),
        None => ("", url),
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    let host = match authority.rfind('@') {
        Some(idx) => &authority[idx + 1..],
        None => authority,
    };
    format!("{}{}{}", scheme, host, sanitize(tail))
}

/// Sanitize an optional field in place.
pub fn sanitize_opt(text: &mut Option<String>) {
    if let Some(value) = text.as_mut() {
        *value = sanitize(value);
    }
}

/// Check whether any sanitization pass would fire on `text`.
pub fn contains_sensitive(text: &str) -> bool {
    EMAIL.is_match(text)
        || BEARER.is_match(text)
        || PASSWORD.is_match(text)
        || CARD.is_match(text)
        || JWT.is_match(text)
        || KEY_RUN.find_iter(text).any(|m| looks_like_key(m.as_str()))
}

fn looks_like_key(run: &str) -> bool {
    run.len() >= API_KEY_MIN_LEN
        && run.bytes().any(|b| b.is_ascii_alphabetic())
        && run.bytes().any(|b| b.is_ascii_digit())
}
