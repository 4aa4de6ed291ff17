//! URL canonicalization for the URL dedup tier.
//!
//! Rules, applied in order:
//! 1. drop volatile query parameters (cache busters, timestamps, session and
//!    auth tokens, tracking ids) and purely numeric names longer than 8 digits
//! 2. stable-sort the remaining parameters by name
//! 3. upgrade `http` to `https` and `ws` to `wss`
//! 4. drop an explicit port equal to the scheme default
//! 5. strip trailing slashes from a non-root path
//!
//! The fragment is dropped too. Unparseable input is returned unchanged.

use crate::models::CanonicalKey;
use std::collections::HashSet;
use url::Url;

/// Query parameter names removed by default (compared lowercase).
pub const DEFAULT_VOLATILE_PARAMS: &[&str] = &[
    "_",
    "t",
    "ts",
    "timestamp",
    "time",
    "cb",
    "cachebuster",
    "cache",
    "nocache",
    "v",
    "ver",
    "version",
    "rand",
    "random",
    "r",
    "nonce",
    "token",
    "access_token",
    "auth",
    "sig",
    "signature",
    "expires",
    "exp",
    "session",
    "sessionid",
    "sid",
    "jsessionid",
    "phpsessid",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "spm",
];

/// Query parameter name prefixes removed by default.
pub const DEFAULT_VOLATILE_PREFIXES: &[&str] = &["utm_"];

/// Numeric parameter names longer than this are treated as cache busters.
const NUMERIC_NAME_MAX_DIGITS: usize = 8;

/// Scope used when the input has no usable origin.
pub const OPAQUE_SCOPE: &str = "opaque";

/// Maps raw locators to [`CanonicalKey`]s.
///
/// # Example
///
/// ```rust
/// use imgdedup::services::deduplication::UrlCanonicalizer;
///
/// let canonicalizer = UrlCanonicalizer::default();
/// let a = canonicalizer.canonicalize("https://a.com/x.jpg?b=2&a=1&t=123456789");
/// let b = canonicalizer.canonicalize("https://a.com/x.jpg?a=1&b=2");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct UrlCanonicalizer {
    volatile_params: HashSet<String>,
    volatile_prefixes: Vec<String>,
}

impl Default for UrlCanonicalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_VOLATILE_PARAMS.iter().copied(),
            DEFAULT_VOLATILE_PREFIXES.iter().copied(),
        )
    }
}

impl UrlCanonicalizer {
    /// Creates a canonicalizer with custom volatile names and prefixes.
    ///
    /// Names and prefixes match case-insensitively.
    #[must_use]
    pub fn new<N, P>(params: N, prefixes: P) -> Self
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            volatile_params: params
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
            volatile_prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns true if a query parameter with this name is dropped.
    #[must_use]
    pub fn is_volatile(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        if self.volatile_params.contains(&lower) {
            return true;
        }
        if self
            .volatile_prefixes
            .iter()
            .any(|prefix| lower.starts_with(prefix.as_str()))
        {
            return true;
        }
        name.len() > NUMERIC_NAME_MAX_DIGITS && name.bytes().all(|b| b.is_ascii_digit())
    }

    /// Computes the canonical key for `raw`.
    ///
    /// Never fails: input that does not parse as an absolute URL is returned
    /// as-is, and `canonicalize(canonicalize(x)) == canonicalize(x)`.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> CanonicalKey {
        let Ok(mut url) = Url::parse(raw) else {
            tracing::trace!(raw, "unparseable locator, using raw key");
            return CanonicalKey::new(raw);
        };
        if url.cannot_be_a_base() {
            return CanonicalKey::new(url.as_str());
        }

        self.rewrite_query(&mut url);
        upgrade_scheme(&mut url);
        if url.port().is_some() && url.port() == default_port(url.scheme()) {
            let _ = url.set_port(None);
        }
        trim_trailing_slashes(&mut url);
        url.set_fragment(None);

        CanonicalKey::new(String::from(url))
    }

    fn rewrite_query(&self, url: &mut Url) {
        if url.query().is_none() {
            return;
        }
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !self.is_volatile(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if pairs.is_empty() {
            url.set_query(None);
            return;
        }
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

/// Returns the origin used to scope persisted history for `raw`.
///
/// The origin is taken after canonicalization, so `http://a.com:80/x` and
/// `https://a.com/y` share the scope `https://a.com`.
#[must_use]
pub fn origin_scope(raw: &str) -> String {
    let key = UrlCanonicalizer::default().canonicalize(raw);
    match Url::parse(key.as_str()) {
        Ok(url) => match url.origin() {
            origin @ url::Origin::Tuple(..) => origin.ascii_serialization(),
            url::Origin::Opaque(_) => OPAQUE_SCOPE.to_string(),
        },
        Err(_) => OPAQUE_SCOPE.to_string(),
    }
}

/// Maps a scope typed by a user onto the form [`origin_scope`] derives.
///
/// `https://a.com/`, `http://a.com:80` and a bare `a.com` all become
/// `https://a.com`. Input that names no host origin is kept as typed,
/// trimmed.
#[must_use]
pub fn normalize_scope(raw: &str) -> String {
    let raw = raw.trim();
    if raw == OPAQUE_SCOPE {
        return raw.to_string();
    }
    let scope = if raw.contains("://") {
        origin_scope(raw)
    } else {
        origin_scope(&format!("https://{raw}"))
    };
    if scope == OPAQUE_SCOPE {
        raw.to_string()
    } else {
        scope
    }
}

fn upgrade_scheme(url: &mut Url) {
    let secure = match url.scheme() {
        "http" => "https",
        "ws" => "wss",
        _ => return,
    };
    // Both pairs are special schemes, so the switch cannot be rejected.
    let _ = url.set_scheme(secure);
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

fn trim_trailing_slashes(url: &mut Url) {
    let path = url.path();
    if path.len() <= 1 || !path.ends_with('/') {
        return;
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        url.set_path("/");
    } else {
        let trimmed = trimmed.to_string();
        url.set_path(&trimmed);
    }
}
