use std::collections::HashSet;
use std::time::SystemTime;

use http::HeaderMap;
use http::header::{CACHE_CONTROL, HeaderName, PRAGMA};

/// Length of an IMF-fixdate string ("Sun, 06 Nov 1994 08:49:37 GMT").
/// The obsolete RFC 850 and asctime forms have other lengths, so the length
/// check rejects them up front.
const IMF_FIXDATE_LEN: usize = 29;

/// Parsed cache-control directives. Request and response headers share the
/// structure; directives that only make sense on one side simply stay unset
/// on the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub max_age: Option<u64>,
    pub max_stale: Option<u64>,
    pub min_fresh: Option<u64>,
    pub s_maxage: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,
    pub only_if_cached: bool,
    pub must_revalidate: bool,
    pub public: bool,
    pub private: bool,
    pub proxy_revalidate: bool,
}

impl CacheDirectives {
    /// A header that cannot be parsed must never widen cacheability, so the
    /// structural failure mode is an effective `no-store`.
    fn fail_closed() -> Self {
        Self {
            no_store: true,
            ..Self::default()
        }
    }
}

/// Parses delta-seconds. Non-numeric or negative input is `None`; values
/// that overflow clamp to `u64::MAX` per RFC 7234 §1.2.1.
pub fn parse_delta_seconds(value: Option<&str>) -> Option<u64> {
    let value = value?.trim();
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    Some(value.parse::<u64>().unwrap_or(u64::MAX))
}

/// Parses an HTTP date, accepting only the IMF-fixdate form with a ` GMT` or
/// ` UTC` zone suffix.
pub fn parse_date_header(value: Option<&str>) -> Option<SystemTime> {
    let value = value?;
    if value.len() != IMF_FIXDATE_LEN {
        return None;
    }
    let stamp = value
        .strip_suffix(" GMT")
        .or_else(|| value.strip_suffix(" UTC"))?;
    httpdate::parse_http_date(&format!("{stamp} GMT")).ok()
}

/// Parses an `Expires` value. Anything unparsable, including the common
/// literal `0`, means "already expired" and maps to the epoch.
pub fn parse_expires_header(value: &str) -> SystemTime {
    parse_date_header(Some(value)).unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Parses the cache-control directives of a header block. `Cache-Control`
/// wins when present; otherwise `Pragma` is read with the same grammar.
pub fn parse_cache_control(headers: &HeaderMap) -> CacheDirectives {
    let name: HeaderName = if headers.contains_key(CACHE_CONTROL) {
        CACHE_CONTROL
    } else {
        PRAGMA
    };

    let mut components = Vec::new();
    for value in headers.get_all(name) {
        let Ok(text) = value.to_str() else {
            return CacheDirectives::fail_closed();
        };
        match parse_field_components(text) {
            Some(mut parsed) => components.append(&mut parsed),
            None => return CacheDirectives::fail_closed(),
        }
    }

    let mut directives = CacheDirectives::default();
    let mut seen = HashSet::new();
    for (name, argument) in components {
        if !seen.insert(name.clone()) {
            // Repeated directives are a structural error, even unknown ones.
            return CacheDirectives::fail_closed();
        }
        let argument = argument.as_deref();
        match name.as_str() {
            "max-age" => directives.max_age = Some(parse_delta_seconds(argument).unwrap_or(0)),
            "min-fresh" => directives.min_fresh = Some(parse_delta_seconds(argument).unwrap_or(0)),
            "s-maxage" => directives.s_maxage = Some(parse_delta_seconds(argument).unwrap_or(0)),
            // A bare max-stale accepts arbitrarily stale responses.
            "max-stale" => {
                directives.max_stale = Some(match argument {
                    None | Some("") => u64::MAX,
                    some => parse_delta_seconds(some).unwrap_or(0),
                })
            }
            "no-cache" => directives.no_cache = true,
            "no-store" => directives.no_store = true,
            "no-transform" => directives.no_transform = true,
            "only-if-cached" => directives.only_if_cached = true,
            "must-revalidate" => directives.must_revalidate = true,
            "public" => directives.public = true,
            "private" => directives.private = true,
            "proxy-revalidate" => directives.proxy_revalidate = true,
            _ => {}
        }
    }
    directives
}

fn is_token(name: &str) -> bool {
    name.bytes().all(|byte| {
        byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#'
                    | b'$'
                    | b'%'
                    | b'&'
                    | b'\''
                    | b'*'
                    | b'+'
                    | b'-'
                    | b'.'
                    | b'^'
                    | b'_'
                    | b'`'
                    | b'|'
                    | b'~'
            )
    })
}

/// Splits a `name[=value]` component list on commas, honoring quoted-string
/// arguments. Returns `None` on malformed input (unterminated quote, junk
/// between components, non-token names). Names are lowercased.
fn parse_field_components(input: &str) -> Option<Vec<(String, Option<String>)>> {
    let mut components = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches([' ', '\t', ',']);
        if rest.is_empty() {
            break;
        }

        let name_len = rest
            .find(|ch: char| matches!(ch, '=' | ',' | ' ' | '\t'))
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        if name.is_empty() || !is_token(name) {
            return None;
        }
        rest = rest[name_len..].trim_start();

        let mut argument = None;
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(quoted) = after_eq.strip_prefix('"') {
                let mut value = String::new();
                let mut escaped = false;
                let mut close = None;
                for (index, ch) in quoted.char_indices() {
                    if escaped {
                        value.push(ch);
                        escaped = false;
                        continue;
                    }
                    match ch {
                        '\\' => escaped = true,
                        '"' => {
                            close = Some(index);
                            break;
                        }
                        _ => value.push(ch),
                    }
                }
                let close = close?;
                argument = Some(value);
                rest = &quoted[close + 1..];
            } else {
                let value_len = after_eq
                    .find(|ch: char| matches!(ch, ',' | ' ' | '\t'))
                    .unwrap_or(after_eq.len());
                argument = Some(after_eq[..value_len].trim().to_string());
                rest = &after_eq[value_len..];
            }
        }

        // Only a separator or the end may follow a component.
        let after = rest.trim_start();
        if !after.is_empty() && !after.starts_with(',') {
            return None;
        }
        rest = after;

        components.push((name.to_ascii_lowercase(), argument));
    }
    Some(components)
}
