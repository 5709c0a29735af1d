use std::collections::BTreeMap;
use std::time::SystemTime;

use http::header::{AGE, DATE, EXPIRES, VARY};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{RequestHead, ResponseHead, protocol_version_str};
use crate::semantics::{parse_cache_control, parse_date_header, parse_expires_header};

#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("cached record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cached record field {0} is invalid")]
    Field(&'static str),
}

/// One stored response variant: the response head, the identity of the
/// request that produced it, the capture timestamps and the content address
/// of the body.
#[derive(Debug, Clone)]
pub struct CachedResponseRecord {
    protocol_version: String,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    request_method: String,
    request_target: String,
    request_vary: BTreeMap<String, Vec<String>>,
    request_time: u64,
    response_time: u64,
    body_hash: String,
}

/// Serde twin of [`CachedResponseRecord`]. Header maps are sorted maps of
/// value lists, so encoding a decoded record reproduces the input bytes.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    protocol_version: String,
    status: u16,
    reason: String,
    headers: BTreeMap<String, Vec<String>>,
    request_method: String,
    request_target: String,
    request_vary: BTreeMap<String, Vec<String>>,
    request_time: u64,
    response_time: u64,
    body_hash: String,
}

impl CachedResponseRecord {
    pub fn from_response(
        request: &RequestHead,
        response: &ResponseHead,
        request_time: SystemTime,
        response_time: SystemTime,
        body_hash: String,
    ) -> Self {
        let mut request_vary = BTreeMap::new();
        for name in vary_names(&response.headers) {
            if name == "*" {
                continue;
            }
            let values = match HeaderName::try_from(name.as_str()) {
                Ok(header) => header_values(&request.headers, &header),
                Err(_) => Vec::new(),
            };
            request_vary.insert(name, values);
        }

        Self {
            protocol_version: protocol_version_str(response.version).to_string(),
            status: response.status,
            reason: response.reason.clone(),
            headers: response.headers.clone(),
            request_method: request.method.to_string(),
            request_target: request.uri.to_string(),
            request_vary,
            request_time: unix_seconds(request_time),
            response_time: unix_seconds(response_time),
            body_hash,
        }
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn request_time(&self) -> u64 {
        self.request_time
    }

    pub fn response_time(&self) -> u64 {
        self.response_time
    }

    pub fn body_hash(&self) -> &str {
        &self.body_hash
    }

    pub fn to_cache_data(&self) -> Vec<u8> {
        let persisted = PersistedRecord {
            protocol_version: self.protocol_version.clone(),
            status: self.status.as_u16(),
            reason: self.reason.clone(),
            headers: headermap_to_sorted(&self.headers),
            request_method: self.request_method.clone(),
            request_target: self.request_target.clone(),
            request_vary: self.request_vary.clone(),
            request_time: self.request_time,
            response_time: self.response_time,
            body_hash: self.body_hash.clone(),
        };
        serde_json::to_vec(&persisted).unwrap_or_default()
    }

    pub fn from_cache_data(data: &[u8]) -> Result<Self, RecordDecodeError> {
        let persisted: PersistedRecord = serde_json::from_slice(data)?;
        let status = StatusCode::from_u16(persisted.status)
            .map_err(|_| RecordDecodeError::Field("status"))?;
        let headers = sorted_to_headermap(&persisted.headers)?;

        Ok(Self {
            protocol_version: persisted.protocol_version,
            status,
            reason: persisted.reason,
            headers,
            request_method: persisted.request_method,
            request_target: persisted.request_target,
            request_vary: persisted.request_vary,
            request_time: persisted.request_time,
            response_time: persisted.response_time,
            body_hash: persisted.body_hash,
        })
    }

    pub fn date(&self) -> Option<SystemTime> {
        parse_date_header(self.header_str(&DATE))
    }

    /// Current age in seconds. The delay correction of RFC 7234 §4.2.3
    /// collapses to zero here: a single clock stamps both ends of the
    /// exchange, so `response_time` already includes the transit delay.
    pub fn age(&self) -> u64 {
        let date = self
            .date()
            .expect("cached response record without a Date header; the capture path always sets one");

        let age_value: u64 = self
            .header_str(&AGE)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);

        let apparent_age = self.response_time.saturating_sub(unix_seconds(date));
        let corrected_initial_age = apparent_age.max(age_value);
        let resident_time = unix_seconds(SystemTime::now()).saturating_sub(self.response_time);
        corrected_initial_age + resident_time
    }

    /// Freshness lifetime in seconds. `max-age` wins over `Expires`; a
    /// repeated or missing `Expires` without `max-age` means zero.
    pub fn freshness_lifetime(&self) -> u64 {
        let directives = parse_cache_control(&self.headers);
        if let Some(max_age) = directives.max_age {
            return max_age;
        }

        let mut expires_values = self.headers.get_all(EXPIRES).iter();
        match (expires_values.next(), expires_values.next()) {
            (Some(value), None) => {
                let Some(date) = self.date() else {
                    return 0;
                };
                let expires = parse_expires_header(value.to_str().unwrap_or(""));
                expires
                    .duration_since(date)
                    .map(|lifetime| lifetime.as_secs())
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.freshness_lifetime()
    }

    /// Whether this variant answers `request`: same method, same target, and
    /// the same values for every header the response varies on. `Vary: *`
    /// never matches.
    pub fn matches(&self, request: &RequestHead) -> bool {
        if request.method.as_str() != self.request_method
            || request.uri.to_string() != self.request_target
        {
            return false;
        }

        for name in vary_names(&self.headers) {
            if name == "*" {
                return false;
            }
            let request_values = match HeaderName::try_from(name.as_str()) {
                Ok(header) => header_values(&request.headers, &header),
                Err(_) => Vec::new(),
            };
            let stored_values = self.request_vary.get(&name).cloned().unwrap_or_default();
            if request_values != stored_values {
                return false;
            }
        }
        true
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Lowercased header names listed in `Vary`, across all its lines.
fn vary_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn header_values(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn headermap_to_sorted(map: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut sorted = BTreeMap::new();
    for name in map.keys() {
        sorted.insert(name.as_str().to_string(), header_values(map, name));
    }
    sorted
}

fn sorted_to_headermap(
    sorted: &BTreeMap<String, Vec<String>>,
) -> Result<HeaderMap, RecordDecodeError> {
    let mut map = HeaderMap::new();
    for (name, values) in sorted {
        let name =
            HeaderName::try_from(name.as_str()).map_err(|_| RecordDecodeError::Field("headers"))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| RecordDecodeError::Field("headers"))?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or(0)
}
