use std::cmp::Ordering;

use crate::message::RequestHead;
use crate::record::CachedResponseRecord;
use crate::semantics::parse_cache_control;

/// Picks the stored response to answer `request`, trying candidates in
/// ascending `Date` order. Returns `None` when every candidate is ruled out
/// by freshness, request directives or a failed vary match.
pub fn select_stored_response(
    request: &RequestHead,
    mut records: Vec<CachedResponseRecord>,
) -> Option<CachedResponseRecord> {
    let request_directives = parse_cache_control(&request.headers);

    records.sort_by(|a, b| match (a.date(), b.date()) {
        // Undated records sort last; they only win if nothing else matches.
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    });

    for record in records {
        let age = record.age();
        let lifetime = record.freshness_lifetime();

        if let Some(max_age) = request_directives.max_age
            && age > max_age
        {
            continue;
        }

        if age >= lifetime {
            if parse_cache_control(record.headers()).must_revalidate {
                continue;
            }
            let staleness = age - lifetime;
            match request_directives.max_stale {
                Some(max_stale) if staleness < max_stale => {}
                _ => continue,
            }
        }

        if let Some(min_fresh) = request_directives.min_fresh
            && age.saturating_add(min_fresh) >= lifetime
        {
            continue;
        }

        if !record.matches(request) {
            continue;
        }

        return Some(record);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResponseHead;
    use http::header::{HeaderName, HeaderValue};
    use http::{HeaderMap, Method, StatusCode, Uri, Version};
    use std::time::{Duration, SystemTime};

    fn request(headers: &[(&'static str, &'static str)]) -> RequestHead {
        let mut head = RequestHead::new(Method::GET, Uri::from_static("https://example.org/"));
        for (name, value) in headers {
            head.headers.append(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_static(value),
            );
        }
        head
    }

    /// A record captured `age` seconds ago with the given extra headers.
    fn record_aged(age: u64, extra: &[(&'static str, String)]) -> CachedResponseRecord {
        let captured = SystemTime::now() - Duration::from_secs(age);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(captured)).unwrap(),
        );
        for (name, value) in extra {
            headers.append(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        CachedResponseRecord::from_response(
            &request(&[]),
            &ResponseHead {
                version: Version::HTTP_11,
                status: StatusCode::OK,
                reason: "OK".to_string(),
                headers,
            },
            captured,
            captured,
            format!("hash-{age}"),
        )
    }

    fn max_age(seconds: u64) -> (&'static str, String) {
        ("cache-control", format!("max-age={seconds}"))
    }

    #[test]
    fn fresh_record_is_selected() {
        let selected = select_stored_response(&request(&[]), vec![record_aged(10, &[max_age(60)])]);
        assert_eq!(selected.unwrap().body_hash(), "hash-10");
    }

    #[test]
    fn candidates_are_tried_in_date_order() {
        let records = vec![record_aged(5, &[max_age(60)]), record_aged(30, &[max_age(60)])];
        let selected = select_stored_response(&request(&[]), records);
        assert_eq!(selected.unwrap().body_hash(), "hash-30");
    }

    #[test]
    fn stale_older_record_yields_to_a_fresh_one() {
        let records = vec![record_aged(90, &[max_age(60)]), record_aged(5, &[max_age(60)])];
        let selected = select_stored_response(&request(&[]), records);
        assert_eq!(selected.unwrap().body_hash(), "hash-5");
    }

    #[test]
    fn stale_record_is_skipped() {
        assert!(select_stored_response(&request(&[]), vec![record_aged(90, &[max_age(60)])]).is_none());
    }

    #[test]
    fn max_stale_admits_bounded_staleness() {
        let stale = || vec![record_aged(90, &[max_age(60)])];
        let admitted =
            select_stored_response(&request(&[("cache-control", "max-stale=60")]), stale());
        assert!(admitted.is_some());

        // Staleness equal to the tolerance is already too much.
        let rejected =
            select_stored_response(&request(&[("cache-control", "max-stale=30")]), stale());
        assert!(rejected.is_none());
    }

    #[test]
    fn bare_max_stale_admits_anything_stale() {
        let selected = select_stored_response(
            &request(&[("cache-control", "max-stale")]),
            vec![record_aged(100_000, &[max_age(1)])],
        );
        assert!(selected.is_some());
    }

    #[test]
    fn must_revalidate_blocks_stale_use() {
        let records = vec![record_aged(
            90,
            &[("cache-control", "max-age=60, must-revalidate".to_string())],
        )];
        let selected = select_stored_response(&request(&[("cache-control", "max-stale")]), records);
        assert!(selected.is_none());
    }

    #[test]
    fn request_max_age_caps_acceptable_age() {
        let records = || vec![record_aged(30, &[max_age(600)])];
        assert!(
            select_stored_response(&request(&[("cache-control", "max-age=10")]), records())
                .is_none()
        );
        assert!(
            select_stored_response(&request(&[("cache-control", "max-age=60")]), records())
                .is_some()
        );
    }

    #[test]
    fn min_fresh_requires_remaining_lifetime() {
        let records = || vec![record_aged(30, &[max_age(60)])];
        assert!(
            select_stored_response(&request(&[("cache-control", "min-fresh=40")]), records())
                .is_none()
        );
        assert!(
            select_stored_response(&request(&[("cache-control", "min-fresh=20")]), records())
                .is_some()
        );
    }

    #[test]
    fn vary_mismatch_falls_through_to_older_match() {
        let captured = SystemTime::now() - Duration::from_secs(5);
        let date = httpdate::fmt_http_date(captured);
        let mut headers = HeaderMap::new();
        headers.insert(http::header::DATE, HeaderValue::from_str(&date).unwrap());
        headers.insert(
            http::header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=60"),
        );
        headers.insert(http::header::VARY, HeaderValue::from_static("accept"));
        let varying = CachedResponseRecord::from_response(
            &request(&[("accept", "application/json")]),
            &ResponseHead {
                version: Version::HTTP_11,
                status: StatusCode::OK,
                reason: "OK".to_string(),
                headers,
            },
            captured,
            captured,
            "hash-json".to_string(),
        );

        let records = vec![varying, record_aged(30, &[max_age(60)])];
        let selected = select_stored_response(&request(&[]), records);
        assert_eq!(selected.unwrap().body_hash(), "hash-30");
    }

    #[test]
    fn empty_candidate_list_selects_nothing() {
        assert!(select_stored_response(&request(&[]), Vec::new()).is_none());
    }
}
