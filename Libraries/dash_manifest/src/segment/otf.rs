//! Segment timing discovery for OTF streams.
//!
//! The first segment of an OTF stream carries a text header with the duration of
//! every segment, e.g.:
//!
//! ```text
//! Segment-Count: 922\r\n
//! Segment-Durations-Ms: 5120(r=920),3600,\r\n
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

use super::fetcher::{FetchRequest, HttpFetcher};
use crate::error::{Error, Result};

const DURATIONS_MARKER: &str = "Segment-Durations-Ms:";
const COUNT_MARKER: &str = "Segment-Count:";
const LINE_END: &str = "\r\n";

/// Query parameters forced onto the probe request.
const PROBE_PARAMS: [&str; 2] = ["rn=0", "sq=0"];

static DURATION_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:\(r=(\d+)\))?$").expect("valid segment duration regex"));

/// Headers sent along with stream requests.
pub fn stream_headers() -> Vec<(String, String)> {
    [
        ("accept", "*/*"),
        ("origin", "https://www.youtube.com"),
        ("referer", "https://www.youtube.com"),
        ("DNT", "?1"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDuration {
    pub duration_ms: u64,
    /// How many additional times this duration recurs.
    pub repeat_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtfSegmentInfo {
    /// Final stream URL with the probe parameters removed.
    pub resolved_url: String,
    pub segment_durations: Vec<SegmentDuration>,
    pub segment_count: Option<u64>,
}

/// Number of segments described by a duration list once repeats are expanded,
/// saturating at `u64::MAX`.
pub fn total_segments(durations: &[SegmentDuration]) -> u64 {
    durations
        .iter()
        .map(|duration| duration.repeat_count.unwrap_or(0).saturating_add(1))
        .fold(0u64, u64::saturating_add)
}

/// Appends `params` to the query of `url`.
pub fn append_query(url: &str, params: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{params}")
}

/// URL of the probe request: the stream URL with the request and sequence number forced to zero.
pub fn probe_url(url: &str) -> String {
    append_query(url, &PROBE_PARAMS.join("&"))
}

/// Removes exactly one occurrence of each forced probe parameter, leaving the rest of the URL untouched.
pub fn strip_probe_params(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let mut pending = PROBE_PARAMS.to_vec();
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| match pending.iter().position(|param| param == pair) {
            Some(index) => {
                pending.remove(index);
                false
            }
            None => true,
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

fn marker_value<'a>(body: &'a str, marker: &str) -> Option<&'a str> {
    let start = body.find(marker)? + marker.len();
    let rest = &body[start..];
    let end = rest.find(LINE_END)?;
    Some(&rest[..end])
}

/// Parses the `Segment-Durations-Ms` line of a probe response.
/// `url` is only used to describe failures.
pub fn parse_segment_durations(body: &str, url: &str) -> Result<Vec<SegmentDuration>> {
    let parse_error = |reason: String| Error::ProbeParse {
        url: url.to_string(),
        reason,
    };

    let line = marker_value(body, DURATIONS_MARKER)
        .ok_or_else(|| parse_error(format!("no {DURATIONS_MARKER} line in the response")))?;

    let mut durations = Vec::new();
    for entry in line.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let caps = DURATION_ENTRY
            .captures(entry)
            .ok_or_else(|| parse_error(format!("malformed segment duration entry {entry:?}")))?;
        let duration_ms = caps[1]
            .parse::<u64>()
            .map_err(|e| parse_error(format!("invalid duration in {entry:?}: {e}")))?;
        let repeat_count = caps
            .get(2)
            .map(|repeat| repeat.as_str().parse::<u64>())
            .transpose()
            .map_err(|e| parse_error(format!("invalid repeat count in {entry:?}: {e}")))?;

        durations.push(SegmentDuration {
            duration_ms,
            repeat_count,
        });
    }

    Ok(durations)
}

/// Parses the optional `Segment-Count` line of a probe response.
pub fn parse_segment_count(body: &str) -> Option<u64> {
    marker_value(body, COUNT_MARKER)?.trim().parse().ok()
}

/// Fetches the first segment of an OTF stream and extracts its segment timing.
#[instrument(skip_all, fields(url = %url))]
pub async fn probe_otf(
    fetcher: &dyn HttpFetcher,
    url: &str,
    headers: &[(String, String)],
) -> Result<OtfSegmentInfo> {
    let request_url = probe_url(url);
    debug!("Probing OTF stream");

    let response = fetcher
        .fetch(FetchRequest::get(&request_url).headers(headers))
        .await
        .map_err(|source| Error::Probe {
            url: request_url.clone(),
            source,
        })?;

    // Segment URLs are built on the redirected URL
    let resolved_url = strip_probe_params(&response.final_url);
    let segment_durations = parse_segment_durations(&response.body, &request_url)?;
    let segment_count = parse_segment_count(&response.body);

    let expanded = total_segments(&segment_durations);
    match segment_count {
        Some(count) if count != expanded => {
            warn!("Segment-Count is {} but the durations describe {} segments", count, expanded);
        }
        _ => debug!("Found {} segments", expanded),
    }

    Ok(OtfSegmentInfo {
        resolved_url,
        segment_durations,
        segment_count,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::BoxError;
    use crate::segment::fetcher::FetchResponse;

    const BODY: &str = "junk\r\nSegment-Count: 922\r\nSegment-Durations-Ms: 5120(r=920),3600,\r\nmore junk";

    #[test]
    fn parses_durations_and_repeats() {
        let durations = parse_segment_durations(BODY, "https://host/videoplayback").unwrap();
        assert_eq!(
            durations,
            vec![
                SegmentDuration { duration_ms: 5120, repeat_count: Some(920) },
                SegmentDuration { duration_ms: 3600, repeat_count: None },
            ]
        );
        assert_eq!(total_segments(&durations), 922);
        assert_eq!(parse_segment_count(BODY), Some(922));
    }

    #[test]
    fn skips_empty_entries() {
        let body = "Segment-Durations-Ms: , 1000 ,,2000(r=1),\r\n";
        let durations = parse_segment_durations(body, "u").unwrap();
        assert_eq!(durations.len(), 2);
        assert_eq!(durations[1], SegmentDuration { duration_ms: 2000, repeat_count: Some(1) });
    }

    #[test]
    fn missing_marker_reports_url() {
        let err = parse_segment_durations("Segment-Count: 3\r\n", "https://host/vp?id=1").unwrap_err();
        assert!(err.to_string().contains("https://host/vp?id=1"));
        match err {
            Error::ProbeParse { url, .. } => assert_eq!(url, "https://host/vp?id=1"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unterminated_line_is_an_error() {
        assert!(parse_segment_durations("Segment-Durations-Ms: 5120", "u").is_err());
    }

    #[test]
    fn malformed_entry_is_an_error() {
        let err = parse_segment_durations("Segment-Durations-Ms: 5120(r=x)\r\n", "u").unwrap_err();
        assert!(matches!(err, Error::ProbeParse { .. }));
    }

    #[test]
    fn probe_params_are_added_and_stripped() {
        assert_eq!(probe_url("https://h/vp?id=1"), "https://h/vp?id=1&rn=0&sq=0");
        assert_eq!(probe_url("https://h/vp"), "https://h/vp?rn=0&sq=0");
        assert_eq!(strip_probe_params("https://h/vp?id=1&rn=0&sq=0"), "https://h/vp?id=1");
        assert_eq!(strip_probe_params("https://h/vp?rn=0&id=1&sq=0&x=2"), "https://h/vp?id=1&x=2");
        assert_eq!(strip_probe_params("https://h/vp?rn=0&sq=0"), "https://h/vp");
        // Only one occurrence of each is removed
        assert_eq!(strip_probe_params("https://h/vp?sq=0&sq=0"), "https://h/vp?sq=0");
        assert_eq!(strip_probe_params("https://h/vp?sq=10"), "https://h/vp?sq=10");
    }

    struct Redirecting {
        requests: Mutex<Vec<FetchRequest>>,
    }

    #[async_trait]
    impl HttpFetcher for Redirecting {
        async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, BoxError> {
            self.requests.lock().unwrap().push(request);
            Ok(FetchResponse {
                final_url: "https://edge.example/vp?id=1&rn=0&sq=0".to_string(),
                body: BODY.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn probe_resolves_redirected_url() {
        let fetcher = Redirecting { requests: Mutex::new(vec![]) };
        let info = probe_otf(&fetcher, "https://origin.example/vp?id=1", &stream_headers())
            .await
            .unwrap();

        assert_eq!(info.resolved_url, "https://edge.example/vp?id=1");
        assert_eq!(info.segment_durations.len(), 2);
        assert_eq!(info.segment_count, Some(922));

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://origin.example/vp?id=1&rn=0&sq=0");
        assert_eq!(requests[0].method, reqwest::Method::GET);
        assert!(requests[0].follow_redirects);
        assert!(requests[0].headers.iter().any(|(name, _)| name == "origin"));
    }

    #[test]
    fn huge_repeat_count_saturates() {
        let body = "Segment-Durations-Ms: 5120(r=18446744073709551615),3600,\r\n";
        let durations = parse_segment_durations(body, "u").unwrap();
        assert_eq!(durations[0].repeat_count, Some(u64::MAX));
        assert_eq!(total_segments(&durations), u64::MAX);
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl HttpFetcher for Fixed {
        async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, BoxError> {
            Ok(FetchResponse {
                final_url: request.url,
                body: self.0.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn huge_repeat_count_does_not_abort_probe() {
        let fetcher = Fixed("Segment-Count: 3\r\nSegment-Durations-Ms: 5120(r=18446744073709551615),3600,\r\n");
        let info = probe_otf(&fetcher, "https://h/vp?id=1", &[]).await.unwrap();
        assert_eq!(info.resolved_url, "https://h/vp?id=1");
        assert_eq!(
            info.segment_durations,
            vec![
                SegmentDuration { duration_ms: 5120, repeat_count: Some(u64::MAX) },
                SegmentDuration { duration_ms: 3600, repeat_count: None },
            ]
        );
    }

    struct Failing;

    #[async_trait]
    impl HttpFetcher for Failing {
        async fn fetch(&self, _request: FetchRequest) -> std::result::Result<FetchResponse, BoxError> {
            Err("connection reset".into())
        }
    }

    #[tokio::test]
    async fn transport_failure_carries_probe_url() {
        let err = probe_otf(&Failing, "https://h/vp?id=1", &[]).await.unwrap_err();
        match err {
            Error::Probe { url, .. } => assert_eq!(url, "https://h/vp?id=1&rn=0&sq=0"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
