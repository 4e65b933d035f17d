//! # Departure Acquisition Pipeline
//!
//! This module turns the static station list into the stations shown on the
//! next render cycle. Every cycle starts from scratch: each configured stop is
//! queried in order, the response is decoded, stale departures are dropped and
//! whatever survives becomes a [`Station`].
//!
//! ## Data Processing Pipeline
//! 1. **Request**: stop id, result limit, optional transport filter and offset
//! 2. **Fetch**: one GET per stop through a [`DepartureSource`]
//! 3. **Decode**: size-bounded JSON array of [`RawDepartureRecord`]
//! 4. **Normalize**: prefix line labels, prefer realtime over planned time,
//!    drop anything not at least one minute in the future
//! 5. **Collect**: stations with no departures left are omitted
//!
//! ## Error Handling
//! A failing stop never fails the cycle. Network errors, bad status codes,
//! empty or oversized bodies and malformed JSON all skip that one stop and the
//! pipeline moves on to the next one.

use crate::config::{ApiConfig, StationQuery};
use crate::{Departure, Station, TransportType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while fetching or decoding one station's departures.
///
/// None of these are fatal: the pipeline logs them and skips the station.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed (DNS, TLS, timeout, connection reset)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("unexpected status {0}")]
    Status(u16),

    /// Server answered successfully but sent nothing
    #[error("empty response body")]
    EmptyBody,

    /// Body exceeded the configured decode limit
    #[error("response larger than {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Body is not valid JSON
    #[error("malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// Body is not valid UTF-8
    #[error("response is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Body is JSON but not an array of departures
    #[error("expected a JSON array of departures")]
    NotAnArray,
}

impl FetchError {
    /// True when the station failed before a body could be inspected.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Status(_) | FetchError::EmptyBody
        )
    }
}

/// Query sent to the departure feed for one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartureRequest {
    pub stop_id: String,
    pub limit: u32,
    /// Comma-joined transport codes, absent when the station has no filter
    pub transport_types: Option<String>,
    /// Minute offset, absent when zero
    pub offset_minutes: Option<i32>,
}

impl DepartureRequest {
    pub fn new(query: &StationQuery, limit: u32) -> Self {
        let transport_types = if query.transport_types.is_empty() {
            None
        } else {
            Some(query.transport_types.join(","))
        };
        let offset_minutes = match query.time_offset_minutes {
            0 => None,
            offset => Some(offset),
        };
        Self {
            stop_id: query.stop_id.clone(),
            limit,
            transport_types,
            offset_minutes,
        }
    }

    /// Query string pairs in the order the feed documents them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("globalId", self.stop_id.clone()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(types) = &self.transport_types {
            pairs.push(("transportTypes", types.clone()));
        }
        if let Some(offset) = self.offset_minutes {
            pairs.push(("offsetInMinutes", offset.to_string()));
        }
        pairs
    }
}

/// Anything that can answer a [`DepartureRequest`] with a response body.
///
/// The live implementation is [`HttpDepartureSource`]; tests substitute
/// canned bodies.
#[async_trait]
pub trait DepartureSource {
    async fn fetch(&self, request: &DepartureRequest) -> Result<String, FetchError>;
}

/// Departure source backed by the MVG HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDepartureSource {
    http: reqwest::Client,
    base_url: String,
    max_response_bytes: usize,
}

impl HttpDepartureSource {
    pub fn new(api: &ApiConfig) -> Result<Self, FetchError> {
        let http = client_builder(api).build()?;
        Ok(Self::with_client(http, api))
    }

    /// Use an already configured client, e.g. one without proxy lookup.
    pub fn with_client(http: reqwest::Client, api: &ApiConfig) -> Self {
        Self {
            http,
            base_url: api.base_url.clone(),
            max_response_bytes: api.max_response_bytes,
        }
    }
}

/// Client settings every departure request shares.
pub fn client_builder(api: &ApiConfig) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(api.user_agent.clone())
        .timeout(Duration::from_secs(api.timeout_secs))
}

#[async_trait]
impl DepartureSource for HttpDepartureSource {
    async fn fetch(&self, request: &DepartureRequest) -> Result<String, FetchError> {
        debug!(url = %self.base_url, stop = %request.stop_id, "requesting departures");
        let mut response = self
            .http
            .get(&self.base_url)
            .query(&request.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_response_bytes as u64 {
                return Err(FetchError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                });
            }
        }

        // Read chunk by chunk so an oversized body is refused, not buffered
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(FetchError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(String::from_utf8(body)?)
    }
}

/// One departure exactly as the feed reports it.
///
/// The feed has used both flat (`label`, `transportType`) and nested
/// (`product.name`, `product.type`) layouts; both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDepartureRecord {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub transport_type: Option<String>,
    #[serde(default)]
    pub product: Option<RawProduct>,
    pub destination: String,
    /// Timetabled departure, epoch milliseconds
    #[serde(alias = "departureTime")]
    pub planned_departure_time: i64,
    /// Live estimate, epoch milliseconds
    #[serde(default)]
    pub realtime_departure_time: Option<i64>,
}

/// Nested product block used by older feed revisions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    #[serde(default, alias = "label")]
    pub name: Option<String>,
    #[serde(default, alias = "type")]
    pub transport_type: Option<String>,
}

impl RawDepartureRecord {
    pub fn line_label(&self) -> Option<&str> {
        self.label
            .as_deref()
            .or_else(|| self.product.as_ref().and_then(|p| p.name.as_deref()))
    }

    pub fn transport(&self) -> TransportType {
        self.transport_type
            .as_deref()
            .or_else(|| {
                self.product
                    .as_ref()
                    .and_then(|p| p.transport_type.as_deref())
            })
            .map(TransportType::from_code)
            .unwrap_or(TransportType::Other)
    }

    /// Best known departure time in epoch milliseconds.
    pub fn effective_epoch_ms(&self) -> i64 {
        self.realtime_departure_time
            .unwrap_or(self.planned_departure_time)
    }
}

/// Decode a response body into raw records.
///
/// Bodies over `max_bytes` are refused outright. A body that is not a JSON
/// array fails the whole station; individual array entries that do not look
/// like departures are dropped and the rest are kept.
pub fn decode_departures(body: &str, max_bytes: usize) -> Result<Vec<RawDepartureRecord>, FetchError> {
    if body.len() > max_bytes {
        return Err(FetchError::ResponseTooLarge { limit: max_bytes });
    }
    if body.trim().is_empty() {
        return Err(FetchError::EmptyBody);
    }

    let value: serde_json::Value = serde_json::from_str(body)?;
    let serde_json::Value::Array(entries) = value else {
        return Err(FetchError::NotAnArray);
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<RawDepartureRecord>(entry) {
            Ok(record) => records.push(record),
            Err(e) => debug!(error = %e, "dropping malformed departure entry"),
        }
    }
    Ok(records)
}

/// Whole minutes from `now` until `effective_epoch_ms`.
///
/// Returns `None` for anything that already left or leaves within the
/// current minute.
pub fn minutes_until(effective_epoch_ms: i64, now: DateTime<Utc>) -> Option<u32> {
    let departure_s = effective_epoch_ms.div_euclid(1000);
    let now_s = now.timestamp();
    if departure_s <= now_s {
        return None;
    }
    let minutes = (departure_s - now_s) / 60;
    if minutes == 0 {
        return None;
    }
    u32::try_from(minutes).ok()
}

/// Turn one raw record into a displayable departure.
pub fn normalize(record: &RawDepartureRecord, now: DateTime<Utc>) -> Option<Departure> {
    let label = record.line_label()?;
    let minutes = minutes_until(record.effective_epoch_ms(), now)?;
    Some(Departure {
        line: format!("{}{}", record.transport().line_prefix(), label),
        destination: record.destination.clone(),
        minutes,
    })
}

/// Build a station from decoded records, or `None` when nothing qualifies.
pub fn build_station(
    display_name: &str,
    records: &[RawDepartureRecord],
    now: DateTime<Utc>,
) -> Option<Station> {
    let departures: Vec<Departure> = records
        .iter()
        .filter_map(|record| normalize(record, now))
        .collect();

    if departures.is_empty() {
        return None;
    }
    Some(Station {
        display_name: display_name.to_string(),
        departures,
    })
}

/// Fetch, decode and normalize one station.
async fn fetch_station<S: DepartureSource + ?Sized>(
    source: &S,
    query: &StationQuery,
    api: &ApiConfig,
    now: DateTime<Utc>,
) -> Result<Option<Station>, FetchError> {
    let request = DepartureRequest::new(query, api.result_limit);
    let body = source.fetch(&request).await?;
    let records = decode_departures(&body, api.max_response_bytes)?;
    Ok(build_station(&query.display_name, &records, now))
}

/// Query every configured station and return those with departures to show.
///
/// Output order follows configuration order. Failing stations are logged and
/// left out; the call itself never fails.
pub async fn fetch_stations<S: DepartureSource + ?Sized>(
    source: &S,
    queries: &[StationQuery],
    api: &ApiConfig,
    now: DateTime<Utc>,
) -> Vec<Station> {
    let mut stations = Vec::with_capacity(queries.len());

    for query in queries {
        match fetch_station(source, query, api, now).await {
            Ok(Some(station)) => {
                info!(
                    station = %station.display_name,
                    departures = station.departures.len(),
                    "station updated"
                );
                stations.push(station);
            }
            Ok(None) => {
                info!(station = %query.display_name, "no upcoming departures");
            }
            Err(e) if e.is_network_failure() => {
                warn!(station = %query.display_name, error = %e, "fetch failed, skipping station");
            }
            Err(e) => {
                warn!(station = %query.display_name, error = %e, "could not decode departures, skipping station");
            }
        }
    }

    stations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the request head.
    async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/departures", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            // The client may hang up early on oversized bodies
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&head).into_owned()
        });
        (url, server)
    }

    fn http_source(url: &str, max_response_bytes: usize) -> HttpDepartureSource {
        let api = ApiConfig {
            base_url: url.to_string(),
            max_response_bytes,
            ..ApiConfig::default()
        };
        let http = client_builder(&api).no_proxy().build().unwrap();
        HttpDepartureSource::with_client(http, &api)
    }

    fn response(status: &str, headers: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {status}\r\n{headers}Connection: close\r\n\r\n").into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn request() -> DepartureRequest {
        DepartureRequest::new(&query(&["TRAM", "UBAHN"], 0), 5)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap()
    }

    fn record(label: &str, kind: &str, planned_ms: i64, realtime_ms: Option<i64>) -> RawDepartureRecord {
        RawDepartureRecord {
            label: Some(label.to_string()),
            transport_type: Some(kind.to_string()),
            product: None,
            destination: "Pasing".to_string(),
            planned_departure_time: planned_ms,
            realtime_departure_time: realtime_ms,
        }
    }

    fn query(filter: &[&str], offset: i32) -> StationQuery {
        StationQuery {
            display_name: "Central".to_string(),
            stop_id: "X1".to_string(),
            transport_types: filter.iter().map(|s| s.to_string()).collect(),
            time_offset_minutes: offset,
        }
    }

    #[test]
    fn test_request_includes_filter_and_offset() {
        let request = DepartureRequest::new(&query(&["TRAM", "UBAHN"], 4), 5);
        assert_eq!(
            request.query_pairs(),
            vec![
                ("globalId", "X1".to_string()),
                ("limit", "5".to_string()),
                ("transportTypes", "TRAM,UBAHN".to_string()),
                ("offsetInMinutes", "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_omits_empty_filter_and_zero_offset() {
        let request = DepartureRequest::new(&query(&[], 0), 5);
        assert_eq!(request.transport_types, None);
        assert_eq!(request.offset_minutes, None);
        assert_eq!(request.query_pairs().len(), 2);
    }

    #[test]
    fn test_realtime_preferred_over_planned() {
        let base = now().timestamp_millis();
        let rec = record("19", "TRAM", base + 5 * 60_000, Some(base + 9 * 60_000));
        let dep = normalize(&rec, now()).unwrap();
        assert_eq!(dep.minutes, 9);
        assert_eq!(dep.line, "T19");
    }

    #[test]
    fn test_past_and_current_minute_departures_dropped() {
        let base = now().timestamp_millis();
        assert!(normalize(&record("19", "TRAM", base - 60_000, None), now()).is_none());
        assert!(normalize(&record("19", "TRAM", base, None), now()).is_none());
        // 59 seconds out would round down to zero minutes
        assert!(normalize(&record("19", "TRAM", base + 59_000, None), now()).is_none());
        // Realtime estimate says it already left even though the plan is later
        assert!(normalize(&record("19", "TRAM", base + 600_000, Some(base - 1)), now()).is_none());
    }

    #[test]
    fn test_subway_lines_have_no_prefix() {
        let base = now().timestamp_millis();
        let dep = normalize(&record("U2", "UBAHN", base + 180_000, None), now()).unwrap();
        assert_eq!(dep.line, "U2");
        let dep = normalize(&record("8", "SBAHN", base + 180_000, None), now()).unwrap();
        assert_eq!(dep.line, "S8");
        let dep = normalize(&record("100", "BUS", base + 180_000, None), now()).unwrap();
        assert_eq!(dep.line, "B100");
    }

    #[test]
    fn test_decode_flat_and_nested_layouts() {
        let body = r#"[
            {"label": "19", "transportType": "TRAM", "destination": "Pasing",
             "plannedDepartureTime": 1000, "realtimeDepartureTime": null},
            {"product": {"name": "U1", "type": "UBAHN"}, "destination": "Olympia-Einkaufszentrum",
             "departureTime": 2000, "realtimeDepartureTime": 2500}
        ]"#;
        let records = decode_departures(body, 16 * 1024).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line_label(), Some("19"));
        assert_eq!(records[0].effective_epoch_ms(), 1000);
        assert_eq!(records[1].line_label(), Some("U1"));
        assert_eq!(records[1].transport(), TransportType::Ubahn);
        assert_eq!(records[1].effective_epoch_ms(), 2500);
    }

    #[test]
    fn test_decode_drops_malformed_entries_only() {
        let body = r#"[
            {"label": "19", "transportType": "TRAM", "destination": "Pasing", "plannedDepartureTime": 1000},
            {"label": "20", "transportType": "TRAM"},
            42
        ]"#;
        let records = decode_departures(body, 16 * 1024).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            decode_departures("{not json", 1024),
            Err(FetchError::Decode(_))
        ));
        assert!(matches!(
            decode_departures(r#"{"error": "nope"}"#, 1024),
            Err(FetchError::NotAnArray)
        ));
        assert!(matches!(decode_departures("  ", 1024), Err(FetchError::EmptyBody)));
        let big = format!("[{}]", " ".repeat(100));
        assert!(matches!(
            decode_departures(&big, 50),
            Err(FetchError::ResponseTooLarge { limit: 50 })
        ));
    }

    #[test]
    fn test_station_omitted_when_nothing_qualifies() {
        let base = now().timestamp_millis();
        let records = vec![record("19", "TRAM", base - 120_000, None)];
        assert!(build_station("Central", &records, now()).is_none());
    }

    #[test]
    fn test_station_keeps_source_order() {
        let base = now().timestamp_millis();
        let records = vec![
            record("27", "TRAM", base + 12 * 60_000, None),
            record("19", "TRAM", base + 3 * 60_000, None),
        ];
        let station = build_station("Central", &records, now()).unwrap();
        let lines: Vec<_> = station.departures.iter().map(|d| d.line.as_str()).collect();
        assert_eq!(lines, vec!["T27", "T19"]);
    }

    #[tokio::test]
    async fn test_http_source_returns_body_and_sends_query() {
        let (url, server) =
            serve_once(response("200 OK", "Content-Length: 2\r\n", b"[]")).await;

        let body = http_source(&url, 1024).fetch(&request()).await.unwrap();
        assert_eq!(body, "[]");

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /departures?globalid=x1&limit=5&transporttypes=tram%2cubahn "));
        assert!(head.contains("accept: application/json"));
        assert!(head.contains("user-agent: departure-board/"));
    }

    #[tokio::test]
    async fn test_http_source_rejects_empty_body() {
        let (url, _server) = serve_once(response("200 OK", "Content-Length: 0\r\n", b"")).await;
        let err = http_source(&url, 1024).fetch(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody));
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn test_http_source_rejects_error_status() {
        let (url, _server) = serve_once(response(
            "500 Internal Server Error",
            "Content-Length: 5\r\n",
            b"oops!",
        ))
        .await;
        let err = http_source(&url, 1024).fetch(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(500)));
    }

    #[tokio::test]
    async fn test_http_source_refuses_declared_oversize() {
        let body = vec![b' '; 100];
        let (url, _server) =
            serve_once(response("200 OK", "Content-Length: 100\r\n", &body)).await;
        let err = http_source(&url, 30).fetch(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge { limit: 30 }));
    }

    #[tokio::test]
    async fn test_http_source_stops_reading_oversized_chunked_body() {
        let chunk = format!("14\r\n{}\r\n", " ".repeat(20));
        let body = format!("{chunk}{chunk}{chunk}0\r\n\r\n");
        let (url, _server) = serve_once(response(
            "200 OK",
            "Transfer-Encoding: chunked\r\n",
            body.as_bytes(),
        ))
        .await;
        let err = http_source(&url, 30).fetch(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge { limit: 30 }));
        assert!(!err.is_network_failure());
    }

    #[tokio::test]
    async fn test_http_source_rejects_invalid_utf8() {
        let (url, _server) =
            serve_once(response("200 OK", "Content-Length: 3\r\n", &[b'[', 0xFF, b']'])).await;
        let err = http_source(&url, 1024).fetch(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUtf8(_)));
        assert!(!err.is_network_failure());
    }

    proptest! {
        #[test]
        fn minutes_follow_floor_formula(offset_ms in -3_600_000i64..86_400_000, realtime_shift in proptest::option::of(-600_000i64..600_000)) {
            let base = now().timestamp_millis();
            let planned = base + offset_ms;
            let rec = record("1", "BUS", planned, realtime_shift.map(|s| planned + s));
            let effective_s = rec.effective_epoch_ms().div_euclid(1000);
            let now_s = now().timestamp();

            match normalize(&rec, now()) {
                Some(dep) => {
                    prop_assert!(effective_s > now_s);
                    prop_assert!(dep.minutes > 0);
                    prop_assert_eq!(dep.minutes as i64, (effective_s - now_s) / 60);
                }
                None => prop_assert!((effective_s - now_s) < 60),
            }
        }
    }
}
