//! Acquisition pipeline scenarios against a scripted departure feed.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use departure_board_lib::{
    config::{ApiConfig, Config, StationQuery},
    departures::{fetch_stations, DepartureRequest, DepartureSource, FetchError},
    Departure, Station,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// Feed that answers each stop id from a script and records every request.
#[derive(Default)]
struct ScriptedFeed {
    responses: HashMap<String, Result<String, u16>>,
    requests: Mutex<Vec<DepartureRequest>>,
}

impl ScriptedFeed {
    fn respond(mut self, stop_id: &str, body: impl Into<String>) -> Self {
        self.responses.insert(stop_id.to_string(), Ok(body.into()));
        self
    }

    fn fail(mut self, stop_id: &str, status: u16) -> Self {
        self.responses.insert(stop_id.to_string(), Err(status));
        self
    }

    fn requests(&self) -> Vec<DepartureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DepartureSource for ScriptedFeed {
    async fn fetch(&self, request: &DepartureRequest) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.get(&request.stop_id) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(FetchError::Status(*status)),
            None => Err(FetchError::EmptyBody),
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 7, 30, 0).unwrap()
}

fn at(offset: ChronoDuration) -> i64 {
    (now() + offset).timestamp_millis()
}

fn station(name: &str, stop_id: &str, filter: &[&str], offset: i32) -> StationQuery {
    StationQuery {
        display_name: name.to_string(),
        stop_id: stop_id.to_string(),
        transport_types: filter.iter().map(|s| s.to_string()).collect(),
        time_offset_minutes: offset,
    }
}

fn tram_body(label: &str, destination: &str, offset: ChronoDuration) -> String {
    format!(
        r#"[{{"label": "{label}", "transportType": "TRAM", "destination": "{destination}",
             "plannedDepartureTime": {}}}]"#,
        at(offset)
    )
}

/// A single tram ten minutes out survives; one that left a minute ago is dropped.
#[tokio::test]
async fn central_station_end_to_end() {
    let body = format!(
        r#"[
            {{"label": "19", "transportType": "TRAM", "destination": "Pasing",
              "plannedDepartureTime": {}, "realtimeDepartureTime": null}},
            {{"label": "27", "transportType": "TRAM", "destination": "Petuelring",
              "plannedDepartureTime": {}}}
        ]"#,
        at(ChronoDuration::minutes(10)),
        at(ChronoDuration::minutes(-1)),
    );
    let feed = ScriptedFeed::default().respond("X1", body);
    let queries = vec![station("Central", "X1", &["TRAM", "UBAHN"], 0)];

    let stations = fetch_stations(&feed, &queries, &ApiConfig::default(), now()).await;

    assert_eq!(
        stations,
        vec![Station {
            display_name: "Central".to_string(),
            departures: vec![Departure {
                line: "T19".to_string(),
                destination: "Pasing".to_string(),
                minutes: 10,
            }],
        }]
    );

    let requests = feed.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].stop_id, "X1");
    assert_eq!(requests[0].limit, 5);
    assert_eq!(requests[0].transport_types.as_deref(), Some("TRAM,UBAHN"));
    assert_eq!(requests[0].offset_minutes, None);
}

/// Every failure kind skips only its own station and keeps configuration order.
#[tokio::test]
async fn failing_stations_are_skipped() {
    let feed = ScriptedFeed::default()
        .respond("A", tram_body("19", "Pasing", ChronoDuration::minutes(4)))
        .fail("B", 503)
        .respond("C", "{not json")
        .respond("D", r#"{"error": "unknown stop"}"#)
        .respond("F", tram_body("20", "Moosach", ChronoDuration::minutes(7)));
    let queries = vec![
        station("Alpha", "A", &[], 0),
        station("Bravo", "B", &[], 0),
        station("Charlie", "C", &[], 0),
        station("Delta", "D", &[], 0),
        station("Echo", "E", &[], 0),
        station("Foxtrot", "F", &[], 0),
    ];

    let stations = fetch_stations(&feed, &queries, &ApiConfig::default(), now()).await;

    let names: Vec<_> = stations.iter().map(|s| s.display_name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Foxtrot"]);
    assert_eq!(feed.requests().len(), queries.len(), "every station is still queried");
}

/// Bodies over the decode limit are refused.
#[tokio::test]
async fn oversized_response_skips_station() {
    let mut body = tram_body("19", "Pasing", ChronoDuration::minutes(4));
    body.push_str(&" ".repeat(200));
    let feed = ScriptedFeed::default().respond("X1", body);
    let api = ApiConfig {
        max_response_bytes: 128,
        ..ApiConfig::default()
    };

    let stations = fetch_stations(&feed, &[station("Central", "X1", &[], 0)], &api, now()).await;
    assert!(stations.is_empty());
}

/// A station whose departures have all left is left out entirely.
#[tokio::test]
async fn station_without_upcoming_departures_is_omitted() {
    let feed = ScriptedFeed::default()
        .respond("X1", tram_body("19", "Pasing", ChronoDuration::seconds(30)))
        .respond("X2", "[]");
    let queries = vec![station("Central", "X1", &[], 0), station("Harbour", "X2", &[], 0)];

    let stations = fetch_stations(&feed, &queries, &ApiConfig::default(), now()).await;
    assert!(stations.is_empty());
}

/// Requests follow the configured filter and offset of each station.
#[tokio::test]
async fn requests_follow_configured_stations() {
    let mut config = Config::default();
    config.stations = vec![
        station("Central", "X1", &["SBAHN"], 0),
        station("Harbour", "X2", &[], 3),
    ];
    let feed = ScriptedFeed::default();

    fetch_stations(&feed, &config.stations, &config.api, now()).await;

    let pairs: Vec<_> = feed.requests().iter().map(|r| r.query_pairs()).collect();
    assert_eq!(
        pairs,
        vec![
            vec![
                ("globalId", "X1".to_string()),
                ("limit", "5".to_string()),
                ("transportTypes", "SBAHN".to_string()),
            ],
            vec![
                ("globalId", "X2".to_string()),
                ("limit", "5".to_string()),
                ("offsetInMinutes", "3".to_string()),
            ],
        ]
    );
}

proptest! {
    /// Whatever the feed returns, stored departures are always in the future
    /// and never outnumber the records they came from.
    #[test]
    fn stored_departures_are_upcoming(offsets in proptest::collection::vec(-7_200i64..7_200, 0..12)) {
        let records: Vec<String> = offsets
            .iter()
            .enumerate()
            .map(|(i, secs)| format!(
                r#"{{"label": "{i}", "transportType": "BUS", "destination": "Depot",
                     "plannedDepartureTime": {}}}"#,
                at(ChronoDuration::seconds(*secs))
            ))
            .collect();
        let feed = ScriptedFeed::default().respond("X1", format!("[{}]", records.join(",")));
        let queries = vec![station("Central", "X1", &[], 0)];

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let stations = rt.block_on(fetch_stations(&feed, &queries, &ApiConfig::default(), now()));

        let upcoming = offsets.iter().filter(|secs| **secs >= 60).count();
        match stations.first() {
            Some(station) => {
                prop_assert_eq!(station.departures.len(), upcoming);
                prop_assert!(station.departures.iter().all(|d| d.minutes > 0));
                prop_assert!(station.departures.iter().all(|d| d.line.starts_with('B')));
            }
            None => prop_assert_eq!(upcoming, 0),
        }
    }
}
