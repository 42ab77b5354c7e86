mod common;

use reqwest::Client;
use serde_json::json;
use time::{
    macros::{datetime, format_description, offset},
    Duration, OffsetDateTime, PrimitiveDateTime,
};

use healthplanet_lib::healthplanet_client::HealthPlanetClient;
use scale_lib::{errors::ScaleError as Error, scale_measurement::MeasurementSource};

use common::spawn_healthplanet_mock;

fn parse_query_time(s: &str) -> PrimitiveDateTime {
    PrimitiveDateTime::parse(
        s,
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_innerscan_request() -> Result<(), Error> {
    let (endpoint, mock) = spawn_healthplanet_mock().await;
    mock.lock().data = vec![
        json!({"date": "202403010700", "keydata": "65.50", "model": "01000117", "tag": "6021"}),
        json!({"date": "202403010700", "keydata": "18.20", "model": "01000117", "tag": "6022"}),
        json!({"date": "202403020715", "keydata": "65.10", "model": "01000117", "tag": "6021"}),
    ];
    let client = HealthPlanetClient::new(Client::new(), endpoint, "hp-token").with_days(7);

    let measurements = client.get_measurements().await?;
    assert_eq!(measurements.len(), 2);
    let first = &measurements[&datetime!(2024-03-01 07:00)];
    assert_eq!(first.mass, Some(65.5));
    assert_eq!(first.fat_pct, Some(18.2));
    assert_eq!(measurements[&datetime!(2024-03-02 07:15)].fat_pct, None);

    let mock = mock.lock();
    assert_eq!(mock.requests.len(), 1);
    let query = &mock.requests[0];
    assert_eq!(query.get("access_token").map(String::as_str), Some("hp-token"));
    assert_eq!(query.get("date").map(String::as_str), Some("1"));
    assert_eq!(query.get("tag").map(String::as_str), Some("6021,6022"));

    let from = query.get("from").map(String::as_str).unwrap_or_default();
    let to = query.get("to").map(String::as_str).unwrap_or_default();
    assert_eq!(from.len(), 14);
    assert_eq!(to.len(), 14);
    let (from, to) = (parse_query_time(from), parse_query_time(to));
    assert_eq!(to - from, Duration::days(7));

    let now = OffsetDateTime::now_utc().to_offset(offset!(+9));
    let now = PrimitiveDateTime::new(now.date(), now.time());
    assert!((now - to).abs() < Duration::minutes(1), "{to} vs {now}");
    Ok(())
}

#[tokio::test]
async fn test_innerscan_window_is_capped() -> Result<(), Error> {
    let (endpoint, mock) = spawn_healthplanet_mock().await;
    let client = HealthPlanetClient::new(Client::new(), endpoint, "hp-token").with_days(365);

    assert!(client.get_measurements().await?.is_empty());

    let mock = mock.lock();
    let query = &mock.requests[0];
    let from = parse_query_time(query.get("from").map(String::as_str).unwrap_or_default());
    let to = parse_query_time(query.get("to").map(String::as_str).unwrap_or_default());
    assert_eq!(to - from, Duration::days(90));
    Ok(())
}

#[tokio::test]
async fn test_innerscan_error_status() {
    let (endpoint, mock) = spawn_healthplanet_mock().await;
    mock.lock().status = Some(503);
    let client = HealthPlanetClient::new(Client::new(), endpoint, "hp-token");

    let result = client.get_measurements().await;
    assert_eq!(result.err().and_then(|e| e.status_code()), Some(503));
}

#[tokio::test]
async fn test_innerscan_bad_date() {
    let (endpoint, mock) = spawn_healthplanet_mock().await;
    mock.lock().data =
        vec![json!({"date": "202413010700", "keydata": "65.50", "tag": "6021"})];
    let client = HealthPlanetClient::new(Client::new(), endpoint, "hp-token");

    let result = client.get_measurements().await;
    assert!(matches!(result, Err(Error::DecodeError(_))), "{result:?}");
}
