//! Solax Cloud realtime API client.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single realtime fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("API rejected request: {0}")]
    Api(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Envelope returned by `getRealtimeInfo.do`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub result: Option<RealtimeInfo>,
}

/// Realtime inverter data. Fields the inverter does not report are absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimeInfo {
    /// AC output power (W)
    #[serde(default)]
    pub acpower: Option<f64>,
    /// Energy produced today (kWh)
    #[serde(default)]
    pub yieldtoday: Option<f64>,
    /// Lifetime energy produced (kWh)
    #[serde(default)]
    pub yieldtotal: Option<f64>,
    /// Grid power (W), positive when exporting
    #[serde(default)]
    pub feedinpower: Option<f64>,
    /// Battery state of charge (%)
    #[serde(default)]
    pub soc: Option<f64>,
    /// Battery power (W), positive when charging
    #[serde(rename = "batPower", default)]
    pub bat_power: Option<f64>,
    #[serde(default)]
    pub powerdc1: Option<f64>,
    #[serde(default)]
    pub powerdc2: Option<f64>,
    #[serde(default)]
    pub powerdc3: Option<f64>,
    #[serde(default)]
    pub powerdc4: Option<f64>,
    #[serde(rename = "uploadTime", default)]
    pub upload_time: Option<String>,
}

/// One normalized reading, powers in W and energies in kWh.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// When the fetch that produced this sample started.
    pub fetched_at: DateTime<Utc>,
    pub pv_power: f64,
    pub ac_power: f64,
    pub feed_in_power: f64,
    /// Household load derived as AC output minus grid export.
    pub consumption_power: f64,
    pub battery_power: Option<f64>,
    pub battery_soc: Option<f64>,
    pub yield_today: f64,
    pub yield_total: f64,
    pub upload_time: Option<String>,
}

impl Sample {
    pub fn from_realtime(info: &RealtimeInfo, fetched_at: DateTime<Utc>) -> Self {
        let pv_power: f64 = [info.powerdc1, info.powerdc2, info.powerdc3, info.powerdc4]
            .iter()
            .flatten()
            .sum();
        let ac_power = info.acpower.unwrap_or(0.0);
        let feed_in_power = info.feedinpower.unwrap_or(0.0);

        Self {
            fetched_at,
            pv_power,
            ac_power,
            feed_in_power,
            consumption_power: ac_power - feed_in_power,
            battery_power: info.bat_power,
            battery_soc: info.soc,
            yield_today: info.yieldtoday.unwrap_or(0.0),
            yield_total: info.yieldtotal.unwrap_or(0.0),
            upload_time: info.upload_time.clone(),
        }
    }
}

/// Unwrap the envelope, turning `success: false` into an error.
pub fn parse_response(body: &[u8]) -> Result<RealtimeInfo, FetchError> {
    let response: ApiResponse =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    if !response.success {
        return Err(FetchError::Api(
            response.exception.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    response
        .result
        .ok_or_else(|| FetchError::Decode("response has no result".to_string()))
}

/// Fetch realtime data for one inverter.
pub async fn fetch_realtime(
    client: &reqwest::Client,
    api_url: &str,
    token_id: &str,
    sn: &str,
    timeout: Duration,
) -> Result<RealtimeInfo, FetchError> {
    let response = client
        .get(api_url)
        .query(&[("tokenId", token_id), ("sn", sn)])
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    parse_response(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REALTIME_OK: &str = r#"{
        "success": true,
        "exception": "Query success!",
        "result": {
            "inverterSN": "H1234567890",
            "sn": "SWABCDEFGH",
            "acpower": 2500.0,
            "yieldtoday": 12.4,
            "yieldtotal": 8123.7,
            "feedinpower": 900.0,
            "feedinenergy": 3100.2,
            "consumeenergy": 4021.9,
            "soc": 76.0,
            "batPower": -150.0,
            "powerdc1": 1400.0,
            "powerdc2": 1300.0,
            "powerdc3": null,
            "inverterStatus": "102",
            "uploadTime": "2024-06-01 12:05:00"
        },
        "code": 0
    }"#;

    #[test]
    fn test_parse_success() {
        let info = parse_response(REALTIME_OK.as_bytes()).unwrap();
        assert_eq!(info.yieldtotal, Some(8123.7));
        assert_eq!(info.acpower, Some(2500.0));
        assert_eq!(info.bat_power, Some(-150.0));
        assert_eq!(info.powerdc3, None);
        assert_eq!(info.powerdc4, None);
    }

    #[test]
    fn test_parse_api_failure() {
        let body = br#"{"success": false, "exception": "Maximum call threshold limit", "result": null}"#;
        match parse_response(body) {
            Err(FetchError::Api(msg)) => assert_eq!(msg, "Maximum call threshold limit"),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_response(b"<html>"), Err(FetchError::Decode(_))));
        assert!(matches!(parse_response(br#"{"success": true}"#), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_sample_from_realtime() {
        let info = parse_response(REALTIME_OK.as_bytes()).unwrap();
        let sample = Sample::from_realtime(&info, Utc::now());

        assert_eq!(sample.pv_power, 2700.0);
        assert_eq!(sample.ac_power, 2500.0);
        assert_eq!(sample.feed_in_power, 900.0);
        assert_eq!(sample.consumption_power, 1600.0);
        assert_eq!(sample.battery_soc, Some(76.0));
        assert_eq!(sample.yield_today, 12.4);
        assert_eq!(sample.upload_time.as_deref(), Some("2024-06-01 12:05:00"));
    }

    #[test]
    fn test_sample_defaults_missing_fields() {
        let sample = Sample::from_realtime(&RealtimeInfo::default(), Utc::now());
        assert_eq!(sample.pv_power, 0.0);
        assert_eq!(sample.consumption_power, 0.0);
        assert_eq!(sample.battery_power, None);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let client = reqwest::Client::new();
        let result = fetch_realtime(
            &client,
            "http://256.256.256.256/api",
            "token",
            "SN1",
            Duration::from_millis(100),
        )
        .await;
        assert!(result.is_err());
    }
}
