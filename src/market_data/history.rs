// =============================================================================
// Historical candle fetch — HTTP client for the OHLCV data endpoint
// =============================================================================
//
// Request:  POST <data_url> { "Ticker", "TimeFrame", "from", "to" }
// Response: { "status": "ok", "data": [ { "Timestamp", "Open", "High",
//             "Low", "Close", "Volume" } ] }
//
// Timestamps arrive as ISO-8601 with a timezone offset; numeric fields arrive
// as decimal strings and are parsed to f64 before entering the series. A
// non-"ok" status, HTTP failure, or transport failure all surface as
// `ChartError::Fetch` — the caller keeps its existing data either way.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ChartError, ChartResult};
use crate::market_data::bar::{Bar, Timeframe};

/// Retry budget for one logical fetch (bounded — never blocks indefinitely).
const FETCH_ATTEMPTS: u32 = 3;
/// Backoff between attempts, multiplied by the attempt number.
const RETRY_BACKOFF_MS: u64 = 500;

/// Request body for the history endpoint.
#[derive(Debug, Serialize)]
struct HistoryRequest {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "TimeFrame")]
    time_frame: String,
    from: String,
    to: String,
}

/// Raw response envelope; bar fields stay as JSON values until parsed.
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    status: String,
    #[serde(default)]
    data: Vec<RawBar>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Open")]
    open: serde_json::Value,
    #[serde(rename = "High")]
    high: serde_json::Value,
    #[serde(rename = "Low")]
    low: serde_json::Value,
    #[serde(rename = "Close")]
    close: serde_json::Value,
    #[serde(rename = "Volume")]
    volume: serde_json::Value,
}

/// The endpoint sends numeric values as decimal strings; tolerate plain JSON
/// numbers as well.
fn parse_decimal(val: &serde_json::Value, name: &str) -> ChartResult<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ChartError::Fetch(format!("failed to parse {name} as f64: {s:?}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ChartError::Fetch(format!("field {name} is not a valid f64"))),
        _ => Err(ChartError::Fetch(format!(
            "field {name} has unexpected JSON type"
        ))),
    }
}

/// Parse an ISO-8601 timestamp with offset (e.g. `2024-03-08T10:05:00+05:30`)
/// and normalise to UTC.
fn parse_timestamp(s: &str) -> ChartResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChartError::Fetch(format!("failed to parse timestamp {s:?}: {e}")))
}

/// Convert a raw response payload into ordered bars.
///
/// Factored out of the transport so it can be tested against fixture JSON.
fn parse_history_payload(body: &str) -> ChartResult<Vec<Bar>> {
    let resp: HistoryResponse = serde_json::from_str(body)
        .map_err(|e| ChartError::Fetch(format!("malformed history response: {e}")))?;

    if resp.status != "ok" {
        return Err(ChartError::Fetch(format!(
            "history response status is not ok: {}",
            resp.status
        )));
    }

    let mut bars = Vec::with_capacity(resp.data.len());
    for raw in &resp.data {
        bars.push(Bar {
            timestamp: parse_timestamp(&raw.timestamp)?,
            open: parse_decimal(&raw.open, "Open")?,
            high: parse_decimal(&raw.high, "High")?,
            low: parse_decimal(&raw.low, "Low")?,
            close: parse_decimal(&raw.close, "Close")?,
            volume: parse_decimal(&raw.volume, "Volume")?,
        });
    }
    Ok(bars)
}

/// Wire format for range endpoints: local-style `YYYY-MM-DD HH:MM:SS`.
fn format_range_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

// =============================================================================
// HistoryClient
// =============================================================================

/// HTTP client for the historical candle endpoint.
#[derive(Clone)]
pub struct HistoryClient {
    url: String,
    client: reqwest::Client,
}

impl HistoryClient {
    pub fn new(url: impl Into<String>) -> ChartResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ChartError::Fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Fetch bars for `[from, to]` — a single attempt.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ChartResult<Vec<Bar>> {
        let request = HistoryRequest {
            ticker: symbol.to_string(),
            time_frame: timeframe.to_string(),
            from: format_range_instant(from),
            to: format_range_instant(to),
        };
        debug!(symbol = %symbol, from = %request.from, to = %request.to, "fetching candle history");

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChartError::Fetch(format!("history request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ChartError::Fetch(format!("failed to read history response: {e}")))?;

        if !status.is_success() {
            return Err(ChartError::Fetch(format!(
                "history endpoint returned HTTP {status}"
            )));
        }

        let bars = parse_history_payload(&body)?;
        debug!(symbol = %symbol, count = bars.len(), "history fetch complete");
        Ok(bars)
    }

    /// Fetch with a bounded retry budget and linear backoff. After the last
    /// failed attempt the error is surfaced — never unbounded blocking.
    pub async fn fetch_range_with_retry(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ChartResult<Vec<Bar>> {
        let mut last_err = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_range(symbol, timeframe, from, to).await {
                Ok(bars) => return Ok(bars),
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        attempt,
                        max = FETCH_ATTEMPTS,
                        error = %e,
                        "history fetch attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < FETCH_ATTEMPTS {
                        let backoff =
                            std::time::Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ChartError::Fetch("no attempts made".into())))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_ok_payload_with_decimal_strings() {
        let body = r#"{
            "status": "ok",
            "data": [
                {
                    "Timestamp": "2024-03-08T10:00:00+05:30",
                    "Open": "100.50", "High": "101.00",
                    "Low": "100.00", "Close": "100.75", "Volume": "1200"
                },
                {
                    "Timestamp": "2024-03-08T10:05:00+05:30",
                    "Open": "100.75", "High": "101.50",
                    "Low": "100.70", "Close": "101.25", "Volume": "900"
                }
            ]
        }"#;
        let bars = parse_history_payload(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 100.50);
        assert_eq!(bars[1].close, 101.25);
        // +05:30 normalised to UTC.
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 8, 4, 30, 0).unwrap()
        );
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[test]
    fn tolerates_plain_json_numbers() {
        let body = r#"{
            "status": "ok",
            "data": [{
                "Timestamp": "2024-03-08T10:00:00Z",
                "Open": 100.5, "High": 101.0,
                "Low": 100.0, "Close": 100.75, "Volume": 1200
            }]
        }"#;
        let bars = parse_history_payload(body).unwrap();
        assert_eq!(bars[0].volume, 1200.0);
    }

    #[test]
    fn rejects_non_ok_status() {
        let body = r#"{ "status": "error", "data": [] }"#;
        let err = parse_history_payload(body).unwrap_err();
        assert!(matches!(err, ChartError::Fetch(_)));
        assert!(err.to_string().contains("not ok"));
    }

    #[test]
    fn rejects_unparseable_decimal() {
        let body = r#"{
            "status": "ok",
            "data": [{
                "Timestamp": "2024-03-08T10:00:00Z",
                "Open": "abc", "High": "1", "Low": "1", "Close": "1", "Volume": "1"
            }]
        }"#;
        assert!(parse_history_payload(body).is_err());
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let body = r#"{
            "status": "ok",
            "data": [{
                "Timestamp": "yesterday",
                "Open": "1", "High": "1", "Low": "1", "Close": "1", "Volume": "1"
            }]
        }"#;
        assert!(parse_history_payload(body).is_err());
    }

    #[test]
    fn range_instants_use_wire_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 8, 9, 5, 7).unwrap();
        assert_eq!(format_range_instant(at), "2024-03-08 09:05:07");
    }
}
