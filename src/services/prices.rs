use crate::error::{AppError, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PRICE_URL: &str = "https://api.awattar.de/v1/marketdata";

/// Day-ahead spot price for one hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Cent per kWh
    pub price_ct_kwh: f64,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    data: Vec<MarketEntry>,
}

#[derive(Debug, Deserialize)]
struct MarketEntry {
    start_timestamp: i64,
    end_timestamp: i64,
    /// EUR per MWh
    marketprice: f64,
}

#[derive(Clone)]
pub struct PriceClient {
    http: reqwest::Client,
    url: String,
}

impl PriceClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Prices from the start of the current hour through the next 24 hours
    pub async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        let start = now - ChronoDuration::seconds(now.timestamp() % 3600);
        let end = start + ChronoDuration::hours(24);
        let res = self
            .http
            .get(&self.url)
            .query(&[
                ("start", start.timestamp_millis()),
                ("end", end.timestamp_millis()),
            ])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(AppError::Http(format!("price API returned {}", status)));
        }
        let body = res.text().await?;
        parse_market_data(&body)
    }
}

/// Decode an aWATTar market data body, sorted by start time
pub fn parse_market_data(body: &str) -> Result<Vec<PricePoint>> {
    let raw: MarketData = serde_json::from_str(body)?;
    let mut points = raw
        .data
        .into_iter()
        .map(|e| {
            let start = Utc.timestamp_millis_opt(e.start_timestamp).single();
            let end = Utc.timestamp_millis_opt(e.end_timestamp).single();
            match (start, end) {
                (Some(start), Some(end)) => Ok(PricePoint {
                    start,
                    end,
                    price_ct_kwh: e.marketprice / 10.0,
                }),
                _ => Err(AppError::Http(format!(
                    "price API returned invalid timestamp {}",
                    e.start_timestamp
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    points.sort_by_key(|p| p.start);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_with_bad_url_is_http_error() {
        let client = PriceClient::new("not a url", Duration::from_secs(1)).unwrap();
        let result = tokio_test::block_on(client.fetch(Utc::now()));
        assert!(matches!(result, Err(AppError::Http(_))));
    }

    #[test]
    fn test_parse_market_data_converts_units() {
        let body = r#"{
            "object": "list",
            "data": [
                {"start_timestamp": 1705316400000, "end_timestamp": 1705320000000, "marketprice": 92.5, "unit": "Eur/MWh"},
                {"start_timestamp": 1705312800000, "end_timestamp": 1705316400000, "marketprice": 101.0, "unit": "Eur/MWh"}
            ],
            "url": "/de/v1/marketdata"
        }"#;
        let points = parse_market_data(body).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points[0].start < points[1].start);
        assert!((points[0].price_ct_kwh - 10.1).abs() < 1e-9);
        assert!((points[1].price_ct_kwh - 9.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_market_data_bad_body() {
        assert!(matches!(parse_market_data("[]"), Err(AppError::Json(_))));
    }
}
