//! Price-aware heating advice.
//!
//! Each upcoming hour is classified against the mean price of the window;
//! the cheapest contiguous block is suggested for charging the buffer tank.

use super::prices::PricePoint;
use super::weather::WeatherReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CHEAP_RATIO: f64 = 0.8;
const EXPENSIVE_RATIO: f64 = 1.2;
const FROST_THRESHOLD: f64 = -5.0;
const BUFFER_TARGET: f64 = 45.0;
const FROST_BUFFER_TARGET: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceLevel {
    Cheap,
    Normal,
    Expensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ChargeBuffer,
    Normal,
    Reduce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub current_price_ct_kwh: Option<f64>,
    pub mean_price_ct_kwh: f64,
    /// Start of the cheapest block of `window_hours` consecutive hours
    pub cheapest_window_start: Option<DateTime<Utc>>,
    pub buffer_target_temp: f64,
    pub frost_expected: bool,
}

pub fn classify(price: f64, mean: f64) -> PriceLevel {
    if price < mean * CHEAP_RATIO {
        PriceLevel::Cheap
    } else if price > mean * EXPENSIVE_RATIO {
        PriceLevel::Expensive
    } else {
        PriceLevel::Normal
    }
}

/// Advice for `now` from the upcoming prices and an optional forecast.
/// Hours that ended before `now` are ignored.
pub fn recommend(
    prices: &[PricePoint],
    forecast: Option<&WeatherReport>,
    now: DateTime<Utc>,
    window_hours: usize,
) -> Recommendation {
    let upcoming: Vec<&PricePoint> = prices.iter().filter(|p| p.end > now).collect();
    let mean = if upcoming.is_empty() {
        0.0
    } else {
        upcoming.iter().map(|p| p.price_ct_kwh).sum::<f64>() / upcoming.len() as f64
    };

    let current = upcoming
        .iter()
        .find(|p| p.start <= now && now < p.end)
        .map(|p| p.price_ct_kwh);

    let action = match current.map(|c| classify(c, mean)) {
        Some(PriceLevel::Cheap) => Action::ChargeBuffer,
        Some(PriceLevel::Expensive) => Action::Reduce,
        _ => Action::Normal,
    };

    let frost_expected = forecast
        .and_then(|f| f.coldest_day())
        .map(|d| d.temp_min < FROST_THRESHOLD)
        .unwrap_or(false);

    Recommendation {
        action,
        current_price_ct_kwh: current,
        mean_price_ct_kwh: mean,
        cheapest_window_start: cheapest_window(&upcoming, window_hours),
        buffer_target_temp: if frost_expected {
            FROST_BUFFER_TARGET
        } else {
            BUFFER_TARGET
        },
        frost_expected,
    }
}

fn cheapest_window(prices: &[&PricePoint], hours: usize) -> Option<DateTime<Utc>> {
    if hours == 0 || prices.len() < hours {
        return None;
    }
    prices
        .windows(hours)
        .map(|w| (w[0].start, w.iter().map(|p| p.price_ct_kwh).sum::<f64>()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(start, _)| start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::weather::{CurrentWeather, DailyForecast};
    use chrono::{Duration, NaiveDate, TimeZone};

    fn series(start: DateTime<Utc>, prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PricePoint {
                start: start + Duration::hours(i as i64),
                end: start + Duration::hours(i as i64 + 1),
                price_ct_kwh: *p,
            })
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(7.0, 10.0), PriceLevel::Cheap);
        assert_eq!(classify(10.0, 10.0), PriceLevel::Normal);
        assert_eq!(classify(12.5, 10.0), PriceLevel::Expensive);
    }

    #[test]
    fn test_recommend_cheap_hour_charges_buffer() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let prices = series(start, &[5.0, 12.0, 14.0, 9.0, 4.0, 4.5, 11.0, 12.0]);
        let now = start + Duration::minutes(30);

        let rec = recommend(&prices, None, now, 2);
        assert_eq!(rec.action, Action::ChargeBuffer);
        assert_eq!(rec.current_price_ct_kwh, Some(5.0));
        assert_eq!(rec.cheapest_window_start, Some(start + Duration::hours(4)));
        assert!(!rec.frost_expected);
    }

    #[test]
    fn test_recommend_skips_past_hours_and_handles_empty() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let prices = series(start, &[1.0, 20.0, 10.0, 10.0]);
        let rec = recommend(&prices, None, start + Duration::minutes(90), 1);
        assert_eq!(rec.current_price_ct_kwh, Some(20.0));
        assert_eq!(rec.action, Action::Reduce);

        let empty = recommend(&[], None, start, 3);
        assert_eq!(empty.action, Action::Normal);
        assert_eq!(empty.cheapest_window_start, None);
    }

    #[test]
    fn test_frost_raises_buffer_target() {
        let report = WeatherReport {
            current: CurrentWeather {
                time: "2024-01-15T10:00".into(),
                temperature: -2.0,
                wind_speed: 5.0,
                weather_code: 0,
            },
            daily: vec![DailyForecast {
                date: NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
                temp_min: -9.0,
                temp_max: -1.0,
                weather_code: 0,
            }],
        };
        let rec = recommend(&[], Some(&report), Utc::now(), 3);
        assert!(rec.frost_expected);
        assert_eq!(rec.buffer_target_temp, FROST_BUFFER_TARGET);
    }
}
