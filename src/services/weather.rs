use crate::error::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub time: String,
    pub temperature: f64,
    pub wind_speed: f64,
    pub weather_code: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub weather_code: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub current: CurrentWeather,
    pub daily: Vec<DailyForecast>,
}

impl WeatherReport {
    /// Lowest forecast minimum over the report
    pub fn coldest_day(&self) -> Option<&DailyForecast> {
        self.daily
            .iter()
            .min_by(|a, b| a.temp_min.total_cmp(&b.temp_min))
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
    daily: OpenMeteoDaily,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    time: String,
    temperature_2m: f64,
    wind_speed_10m: f64,
    weather_code: u32,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    time: Vec<NaiveDate>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    weather_code: Vec<u32>,
}

/// Current conditions and 7-day forecast from Open-Meteo
#[derive(Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    url: String,
    latitude: f64,
    longitude: f64,
}

impl WeatherClient {
    pub fn new(url: &str, latitude: f64, longitude: f64, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            latitude,
            longitude,
        })
    }

    pub async fn fetch(&self) -> Result<WeatherReport> {
        let res = self
            .http
            .get(&self.url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,wind_speed_10m,weather_code".to_string(),
                ),
                (
                    "daily",
                    "temperature_2m_max,temperature_2m_min,weather_code".to_string(),
                ),
                ("forecast_days", "7".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(AppError::Http(format!("weather API returned {}", status)));
        }
        let body = res.text().await?;
        parse_forecast(&body)
    }
}

/// Decode an Open-Meteo forecast body
pub fn parse_forecast(body: &str) -> Result<WeatherReport> {
    let raw: OpenMeteoResponse = serde_json::from_str(body)?;
    let d = raw.daily;
    let n = d.time.len();
    if d.temperature_2m_max.len() != n
        || d.temperature_2m_min.len() != n
        || d.weather_code.len() != n
    {
        return Err(AppError::Http(
            "weather API returned daily series of unequal length".to_string(),
        ));
    }

    let daily = (0..n)
        .map(|i| DailyForecast {
            date: d.time[i],
            temp_min: d.temperature_2m_min[i],
            temp_max: d.temperature_2m_max[i],
            weather_code: d.weather_code[i],
        })
        .collect();

    Ok(WeatherReport {
        current: CurrentWeather {
            time: raw.current.time,
            temperature: raw.current.temperature_2m,
            wind_speed: raw.current.wind_speed_10m,
            weather_code: raw.current.weather_code,
        },
        daily,
    })
}
