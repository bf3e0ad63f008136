use crate::tools::{extract_string_arg, extract_string_arg_opt};
use crate::traits::{Tool, ToolError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

const FORECAST_HOURS: usize = 3;
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Cities the tool can resolve, with their coordinates.
pub const CITY_COORDINATES: &[(&str, f64, f64)] = &[
    ("London", 51.5074, 0.1278),
    ("New York", 40.7128, -74.0060),
    ("Paris", 48.8566, 2.3522),
    ("Berlin", 52.52, 13.41),
    ("Tokyo", 35.6895, 139.6917),
    ("Mumbai", 19.0760, 72.8777),
    ("Pune", 18.5204, 73.8567),
];

pub fn lookup_city(city: &str) -> Option<(&'static str, f64, f64)> {
    let wanted = city.trim();
    CITY_COORDINATES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(wanted))
        .copied()
}

/// WMO weather interpretation codes as used by Open-Meteo.
pub fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Drizzle (light)",
        53 => "Drizzle (moderate)",
        55 => "Drizzle (dense intensity)",
        56 => "Freezing Drizzle (light)",
        57 => "Freezing Drizzle (dense intensity)",
        61 => "Rain (slight)",
        63 => "Rain (moderate)",
        65 => "Rain (heavy intensity)",
        66 => "Freezing Rain (light)",
        67 => "Freezing Rain (heavy intensity)",
        71 => "Snow fall (slight)",
        73 => "Snow fall (moderate)",
        75 => "Snow fall (heavy intensity)",
        77 => "Snow grains",
        80 => "Rain showers (slight)",
        81 => "Rain showers (moderate)",
        82 => "Rain showers (violent)",
        85 => "Snow showers (slight)",
        86 => "Snow showers (heavy)",
        95 => "Thunderstorm (slight or moderate)",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown conditions",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(ToolError::Failed(format!("unsupported units '{other}'"))),
        }
    }

    fn temperature_unit(self) -> &'static str {
        match self {
            Self::Metric => "celsius",
            Self::Imperial => "fahrenheit",
        }
    }

    fn wind_speed_unit(self) -> &'static str {
        match self {
            Self::Metric => "ms",
            Self::Imperial => "mph",
        }
    }

    fn temperature_symbol(self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }

    fn speed_symbol(self) -> &'static str {
        match self {
            Self::Metric => "m/s",
            Self::Imperial => "mph",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Forecast {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default)]
    pub utc_offset_seconds: i64,
    pub current: CurrentBlock,
    pub hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
pub struct CurrentBlock {
    #[serde(default)]
    pub time: Option<String>,
    pub temperature_2m: f64,
    pub weather_code: f64,
    pub wind_speed_10m: f64,
    pub relative_humidity_2m: f64,
}

#[derive(Debug, Deserialize)]
pub struct HourlyBlock {
    pub time: Vec<String>,
    pub temperature_2m: Vec<Option<f64>>,
}

/// Shapes an Open-Meteo forecast into the tool's output document.
pub fn summarize_forecast(city: &str, units: Units, forecast: &Forecast) -> Value {
    let current = &forecast.current;
    let symbol = units.temperature_symbol();

    let start = current
        .time
        .as_deref()
        .and_then(|t| NaiveDateTime::parse_from_str(t, TIME_FORMAT).ok())
        .and_then(|now| {
            forecast.hourly.time.iter().position(|t| {
                NaiveDateTime::parse_from_str(t, TIME_FORMAT)
                    .map(|hour| hour + chrono::Duration::hours(1) > now)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(0);

    let hourly: Vec<Value> = forecast
        .hourly
        .time
        .iter()
        .zip(forecast.hourly.temperature_2m.iter())
        .skip(start)
        .filter_map(|(time, temperature)| {
            let temperature = (*temperature)?;
            let label = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|_| time.clone());
            Some(json!({
                "time": label,
                "temperature": format!("{temperature:.1}{symbol}"),
            }))
        })
        .take(FORECAST_HOURS)
        .collect();

    json!({
        "city": city,
        "current_temperature": format!("{:.1}{symbol}", current.temperature_2m),
        "conditions": describe_weather_code(current.weather_code.round() as i64),
        "humidity": format!("{}%", current.relative_humidity_2m),
        "wind_speed": format!("{:.1} {}", current.wind_speed_10m, units.speed_symbol()),
        "hourly_forecast_next_3_hours": hourly,
        "api_response_metadata": {
            "latitude": forecast.latitude,
            "longitude": forecast.longitude,
            "elevation": forecast.elevation,
            "timezone_offset": forecast.utc_offset_seconds,
        }
    })
}

/// `get_current_weather`: current conditions and a short hourly outlook for
/// a known city, from the Open-Meteo forecast API.
pub struct CurrentWeatherTool {
    client: reqwest::Client,
    base_url: String,
}

impl CurrentWeatherTool {
    pub fn new() -> Self {
        Self::with_base_url(OPEN_METEO_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, latitude: f64, longitude: f64, units: Units) -> Result<Forecast, ToolError> {
        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("hourly", "temperature_2m".to_string()),
            (
                "current",
                "temperature_2m,weather_code,wind_speed_10m,relative_humidity_2m".to_string(),
            ),
            ("temperature_unit", units.temperature_unit().to_string()),
            ("wind_speed_unit", units.wind_speed_unit().to_string()),
            ("timezone", "auto".to_string()),
        ];

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ToolError::Transient(format!("weather service unreachable: {e}"))
                } else {
                    ToolError::Failed(format!("weather request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ToolError::Transient(format!("weather service returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Failed(format!("weather service returned {status}: {body}")));
        }

        response
            .json::<Forecast>()
            .await
            .map_err(|e| ToolError::Failed(format!("unreadable forecast: {e}")))
    }
}

impl Default for CurrentWeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentWeatherTool {
    fn name(&self) -> &str {
        "get_current_weather"
    }

    fn description(&self) -> &str {
        "Gets the current weather conditions and a brief hourly temperature forecast for a specified city"
    }

    fn tags(&self) -> Vec<String> {
        ["weather", "forecast", "temperature"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn examples(&self) -> Vec<String> {
        [
            "What's the weather in London?",
            "Tell me the temperature in New York",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn input_schema(&self) -> Value {
        let cities: Vec<&str> = CITY_COORDINATES.iter().map(|(name, _, _)| *name).collect();
        json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "minLength": 1,
                    "description": format!("Name of the city. Supported: {}", cities.join(", "))
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "metric (Celsius, m/s) or imperial (Fahrenheit, mph). Defaults to metric."
                }
            },
            "required": ["city"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "current_temperature": {"type": "string"},
                "conditions": {"type": "string"},
                "humidity": {"type": "string"},
                "wind_speed": {"type": "string"},
                "hourly_forecast_next_3_hours": {
                    "type": "array",
                    "maxItems": FORECAST_HOURS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "time": {"type": "string"},
                            "temperature": {"type": "string"}
                        },
                        "required": ["time", "temperature"]
                    }
                },
                "api_response_metadata": {"type": "object"}
            },
            "required": [
                "city",
                "current_temperature",
                "conditions",
                "humidity",
                "wind_speed",
                "hourly_forecast_next_3_hours"
            ]
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let city = extract_string_arg(&args, "city")?;
        let units = Units::parse(&extract_string_arg_opt(&args, "units", "metric"))?;
        info!(tool = self.name(), %city, ?units, "fetching current weather");

        let Some((name, latitude, longitude)) = lookup_city(&city) else {
            warn!(%city, "city not in coordinate table");
            return Err(ToolError::Failed(format!(
                "City '{city}' not found. Please provide a supported city."
            )));
        };

        let forecast = self.fetch(latitude, longitude, units).await?;
        Ok(summarize_forecast(name, units, &forecast))
    }
}
