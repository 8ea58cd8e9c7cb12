use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Context, Result};

/// Latest price snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change: f64,
    pub percent_change: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub open: Option<f64>,
    pub previous_close: Option<f64>,
    /// Provider timestamp, seconds since epoch.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Daily bars keyed by the day's midnight (UTC) in seconds since epoch.
pub type HistoricalSeries = BTreeMap<i64, HistoricalBar>;

/// Why a quote body could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteRejection {
    /// The body carries no `change`, which the provider uses for unknown tickers.
    UnknownSymbol,
    Malformed(String),
}

pub fn parse_quote(body: &str) -> std::result::Result<Quote, QuoteRejection> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| QuoteRejection::Malformed(format!("Failed to parse quote JSON: {err}")))?;
    let object = root
        .as_object()
        .ok_or_else(|| QuoteRejection::Malformed("Quote payload is not a JSON object".into()))?;

    let change = match object.get("d") {
        None | Some(Value::Null) => return Err(QuoteRejection::UnknownSymbol),
        Some(value) => required_number(value, "d").map_err(malformed)?,
    };
    let price = match object.get("c") {
        Some(value) => required_number(value, "c").map_err(malformed)?,
        None => return Err(QuoteRejection::Malformed("Quote payload missing `c`".into())),
    };

    let optional = |key: &str| -> std::result::Result<Option<f64>, QuoteRejection> {
        match object.get(key) {
            Some(value) => json_number_to_f64(value).map_err(malformed),
            None => Ok(None),
        }
    };

    Ok(Quote {
        price,
        change,
        percent_change: optional("dp")?,
        day_high: optional("h")?,
        day_low: optional("l")?,
        open: optional("o")?,
        previous_close: optional("pc")?,
        timestamp: optional("t")?.map(|secs| secs as i64),
    })
}

fn malformed(err: AppError) -> QuoteRejection {
    QuoteRejection::Malformed(err.to_string())
}

/// Extract the named daily series. Every row must be complete or the whole payload is rejected.
pub fn parse_daily_series(root: &Map<String, Value>, series_key: &str) -> Result<HistoricalSeries> {
    let series = root
        .get(series_key)
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::message(format!("Payload missing `{series_key}` object")))?;

    let mut bars = BTreeMap::new();
    for (date, entry) in series {
        let timestamp = parse_day(date)?;
        let fields = entry
            .as_object()
            .ok_or_else(|| AppError::message(format!("Entry for {date} is not an object")))?;

        let number = |name: &str| -> Result<f64> {
            let value = find_value(fields, name)
                .ok_or_else(|| AppError::message(format!("Entry for {date} missing `{name}`")))?;
            required_number(value, name)
                .with_context(|| format!("Entry for {date} has a bad `{name}`"))
                .map_err(AppError::from)
        };

        let volume = number("volume")?;
        if !volume.is_finite() || volume < 0.0 {
            return Err(AppError::message(format!(
                "Entry for {date} has a negative or non-finite volume"
            )));
        }

        bars.insert(
            timestamp,
            HistoricalBar {
                open: number("open")?,
                high: number("high")?,
                low: number("low")?,
                close: number("close")?,
                volume: volume.round() as u64,
            },
        );
    }

    Ok(bars)
}

/// Calendar day `YYYY-MM-DD` to midnight UTC, seconds since epoch.
pub fn parse_day(value: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::message("Unable to construct timestamp from date"))?;
    Ok(midnight.and_utc().timestamp())
}

/// Match `"1. open"`, `"Open"` and `"open"` alike.
fn find_value<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(key, _)| normalize_key(key) == name)
        .map(|(_, value)| value)
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn required_number(value: &Value, name: &str) -> Result<f64> {
    json_number_to_f64(value)?
        .ok_or_else(|| AppError::message(format!("Field `{name}` is empty")))
}

fn json_number_to_f64(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| AppError::message("Numeric value out of range"))
            .map(Some),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .with_context(|| format!("Failed to parse '{}' as float", trimmed))
                .map(Some)
                .map_err(AppError::from)
        }
        Value::Null => Ok(None),
        _ => Err(AppError::message("Unexpected non-numeric value in payload")),
    }
}
