use serde_json::Value;

use crate::fetch::decode::{parse_daily_series, parse_quote, QuoteRejection};
use crate::fetch::{Completion, HistoricalSeries, Quote, RequestKind, Symbol};

const HTTP_OK: u16 = 200;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;
const BODY_EXCERPT_CHARS: usize = 200;

/// Keys Alpha Vantage uses for quota notices delivered with a 200.
const QUOTA_NOTICE_KEYS: &[&str] = &["Note", "Information"];

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedResult {
    QuoteData(Quote),
    HistoricalData(HistoricalSeries),
    InvalidPayload(String),
    RateLimited {
        retry_after: Option<u64>,
        message: String,
    },
    TransientError(String),
}

/// Turns a finished transport exchange into a business-level result.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    series_key: String,
}

impl ResponseClassifier {
    pub fn new(series_key: impl Into<String>) -> Self {
        Self {
            series_key: series_key.into(),
        }
    }

    pub fn classify(
        &self,
        kind: RequestKind,
        symbol: &Symbol,
        completion: &Completion,
    ) -> ClassifiedResult {
        if let Some(error) = &completion.network_error {
            return ClassifiedResult::TransientError(error.clone());
        }

        let status = completion.status.unwrap_or(HTTP_OK);
        if status == HTTP_TOO_MANY_REQUESTS {
            return ClassifiedResult::RateLimited {
                retry_after: completion.retry_after,
                message: format!(
                    "{} provider rejected {} with HTTP 429: {}",
                    kind.label(),
                    symbol,
                    excerpt(&completion.body)
                ),
            };
        }
        if status != HTTP_OK {
            return ClassifiedResult::TransientError(format!(
                "HTTP {} for {}: {}",
                status,
                symbol,
                excerpt(&completion.body)
            ));
        }

        match kind {
            RequestKind::Quote => self.classify_quote(symbol, &completion.body),
            RequestKind::Historical => self.classify_historical(symbol, &completion.body),
        }
    }

    fn classify_quote(&self, symbol: &Symbol, body: &str) -> ClassifiedResult {
        match parse_quote(body) {
            Ok(quote) => ClassifiedResult::QuoteData(quote),
            Err(QuoteRejection::UnknownSymbol) => {
                ClassifiedResult::InvalidPayload(format!("Symbol {symbol} does not exist."))
            }
            Err(QuoteRejection::Malformed(reason)) => {
                ClassifiedResult::InvalidPayload(format!("Invalid quote for {symbol}: {reason}"))
            }
        }
    }

    fn classify_historical(&self, symbol: &Symbol, body: &str) -> ClassifiedResult {
        let root = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(root)) => root,
            Ok(_) => {
                return ClassifiedResult::InvalidPayload(format!(
                    "Historical payload for {symbol} is not a JSON object"
                ))
            }
            Err(err) => {
                return ClassifiedResult::InvalidPayload(format!(
                    "Failed to parse historical JSON for {symbol}: {err}"
                ))
            }
        };

        if !root.contains_key(&self.series_key) {
            if let Some(notice) = QUOTA_NOTICE_KEYS
                .iter()
                .find_map(|key| root.get(*key).and_then(Value::as_str))
            {
                return ClassifiedResult::RateLimited {
                    retry_after: None,
                    message: notice.to_string(),
                };
            }
            if let Some(message) = root.get("Error Message").and_then(Value::as_str) {
                return ClassifiedResult::InvalidPayload(format!("{symbol}: {message}"));
            }
        }

        match parse_daily_series(&root, &self.series_key) {
            Ok(series) => ClassifiedResult::HistoricalData(series),
            Err(err) => ClassifiedResult::InvalidPayload(format!(
                "Invalid historical data for {symbol}: {err}"
            )),
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SERIES_KEY;
    use crate::fetch::ReplyHandle;

    fn classifier() -> ResponseClassifier {
        ResponseClassifier::new(DEFAULT_SERIES_KEY)
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").unwrap()
    }

    fn ok(body: &str) -> Completion {
        Completion::response(ReplyHandle::new(1), 200, body)
    }

    #[test]
    fn network_error_is_transient() {
        let completion = Completion::network_error(ReplyHandle::new(1), "connection refused");
        assert_eq!(
            classifier().classify(RequestKind::Quote, &aapl(), &completion),
            ClassifiedResult::TransientError("connection refused".to_string())
        );
    }

    #[test]
    fn quote_429_is_rate_limited() {
        let completion = Completion::response(ReplyHandle::new(1), 429, "API limit reached")
            .with_retry_after(30);
        match classifier().classify(RequestKind::Quote, &aapl(), &completion) {
            ClassifiedResult::RateLimited {
                retry_after,
                message,
            } => {
                assert_eq!(retry_after, Some(30));
                assert!(message.contains("API limit reached"), "{message}");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn other_statuses_are_transient_and_keep_body() {
        let completion =
            Completion::response(ReplyHandle::new(1), 503, "{\"error\":\"maintenance\"}");
        match classifier().classify(RequestKind::Historical, &aapl(), &completion) {
            ClassifiedResult::TransientError(message) => {
                assert!(message.contains("HTTP 503"), "{message}");
                assert!(message.contains("maintenance"), "{message}");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn quote_without_change_is_invalid_payload() {
        let result = classifier().classify(RequestKind::Quote, &aapl(), &ok(r#"{"c":0}"#));
        assert_eq!(
            result,
            ClassifiedResult::InvalidPayload("Symbol AAPL does not exist.".to_string())
        );
    }

    #[test]
    fn quote_success_carries_fields() {
        let result = classifier().classify(
            RequestKind::Quote,
            &aapl(),
            &ok(r#"{"c":150.0,"d":1.2,"dp":0.8,"h":151,"l":149,"o":149.5,"pc":148.8,"t":1700000000}"#),
        );
        match result {
            ClassifiedResult::QuoteData(quote) => {
                assert_eq!(quote.price, 150.0);
                assert_eq!(quote.change, 1.2);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn historical_without_series_is_invalid_payload() {
        let result = classifier().classify(RequestKind::Historical, &aapl(), &ok(r#"{"foo": 1}"#));
        assert!(
            matches!(result, ClassifiedResult::InvalidPayload(_)),
            "{result:?}"
        );
    }

    #[test]
    fn malformed_historical_json_is_invalid_payload() {
        let result = classifier().classify(RequestKind::Historical, &aapl(), &ok("{\"Time"));
        assert!(
            matches!(result, ClassifiedResult::InvalidPayload(_)),
            "{result:?}"
        );
    }

    #[test]
    fn historical_quota_note_is_rate_limited() {
        let result = classifier().classify(
            RequestKind::Historical,
            &aapl(),
            &ok(r#"{"Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day."}"#),
        );
        assert!(
            matches!(result, ClassifiedResult::RateLimited { retry_after: None, .. }),
            "{result:?}"
        );
    }

    #[test]
    fn historical_error_message_is_invalid_payload() {
        let result = classifier().classify(
            RequestKind::Historical,
            &aapl(),
            &ok(r#"{"Error Message": "Invalid API call."}"#),
        );
        assert_eq!(
            result,
            ClassifiedResult::InvalidPayload("AAPL: Invalid API call.".to_string())
        );
    }

    #[test]
    fn historical_success_is_ordered_by_day() {
        let result = classifier().classify(
            RequestKind::Historical,
            &aapl(),
            &ok(r#"{"Time Series (Daily)": {
                "2024-01-03": {"1. open": "1", "2. high": "2", "3. low": "0.5", "4. close": "1.5", "5. volume": "10"},
                "2024-01-02": {"1. open": "2", "2. high": "3", "3. low": "1.5", "4. close": "2.5", "5. volume": "20"}
            }}"#),
        );
        match result {
            ClassifiedResult::HistoricalData(series) => {
                let closes: Vec<f64> = series.values().map(|bar| bar.close).collect();
                assert_eq!(closes, vec![2.5, 1.5]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
