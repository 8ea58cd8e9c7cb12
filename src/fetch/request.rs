use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};

/// Upper-cased, trimmed ticker used as the queue dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_input("Stock symbol cannot be empty."));
        }
        Ok(Symbol(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Quote,
    Historical,
}

impl RequestKind {
    pub fn slug(self) -> &'static str {
        match self {
            RequestKind::Quote => "quote",
            RequestKind::Historical => "historical",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RequestKind::Quote => "Quote",
            RequestKind::Historical => "Historical data",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Correlates a dispatched request with its lifecycle events.
///
/// Derived only from `(kind, symbol)` so repeated downloads of the same series share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new(kind: RequestKind, symbol: &Symbol) -> Self {
        DownloadId(format!("{}:{}", kind.slug(), symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request ready to hand to the transport. Immutable once built.
#[derive(Clone)]
pub struct OutboundRequest {
    symbol: Symbol,
    kind: RequestKind,
    download_id: DownloadId,
    url: String,
}

impl OutboundRequest {
    pub fn build(config: &Config, symbol: Symbol, kind: RequestKind, api_key: &str) -> Result<Self> {
        let template = match kind {
            RequestKind::Quote => &config.quote.url_template,
            RequestKind::Historical => &config.historical.url_template,
        };

        let replacements = HashMap::from([
            ("symbol".to_string(), symbol.as_str().to_string()),
            ("key".to_string(), api_key.to_string()),
        ]);
        let url = render_template(template, &replacements)?;

        Ok(Self {
            download_id: DownloadId::new(kind, &symbol),
            symbol,
            kind,
            url,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn download_id(&self) -> &DownloadId {
        &self.download_id
    }

    /// Full URL including the API key. Never log this.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn description(&self) -> String {
        format!("{} for {}", self.kind.label(), self.symbol)
    }
}

// The URL embeds the API key, so keep it out of debug output.
impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("symbol", &self.symbol)
            .field("kind", &self.kind)
            .field("download_id", &self.download_id)
            .finish()
    }
}

pub fn render_template(template: &str, replacements: &HashMap<String, String>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '{' {
            let key = read_placeholder(&mut chars)?;
            let value = replacements.get(&key).ok_or_else(|| {
                AppError::message(format!(
                    "No replacement provided for placeholder `{}` in template",
                    key
                ))
            })?;
            result.push_str(value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// List the placeholder names used by `template`, in order of appearance.
pub fn template_placeholders(template: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '{' {
            names.push(read_placeholder(&mut chars)?);
        }
    }

    Ok(names)
}

fn read_placeholder(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String> {
    let mut key = String::new();
    let mut closed = false;
    while let Some(&next) = chars.peek() {
        chars.next();
        if next == '}' {
            closed = true;
            break;
        }
        key.push(next);
    }

    if !closed {
        return Err(AppError::message(format!(
            "Unterminated placeholder in template: {{{key}"
        )));
    }

    if key.is_empty() {
        return Err(AppError::message(
            "Encountered empty placeholder `{}` in template",
        ));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_trimmed_and_uppercased() {
        let symbol = Symbol::parse("  aapl ").expect("valid symbol");
        assert_eq!(symbol.as_str(), "AAPL");
        assert_eq!(symbol, Symbol::parse("AAPL").unwrap());
    }

    #[test]
    fn blank_symbol_is_invalid_input() {
        for raw in ["", "   ", "\t\n"] {
            let err = Symbol::parse(raw).expect_err("blank symbol must be rejected");
            assert!(matches!(err, AppError::InvalidInput(_)), "{err:?}");
        }
    }

    #[test]
    fn download_id_is_deterministic() {
        let symbol = Symbol::parse("msft").unwrap();
        let first = DownloadId::new(RequestKind::Historical, &symbol);
        let second = DownloadId::new(RequestKind::Historical, &symbol);
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "historical:MSFT");
        assert_ne!(first, DownloadId::new(RequestKind::Quote, &symbol));
    }

    #[test]
    fn builds_quote_request_from_template() {
        let config = Config::builtin();
        let request = OutboundRequest::build(
            &config,
            Symbol::parse("aapl").unwrap(),
            RequestKind::Quote,
            "secret",
        )
        .expect("request builds");

        assert_eq!(
            request.url(),
            "https://finnhub.io/api/v1/quote?symbol=AAPL&token=secret"
        );
        assert_eq!(request.download_id().as_str(), "quote:AAPL");
        assert_eq!(request.description(), "Quote for AAPL");
        assert!(!format!("{request:?}").contains("secret"));
    }

    #[test]
    fn template_reports_missing_replacement() {
        let replacements = HashMap::from([("symbol".to_string(), "AAPL".to_string())]);
        let err = render_template("https://x/{symbol}?d={days}", &replacements)
            .expect_err("unknown placeholder");
        assert!(err.to_string().contains("`days`"));
    }

    #[test]
    fn lists_placeholders_in_order() {
        let names = template_placeholders("https://x/{symbol}?token={key}").unwrap();
        assert_eq!(names, vec!["symbol".to_string(), "key".to_string()]);
    }
}
