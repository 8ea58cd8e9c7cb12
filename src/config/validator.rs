use crate::error::{AppError, Result};
use crate::fetch::request::template_placeholders;

use super::{Config, KeySource};

const KNOWN_PLACEHOLDERS: &[&str] = &["symbol", "key"];

/// Validate a dispatcher config and surface every problem at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_template("quote.url_template", &config.quote.url_template, &mut issues);
    validate_template(
        "historical.url_template",
        &config.historical.url_template,
        &mut issues,
    );

    if config.quote.interval.is_zero() {
        issues.push("quote.interval_ms must be greater than zero".to_string());
    }
    if config.quote.cooldown_factor == 0 {
        issues.push("quote.cooldown_factor must be at least 1".to_string());
    }
    if config.historical.max_requests == 0 {
        issues.push("historical.max_requests must be at least 1".to_string());
    }
    if config.historical.window.as_secs() == 0 {
        issues.push("historical.window_secs must be at least one second".to_string());
    }
    if config.historical.series_key.trim().is_empty() {
        issues.push("historical.series_key must not be empty".to_string());
    }
    if config.http.timeout.is_zero() {
        issues.push("http.timeout_secs must be greater than zero".to_string());
    }

    validate_key_source("credentials.quote", &config.credentials.quote, &mut issues);
    validate_key_source(
        "credentials.historical",
        &config.credentials.historical,
        &mut issues,
    );

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "dispatcher config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_template(field: &str, template: &str, issues: &mut Vec<String>) {
    if template.trim().is_empty() {
        issues.push(format!("{field} must not be empty"));
        return;
    }

    match template_placeholders(template) {
        Ok(placeholders) => {
            if !placeholders.iter().any(|name| name == "symbol") {
                issues.push(format!("{field} must contain a {{symbol}} placeholder"));
            }
            for name in placeholders {
                if !KNOWN_PLACEHOLDERS.contains(&name.as_str()) {
                    issues.push(format!("{field} uses unknown placeholder `{{{name}}}`"));
                }
            }
        }
        Err(err) => issues.push(format!("{field}: {err}")),
    }
}

fn validate_key_source(field: &str, source: &KeySource, issues: &mut Vec<String>) {
    match source {
        KeySource::Env(name) if name.trim().is_empty() => {
            issues.push(format!("{field}.env must name an environment variable"));
        }
        KeySource::Files(paths) if paths.is_empty() => {
            issues.push(format!("{field}.files must list at least one path"));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn accepts_builtin() {
        validate_config(&Config::builtin()).expect("builtin config should be valid");
    }

    #[test]
    fn reports_every_issue() {
        let mut config = Config::builtin();
        config.quote.interval = Duration::ZERO;
        config.quote.url_template = "https://example.com/quote?token={key}".to_string();
        config.historical.url_template = "https://example.com/{symbol}/{days}".to_string();

        let message = validate_config(&config)
            .expect_err("validation should fail")
            .to_string();
        assert!(message.contains("quote.interval_ms"), "{message}");
        assert!(message.contains("{symbol} placeholder"), "{message}");
        assert!(message.contains("unknown placeholder `{days}`"), "{message}");
    }

    #[test]
    fn rejects_unterminated_placeholder() {
        let mut config = Config::builtin();
        config.quote.url_template = "https://example.com/quote?symbol={symbol".to_string();

        let message = validate_config(&config)
            .expect_err("validation should fail")
            .to_string();
        assert!(message.contains("Unterminated placeholder"), "{message}");
    }

    #[test]
    fn rejects_empty_key_file_list() {
        let mut config = Config::builtin();
        config.credentials.quote = KeySource::Files(Vec::new());

        let message = validate_config(&config)
            .expect_err("validation should fail")
            .to_string();
        assert!(message.contains("credentials.quote.files"), "{message}");
    }
}
