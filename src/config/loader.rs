use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::{AppError, Context, Result};

use super::{validator, Config, KeySource};

/// Load a JSON config file, overlaying every present field on top of [`Config::builtin`].
///
/// Relative paths are tried as given first, then next to the running executable.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();

    let mut search_paths = vec![path.to_path_buf()];
    if path.is_relative() {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            search_paths.push(dir.join(path));
        }
    }

    let mut last_error = None;
    for candidate in &search_paths {
        match fs::read_to_string(candidate) {
            Ok(json) => {
                log::debug!("Loading dispatcher config from {}", candidate.display());
                return parse_config(&json).with_context(|| {
                    format!("failed to load config at {}", candidate.display())
                })
                .map_err(AppError::from);
            }
            Err(err) => last_error = Some(format!("{}: {}", candidate.display(), err)),
        }
    }

    Err(AppError::message(format!(
        "could not read config file. Last error: {}",
        last_error.unwrap_or_else(|| "no search paths".to_string())
    )))
}

/// Parse and validate a JSON config document.
pub fn parse_config(json: &str) -> Result<Config> {
    let raw: RawConfig = serde_json::from_str(json)?;
    let config = raw.into_config();
    validator::validate_config(&config)?;
    Ok(config)
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    quote: RawQuoteConfig,
    historical: RawHistoricalConfig,
    http: RawHttpConfig,
    credentials: RawCredentialsConfig,
    settings_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawQuoteConfig {
    url_template: Option<String>,
    interval_ms: Option<u64>,
    cooldown_factor: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawHistoricalConfig {
    url_template: Option<String>,
    series_key: Option<String>,
    max_requests: Option<usize>,
    window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawHttpConfig {
    timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawCredentialsConfig {
    quote: Option<RawKeySource>,
    historical: Option<RawKeySource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKeySource {
    Env(String),
    Files(Vec<PathBuf>),
    Key(String),
}

impl RawKeySource {
    fn into_key_source(self) -> KeySource {
        match self {
            RawKeySource::Env(name) => KeySource::Env(name),
            RawKeySource::Files(paths) => KeySource::Files(paths),
            RawKeySource::Key(value) => KeySource::Literal(value),
        }
    }
}

impl RawConfig {
    fn into_config(self) -> Config {
        let mut config = Config::builtin();

        if let Some(template) = self.quote.url_template {
            config.quote.url_template = template;
        }
        if let Some(ms) = self.quote.interval_ms {
            config.quote.interval = Duration::from_millis(ms);
        }
        if let Some(factor) = self.quote.cooldown_factor {
            config.quote.cooldown_factor = factor;
        }

        if let Some(template) = self.historical.url_template {
            config.historical.url_template = template;
        }
        if let Some(key) = self.historical.series_key {
            config.historical.series_key = key;
        }
        if let Some(max) = self.historical.max_requests {
            config.historical.max_requests = max;
        }
        if let Some(secs) = self.historical.window_secs {
            config.historical.window = Duration::from_secs(secs);
        }

        if let Some(secs) = self.http.timeout_secs {
            config.http.timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = self.http.user_agent {
            config.http.user_agent = agent;
        }

        if let Some(source) = self.credentials.quote {
            config.credentials.quote = source.into_key_source();
        }
        if let Some(source) = self.credentials.historical {
            config.credentials.historical = source.into_key_source();
        }

        if let Some(path) = self.settings_path {
            config.settings_path = path;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_builtin() {
        let config = parse_config("{}").expect("empty config parses");
        let builtin = Config::builtin();
        assert_eq!(config.quote.interval, builtin.quote.interval);
        assert_eq!(config.historical.url_template, builtin.historical.url_template);
        assert_eq!(config.settings_path, builtin.settings_path);
    }

    #[test]
    fn overlays_present_fields() {
        let json = r#"{
            "quote": { "interval_ms": 2000 },
            "historical": { "max_requests": 25, "window_secs": 3600 },
            "credentials": {
                "quote": { "files": ["api.txt", "../../api.txt"] },
                "historical": { "env": "AV_KEY" }
            },
            "settings_path": "state/settings.json"
        }"#;

        let config = parse_config(json).expect("config parses");
        assert_eq!(config.quote.interval, Duration::from_millis(2_000));
        assert_eq!(config.quote.cooldown_factor, 10);
        assert_eq!(config.historical.max_requests, 25);
        assert_eq!(config.historical.window, Duration::from_secs(3_600));
        assert_eq!(
            config.credentials.quote,
            KeySource::Files(vec![PathBuf::from("api.txt"), PathBuf::from("../../api.txt")])
        );
        assert_eq!(
            config.credentials.historical,
            KeySource::Env("AV_KEY".to_string())
        );
        assert_eq!(config.settings_path, PathBuf::from("state/settings.json"));
    }

    #[test]
    fn rejects_invalid_overlay() {
        let err = parse_config(r#"{ "historical": { "max_requests": 0 } }"#)
            .expect_err("zero window capacity must be rejected");
        assert!(err.to_string().contains("max_requests"), "{err}");
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dispatch.json");
        let mut file = fs::File::create(&path).expect("create config");
        file.write_all(br#"{ "http": { "timeout_secs": 3 } }"#)
            .expect("write config");

        let config = load_config(&path).expect("config loads");
        assert_eq!(config.http.timeout, Duration::from_secs(3));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(dir.path().join("absent.json")).expect_err("missing file");
        assert!(err.to_string().contains("could not read config file"));
    }
}
