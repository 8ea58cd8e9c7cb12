use std::fs;

use crate::config::{CredentialsConfig, KeySource};
use crate::error::{AppError, Result};
use crate::fetch::RequestKind;

/// Supplies API keys for the two providers.
pub trait CredentialSource: Send + Sync {
    fn quote_key(&self) -> Result<String>;
    fn historical_key(&self) -> Result<String>;

    fn key_for(&self, kind: RequestKind) -> Result<String> {
        match kind {
            RequestKind::Quote => self.quote_key(),
            RequestKind::Historical => self.historical_key(),
        }
    }
}

/// Resolves keys from the sources named in the config, on every call.
#[derive(Debug, Clone)]
pub struct ConfiguredCredentials {
    quote: KeySource,
    historical: KeySource,
}

impl ConfiguredCredentials {
    pub fn new(config: &CredentialsConfig) -> Self {
        Self {
            quote: config.quote.clone(),
            historical: config.historical.clone(),
        }
    }

    pub fn literal(quote: impl Into<String>, historical: impl Into<String>) -> Self {
        Self {
            quote: KeySource::Literal(quote.into()),
            historical: KeySource::Literal(historical.into()),
        }
    }
}

impl CredentialSource for ConfiguredCredentials {
    fn quote_key(&self) -> Result<String> {
        resolve(&self.quote, "quote")
    }

    fn historical_key(&self) -> Result<String> {
        resolve(&self.historical, "historical")
    }
}

fn resolve(source: &KeySource, label: &str) -> Result<String> {
    match source {
        KeySource::Literal(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        KeySource::Literal(_) => Err(AppError::message(format!("The {label} API key is empty"))),
        KeySource::Env(name) => match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(AppError::message(format!(
                "Environment variable {} required for the {} API key is not set",
                name, label
            ))),
        },
        KeySource::Files(paths) => {
            for path in paths {
                match fs::read_to_string(path) {
                    Ok(contents) if !contents.trim().is_empty() => {
                        return Ok(contents.trim().to_string())
                    }
                    Ok(_) => log::debug!("{} API key file {} is empty", label, path.display()),
                    Err(err) => log::debug!(
                        "Could not read {} API key file {}: {}",
                        label,
                        path.display(),
                        err
                    ),
                }
            }
            Err(AppError::message(format!(
                "No readable {label} API key file among {} candidate(s)",
                paths.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_empty_file_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("empty.txt");
        let real = dir.path().join("api.txt");
        fs::write(&empty, "  \n").unwrap();
        fs::write(&real, "abc123\n").unwrap();

        let credentials = ConfiguredCredentials {
            quote: KeySource::Files(vec![dir.path().join("missing.txt"), empty, real]),
            historical: KeySource::Literal("unused".to_string()),
        };
        assert_eq!(credentials.quote_key().unwrap(), "abc123");
    }

    #[test]
    fn no_readable_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let credentials = ConfiguredCredentials {
            quote: KeySource::Literal("unused".to_string()),
            historical: KeySource::Files(vec![dir.path().join("missing.txt")]),
        };
        let err = credentials.historical_key().expect_err("no key file");
        assert!(err.to_string().contains("historical"), "{err}");
    }

    #[test]
    fn env_source_reads_variable() {
        std::env::set_var("QUOTE_DISPATCH_TEST_KEY", "from-env");
        let credentials = ConfiguredCredentials {
            quote: KeySource::Env("QUOTE_DISPATCH_TEST_KEY".to_string()),
            historical: KeySource::Env("QUOTE_DISPATCH_TEST_KEY_UNSET".to_string()),
        };
        assert_eq!(credentials.key_for(RequestKind::Quote).unwrap(), "from-env");
        assert!(credentials.key_for(RequestKind::Historical).is_err());
    }
}
