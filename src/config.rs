//! Typed configuration from environment variables.
//!
//! Loads once at startup. In local dev, call `dotenvy::dotenv().ok()`
//! before [`Config::from_env`].

use crate::error::{Error, Result};

pub const FALLBACK_LOCALE: &str = "en_US";

#[derive(Debug, Clone)]
pub struct Config {
    pub default_locale: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DEFAULT_LOCALE` wins over the locale implied by `LANG`.
    pub fn from_env() -> Result<Self> {
        let default_locale = match std::env::var("DEFAULT_LOCALE") {
            Ok(v) if v.trim().is_empty() => {
                return Err(Error::Config("DEFAULT_LOCALE is set but blank".to_string()));
            }
            Ok(v) => v.trim().to_string(),
            Err(_) => std::env::var("LANG")
                .ok()
                .and_then(|lang| locale_from_lang(&lang))
                .unwrap_or_else(|| FALLBACK_LOCALE.to_string()),
        };

        Ok(Self {
            default_locale,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn invoker(&self) -> InvokerConfig {
        InvokerConfig {
            default_locale: self.default_locale.clone(),
        }
    }
}

/// Process-wide settings the invoker reads but never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerConfig {
    /// Locale injected into jobs that do not carry one.
    pub default_locale: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_locale: FALLBACK_LOCALE.to_string(),
        }
    }
}

/// Locale part of a POSIX `LANG` value: `de_DE.UTF-8@euro` -> `de_DE`.
/// `C` and `POSIX` carry no locale.
pub fn locale_from_lang(lang: &str) -> Option<String> {
    let base = lang.split(['.', '@']).next()?.trim();
    match base {
        "" | "C" | "POSIX" => None,
        other => Some(other.to_string()),
    }
}
