//! Application configuration

use std::collections::HashMap;
use std::time::Duration;

use ocrgate_billing::client::{CreemConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

/// Settings for the OCR language-model proxy
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub proxy_url: String,
    pub proxy_key: String,
    /// Vision model used for the recognition pass
    pub ocr_model: String,
    /// Text model used for the formatting pass
    pub format_model: String,
    pub timeout: Duration,
    /// Longest edge, in pixels, of a rendered PDF page
    pub pdf_max_pixels: u32,
    /// Directory holding the pdfium shared library; system lookup when unset
    pub pdfium_library_dir: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            proxy_url: "https://llm-proxy.densematrix.ai".to_string(),
            proxy_key: String::new(),
            ocr_model: "gemini-2.5-pro-preview-06-05".to_string(),
            format_model: "gemini-2.0-flash-exp".to_string(),
            timeout: Duration::from_secs(300),
            pdf_max_pixels: 2000,
            pdfium_library_dir: None,
        }
    }
}

/// Application configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Free uses granted to each principal
    pub free_uses_per_device: i32,
    /// Shared secret for the `X-Internal-Key` bypass. `None` disables it.
    pub internal_test_key: Option<String>,
    pub auth_base_url: String,
    pub auth_timeout: Duration,
    pub ocr: OcrConfig,
    pub creem: CreemConfig,
    pub allowed_origins: Vec<String>,
    /// Serve Prometheus metrics on `/metrics`
    pub metrics_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let free_uses_per_device: i32 = std::env::var("FREE_USES_PER_DEVICE")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("FREE_USES_PER_DEVICE"))?;
        if free_uses_per_device < 0 {
            return Err(ConfigError::Invalid("FREE_USES_PER_DEVICE"));
        }

        let internal_test_key = std::env::var("INTERNAL_TEST_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let auth_base_url = std::env::var("AUTH_BASE_URL")
            .unwrap_or_else(|_| "https://api.densematrix.ai".to_string());

        let auth_timeout = secs_var("AUTH_TIMEOUT_SECS", 10)?;

        let defaults = OcrConfig::default();
        let ocr = OcrConfig {
            proxy_url: std::env::var("LLM_PROXY_URL").unwrap_or(defaults.proxy_url),
            proxy_key: std::env::var("LLM_PROXY_KEY").unwrap_or(defaults.proxy_key),
            ocr_model: std::env::var("OCR_MODEL").unwrap_or(defaults.ocr_model),
            format_model: std::env::var("FORMAT_MODEL").unwrap_or(defaults.format_model),
            timeout: secs_var("OCR_TIMEOUT_SECS", 300)?,
            pdf_max_pixels: match std::env::var("OCR_PDF_MAX_PIXELS") {
                Ok(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|px| *px > 0)
                    .ok_or(ConfigError::Invalid("OCR_PDF_MAX_PIXELS"))?,
                Err(_) => defaults.pdf_max_pixels,
            },
            pdfium_library_dir: std::env::var("PDFIUM_LIB_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty()),
        };

        let creem = CreemConfig {
            api_url: std::env::var("CREEM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: std::env::var("CREEM_API_KEY").unwrap_or_default(),
            webhook_secret: std::env::var("CREEM_WEBHOOK_SECRET").unwrap_or_default(),
            product_ids: product_ids_var("CREEM_PRODUCT_IDS")?,
            timeout: secs_var("CHECKOUT_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
        };

        let metrics_enabled = match std::env::var("METRICS_ENABLED") {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::Invalid("METRICS_ENABLED")),
            },
            Err(_) => true,
        };

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            bind_address,
            free_uses_per_device,
            internal_test_key,
            auth_base_url,
            auth_timeout,
            ocr,
            creem,
            allowed_origins,
            metrics_enabled,
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

/// SKU to provider product id, as a JSON object
fn product_ids_var(name: &'static str) -> Result<HashMap<String, String>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).map_err(|_| ConfigError::Invalid(name))
        }
        _ => Ok(HashMap::new()),
    }
}
