use anyhow::{Context, Result, anyhow};
use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Duration;

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_SESSION_TTL_DAYS: i64 = 14;
pub const DEFAULT_CAPTURE_LIMIT_BYTES: usize = 1024 * 1024;
const MIN_SECRET_BYTES: usize = 64;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cookie_key: Key,
    pub cors_allowed_origins: Vec<String>,
    pub session_ttl: Duration,
    /// Largest login body the audit layer will buffer.
    pub capture_limit_bytes: usize,
}

impl AppConfig {
    /// Defaults for everything but the cookie key.
    pub fn new(cookie_key: Key) -> Self {
        Self {
            cookie_key,
            cors_allowed_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            session_ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT_BYTES,
        }
    }

    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cookie_secret = lookup("COOKIE_SECRET_BASE64").context("COOKIE_SECRET_BASE64 missing")?;
        let secret_bytes = STANDARD
            .decode(cookie_secret.trim())
            .context("invalid COOKIE_SECRET_BASE64")?;
        if secret_bytes.len() < MIN_SECRET_BYTES {
            return Err(anyhow!(
                "COOKIE_SECRET_BASE64 must decode to at least {MIN_SECRET_BYTES} bytes"
            ));
        }
        let cookie_key = Key::try_from(secret_bytes.as_slice())
            .map_err(|err| anyhow!("unusable COOKIE_SECRET_BASE64: {err}"))?;

        let mut config = Self::new(cookie_key);

        if let Some(raw) = lookup("CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(raw) = lookup("SESSION_TTL_DAYS") {
            let days: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid SESSION_TTL_DAYS {raw:?}"))?;
            if days <= 0 {
                return Err(anyhow!("SESSION_TTL_DAYS must be positive"));
            }
            config.session_ttl = Duration::days(days);
        }

        if let Some(raw) = lookup("AUDIT_CAPTURE_LIMIT_BYTES") {
            config.capture_limit_bytes = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid AUDIT_CAPTURE_LIMIT_BYTES {raw:?}"))?;
        }

        Ok(config)
    }
}
