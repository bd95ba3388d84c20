use serde::Deserialize;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Credential for the remote model. Optional at startup, enforced per extraction.
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub extraction_max_attempts: u32,
    pub extraction_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            gemini_base_url: parse_base_url(
                &std::env::var("GEMINI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
            )?,
            gemini_model: std::env::var("GEMINI_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            extraction_max_attempts: positive_var("EXTRACTION_MAX_ATTEMPTS", 3)?,
            extraction_timeout_secs: positive_var("EXTRACTION_TIMEOUT_SECS", 60)?,
            session_ttl_secs: positive_var("SESSION_TTL_SECS", 3600)?,
            max_upload_bytes: positive_var("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        };

        // Never log the credential itself
        tracing::info!("Configuration loaded successfully");
        if config.gemini_api_key.is_none() {
            tracing::warn!(
                "GEMINI_API_KEY (or API_KEY) not set: extractions will fail until it is configured"
            );
        }
        tracing::debug!("Gemini Base URL: {}", config.gemini_base_url);
        tracing::debug!("Gemini Model: {}", config.gemini_model);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn parse_base_url(raw: &str) -> anyhow::Result<String> {
    let url = raw.trim().trim_end_matches('/').to_string();
    if url.is_empty() {
        anyhow::bail!("GEMINI_BASE_URL cannot be empty");
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("GEMINI_BASE_URL must start with http:// or https://");
    }
    url::Url::parse(&url)
        .map_err(|e| anyhow::anyhow!("GEMINI_BASE_URL is not a valid URL: {}", e))?;
    Ok(url)
}

fn positive_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let value: T = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a positive number", name))?;
            if value <= T::default() {
                anyhow::bail!("{} must be greater than zero", name);
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let url = parse_base_url("https://example.com/").unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn test_base_url_requires_scheme() {
        assert!(parse_base_url("example.com").is_err());
        assert!(parse_base_url("   ").is_err());
    }

    #[test]
    fn test_positive_var_defaults_when_unset() {
        let value: u32 = positive_var("RUST_CRM_VISION_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }
}
