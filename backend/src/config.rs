use thiserror::Error;

pub const DEFAULT_PINBALLMAP_API_URL: &str = "https://pinballmap.com/api/v1";
const DEV_JWT_SECRET: &str = "dev-secret-do-not-use-in-production";
/// Thirty days.
pub const MAX_SYNC_INTERVAL_MINUTES: u64 = 30 * 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug, Default)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub dev_mode: bool,
    pub dev_user_id: Option<i32>,
    pub public_url: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub allowed_email_domains: Vec<String>,
    pub default_organization: Option<String>,
    pub db_pool_size: usize,
    pub email: EmailConfig,
    pub pinballmap_api_url: String,
    /// Zero disables the background sync task.
    pub pinballmap_sync_interval_minutes: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let dev_mode = get("DEV_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if dev_mode => DEV_JWT_SECRET.to_string(),
            None => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let port = parse_or("PORT", get("PORT"), 8080)?;

        let pinballmap_sync_interval_minutes: u64 = parse_or(
            "PINBALLMAP_SYNC_INTERVAL_MINUTES",
            get("PINBALLMAP_SYNC_INTERVAL_MINUTES"),
            0,
        )?;
        if pinballmap_sync_interval_minutes > MAX_SYNC_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid {
                key: "PINBALLMAP_SYNC_INTERVAL_MINUTES",
                value: pinballmap_sync_interval_minutes.to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            port,
            jwt_secret,
            dev_mode,
            dev_user_id: get("DEV_USER_ID")
                .map(|v| parse("DEV_USER_ID", v))
                .transpose()?,
            public_url: get("PUBLIC_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            google_client_id: get("GOOGLE_CLIENT_ID"),
            google_client_secret: get("GOOGLE_CLIENT_SECRET"),
            allowed_email_domains: get("ALLOWED_EMAIL_DOMAINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            default_organization: get("DEFAULT_ORGANIZATION").map(|v| v.to_lowercase()),
            db_pool_size: parse_or("DB_POOL_SIZE", get("DB_POOL_SIZE"), 10)?,
            email: EmailConfig {
                api_url: get("EMAIL_API_URL"),
                api_key: get("EMAIL_API_KEY"),
                from: get("EMAIL_FROM").unwrap_or_else(|| "PinPoint <noreply@localhost>".into()),
            },
            pinballmap_api_url: get("PINBALLMAP_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PINBALLMAP_API_URL.to_string()),
            pinballmap_sync_interval_minutes,
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value.map(|v| parse(key, v)).unwrap_or(Ok(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_pool_size, 10);
        assert_eq!(cfg.public_url, "http://localhost:8080");
        assert_eq!(cfg.pinballmap_api_url, DEFAULT_PINBALLMAP_API_URL);
        assert_eq!(cfg.pinballmap_sync_interval_minutes, 0);
        assert!(!cfg.dev_mode);
        assert!(cfg.default_organization.is_none());
    }

    #[test]
    fn jwt_secret_required_outside_dev_mode() {
        let err = config(&[("DATABASE_URL", "postgres://x")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));

        let cfg = config(&[("DATABASE_URL", "postgres://x"), ("DEV_MODE", "1")]).unwrap();
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn database_url_required() {
        let err = config(&[("JWT_SECRET", "s")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = config(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("PORT", "eighty"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn sync_interval_is_bounded() {
        let base = [("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")];

        let cfg = config(&[base[0], base[1], ("PINBALLMAP_SYNC_INTERVAL_MINUTES", "60")]).unwrap();
        assert_eq!(cfg.pinballmap_sync_interval_minutes, 60);

        let huge = (u64::MAX / 10).to_string();
        let err = config(&[base[0], base[1], ("PINBALLMAP_SYNC_INTERVAL_MINUTES", huge.as_str())]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PINBALLMAP_SYNC_INTERVAL_MINUTES",
                value: huge.clone(),
            }
        );

        let over = (MAX_SYNC_INTERVAL_MINUTES + 1).to_string();
        assert!(config(&[base[0], base[1], ("PINBALLMAP_SYNC_INTERVAL_MINUTES", over.as_str())]).is_err());
    }

    #[test]
    fn domains_are_split_and_normalised() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("ALLOWED_EMAIL_DOMAINS", " Example.com, ,arcade.org "),
            ("PUBLIC_URL", "https://pinpoint.example.com/"),
        ])
        .unwrap();
        assert_eq!(cfg.allowed_email_domains, vec!["example.com", "arcade.org"]);
        assert_eq!(cfg.public_url, "https://pinpoint.example.com");
    }
}
