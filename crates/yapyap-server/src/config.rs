use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use yapyap_api::AuthSettings;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub auth: AuthSettings,
    /// Allowed browser origin. Without one, CORS is permissive and cookies
    /// only work same-origin.
    pub frontend_url: Option<String>,
    pub sendgrid: Option<SendGridConfig>,
    pub cloudinary: Option<CloudinaryConfig>,
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("YAPYAP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("YAPYAP_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("YAPYAP_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("YAPYAP_HOST must be an IP address")?;

        let production = var("YAPYAP_ENV").is_some_and(|env| env == "production");

        let jwt_secret = var("YAPYAP_JWT_SECRET").unwrap_or_else(|| {
            warn!("YAPYAP_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.into()
        });
        let mut auth = AuthSettings::new(jwt_secret);
        auth.secure_cookies = production;
        if let Some(ttl) = var("YAPYAP_JWT_EXPIRES_IN_SEC") {
            auth.token_ttl_secs = ttl
                .parse()
                .context("YAPYAP_JWT_EXPIRES_IN_SEC must be a number of seconds")?;
        }

        let sendgrid = match (var("SENDGRID_API_KEY"), var("SENDGRID_EMAIL")) {
            (Some(api_key), Some(from)) => Some(SendGridConfig { api_key, from }),
            _ => None,
        };
        let cloudinary = match (
            var("CLOUDINARY_CLOUD_NAME"),
            var("CLOUDINARY_API_KEY"),
            var("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(var("YAPYAP_DB_PATH").unwrap_or_else(|| "yapyap.db".into())),
            auth,
            frontend_url: var("YAPYAP_FRONTEND_URL"),
            sendgrid,
            cloudinary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.db_path, PathBuf::from("yapyap.db"));
        assert_eq!(cfg.auth.token_ttl_secs, AuthSettings::DEFAULT_TOKEN_TTL_SECS);
        assert!(!cfg.auth.secure_cookies);
        assert!(cfg.sendgrid.is_none());
        assert!(cfg.cloudinary.is_none());
        assert!(cfg.frontend_url.is_none());
    }

    #[test]
    fn production_and_providers() {
        let cfg = config(&[
            ("YAPYAP_ENV", "production"),
            ("YAPYAP_PORT", "8080"),
            ("YAPYAP_JWT_EXPIRES_IN_SEC", "3600"),
            ("SENDGRID_API_KEY", "key"),
            ("SENDGRID_EMAIL", "noreply@example.com"),
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "k"),
            ("CLOUDINARY_API_SECRET", ""),
        ])
        .unwrap();
        assert_eq!(cfg.addr.port(), 8080);
        assert!(cfg.auth.secure_cookies);
        assert_eq!(cfg.auth.token_ttl_secs, 3600);
        assert_eq!(cfg.sendgrid.unwrap().from, "noreply@example.com");
        // An empty secret leaves Cloudinary unconfigured.
        assert!(cfg.cloudinary.is_none());
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("YAPYAP_PORT", "eighty")]).is_err());
    }
}
