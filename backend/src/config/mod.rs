//! Configuration module for the donation backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;

use crate::auth::StaticCredential;
use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Directory backing the local object store
    pub image_dir: PathBuf,
    /// Public URL prefix under which stored images are served
    pub image_base_url: String,
    /// Container (sub-directory) that holds donation images
    pub image_container: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,
    /// Bearer tokens accepted by the static identity verifier
    pub auth_tokens: Vec<StaticCredential>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("UMI_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let image_dir = env::var("UMI_IMAGE_DIR")
            .unwrap_or_else(|_| "./data/images".to_string())
            .into();

        let image_base_url = env::var("UMI_IMAGE_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/images".to_string())
            .trim_end_matches('/')
            .to_string();

        let image_container =
            env::var("UMI_IMAGE_CONTAINER").unwrap_or_else(|_| "image-container".to_string());
        if image_container.is_empty() || image_container.contains('/') {
            return Err(AppError::Internal(format!(
                "Invalid UMI_IMAGE_CONTAINER value: {:?}",
                image_container
            )));
        }

        let log_level = env::var("UMI_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_json = match env::var("UMI_LOG_FORMAT").as_deref() {
            Err(_) | Ok("text") => false,
            Ok("json") => true,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "Invalid UMI_LOG_FORMAT value: {:?} (expected text or json)",
                    other
                )))
            }
        };

        let auth_tokens = match env::var("UMI_AUTH_TOKENS") {
            Ok(raw) => parse_auth_tokens(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            db_path,
            image_dir,
            image_base_url,
            image_container,
            log_level,
            log_json,
            auth_tokens,
        })
    }
}

/// Parse `token:subject:role|role` entries separated by commas.
fn parse_auth_tokens(raw: &str) -> Result<Vec<StaticCredential>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().unwrap_or_default();
            let subject = parts.next().unwrap_or_default();
            let roles = parts.next().unwrap_or_default();
            if token.is_empty() || subject.is_empty() {
                return Err(AppError::Internal(
                    "Invalid UMI_AUTH_TOKENS entry: expected token:subject[:roles]".to_string(),
                ));
            }
            let roles = roles
                .split('|')
                .filter(|role| !role.is_empty())
                .map(|role| {
                    role.parse().map_err(|_| {
                        AppError::Internal(format!("Unknown role in UMI_AUTH_TOKENS: {}", role))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StaticCredential {
                token: token.to_string(),
                subject: subject.to_string(),
                roles,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("UMI_DB_PATH");
        env::remove_var("UMI_IMAGE_DIR");
        env::remove_var("UMI_IMAGE_BASE_URL");
        env::remove_var("UMI_IMAGE_CONTAINER");
        env::remove_var("UMI_LOG_LEVEL");
        env::remove_var("UMI_LOG_FORMAT");
        env::remove_var("UMI_AUTH_TOKENS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("./data/app.sqlite"));
        assert_eq!(config.image_dir, PathBuf::from("./data/images"));
        assert_eq!(config.image_base_url, "http://localhost:8080/images");
        assert_eq!(config.image_container, "image-container");
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.auth_tokens.is_empty());
    }

    #[test]
    fn test_parse_auth_tokens() {
        let tokens =
            parse_auth_tokens("abc:auth0|vol:volunteer, def:auth0|admin:admin|donor,ghi:sub").unwrap();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].token, "abc");
        assert_eq!(tokens[0].subject, "auth0|vol");
        assert_eq!(tokens[0].roles, vec![Role::Volunteer]);
        assert_eq!(tokens[1].roles, vec![Role::Admin, Role::Donor]);
        assert!(tokens[2].roles.is_empty());
    }

    #[test]
    fn test_parse_auth_tokens_rejects_bad_entries() {
        assert!(parse_auth_tokens("just-a-token").is_err());
        assert!(parse_auth_tokens("tok:sub:pilot").is_err());
    }
}
