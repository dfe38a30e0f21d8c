use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.mercadopago.com";

#[derive(Deserialize, Clone, Debug)]
pub struct CheckoutConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub gateway: GatewayConfig,
    pub checkout: CheckoutUrls,
    pub collaborators: CollaboratorConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

/// Mercado Pago credentials and transport settings.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub api_base_url: String,
    /// Missing is allowed at load time; every call then fails with a
    /// configuration error instead of reaching the gateway.
    pub access_token: Option<Secret<String>>,
    pub timeout_seconds: u64,
    pub webhook_secret: Option<Secret<String>>,
    /// Accept webhooks without verification when no secret is configured.
    pub allow_unsigned_webhooks: bool,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct CheckoutUrls {
    pub notification_url: Option<String>,
    pub success_url: String,
    pub pending_url: String,
    pub failure_url: String,
    pub currency: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct CollaboratorConfig {
    pub voucher_service_url: Option<String>,
    pub notification_service_url: Option<String>,
}

impl CheckoutConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| common.environment.clone())
            == "prod";

        let allow_unsigned_webhooks = parse_bool(&get_env(
            "MP_ALLOW_UNSIGNED_WEBHOOKS",
            Some("false"),
            false,
        )?);
        if allow_unsigned_webhooks && is_prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MP_ALLOW_UNSIGNED_WEBHOOKS cannot be enabled in production"
            )));
        }

        let timeout_seconds = get_env("MP_TIMEOUT_SECONDS", Some("15"), false)?
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("MP_TIMEOUT_SECONDS: {}", e)))?;

        Ok(Self {
            common,
            mongodb: MongoConfig {
                uri: Secret::new(get_env(
                    "CHECKOUT_MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                database: get_env("CHECKOUT_MONGODB_DATABASE", Some("checkout_db"), is_prod)?,
            },
            gateway: GatewayConfig {
                api_base_url: get_env("MP_API_BASE_URL", Some(DEFAULT_GATEWAY_BASE_URL), false)?,
                access_token: optional_env("MP_ACCESS_TOKEN").map(Secret::new),
                timeout_seconds,
                webhook_secret: optional_env("MP_WEBHOOK_SECRET").map(Secret::new),
                allow_unsigned_webhooks,
            },
            checkout: CheckoutUrls {
                notification_url: optional_env("MP_NOTIFICATION_URL"),
                success_url: get_env(
                    "CHECKOUT_BACK_URL_SUCCESS",
                    Some("http://localhost:3000/checkout/success"),
                    is_prod,
                )?,
                pending_url: get_env(
                    "CHECKOUT_BACK_URL_PENDING",
                    Some("http://localhost:3000/checkout/pending"),
                    is_prod,
                )?,
                failure_url: get_env(
                    "CHECKOUT_BACK_URL_FAILURE",
                    Some("http://localhost:3000/checkout/failure"),
                    is_prod,
                )?,
                currency: get_env("CHECKOUT_CURRENCY", Some("BRL"), false)?,
            },
            collaborators: CollaboratorConfig {
                voucher_service_url: optional_env("VOUCHER_SERVICE_URL"),
                notification_service_url: optional_env("NOTIFICATION_SERVICE_URL"),
            },
            service_name: "checkout-service".to_string(),
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_get_env_defaults_outside_production() {
        let value = get_env("CHECKOUT_TEST_UNSET_VARIABLE", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");

        assert!(get_env("CHECKOUT_TEST_UNSET_VARIABLE", Some("fallback"), true).is_err());
        assert!(get_env("CHECKOUT_TEST_UNSET_VARIABLE", None, false).is_err());
    }
}
