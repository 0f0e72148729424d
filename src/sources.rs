//! Portal source configuration.
//!
//! The pipeline reads two endpoints of a city open-data portal. Both
//! URLs, the optional API key, and the campaign start date come from
//! the environment (a `.env` file in development, the scheduler's
//! secrets in production).

use std::env;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use parkride::fetch::auth::{ApiKey, UrlParam};
use parkride::fetch::{BasicClient, HttpClient};

const DEFAULT_CARS_URL: &str =
    "https://portail-api-data.montpellier3m.fr/offstreetparking?limit=1000";
const DEFAULT_BIKES_URL: &str = "https://portail-api-data.montpellier3m.fr/bikestation";
const DEFAULT_START_DATE: &str = "2026-01-05";

/// How the portal expects the API key, if it expects one at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAuth {
    Open,
    /// Key sent as an HTTP header with the given name.
    Header { header_name: String },
    /// Key appended as a URL query parameter with the given name.
    UrlParam { param_name: String },
}

impl SourceAuth {
    /// Parses the `PORTAL_AUTH` value: unset/empty means open access,
    /// otherwise `header:<name>` or `param:<name>`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(SourceAuth::Open);
        }
        match raw.split_once(':') {
            Some(("header", name)) if !name.is_empty() => Ok(SourceAuth::Header {
                header_name: name.to_string(),
            }),
            Some(("param", name)) if !name.is_empty() => Ok(SourceAuth::UrlParam {
                param_name: name.to_string(),
            }),
            _ => bail!("PORTAL_AUTH must be empty, 'header:<name>' or 'param:<name>', got '{raw}'"),
        }
    }

    pub fn requires_key(&self) -> bool {
        !matches!(self, SourceAuth::Open)
    }

    pub fn describe(&self) -> String {
        match self {
            SourceAuth::Open => "open".to_string(),
            SourceAuth::Header { header_name } => format!("header:{header_name}"),
            SourceAuth::UrlParam { param_name } => format!("param:{param_name}"),
        }
    }
}

/// One portal endpoint.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: &'static str,
    pub url: String,
}

/// The full measurement configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub cars: Source,
    pub bikes: Source,
    pub auth: SourceAuth,
    pub api_key: Option<String>,
    pub start_date: NaiveDate,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        let cars = Source {
            name: "car-parks",
            url: env::var("PORTAL_CARS_URL").unwrap_or_else(|_| DEFAULT_CARS_URL.to_string()),
        };
        let bikes = Source {
            name: "bike-stations",
            url: env::var("PORTAL_BIKES_URL").unwrap_or_else(|_| DEFAULT_BIKES_URL.to_string()),
        };

        let auth = SourceAuth::parse(&env::var("PORTAL_AUTH").unwrap_or_default())?;
        let api_key = env::var("PORTAL_API_KEY").ok();
        if auth.requires_key() && api_key.is_none() {
            bail!("PORTAL_AUTH is set but PORTAL_API_KEY is not");
        }

        let start_date = env::var("START_DATE")
            .unwrap_or_else(|_| DEFAULT_START_DATE.to_string())
            .parse()
            .context("START_DATE must be YYYY-MM-DD")?;

        Ok(Self {
            cars,
            bikes,
            auth,
            api_key,
            start_date,
        })
    }

    /// The HTTP client with the configured auth decorator applied.
    pub fn build_client(&self) -> Result<Box<dyn HttpClient>> {
        let basic = BasicClient::new()?;
        let key = self.api_key.as_deref().unwrap_or_default();

        Ok(match &self.auth {
            SourceAuth::Open => Box::new(basic),
            SourceAuth::Header { header_name } => Box::new(ApiKey::new(basic, header_name, key)?),
            SourceAuth::UrlParam { param_name } => Box::new(UrlParam {
                inner: basic,
                param_name: param_name.clone(),
                key: key.to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open() {
        assert_eq!(SourceAuth::parse("").unwrap(), SourceAuth::Open);
        assert!(!SourceAuth::Open.requires_key());
    }

    #[test]
    fn test_parse_header_and_param() {
        assert_eq!(
            SourceAuth::parse("header:X-Api-Key").unwrap(),
            SourceAuth::Header {
                header_name: "X-Api-Key".to_string()
            }
        );
        assert_eq!(
            SourceAuth::parse("param:apikey").unwrap(),
            SourceAuth::UrlParam {
                param_name: "apikey".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SourceAuth::parse("header:").is_err());
        assert!(SourceAuth::parse("cookie:session").is_err());
        assert!(SourceAuth::parse("header").is_err());
    }
}
