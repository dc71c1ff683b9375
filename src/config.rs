use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Optional bearer token raising the GitHub Advisory rate limit.
    pub github_token: Option<String>,
    /// Whether the KISA adapter scrapes advisory detail pages.
    pub kisa_detail_scrape: bool,
    pub log_to_file: bool,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let github_token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());

        let kisa_detail_scrape = env::var("VULNDIGEST_KISA_DETAIL")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let log_to_file = env::var("VULNDIGEST_LOG_TO_FILE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_dir = env::var("VULNDIGEST_LOG_DIR").unwrap_or_else(|_| "logs".to_string());

        Ok(Self {
            port,
            github_token,
            kisa_detail_scrape,
            log_to_file,
            log_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            github_token: None,
            kisa_detail_scrape: true,
            log_to_file: false,
            log_dir: "logs".to_string(),
        }
    }
}
