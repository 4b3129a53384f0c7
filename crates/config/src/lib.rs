use std::path::PathBuf;

use serde::Deserialize;
use tombola_models::BonusTier;

/// All configuration for the tombola application.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub db_url: String,

    // Server
    pub port: u16,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Business rules
    pub reservation_ttl_secs: i64,
    pub claim_grace_days: i64,
    pub bonus_tiers: Vec<BonusTier>,

    // Auth
    pub auth_secret: String,

    // Payment provider
    pub stripe_api_base: String,
    pub stripe_secret_key: String,

    // Email
    pub resend_api_base: String,
    pub resend_api_key: String,
    pub email_from: String,
}

/// Config file layout (~/.tombola/config.toml). All fields optional; they
/// layer on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_url: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    utc: Option<bool>,
    reservation_ttl_secs: Option<i64>,
    claim_grace_days: Option<i64>,
    bonus_tiers: Option<Vec<FileBonusTier>>,
    auth_secret: Option<String>,
    stripe_api_base: Option<String>,
    stripe_secret_key: Option<String>,
    resend_api_base: Option<String>,
    resend_api_key: Option<String>,
    email_from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileBonusTier {
    min_quantity: i64,
    bonus: i64,
}

impl Config {
    /// Config directory: ~/.tombola/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tombola")
    }

    /// Config file path: ~/.tombola/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(Self::file_path()) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env();

        config
    }

    // --- Private helpers ---

    fn defaults() -> Self {
        Self {
            db_url: "sqlite:tombola.db".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            utc: false,
            reservation_ttl_secs: 10 * 60,
            claim_grace_days: 14,
            bonus_tiers: vec![
                BonusTier { min_quantity: 10, bonus: 1 },
                BonusTier { min_quantity: 15, bonus: 2 },
                BonusTier { min_quantity: 20, bonus: 3 },
                BonusTier { min_quantity: 50, bonus: 5 },
            ],
            auth_secret: "dev-secret-change-me".to_string(),
            stripe_api_base: "https://api.stripe.com".to_string(),
            stripe_secret_key: String::new(),
            resend_api_base: "https://api.resend.com".to_string(),
            resend_api_key: String::new(),
            email_from: "draws@tombola.example".to_string(),
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.reservation_ttl_secs { self.reservation_ttl_secs = v; }
        if let Some(v) = file.claim_grace_days { self.claim_grace_days = v; }
        if let Some(v) = file.bonus_tiers {
            self.bonus_tiers = v
                .into_iter()
                .map(|t| BonusTier { min_quantity: t.min_quantity, bonus: t.bonus })
                .collect();
        }
        if let Some(v) = file.auth_secret { self.auth_secret = v; }
        if let Some(v) = file.stripe_api_base { self.stripe_api_base = v; }
        if let Some(v) = file.stripe_secret_key { self.stripe_secret_key = v; }
        if let Some(v) = file.resend_api_base { self.resend_api_base = v; }
        if let Some(v) = file.resend_api_key { self.resend_api_key = v; }
        if let Some(v) = file.email_from { self.email_from = v; }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TOMBOLA_DB_URL") { self.db_url = v; }
        if let Ok(v) = std::env::var("TOMBOLA_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Ok(v) = std::env::var("TOMBOLA_LOG_LEVEL") { self.log_level = v; }
        if let Ok(v) = std::env::var("TOMBOLA_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("TOMBOLA_RESERVATION_TTL_SECS") {
            if let Ok(s) = v.parse() { self.reservation_ttl_secs = s; }
        }
        if let Ok(v) = std::env::var("TOMBOLA_CLAIM_GRACE_DAYS") {
            if let Ok(d) = v.parse() { self.claim_grace_days = d; }
        }
        if let Ok(v) = std::env::var("TOMBOLA_AUTH_SECRET") { self.auth_secret = v; }
        if let Ok(v) = std::env::var("STRIPE_API_BASE") { self.stripe_api_base = v; }
        if let Ok(v) = std::env::var("STRIPE_SECRET_KEY") { self.stripe_secret_key = v; }
        if let Ok(v) = std::env::var("RESEND_API_BASE") { self.resend_api_base = v; }
        if let Ok(v) = std::env::var("RESEND_API_KEY") { self.resend_api_key = v; }
        if let Ok(v) = std::env::var("TOMBOLA_EMAIL_FROM") { self.email_from = v; }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::defaults();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.reservation_ttl_secs, 600);
        assert_eq!(cfg.claim_grace_days, 14);
        assert_eq!(cfg.bonus_tiers.len(), 4);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let mut cfg = Config::defaults();
        let file: FileConfig = toml::from_str(
            r#"
            port = 8080
            reservation_ttl_secs = 300

            [[bonus_tiers]]
            min_quantity = 25
            bonus = 4
            "#,
        )
        .unwrap();
        cfg.apply_file(file);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.reservation_ttl_secs, 300);
        assert_eq!(cfg.bonus_tiers, vec![BonusTier { min_quantity: 25, bonus: 4 }]);
        // untouched fields keep their defaults
        assert_eq!(cfg.claim_grace_days, 14);
    }
}
