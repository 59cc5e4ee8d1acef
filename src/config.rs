use crate::monetize::MonetizeConfig;
use anyhow::Context;
use std::time::Duration;

/// All runtime settings, read once from the environment in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub admin_id: u64,
    /// Required channel the user must be a member of.
    pub channel_id: i64,
    /// Public invite link shown in the "join first" prompt.
    pub channel_link: String,
    pub store_path: String,
    pub monetize: MonetizeConfig,
    /// Unset means tokens live until redeemed.
    pub token_ttl: Option<Duration>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let admin_id = required("ADMIN_ID")?
            .parse()
            .context("ADMIN_ID must be a numeric Telegram user id")?;
        let channel_id = required("CHANNEL_ID")?
            .parse()
            .context("CHANNEL_ID must be a numeric chat id (like -1001234567890)")?;
        let channel_link = required("CHANNEL_LINK")?;

        let store_path =
            std::env::var("STORE_PATH").unwrap_or_else(|_| "filmgate_state.json".to_string());

        let enabled = std::env::var("MONETIZATION_ENABLED")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let ad_page_url = std::env::var("AD_PAGE_URL").unwrap_or_default();

        let token_ttl = match std::env::var("TOKEN_TTL_HOURS") {
            Ok(v) => {
                let hours: u64 = v.parse().context("TOKEN_TTL_HOURS must be a number")?;
                Some(Duration::from_secs(hours * 3600))
            }
            Err(_) => None,
        };

        Ok(Self {
            admin_id,
            channel_id,
            channel_link,
            store_path,
            monetize: MonetizeConfig { enabled, ad_page_url },
            token_ttl,
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} is missing"))
}
