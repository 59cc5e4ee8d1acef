mod catalog;
mod config;
mod gate;
mod monetize;
mod payload;
mod storage;
mod tg;
mod tmdb;

use dotenvy::dotenv;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::Config::from_env()?;

    let bot = Bot::from_env();
    let me = bot.get_me().await?;
    let bot_username = me.username().to_string();

    let tmdb_key = std::env::var("TMDB_API_KEY").unwrap_or_default();
    let tmdb = tmdb::TmdbClient::new(tmdb_key);

    let storage = storage::Storage::new(cfg.store_path.clone(), cfg.token_ttl).await?;

    tracing::info!(%bot_username, "starting dispatcher");
    tg::run(bot, tg::Ctx { cfg, storage, tmdb, bot_username }).await;
    Ok(())
}
