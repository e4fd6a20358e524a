use anyhow::Context;

use crate::auth::password::DEFAULT_HASH_COST;

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub secret_key: String,
    pub hash_cost: u32,
    pub cookie: CookieConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let secret_key = std::env::var("SECRET_KEY").context("SECRET_KEY is not set")?;
        anyhow::ensure!(!secret_key.is_empty(), "SECRET_KEY must not be empty");

        let hash_cost = match std::env::var("PASSWORD_HASH_COST") {
            Ok(v) => parse_hash_cost(&v)?,
            Err(_) => DEFAULT_HASH_COST,
        };
        let secure = match std::env::var("SESSION_COOKIE_SECURE") {
            Ok(v) => parse_bool(&v).with_context(|| format!("SESSION_COOKIE_SECURE={v}"))?,
            Err(_) => true,
        };

        Ok(Self {
            database_url,
            secret_key,
            hash_cost,
            cookie: CookieConfig { secure },
        })
    }
}

fn parse_hash_cost(raw: &str) -> anyhow::Result<u32> {
    let cost = raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("PASSWORD_HASH_COST={raw} is not an integer"))?;
    anyhow::ensure!(cost >= 1, "PASSWORD_HASH_COST must be at least 1");
    Ok(cost)
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
