use std::{env, net::IpAddr, time::Duration};

use config::{Config, Environment, File};
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

pub(crate) static SETTINGS: Lazy<Settings> =
    Lazy::new(|| Settings::new().expect("Failed to initialize settings"));


#[derive(Debug, Deserialize)]
pub(crate) struct Server {
    pub(crate) port: u16,
    pub(crate) host: IpAddr,
}

/// Grading backend: `/api/audio`, `/api/pronunciation`, `/api/spells`.
#[derive(Debug, Deserialize, Clone)]
pub struct Api {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Api {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct Assets {
    pub base_url: String,
    #[serde(default = "default_asset_path")]
    pub path: String,
}

fn default_asset_path() -> String {
    String::from("/static/anime/")
}

#[derive(Debug, Deserialize, Clone)]
pub struct Speech {
    pub locale: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub(crate) server: Server,
    pub api: Api,
    pub assets: Assets,
    pub speech: Speech,
}

impl Settings {
    pub(crate) fn new() -> Result<Self, anyhow::Error> {
        let run_mode = env::var("APP_RUN_MODE").unwrap_or("dev".into());
        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{run_mode}.yaml")).required(false))
            .add_source(Environment::with_prefix("APP").separator("-"))
            .build()
            .map_err(anyhow::Error::from)?;

        config.try_deserialize::<Self>().map_err(Into::into)
            .map(|settings| {
                debug!("Settings: {settings:?}");
                settings
            })
    }
}
