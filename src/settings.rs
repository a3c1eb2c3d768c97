use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use anyhow::Result;
use serde::Deserialize;

use crate::flow::FlowConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log_level: String,
    pub submission_delay_ms: u64,
    pub waiter_delay_ms: [u64; 2],
    pub bill_delay_ms: [u64; 2],
    pub payment_delay_ms: u64,
    pub waiter_roster: Vec<String>,
    pub eta_minutes: Vec<u8>,
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Constructs (or copies) the configuration file and loads it.
pub fn init_settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        let home_dir = env::var("HOME").expect("Could not read $HOME");
        let package_name = env!("CARGO_PKG_NAME");
        let hidden_dir = Path::new(&home_dir).join(format!(".{package_name}"));
        let hidden_file = hidden_dir.join("settings.toml");

        // Default settings.toml shipped in the repo, next to Cargo.toml.
        let default_file: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("settings.toml");

        if !hidden_dir.exists() {
            fs::create_dir(&hidden_dir).expect("Could not create the config directory");
        }
        if !hidden_file.exists() {
            fs::copy(&default_file, &hidden_file)
                .expect("Could not copy the default settings.toml");
        }

        Settings::load_from(&hidden_file).expect("Malformed settings.toml")
    })
}

impl Settings {
    /// Loads settings from a specific toml file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(cfg.try_deserialize::<Settings>()?)
    }

    /// Flow knobs as the controller consumes them. An empty roster or ETA
    /// list in the file falls back to the built-in defaults.
    pub fn flow_config(&self) -> FlowConfig {
        let defaults = FlowConfig::default();
        FlowConfig {
            submission_delay: Duration::from_millis(self.submission_delay_ms),
            waiter_delay_ms: (self.waiter_delay_ms[0], self.waiter_delay_ms[1]),
            bill_delay_ms: (self.bill_delay_ms[0], self.bill_delay_ms[1]),
            payment_delay: Duration::from_millis(self.payment_delay_ms),
            waiter_roster: if self.waiter_roster.is_empty() {
                defaults.waiter_roster
            } else {
                self.waiter_roster.clone()
            },
            eta_minutes: if self.eta_minutes.is_empty() {
                defaults.eta_minutes
            } else {
                self.eta_minutes.clone()
            },
        }
    }
}
