use std::path::Path;

use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Write stage indices back to the vessel after every computation.
    pub auto_update_staging: bool,
    pub advanced_simulation: bool,
    pub limit_to_terminal_velocity: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_update_staging: false,
            advanced_simulation: false,
            limit_to_terminal_velocity: true,
        }
    }
}

impl Settings {
    /// Loads the settings blob. Anything unreadable yields the defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!(?path, %e, "no settings, using defaults");
                return Self::default();
            }
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            warn!(?path, %e, "ignoring unreadable settings");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> eyre::Result<()> {
        let text = toml::to_string(self)?;
        std::fs::write(path, text).wrap_err_with(|| format!("writing {}", path.display()))
    }
}
