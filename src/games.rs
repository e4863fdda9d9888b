// Per-game deployment details
//
// One JSON file per game under `<config>/games`, mapping machine name to
// where and as whom the game was last deployed.

use crate::config::Config;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDetails {
    pub destdir: String,
    pub gameid: String,
    pub username: String,
}

pub struct GameDetailsStore {
    dir: PathBuf,
}

impl GameDetailsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.games_dir())
    }

    fn path_for(&self, game: &str) -> PathBuf {
        self.dir.join(format!("{}.json", game))
    }

    /// Details of `game` on `machine`; a missing or unreadable file reads as none.
    pub fn read(&self, machine: &str, game: &str) -> Option<GameDetails> {
        let mut entries = read_entries(&self.path_for(game))?;
        let entry = entries.remove(machine)?;
        match serde_json::from_value(entry) {
            Ok(details) => Some(details),
            Err(e) => {
                tracing::warn!("Ignoring details of {} on {}: {}", game, machine, e);
                None
            }
        }
    }

    /// Record `details` for `game` on `machine`, keeping other machines' entries.
    pub fn save(&self, game: &str, machine: &str, details: &GameDetails) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(game);
        let mut entries = read_entries(&path).unwrap_or_default();
        entries.insert(
            machine.to_string(),
            serde_json::to_value(details).map_err(std::io::Error::from)?,
        );

        let staging = path.with_extension("json.new");
        let body = serde_json::to_vec(&Value::Object(entries)).map_err(std::io::Error::from)?;
        fs::write(&staging, body)?;
        fs::rename(&staging, &path).map_err(|e| {
            tracing::error!("Unable to write settings for game data to {}", path.display());
            e
        })?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Option<Map<String, Value>> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(Value::Object(entries)) => Some(entries),
        Ok(_) | Err(_) => {
            tracing::warn!("{} is not a JSON object", path.display());
            None
        }
    }
}
