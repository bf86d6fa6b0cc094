use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

const GAME_MOD_SUBPATH: &str =
    "steamapps/common/GUILTY GEAR STRIVE/RED/Content/Paks/~mods";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Staged mod collection, reconciled into the game dir by `sync`.
    pub staging_root: PathBuf,
    /// Downloaded archives and their extracted contents.
    pub download_dir: PathBuf,
    /// The game's active `~mods` directory.
    pub game_mod_dir: PathBuf,
    /// Stock `.sig` copied alongside paks shipped without one.
    #[serde(default)]
    pub fallback_sig: Option<PathBuf>,
    /// Answer yes to every prompt; with `false` and no terminal interaction,
    /// prompts resolve to reject.
    #[serde(default)]
    pub assume_yes: bool,
}

impl Config {
    pub fn load_or_create() -> Result<Self> {
        let data_dir = data_dir()?;
        fs::create_dir_all(&data_dir).context("create data dir")?;
        let path = data_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read config")?;
            let config: Config = serde_json::from_str(&raw).context("parse config")?;
            return Ok(config);
        }

        let config = Config {
            staging_root: data_dir.join("mods"),
            download_dir: data_dir.join("downloads"),
            game_mod_dir: default_game_mod_dir(),
            fallback_sig: None,
            assume_yes: false,
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let data_dir = data_dir()?;
        fs::create_dir_all(&data_dir).context("create data dir")?;
        let path = data_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, raw).context("write config")?;
        Ok(())
    }

    /// Creates the working directories this run will touch. The game dir is
    /// left alone until a sync asks for it.
    pub fn bootstrap_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.staging_root).context("create staging root")?;
        fs::create_dir_all(&self.download_dir).context("create download dir")?;
        Ok(())
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("ggmod"))
}

fn default_game_mod_dir() -> PathBuf {
    let Some(base) = BaseDirs::new() else {
        return PathBuf::from(GAME_MOD_SUBPATH);
    };
    let home = base.home_dir();
    for steam_root in [".steam/steam", ".steam/debian-installation"] {
        let candidate = home.join(steam_root).join(GAME_MOD_SUBPATH);
        if candidate.exists() {
            return candidate;
        }
    }
    home.join(".steam/steam").join(GAME_MOD_SUBPATH)
}
