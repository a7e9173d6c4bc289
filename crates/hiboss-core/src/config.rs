use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default data directory name under `$HOME`
pub const DEFAULT_DATA_DIR_NAME: &str = "hiboss";

/// Cap on envelopes consumed by a single turn.
pub const MAX_ENVELOPES_PER_TURN: usize = 10;

/// Floor for the envelope scheduler's poll cadence.
pub const ENVELOPE_SCHEDULER_POLL_FLOOR_SECS: u64 = 30;

/// Top-level daemon configuration (`<dataDir>/config.toml` + `HIBOSS_*` env
/// overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HibossConfig {
    /// Root data directory. Resolved before figment load (see `resolve_data_dir`).
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub boss: BossConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BossConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// IANA timezone used for cron/session-policy "local time" computations
    /// when a schedule or session doesn't specify its own.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for BossConfig {
    fn default() -> Self {
        Self {
            name: None,
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

impl HibossConfig {
    /// Resolve `$HIBOSS_HOME`, falling back to `~/hiboss`.
    pub fn resolve_data_dir(explicit: Option<&str>) -> std::io::Result<PathBuf> {
        if let Some(p) = explicit {
            return Ok(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("HIBOSS_HOME") {
            return Ok(PathBuf::from(p));
        }
        let base = directories::BaseDirs::new().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "cannot resolve $HOME")
        })?;
        Ok(base.home_dir().join(DEFAULT_DATA_DIR_NAME))
    }

    /// Load config from `<dataDir>/config.toml`, overridden by `HIBOSS_*` env
    /// vars, falling back to defaults if the file is absent.
    pub fn load(data_dir: &Path) -> Self {
        let toml_path = data_dir.join("config.toml");
        let figment = Figment::new()
            .merge(Toml::file(&toml_path))
            .merge(Env::prefixed("HIBOSS_").split("_"));

        let mut config: HibossConfig = figment.extract().unwrap_or_else(|_| HibossConfig {
            data_dir: data_dir.to_path_buf(),
            boss: BossConfig::default(),
            telegram: None,
        });
        config.data_dir = data_dir.to_path_buf();
        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("hiboss.db")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join("daemon.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("daemon.log")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    pub fn agent_home(&self, name: &str) -> PathBuf {
        self.agents_dir().join(name)
    }
}

/// Recognized `config` table keys.
pub mod keys {
    pub const SETUP_COMPLETED: &str = "setup_completed";
    pub const BOSS_TOKEN_HASH: &str = "boss_token_hash";
    pub const BOSS_NAME: &str = "boss_name";
    pub const BOSS_TIMEZONE: &str = "boss_timezone";
    pub const PERMISSION_POLICY: &str = "permission_policy";
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// `adapter_boss_id_<type>`, e.g. `adapter_boss_id_telegram`.
    pub fn adapter_boss_id(adapter_type: &str) -> String {
        format!("adapter_boss_id_{adapter_type}")
    }
}
