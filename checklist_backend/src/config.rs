use anyhow::{anyhow, Result};
use std::env;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChecklistConfig {
    pub api_port: u16,
    /// Site/tenant scope every state record is written under.
    pub blog_id: i64,
    pub paths: ChecklistPaths,
    pub nonce: NonceConfig,
}

impl ChecklistConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("CHECKLIST_HOME") {
            Ok(raw) if !raw.trim().is_empty() => ChecklistPaths::from_base_dir(raw.trim())?,
            _ => ChecklistPaths::discover()?,
        };
        let api_port = env::var("CHECKLIST_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080);
        let blog_id = env::var("CHECKLIST_BLOG_ID")
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .unwrap_or(1);
        Ok(Self {
            api_port,
            blog_id,
            paths,
            nonce: NonceConfig::from_env(),
        })
    }

    pub fn new(api_port: u16, paths: ChecklistPaths) -> Self {
        Self {
            api_port,
            blog_id: 1,
            paths,
            nonce: NonceConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NonceConfig {
    pub secret: String,
    pub lifetime_secs: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            secret: Uuid::new_v4().to_string(),
            lifetime_secs: 86_400,
        }
    }
}

impl NonceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        // A random secret invalidates outstanding tokens on restart.
        let secret = env::var("CHECKLIST_NONCE_SECRET")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or(defaults.secret);
        let lifetime_secs = env::var("CHECKLIST_NONCE_LIFETIME_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs >= 2)
            .unwrap_or(defaults.lifetime_secs);
        Self {
            secret,
            lifetime_secs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChecklistPaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl ChecklistPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("checklist.db");
        let logs_dir = base.join("logs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            logs_dir,
        })
    }
}
