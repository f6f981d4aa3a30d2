use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::ingest::{IngestOptions, DEFAULT_CHUNK_SIZE, DEFAULT_JSON_MAX_LEN, DEFAULT_MODEL};

pub const DEFAULT_RAW_SCHEMA: &str = "ibl_alyxraw";
pub const DEFAULT_INPUT: &str = "data/alyxfull.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MigrateConfig {
    pub database: Option<String>,
    pub raw_schema: Option<String>,
    pub input: Option<String>,
    pub model: Option<String>,
    pub chunk_size: Option<usize>,
    pub json_max_len: Option<usize>,
    pub safemode: Option<bool>,
    /// Schema name to database file. Only the raw schema is attached when
    /// absent, from `<raw_schema>.db` beside the main database
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, String>,
}

impl MigrateConfig {
    /// Config written by `init`
    pub fn starter() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(DEFAULT_RAW_SCHEMA.to_string(), format!(".alyxraw/{}.db", DEFAULT_RAW_SCHEMA));
        Self {
            database: Some(default_database_path().to_string_lossy().into_owned()),
            raw_schema: Some(DEFAULT_RAW_SCHEMA.to_string()),
            input: Some(DEFAULT_INPUT.to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            json_max_len: Some(DEFAULT_JSON_MAX_LEN),
            safemode: Some(true),
            schemas,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.as_ref().map(PathBuf::from).unwrap_or_else(default_database_path)
    }

    pub fn raw_schema(&self) -> &str {
        self.raw_schema.as_deref().unwrap_or(DEFAULT_RAW_SCHEMA)
    }

    pub fn input_path(&self) -> PathBuf {
        PathBuf::from(self.input.as_deref().unwrap_or(DEFAULT_INPUT))
    }

    pub fn safemode(&self) -> bool {
        self.safemode.unwrap_or(true)
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            model: self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1),
            json_max_len: self.json_max_len.unwrap_or(DEFAULT_JSON_MAX_LEN),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("alyxraw-migrate.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from(".alyxraw").join("pipeline.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<MigrateConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: MigrateConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &MigrateConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
