//! Configuration Loading
//!
//! Layered merge: built-in defaults, then the machine-level config, then the
//! project `contextloom.toml`, then `CONTEXTLOOM_*` environment variables.
//! Later layers win. Env keys use `__` as the section separator so field
//! names may contain underscores: `CONTEXTLOOM_LLM__API_KEY` maps to
//! `llm.api_key`.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use crate::types::{LoomError, Result};

use super::types::Config;

pub const CONFIG_FILE_NAME: &str = "contextloom.toml";
pub const ENV_PREFIX: &str = "CONTEXTLOOM_";

/// Loads configuration from defaults, file, and environment
pub struct ConfigLoader {
    project_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Path of the project-level config file, which may not exist
    pub fn config_path(&self) -> PathBuf {
        self.project_dir.join(CONFIG_FILE_NAME)
    }

    /// Machine-level config file, merged below the project file
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "contextloom")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Merge defaults -> machine TOML -> project TOML -> environment,
    /// then validate
    pub fn load(&self) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(global) = Self::global_config_path() {
            figment = figment.merge(Toml::file(global));
        }
        let figment = figment
            .merge(Toml::file(self.config_path()))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .split("__")
                    .lowercase(true),
            );

        let config: Config = figment
            .extract()
            .map_err(|e| LoomError::Config(format!("failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file path, still applying env overrides
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(LoomError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .split("__")
                    .lowercase(true),
            );

        let config: Config = figment
            .extract()
            .map_err(|e| LoomError::Config(format!("failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a starter config with documented defaults. API keys are
    /// intentionally absent; they belong in the environment.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(LoomError::Config(format!(
                "config file already exists: {}",
                path.display()
            )));
        }
        let body = toml::to_string_pretty(&Config::default())
            .map_err(|e| LoomError::Config(format!("failed to render config template: {e}")))?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new(dir.path()).load().unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.database.path, "contextloom.db");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[llm]
model = "gpt-4o"
temperature = 0.3

[database]
path = "/tmp/loom-test.db"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new(dir.path()).load().unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.database.path, "/tmp/loom-test.db");
        // Untouched sections keep defaults
        assert_eq!(config.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let result = ConfigLoader::load_from_file(Path::new("/nonexistent/loom.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides_reach_nested_fields() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CONTEXTLOOM_LLM__MODEL", "gpt-4o");
            jail.set_env("CONTEXTLOOM_LLM__API_KEY", "sk-test-key");
            jail.set_env("CONTEXTLOOM_DATABASE__PATH", "/tmp/loom-env.db");

            let config = ConfigLoader::new(jail.directory()).load().unwrap();
            assert_eq!(config.llm.model, "gpt-4o");
            assert_eq!(config.llm.api_key.as_deref(), Some("sk-test-key"));
            assert_eq!(config.database.path, "/tmp/loom-env.db");
            Ok(())
        });
    }

    #[test]
    fn test_template_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        ConfigLoader::write_template(&path).unwrap();
        // Writing over an existing file is refused
        assert!(ConfigLoader::write_template(&path).is_err());

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        let body = fs::read_to_string(&path).unwrap();
        assert!(!body.contains("api_key"));
    }

    #[test]
    fn test_invalid_file_value_rejected_by_validate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[llm]\ntemperature = 9.0\n",
        )
        .unwrap();
        assert!(ConfigLoader::new(dir.path()).load().is_err());
    }
}
