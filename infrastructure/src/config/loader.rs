//! Configuration file loader with multi-source merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

const PROJECT_FILES: [&str; 2] = ["toolbridge.toml", ".toolbridge.toml"];
const ENV_PREFIX: &str = "TOOLBRIDGE_";

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `TOOLBRIDGE_*` environment variables (`__` separates sections)
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./toolbridge.toml` or `./.toolbridge.toml`
    /// 4. Global: `<config dir>/toolbridge/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, Box<figment::Error>> {
        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load only default configuration (for --no-config)
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(&global_path));
        }

        if let Some(path) = Self::project_config_path() {
            figment = figment.merge(Toml::file(&path));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the global config file path
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("toolbridge").join("config.toml"))
    }

    /// Get the project-level config file path (if it exists)
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Describe the config file locations being consulted.
    pub fn describe_sources(explicit: Option<&Path>) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(path) = explicit {
            let mark = if path.exists() { "FOUND" } else { "MISSING" };
            lines.push(format!("[{:<7}] Explicit: {}", mark, path.display()));
        }
        match Self::project_config_path() {
            Some(path) => lines.push(format!("[{:<7}] Project: {}", "FOUND", path.display())),
            None => lines.push(format!(
                "[{:<7}] Project: ./{} or ./{}",
                "", PROJECT_FILES[0], PROJECT_FILES[1]
            )),
        }
        if let Some(path) = Self::global_config_path() {
            let mark = if path.exists() { "FOUND" } else { "" };
            lines.push(format!("[{:<7}] Global:  {}", mark, path.display()));
        }
        lines.push(format!("[{:<7}] Env:     {}*", "", ENV_PREFIX));
        lines.push(format!("[{:<7}] Default: built-in defaults", ""));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::load_defaults();
        assert_eq!(config.daemon.port, 8765);
        assert!(config.message_bus.enabled);
    }

    #[test]
    fn test_global_config_path_mentions_app() {
        if let Some(path) = ConfigLoader::global_config_path() {
            assert!(path.to_string_lossy().contains("toolbridge"));
        }
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[daemon]\nport = 9911\n\n[router]\nstrategy = \"cost_optimized\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(Some(path.as_path())).unwrap();
        assert_eq!(config.daemon.port, 9911);
        assert_eq!(config.router.strategy, "cost_optimized");
        // Sections not in the file keep defaults
        assert_eq!(config.gateway.call_timeout_secs, 300);
    }

    #[test]
    fn test_describe_sources_lists_env() {
        let lines = ConfigLoader::describe_sources(None);
        assert!(lines.iter().any(|l| l.contains("TOOLBRIDGE_")));
    }
}
