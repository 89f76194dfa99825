//! Service configuration.
//!
//! Layers, lowest priority first: built-in defaults, the JSON document in
//! `SANDBOX_CONFIG`, individual environment variables, then command-line
//! flags (applied by the binary). Extra language recipes can also be
//! dropped into a directory as one JSON file per language.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::language::{LanguageRecipe, LanguageTable};

/// Top-level configuration for the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wall-clock budget per execution, in milliseconds.
    pub timeout_ms: u64,

    /// Directory for scratch files; also the working directory of every child.
    pub scratch_dir: PathBuf,

    /// Capture ceiling per output stream, in bytes.
    pub max_output_bytes: usize,

    /// Upper bound on concurrently running child processes (unbounded if absent).
    pub max_concurrent_executions: Option<usize>,

    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Extra recipes layered over the built-in table.
    pub languages: Vec<LanguageRecipe>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body size.
    pub body_limit_bytes: usize,
    /// Attach a permissive CORS layer.
    pub enable_cors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            scratch_dir: default_scratch_dir(),
            max_output_bytes: default_max_output_bytes(),
            max_concurrent_executions: None,
            server: ServerConfig::default(),
            languages: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3002,
            body_limit_bytes: 10 * 1024 * 1024,
            enable_cors: true,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("code-sandbox")
}

impl Config {
    /// Load configuration from `SANDBOX_CONFIG` and the individual overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("SANDBOX_CONFIG") {
            Ok(json) => serde_json::from_str(&json).context("Failed to parse SANDBOX_CONFIG")?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply single-value overrides looked up through `lookup`.
    ///
    /// Recognized keys: `SANDBOX_TIMEOUT_MS`, `SANDBOX_SCRATCH_DIR`, `HOST`, `PORT`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ms) = lookup("SANDBOX_TIMEOUT_MS") {
            self.timeout_ms = ms
                .parse()
                .with_context(|| format!("SANDBOX_TIMEOUT_MS must be a number, got '{ms}'"))?;
        }
        if let Some(dir) = lookup("SANDBOX_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a number, got '{port}'"))?;
        }
        Ok(())
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.timeout_ms > 0, "timeout_ms must be greater than zero");
        anyhow::ensure!(
            self.max_output_bytes > 0,
            "max_output_bytes must be greater than zero"
        );
        anyhow::ensure!(
            self.max_concurrent_executions != Some(0),
            "max_concurrent_executions must be greater than zero when set"
        );
        self.server.bind_addr()?;
        Ok(())
    }

    /// Per-execution timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the strategy table: built-ins overlaid with configured recipes.
    pub fn language_table(&self) -> Result<LanguageTable> {
        LanguageTable::with_recipes(self.languages.iter().cloned())
            .context("Invalid language recipe")
    }

    /// Scan a directory for recipe files and return the valid ones.
    ///
    /// Every `*.json` file is parsed as one [`LanguageRecipe`]. Files are
    /// visited in name order. Unreadable or invalid entries are logged and
    /// skipped.
    pub fn scan_languages_dir(dir: &Path) -> Vec<LanguageRecipe> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Cannot read languages directory");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(e) => Some(e.path()),
                Err(e) => {
                    warn!(error = %e, "Error reading languages directory entry");
                    None
                }
            })
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut recipes = Vec::new();
        for path in paths {
            let contents = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping recipe: cannot read file");
                    continue;
                }
            };

            let recipe: LanguageRecipe = match serde_json::from_str(&contents) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping recipe: invalid JSON");
                    continue;
                }
            };

            if let Err(e) = recipe.validate() {
                warn!(path = %path.display(), error = %e, "Skipping recipe: invalid definition");
                continue;
            }

            info!(language = %recipe.name, path = %path.display(), "Discovered language recipe");
            recipes.push(recipe);
        }

        recipes
    }

    /// Merge discovered recipes into the config.
    ///
    /// A discovered recipe replaces a configured one with the same name.
    pub fn merge_languages(&mut self, extra: Vec<LanguageRecipe>) {
        for recipe in extra {
            if let Some(existing) = self.languages.iter_mut().find(|r| r.name == recipe.name) {
                info!(language = %recipe.name, "Discovered recipe overrides configured one");
                *existing = recipe;
            } else {
                self.languages.push(recipe);
            }
        }
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn recipe_json(name: &str, command: &str) -> String {
        format!(r#"{{"name": "{name}", "command": "{command}", "file_extension": "{name}"}}"#)
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_output_bytes, 1024 * 1024);
        assert!(config.max_concurrent_executions.is_none());
        assert_eq!(config.server.port, 3002);
        assert!(config.server.enable_cors);
        assert!(config.scratch_dir.ends_with("code-sandbox"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_json() {
        let json = r#"{
            "timeout_ms": 2500,
            "scratch_dir": "/sandbox",
            "server": { "port": 8080 },
            "languages": [
                { "name": "ruby", "aliases": ["rb"], "command": "ruby", "file_extension": "rb" }
            ]
        }"#;

        let config = Config::from_json(json).unwrap();

        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.scratch_dir, PathBuf::from("/sandbox"));
        assert_eq!(config.server.port, 8080);
        // Untouched fields keep their defaults
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.max_output_bytes, 1024 * 1024);

        let table = config.language_table().unwrap();
        assert_eq!(table.resolve("RB").unwrap().command, "ruby");
        assert_eq!(table.resolve("py").unwrap().command, "python3");
    }

    #[test]
    fn language_table_rejects_invalid_recipe() {
        let json = r#"{"languages": [{ "name": "bad", "command": "x", "args": ["--version"] }]}"#;
        let config = Config::from_json(json).unwrap();
        assert!(config.language_table().is_err());
    }

    #[test]
    fn overrides_take_priority() {
        let vars = HashMap::from([
            ("SANDBOX_TIMEOUT_MS", "200"),
            ("SANDBOX_SCRATCH_DIR", "/srv/scratch"),
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
        ]);
        let mut config = Config::from_json(r#"{"timeout_ms": 5000}"#).unwrap();
        config
            .apply_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.timeout(), Duration::from_millis(200));
        assert_eq!(config.scratch_dir, PathBuf::from("/srv/scratch"));
        assert_eq!(
            config.server.bind_addr().unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn bad_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = Config::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_concurrent_executions = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.host = "not-an-ip".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn scan_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::scan_languages_dir(dir.path()).is_empty());
    }

    #[test]
    fn scan_nonexistent_dir() {
        let recipes = Config::scan_languages_dir(Path::new("/nonexistent/path"));
        assert!(recipes.is_empty());
    }

    #[test]
    fn scan_valid_and_invalid_recipes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ruby.json"), recipe_json("ruby", "ruby")).unwrap();
        std::fs::write(dir.path().join("lua.json"), recipe_json("lua", "lua5.4")).unwrap();
        // Not JSON
        std::fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        // Valid JSON, no placeholder
        std::fs::write(
            dir.path().join("noargs.json"),
            r#"{"name": "noargs", "command": "x", "args": [], "requires_temp_file": false}"#,
        )
        .unwrap();
        // Ignored extension
        std::fs::write(dir.path().join("README.md"), "recipes live here").unwrap();

        let recipes = Config::scan_languages_dir(dir.path());
        let names: Vec<_> = recipes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["lua", "ruby"]);
        assert_eq!(recipes[0].command, "lua5.4");
    }

    #[test]
    fn merge_languages_override() {
        let mut config = Config::from_json(&format!(
            r#"{{"languages": [{}]}}"#,
            recipe_json("ruby", "ruby")
        ))
        .unwrap();

        let discovered: LanguageRecipe =
            serde_json::from_str(&recipe_json("ruby", "/opt/ruby/bin/ruby")).unwrap();
        config.merge_languages(vec![discovered]);

        assert_eq!(config.languages.len(), 1);
        assert_eq!(config.languages[0].command, "/opt/ruby/bin/ruby");
    }

    #[test]
    fn merge_languages_additive() {
        let mut config = Config::from_json(&format!(
            r#"{{"languages": [{}]}}"#,
            recipe_json("ruby", "ruby")
        ))
        .unwrap();

        let lua: LanguageRecipe = serde_json::from_str(&recipe_json("lua", "lua")).unwrap();
        config.merge_languages(vec![lua]);

        let table = config.language_table().unwrap();
        assert!(table.resolve("ruby").is_some());
        assert!(table.resolve("lua").is_some());
        assert!(table.resolve("javascript").is_some());
    }
}
