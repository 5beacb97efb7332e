use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::errors::LatchkeyError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub policy: Policy,
    pub engine: Engine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Directory holding the `.kdl` policy files, applied in path order
    pub policies_dir: PathBuf,
    /// Apply the embedded base policy (Public, Anonymous, Authenticated) first
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,
}

fn default_include_builtin() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// Longest parent chain a check walks before denying
    pub max_depth: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            policies_dir: PathBuf::from("policies"),
            include_builtin: true,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_depth: crate::authz::engine::MAX_DEPTH,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "policy.policies_dir",
                Policy::default().policies_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("policy.include_builtin", Policy::default().include_builtin)
            .into_diagnostic()?
            .set_default("engine.max_depth", Engine::default().max_depth as u64)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: LATCHKEY__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("LATCHKEY").separator("__"));

        let cfg = builder.build().map_err(LatchkeyError::from)?;
        let mut s: Settings = cfg.try_deserialize().map_err(LatchkeyError::from)?;

        // Normalize policies dir to be relative to current dir
        if s.policy.policies_dir.is_relative() {
            s.policy.policies_dir = std::env::current_dir()
                .map_err(LatchkeyError::from)?
                .join(&s.policy.policies_dir);
        }

        if s.engine.max_depth == 0 {
            return Err(LatchkeyError::Other("engine.max_depth must be at least 1".into()).into());
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| miette::miette!("bad listen addr: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        // Load settings with nonexistent file - should use defaults
        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.port, 8180);
        assert!(settings.policy.include_builtin);
        assert!(settings.policy.policies_dir.ends_with("policies"));
        assert_eq!(settings.engine.max_depth, 256);
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 9090

[policy]
policies_dir = "/etc/latchkey/policies"
include_builtin = false

[engine]
max_depth = 32
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.port, 9090);
        assert_eq!(
            settings.policy.policies_dir,
            PathBuf::from("/etc/latchkey/policies")
        );
        assert!(!settings.policy.include_builtin);
        assert_eq!(settings.engine.max_depth, 32);
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 8080
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        env::set_var("LATCHKEY__SERVER__HOST", "192.168.1.1");

        // Load settings - env should override file
        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "192.168.1.1");
        assert_eq!(settings.server.port, 8080);

        // Cleanup
        env::remove_var("LATCHKEY__SERVER__HOST");
    }

    #[test]
    fn test_settings_relative_policies_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");
        fs::write(&config_path, "[policy]\npolicies_dir = \"conf/policies\"\n")
            .expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");
        assert!(settings.policy.policies_dir.is_absolute());
        assert!(settings.policy.policies_dir.ends_with("conf/policies"));
    }

    #[test]
    fn test_zero_max_depth_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");
        fs::write(&config_path, "[engine]\nmax_depth = 0\n").expect("Failed to write config");

        assert!(Settings::load(config_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_listen_addr() {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 3000;
        assert_eq!(settings.listen_addr().unwrap().port(), 3000);
    }
}
