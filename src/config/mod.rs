use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::console::DEFAULT_LOG_BUFFER;
use crate::router::{RemoteSessionConfig, DEFAULT_RCON_PORT};
use crate::supervisor::LaunchOptions;

const DEFAULT_CONFIG_PATH: &str = "config/mineswap.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    /// 서버 폴더들이 들어있는 루트 디렉토리
    pub servers_dir: PathBuf,
    pub artifact_extension: String,
    pub java_path: PathBuf,
    /// -Xmx/-Xms 값 (예: "1G")
    pub memory: String,
    pub jvm_args: Vec<String>,
    pub server_args: Vec<String>,
    pub stop_timeout_secs: u64,
    pub ipc_listen: String,
    pub log_buffer_size: usize,
    pub rcon: RconConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            servers_dir: default_servers_dir(),
            artifact_extension: "jar".to_string(),
            java_path: PathBuf::from("java"),
            memory: "1G".to_string(),
            jvm_args: Vec::new(),
            server_args: vec!["nogui".to_string()],
            stop_timeout_secs: 30,
            ipc_listen: "127.0.0.1:57475".to_string(),
            log_buffer_size: DEFAULT_LOG_BUFFER,
            rcon: RconConfig::default(),
        }
    }
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_RCON_PORT,
            password: String::new(),
            enabled: false,
            timeout_secs: 5,
        }
    }
}

/// `~/swapMine/servers`
fn default_servers_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join("swapMine").join("servers")
}

impl GlobalConfig {
    /// 설정 로드: MINESWAP_CONFIG → config/mineswap.toml, 파일이 없으면 기본값
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("MINESWAP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Path::new(&path))?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg: Self = toml::from_str(&s).with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("MINESWAP_SERVERS_DIR") {
            self.servers_dir = PathBuf::from(dir);
        }
        if let Some(java) = std::env::var_os("MINESWAP_JAVA") {
            self.java_path = PathBuf::from(java);
        }
    }

    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::java(&self.java_path, &self.memory);
        options.runtime_args.extend(self.jvm_args.iter().cloned());
        options.server_args = self.server_args.clone();
        options.stop_timeout = Duration::from_secs(self.stop_timeout_secs);
        options
    }

    pub fn remote_session(&self) -> RemoteSessionConfig {
        RemoteSessionConfig {
            host: self.rcon.host.clone(),
            port: self.rcon.port,
            password: self.rcon.password.clone(),
            enabled: self.rcon.enabled,
        }
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_secs(self.rcon.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[test]
    fn test_global_config_default() {
        let cfg = GlobalConfig::default();
        assert!(cfg.servers_dir.ends_with("swapMine/servers"));
        assert_eq!(cfg.artifact_extension, "jar");
        assert_eq!(cfg.rcon.port, 25575);
        assert!(!cfg.remote_session().is_active());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = GlobalConfig::load_from(&tmp.path().join("mineswap.toml")).unwrap();
        assert_eq!(cfg.memory, "1G");
        assert_eq!(cfg.stop_timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_overrides() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mineswap.toml");
        std::fs::write(
            &path,
            r#"
servers_dir = "/srv/minecraft"
memory = "4G"
jvm_args = ["-XX:+UseG1GC"]

[rcon]
host = "127.0.0.1"
password = "hunter2"
enabled = true
"#,
        )
        .unwrap();

        let cfg = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(cfg.servers_dir, PathBuf::from("/srv/minecraft"));
        assert_eq!(cfg.rcon.port, 25575);
        assert!(cfg.remote_session().is_active());

        let args = cfg.launch_options().args_for("server.jar");
        assert_eq!(
            args,
            ["-Xmx4G", "-Xms4G", "-XX:+UseG1GC", "-jar", "server.jar", "nogui"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mineswap.toml");
        std::fs::write(&path, "memory = [").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }
}
