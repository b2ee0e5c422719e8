//! 레지스트리 설정 파일 관리
//!
//! `config/registry.toml` 에서 설정을 로드합니다. 파일이 없으면 기본값을 사용합니다.

use anyhow::{Context, Result};
use plugin_registry_lib::{
    default_platform, module_suffix, ProxySettings, RegistryPaths, CACHE_FILE_NAME,
    DEFAULT_FETCH_PROGRAM,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "PLUGIN_REGISTRY_CONFIG";

const DEFAULT_CATALOG_URL: &str = "http://localhost/plugin-registry/plugins.ini";
const DEFAULT_VERSION_URL: &str = "http://localhost/plugin-registry/plugin_version.txt";
const DEFAULT_SITE_URL: &str = "http://localhost/plugin-registry/plugins.html";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub catalog_url: String,
    /// 업데이트 알림용 "최신 버전" URL
    pub version_url: String,
    /// 업데이트 알림용 프로젝트 사이트 URL
    pub site_url: String,
    pub cache_dir: PathBuf,
    pub extensions_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub cache_ttl_hours: u64,
    pub fetch_program: String,
    pub fetch_timeout_secs: u64,
    pub platform: String,
    /// 비어있으면 LC_ALL / LC_MESSAGES / LANG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub proxy: ProxySettings,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let data = data_root();
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            version_url: DEFAULT_VERSION_URL.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            cache_dir: std::env::temp_dir().join("plugin-registry"),
            extensions_dir: data.join("plugins"),
            staging_dir: data.join("staging"),
            quarantine_dir: data.join("quarantine"),
            cache_ttl_hours: 12,
            fetch_program: DEFAULT_FETCH_PROGRAM.to_string(),
            fetch_timeout_secs: 10,
            platform: default_platform(),
            locale: None,
            proxy: ProxySettings::default(),
        }
    }
}

impl RegistryConfig {
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn paths(&self) -> RegistryPaths {
        RegistryPaths {
            extensions_dir: self.extensions_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            quarantine_dir: self.quarantine_dir.clone(),
            module_suffix: module_suffix().to_string(),
        }
    }
}

/// 사용자별 데이터 디렉터리
fn data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("plugin-registry");
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("plugin-registry");
        }
    }
    std::env::temp_dir().join("plugin-registry").join("data")
}

/// 설정 파일 경로 결정
pub fn config_file_path() -> PathBuf {
    // 1. 환경변수
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }

    // 2. 실행 파일 옆 config/registry.toml
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let cfg = dir.join("config").join("registry.toml");
            if cfg.exists() {
                return cfg;
            }
        }
    }

    // 3. CWD의 config/registry.toml (없으면 생성 위치로도 사용)
    PathBuf::from("config").join("registry.toml")
}

/// TOML 파일에서 설정 로드 (없으면 기본값)
pub fn load_registry_config() -> Result<RegistryConfig> {
    let path = config_file_path();
    if !path.exists() {
        tracing::debug!("[Config] {} not found, using defaults", path.display());
        return Ok(RegistryConfig::default());
    }
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<RegistryConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg: RegistryConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    tracing::info!("[Config] Loaded {}", path.display());
    Ok(cfg)
}
