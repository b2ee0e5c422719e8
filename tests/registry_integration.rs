//! ═══════════════════════════════════════════════════════════════════
//! 레지스트리 통합 테스트
//! ═══════════════════════════════════════════════════════════════════
//!
//! 설정 → 세션 조립 → 카탈로그 → 설치/제거 전체 흐름을 테스트합니다:
//!
//! 1. **캐시 로드** — 신선한 캐시는 네트워크 없이 목록 제공
//! 2. **설치** — 다운로드 → 호스트 로드 → 설치 디렉터리
//! 3. **제거** — 격리 디렉터리로 이동
//! 4. **실패 보고** — fetch 도구 부재 / 전송 실패
//!
//! 모든 테스트는 `tempdir`을 사용해 파일시스템을 격리합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use plugin_registry::app;
use plugin_registry::config::RegistryConfig;
use plugin_registry_lib::{
    module_suffix, CurlTool, ExtensionHost, FetchError, FetchJob, FetchTool, InstalledExtension,
    LoadError, ProxySettings, RegistryError,
};

const CATALOG_URL: &str = "http://registry.test/plugins.ini";
const MODULE_URL: &str = "http://registry.test/dl/hello.bin";

// ═══════════════════════════════════════════════════════
// 헬퍼
// ═══════════════════════════════════════════════════════

#[derive(Default)]
struct MapFetch(Mutex<HashMap<String, Vec<u8>>>);

impl FetchTool for MapFetch {
    fn start(&self, url: &str, dest: &Path, _proxy: &ProxySettings) -> Result<FetchJob, FetchError> {
        let body = self.0.lock().unwrap().get(url).cloned();
        let dest = dest.to_path_buf();
        let url = url.to_string();
        Ok(Box::pin(async move {
            match body {
                Some(bytes) => tokio::fs::write(&dest, bytes)
                    .await
                    .map_err(|source| FetchError::Io { url, source }),
                None => Err(FetchError::ExitStatus { url, code: Some(22) }),
            }
        }))
    }
}

/// 파일 내용 `이름|버전` 을 그대로 로드 결과로 보고하는 호스트
#[derive(Default)]
struct TextHost {
    loaded: Mutex<Vec<InstalledExtension>>,
    update_check: Mutex<Option<(String, String)>>,
}

impl ExtensionHost for TextHost {
    fn loaded_extensions(&self) -> Vec<InstalledExtension> {
        self.loaded.lock().unwrap().clone()
    }

    fn load_extension(&self, path: &Path) -> Result<(), LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| LoadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (name, version) = text.split_once('|').ok_or_else(|| LoadError {
            path: path.to_path_buf(),
            reason: "not a module".into(),
        })?;
        let mut loaded = self.loaded.lock().unwrap();
        loaded.retain(|e| e.name != name);
        loaded.push(InstalledExtension {
            name: name.into(),
            version: version.into(),
            file_path: path.to_path_buf(),
        });
        Ok(())
    }

    fn extension_relocated(&self, from: &Path, to: &Path) {
        for ext in self.loaded.lock().unwrap().iter_mut() {
            if ext.file_path == from {
                ext.file_path = to.to_path_buf();
            }
        }
    }

    fn register_update_check(&self, version_url: &str, site_url: &str) {
        *self.update_check.lock().unwrap() = Some((version_url.into(), site_url.into()));
    }
}

fn test_config(dir: &TempDir) -> RegistryConfig {
    RegistryConfig {
        catalog_url: CATALOG_URL.into(),
        cache_dir: dir.path().join("cache"),
        extensions_dir: dir.path().join("plugins"),
        staging_dir: dir.path().join("staging"),
        quarantine_dir: dir.path().join("quarantine"),
        platform: "itest".into(),
        locale: Some("ko_KR.UTF-8".into()),
        ..RegistryConfig::default()
    }
}

fn catalog() -> String {
    format!(
        "# test catalog\n\
         [hello]\n\
         name=Hello\n\
         name[ko]=안녕\n\
         version=0.2.0\n\
         itest_url={}\n\
         \n\
         [other]\n\
         name=Other\n",
        MODULE_URL
    )
}

fn write_cache(cfg: &RegistryConfig) {
    std::fs::create_dir_all(&cfg.cache_dir).unwrap();
    std::fs::write(cfg.cache_file(), catalog()).unwrap();
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

// ═══════════════════════════════════════════════════════
// 테스트
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_fresh_cache_lists_localized_entries() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);
    write_cache(&cfg);

    let host = Arc::new(TextHost::default());
    let session = app::start_with(&cfg, Arc::new(MapFetch::default()), host.clone());
    let mut rx = session.subscribe();
    session.open().await.unwrap();
    within(app::wait_for_catalog(&session, &mut rx)).await.unwrap();

    let snapshot = session.snapshot().await.unwrap();
    let ids: Vec<&str> = snapshot.entries.iter().map(|r| r.entry.id.as_str()).collect();
    assert_eq!(ids, vec!["hello", "other"]);
    assert_eq!(snapshot.entries[0].entry.name, "안녕");
    assert!(snapshot.entries[0].state.can_install);
    assert!(!snapshot.entries[1].state.can_install);

    assert_eq!(
        host.update_check.lock().unwrap().clone(),
        Some((cfg.version_url.clone(), cfg.site_url.clone()))
    );
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_install_and_remove_end_to_end() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);

    let fetch = Arc::new(MapFetch::default());
    fetch.0.lock().unwrap().insert(CATALOG_URL.into(), catalog().into_bytes());
    // 로케일 이름과 호스트 보고 이름이 같아야 매칭됨
    fetch.0.lock().unwrap().insert(MODULE_URL.into(), "안녕|0.2.0".as_bytes().to_vec());
    let host = Arc::new(TextHost::default());

    let session = app::start_with(&cfg, fetch, host.clone());
    let mut rx = session.subscribe();
    session.open().await.unwrap();
    within(app::wait_for_catalog(&session, &mut rx)).await.unwrap();
    assert!(cfg.cache_file().is_file());

    session.install("hello").await.unwrap();
    within(app::wait_for_operation(&mut rx, "hello")).await.unwrap();

    let dest = cfg.extensions_dir.join(format!("hello.{}", module_suffix()));
    assert!(dest.is_file());

    let snapshot = session.snapshot().await.unwrap();
    let row = &snapshot.entries[0];
    assert!(row.state.can_remove);
    assert!(!row.state.can_install);
    assert_eq!(row.state.installed_version.as_deref(), Some("0.2.0"));

    let quarantined: PathBuf = session.uninstall("hello").await.unwrap();
    assert!(!dest.exists());
    assert!(quarantined.starts_with(&cfg.quarantine_dir));
    assert!(quarantined.is_file());

    let snapshot = session.snapshot().await.unwrap();
    assert!(snapshot.entries[0].state.user_removed);
    assert!(snapshot.entries[0].state.can_install);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_fetch_tool_reports_fetch_error() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);
    let tool = Arc::new(CurlTool::new(
        "plugin-registry-no-such-fetch-tool",
        cfg.fetch_timeout(),
    ));

    let session = app::start_with(&cfg, tool, Arc::new(TextHost::default()));
    let mut rx = session.subscribe();
    session.open().await.unwrap();

    let err = within(app::wait_for_catalog(&session, &mut rx)).await.unwrap_err();
    assert!(err.to_string().contains("FETCH_ERROR"));

    assert!(matches!(
        session.install("hello").await,
        Err(RegistryError::NotLoaded)
    ));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_download_reports_entry() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);
    write_cache(&cfg);

    let session = app::start_with(&cfg, Arc::new(MapFetch::default()), Arc::new(TextHost::default()));
    let mut rx = session.subscribe();
    session.open().await.unwrap();
    within(app::wait_for_catalog(&session, &mut rx)).await.unwrap();

    session.install("hello").await.unwrap();
    let report = within(app::wait_for_operation(&mut rx, "hello"))
        .await
        .unwrap_err();
    assert_eq!(report.error_code, "FETCH_ERROR");
    assert_eq!(report.entry_id.as_deref(), Some("hello"));

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.state.status, plugin_registry_lib::RegistryStatus::Loaded);
    assert!(snapshot.entries[0].state.can_install);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_large_catalog_loads_without_hanging() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);
    // broadcast 버퍼(256)보다 많은 엔트리
    let raw: String = (0..300)
        .map(|i| format!("[p{:03}]\nname=Plugin {}\nversion=1.0\n", i, i))
        .collect();
    std::fs::create_dir_all(&cfg.cache_dir).unwrap();
    std::fs::write(cfg.cache_file(), raw).unwrap();

    let session = app::start_with(&cfg, Arc::new(MapFetch::default()), Arc::new(TextHost::default()));
    let mut rx = session.subscribe();
    session.open().await.unwrap();
    let state = within(app::wait_for_catalog(&session, &mut rx)).await.unwrap();
    assert_eq!(state.status, plugin_registry_lib::RegistryStatus::Loaded);

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.entries.len(), 300);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_path_like_entry_id_never_installs_outside() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(&dir);
    std::fs::create_dir_all(&cfg.cache_dir).unwrap();
    std::fs::write(
        cfg.cache_file(),
        format!("[../escaped]\nname=Esc\nitest_url={}\n", MODULE_URL),
    )
    .unwrap();

    let fetch = MapFetch::default();
    fetch
        .0
        .lock()
        .unwrap()
        .insert(MODULE_URL.into(), b"Esc|1.0".to_vec());
    let session = app::start_with(&cfg, Arc::new(fetch), Arc::new(TextHost::default()));
    let mut rx = session.subscribe();
    session.open().await.unwrap();

    let err = within(app::wait_for_catalog(&session, &mut rx)).await.unwrap_err();
    assert!(err.to_string().contains("PARSE_ERROR"));
    assert!(matches!(
        session.install("../escaped").await,
        Err(RegistryError::NotLoaded)
    ));
    session.shutdown().await.unwrap();

    let escaped = dir.path().join(format!("escaped.{}", module_suffix()));
    assert!(!escaped.exists());
}
