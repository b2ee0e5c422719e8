//! 설정으로부터 레지스트리 세션 조립
//!
//! CLI 와 통합 테스트가 공유하는 진입점입니다. tokio 런타임 안에서 호출해야 합니다.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

use plugin_registry_lib::{
    module_suffix, CatalogFetcher, CatalogParser, CatalogStore, CurlTool, ExtensionHost,
    FailureReport, FetchTool, InstalledExtensionIndex, LifecycleOrchestrator, RegistryError,
    RegistryEvent, RegistrySession, RegistryState, RegistryStatus, UpdateCheck,
};

use crate::config::RegistryConfig;
use crate::host::DylibHost;

/// 실제 호스트(`DylibHost`)와 `curl` 로 세션 시작
pub fn start(cfg: &RegistryConfig) -> (RegistrySession, Arc<DylibHost>) {
    let host = Arc::new(DylibHost::new(cfg.proxy.clone()));
    host.load_dir(&cfg.extensions_dir, module_suffix());

    let tool = Arc::new(CurlTool::new(&cfg.fetch_program, cfg.fetch_timeout()));
    let session = start_with(cfg, tool, host.clone());
    (session, host)
}

/// 전송 도구와 호스트를 주입해 세션 시작
pub fn start_with(
    cfg: &RegistryConfig,
    tool: Arc<dyn FetchTool>,
    host: Arc<dyn ExtensionHost>,
) -> RegistrySession {
    let parser = match cfg.locale.as_deref() {
        Some(locale) if !locale.is_empty() => CatalogParser::new(&cfg.platform, Some(locale)),
        _ => CatalogParser::from_env(&cfg.platform),
    };
    let store = CatalogStore::new(cfg.cache_file(), cfg.cache_ttl(), parser);
    let fetcher = CatalogFetcher::new(tool, &cfg.catalog_url, cfg.cache_file());
    let index = InstalledExtensionIndex::new(host);

    let (orchestrator, completions) =
        LifecycleOrchestrator::new(store, fetcher, index, cfg.paths());
    RegistrySession::spawn(
        orchestrator,
        completions,
        Some(UpdateCheck {
            version_url: cfg.version_url.clone(),
            site_url: cfg.site_url.clone(),
        }),
    )
}

/// 카탈로그 사이클이 끝날 때까지 대기. 실패하면 실패 보고 메시지로 에러.
/// 이벤트가 밀려 유실되면 세션 스냅샷으로 현재 상태를 확인
pub async fn wait_for_catalog(
    session: &RegistrySession,
    rx: &mut broadcast::Receiver<RegistryEvent>,
) -> Result<RegistryState> {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("[Session] Missed {} event(s), checking snapshot", n);
                let state = session.snapshot().await?.state;
                match state.status {
                    RegistryStatus::Loaded => return Ok(state),
                    RegistryStatus::Error => bail!("Catalog could not be loaded (see log)"),
                    RegistryStatus::NotLoaded | RegistryStatus::Loading => continue,
                }
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Registry session closed"),
        };
        match event {
            RegistryEvent::StateChanged { state } if state.status == RegistryStatus::Loaded => {
                return Ok(state);
            }
            RegistryEvent::OperationFailed { report } if report.entry_id.is_none() => {
                bail!("{} ({})", report.message, report.error_code);
            }
            _ => {}
        }
    }
}

/// 엔트리 작업의 완료/실패 대기
pub async fn wait_for_operation(
    rx: &mut broadcast::Receiver<RegistryEvent>,
    id: &str,
) -> Result<(), FailureReport> {
    loop {
        let event = match next_event(rx).await {
            Ok(event) => event,
            Err(_) => {
                return Err(FailureReport::new("wait", Some(id), &RegistryError::SessionClosed));
            }
        };
        match event {
            RegistryEvent::OperationFinished { id: done, .. } if done == id => return Ok(()),
            RegistryEvent::OperationFailed { report } if report.entry_id.as_deref() == Some(id) => {
                return Err(report);
            }
            _ => {}
        }
    }
}

async fn next_event(rx: &mut broadcast::Receiver<RegistryEvent>) -> Result<RegistryEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("[Session] Missed {} event(s)", n);
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Registry session closed"),
        }
    }
}
