//! 레지스트리 라이프사이클 상태 머신
//!
//! ## 카탈로그 사이클
//! `NotLoaded → Loaded | Error`, `Loaded/Error → (refresh) → Loading → Loaded | Error`
//!
//! ## 엔트리 작업
//! - 설치/업데이트: 스테이징 임시 파일로 다운로드 → (체크섬) → 호스트 로드 → 설치 디렉터리로 rename
//! - 제거: 설치 파일을 격리 디렉터리로 rename (소프트 삭제)
//! - 복원: 격리된 파일을 원래 위치로 되돌림
//!
//! 모든 메서드는 동기이며 블로킹하지 않습니다. 네트워크 전송만 별도 태스크에서 진행되고
//! 완료 시 `Completion` 메시지로 돌아와 `handle_completion`에서 처리됩니다.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::sync::{broadcast, mpsc};

use crate::catalog::{module_suffix, Catalog, CatalogEntry};
use crate::error::{
    Action, FailureReport, FetchError, FileOpError, InstallError, RegistryError,
};
use crate::fetch::{verify_checksum, CatalogFetcher, FetchJob};
use crate::installed::InstalledExtensionIndex;
use crate::state::{
    EntryRow, OperationPhase, PluginEntryState, RegistrySnapshot, RegistryState, RegistryStatus,
};
use crate::store::CatalogStore;

/// 설치/스테이징/격리 디렉터리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPaths {
    pub extensions_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    /// 플랫폼 모듈 확장자 (`so`, `dll`, `dylib`)
    pub module_suffix: String,
}

impl RegistryPaths {
    pub fn new(
        extensions_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            staging_dir: staging_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            module_suffix: module_suffix().to_string(),
        }
    }

    /// `{extensions_dir}/{id}.{suffix}`
    pub fn destination_for(&self, id: &str) -> PathBuf {
        self.extensions_dir
            .join(format!("{}.{}", id, self.module_suffix))
    }
}

/// UI/CLI로 브로드캐스트되는 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    StateChanged { state: RegistryState },
    EntryChanged { id: String, state: PluginEntryState },
    OperationFailed { report: FailureReport },
    /// 엔트리 작업이 성공적으로 끝남
    OperationFinished { id: String, action: Action },
    Notice { message: String },
}

/// 비동기 전송 완료 메시지
#[derive(Debug)]
pub enum Completion {
    Catalog {
        result: Result<(), FetchError>,
    },
    Download {
        id: String,
        result: Result<(), FetchError>,
    },
}

pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

struct PendingDownload {
    action: Action,
    url: String,
    checksum: Option<String>,
    staged: TempPath,
}

enum PendingOp {
    Download(PendingDownload),
    Removing,
    Restoring,
}

impl PendingOp {
    fn phase(&self) -> OperationPhase {
        match self {
            PendingOp::Download(_) => OperationPhase::Downloading,
            PendingOp::Removing => OperationPhase::Removing,
            PendingOp::Restoring => OperationPhase::Restoring,
        }
    }
}

/// 격리된 파일 기록
#[derive(Debug, Clone)]
struct QuarantineRecord {
    original: PathBuf,
    quarantined: PathBuf,
}

pub struct LifecycleOrchestrator {
    store: CatalogStore,
    fetcher: CatalogFetcher,
    index: InstalledExtensionIndex,
    paths: RegistryPaths,
    state: RegistryState,
    entries: Catalog,
    catalog_fetch_in_flight: bool,
    pending: HashMap<String, PendingOp>,
    user_removed: HashSet<String>,
    quarantined: HashMap<String, QuarantineRecord>,
    /// 로드는 됐지만 설치 위치로 옮기지 못한 모듈 (호스트가 이 경로를 물고 있음)
    unpersisted: HashMap<String, TempPath>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    event_tx: broadcast::Sender<RegistryEvent>,
    /// 뷰 전달용 무손실 채널 (broadcast 는 밀리면 오래된 이벤트를 버림)
    watch_tx: Option<mpsc::UnboundedSender<RegistryEvent>>,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: CatalogStore,
        fetcher: CatalogFetcher,
        index: InstalledExtensionIndex,
        paths: RegistryPaths,
    ) -> (Self, CompletionReceiver) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let state = RegistryState {
            status: RegistryStatus::NotLoaded,
            cache_file_path: store.path().to_path_buf(),
            cache_ttl_secs: store.ttl().as_secs(),
            last_refreshed: None,
        };

        let orchestrator = Self {
            store,
            fetcher,
            index,
            paths,
            state,
            entries: Catalog::new(),
            catalog_fetch_in_flight: false,
            pending: HashMap::new(),
            user_removed: HashSet::new(),
            quarantined: HashMap::new(),
            unpersisted: HashMap::new(),
            completion_tx,
            event_tx,
            watch_tx: None,
        };
        (orchestrator, completion_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<RegistryEvent> {
        self.event_tx.clone()
    }

    /// 모든 이벤트를 빠짐없이 받는 수신자. 이전 수신자는 대체됨
    pub fn watch(&mut self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watch_tx = Some(tx);
        rx
    }

    pub fn index(&self) -> &InstalledExtensionIndex {
        &self.index
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    pub fn entries(&self) -> &Catalog {
        &self.entries
    }

    pub fn is_busy(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// 진행 중인 전송(카탈로그 + 엔트리)이 하나라도 있는지
    pub fn has_pending_transfers(&self) -> bool {
        self.catalog_fetch_in_flight
            || self
                .pending
                .values()
                .any(|op| matches!(op, PendingOp::Download(_)))
    }

    // ── 카탈로그 사이클 ──────────────────────────────────────

    /// 레지스트리 페이지가 열릴 때마다 호출되는 조정(reconciliation) 진입점
    pub fn open(&mut self) {
        match self.state.status {
            RegistryStatus::NotLoaded => {
                if self.catalog_fetch_in_flight {
                    tracing::debug!("[Orchestrator] Initial fetch already running");
                    self.emit_state();
                } else if self.store.is_fresh() {
                    tracing::info!("[Orchestrator] Cache is fresh, skipping network");
                    self.load_cache();
                } else {
                    self.start_catalog_fetch();
                }
            }
            RegistryStatus::Loading => self.emit_state(),
            RegistryStatus::Loaded | RegistryStatus::Error => {
                if self.store.is_fresh() {
                    self.publish_all();
                } else {
                    tracing::info!("[Orchestrator] Cache expired, refreshing catalog");
                    self.refresh();
                }
            }
        }
    }

    /// 명시적 새로고침. 이미 전송 중이면 아무것도 하지 않음
    pub fn refresh(&mut self) {
        if self.catalog_fetch_in_flight {
            tracing::debug!("[Orchestrator] Catalog fetch already in flight");
            return;
        }
        if matches!(
            self.state.status,
            RegistryStatus::Loaded | RegistryStatus::Error
        ) {
            self.set_status(RegistryStatus::Loading);
        }
        self.start_catalog_fetch();
    }

    fn start_catalog_fetch(&mut self) {
        let proxy = self.index.host().proxy_settings();
        match self.fetcher.fetch_catalog(&proxy) {
            Ok(job) => {
                self.catalog_fetch_in_flight = true;
                self.spawn_job(job, |result| Completion::Catalog { result });
            }
            Err(e) => self.fail_cycle("fetch", e.into()),
        }
    }

    fn load_cache(&mut self) {
        match self.store.load() {
            Ok(catalog) => {
                // 이전 목록은 통째로 폐기
                self.entries = catalog;
                self.state.last_refreshed = Some(chrono::Utc::now().to_rfc3339());
                self.state.status = RegistryStatus::Loaded;
                tracing::info!(
                    "[Orchestrator] Catalog loaded ({} entries)",
                    self.entries.len()
                );
                self.publish_all();
                self.emit(RegistryEvent::Notice {
                    message: format!("{} plugin(s) in catalog", self.entries.len()),
                });
            }
            Err(e) => self.fail_cycle("load", e.into()),
        }
    }

    fn fail_cycle(&mut self, operation: &str, error: RegistryError) {
        self.state.status = RegistryStatus::Error;
        self.emit_state();
        self.report(operation, None, &error);
    }

    // ── 완료 처리 ─────────────────────────────────────────────

    pub fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Catalog { result } => {
                self.catalog_fetch_in_flight = false;
                match result {
                    Ok(()) => self.load_cache(),
                    Err(e) => self.fail_cycle("fetch", e.into()),
                }
            }
            Completion::Download { id, result } => self.finish_download(&id, result),
        }
    }

    // ── 엔트리 작업 ───────────────────────────────────────────

    pub fn start_install(&mut self, id: &str) -> Result<(), RegistryError> {
        self.start_download(id, Action::Install)
    }

    pub fn start_update(&mut self, id: &str) -> Result<(), RegistryError> {
        self.start_download(id, Action::Update)
    }

    fn start_download(&mut self, id: &str, action: Action) -> Result<(), RegistryError> {
        let entry = self.eligible_entry(id, action)?;
        let url = entry
            .download_url
            .clone()
            .ok_or_else(|| RegistryError::NotAllowed {
                id: id.to_string(),
                action,
            })?;

        let result = self.begin_download(id, action, &url, entry.download_checksum.clone());
        if let Err(e) = &result {
            self.report(&action.to_string(), Some(id), e);
        }
        result
    }

    fn begin_download(
        &mut self,
        id: &str,
        action: Action,
        url: &str,
        checksum: Option<String>,
    ) -> Result<(), RegistryError> {
        let staging = &self.paths.staging_dir;
        std::fs::create_dir_all(staging).map_err(|source| FileOpError::Dir {
            path: staging.clone(),
            source,
        })?;
        let staged = tempfile::Builder::new()
            .prefix(&format!("{}-", id))
            .suffix(".part")
            .tempfile_in(staging)
            .map_err(|source| FetchError::Io {
                url: url.to_string(),
                source,
            })?
            .into_temp_path();

        let proxy = self.index.host().proxy_settings();
        // 실패하면 staged 가 drop 되면서 임시 파일도 삭제됨
        let job = self.fetcher.fetch_to_file(url, &staged, &proxy)?;

        tracing::info!("[Orchestrator] {} '{}' started", action, id);
        self.pending.insert(
            id.to_string(),
            PendingOp::Download(PendingDownload {
                action,
                url: url.to_string(),
                checksum,
                staged,
            }),
        );
        let owned_id = id.to_string();
        self.spawn_job(job, move |result| Completion::Download {
            id: owned_id,
            result,
        });
        self.emit_entry(id);
        Ok(())
    }

    fn finish_download(&mut self, id: &str, result: Result<(), FetchError>) {
        let download = match self.pending.remove(id) {
            Some(PendingOp::Download(d)) => d,
            Some(other) => {
                tracing::warn!("[Orchestrator] Unexpected download completion for '{}'", id);
                self.pending.insert(id.to_string(), other);
                return;
            }
            None => {
                tracing::warn!("[Orchestrator] Stray download completion for '{}'", id);
                return;
            }
        };
        let action = download.action;
        let operation = action.to_string();

        if let Err(e) = self.install_downloaded(id, download, result) {
            self.emit_entry(id);
            self.report(&operation, Some(id), &e);
            return;
        }

        tracing::info!("[Orchestrator] {} '{}' completed", operation, id);
        self.emit_entry(id);
        self.emit(RegistryEvent::OperationFinished {
            id: id.to_string(),
            action,
        });
    }

    /// 전송 결과 확인 → (체크섬) → 호스트 로드 → 설치 위치로 이동.
    /// 로드 이전에 실패하면 staged 가 drop 되면서 임시 파일도 삭제됨
    fn install_downloaded(
        &mut self,
        id: &str,
        download: PendingDownload,
        transfer: Result<(), FetchError>,
    ) -> Result<(), RegistryError> {
        let PendingDownload {
            url,
            checksum,
            staged,
            ..
        } = download;

        transfer?;
        if let Some(expected) = checksum.as_deref() {
            verify_checksum(&staged, expected, &url)?;
        }
        self.index.host().load_extension(&staged)?;

        self.emit_loaded_not_persisted(id, &staged);
        self.persist_loaded(id, staged)
    }

    fn persist_loaded(&mut self, id: &str, staged: TempPath) -> Result<(), RegistryError> {
        let dest = self.paths.destination_for(id);
        let from = staged.to_path_buf();

        let persisted = match std::fs::create_dir_all(&self.paths.extensions_dir) {
            Ok(()) => staged.persist(&dest).map_err(|e| (e.error, e.path)),
            Err(error) => Err((error, staged)),
        };

        match persisted {
            Ok(()) => {
                tracing::info!("[Orchestrator] Installed {}", dest.display());
                self.index.host().extension_relocated(&from, &dest);
                self.unpersisted.remove(id);
                self.user_removed.remove(id);
                self.quarantined.remove(id);
                Ok(())
            }
            Err((source, stranded)) => {
                // 호스트가 이미 임시 파일을 로드했으므로 파일을 남겨두고 상태로 노출
                self.unpersisted.insert(id.to_string(), stranded);
                Err(InstallError {
                    from,
                    to: dest,
                    source,
                }
                .into())
            }
        }
    }

    /// 설치 파일을 격리 디렉터리로 옮김 (동기). 격리된 경로 반환
    pub fn uninstall(&mut self, id: &str) -> Result<PathBuf, RegistryError> {
        let entry = self.eligible_entry(id, Action::Remove)?;
        let result = self.quarantine(id, &entry);
        if let Err(e) = &result {
            self.report("remove", Some(id), e);
        }
        result
    }

    fn quarantine(&mut self, id: &str, entry: &CatalogEntry) -> Result<PathBuf, RegistryError> {
        let installed = self
            .index
            .find_by_name(&entry.name)
            .filter(|ext| !ext.file_path.as_os_str().is_empty())
            .ok_or_else(|| FileOpError::NoInstalledFile { id: id.to_string() })?;

        self.pending.insert(id.to_string(), PendingOp::Removing);
        self.emit_entry(id);

        let result = self.move_to_quarantine(id, &installed.file_path);
        self.pending.remove(id);

        match &result {
            Ok(target) => {
                tracing::info!(
                    "[Orchestrator] Removed '{}' -> {}",
                    id,
                    target.display()
                );
                self.user_removed.insert(id.to_string());
                self.quarantined.insert(
                    id.to_string(),
                    QuarantineRecord {
                        original: installed.file_path.clone(),
                        quarantined: target.clone(),
                    },
                );
            }
            Err(e) => tracing::warn!("[Orchestrator] Remove '{}' failed: {}", id, e),
        }
        self.emit_entry(id);
        if result.is_ok() {
            self.emit(RegistryEvent::OperationFinished {
                id: id.to_string(),
                action: Action::Remove,
            });
        }
        result
    }

    fn move_to_quarantine(&self, id: &str, file: &Path) -> Result<PathBuf, RegistryError> {
        let dir = &self.paths.quarantine_dir;
        std::fs::create_dir_all(dir).map_err(|source| FileOpError::Dir {
            path: dir.clone(),
            source,
        })?;

        let target = match file.file_name() {
            Some(name) => dir.join(name),
            None => dir.join(format!("{}.{}", id, self.paths.module_suffix)),
        };
        std::fs::rename(file, &target).map_err(|source| FileOpError::Move {
            op: "quarantine",
            from: file.to_path_buf(),
            to: target.clone(),
            source,
        })?;
        self.index.host().extension_relocated(file, &target);
        Ok(target)
    }

    /// 소프트 삭제 되돌리기
    pub fn restore(&mut self, id: &str) -> Result<PathBuf, RegistryError> {
        self.require_entry(id)?;
        if self.pending.contains_key(id) {
            return Err(RegistryError::Busy { id: id.to_string() });
        }

        let record = match self.quarantined.get(id) {
            Some(r) if self.user_removed.contains(id) => r.clone(),
            _ => {
                let err: RegistryError =
                    FileOpError::NothingQuarantined { id: id.to_string() }.into();
                self.report("restore", Some(id), &err);
                return Err(err);
            }
        };

        self.pending.insert(id.to_string(), PendingOp::Restoring);
        self.emit_entry(id);

        let result = move_back(&record);
        self.pending.remove(id);

        match &result {
            Ok(()) => {
                tracing::info!(
                    "[Orchestrator] Restored '{}' -> {}",
                    id,
                    record.original.display()
                );
                self.index
                    .host()
                    .extension_relocated(&record.quarantined, &record.original);
                self.user_removed.remove(id);
                self.quarantined.remove(id);
            }
            Err(e) => self.report("restore", Some(id), e),
        }
        self.emit_entry(id);
        if result.is_ok() {
            self.emit(RegistryEvent::OperationFinished {
                id: id.to_string(),
                action: Action::Restore,
            });
        }
        result.map(|()| record.original)
    }

    // ── 조회 ─────────────────────────────────────────────────

    /// 현재 설치 상태로부터 매번 새로 계산
    pub fn entry_state(&self, id: &str) -> Option<PluginEntryState> {
        let entry = self.entries.get(id)?;
        Some(self.compute_state(id, entry))
    }

    fn compute_state(&self, id: &str, entry: &CatalogEntry) -> PluginEntryState {
        let installed = self.index.find_by_name(&entry.name);
        let unpersisted = self.unpersisted.get(id);
        let phase = match self.pending.get(id) {
            Some(op) => op.phase(),
            None if unpersisted.is_some() => OperationPhase::LoadedNotPersisted,
            None => OperationPhase::Idle,
        };
        let user_removed = self.user_removed.contains(id);

        let mut state = PluginEntryState::compute(entry, installed.as_ref(), user_removed, phase);
        let record = self.quarantined.get(id);
        state.can_restore = user_removed && record.is_some();
        state.quarantine_path = record.map(|r| r.quarantined.clone());
        state.unpersisted_path = unpersisted.map(|p| p.to_path_buf());
        state
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self
            .entries
            .iter()
            .map(|(id, entry)| EntryRow {
                entry: entry.clone(),
                state: self.compute_state(id, entry),
            })
            .collect();
        RegistrySnapshot {
            state: self.state.clone(),
            entries,
        }
    }

    fn require_entry(&self, id: &str) -> Result<CatalogEntry, RegistryError> {
        match self.entries.get(id) {
            Some(entry) => Ok(entry.clone()),
            None if self.entries.is_empty()
                && self.state.status != RegistryStatus::Loaded =>
            {
                Err(RegistryError::NotLoaded)
            }
            None => Err(RegistryError::UnknownEntry { id: id.to_string() }),
        }
    }

    /// 존재/진행중/허용 여부 검사
    fn eligible_entry(&self, id: &str, action: Action) -> Result<CatalogEntry, RegistryError> {
        let entry = self.require_entry(id)?;
        if self.pending.contains_key(id) {
            tracing::warn!(
                "[Orchestrator] Rejected {} '{}': operation in progress",
                action,
                id
            );
            return Err(RegistryError::Busy { id: id.to_string() });
        }

        let state = self.compute_state(id, &entry);
        let allowed = match action {
            Action::Install => state.can_install,
            Action::Update => state.can_update,
            Action::Remove => state.can_remove,
            Action::Restore => state.can_restore,
        };
        if !allowed {
            return Err(RegistryError::NotAllowed {
                id: id.to_string(),
                action,
            });
        }
        Ok(entry)
    }

    // ── 이벤트 ───────────────────────────────────────────────

    fn spawn_job<F>(&self, job: FetchJob, into_completion: F)
    where
        F: FnOnce(Result<(), FetchError>) -> Completion + Send + 'static,
    {
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = job.await;
            // 수신측이 사라졌으면 세션이 종료된 것
            let _ = tx.send(into_completion(result));
        });
    }

    fn set_status(&mut self, status: RegistryStatus) {
        self.state.status = status;
        self.emit_state();
    }

    fn publish_all(&self) {
        self.emit_state();
        for id in self.entries.keys() {
            self.emit_entry(id);
        }
    }

    fn emit_state(&self) {
        self.emit(RegistryEvent::StateChanged {
            state: self.state.clone(),
        });
    }

    fn emit_entry(&self, id: &str) {
        if let Some(state) = self.entry_state(id) {
            self.emit(RegistryEvent::EntryChanged {
                id: id.to_string(),
                state,
            });
        }
    }

    fn emit_loaded_not_persisted(&self, id: &str, staged: &Path) {
        if let Some(entry) = self.entries.get(id) {
            let mut state = self.compute_state(id, entry);
            state.phase = OperationPhase::LoadedNotPersisted;
            state.in_progress = true;
            state.unpersisted_path = Some(staged.to_path_buf());
            self.emit(RegistryEvent::EntryChanged {
                id: id.to_string(),
                state,
            });
        }
    }

    fn report(&self, operation: &str, entry_id: Option<&str>, error: &RegistryError) {
        let report = FailureReport::new(operation, entry_id, error);
        report.log();
        self.emit(RegistryEvent::OperationFailed { report });
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(tx) = &self.watch_tx {
            let _ = tx.send(event.clone());
        }
        // 구독자가 없으면 버려짐
        let _ = self.event_tx.send(event);
    }
}

fn move_back(record: &QuarantineRecord) -> Result<(), RegistryError> {
    if let Some(parent) = record.original.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FileOpError::Dir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::rename(&record.quarantined, &record.original).map_err(|source| {
        FileOpError::Move {
            op: "restore",
            from: record.quarantined.clone(),
            to: record.original.clone(),
            source,
        }
    })?;
    Ok(())
}
