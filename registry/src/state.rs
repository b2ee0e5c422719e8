//! 레지스트리 전역 상태와 엔트리별 파생 상태
//!
//! `PluginEntryState`는 저장하지 않고 렌더링할 때마다
//! 카탈로그 엔트리 + 설치본 + userRemoved 플래그로부터 다시 계산합니다.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::catalog::CatalogEntry;
use crate::installed::InstalledExtension;
use crate::version::{compare_installed, Version};

/// 카탈로그 로드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    NotLoaded,
    Loading,
    Loaded,
    Error,
}

/// 프로세스 전역 레지스트리 상태
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryState {
    pub status: RegistryStatus,
    pub cache_file_path: PathBuf,
    pub cache_ttl_secs: u64,
    /// 마지막으로 카탈로그를 성공적으로 로드한 시각 (RFC 3339)
    pub last_refreshed: Option<String>,
}

/// 엔트리 작업 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Idle,
    Downloading,
    /// 호스트 로드는 끝났지만 모듈 파일이 아직 설치 디렉터리로 옮겨지지 않음
    LoadedNotPersisted,
    Removing,
    Restoring,
}

/// 엔트리별 허용 동작 (파생 값)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntryState {
    pub can_install: bool,
    pub can_update: bool,
    pub can_remove: bool,
    pub can_restore: bool,
    pub in_progress: bool,
    pub phase: OperationPhase,
    pub user_removed: bool,
    pub installed_version: Option<String>,
    pub quarantine_path: Option<PathBuf>,
    /// `LoadedNotPersisted` 상태에서 호스트가 로드한 임시 파일
    pub unpersisted_path: Option<PathBuf>,
}

impl PluginEntryState {
    /// 순수 계산 — 부수효과 없음
    pub fn compute(
        entry: &CatalogEntry,
        installed: Option<&InstalledExtension>,
        user_removed: bool,
        phase: OperationPhase,
    ) -> Self {
        let downloadable = entry.download_url.is_some();
        let can_remove = installed.is_some() && !user_removed;
        let can_update = downloadable
            && can_remove
            && compare_installed(
                Some(&Version::parse(&entry.version)),
                installed.and_then(|i| i.parsed_version()).as_ref(),
            ) == Ordering::Greater;
        // 두 조건이 겹치면 update 우선
        let can_install = downloadable && (installed.is_none() || user_removed) && !can_update;

        Self {
            can_install,
            can_update,
            can_remove,
            can_restore: false,
            in_progress: matches!(
                phase,
                OperationPhase::Downloading | OperationPhase::Removing | OperationPhase::Restoring
            ),
            phase,
            user_removed,
            installed_version: installed.map(|i| i.version.clone()),
            quarantine_path: None,
            unpersisted_path: None,
        }
    }
}

/// 목록 렌더링용 한 줄
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRow {
    pub entry: CatalogEntry,
    pub state: PluginEntryState,
}

/// 전체 상태 스냅샷 (CLI `--json` 출력 등)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub state: RegistryState,
    pub entries: Vec<EntryRow>,
}
