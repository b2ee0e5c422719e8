//! 디스크 캐시 카탈로그 (`registry.ini`) 관리
//!
//! 캐시는 마지막 수정 시각으로부터 TTL(기본 12시간) 동안 유효합니다.
//! fetch 도구는 캐시 경로에 직접 덮어쓰고, 이 모듈은 읽기/신선도 판단/원자적 교체를 담당합니다.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;

use crate::catalog::{Catalog, CatalogParser};
use crate::error::ParseError;

pub const CACHE_FILE_NAME: &str = "registry.ini";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

pub struct CatalogStore {
    path: PathBuf,
    ttl: Duration,
    parser: CatalogParser,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration, parser: CatalogParser) -> Self {
        Self {
            path: path.into(),
            ttl,
            parser,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 캐시 파일이 일반 파일로 존재하고 `mtime + ttl > now` 인지
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }

    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        let modified = match self.last_modified() {
            Some(m) => m,
            None => return false,
        };
        match modified.checked_add(self.ttl) {
            Some(expires) => expires > now,
            None => true,
        }
    }

    /// 일반 파일일 때만 수정 시각 반환
    pub fn last_modified(&self) -> Option<SystemTime> {
        let meta = std::fs::metadata(&self.path).ok()?;
        if !meta.is_file() {
            return None;
        }
        meta.modified().ok()
    }

    /// 캐시 파일 전체를 파싱. 형식 오류면 전체 거부
    pub fn load(&self) -> Result<Catalog, ParseError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ParseError::Read {
            path: self.path.clone(),
            source,
        })?;
        let catalog = self.parser.parse(&raw)?;
        tracing::info!(
            "[Catalog] Loaded {} entries from {}",
            catalog.len(),
            self.path.display()
        );
        Ok(catalog)
    }

    /// 같은 디렉터리의 임시 파일에 쓴 뒤 rename으로 교체
    pub fn write(&self, raw: &[u8]) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(raw)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!("[Catalog] Cache written: {} ({} bytes)", self.path.display(), raw.len());
        Ok(())
    }
}
