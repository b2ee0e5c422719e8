//! 외부 fetch 도구로 카탈로그/모듈 파일을 내려받기
//!
//! 전송은 서브프로세스(`curl`)가 수행하고, 호출자는 완료 future만 받습니다.
//! 시작 단계의 실패(도구 없음, PID 획득 실패)는 즉시 `FetchError`로 반환되고
//! 완료 future는 종료 코드를 해석합니다. 자동 재시도는 없습니다.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::error::FetchError;
use crate::utils::apply_creation_flags;

pub const DEFAULT_FETCH_PROGRAM: &str = "curl";
/// fetch 도구 자체의 네트워크 타임아웃
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// 호스트 프록시 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl ProxySettings {
    /// 활성화되어 있고 호스트가 비어있지 않을 때만 반환
    pub fn active_host(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.host.as_deref().filter(|h| !h.trim().is_empty())
    }
}

/// 진행 중인 전송. 완료 시 성공/실패를 돌려줌
pub type FetchJob = BoxFuture<'static, Result<(), FetchError>>;

/// 전송 도구 추상화 — 실제 구현은 `CurlTool`
pub trait FetchTool: Send + Sync {
    fn start(&self, url: &str, dest: &Path, proxy: &ProxySettings) -> Result<FetchJob, FetchError>;
}

/// `curl` 서브프로세스 기반 전송
#[derive(Debug, Clone)]
pub struct CurlTool {
    program: String,
    timeout: Duration,
}

impl CurlTool {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }

    pub fn command_args(&self, url: &str, dest: &Path, proxy: &ProxySettings) -> Vec<String> {
        let mut args = vec![
            "--location".to_string(),
            "--silent".to_string(),
            "--fail".to_string(),
            "--max-time".to_string(),
            self.timeout.as_secs().max(1).to_string(),
            url.to_string(),
        ];
        if let Some(host) = proxy.active_host() {
            args.push("--proxy".to_string());
            args.push(host.to_string());
        }
        args.push("--output".to_string());
        args.push(dest.to_string_lossy().into_owned());
        args
    }
}

impl Default for CurlTool {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_PROGRAM, DEFAULT_FETCH_TIMEOUT)
    }
}

impl FetchTool for CurlTool {
    fn start(&self, url: &str, dest: &Path, proxy: &ProxySettings) -> Result<FetchJob, FetchError> {
        tracing::debug!("[Fetch] Getting {} -> {}", url, dest.display());

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(url, dest, proxy))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        apply_creation_flags(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FetchError::ToolNotFound {
                    program: self.program.clone(),
                }
            } else {
                FetchError::Spawn {
                    program: self.program.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id().ok_or_else(|| FetchError::NoPid {
            program: self.program.clone(),
        })?;
        tracing::debug!("[Fetch] {} (pid {}) started", self.program, pid);

        let url = url.to_string();
        Ok(Box::pin(async move {
            let status = child.wait().await.map_err(|source| FetchError::Io {
                url: url.clone(),
                source,
            })?;
            if status.success() {
                tracing::debug!("[Fetch] Finished {}", url);
                Ok(())
            } else {
                Err(FetchError::ExitStatus {
                    url,
                    code: status.code(),
                })
            }
        }))
    }
}

/// 카탈로그 및 모듈 다운로드 진입점
#[derive(Clone)]
pub struct CatalogFetcher {
    tool: Arc<dyn FetchTool>,
    catalog_url: String,
    cache_path: PathBuf,
}

impl CatalogFetcher {
    pub fn new(tool: Arc<dyn FetchTool>, catalog_url: &str, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            catalog_url: catalog_url.to_string(),
            cache_path: cache_path.into(),
        }
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    /// 카탈로그 URL → 캐시 파일 경로로 직접 덮어쓰기
    pub fn fetch_catalog(&self, proxy: &ProxySettings) -> Result<FetchJob, FetchError> {
        tracing::info!("[Fetch] Refreshing catalog from {}", self.catalog_url);
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FetchError::Io {
                url: self.catalog_url.clone(),
                source,
            })?;
        }
        self.tool.start(&self.catalog_url, &self.cache_path, proxy)
    }

    /// 임의 URL → 지정 경로 (모듈 바이너리용)
    pub fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        proxy: &ProxySettings,
    ) -> Result<FetchJob, FetchError> {
        tracing::info!("[Fetch] Downloading {} -> {}", url, dest.display());
        self.tool.start(url, dest, proxy)
    }
}

/// 내려받은 파일의 hex 다이제스트 확인.
/// 40자리는 SHA-1, 64자리는 SHA-256. 그 외 길이나 hex 가 아닌 값은 `BadChecksum`
pub fn verify_checksum(path: &Path, expected: &str, url: &str) -> Result<(), FetchError> {
    let expected = expected.trim().to_ascii_lowercase();
    let well_formed = matches!(expected.len(), 40 | 64)
        && expected.chars().all(|c| c.is_ascii_hexdigit());
    if !well_formed {
        tracing::warn!("[Fetch] Rejecting unusable checksum '{}' for {}", expected, url);
        return Err(FetchError::BadChecksum {
            url: url.to_string(),
            checksum: expected,
        });
    }

    let bytes = std::fs::read(path).map_err(|source| FetchError::Io {
        url: url.to_string(),
        source,
    })?;
    let actual = if expected.len() == 40 {
        hex::encode(Sha1::digest(&bytes))
    } else {
        hex::encode(Sha256::digest(&bytes))
    };

    if actual != expected {
        return Err(FetchError::ChecksumMismatch {
            url: url.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
