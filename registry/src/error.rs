//! 레지스트리 에러 타입 및 실패 보고
//!
//! ## 에러 분류
//! - `Fetch`   — 외부 fetch 도구 / 네트워크 실패
//! - `Parse`   — 카탈로그 형식 오류
//! - `Load`    — 다운로드한 모듈을 호스트가 거부
//! - `Install` — 로드는 됐지만 최종 위치로 옮기지 못함
//! - `FileOp`  — 제거(격리) / 복원 중 파일 이동 실패
//!
//! 어떤 에러도 프로세스에 치명적이지 않으며 자동 재시도는 없다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// fetch 도구 실행/전송 실패
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Fetch tool '{program}' not found")]
    ToolNotFound { program: String },

    #[error("Couldn't execute fetch tool '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't get PID of fetch tool '{program}'")]
    NoPid { program: String },

    #[error("Fetching {url} failed ({})", exit_label(.code))]
    ExitStatus { url: String, code: Option<i32> },

    #[error("I/O error while fetching {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported checksum '{checksum}' for {url}")]
    BadChecksum { url: String, checksum: String },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by signal".to_string(),
    }
}

/// 카탈로그 파싱 실패 — 부분 결과는 절대 반환하지 않음
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Failed to read catalog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed catalog at line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

/// 호스트가 모듈 로드를 거부함
#[derive(thiserror::Error, Debug)]
#[error("Host rejected module {}: {reason}", .path.display())]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

/// 로드 이후 최종 위치로의 이동 실패
#[derive(thiserror::Error, Debug)]
#[error("Loaded module could not be moved {} -> {}: {source}", .from.display(), .to.display())]
pub struct InstallError {
    pub from: PathBuf,
    pub to: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// 제거/복원 중 파일 작업 실패
#[derive(thiserror::Error, Debug)]
pub enum FileOpError {
    #[error("No installed file is known for '{id}'")]
    NoInstalledFile { id: String },

    #[error("Nothing is quarantined for '{id}'")]
    NothingQuarantined { id: String },

    #[error("Failed to {op} {} -> {}: {source}", .from.display(), .to.display())]
    Move {
        op: &'static str,
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare directory {}: {source}", .path.display())]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 엔트리별로 요청 가능한 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Install,
    Update,
    Remove,
    Restore,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Install => "install",
            Action::Update => "update",
            Action::Remove => "remove",
            Action::Restore => "restore",
        };
        f.write_str(s)
    }
}

/// 레지스트리 엔진 공통 에러
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    FileOp(#[from] FileOpError),

    #[error("An operation is already in progress for '{id}'")]
    Busy { id: String },

    #[error("Unknown catalog entry '{id}'")]
    UnknownEntry { id: String },

    #[error("Cannot {action} '{id}' in its current state")]
    NotAllowed { id: String, action: Action },

    #[error("Catalog is not loaded")]
    NotLoaded,

    #[error("Registry session is closed")]
    SessionClosed,
}

/// UI가 실패 종류를 구분하기 위한 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Parse,
    Load,
    Install,
    FileOp,
    Request,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(_) => ErrorKind::Fetch,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Load(_) => ErrorKind::Load,
            Self::Install(_) => ErrorKind::Install,
            Self::FileOp(_) => ErrorKind::FileOp,
            Self::Busy { .. }
            | Self::UnknownEntry { .. }
            | Self::NotAllowed { .. }
            | Self::NotLoaded
            | Self::SessionClosed => ErrorKind::Request,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::ChecksumMismatch { .. }) => "CHECKSUM_MISMATCH",
            Self::Fetch(FetchError::BadChecksum { .. }) => "BAD_CHECKSUM",
            Self::Fetch(_) => "FETCH_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Load(_) => "LOAD_ERROR",
            Self::Install(_) => "INSTALL_ERROR",
            Self::FileOp(_) => "FILE_OP_ERROR",
            Self::Busy { .. } => "BUSY",
            Self::UnknownEntry { .. } => "UNKNOWN_ENTRY",
            Self::NotAllowed { .. } => "NOT_ALLOWED",
            Self::NotLoaded => "NOT_LOADED",
            Self::SessionClosed => "SESSION_CLOSED",
        }
    }

    /// 사용자에게 표시할 메시지
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Fetch => {
                "플러그인 목록 또는 파일을 내려받지 못했습니다. 네트워크와 프록시 설정을 확인해주세요."
                    .to_string()
            }
            ErrorKind::Parse => "플러그인 목록의 형식이 올바르지 않습니다.".to_string(),
            ErrorKind::Load => "내려받은 플러그인을 불러올 수 없습니다.".to_string(),
            ErrorKind::Install => {
                "플러그인을 불러왔지만 설치 위치로 옮기지 못했습니다.".to_string()
            }
            ErrorKind::FileOp => "플러그인 파일을 옮기지 못했습니다.".to_string(),
            ErrorKind::Request => self.to_string(),
        }
    }
}

/// 실패 보고 (UI 전달 / 로깅용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub timestamp: String,
    pub operation: String,
    /// 엔트리 단위 실패면 엔트리 id, 카탈로그 사이클 실패면 None
    pub entry_id: Option<String>,
    pub kind: ErrorKind,
    pub error_code: String,
    pub message: String,
    pub user_message: String,
}

impl FailureReport {
    pub fn new(operation: &str, entry_id: Option<&str>, error: &RegistryError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            entry_id: entry_id.map(str::to_string),
            kind: error.kind(),
            error_code: error.error_code().to_string(),
            message: error.to_string(),
            user_message: error.user_message(),
        }
    }

    pub fn log(&self) {
        tracing::warn!(
            "[Error] {} - {} ({}): {}",
            self.operation,
            self.entry_id.as_deref().unwrap_or("catalog"),
            self.error_code,
            self.message
        );
    }
}
