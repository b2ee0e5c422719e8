//! # 플러그인 레지스트리 엔진
//!
//! 원격 카탈로그를 가져와 호스트에 설치된 익스텐션과 대조하고,
//! 설치/업데이트/제거를 안전하게 수행합니다.
//!
//! ## 동작 원리
//! - **캐시**: 카탈로그는 `registry.ini` 로 캐시되며 12시간 동안 네트워크 없이 재사용
//! - **전송**: 외부 fetch 도구(`curl`) 서브프로세스로 비동기 다운로드
//! - **조정**: 엔트리별 허용 동작(install/update/remove)은 렌더링할 때마다 새로 계산
//! - **설치**: 스테이징 → 호스트 로드 → 설치 디렉터리로 rename
//! - **제거**: 삭제하지 않고 격리 디렉터리로 이동 (복원 가능)
//!
//! ## 아키텍처
//! - **session.rs**: 단일 tokio 태스크에서 오케스트레이터 구동, 이벤트 브로드캐스트
//! - **orchestrator.rs**: 카탈로그 사이클 + 엔트리 작업 상태 머신
//! - **store.rs / fetch.rs / catalog.rs**: 캐시 파일, 전송, 파싱
//! - **installed.rs**: 호스트 협력자 인터페이스
//!
//! ## 카탈로그 형식
//! ```ini
//! [attach-tool]
//! name=Attachment Tool
//! name[ko]=첨부 도구
//! version=1.2.0
//! description=Adds attachment helpers
//! author=Jane Doe
//! url=https://example.org/attach-tool
//! license=GPL-2.0
//! linux_x86_64_url=https://example.org/dl/attach-tool.so
//! linux_x86_64_sha1sum=aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d
//! ```

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod installed;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod store;
pub mod version;

mod utils;


// Re-exports for convenience
pub use catalog::{default_platform, module_suffix, Catalog, CatalogEntry, CatalogParser};
pub use error::{
    Action, ErrorKind, FailureReport, FetchError, FileOpError, InstallError, LoadError,
    ParseError, RegistryError,
};
pub use fetch::{
    CatalogFetcher, CurlTool, FetchJob, FetchTool, ProxySettings, DEFAULT_FETCH_PROGRAM,
    DEFAULT_FETCH_TIMEOUT,
};
pub use installed::{ExtensionHost, InstalledExtension, InstalledExtensionIndex};
pub use orchestrator::{Completion, CompletionReceiver, LifecycleOrchestrator, RegistryEvent, RegistryPaths};
pub use session::{RegistrySession, RegistryView, UpdateCheck};
pub use state::{
    EntryRow, OperationPhase, PluginEntryState, RegistrySnapshot, RegistryState, RegistryStatus,
};
pub use store::{CatalogStore, CACHE_FILE_NAME, DEFAULT_CACHE_TTL};
pub use version::{compare, compare_installed, Version};
