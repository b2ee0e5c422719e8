//! 호스트에 현재 로드된 익스텐션 조회
//!
//! 카탈로그 엔트리와 설치본의 관계는 **표시 이름** 기준의 약한 조회입니다.
//! 호스트의 로드 목록은 이 클라이언트와 무관하게 바뀔 수 있으므로 결과를 캐시하지 않고
//! 매번 새로 묻습니다. (id가 아닌 이름으로 매칭하는 동작은 `find_by_name` 한 곳에 격리)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LoadError;
use crate::fetch::ProxySettings;
use crate::version::Version;

/// 호스트가 보고하는 로드된 익스텐션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledExtension {
    pub name: String,
    /// 호스트가 보고한 버전 (모르면 빈 문자열)
    pub version: String,
    /// 실제로 로드된 모듈 파일
    pub file_path: PathBuf,
}

impl InstalledExtension {
    /// 버전을 보고하지 않았으면 None
    pub fn parsed_version(&self) -> Option<Version> {
        if self.version.trim().is_empty() {
            None
        } else {
            Some(Version::parse(&self.version))
        }
    }
}

/// 호스트 애플리케이션 협력자 인터페이스
pub trait ExtensionHost: Send + Sync {
    /// 현재 로드된 익스텐션 목록
    fn loaded_extensions(&self) -> Vec<InstalledExtension>;

    /// 모듈 파일을 호스트에 로드
    fn load_extension(&self, path: &Path) -> Result<(), LoadError>;

    /// 호스트 프록시 설정 (매 전송마다 새로 읽음)
    fn proxy_settings(&self) -> ProxySettings {
        ProxySettings::default()
    }

    /// 로드된 모듈 파일이 다른 위치로 옮겨졌음을 알림 (설치 확정, 격리, 복원)
    fn extension_relocated(&self, _from: &Path, _to: &Path) {}

    /// 업데이트 알림 협력자에게 버전/사이트 URL 전달
    fn register_update_check(&self, _version_url: &str, _site_url: &str) {}
}

/// 이름 기반 설치본 조회
#[derive(Clone)]
pub struct InstalledExtensionIndex {
    host: Arc<dyn ExtensionHost>,
}

impl InstalledExtensionIndex {
    pub fn new(host: Arc<dyn ExtensionHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn ExtensionHost> {
        &self.host
    }

    /// 대소문자를 구분하는 정확한 표시 이름 매칭. 같은 이름이 여럿이면 첫 번째
    pub fn find_by_name(&self, name: &str) -> Option<InstalledExtension> {
        self.host
            .loaded_extensions()
            .into_iter()
            .find(|ext| ext.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ListHost(Mutex<Vec<InstalledExtension>>);

    impl ExtensionHost for ListHost {
        fn loaded_extensions(&self) -> Vec<InstalledExtension> {
            self.0.lock().unwrap().clone()
        }
        fn load_extension(&self, path: &Path) -> Result<(), LoadError> {
            Err(LoadError {
                path: path.to_path_buf(),
                reason: "not supported".into(),
            })
        }
    }

    fn ext(name: &str, version: &str) -> InstalledExtension {
        InstalledExtension {
            name: name.to_string(),
            version: version.to_string(),
            file_path: PathBuf::from(format!("/plugins/{}.so", name)),
        }
    }

    #[test]
    fn exact_case_sensitive_match() {
        let host = Arc::new(ListHost(Mutex::new(vec![ext("Attachment Tool", "1.0")])));
        let index = InstalledExtensionIndex::new(host);
        assert!(index.find_by_name("Attachment Tool").is_some());
        assert!(index.find_by_name("attachment tool").is_none());
        assert!(index.find_by_name("Attachment").is_none());
    }

    #[test]
    fn lookup_is_never_cached() {
        let host = Arc::new(ListHost(Mutex::new(vec![])));
        let index = InstalledExtensionIndex::new(host.clone());
        assert!(index.find_by_name("Late").is_none());

        host.0.lock().unwrap().push(ext("Late", "2.0"));
        assert_eq!(index.find_by_name("Late").unwrap().version, "2.0");
    }

    #[test]
    fn empty_version_is_absent() {
        assert_eq!(ext("a", "").parsed_version(), None);
        assert_eq!(
            ext("a", "1.2.3").parsed_version(),
            Some(Version::new(1, 2, 3, ""))
        );
    }
}
