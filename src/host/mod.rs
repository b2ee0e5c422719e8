//! 동적 라이브러리 기반 익스텐션 호스트
//!
//! 익스텐션 모듈은 다음 심볼을 export 해야 합니다:
//! ```c
//! typedef struct { const char *name; const char *version; } PluginInfo;
//! const PluginInfo *plugin_info(void);
//! ```
//! 로드된 라이브러리 핸들은 프로세스가 끝날 때까지 유지합니다.

use std::ffi::{c_char, CStr};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use libloading::Library;
use plugin_registry_lib::{ExtensionHost, InstalledExtension, LoadError, ProxySettings};

/// 모듈이 돌려주는 메타데이터
#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub version: *const c_char,
}

/// `plugin_info` 심볼 시그니처
pub type PluginInfoEntry = unsafe extern "C" fn() -> *const PluginInfo;

const INFO_SYMBOL: &[u8] = b"plugin_info\0";

struct LoadedModule {
    info: InstalledExtension,
    library: Library,
}

pub struct DylibHost {
    modules: Mutex<Vec<LoadedModule>>,
    /// 같은 이름의 새 모듈로 대체된 라이브러리 (언로드하지 않음)
    retired: Mutex<Vec<Library>>,
    proxy: ProxySettings,
    update_check: Mutex<Option<(String, String)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DylibHost {
    pub fn new(proxy: ProxySettings) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            proxy,
            update_check: Mutex::new(None),
        }
    }

    /// 디렉터리의 `*.{suffix}` 파일을 모두 로드. 로드한 개수 반환
    pub fn load_dir(&self, dir: &Path, suffix: &str) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::debug!("[Host] Extension dir {} not readable: {}", dir.display(), e);
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|x| x.to_str()) == Some(suffix))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_extension(&path) {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!("[Host] Skipping {}: {}", path.display(), e),
            }
        }
        tracing::info!("[Host] Loaded {} extension(s) from {}", loaded, dir.display());
        loaded
    }

    /// 업데이트 알림 협력자에게 등록된 URL
    pub fn update_check(&self) -> Option<(String, String)> {
        lock(&self.update_check).clone()
    }

    fn read_info(library: &Library, path: &Path) -> Result<(String, String), LoadError> {
        let reject = |reason: String| LoadError {
            path: path.to_path_buf(),
            reason,
        };

        let entry = unsafe { library.get::<PluginInfoEntry>(INFO_SYMBOL) }
            .map_err(|e| reject(format!("missing plugin_info: {}", e)))?;
        let info = unsafe { entry() };
        if info.is_null() {
            return Err(reject("plugin_info returned null".into()));
        }

        let (name, version) = unsafe {
            let info = &*info;
            (c_string(info.name), c_string(info.version))
        };
        match name {
            Some(name) if !name.is_empty() => Ok((name, version.unwrap_or_default())),
            _ => Err(reject("plugin_info has no name".into())),
        }
    }
}

/// null 이면 None
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

impl ExtensionHost for DylibHost {
    fn loaded_extensions(&self) -> Vec<InstalledExtension> {
        lock(&self.modules).iter().map(|m| m.info.clone()).collect()
    }

    fn load_extension(&self, path: &Path) -> Result<(), LoadError> {
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (name, version) = Self::read_info(&library, path)?;
        tracing::info!("[Host] Loaded '{}' {} from {}", name, version, path.display());

        let mut modules = lock(&self.modules);
        if let Some(pos) = modules.iter().position(|m| m.info.name == name) {
            let old = modules.remove(pos);
            lock(&self.retired).push(old.library);
        }
        modules.push(LoadedModule {
            info: InstalledExtension {
                name,
                version,
                file_path: path.to_path_buf(),
            },
            library,
        });
        Ok(())
    }

    fn proxy_settings(&self) -> ProxySettings {
        self.proxy.clone()
    }

    fn extension_relocated(&self, from: &Path, to: &Path) {
        for module in lock(&self.modules).iter_mut() {
            if module.info.file_path == from {
                module.info.file_path = to.to_path_buf();
            }
        }
    }

    fn register_update_check(&self, version_url: &str, site_url: &str) {
        *lock(&self.update_check) = Some((version_url.to_string(), site_url.to_string()));
    }
}

impl fmt::Debug for DylibHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibHost")
            .field("loaded", &self.loaded_extensions())
            .finish()
    }
}
