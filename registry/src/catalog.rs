//! 카탈로그 엔트리 정의 및 파서
//!
//! 원격 카탈로그(`registry.ini`)는 그룹 하나가 엔트리 하나인 key-file 형식입니다:
//! ```text
//! [attachment_tool]
//! name=Attachment Tool
//! name[ja]=添付ファイルツール
//! version=1.2.0
//! description=Removes attachments from messages
//! author=Example Author
//! url=https://example.com/attachment_tool
//! license=GPL-3.0
//! linux_x86_64_url=https://example.com/dl/attachment_tool.so
//! linux_x86_64_sha1sum=3f786850e387550fdab836ed7e6dc881de23001b
//! ```
//! 형식이 하나라도 어긋나면 카탈로그 전체를 거부합니다 (부분 결과 없음).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::ParseError;

/// 카탈로그 한 줄 — 엔트리 id로 식별
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: String,
    /// 카탈로그가 선언한 버전 (없으면 빈 문자열 → 0.0.0)
    pub version: String,
    pub homepage_url: Option<String>,
    pub license: Option<String>,
    /// 현재 플랫폼용 다운로드 URL. 없으면 이 클라이언트로는 설치 불가
    pub download_url: Option<String>,
    /// 현재 플랫폼용 다운로드 무결성 해시 (hex)
    pub download_checksum: Option<String>,
}

impl CatalogEntry {
    pub fn is_installable(&self) -> bool {
        self.download_url.is_some()
    }
}

/// 엔트리 id → 엔트리 (id 순 정렬)
pub type Catalog = BTreeMap<String, CatalogEntry>;

/// 실행 중인 빌드의 플랫폼 식별자 (예: "linux_x86_64")
pub fn default_platform() -> String {
    format!("{}_{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// 모듈 파일 확장자 (예: "so", "dll", "dylib")
pub fn module_suffix() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

/// 카탈로그 파서 — 플랫폼 키와 로케일 키를 해석
#[derive(Debug, Clone)]
pub struct CatalogParser {
    platform: String,
    locales: Vec<String>,
}

impl CatalogParser {
    /// `locale`이 None이면 로케일 키(`name[ja]`)는 무시하고 기본 키만 사용
    pub fn new(platform: &str, locale: Option<&str>) -> Self {
        Self {
            platform: platform.to_string(),
            locales: locale.map(locale_candidates).unwrap_or_default(),
        }
    }

    /// LC_ALL / LC_MESSAGES / LANG 순으로 로케일 결정
    pub fn from_env(platform: &str) -> Self {
        let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .find(|v| !v.is_empty() && v != "C" && v != "POSIX");
        Self::new(platform, locale.as_deref())
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn parse(&self, raw: &str) -> Result<Catalog, ParseError> {
        let groups = parse_key_file(raw)?;
        let url_key = format!("{}_url", self.platform);
        let checksum_key = format!("{}_sha1sum", self.platform);

        let mut catalog = Catalog::new();
        for group in groups {
            let entry = CatalogEntry {
                name: group
                    .localized("name", &self.locales)
                    .unwrap_or(&group.name)
                    .to_string(),
                description: group
                    .localized("description", &self.locales)
                    .unwrap_or_default()
                    .to_string(),
                author: group.get("author").unwrap_or_default().to_string(),
                version: group.get("version").unwrap_or_default().to_string(),
                homepage_url: group.non_empty("url"),
                license: group.non_empty("license"),
                download_url: group.non_empty(&url_key),
                download_checksum: group.non_empty(&checksum_key),
                id: group.name,
            };
            catalog.insert(entry.id.clone(), entry);
        }

        tracing::debug!(
            "[Catalog] Parsed {} entries for platform {}",
            catalog.len(),
            self.platform
        );
        Ok(catalog)
    }
}

/// "ll_CC.encoding@modifier" → ["ll_CC@modifier", "ll_CC", "ll@modifier", "ll"]
fn locale_candidates(locale: &str) -> Vec<String> {
    let (rest, modifier) = match locale.split_once('@') {
        Some((r, m)) => (r, Some(m)),
        None => (locale, None),
    };
    let rest = rest.split('.').next().unwrap_or(rest);
    let (lang, country) = match rest.split_once('_') {
        Some((l, c)) => (l, Some(c)),
        None => (rest, None),
    };

    let mut out = Vec::new();
    if let (Some(c), Some(m)) = (country, modifier) {
        out.push(format!("{}_{}@{}", lang, c, m));
    }
    if let Some(c) = country {
        out.push(format!("{}_{}", lang, c));
    }
    if let Some(m) = modifier {
        out.push(format!("{}@{}", lang, m));
    }
    if !lang.is_empty() {
        out.push(lang.to_string());
    }
    out
}

// ═══════════════════════════════════════════════════════════════
//  key-file 저수준 파서
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
struct Group {
    name: String,
    values: HashMap<String, String>,
}

impl Group {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).map(str::to_string)
    }

    fn localized(&self, key: &str, locales: &[String]) -> Option<&str> {
        locales
            .iter()
            .find_map(|loc| self.get(&format!("{}[{}]", key, loc)))
            .or_else(|| self.get(key))
    }
}

fn parse_key_file(raw: &str) -> Result<Vec<Group>, ParseError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut groups: Vec<Group> = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| ParseError::Syntax {
                line: line_no,
                reason: "unterminated group header".to_string(),
            })?;
            let name = name.trim();
            if name.is_empty() || name.contains(['[', ']']) {
                return Err(ParseError::Syntax {
                    line: line_no,
                    reason: format!("invalid group name '{}'", name),
                });
            }
            if !is_safe_id(name) {
                return Err(ParseError::Syntax {
                    line: line_no,
                    reason: format!("entry id '{}' is not a plain file name", name),
                });
            }
            if groups.iter().any(|g| g.name == name) {
                return Err(ParseError::Syntax {
                    line: line_no,
                    reason: format!("duplicate group '{}'", name),
                });
            }
            groups.push(Group {
                name: name.to_string(),
                values: HashMap::new(),
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ParseError::Syntax {
            line: line_no,
            reason: "expected 'key=value'".to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::Syntax {
                line: line_no,
                reason: "empty key".to_string(),
            });
        }

        let group = groups.last_mut().ok_or_else(|| ParseError::Syntax {
            line: line_no,
            reason: format!("key '{}' outside of any group", key),
        })?;
        group
            .values
            .insert(key.to_string(), unescape(value.trim()));
    }

    Ok(groups)
}

/// 엔트리 id는 설치 파일 이름이 되므로 경로 구분자/상위 경로/NUL 불가
fn is_safe_id(id: &str) -> bool {
    !id.contains(['/', '\\', '\0']) && !id.contains("..") && id != "."
}

/// key-file 이스케이프 (`\n`, `\t`, `\s`, `\\`) 해제
fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# plugin registry
[attachment_tool]
name=Attachment Tool
name[ja]=添付ファイルツール
version=1.2.0
description=Removes attachments
description[de_DE]=Entfernt Anhänge
author=Example Author
url=https://example.com/attachment_tool
license=GPL-3.0
linux_x86_64_url=https://example.com/dl/attachment_tool.so
linux_x86_64_sha1sum=3f786850e387550fdab836ed7e6dc881de23001b
windows_x86_64_url=https://example.com/dl/attachment_tool.dll

[viewer_only]
name=Viewer Only
";

    #[test]
    fn parse_entries_for_platform() {
        let parser = CatalogParser::new("linux_x86_64", None);
        let catalog = parser.parse(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 2);

        let tool = &catalog["attachment_tool"];
        assert_eq!(tool.name, "Attachment Tool");
        assert_eq!(tool.version, "1.2.0");
        assert_eq!(tool.license.as_deref(), Some("GPL-3.0"));
        assert_eq!(
            tool.download_url.as_deref(),
            Some("https://example.com/dl/attachment_tool.so")
        );
        assert!(tool.download_checksum.is_some());
        assert!(tool.is_installable());
    }

    #[test]
    fn other_platform_gets_its_own_url() {
        let parser = CatalogParser::new("windows_x86_64", None);
        let catalog = parser.parse(SAMPLE).unwrap();
        let tool = &catalog["attachment_tool"];
        assert_eq!(
            tool.download_url.as_deref(),
            Some("https://example.com/dl/attachment_tool.dll")
        );
        assert_eq!(tool.download_checksum, None);
    }

    #[test]
    fn missing_optional_fields_default() {
        let parser = CatalogParser::new("linux_x86_64", None);
        let catalog = parser.parse(SAMPLE).unwrap();
        let viewer = &catalog["viewer_only"];
        assert_eq!(viewer.version, "");
        assert_eq!(viewer.description, "");
        assert_eq!(viewer.homepage_url, None);
        assert_eq!(viewer.download_url, None);
        assert!(!viewer.is_installable());
    }

    #[test]
    fn locale_fallback_chain() {
        let parser = CatalogParser::new("linux_x86_64", Some("ja_JP.UTF-8"));
        let catalog = parser.parse(SAMPLE).unwrap();
        assert_eq!(catalog["attachment_tool"].name, "添付ファイルツール");
        // description에는 ja 키가 없으므로 기본값
        assert_eq!(catalog["attachment_tool"].description, "Removes attachments");

        let parser = CatalogParser::new("linux_x86_64", Some("de_DE@euro"));
        let catalog = parser.parse(SAMPLE).unwrap();
        assert_eq!(catalog["attachment_tool"].description, "Entfernt Anhänge");
    }

    #[test]
    fn locale_candidates_order() {
        assert_eq!(
            locale_candidates("sr_RS.UTF-8@latin"),
            vec!["sr_RS@latin", "sr_RS", "sr@latin", "sr"]
        );
        assert_eq!(locale_candidates("fr"), vec!["fr"]);
    }

    #[test]
    fn name_defaults_to_group_id() {
        let parser = CatalogParser::new("linux_x86_64", None);
        let catalog = parser.parse("[bare]\nversion=1\n").unwrap();
        assert_eq!(catalog["bare"].name, "bare");
    }

    #[test]
    fn malformed_rejects_whole_catalog() {
        let parser = CatalogParser::new("linux_x86_64", None);
        let raw = "[good]\nname=Good\n[broken\nname=x\n";
        match parser.parse(raw) {
            Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn key_outside_group_is_error() {
        let parser = CatalogParser::new("linux_x86_64", None);
        assert!(parser.parse("name=orphan\n[a]\n").is_err());
    }

    #[test]
    fn line_without_equals_is_error() {
        let parser = CatalogParser::new("linux_x86_64", None);
        assert!(parser.parse("[a]\nthis is not a pair\n").is_err());
    }

    #[test]
    fn duplicate_group_is_error() {
        let parser = CatalogParser::new("linux_x86_64", None);
        assert!(parser.parse("[a]\nname=1\n[a]\nname=2\n").is_err());
    }

    #[test]
    fn path_like_ids_reject_catalog() {
        let parser = CatalogParser::new("linux_x86_64", None);
        for id in ["../escaped", "sub/dir", "win\\dir", "..", ".", "a\0b"] {
            let raw = format!("[fine]\nname=Fine\n[{}]\nname=Bad\n", id);
            match parser.parse(&raw) {
                Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 3, "id {:?}", id),
                other => panic!("id {:?} should be rejected, got {:?}", id, other),
            }
        }
        assert!(parser.parse("[attach-tool_2.x]\nname=ok\n").is_ok());
    }

    #[test]
    fn escapes_are_decoded() {
        let parser = CatalogParser::new("linux_x86_64", None);
        let catalog = parser
            .parse("[a]\ndescription=line one\\nline two\\s\n")
            .unwrap();
        assert_eq!(catalog["a"].description, "line one\nline two ");
    }
}
