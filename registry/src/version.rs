//! 익스텐션 버전 파싱/비교 (`major.minor.micro[extra]`)
//!
//! 카탈로그와 호스트가 보고하는 버전 문자열은 형식이 느슨하므로
//! 파싱은 절대 실패하지 않고, 없는 구성요소는 0 / 빈 문자열로 채웁니다.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 파싱된 버전 — `extra`는 세 번째 숫자 바로 뒤에 붙은 비숫자 텍스트
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub extra: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, micro: u64, extra: &str) -> Self {
        Self {
            major,
            minor,
            micro,
            extra: extra.to_string(),
        }
    }

    /// "1.2.3beta", "2", "" 등 어떤 입력도 받아들인다.
    ///
    /// - 선행 `v`는 무시
    /// - 숫자가 아닌 곳에서 멈추면 나머지 구성요소는 기본값
    /// - `extra`는 micro 뒤의 연속된 비숫자 문자들 ("1.2.3beta4" → "beta")
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let mut rest = s;

        let major = take_number(&mut rest);
        let mut minor = 0;
        let mut micro = 0;
        let mut extra = String::new();

        if let (Some(_), Some(after)) = (major, rest.strip_prefix('.')) {
            rest = after;
            if let Some(n) = take_number(&mut rest) {
                minor = n;
                if let Some(after) = rest.strip_prefix('.') {
                    rest = after;
                    if let Some(n) = take_number(&mut rest) {
                        micro = n;
                        extra = rest
                            .chars()
                            .take_while(|c| !c.is_ascii_digit())
                            .collect();
                    }
                }
            }
        }

        Self {
            major: major.unwrap_or(0),
            minor,
            micro,
            extra,
        }
    }

    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

/// 선행 숫자열을 읽고 커서를 전진. 숫자가 없으면 None.
/// 자릿수가 u64를 넘으면 포화시킨다.
fn take_number(rest: &mut &str) -> Option<u64> {
    let end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let value = rest[..end].bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
    });
    *rest = &rest[end..];
    Some(value)
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.micro, self.extra)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.minor.cmp(&other.minor) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.micro.cmp(&other.micro) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // 숫자가 같으면 extra를 바이트 순서로 비교 ("" < "beta")
        self.extra.as_bytes().cmp(other.extra.as_bytes())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 두 버전 비교
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

/// 한쪽이 없을 수 있는 비교.
///
/// 없는 쪽이 낮은 것으로 취급: `(None, None)` → Equal,
/// `(Some, None)` → Greater, `(None, Some)` → Less.
/// 호스트가 버전을 보고하지 않은 설치본은 카탈로그 버전보다 항상 낮게 평가되어
/// 업데이트가 제안된다.
pub fn compare_installed(a: Option<&Version>, b: Option<&Version>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (Some(a), Some(b)) => compare(a, b),
    }
}
