//! 도메인 타입 - 정규화 이벤트를 구성하는 열거형과 값 타입
//!
//! 소스 시스템, 프로토콜, 이벤트 종류처럼 닫힌 집합은 모두 열거형으로 표현합니다.
//! 문자열 비교로 분기하지 않고, 수집 등록 시점에 태그가 결정됩니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// 이벤트를 생성한 트랩 서비스
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    /// SSH/Telnet 에뮬레이터
    Cowrie,
    /// 악성코드 수집 서비스
    Dionaea,
    /// 웹 공격 에뮬레이터
    #[serde(alias = "web", alias = "http")]
    Glastopf,
}

impl SourceSystem {
    /// 모든 소스 시스템
    pub const ALL: [SourceSystem; 3] = [Self::Cowrie, Self::Dionaea, Self::Glastopf];

    /// 설정 파일과 메트릭 레이블에서 사용하는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cowrie => "cowrie",
            Self::Dionaea => "dionaea",
            Self::Glastopf => "glastopf",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cowrie" | "ssh" | "telnet" => Ok(Self::Cowrie),
            "dionaea" => Ok(Self::Dionaea),
            "glastopf" | "web" | "http" => Ok(Self::Glastopf),
            other => Err(ConfigError::InvalidValue {
                field: "source".to_owned(),
                reason: format!("unknown source system '{other}'"),
            }),
        }
    }
}

/// 목적지 포트로 추정한 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Ssh,
    Telnet,
    Http,
    Https,
    Other,
}

impl Protocol {
    /// 고정 포트 테이블로 프로토콜을 결정합니다.
    pub fn from_port(port: u16) -> Self {
        match port {
            22 => Self::Ssh,
            23 => Self::Telnet,
            80 => Self::Http,
            443 => Self::Https,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Telnet => "telnet",
            Self::Http => "http",
            Self::Https => "https",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 정규화된 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoginAttempt,
    CommandExecution,
    Connection,
    Download,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginAttempt => "login_attempt",
            Self::CommandExecution => "command_execution",
            Self::Connection => "connection",
            Self::Download => "download",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 로그인 시도에 사용된 자격 증명
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    /// 두 필드 중 하나라도 있으면 `Some`을 반환합니다.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        if username.is_none() && password.is_none() {
            None
        } else {
            Some(Self { username, password })
        }
    }
}

/// 파서가 저렴하게 관찰할 수 있는 위험 신호
///
/// 파싱 단계에서 설정되고, 보강 단계에서 위험 점수로 환산됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// 위험 명령 목록에 포함된 명령 실행
    RiskyCommand,
    /// 흔히 노리는 계정명으로 로그인 시도
    SuspiciousUsername,
    /// 페이로드 다운로드 또는 업로드
    MalwareDownload,
    /// 알려진 스캐너 User-Agent
    ScannerUserAgent,
    /// 관리/쉘 경로 접근
    SensitivePath,
}

/// 지리 정보
///
/// 보강 이후에는 항상 채워지며, 조회 실패 시 [`GeoInfo::unknown`] 센티널을 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub asn: String,
    pub org: String,
}

impl GeoInfo {
    /// 알 수 없는 위치 센티널
    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_owned(),
            country_code: "XX".to_owned(),
            region: "Unknown".to_owned(),
            city: "Unknown".to_owned(),
            latitude: 0.0,
            longitude: 0.0,
            timezone: "UTC".to_owned(),
            asn: "Unknown".to_owned(),
            org: "Unknown".to_owned(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.country_code == "XX" && self.country == "Unknown"
    }
}

/// 위험 점수 (0~10)
///
/// 생성자와 역직렬화 모두 범위를 넘는 값을 상한으로 고정합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RiskScore(u8);

impl RiskScore {
    /// 점수 상한
    pub const MAX: u8 = 10;

    pub fn new(value: u32) -> Self {
        Self(value.min(u32::from(Self::MAX)) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for RiskScore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
