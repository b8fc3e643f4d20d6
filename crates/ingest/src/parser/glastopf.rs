//! 웹 공격 에뮬레이터(Glastopf) 파서
//!
//! Glastopf 원본 형식(`source: [ip, port]`, `request_url`, `request_raw`)과
//! 요청을 직접 밀어 넣는 웹 트랩 형식(`ip`, `method`, `url`, `headers`, `body`)을 모두 받습니다.
//! 요청 본문에 자격 증명이 있으면 로그인 시도, 그 외에는 `other`입니다.

use serde_json::{Map, Value};
use trapwire_core::error::ParseError;
use trapwire_core::event::SecurityEvent;
use trapwire_core::pipeline::SourceParser;
use trapwire_core::types::{Credentials, EventKind, Indicator, SourceSystem};

use super::{field, ip_field, is_suspicious_username, port_field, str_field, timestamp_field};

/// 웹 트랩 기본 리스닝 포트
const DEFAULT_DESTINATION_PORT: u16 = 80;

/// 관리/쉘 경로 패턴
pub const SENSITIVE_PATHS: &[&str] = &["/admin", "/config", "/login", "/shell", "/cmd"];

/// 알려진 스캐너 User-Agent 조각
pub const SCANNER_USER_AGENTS: &[&str] = &["sqlmap", "nikto", "nessus", "nmap", "masscan", "zgrab"];

const USERNAME_KEYS: &[&str] = &["username", "user", "login"];
const PASSWORD_KEYS: &[&str] = &["password", "pass", "passwd"];

/// URL이 민감한 경로를 건드리는지 확인합니다.
pub fn is_sensitive_path(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    SENSITIVE_PATHS.iter().any(|p| lower.contains(p))
}

/// User-Agent가 알려진 스캐너인지 확인합니다.
pub fn is_scanner_user_agent(user_agent: &str) -> bool {
    let lower = user_agent.to_ascii_lowercase();
    SCANNER_USER_AGENTS.iter().any(|s| lower.contains(s))
}

/// Glastopf 파서
pub struct GlastopfParser {
    default_destination_port: u16,
}

impl GlastopfParser {
    pub fn new() -> Self {
        Self {
            default_destination_port: DEFAULT_DESTINATION_PORT,
        }
    }

    /// 레코드에 목적지 포트가 없을 때 사용할 포트를 설정합니다.
    pub fn with_default_destination_port(mut self, port: u16) -> Self {
        self.default_destination_port = port;
        self
    }
}

impl Default for GlastopfParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `request_raw`의 요청 라인 (`GET /path HTTP/1.1`)
fn request_line(record: &Value) -> Option<(String, String)> {
    let raw = str_field(record, &["request_raw"])?;
    let line = raw.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_owned();
    let url = parts.next()?.to_owned();
    Some((method, url))
}

/// 헤더 객체 또는 `request_raw`에서 User-Agent를 찾습니다 (대소문자 무시).
fn user_agent(record: &Value) -> Option<String> {
    if let Some(Value::Object(headers)) = field(record, &["headers", "request_headers"]) {
        let found = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .and_then(|(_, v)| v.as_str());
        if let Some(ua) = found {
            return Some(ua.to_owned());
        }
    }
    if let Some(ua) = str_field(record, &["user_agent", "useragent"]) {
        return Some(ua);
    }
    let raw = str_field(record, &["request_raw"])?;
    raw.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("user-agent")
            .then(|| value.trim().to_owned())
    })
}

/// 요청 본문에서 자격 증명을 추출합니다.
///
/// JSON 객체 본문과 `application/x-www-form-urlencoded` 문자열 본문을 지원합니다.
fn body_credentials(record: &Value) -> (Option<String>, Option<String>) {
    match field(record, &["body", "request_body"]) {
        Some(Value::Object(body)) => (
            lookup(body, USERNAME_KEYS),
            lookup(body, PASSWORD_KEYS),
        ),
        Some(Value::String(form)) => {
            let pairs: Vec<(&str, &str)> = form
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .collect();
            let find = |keys: &[&str]| {
                pairs
                    .iter()
                    .find(|(k, _)| keys.contains(k))
                    .map(|(_, v)| (*v).to_owned())
            };
            (find(USERNAME_KEYS), find(PASSWORD_KEYS))
        }
        _ => (None, None),
    }
}

fn lookup(body: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| body.get(*k))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

impl SourceParser for GlastopfParser {
    fn source(&self) -> SourceSystem {
        SourceSystem::Glastopf
    }

    fn parse_record(&self, record: &Value) -> Result<Option<SecurityEvent>, ParseError> {
        let source = self.source();
        if !record.is_object() {
            return Err(ParseError::Malformed {
                source_system: source.to_string(),
                reason: "record is not a JSON object".to_owned(),
            });
        }

        let timestamp = timestamp_field(source, record, &["timestamp", "time"])?;
        let source_ip = ip_field(source, record, &["source.0", "ip", "src_ip", "remote_addr"])?;
        let source_port =
            port_field(source, record, &["source.1", "src_port", "remote_port"])?.unwrap_or(0);
        let destination_port = port_field(source, record, &["dst_port", "local_port"])?
            .unwrap_or(self.default_destination_port);

        let from_raw = request_line(record);
        let method = str_field(record, &["method", "request_method"])
            .or_else(|| from_raw.as_ref().map(|(m, _)| m.clone()));
        let url = str_field(record, &["url", "request_url", "path"])
            .or_else(|| from_raw.as_ref().map(|(_, u)| u.clone()));

        let (username, password) = body_credentials(record);
        let kind = if username.is_some() || password.is_some() {
            EventKind::LoginAttempt
        } else {
            EventKind::Other
        };

        let mut event = SecurityEvent::new(
            timestamp,
            source,
            source_ip,
            source_port,
            destination_port,
            kind,
            record.clone(),
        );
        event.sensor = str_field(record, &["sensor"]);
        event.raw_input = match (&method, &url) {
            (Some(m), Some(u)) => Some(format!("{m} {u}")),
            (None, Some(u)) => Some(u.clone()),
            _ => None,
        };

        if url.as_deref().is_some_and(is_sensitive_path) {
            event.indicators.insert(Indicator::SensitivePath);
        }
        if user_agent(record).as_deref().is_some_and(is_scanner_user_agent) {
            event.indicators.insert(Indicator::ScannerUserAgent);
        }
        if username.as_deref().is_some_and(is_suspicious_username) {
            event.indicators.insert(Indicator::SuspiciousUsername);
        }
        event.credentials = Credentials::from_parts(username, password);

        Ok(Some(event))
    }
}
