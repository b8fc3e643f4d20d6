//! 소스 파서 모듈 -- 트랩 서비스별 레코드를 정규화 이벤트로 변환합니다.
//!
//! [`ParserRouter`]는 감시 등록 시점에 결정된 [`SourceSystem`] 태그로 파서를 선택합니다.
//! 라인 내용이나 파일 경로를 보고 형식을 추측하지 않습니다.
//! 각 파서는 core의 [`SourceParser`] trait을 구현합니다.
//!
//! # 지원 소스
//! - SSH/Telnet 에뮬레이터 ([`CowrieParser`])
//! - 악성코드 수집 서비스 ([`DionaeaParser`])
//! - 웹 공격 에뮬레이터 ([`GlastopfParser`])
//!
//! # 사용 예시
//! ```ignore
//! use trapwire_core::types::SourceSystem;
//! use trapwire_ingest::parser::ParserRouter;
//!
//! let router = ParserRouter::new();
//! let event = router.route(SourceSystem::Cowrie, line);
//! ```

pub mod cowrie;
pub mod dionaea;
pub mod glastopf;

pub use cowrie::CowrieParser;
pub use dionaea::DionaeaParser;
pub use glastopf::GlastopfParser;

use std::net::IpAddr;

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use serde_json::Value;
use trapwire_core::error::ParseError;
use trapwire_core::event::SecurityEvent;
use trapwire_core::metrics as m;
use trapwire_core::pipeline::SourceParser;
use trapwire_core::types::SourceSystem;

/// 실행 시 위험 점수를 올리는 명령
pub const RISKY_COMMANDS: &[&str] = &[
    "wget", "curl", "chmod", "rm", "mkfs", "dd", "sh", "bash", "nc", "netcat", "tftp", "busybox",
];

/// 무차별 대입에서 흔히 노리는 계정명
pub const SUSPICIOUS_USERNAMES: &[&str] = &["root", "admin", "user", "test", "guest", "support"];

/// 로그에 남길 원시 라인 최대 길이
const LOG_LINE_PREVIEW: usize = 256;

/// 기본 최대 입력 크기 (바이트)
const DEFAULT_MAX_INPUT_SIZE: usize = 64 * 1024;

/// 파서 라우터 -- 소스 시스템 태그로 파서를 선택하고 모든 실패를 경계 안에 가둡니다.
pub struct ParserRouter {
    cowrie: CowrieParser,
    dionaea: DionaeaParser,
    glastopf: GlastopfParser,
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
}

impl ParserRouter {
    /// 기본 설정의 파서 세트로 라우터를 생성합니다.
    pub fn new() -> Self {
        Self {
            cowrie: CowrieParser::new(),
            dionaea: DionaeaParser::new(),
            glastopf: GlastopfParser::new(),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    /// 레코드에 목적지 포트가 없을 때 사용할 소스별 기본값을 설정합니다.
    pub fn with_destination_port(mut self, source: SourceSystem, port: u16) -> Self {
        match source {
            SourceSystem::Cowrie => self.cowrie = self.cowrie.with_default_destination_port(port),
            SourceSystem::Dionaea => {
                self.dionaea = self.dionaea.with_default_destination_port(port)
            }
            SourceSystem::Glastopf => {
                self.glastopf = self.glastopf.with_default_destination_port(port)
            }
        }
        self
    }

    /// 소스 시스템에 대응하는 파서를 반환합니다.
    pub fn parser(&self, source: SourceSystem) -> &dyn SourceParser {
        match source {
            SourceSystem::Cowrie => &self.cowrie,
            SourceSystem::Dionaea => &self.dionaea,
            SourceSystem::Glastopf => &self.glastopf,
        }
    }

    /// 크기 제한을 적용한 뒤 파서 결과를 그대로 반환합니다.
    pub fn parse_line(
        &self,
        source: SourceSystem,
        line: &str,
    ) -> Result<Option<SecurityEvent>, ParseError> {
        if line.len() > self.max_input_size {
            return Err(ParseError::TooLarge {
                size: line.len(),
                max: self.max_input_size,
            });
        }
        self.parser(source).parse(line)
    }

    /// 원시 라인 하나를 처리합니다.
    ///
    /// 손상된 라인은 원문과 함께 로그로 남기고 `None`을 반환합니다.
    /// 어떤 입력도 이 경계를 넘어 에러를 전파하지 않습니다.
    pub fn route(&self, source: SourceSystem, line: &str) -> Option<SecurityEvent> {
        let outcome = self.parse_line(source, line);
        self.contain(source, outcome, || preview(line))
    }

    /// 이미 디코딩된 레코드 하나를 처리합니다 (`submit` 경로).
    pub fn route_record(&self, source: SourceSystem, record: &Value) -> Option<SecurityEvent> {
        let outcome = self.parser(source).parse_record(record);
        self.contain(source, outcome, || preview(&record.to_string()))
    }

    fn contain(
        &self,
        source: SourceSystem,
        outcome: Result<Option<SecurityEvent>, ParseError>,
        raw: impl FnOnce() -> String,
    ) -> Option<SecurityEvent> {
        match outcome {
            Ok(Some(event)) => {
                counter!(m::INGEST_EVENTS_PARSED_TOTAL, m::LABEL_SOURCE => source.as_str())
                    .increment(1);
                Some(event)
            }
            Ok(None) => {
                counter!(m::INGEST_LINES_IGNORED_TOTAL, m::LABEL_SOURCE => source.as_str())
                    .increment(1);
                tracing::trace!(source = %source, "record has no mapped event kind, skipping");
                None
            }
            Err(e) => {
                counter!(m::INGEST_PARSE_ERRORS_TOTAL, m::LABEL_SOURCE => source.as_str())
                    .increment(1);
                let raw = raw();
                tracing::warn!(source = %source, error = %e, line = %raw, "dropping malformed line");
                None
            }
        }
    }
}

impl Default for ParserRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// 로그용으로 라인을 자릅니다 (UTF-8 경계 보존).
fn preview(line: &str) -> String {
    if line.len() <= LOG_LINE_PREVIEW {
        return line.to_owned();
    }
    let mut end = LOG_LINE_PREVIEW;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

// --- 파서 공용 필드 추출 헬퍼 ---

/// 후보 이름 중 처음으로 존재하고 null이 아닌 필드를 찾습니다.
///
/// dot notation을 지원합니다 (예: "connection.type", 배열은 "downloads.0.url").
pub(crate) fn field<'a>(record: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        let mut current = record;
        for part in name.split('.') {
            current = match part.parse::<usize>() {
                Ok(idx) if current.is_array() => current.get(idx)?,
                _ => current.get(part)?,
            };
        }
        (!current.is_null()).then_some(current)
    })
}

/// 문자열 필드를 추출합니다. 숫자와 불리언은 문자열로 변환합니다.
pub(crate) fn str_field(record: &Value, names: &[&str]) -> Option<String> {
    match field(record, names)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 포트 필드를 추출합니다. 숫자 또는 숫자 문자열을 허용합니다.
pub(crate) fn port_field(
    source: SourceSystem,
    record: &Value,
    names: &[&str],
) -> Result<Option<u16>, ParseError> {
    let Some(value) = field(record, names) else {
        return Ok(None);
    };
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.map(Some)
        .ok_or_else(|| field_error(source, names[0], format!("invalid port value {value}")))
}

/// 필수 IP 필드를 추출합니다.
pub(crate) fn ip_field(
    source: SourceSystem,
    record: &Value,
    names: &[&str],
) -> Result<IpAddr, ParseError> {
    let raw = str_field(record, names).ok_or_else(|| field_error(source, names[0], "missing"))?;
    raw.trim()
        .parse::<IpAddr>()
        .map_err(|e| field_error(source, names[0], format!("'{raw}': {e}")))
}

/// 필수 타임스탬프 필드를 추출합니다.
///
/// 허용 형식: epoch 초 (정수/실수, 숫자 문자열 포함), RFC 3339,
/// 시간대 없는 ISO 8601 (UTC로 간주).
pub(crate) fn timestamp_field(
    source: SourceSystem,
    record: &Value,
    names: &[&str],
) -> Result<DateTime<Utc>, ParseError> {
    let value = field(record, names).ok_or_else(|| field_error(source, names[0], "missing"))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch_secs),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    };
    parsed.ok_or_else(|| field_error(source, names[0], format!("unrecognized timestamp {value}")))
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    // i64 범위를 벗어나면 캐스트가 포화되므로 먼저 거른다
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<f64>().ok().and_then(from_epoch_secs)
}

pub(crate) fn field_error(
    source: SourceSystem,
    field: &str,
    reason: impl Into<String>,
) -> ParseError {
    ParseError::Field {
        source_system: source.to_string(),
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 입력 문자열의 첫 토큰 (명령 이름)
pub(crate) fn first_token(input: &str) -> Option<String> {
    input.split_whitespace().next().map(str::to_owned)
}

/// 명령이 위험 명령 목록에 포함되는지 확인합니다.
///
/// 경로가 붙은 명령(`/bin/busybox`)은 파일 이름으로 비교합니다.
pub fn is_risky_command(command: &str) -> bool {
    let name = command.rsplit('/').next().unwrap_or(command);
    RISKY_COMMANDS
        .iter()
        .any(|risky| risky.eq_ignore_ascii_case(name))
}

/// 계정명이 흔히 노리는 계정인지 확인합니다.
pub fn is_suspicious_username(username: &str) -> bool {
    SUSPICIOUS_USERNAMES
        .iter()
        .any(|u| u.eq_ignore_ascii_case(username.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn router_dispatches_by_source_tag() {
        let router = ParserRouter::new();
        for source in SourceSystem::ALL {
            assert_eq!(router.parser(source).source(), source);
        }
    }

    #[test]
    fn route_contains_malformed_input() {
        let router = ParserRouter::new();
        assert!(router.route(SourceSystem::Cowrie, "{not json").is_none());
        assert!(router.route(SourceSystem::Dionaea, "[]").is_none());
        assert!(router.route(SourceSystem::Glastopf, "").is_none());
    }

    #[test]
    fn oversized_line_is_rejected() {
        let router = ParserRouter::new().with_max_input_size(16);
        let line = r#"{"eventid":"cowrie.login","src_ip":"203.0.113.5"}"#;
        let err = router.parse_line(SourceSystem::Cowrie, line).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { max: 16, .. }));
        assert!(router.route(SourceSystem::Cowrie, line).is_none());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let line = "가".repeat(200);
        let out = preview(&line);
        assert!(out.ends_with("..."));
        assert!(out.len() <= LOG_LINE_PREVIEW + 3);
    }

    #[test]
    fn field_supports_fallback_and_dot_notation() {
        let record = json!({"remote_host": "198.51.100.1", "connection": {"type": "accept"}});
        assert_eq!(
            str_field(&record, &["src_ip", "remote_host"]).as_deref(),
            Some("198.51.100.1")
        );
        assert_eq!(
            str_field(&record, &["type", "connection.type"]).as_deref(),
            Some("accept")
        );
        assert!(field(&record, &["missing"]).is_none());
    }

    #[test]
    fn field_skips_null_values() {
        let record = json!({"src_ip": null, "remote_host": "198.51.100.1"});
        assert_eq!(
            str_field(&record, &["src_ip", "remote_host"]).as_deref(),
            Some("198.51.100.1")
        );
    }

    #[test]
    fn port_field_accepts_numbers_and_strings() {
        let record = json!({"a": 22, "b": "8080", "c": 70000, "d": "x"});
        let src = SourceSystem::Dionaea;
        assert_eq!(port_field(src, &record, &["a"]).unwrap(), Some(22));
        assert_eq!(port_field(src, &record, &["b"]).unwrap(), Some(8080));
        assert!(port_field(src, &record, &["c"]).is_err());
        assert!(port_field(src, &record, &["d"]).is_err());
        assert_eq!(port_field(src, &record, &["missing"]).unwrap(), None);
    }

    #[test]
    fn timestamp_formats() {
        let src = SourceSystem::Cowrie;
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let epoch = json!({"timestamp": 1_700_000_000});
        assert_eq!(timestamp_field(src, &epoch, &["timestamp"]).unwrap(), expected);

        let rfc = json!({"timestamp": "2023-11-14T22:13:20Z"});
        assert_eq!(timestamp_field(src, &rfc, &["timestamp"]).unwrap(), expected);

        let naive = json!({"timestamp": "2023-11-14 22:13:20"});
        assert_eq!(timestamp_field(src, &naive, &["timestamp"]).unwrap(), expected);

        let float = json!({"timestamp": 1_700_000_000.5});
        let parsed = timestamp_field(src, &float, &["timestamp"]).unwrap();
        assert_eq!(parsed.timestamp(), 1_700_000_000);
        assert_eq!(parsed.timestamp_subsec_millis(), 500);

        let bad = json!({"timestamp": "yesterday"});
        assert!(timestamp_field(src, &bad, &["timestamp"]).is_err());
        assert!(timestamp_field(src, &json!({}), &["timestamp"]).is_err());
    }

    #[test]
    fn risky_command_matching() {
        assert!(is_risky_command("wget"));
        assert!(is_risky_command("/bin/busybox"));
        assert!(is_risky_command("CURL"));
        assert!(!is_risky_command("ls"));
        assert!(!is_risky_command("wgetx"));
    }

    #[test]
    fn suspicious_username_matching() {
        assert!(is_suspicious_username("root"));
        assert!(is_suspicious_username("Admin"));
        assert!(!is_suspicious_username("alice"));
    }

    #[test]
    fn first_token_extraction() {
        assert_eq!(first_token("  wget http://x/y ").as_deref(), Some("wget"));
        assert_eq!(first_token("   "), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::net::Ipv4Addr;
        use trapwire_core::types::Protocol;

        proptest! {
            #[test]
            fn arbitrary_text_never_escapes_router(line in ".{0,512}") {
                let router = ParserRouter::new();
                for source in SourceSystem::ALL {
                    let _ = router.route(source, &line);
                }
            }

            #[test]
            fn truncated_valid_line_is_contained(cut in 0usize..120) {
                let line = r#"{"eventid":"cowrie.login","timestamp":1700000000,"src_ip":"203.0.113.5","src_port":51515,"dst_port":22,"username":"root"}"#;
                let cut = cut.min(line.len());
                let router = ParserRouter::new();
                let _ = router.route(SourceSystem::Cowrie, &line[..cut]);
            }

            #[test]
            fn arbitrary_json_objects_never_escape_router(
                keys in prop::collection::vec("[a-z_.]{1,12}", 0..8),
                values in prop::collection::vec(any::<i64>(), 0..8),
            ) {
                let record: serde_json::Map<String, Value> = keys
                    .into_iter()
                    .zip(values)
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect();
                let record = Value::Object(record);
                let router = ParserRouter::new();
                for source in SourceSystem::ALL {
                    let _ = router.route_record(source, &record);
                }
            }

            #[test]
            fn valid_cowrie_login_sets_mandatory_fields(
                octets in any::<[u8; 4]>(),
                src_port in any::<u16>(),
                dst_port in 1u16..,
                ts in 0i64..4_000_000_000,
            ) {
                let ip = Ipv4Addr::from(octets);
                let line = json!({
                    "eventid": "cowrie.login.failed",
                    "timestamp": ts,
                    "src_ip": ip.to_string(),
                    "src_port": src_port,
                    "dst_port": dst_port,
                    "username": "admin",
                    "password": "x"
                })
                .to_string();

                let event = ParserRouter::new().route(SourceSystem::Cowrie, &line);
                prop_assert!(event.is_some());
                let event = event.unwrap();
                prop_assert_eq!(event.source_ip.to_string(), ip.to_string());
                prop_assert_eq!(event.source_port, src_port);
                prop_assert_eq!(event.destination_port, dst_port);
                prop_assert_eq!(event.protocol, Protocol::from_port(dst_port));
                prop_assert_eq!(event.timestamp.timestamp(), ts);
                prop_assert!(event.credentials.is_some());
            }
        }
    }
}
