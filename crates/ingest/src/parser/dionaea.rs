//! 악성코드 수집 서비스(Dionaea) 파서
//!
//! Dionaea JSON 로그는 버전과 ihandler 설정에 따라 필드 이름이 다릅니다.
//! 알려진 이름을 순서대로 시도합니다.
//!
//! | 항목 | 후보 필드 |
//! |---|---|
//! | 출발지 IP | `src_ip`, `remote_host` |
//! | 출발지 포트 | `src_port`, `remote_port` |
//! | 목적지 포트 | `dst_port`, `local_port` |
//! | 종류 | `type`, `connection.type`, `eventid` |

use serde_json::Value;
use trapwire_core::error::ParseError;
use trapwire_core::event::SecurityEvent;
use trapwire_core::pipeline::SourceParser;
use trapwire_core::types::{Credentials, EventKind, Indicator, SourceSystem};

use super::{
    field, field_error, ip_field, is_suspicious_username, port_field, str_field, timestamp_field,
};

/// 종류 필드 문자열을 이벤트 종류로 매핑합니다.
fn event_kind(kind: &str, has_username: bool) -> EventKind {
    let kind = kind.to_ascii_lowercase();
    if kind.starts_with("download") || kind == "offer" {
        EventKind::Download
    } else if kind == "login" || has_username {
        EventKind::LoginAttempt
    } else if matches!(kind.as_str(), "connection" | "accept" | "connect" | "reject") {
        EventKind::Connection
    } else {
        EventKind::Other
    }
}

/// 문자열 또는 문자열 배열의 첫 요소
fn first_string(record: &Value, names: &[&str]) -> Option<String> {
    match field(record, names)? {
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_owned)),
        _ => str_field(record, names),
    }
}

/// Dionaea 파서
#[derive(Default)]
pub struct DionaeaParser {
    default_destination_port: Option<u16>,
}

impl DionaeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 레코드에 목적지 포트가 없을 때 사용할 포트를 설정합니다.
    ///
    /// 설정하지 않으면 목적지 포트가 없는 레코드는 손상된 것으로 처리합니다.
    pub fn with_default_destination_port(mut self, port: u16) -> Self {
        self.default_destination_port = Some(port);
        self
    }
}

impl SourceParser for DionaeaParser {
    fn source(&self) -> SourceSystem {
        SourceSystem::Dionaea
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
        let source_ip = ip_field(source, record, &["src_ip", "remote_host"])?;
        let source_port = port_field(source, record, &["src_port", "remote_port"])?.unwrap_or(0);
        let destination_port = port_field(source, record, &["dst_port", "local_port"])?
            .or(self.default_destination_port)
            .ok_or_else(|| field_error(source, "dst_port", "missing"))?;

        let username = first_string(record, &["username", "credentials.username"]);
        let password = first_string(record, &["password", "credentials.password"]);
        // 종류 필드가 없으면 연결 이벤트로 본다
        let kind_str = str_field(record, &["type", "connection.type", "eventid"])
            .unwrap_or_else(|| "connection".to_owned());
        let kind = event_kind(&kind_str, username.is_some());

        let mut event = SecurityEvent::new(
            timestamp,
            source,
            source_ip,
            source_port,
            destination_port,
            kind,
            record.clone(),
        );
        event.session_id = str_field(record, &["session", "connection.id"]);
        event.sensor = str_field(record, &["sensor", "hostname"]);

        match kind {
            EventKind::Download => {
                event.raw_input = str_field(record, &["url", "download_url", "downloads.0.url"]);
                event.indicators.insert(Indicator::MalwareDownload);
            }
            EventKind::LoginAttempt => {
                if username.as_deref().is_some_and(is_suspicious_username) {
                    event.indicators.insert(Indicator::SuspiciousUsername);
                }
                event.credentials = Credentials::from_parts(username, password);
            }
            EventKind::Connection | EventKind::CommandExecution | EventKind::Other => {}
        }

        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trapwire_core::types::Protocol;

    fn parse(line: &str) -> Result<Option<SecurityEvent>, ParseError> {
        DionaeaParser::new().parse(line)
    }

    #[test]
    fn parses_connection_with_remote_host_aliases() {
        let line = r#"{"timestamp":1700000000,"remote_host":"198.51.100.20","remote_port":4455,"local_port":445,"connection":{"type":"accept","protocol":"smbd"}}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.source_system, SourceSystem::Dionaea);
        assert_eq!(event.event_kind, EventKind::Connection);
        assert_eq!(event.source_port, 4455);
        assert_eq!(event.destination_port, 445);
        assert_eq!(event.protocol, Protocol::Other);
    }

    #[test]
    fn missing_type_defaults_to_connection() {
        let line = r#"{"timestamp":"2024-01-15T12:00:00","src_ip":"198.51.100.20","src_port":1,"dst_port":80}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.event_kind, EventKind::Connection);
        assert_eq!(event.protocol, Protocol::Http);
    }

    #[test]
    fn download_sets_indicator_and_url() {
        let line = r#"{"timestamp":1700000000,"src_ip":"198.51.100.20","src_port":1,"dst_port":445,"type":"download_complete","url":"http://203.0.113.9/mal.exe"}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.event_kind, EventKind::Download);
        assert_eq!(event.raw_input.as_deref(), Some("http://203.0.113.9/mal.exe"));
        assert!(event.indicators.contains(&Indicator::MalwareDownload));
    }

    #[test]
    fn offer_with_download_list() {
        let line = r#"{"timestamp":1700000000,"src_ip":"198.51.100.20","dst_port":445,"type":"offer","downloads":[{"url":"ftp://203.0.113.9/a"}]}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.event_kind, EventKind::Download);
        assert_eq!(event.raw_input.as_deref(), Some("ftp://203.0.113.9/a"));
    }

    #[test]
    fn credentials_make_login_attempt() {
        let line = r#"{"timestamp":1700000000,"src_ip":"198.51.100.20","dst_port":1433,"connection":{"type":"accept"},"credentials":{"username":["sa","admin"],"password":["123"]}}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.event_kind, EventKind::LoginAttempt);
        let creds = event.credentials.unwrap();
        assert_eq!(creds.username.as_deref(), Some("sa"));
        assert_eq!(creds.password.as_deref(), Some("123"));
        assert!(!event.indicators.contains(&Indicator::SuspiciousUsername));
    }

    #[test]
    fn unknown_type_is_other() {
        let line = r#"{"timestamp":1700000000,"src_ip":"198.51.100.20","dst_port":5060,"type":"sip_invite"}"#;
        let event = parse(line).unwrap().unwrap();
        assert_eq!(event.event_kind, EventKind::Other);
    }

    #[test]
    fn missing_destination_port_needs_default() {
        let line = r#"{"timestamp":1700000000,"src_ip":"198.51.100.20","type":"connect"}"#;
        assert!(parse(line).is_err());

        let parser = DionaeaParser::new().with_default_destination_port(445);
        let event = parser.parse(line).unwrap().unwrap();
        assert_eq!(event.destination_port, 445);
    }

    #[test]
    fn missing_timestamp_is_malformed() {
        let line = r#"{"src_ip":"198.51.100.20","dst_port":445}"#;
        let err = parse(line).unwrap_err();
        assert!(err.to_string().contains("timestamp"));
    }
}
