//! SSH/Telnet 에뮬레이터(Cowrie) 파서
//!
//! Cowrie의 JSON 라인 로그를 정규화 이벤트로 변환합니다.
//! `eventid`로 이벤트 종류를 결정하며, 매핑되지 않은 eventid는 "이 라인 아님"으로 처리합니다.
//!
//! # 예시 입력
//! ```text
//! {"eventid":"cowrie.login","timestamp":1700000000,"src_ip":"203.0.113.5","src_port":51515,"dst_port":22,"username":"root","password":"toor"}
//! ```

use serde_json::Value;
use trapwire_core::error::ParseError;
use trapwire_core::event::SecurityEvent;
use trapwire_core::pipeline::SourceParser;
use trapwire_core::types::{Credentials, EventKind, Indicator, SourceSystem};

use super::{
    field_error, first_token, ip_field, is_risky_command, is_suspicious_username, port_field,
    str_field, timestamp_field,
};

/// Cowrie 기본 리스닝 포트
const DEFAULT_DESTINATION_PORT: u16 = 22;

/// eventid를 이벤트 종류로 매핑합니다.
fn event_kind(eventid: &str) -> Option<EventKind> {
    match eventid {
        "cowrie.login" | "cowrie.login.success" | "cowrie.login.failed" => {
            Some(EventKind::LoginAttempt)
        }
        "cowrie.command" | "cowrie.command.input" | "cowrie.command.failed" => {
            Some(EventKind::CommandExecution)
        }
        "cowrie.session"
        | "cowrie.session.connect"
        | "cowrie.session.closed"
        | "cowrie.direct-tcpip"
        | "cowrie.client.version" => Some(EventKind::Connection),
        "cowrie.session.file_download" | "cowrie.session.file_upload" => Some(EventKind::Download),
        _ => None,
    }
}

/// Cowrie 파서
pub struct CowrieParser {
    default_destination_port: u16,
}

impl CowrieParser {
    pub fn new() -> Self {
        Self {
            default_destination_port: DEFAULT_DESTINATION_PORT,
        }
    }

    /// 레코드에 `dst_port`가 없을 때 사용할 포트를 설정합니다.
    pub fn with_default_destination_port(mut self, port: u16) -> Self {
        self.default_destination_port = port;
        self
    }
}

impl Default for CowrieParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for CowrieParser {
    fn source(&self) -> SourceSystem {
        SourceSystem::Cowrie
    }

    fn parse_record(&self, record: &Value) -> Result<Option<SecurityEvent>, ParseError> {
        let source = self.source();
        if !record.is_object() {
            return Err(ParseError::Malformed {
                source_system: source.to_string(),
                reason: "record is not a JSON object".to_owned(),
            });
        }

        let eventid = match record.get("eventid") {
            Some(Value::String(id)) => id.as_str(),
            Some(other) => {
                return Err(field_error(source, "eventid", format!("expected string, got {other}")));
            }
            None => return Err(field_error(source, "eventid", "missing")),
        };
        let Some(kind) = event_kind(eventid) else {
            return Ok(None);
        };

        let timestamp = timestamp_field(source, record, &["timestamp"])?;
        let source_ip = ip_field(source, record, &["src_ip"])?;
        // 로그인/명령 이벤트는 포트를 기록하지 않는 경우가 있다
        let source_port = port_field(source, record, &["src_port"])?.unwrap_or(0);
        let destination_port =
            port_field(source, record, &["dst_port"])?.unwrap_or(self.default_destination_port);

        let mut event = SecurityEvent::new(
            timestamp,
            source,
            source_ip,
            source_port,
            destination_port,
            kind,
            record.clone(),
        );
        event.session_id = str_field(record, &["session"]);
        event.sensor = str_field(record, &["sensor"]);

        match kind {
            EventKind::LoginAttempt => {
                let username = str_field(record, &["username"]);
                if username.as_deref().is_some_and(is_suspicious_username) {
                    event.indicators.insert(Indicator::SuspiciousUsername);
                }
                event.credentials =
                    Credentials::from_parts(username, str_field(record, &["password"]));
            }
            EventKind::CommandExecution => {
                if let Some(input) = str_field(record, &["input"]) {
                    event.command = first_token(&input);
                    event.raw_input = Some(input);
                }
                if event.command.as_deref().is_some_and(is_risky_command) {
                    event.indicators.insert(Indicator::RiskyCommand);
                }
            }
            EventKind::Download => {
                event.raw_input = str_field(record, &["url", "outfile", "filename"]);
                event.indicators.insert(Indicator::MalwareDownload);
            }
            EventKind::Connection | EventKind::Other => {}
        }

        Ok(Some(event))
    }
}
