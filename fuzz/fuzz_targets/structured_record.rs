#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};
use trapwire_core::types::SourceSystem;
use trapwire_ingest::parser::ParserRouter;

/// 퍼저용 구조적 입력
///
/// 실제 필드 이름에 임의 값을 넣어 매핑 분기까지 도달하게 합니다.
#[derive(Arbitrary, Debug)]
struct FuzzRecord {
    source: u8,
    eventid: String,
    kind: String,
    timestamp: FuzzTimestamp,
    src_ip: String,
    src_port: i64,
    dst_port: i64,
    username: Option<String>,
    password: Option<String>,
    input: Option<String>,
    url: Option<String>,
    user_agent: Option<String>,
}

#[derive(Arbitrary, Debug)]
enum FuzzTimestamp {
    Epoch(i64),
    Fractional(f64),
    Text(String),
    Missing,
}

fn to_value(input: &FuzzRecord) -> Value {
    let mut record = Map::new();
    record.insert("eventid".into(), json!(input.eventid));
    record.insert("type".into(), json!(input.kind));
    record.insert("src_ip".into(), json!(input.src_ip));
    record.insert("src_port".into(), json!(input.src_port));
    record.insert("dst_port".into(), json!(input.dst_port));
    record.insert("source".into(), json!([input.src_ip, input.src_port]));
    match &input.timestamp {
        FuzzTimestamp::Epoch(secs) => {
            record.insert("timestamp".into(), json!(secs));
        }
        FuzzTimestamp::Fractional(secs) => {
            record.insert("timestamp".into(), json!(secs));
        }
        FuzzTimestamp::Text(text) => {
            record.insert("timestamp".into(), json!(text));
            record.insert("time".into(), json!(text));
        }
        FuzzTimestamp::Missing => {}
    }
    if let Some(username) = &input.username {
        record.insert("username".into(), json!(username));
    }
    if let Some(password) = &input.password {
        record.insert("password".into(), json!(password));
        record.insert(
            "body".into(),
            json!({ "username": input.username, "password": password }),
        );
    }
    if let Some(cmd) = &input.input {
        record.insert("input".into(), json!(cmd));
    }
    if let Some(url) = &input.url {
        record.insert("url".into(), json!(url));
        record.insert("request_url".into(), json!(url));
    }
    if let Some(agent) = &input.user_agent {
        record.insert("headers".into(), json!({ "User-Agent": agent }));
    }
    Value::Object(record)
}

fuzz_target!(|input: FuzzRecord| {
    let source = SourceSystem::ALL[usize::from(input.source) % SourceSystem::ALL.len()];
    let record = to_value(&input);
    let router = ParserRouter::new();
    let _ = router.route_record(source, &record);
});
