#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`collector`]: 감시 파일에서 새로 추가된 라인 수집
//! - [`parser`]: 소스별 파서와 소스 태그 기반 라우터
//! - [`enrich`]: 지리 정보와 위험 점수 보강
//! - [`batch`]: 크기/시간 조건 배치 조립
//! - [`store`]: 영구 저장소 어댑터
//! - [`live`]: 실시간 팬아웃 채널
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 실패 처리
//!
//! ```text
//! 손상된 라인      -> warn 로그, 라인 폐기
//! 지리 정보 조회 실패 -> Unknown 센티널로 계속
//! 레코드 저장 거부  -> warn 로그, 해당 레코드만 폐기
//! 배치 저장 실패    -> error 로그, 배치 폐기, 다음 배치 계속
//! 구독자 전송 실패  -> 구독자 제거
//! ```
//! 시작 시 감시 파일을 열 수 없는 경우만 호출자에게 에러로 전달됩니다.

pub mod batch;
pub mod collector;
pub mod config;
pub mod enrich;
pub mod error;
pub mod live;
pub mod parser;
pub mod pipeline;
pub mod store;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{IngestHandle, IngestPipeline, IngestPipelineBuilder, PipelineStats, SubmitAck};

// 설정
pub use config::{IngestConfig, IngestConfigBuilder};

// 에러
pub use error::IngestError;

// 수집기
pub use collector::{FileTail, FileWatcher, RawInput};

// 파서
pub use parser::{CowrieParser, DionaeaParser, GlastopfParser, ParserRouter};

// 보강
pub use enrich::{Enricher, GeoDatabase, GeoResolver};

// 배치
pub use batch::{BatchAssembler, BatchSink, FlushTrigger};

// 저장소
pub use store::{EventStore, JsonLinesStore, MemoryStore, RecordOutcome, open_store};

// 실시간 채널
pub use live::{LiveChannel, LiveMessage, Subscription};
