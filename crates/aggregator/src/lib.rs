#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`classifier`]: 라인 분류기와 내장/YAML dialect
//! - [`group`]: 소스별 그룹 버퍼 (병합과 플러시 판단)
//! - [`registry`]: 소스 ID -> 소스 집계기 레지스트리 (생성, 라우팅, 퇴역)
//! - [`dispatch`]: 전송 큐와 디스패처
//! - [`sink`]: Logstash(UDP/TCP), 표준 출력 싱크
//! - [`collector`]: 입력 스트림 디코딩 (envelope JSON / plain)
//! - [`pipeline`]: 전체 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 집계 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입

pub mod classifier;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod pipeline;
pub mod registry;
pub mod sink;

mod source;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{AggregationPipeline, AggregationPipelineBuilder};

// 설정
pub use config::{AggregatorConfig, AggregatorConfigBuilder};

// 에러
pub use error::AggregatorError;

// 분류기
pub use classifier::{DialectRule, LineClassifier};

// 그룹 버퍼
pub use group::{Emission, FlushReason, GroupBuffer};

// 레지스트리
pub use registry::AggregatorRegistry;

// 전송
pub use dispatch::{DeliveryQueue, DeliveryStats, DeliveryStatsSnapshot};
pub use sink::{LogstashSink, SinkConfig, StdoutSink, Transport, WriterSink, build_sink};

// 수집기
pub use collector::{CollectStats, CollectorConfig, InputFormat, LineCollector, LineDecoder};
