//! 전송 싱크 구현
//!
//! - [`LogstashSink`]: Logstash JSON을 UDP 데이터그램 또는 개행 구분 TCP 스트림으로 전송
//! - [`WriterSink`] / [`StdoutSink`]: 개행 구분 JSON을 임의의 writer(표준 출력)에 기록
//!
//! [`build_sink`]가 [`SinkConfig`]의 전송 방식에 따라 싱크를 선택합니다.

pub mod encode;
pub mod logstash;
pub mod stdout;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use stackfold_core::config::SinkSection;
use stackfold_core::pipeline::DeliverySink;

use crate::error::AggregatorError;

pub use encode::encode_json;
pub use logstash::{LogstashSink, UDP_MAX_MESSAGE_BYTES};
pub use stdout::{StdoutSink, WriterSink};

/// 전송 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// 메시지당 UDP 데이터그램 하나
    Udp,
    /// 개행 구분 JSON TCP 스트림
    Tcp,
    /// 표준 출력
    Stdout,
}

impl Transport {
    /// 설정 파일에서 사용하는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Stdout => "stdout",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "stdout" => Ok(Self::Stdout),
            other => Err(AggregatorError::Config {
                field: "sink.transport".to_owned(),
                reason: format!("unknown transport '{other}'"),
            }),
        }
    }
}

/// 싱크 설정
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// 전송 방식
    pub transport: Transport,
    /// 대상 주소 (host:port)
    pub address: String,
    /// 연결 타임아웃
    pub connect_timeout: Duration,
    /// 메시지당 쓰기 타임아웃
    pub write_timeout: Duration,
    /// 첫 시도 이후 최대 재시도 횟수
    pub retry_attempts: u32,
    /// 첫 재시도 대기 시간
    pub retry_backoff: Duration,
    /// 재시도 대기 시간 상한
    pub max_backoff: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Udp,
            address: "127.0.0.1:5000".to_owned(),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl SinkConfig {
    /// core 설정 섹션에서 변환합니다.
    pub fn from_core(core: &SinkSection) -> Result<Self, AggregatorError> {
        let config = Self {
            transport: core.transport.parse()?,
            address: core.address.clone(),
            connect_timeout: Duration::from_millis(core.connect_timeout_ms),
            write_timeout: Duration::from_millis(core.write_timeout_ms),
            retry_attempts: core.retry_attempts,
            retry_backoff: Duration::from_millis(core.retry_backoff_ms),
            max_backoff: Duration::from_millis(core.max_backoff_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.transport != Transport::Stdout && self.address.trim().is_empty() {
            return Err(AggregatorError::Config {
                field: "sink.address".to_owned(),
                reason: format!("address is required for {} transport", self.transport),
            });
        }
        if self.connect_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(AggregatorError::Config {
                field: "sink.timeout".to_owned(),
                reason: "timeouts must be greater than 0".to_owned(),
            });
        }
        if self.max_backoff < self.retry_backoff {
            return Err(AggregatorError::Config {
                field: "sink.max_backoff_ms".to_owned(),
                reason: "must be at least retry_backoff_ms".to_owned(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// 재시도 횟수와 백오프를 설정합니다.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration, max_backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// `attempt`번째 재시도(1부터) 전에 기다릴 시간
    ///
    /// `retry_backoff * 2^(attempt-1)`을 `max_backoff`로 제한합니다.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// 설정에 맞는 싱크를 생성합니다.
///
/// 네트워크 싱크는 첫 전송 시점에 연결합니다.
pub fn build_sink(config: &SinkConfig) -> Box<dyn DeliverySink> {
    match config.transport {
        Transport::Udp | Transport::Tcp => Box::new(LogstashSink::new(config.clone())),
        Transport::Stdout => Box::new(StdoutSink::stdout()),
    }
}
