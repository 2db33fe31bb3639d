//! 집계 엔진 설정
//!
//! [`AggregatorConfig`]는 core의 [`AggregatorSection`](stackfold_core::config::AggregatorSection)을
//! 기반으로 집계 엔진 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use stackfold_core::config::StackfoldConfig;
//! use stackfold_aggregator::config::AggregatorConfig;
//!
//! let core_config = StackfoldConfig::default();
//! let config = AggregatorConfig::from_core(&core_config.aggregator);
//! ```

use std::path::{Component, Path};
use std::time::Duration;

use stackfold_core::config::{AggregatorSection, BUILTIN_DIALECTS};

use crate::error::AggregatorError;

/// 유휴 타임아웃 상한
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// 집계 엔진 설정
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// 마지막 라인 이후 그룹을 플러시하기까지의 유휴 시간
    pub idle_timeout: Duration,
    /// 활성화할 내장 dialect 목록 (우선순위 순)
    pub dialects: Vec<String>,
    /// 사용자 정의 YAML dialect 디렉토리 (빈 문자열이면 사용하지 않음)
    pub rule_dir: String,
    /// 그룹당 최대 라인 수
    pub max_group_lines: usize,
    /// 그룹당 최대 바이트 수
    pub max_group_bytes: usize,
    /// 입력 채널 용량
    pub ingress_capacity: usize,
    /// 전송 큐 용량
    pub delivery_queue_capacity: usize,
    /// 전송 큐가 가득 찼을 때 메시지를 버리기 전까지 기다리는 시간
    pub enqueue_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from_core(&AggregatorSection::default())
    }
}

impl AggregatorConfig {
    /// core의 `AggregatorSection`에서 집계 엔진 설정을 생성합니다.
    pub fn from_core(core: &AggregatorSection) -> Self {
        Self {
            idle_timeout: Duration::from_millis(core.idle_timeout_ms),
            dialects: core.dialects.clone(),
            rule_dir: core.rule_dir.clone(),
            max_group_lines: core.max_group_lines,
            max_group_bytes: core.max_group_bytes,
            ingress_capacity: core.ingress_capacity,
            delivery_queue_capacity: core.delivery_queue_capacity,
            enqueue_timeout: Duration::from_millis(core.enqueue_timeout_ms),
        }
    }

    /// dialect 디렉토리 경로를 검증합니다 (path traversal 방지).
    fn validate_rule_dir(dir: &str) -> Result<(), AggregatorError> {
        if dir.is_empty() {
            return Ok(());
        }

        if Path::new(dir)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(AggregatorError::Config {
                field: "rule_dir".to_owned(),
                reason: format!("rule dir '{dir}' contains path traversal pattern '..'"),
            });
        }

        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.idle_timeout.is_zero() || self.idle_timeout > MAX_IDLE_TIMEOUT {
            return Err(AggregatorError::Config {
                field: "idle_timeout".to_owned(),
                reason: format!("must be between 1ms and {}s", MAX_IDLE_TIMEOUT.as_secs()),
            });
        }

        if self.enqueue_timeout.is_zero() {
            return Err(AggregatorError::Config {
                field: "enqueue_timeout".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.dialects.is_empty() && self.rule_dir.is_empty() {
            return Err(AggregatorError::Config {
                field: "dialects".to_owned(),
                reason: "at least one dialect or a rule_dir must be configured".to_owned(),
            });
        }

        if let Some(unknown) = self
            .dialects
            .iter()
            .find(|d| !BUILTIN_DIALECTS.contains(&d.as_str()))
        {
            return Err(AggregatorError::Config {
                field: "dialects".to_owned(),
                reason: format!("unknown dialect '{unknown}'"),
            });
        }

        for (field, value) in [
            ("max_group_lines", self.max_group_lines),
            ("max_group_bytes", self.max_group_bytes),
            ("ingress_capacity", self.ingress_capacity),
            ("delivery_queue_capacity", self.delivery_queue_capacity),
        ] {
            if value == 0 {
                return Err(AggregatorError::Config {
                    field: field.to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
        }

        Self::validate_rule_dir(&self.rule_dir)
    }
}

/// 집계 엔진 설정 빌더
#[derive(Default)]
pub struct AggregatorConfigBuilder {
    config: AggregatorConfig,
}

impl AggregatorConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 유휴 타임아웃을 설정합니다.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// 내장 dialect 목록을 설정합니다.
    pub fn dialects(mut self, dialects: Vec<String>) -> Self {
        self.config.dialects = dialects;
        self
    }

    /// 사용자 정의 dialect 디렉토리를 설정합니다.
    pub fn rule_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.rule_dir = dir.into();
        self
    }

    /// 그룹당 최대 라인 수를 설정합니다.
    pub fn max_group_lines(mut self, lines: usize) -> Self {
        self.config.max_group_lines = lines;
        self
    }

    /// 그룹당 최대 바이트 수를 설정합니다.
    pub fn max_group_bytes(mut self, bytes: usize) -> Self {
        self.config.max_group_bytes = bytes;
        self
    }

    /// 입력 채널 용량을 설정합니다.
    pub fn ingress_capacity(mut self, capacity: usize) -> Self {
        self.config.ingress_capacity = capacity;
        self
    }

    /// 전송 큐 용량을 설정합니다.
    pub fn delivery_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.delivery_queue_capacity = capacity;
        self
    }

    /// 전송 큐 대기 시간을 설정합니다.
    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.config.enqueue_timeout = timeout;
        self
    }

    /// 설정을 검증하고 `AggregatorConfig`를 생성합니다.
    pub fn build(self) -> Result<AggregatorConfig, AggregatorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
