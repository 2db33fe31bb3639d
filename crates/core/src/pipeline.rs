//! 파이프라인 trait: 모듈 확장 포인트 정의
//!
//! - [`Pipeline`]: 시작/정지/헬스 체크 생명주기
//! - [`DeliverySink`]: 완성된 [`LogicalMessage`]를 외부로 전송하는 싱크

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::{DeliveryError, StackfoldError};
use crate::types::LogicalMessage;

/// `dyn` 호환 trait에서 사용하는 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 생명주기를 가지는 파이프라인 trait
///
/// `stackfold-daemon`은 이 trait을 통해 파이프라인을 시작하고 정지합니다.
pub trait Pipeline: Send {
    /// 파이프라인을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), StackfoldError>> + Send;

    /// 파이프라인을 정지합니다.
    ///
    /// 버퍼링된 그룹을 모두 플러시한 뒤 반환합니다 (graceful shutdown).
    fn stop(&mut self) -> impl Future<Output = Result<(), StackfoldError>> + Send;

    /// 파이프라인의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 완성된 논리 메시지를 전송하는 싱크
///
/// 연결 관리, 재시도, 전송 방식(UDP/TCP 등)은 싱크의 책임입니다.
/// 집계 엔진은 플러시마다 `deliver`를 한 번 호출하며, 실패는 싱크 경계에서
/// 로그로 남기고 버립니다.
///
/// `BoxFuture`를 반환하므로 `Box<dyn DeliverySink>`로 사용할 수 있습니다.
pub trait DeliverySink: Send {
    /// 싱크 이름 (로그 및 메트릭에 사용)
    fn name(&self) -> &str;

    /// 메시지 하나를 전송합니다.
    fn deliver<'a>(
        &'a mut self,
        message: &'a LogicalMessage,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;

    /// 싱크가 한 번에 보낼 수 있는 메시지 텍스트의 최대 바이트 수
    ///
    /// `None`이면 제한이 없습니다. 파이프라인은 그룹 바이트 상한을 이 값 이하로
    /// 맞춥니다.
    fn max_message_bytes(&self) -> Option<usize> {
        None
    }

    /// 싱크를 닫습니다. 기본 구현은 아무 것도 하지 않습니다.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}
