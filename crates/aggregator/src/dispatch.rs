//! 전송 디스패처 -- 완성된 메시지를 집계기와 분리된 태스크에서 싱크로 전달합니다.
//!
//! 집계기는 [`DeliveryQueue::submit`]으로 메시지를 넣습니다. 큐가 가득 차면
//! 디스패처가 자리를 비울 때까지 최대 `enqueue_timeout`만큼 기다리므로, 느리지만
//! 동작하는 싱크에서는 메시지를 잃지 않습니다. 그 시간 안에 자리가 나지 않으면
//! (싱크 장애) 메시지를 버리고 경고를 남깁니다.
//!
//! 디스패처는 단일 소비자이므로 한 소스의 메시지는 방출 순서대로 전송됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use stackfold_core::metrics as m;
use stackfold_core::pipeline::DeliverySink;
use stackfold_core::types::LogicalMessage;

/// 전송 통계 카운터
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// 전송 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStatsSnapshot {
    /// 싱크가 성공적으로 전송한 메시지 수
    pub delivered: u64,
    /// 싱크가 전송에 실패한 메시지 수
    pub failed: u64,
    /// 큐 대기 시간 초과 또는 디스패처 종료로 버려진 메시지 수
    pub dropped: u64,
}

impl DeliveryStats {
    /// 현재 값을 스냅샷으로 반환합니다.
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// 집계기 -> 디스패처 전송 큐의 송신측
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<LogicalMessage>,
    capacity: usize,
    enqueue_timeout: Duration,
    stats: Arc<DeliveryStats>,
}

impl DeliveryQueue {
    /// 지정한 용량과 대기 시간으로 큐를 생성합니다.
    pub fn channel(
        capacity: usize,
        enqueue_timeout: Duration,
    ) -> (Self, mpsc::Receiver<LogicalMessage>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            capacity,
            enqueue_timeout,
            stats: Arc::new(DeliveryStats::default()),
        };
        (queue, rx)
    }

    /// 메시지를 큐에 넣습니다.
    ///
    /// 큐가 가득 차 있으면 최대 `enqueue_timeout`만큼 기다립니다. 그래도 자리가
    /// 나지 않거나 디스패처가 종료되었으면 메시지를 버리고 `false`를 반환합니다.
    pub async fn submit(&self, message: LogicalMessage) -> bool {
        match self.tx.send_timeout(message, self.enqueue_timeout).await {
            Ok(()) => {
                gauge!(m::AGGREGATOR_DELIVERY_QUEUE_SIZE).set(self.len() as f64);
                true
            }
            Err(SendTimeoutError::Timeout(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(m::AGGREGATOR_MESSAGES_DROPPED_TOTAL).increment(1);
                tracing::warn!(
                    message_id = %message.id,
                    source_id = %message.source_id,
                    kind = %message.kind,
                    capacity = self.capacity,
                    waited_ms = self.enqueue_timeout.as_millis() as u64,
                    "delivery queue stayed full, dropping message"
                );
                false
            }
            Err(SendTimeoutError::Closed(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    message_id = %message.id,
                    source_id = %message.source_id,
                    "delivery dispatcher stopped, dropping message"
                );
                false
            }
        }
    }

    /// 큐에 대기 중인 메시지 수
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    /// 큐가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 큐 사용률 (0.0 ~ 1.0)
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// 공유 전송 통계
    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }
}

/// 디스패처 루프
///
/// 모든 [`DeliveryQueue`] 송신측이 드롭될 때까지 메시지를 순서대로 싱크에 전달한 뒤
/// 싱크를 닫습니다. 전송 실패는 로그로 남기고 다음 메시지로 넘어갑니다.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<LogicalMessage>,
    mut sink: Box<dyn DeliverySink>,
    stats: Arc<DeliveryStats>,
) {
    let sink_name = sink.name().to_owned();
    tracing::debug!(sink = %sink_name, "delivery dispatcher started");

    while let Some(message) = rx.recv().await {
        gauge!(m::AGGREGATOR_DELIVERY_QUEUE_SIZE).set(rx.len() as f64);

        let started = Instant::now();
        match sink.deliver(&message).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                counter!(m::SINK_MESSAGES_DELIVERED_TOTAL, m::LABEL_SINK => sink_name.clone())
                    .increment(1);
                histogram!(m::SINK_DELIVERY_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                tracing::trace!(message_id = %message.id, "message delivered");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!(m::SINK_DELIVERY_FAILURES_TOTAL, m::LABEL_SINK => sink_name.clone())
                    .increment(1);
                tracing::warn!(
                    sink = %sink_name,
                    message_id = %message.id,
                    source_id = %message.source_id,
                    kind = %message.kind,
                    lines = message.line_count,
                    error = %e,
                    "delivery failed, dropping message"
                );
            }
        }
    }

    sink.close().await;
    tracing::debug!(sink = %sink_name, "delivery dispatcher stopped");
}
