//! 소스 집계기 -- 소스 하나당 하나의 태스크로 실행되는 유휴 타임아웃 상태 머신
//!
//! # 상태
//! - `Idle`: 진행 중인 그룹 없음
//! - `Accumulating`: 그룹이 버퍼에 있고 유휴 타이머가 동작 중
//!
//! 태스크는 (a) 다음 라인 수신과 (b) 유휴 타이머 만료를 `select!`로 동시에 기다립니다.
//! 타이머는 라인을 받을 때마다 마지막 라인 시각 기준으로 다시 설정됩니다.
//!
//! - 타이머가 `Accumulating` 상태에서 만료되면 그룹을 플러시하고 `Idle`로 돌아갑니다.
//! - `Idle` 상태에서 한 번 더 만료되면 레지스트리에 퇴역을 요청합니다.
//!   레지스트리가 보낸 라인을 모두 받은 경우에만 퇴역이 승인됩니다.
//! - 채널이 닫히면 (종료) 남은 그룹을 플러시하고 끝납니다.
//!
//! 전송 큐가 가득 차면 방출은 큐에 자리가 날 때까지 기다리며, 그동안 이 소스의
//! 명령은 채널에 쌓입니다.
//!
//! 버퍼와 타이머는 이 태스크만 소유하므로 잠금이 필요 없습니다.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use stackfold_core::metrics as m;
use stackfold_core::types::{Classification, LogLine};

use crate::dispatch::DeliveryQueue;
use crate::group::{Emission, FlushReason, GroupBuffer};
use crate::registry::RegistryTable;

/// 레지스트리 -> 소스 집계기 명령
#[derive(Debug)]
pub(crate) enum SourceCommand {
    /// 분류된 라인
    Line {
        line: LogLine,
        classification: Classification,
    },
    /// 진행 중인 그룹을 즉시 플러시하고 응답
    Flush(oneshot::Sender<()>),
}

/// 소스 집계기 생성 설정
#[derive(Debug, Clone)]
pub(crate) struct SourceSettings {
    pub idle_timeout: Duration,
    pub max_group_lines: usize,
    pub max_group_bytes: usize,
}

/// 소스 하나의 집계 상태
pub(crate) struct SourceAggregator {
    source_id: String,
    generation: u64,
    buffer: GroupBuffer,
    idle_timeout: Duration,
    rx: mpsc::UnboundedReceiver<SourceCommand>,
    /// 이 집계기가 받은 명령 수 (퇴역 시 레지스트리의 송신 수와 비교)
    received: u64,
    queue: DeliveryQueue,
    table: Arc<RegistryTable>,
}

impl SourceAggregator {
    pub(crate) fn new(
        source_id: String,
        generation: u64,
        rx: mpsc::UnboundedReceiver<SourceCommand>,
        settings: &SourceSettings,
        queue: DeliveryQueue,
        table: Arc<RegistryTable>,
    ) -> Self {
        Self {
            source_id,
            generation,
            buffer: GroupBuffer::new(settings.max_group_lines, settings.max_group_bytes),
            idle_timeout: settings.idle_timeout,
            rx,
            received: 0,
            queue,
            table,
        }
    }

    /// 집계 루프를 실행합니다.
    pub(crate) async fn run(mut self) {
        tracing::debug!(
            source_id = %self.source_id,
            generation = self.generation,
            "source aggregator started"
        );

        let mut deadline = Instant::now() + self.idle_timeout;

        loop {
            tokio::select! {
                biased;

                command = self.rx.recv() => {
                    let Some(command) = command else {
                        if let Some(emission) = self.buffer.flush(FlushReason::Shutdown) {
                            self.emit(emission).await;
                        }
                        break;
                    };
                    self.received += 1;
                    self.handle(command).await;
                    deadline = Instant::now() + self.idle_timeout;
                }

                () = tokio::time::sleep_until(deadline) => {
                    if let Some(emission) = self.buffer.flush(FlushReason::Timeout) {
                        tracing::debug!(
                            source_id = %self.source_id,
                            kind = %emission.message().kind,
                            lines = emission.message().line_count,
                            idle_ms = self.idle_timeout.as_millis() as u64,
                            "idle timeout flushed group, trace may be truncated"
                        );
                        self.emit(emission).await;
                    } else if self.table.retire(&self.source_id, self.generation, self.received) {
                        break;
                    }
                    deadline = Instant::now() + self.idle_timeout;
                }
            }
        }

        tracing::debug!(
            source_id = %self.source_id,
            generation = self.generation,
            received = self.received,
            "source aggregator stopped"
        );
    }

    async fn handle(&mut self, command: SourceCommand) {
        match command {
            SourceCommand::Line {
                line,
                classification,
            } => {
                for emission in self.buffer.offer(line, classification) {
                    self.emit(emission).await;
                }
            }
            SourceCommand::Flush(ack) => {
                if let Some(emission) = self.buffer.flush(FlushReason::Shutdown) {
                    self.emit(emission).await;
                }
                // 요청자가 기다리지 않아도 무방
                let _ = ack.send(());
            }
        }
    }

    /// 메시지를 전송 큐에 넣습니다. 큐가 가득 차 있으면 자리가 날 때까지 기다립니다.
    async fn emit(&self, emission: Emission) {
        let kind = emission.message().kind.as_str().to_owned();
        if let Some(reason) = emission.reason() {
            tracing::debug!(
                source_id = %self.source_id,
                kind = %kind,
                lines = emission.message().line_count,
                reason = %reason,
                "group flushed"
            );
            counter!(
                m::AGGREGATOR_GROUPS_FLUSHED_TOTAL,
                m::LABEL_KIND => kind.clone(),
                m::LABEL_REASON => reason.as_str()
            )
            .increment(1);
        }
        counter!(m::AGGREGATOR_MESSAGES_EMITTED_TOTAL, m::LABEL_KIND => kind).increment(1);

        self.queue.submit(emission.into_message()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackfold_core::types::LogicalMessage;

    fn java() -> Classification {
        Classification::continuation("java-exception")
    }

    fn spawn_aggregator(
        idle_ms: u64,
    ) -> (
        mpsc::UnboundedSender<SourceCommand>,
        mpsc::Receiver<LogicalMessage>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (queue, out) = DeliveryQueue::channel(64, Duration::from_secs(1));
        let settings = SourceSettings {
            idle_timeout: Duration::from_millis(idle_ms),
            max_group_lines: 1000,
            max_group_bytes: 64 * 1024,
        };
        let aggregator = SourceAggregator::new(
            "src".to_owned(),
            1,
            rx,
            &settings,
            queue,
            Arc::new(RegistryTable::default()),
        );
        (tx, out, tokio::spawn(aggregator.run()))
    }

    fn send(tx: &mpsc::UnboundedSender<SourceCommand>, text: &str, class: Classification) {
        tx.send(SourceCommand::Line {
            line: LogLine::new("src", text),
            classification: class,
        })
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_flushes_group_once() {
        let (tx, mut out, _task) = spawn_aggregator(1000);
        send(&tx, "Exception: x", java());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(out.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let msg = out.recv().await.unwrap();
        assert_eq!(msg.merged_text, "Exception: x");

        // 다음 유휴 주기에는 방출할 것이 없음
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_resets_on_each_line() {
        let (tx, mut out, _task) = spawn_aggregator(1000);
        send(&tx, "Exception: x", java());
        for frame in ["  at A", "  at B", "  at C"] {
            tokio::time::sleep(Duration::from_millis(800)).await;
            send(&tx, frame, java());
        }
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(out.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let msg = out.recv().await.unwrap();
        assert_eq!(msg.line_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_channel_flushes_pending_group() {
        let (tx, mut out, task) = spawn_aggregator(60_000);
        send(&tx, "Exception: x", java());
        send(&tx, "  at A", java());
        drop(tx);
        task.await.unwrap();

        let msg = out.recv().await.unwrap();
        assert_eq!(msg.merged_text, "Exception: x\n  at A");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_command_flushes_and_acks() {
        let (tx, mut out, _task) = spawn_aggregator(60_000);
        send(&tx, "Exception: x", java());
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SourceCommand::Flush(ack_tx)).unwrap();
        ack_rx.await.unwrap();

        let msg = out.recv().await.unwrap();
        assert_eq!(msg.merged_text, "Exception: x");
    }

    #[tokio::test(start_paused = true)]
    async fn plain_line_is_emitted_without_waiting() {
        let (tx, mut out, _task) = spawn_aggregator(60_000);
        send(&tx, "hello", Classification::Plain);
        let msg = out.recv().await.unwrap();
        assert!(msg.kind.is_plain());
    }
}
