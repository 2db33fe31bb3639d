//! 집계기 레지스트리 -- 소스 ID -> 소스 집계기 매핑
//!
//! 시스템에서 여러 태스크가 공유하는 유일한 가변 구조입니다.
//! 조회/생성/삭제와 라인 전송은 모두 하나의 뮤텍스 임계 구역 안에서 일어나며,
//! 임계 구역 안에서는 `.await`가 없습니다 (소스별 채널은 unbounded이므로 전송이 즉시 끝남).
//!
//! # 퇴역 프로토콜
//! 유휴 상태가 된 집계기는 자신의 세대(generation)와 지금까지 받은 명령 수를 들고
//! [`RegistryTable::retire`]를 호출합니다. 레지스트리는 같은 임계 구역 안에서
//! - 등록된 세대가 일치하고
//! - 레지스트리가 보낸 명령 수와 집계기가 받은 명령 수가 같을 때만
//!
//! 엔트리를 제거합니다. 따라서 퇴역 직전에 도착한 라인은 잃어버리지 않고,
//! 같은 소스에 대한 동시 조회-생성과 경쟁하지 않습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use stackfold_core::metrics as m;
use stackfold_core::types::LogLine;

use crate::classifier::LineClassifier;
use crate::dispatch::DeliveryQueue;
use crate::error::AggregatorError;
use crate::source::{SourceAggregator, SourceCommand, SourceSettings};

/// 등록된 소스 집계기 하나
#[derive(Debug)]
struct SourceEntry {
    tx: mpsc::UnboundedSender<SourceCommand>,
    generation: u64,
    /// 레지스트리가 이 집계기에 보낸 명령 수
    sent: u64,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, SourceEntry>,
    closed: bool,
}

/// 레지스트리의 공유 상태 (집계기 태스크도 퇴역 요청을 위해 참조)
#[derive(Debug, Default)]
pub(crate) struct RegistryTable {
    inner: Mutex<Table>,
}

impl RegistryTable {
    fn lock(&self) -> MutexGuard<'_, Table> {
        // 임계 구역 안에서는 패닉할 코드가 없지만, 오염되더라도 매핑은 일관적임
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 유휴 집계기의 퇴역을 요청합니다.
    ///
    /// `true`이면 엔트리가 제거되었으므로 집계기는 종료해야 합니다.
    /// `false`이면 아직 받지 않은 명령이 있거나 종료 중이므로 계속 실행해야 합니다.
    pub(crate) fn retire(&self, source_id: &str, generation: u64, received: u64) -> bool {
        let mut table = self.lock();

        let Some(entry) = table.entries.get(source_id) else {
            // shutdown이 이미 엔트리를 가져감. 채널이 닫힐 때까지 남은 명령을 처리.
            return false;
        };

        if entry.generation != generation {
            let err = AggregatorError::RegistryRace {
                source_id: source_id.to_owned(),
            };
            tracing::error!(
                error = %err,
                registered_generation = entry.generation,
                retiring_generation = generation,
                "registry invariant violated"
            );
            debug_assert_eq!(
                entry.generation, generation,
                "two aggregators alive for source '{source_id}'"
            );
            return true;
        }

        if entry.sent != received {
            return false;
        }

        table.entries.remove(source_id);
        gauge!(m::AGGREGATOR_ACTIVE_SOURCES).set(table.entries.len() as f64);
        tracing::debug!(source_id, generation, "source aggregator retired");
        true
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

/// 집계기 레지스트리
///
/// 라인을 분류한 뒤 해당 소스의 집계기로 보냅니다. 집계기가 없으면 만듭니다.
/// 한 소스에는 항상 최대 하나의 집계기만 존재합니다.
pub struct AggregatorRegistry {
    table: Arc<RegistryTable>,
    classifier: Arc<LineClassifier>,
    settings: SourceSettings,
    queue: DeliveryQueue,
    next_generation: AtomicU64,
}

impl AggregatorRegistry {
    /// 새 레지스트리를 생성합니다.
    ///
    /// 완성된 메시지는 `queue`로 전달됩니다.
    pub fn new(
        classifier: Arc<LineClassifier>,
        config: &crate::config::AggregatorConfig,
        queue: DeliveryQueue,
    ) -> Self {
        Self {
            table: Arc::new(RegistryTable::default()),
            classifier,
            settings: SourceSettings {
                idle_timeout: config.idle_timeout,
                max_group_lines: config.max_group_lines,
                max_group_bytes: config.max_group_bytes,
            },
            queue,
            next_generation: AtomicU64::new(1),
        }
    }

    /// 라인을 분류하고 소스 집계기로 보냅니다.
    ///
    /// 집계기가 없으면 생성합니다. tokio 런타임 안에서 호출해야 합니다.
    ///
    /// # Errors
    /// - 레지스트리가 이미 종료된 경우
    /// - 집계기 태스크가 비정상 종료되어 라인을 전달하지 못한 경우
    pub fn route_line(&self, line: LogLine) -> Result<(), AggregatorError> {
        let classification = self.classifier.classify(&line.text);
        counter!(m::AGGREGATOR_LINES_RECEIVED_TOTAL).increment(1);

        let mut table = self.table.lock();
        if table.closed {
            return Err(AggregatorError::Channel("registry is shut down".to_owned()));
        }

        if let Some(entry) = table.entries.get_mut(line.source_id.as_str()) {
            let command = SourceCommand::Line {
                line,
                classification,
            };
            if entry.tx.send(command).is_ok() {
                entry.sent += 1;
                return Ok(());
            }
        } else {
            let source_id = line.source_id.clone();
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = u64::from(
                tx.send(SourceCommand::Line {
                    line,
                    classification,
                })
                .is_ok(),
            );

            let aggregator = SourceAggregator::new(
                source_id.clone(),
                generation,
                rx,
                &self.settings,
                self.queue.clone(),
                Arc::clone(&self.table),
            );
            let task = tokio::spawn(aggregator.run());

            tracing::debug!(source_id = %source_id, generation, "source aggregator created");
            table.entries.insert(
                source_id,
                SourceEntry {
                    tx,
                    generation,
                    sent,
                    task,
                },
            );
            gauge!(m::AGGREGATOR_ACTIVE_SOURCES).set(table.entries.len() as f64);
            return Ok(());
        }

        // 송신 실패: 집계기 태스크가 퇴역 절차 없이 끝남 (패닉)
        // 라인 하나를 잃고, 다음 라인에서 새 집계기를 만든다.
        Err(self.evict_dead(&mut table))
    }

    fn evict_dead(&self, table: &mut Table) -> AggregatorError {
        let dead: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, e)| e.tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for source_id in &dead {
            table.entries.remove(source_id);
            tracing::error!(source_id = %source_id, "source aggregator ended unexpectedly");
        }
        gauge!(m::AGGREGATOR_ACTIVE_SOURCES).set(table.entries.len() as f64);
        AggregatorError::Channel(format!(
            "source aggregator stopped unexpectedly: {}",
            dead.join(", ")
        ))
    }

    /// 모든 소스의 진행 중인 그룹을 플러시합니다 (집계기는 계속 실행).
    ///
    /// 모든 집계기가 플러시를 마칠 때까지 기다리며, 플러시를 요청한 소스 수를 반환합니다.
    pub async fn flush_all(&self) -> usize {
        let acks: Vec<oneshot::Receiver<()>> = {
            let mut table = self.table.lock();
            table
                .entries
                .values_mut()
                .filter_map(|entry| {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    entry.tx.send(SourceCommand::Flush(ack_tx)).ok()?;
                    entry.sent += 1;
                    Some(ack_rx)
                })
                .collect()
        };

        let count = acks.len();
        for ack in acks {
            // 집계기가 응답 전에 끝났으면 이미 플러시된 것
            let _ = ack.await;
        }
        tracing::debug!(sources = count, "flushed all source aggregators");
        count
    }

    /// 레지스트리를 닫고 모든 집계기를 종료합니다.
    ///
    /// 각 집계기는 채널에 남은 라인을 처리하고 진행 중인 그룹을 플러시한 뒤 끝납니다.
    /// 모든 집계기 태스크가 끝날 때까지 기다립니다. 이후 `route_line`은 실패합니다.
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut table = self.table.lock();
            table.closed = true;
            table
                .entries
                .drain()
                .map(|(source_id, entry)| (source_id, entry.task))
                .collect()
        };
        gauge!(m::AGGREGATOR_ACTIVE_SOURCES).set(0.0);

        let count = tasks.len();
        for (source_id, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(source_id = %source_id, error = %e, "source aggregator task failed");
            }
        }
        tracing::info!(sources = count, "aggregator registry shut down");
    }

    /// 현재 등록된 소스 집계기 수
    pub fn active_sources(&self) -> usize {
        self.table.len()
    }

    /// 소스에 집계기가 등록되어 있는지 여부
    pub fn is_active(&self, source_id: &str) -> bool {
        self.table.lock().entries.contains_key(source_id)
    }

    /// 분류기 참조
    pub fn classifier(&self) -> &LineClassifier {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stackfold_core::types::LogicalMessage;

    use crate::config::{AggregatorConfig, AggregatorConfigBuilder};

    fn registry(idle_ms: u64) -> (AggregatorRegistry, mpsc::Receiver<LogicalMessage>) {
        let config = AggregatorConfigBuilder::new()
            .idle_timeout(Duration::from_millis(idle_ms))
            .build()
            .unwrap();
        registry_with(&config)
    }

    fn registry_with(
        config: &AggregatorConfig,
    ) -> (AggregatorRegistry, mpsc::Receiver<LogicalMessage>) {
        let classifier = Arc::new(LineClassifier::with_builtins(&["java", "python"]).unwrap());
        let (queue, rx) = DeliveryQueue::channel(256, Duration::from_secs(1));
        (AggregatorRegistry::new(classifier, config, queue), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<LogicalMessage>) -> Vec<LogicalMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn creates_one_aggregator_per_source() {
        let (registry, _rx) = registry(1000);
        registry.route_line(LogLine::new("a", "Exception: x")).unwrap();
        registry.route_line(LogLine::new("a", "  at Foo")).unwrap();
        registry.route_line(LogLine::new("b", "Exception: y")).unwrap();
        assert_eq!(registry.active_sources(), 2);
        assert!(registry.is_active("a"));
        assert!(!registry.is_active("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_aggregator_retires_after_second_period() {
        let (registry, mut rx) = registry(1000);
        registry.route_line(LogLine::new("a", "Exception: x")).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(registry.is_active("a"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!registry.is_active("a"));
        assert_eq!(registry.active_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn source_comes_back_after_retirement() {
        let (registry, mut rx) = registry(100);
        registry.route_line(LogLine::new("a", "first")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!registry.is_active("a"));

        registry.route_line(LogLine::new("a", "second")).unwrap();
        assert!(registry.is_active("a"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let texts: Vec<_> = drain(&mut rx).into_iter().map(|m| m.merged_text).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_all_emits_pending_groups_and_keeps_sources() {
        let (registry, mut rx) = registry(60_000);
        registry.route_line(LogLine::new("a", "Exception: x")).unwrap();
        registry.route_line(LogLine::new("b", "Exception: y")).unwrap();

        assert_eq!(registry.flush_all().await, 2);
        let mut texts: Vec<_> = drain(&mut rx).into_iter().map(|m| m.merged_text).collect();
        texts.sort();
        assert_eq!(texts, vec!["Exception: x", "Exception: y"]);
        assert_eq!(registry.active_sources(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_and_rejects_new_lines() {
        let (registry, mut rx) = registry(60_000);
        registry.route_line(LogLine::new("a", "Exception: x")).unwrap();
        registry.route_line(LogLine::new("a", "  at Foo")).unwrap();

        registry.shutdown().await;
        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].merged_text, "Exception: x\n  at Foo");
        assert_eq!(registry.active_sources(), 0);

        let err = registry.route_line(LogLine::new("a", "late")).unwrap_err();
        assert!(matches!(err, AggregatorError::Channel(_)));
    }

    #[tokio::test]
    async fn retire_refuses_when_lines_are_in_flight() {
        let table = RegistryTable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.lock().entries.insert(
            "a".to_owned(),
            SourceEntry {
                tx,
                generation: 7,
                sent: 3,
                task: tokio::spawn(async {}),
            },
        );

        assert!(!table.retire("a", 7, 2));
        assert_eq!(table.len(), 1);
        assert!(table.retire("a", 7, 3));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn retire_of_unknown_source_keeps_running() {
        let table = RegistryTable::default();
        assert!(!table.retire("ghost", 1, 0));
    }

    #[tokio::test]
    #[should_panic(expected = "two aggregators alive")]
    async fn retire_with_stale_generation_fails_loudly() {
        let table = RegistryTable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.lock().entries.insert(
            "a".to_owned(),
            SourceEntry {
                tx,
                generation: 2,
                sent: 0,
                task: tokio::spawn(async {}),
            },
        );
        table.retire("a", 1, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn many_sources_concurrently_never_mix() {
        let (registry, mut rx) = registry(1000);
        let registry = Arc::new(registry);

        let mut producers = Vec::new();
        for s in 0..8 {
            let registry = Arc::clone(&registry);
            producers.push(tokio::spawn(async move {
                let source = format!("src-{s}");
                registry
                    .route_line(LogLine::new(&source, format!("Exception: {source}")))
                    .unwrap();
                for i in 0..5 {
                    tokio::task::yield_now().await;
                    registry
                        .route_line(LogLine::new(&source, format!("  at {source}.f{i}")))
                        .unwrap();
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        registry.shutdown().await;

        let out = drain(&mut rx);
        assert_eq!(out.len(), 8);
        for msg in out {
            assert_eq!(msg.line_count, 6);
            assert!(msg.lines().all(|l| l.contains(&msg.source_id)));
        }
    }
}
