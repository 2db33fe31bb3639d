//! 집계 파이프라인 -- 라우팅, 소스 집계, 전송의 전체 흐름을 관리합니다.
//!
//! [`AggregationPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! `stackfold-daemon`에서 시작/정지/헬스 체크 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! ingress(mpsc) -> router -> AggregatorRegistry -> SourceAggregator (소스별)
//!                                                      |
//!                                       DeliveryQueue(mpsc) -> dispatcher -> DeliverySink
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stackfold_core::error::{PipelineError, StackfoldError};
use stackfold_core::pipeline::{DeliverySink, HealthStatus, Pipeline};
use stackfold_core::types::{LogLine, LogicalMessage};

use crate::classifier::LineClassifier;
use crate::config::AggregatorConfig;
use crate::dispatch::{DeliveryQueue, DeliveryStats, DeliveryStatsSnapshot, run_dispatcher};
use crate::error::AggregatorError;
use crate::registry::AggregatorRegistry;
use crate::sink::{SinkConfig, build_sink};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 라우팅 카운터
#[derive(Debug, Default)]
struct RouteCounters {
    routed: AtomicU64,
    rejected: AtomicU64,
}

/// 멀티라인 집계 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use stackfold_aggregator::{AggregationPipelineBuilder, SinkConfig};
///
/// let mut pipeline = AggregationPipelineBuilder::new()
///     .config(config)
///     .sink_config(SinkConfig::default())
///     .build()?;
///
/// let ingress = pipeline.ingress().expect("not stopped");
/// pipeline.start().await?;
/// ingress.send(LogLine::new("web", "Exception: boom")).await?;
/// pipeline.stop().await?;
/// ```
pub struct AggregationPipeline {
    config: AggregatorConfig,
    state: PipelineState,
    /// 외부 입력 채널 송신측 (정지 시 해제)
    ingress_tx: Option<mpsc::Sender<LogLine>>,
    /// 라우터가 시작 시 가져가는 입력 채널 수신측
    ingress_rx: Option<mpsc::Receiver<LogLine>>,
    /// 집계기가 메시지를 넣는 전송 큐
    queue: Option<DeliveryQueue>,
    /// 디스패처가 시작 시 가져가는 전송 큐 수신측
    delivery_rx: Option<mpsc::Receiver<LogicalMessage>>,
    /// 디스패처가 시작 시 가져가는 싱크
    ///
    /// `DeliverySink`은 `Sync`가 아니므로 잠금 안에 두어 파이프라인을 `Sync`로 유지합니다.
    sink: Mutex<Option<Box<dyn DeliverySink>>>,
    stats: Arc<DeliveryStats>,
    counters: Arc<RouteCounters>,
    registry: Option<Arc<AggregatorRegistry>>,
    cancel: CancellationToken,
    router: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl AggregationPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 입력 채널 송신측을 반환합니다. 정지 후에는 `None`입니다.
    ///
    /// 시작 전에 받아 두어도 되며, 라인은 시작 이후 처리됩니다.
    pub fn ingress(&self) -> Option<mpsc::Sender<LogLine>> {
        self.ingress_tx.clone()
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// 라우팅된 라인 수
    pub fn routed_count(&self) -> u64 {
        self.counters.routed.load(Ordering::Relaxed)
    }

    /// 라우팅에 실패한 라인 수
    pub fn rejected_count(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    /// 전송 통계
    pub fn delivery_stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// 현재 활성 소스 수
    pub fn active_sources(&self) -> usize {
        self.registry.as_ref().map_or(0, |r| r.active_sources())
    }

    /// 모든 소스의 진행 중인 그룹을 즉시 플러시합니다.
    pub async fn flush_all(&self) -> Result<usize, StackfoldError> {
        match &self.registry {
            Some(registry) if self.state == PipelineState::Running => {
                Ok(registry.flush_all().await)
            }
            _ => Err(PipelineError::NotRunning.into()),
        }
    }
}

impl Pipeline for AggregationPipeline {
    async fn start(&mut self) -> Result<(), StackfoldError> {
        match self.state {
            PipelineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "aggregation pipeline cannot be restarted".to_owned(),
                )
                .into());
            }
            PipelineState::Initialized => {}
        }

        tracing::info!("starting aggregation pipeline");

        // 1. 분류기 (내장 + 사용자 정의 dialect)
        let classifier = Arc::new(LineClassifier::from_config(&self.config).await?);

        let sink = self
            .sink
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let (Some(queue), Some(delivery_rx), Some(sink), Some(ingress_rx)) = (
            self.queue.clone(),
            self.delivery_rx.take(),
            sink,
            self.ingress_rx.take(),
        ) else {
            return Err(PipelineError::InitFailed("pipeline resources missing".to_owned()).into());
        };

        // 2. 전송 디스패처
        tracing::info!(sink = sink.name(), "delivery sink configured");
        self.dispatcher = Some(tokio::spawn(run_dispatcher(
            delivery_rx,
            sink,
            Arc::clone(&self.stats),
        )));

        // 3. 레지스트리 + 라우터
        let registry = Arc::new(AggregatorRegistry::new(classifier, &self.config, queue));
        self.router = Some(tokio::spawn(route_loop(
            ingress_rx,
            Arc::clone(&registry),
            Arc::clone(&self.counters),
            self.cancel.clone(),
        )));
        self.registry = Some(registry);

        self.state = PipelineState::Running;
        tracing::info!(
            idle_timeout_ms = self.config.idle_timeout.as_millis() as u64,
            "aggregation pipeline started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), StackfoldError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping aggregation pipeline");

        // 1. 입력 중단, 이미 받은 라인은 라우팅
        self.ingress_tx = None;
        self.cancel.cancel();
        if let Some(router) = self.router.take() {
            if let Err(e) = router.await {
                tracing::error!(error = %e, "router task failed");
            }
        }

        // 2. 모든 소스 집계기 종료 (진행 중인 그룹 플러시)
        if let Some(registry) = self.registry.take() {
            registry.shutdown().await;
        }

        // 3. 전송 큐의 마지막 송신측을 닫고 디스패처가 비울 때까지 대기
        self.queue = None;
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                tracing::error!(error = %e, "delivery dispatcher task failed");
            }
        }

        self.state = PipelineState::Stopped;
        let stats = self.stats.snapshot();
        tracing::info!(
            routed = self.routed_count(),
            rejected = self.rejected_count(),
            delivered = stats.delivered,
            failed = stats.failed,
            dropped = stats.dropped,
            "aggregation pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.dispatcher.as_ref().is_some_and(JoinHandle::is_finished) {
                    return HealthStatus::Unhealthy("delivery dispatcher stopped".to_owned());
                }
                if self.router.as_ref().is_some_and(JoinHandle::is_finished) {
                    return HealthStatus::Unhealthy("router stopped".to_owned());
                }
                let utilization = self.queue.as_ref().map_or(0.0, DeliveryQueue::utilization);
                if utilization > 0.9 {
                    HealthStatus::Degraded(format!(
                        "delivery queue utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 입력 채널에서 라인을 받아 레지스트리로 보냅니다.
///
/// 취소되면 채널을 닫고 이미 버퍼에 있는 라인을 모두 라우팅한 뒤 끝납니다.
async fn route_loop(
    mut rx: mpsc::Receiver<LogLine>,
    registry: Arc<AggregatorRegistry>,
    counters: Arc<RouteCounters>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            line = rx.recv() => {
                let Some(line) = line else { break };
                route(&registry, &counters, line);
            }
        }
    }

    rx.close();
    while let Some(line) = rx.recv().await {
        route(&registry, &counters, line);
    }
    tracing::debug!("router stopped");
}

fn route(registry: &AggregatorRegistry, counters: &RouteCounters, line: LogLine) {
    let source_id = line.source_id.clone();
    match registry.route_line(line) {
        Ok(()) => {
            counters.routed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(source_id = %source_id, error = %e, "failed to route line");
        }
    }
}

/// 집계 파이프라인 빌더
pub struct AggregationPipelineBuilder {
    config: AggregatorConfig,
    sink: Option<Box<dyn DeliverySink>>,
    sink_config: Option<SinkConfig>,
}

impl AggregationPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: AggregatorConfig::default(),
            sink: None,
            sink_config: None,
        }
    }

    /// 집계 설정을 지정합니다.
    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// 전송 싱크를 직접 지정합니다. `sink_config`보다 우선합니다.
    pub fn sink(mut self, sink: Box<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 설정으로부터 싱크를 생성하도록 지정합니다.
    pub fn sink_config(mut self, config: SinkConfig) -> Self {
        self.sink_config = Some(config);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Errors
    /// - 설정 검증 실패
    /// - 싱크가 지정되지 않은 경우
    pub fn build(self) -> Result<AggregationPipeline, AggregatorError> {
        let mut config = self.config;
        config.validate()?;

        let sink = match (self.sink, self.sink_config) {
            (Some(sink), _) => sink,
            (None, Some(sink_config)) => {
                sink_config.validate()?;
                build_sink(&sink_config)
            }
            (None, None) => {
                return Err(AggregatorError::Config {
                    field: "sink".to_owned(),
                    reason: "a delivery sink is required".to_owned(),
                });
            }
        };

        if let Some(limit) = sink.max_message_bytes() {
            if config.max_group_bytes > limit {
                tracing::warn!(
                    sink = sink.name(),
                    configured = config.max_group_bytes,
                    limit,
                    "max_group_bytes exceeds the sink message limit, clamping"
                );
                config.max_group_bytes = limit;
            }
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_capacity);
        let (queue, delivery_rx) =
            DeliveryQueue::channel(config.delivery_queue_capacity, config.enqueue_timeout);
        let stats = queue.stats();

        Ok(AggregationPipeline {
            config,
            state: PipelineState::Initialized,
            ingress_tx: Some(ingress_tx),
            ingress_rx: Some(ingress_rx),
            queue: Some(queue),
            delivery_rx: Some(delivery_rx),
            sink: Mutex::new(Some(sink)),
            stats,
            counters: Arc::new(RouteCounters::default()),
            registry: None,
            cancel: CancellationToken::new(),
            router: None,
            dispatcher: None,
        })
    }
}

impl Default for AggregationPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
