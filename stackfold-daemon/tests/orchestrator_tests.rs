//! Orchestrator integration tests.
//!
//! Tests the full flow: config -> build -> run over an input stream ->
//! shutdown trigger -> flushed delivery.

use std::future::pending;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};

use stackfold_core::config::StackfoldConfig;
use stackfold_core::error::DeliveryError;
use stackfold_core::pipeline::{BoxFuture, DeliverySink};
use stackfold_core::types::LogicalMessage;
use stackfold_daemon::orchestrator::Orchestrator;

#[derive(Clone, Default)]
struct RecordingSink {
    messages: Arc<Mutex<Vec<LogicalMessage>>>,
}

impl RecordingSink {
    fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.merged_text.clone())
            .collect()
    }
}

impl DeliverySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver<'a>(
        &'a mut self,
        message: &'a LogicalMessage,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        })
    }
}

fn plain_input_config() -> StackfoldConfig {
    StackfoldConfig::parse(
        r#"
[aggregator]
idle_timeout_ms = 60000

[sink]
transport = "stdout"

[input]
format = "plain"
default_source_id = "app"
"#,
    )
    .expect("failed to parse test config")
}

#[tokio::test]
async fn test_eof_flushes_pending_group_and_stops() {
    let sink = RecordingSink::default();
    let mut orchestrator =
        Orchestrator::build_with_sink(plain_input_config(), Box::new(sink.clone())).unwrap();

    let input = b"booting\nException: boom\n  at Foo.bar\n  ... 3 more\n".as_slice();
    let stats = orchestrator
        .run_until(BufReader::new(input), pending())
        .await
        .unwrap();

    assert_eq!(stats.forwarded, 4);
    assert_eq!(
        sink.texts(),
        vec!["booting", "Exception: boom\n  at Foo.bar\n  ... 3 more"]
    );
    assert_eq!(orchestrator.pipeline().state_name(), "stopped");
}

#[tokio::test]
async fn test_signal_stops_open_input() {
    let sink = RecordingSink::default();
    let mut orchestrator =
        Orchestrator::build_with_sink(plain_input_config(), Box::new(sink.clone())).unwrap();

    let (mut writer, reader) = tokio::io::duplex(1024);
    writer
        .write_all(b"Traceback (most recent call last):\n  File \"app.py\", line 3, in <module>\nValueError: nope\n")
        .await
        .unwrap();

    // writer stays open: only the signal can end the run
    let signal = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        "TEST"
    };
    orchestrator
        .run_until(BufReader::new(reader), signal)
        .await
        .unwrap();

    let texts = sink.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Traceback"));
    assert!(texts[0].ends_with("ValueError: nope"));
    drop(writer);
}

#[tokio::test]
async fn test_health_reports_running_pipeline_counts() {
    let sink = RecordingSink::default();
    let orchestrator =
        Orchestrator::build_with_sink(plain_input_config(), Box::new(sink)).unwrap();

    let health = orchestrator.health().await;
    assert!(health.status.is_unhealthy(), "not started yet");
    assert_eq!(health.routed, 0);
    assert_eq!(health.active_sources, 0);
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut config = plain_input_config();
    config.aggregator.idle_timeout_ms = 0;
    let result = Orchestrator::build_with_sink(config, Box::new(RecordingSink::default()));
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_unknown_input_format() {
    let mut config = plain_input_config();
    config.input.format = "xml".to_owned();
    let result = Orchestrator::build_with_sink(config, Box::new(RecordingSink::default()));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_build_from_missing_file_fails() {
    let result = Orchestrator::build(std::path::Path::new("/nonexistent/stackfold.toml")).await;
    assert!(result.is_err());
}
