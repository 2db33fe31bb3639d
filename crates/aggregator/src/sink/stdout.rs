//! writer 싱크 -- 개행 구분 JSON을 `AsyncWrite`에 기록합니다.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use stackfold_core::error::DeliveryError;
use stackfold_core::pipeline::{BoxFuture, DeliverySink};
use stackfold_core::types::LogicalMessage;

use super::encode::encode_json;

/// 임의의 writer에 메시지를 한 줄씩 기록하는 싱크
pub struct WriterSink<W> {
    name: &'static str,
    writer: W,
}

/// 표준 출력 싱크
pub type StdoutSink = WriterSink<tokio::io::Stdout>;

impl StdoutSink {
    /// 표준 출력에 기록하는 싱크를 생성합니다.
    pub fn stdout() -> Self {
        WriterSink::new("stdout", tokio::io::stdout())
    }
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: &'static str, writer: W) -> Self {
        Self { name, writer }
    }

    /// 내부 writer를 반환합니다.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> DeliverySink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        self.name
    }

    fn deliver<'a>(
        &'a mut self,
        message: &'a LogicalMessage,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let mut payload = encode_json(message)?;
            payload.push(b'\n');
            self.writer.write_all(&payload).await?;
            self.writer.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.writer.flush().await {
                tracing::debug!(sink = self.name, error = %e, "flush on close failed");
            }
        })
    }
}
