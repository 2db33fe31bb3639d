//! Logstash 싱크 -- UDP 또는 TCP로 JSON 메시지를 전송합니다.
//!
//! 연결은 첫 전송 시점에 맺고, 실패하면 끊은 뒤 다음 시도에서 다시 연결합니다.
//! 시도 사이에는 지수 백오프로 대기합니다. 인코딩 실패처럼 재시도해도 결과가
//! 같은 에러는 바로 반환합니다.
//!
//! UDP는 메시지 하나를 데이터그램 하나로 보내므로 인코딩 결과가
//! [`UDP_MAX_PAYLOAD`]를 넘으면 전송하지 않습니다.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::counter;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use stackfold_core::error::DeliveryError;
use stackfold_core::metrics as m;
use stackfold_core::pipeline::{BoxFuture, DeliverySink};
use stackfold_core::types::LogicalMessage;

use super::encode::encode_json;
use super::{SinkConfig, Transport};

/// UDP 데이터그램 하나에 담을 수 있는 최대 페이로드 (IPv4 기준)
pub const UDP_MAX_PAYLOAD: usize = 65_507;

/// UDP 전송 시 메시지 텍스트 상한 (JSON 필드와 메타데이터 여유분 제외)
pub const UDP_MAX_MESSAGE_BYTES: usize = 60 * 1024;

enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// Logstash 전송 싱크
pub struct LogstashSink {
    config: SinkConfig,
    name: &'static str,
    connection: Option<Connection>,
    /// 한 번이라도 연결에 성공했는지 (재연결 메트릭 구분용)
    connected_before: bool,
}

impl LogstashSink {
    /// 새 싱크를 생성합니다. 연결은 하지 않습니다.
    pub fn new(config: SinkConfig) -> Self {
        let name = match config.transport {
            Transport::Tcp => "logstash-tcp",
            _ => "logstash-udp",
        };
        Self {
            config,
            name,
            connection: None,
            connected_before: false,
        }
    }

    /// 현재 연결 여부
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn resolve(&self) -> Result<SocketAddr, DeliveryError> {
        let mut addrs = tokio::net::lookup_host(self.config.address.as_str())
            .await
            .map_err(|e| self.connect_error(e))?;
        addrs.next().ok_or_else(|| DeliveryError::Connect {
            target: self.config.address.clone(),
            reason: "address resolved to nothing".to_owned(),
        })
    }

    async fn connect(&self) -> Result<Connection, DeliveryError> {
        let target = self.resolve().await?;
        let millis = duration_millis(self.config.connect_timeout);

        let connection = match self.config.transport {
            Transport::Tcp => {
                let stream = timeout(self.config.connect_timeout, TcpStream::connect(target))
                    .await
                    .map_err(|_| DeliveryError::Timeout { millis })?
                    .map_err(|e| self.connect_error(e))?;
                stream.set_nodelay(true).map_err(|e| self.connect_error(e))?;
                Connection::Tcp(stream)
            }
            _ => {
                let bind: SocketAddr = if target.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(bind)
                    .await
                    .map_err(|e| self.connect_error(e))?;
                socket
                    .connect(target)
                    .await
                    .map_err(|e| self.connect_error(e))?;
                Connection::Udp(socket)
            }
        };

        tracing::debug!(
            sink = self.name,
            target = %target,
            "connected to logstash"
        );
        Ok(connection)
    }

    fn connect_error(&self, e: std::io::Error) -> DeliveryError {
        DeliveryError::Connect {
            target: self.config.address.clone(),
            reason: e.to_string(),
        }
    }

    /// 한 번의 전송 시도. 실패하면 연결을 버립니다.
    async fn attempt(&mut self, payload: &[u8]) -> Result<(), DeliveryError> {
        if self.connection.is_none() {
            let connection = self.connect().await?;
            if self.connected_before {
                counter!(m::SINK_RECONNECTS_TOTAL, m::LABEL_SINK => self.name).increment(1);
            }
            self.connected_before = true;
            self.connection = Some(connection);
        }

        let write_timeout = self.config.write_timeout;
        let result = match self.connection.as_mut() {
            Some(Connection::Udp(socket)) => timeout(write_timeout, socket.send(payload))
                .await
                .map(|sent| sent.map(|_| ())),
            Some(Connection::Tcp(stream)) => timeout(write_timeout, async {
                stream.write_all(payload).await?;
                stream.write_all(b"\n").await?;
                stream.flush().await
            })
            .await,
            None => return Err(DeliveryError::Closed),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.connection = None;
                Err(DeliveryError::Write(e))
            }
            Err(_) => {
                self.connection = None;
                Err(DeliveryError::Timeout {
                    millis: duration_millis(write_timeout),
                })
            }
        }
    }

    async fn send_with_retry(&mut self, message: &LogicalMessage) -> Result<(), DeliveryError> {
        let payload = encode_json(message)?;
        if self.config.transport == Transport::Udp && payload.len() > UDP_MAX_PAYLOAD {
            return Err(DeliveryError::Encode(format!(
                "encoded message is {} bytes, exceeds the UDP datagram limit of {UDP_MAX_PAYLOAD}",
                payload.len()
            )));
        }

        let attempts = self.config.retry_attempts.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.config.backoff_for(attempt);
                tracing::debug!(
                    sink = self.name,
                    message_id = %message.id,
                    attempt,
                    backoff_ms = duration_millis(backoff),
                    error = %last_error,
                    "retrying delivery"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.attempt(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(DeliveryError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

impl DeliverySink for LogstashSink {
    fn name(&self) -> &str {
        self.name
    }

    fn deliver<'a>(
        &'a mut self,
        message: &'a LogicalMessage,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(self.send_with_retry(message))
    }

    fn max_message_bytes(&self) -> Option<usize> {
        match self.config.transport {
            Transport::Udp => Some(UDP_MAX_MESSAGE_BYTES),
            _ => None,
        }
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(Connection::Tcp(mut stream)) = self.connection.take() {
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!(sink = self.name, error = %e, "tcp shutdown failed");
                }
            }
        })
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
