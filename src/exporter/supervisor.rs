// SPDX-License-Identifier: Apache-2.0

//! Connection supervisor: owns the socket lifecycle.
//!
//! State machine: Idle -> Connecting -> Handshaking -> Streaming ->
//! (Closing | Failed) -> Backoff -> Connecting ... The supervisor is the
//! only component that touches the transport; monitored files are polled in
//! registration order inside the streaming loop, so each file's lines reach
//! the wire in extraction order. Committed cursor offsets survive session
//! failures, which is what makes resumption replay only uncommitted data.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt as TokioStreamExt;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exporter::auth::{self, AgentIdentity};
use crate::exporter::errors::ExporterError;
use crate::exporter::frame::FrameCodec;
use crate::exporter::message::Message;
use crate::exporter::retry::{Backoff, RetryConfig};
use crate::exporter::tls::{self, TlsOptions};
use crate::tail::MonitoredFile;

/// Anything the framed codec can run over.
pub trait Transport: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> Transport for T {}

type FramedTransport = Framed<Box<dyn Transport>, FrameCodec>;
type FrameSink = SplitSink<FramedTransport, Message>;
type FrameStream = SplitStream<FramedTransport>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub host: String,
    pub port: u16,
    pub identity: AgentIdentity,
    pub use_tls: bool,
    pub tls: TlsOptions,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub retry: RetryConfig,
}

impl SupervisorConfig {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

enum SessionEnd {
    /// Cancellation was requested; the transport was closed best-effort.
    Shutdown,
    /// The session died; reconnect after backoff.
    Failed(ExporterError),
}

pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    files: Vec<MonitoredFile>,
    backoff: Backoff,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig, files: Vec<MonitoredFile>) -> Self {
        let backoff = Backoff::new(config.retry.clone());
        Self {
            config,
            files,
            backoff,
        }
    }

    /// Run until cancelled. Network-class failures are retried forever;
    /// authentication rejections are surfaced loudly and retried at the
    /// backoff ceiling.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_session(&cancel).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(err) => {
                    if err.is_auth() {
                        // Bad credentials are a misconfiguration; make sure
                        // the operator sees it, and never retry tightly.
                        error!(error = %err, "collector rejected authentication, check the configured password");
                        self.backoff.escalate();
                    } else {
                        warn!(error = %err, "session failed");
                    }

                    let delay = self.backoff.next_delay();
                    info!(
                        state = "backoff",
                        attempt = self.backoff.attempts(),
                        delay = ?delay,
                        "waiting before reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!("connection supervisor stopped");
        Ok(())
    }

    async fn run_session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let endpoint = self.config.endpoint();
        debug!(state = "connecting", endpoint = %endpoint);

        let connect = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&endpoint),
        );
        let tcp = tokio::select! {
            r = connect => match r {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return SessionEnd::Failed(ExporterError::Network(format!(
                        "connect to {} failed: {}",
                        endpoint, e
                    )))
                }
                Err(_) => {
                    return SessionEnd::Failed(ExporterError::Timeout(format!(
                        "connect to {} timed out after {:?}",
                        endpoint, self.config.connect_timeout
                    )))
                }
            },
            _ = cancel.cancelled() => return SessionEnd::Shutdown,
        };
        let _ = tcp.set_nodelay(true);

        let transport: Box<dyn Transport> = if self.config.use_tls {
            let tls_config = match tls::build_client_config(&self.config.tls) {
                Ok(c) => Arc::new(c),
                Err(e) => {
                    return SessionEnd::Failed(ExporterError::Network(format!(
                        "TLS configuration failed: {}",
                        e
                    )))
                }
            };
            match tls::connect(tcp, &self.config.host, tls_config).await {
                Ok(stream) => Box::new(stream),
                Err(e) => {
                    return SessionEnd::Failed(ExporterError::Network(format!(
                        "TLS handshake with {} failed: {}",
                        endpoint, e
                    )))
                }
            }
        } else {
            Box::new(tcp)
        };

        let framed = Framed::new(transport, FrameCodec::new());
        let (mut sink, mut stream) = framed.split();

        debug!(state = "handshaking", client = %self.config.identity.client);
        let handshake = auth::handshake(
            &mut sink,
            &mut stream,
            &self.config.identity,
            self.config.handshake_timeout,
        );
        tokio::select! {
            r = handshake => {
                if let Err(e) = r {
                    return SessionEnd::Failed(e);
                }
            }
            _ = cancel.cancelled() => return SessionEnd::Shutdown,
        }

        info!(state = "streaming", endpoint = %endpoint, "authenticated session established");
        self.backoff.reset();

        let end = self.stream_lines(&mut sink, &mut stream, cancel).await;

        // Whatever ended the session, drop uncommitted tail state so the
        // next session resumes from committed offsets.
        for file in &mut self.files {
            file.rewind();
        }

        end
    }

    async fn stream_lines(
        &mut self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut poll_tick = interval_at(Instant::now(), self.config.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_tick = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(state = "closing", "shutdown requested, closing transport");
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }

                msg = TokioStreamExt::next(stream) => match msg {
                    Some(Ok(Message::Error { reason })) => {
                        return SessionEnd::Failed(ExporterError::Protocol(format!(
                            "collector reported an error: {}",
                            reason
                        )));
                    }
                    Some(Ok(other)) => {
                        debug!(message = ?other, "ignoring unexpected message from collector");
                    }
                    Some(Err(e)) => return SessionEnd::Failed(ExporterError::from_io(e)),
                    None => {
                        return SessionEnd::Failed(ExporterError::Network(
                            "connection closed by collector".to_string(),
                        ))
                    }
                },

                _ = poll_tick.tick() => {
                    for i in 0..self.files.len() {
                        if cancel.is_cancelled() {
                            let _ = sink.close().await;
                            return SessionEnd::Shutdown;
                        }

                        let lines = self.files[i].poll().await;
                        if lines.is_empty() {
                            // Still commits: bytes consumed by dropped
                            // (undecodable) lines must not be re-read.
                            self.files[i].commit();
                            continue;
                        }

                        let count = lines.len();
                        let send = async {
                            for line in lines {
                                sink.feed(Message::from(line)).await?;
                            }
                            sink.flush().await
                        };
                        let sent = tokio::select! {
                            r = send => r,
                            _ = cancel.cancelled() => {
                                self.files[i].rewind();
                                return SessionEnd::Shutdown;
                            }
                        };

                        match sent {
                            Ok(()) => {
                                self.files[i].commit();
                                debug!(file = self.files[i].name(), lines = count, "batch delivered");
                            }
                            Err(e) => return SessionEnd::Failed(ExporterError::from_io(e)),
                        }
                    }
                }

                _ = heartbeat_tick.tick() => {
                    if let Err(e) = sink.send(Message::Heartbeat).await {
                        return SessionEnd::Failed(ExporterError::from_io(e));
                    }
                }
            }
        }
    }
}
