//! Pod dispatch loop.

use crate::error::ServerError;
use crate::handler::CommandHandler;
use crate::registry::VariableRegistry;
use crate::session::{Session, SessionState};
use crate::transport::MessageTransport;
use sqlpod_protocol::{Dict, Operation, ProtocolError, Response};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

/// Message sent, without an id, when the input closes.
pub const END_OF_STREAM: &str = "Reached end of stream";

/// Requests shutdown of a running [`Server`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Asks the server to stop. Takes effect before the next message is read.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Serves one client over a message transport until shutdown or end of input.
///
/// Messages are handled one at a time, in arrival order.
pub struct Server<R, W> {
    transport: MessageTransport<R, W>,
    handler: CommandHandler,
    session: Session,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<R, W> Server<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new server.
    pub fn new(transport: MessageTransport<R, W>, registry: Arc<VariableRegistry>) -> Self {
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        Self {
            transport,
            handler: CommandHandler::new(registry),
            session: Session::new(),
            shutdown,
            shutdown_rx,
        }
    }

    /// Returns a handle that can stop the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Consumes the server, returning the underlying streams.
    pub fn into_inner(self) -> (R, W) {
        self.transport.into_inner()
    }

    /// Runs the dispatch loop.
    ///
    /// Returns `Ok(())` after a shutdown request or once the input closes.
    /// Only I/O failures on the streams themselves are returned as errors.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        tracing::info!(
            session = %self.session.id,
            vars = self.handler.registry().len(),
            "Pod listening"
        );

        let result = self.serve().await;
        self.session.set_state(SessionState::Terminated);

        tracing::info!(
            session = %self.session.id,
            requests = self.session.request_count(),
            errors = self.session.error_count(),
            uptime_ms = self.session.age().as_millis() as u64,
            "Pod stopped"
        );
        result
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            self.session.set_state(SessionState::Listening);

            let received = tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }

                received = self.transport.receive() => received,
            };

            match received {
                Ok(msg) => {
                    self.session.set_state(SessionState::Dispatching);
                    self.session.record_request();
                    self.dispatch(msg).await?;
                }
                Err(e) if e.is_end_of_stream() => {
                    tracing::info!("Input closed: {}", e);
                    if let Err(send_err) = self.send(&Response::exception(None, END_OF_STREAM)).await
                    {
                        tracing::debug!("Could not report end of stream: {}", send_err);
                    }
                    return Ok(());
                }
                Err(ProtocolError::Io(e)) => {
                    tracing::error!("Read error: {}", e);
                    return Err(ServerError::Io(e));
                }
                Err(e) => {
                    tracing::warn!("Malformed message: {}", e);
                    let message = format!("Malformed message: {}", e);
                    self.send(&Response::exception(None, message)).await?;
                }
            }
        }
    }

    async fn dispatch(&mut self, msg: Dict) -> Result<(), ServerError> {
        let op = match Operation::from_message(&msg) {
            Ok(Some(op)) => op,
            Ok(None) => {
                tracing::debug!("Ignoring message without op");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Rejecting message: {}", e);
                return self
                    .send(&Response::exception(None, format!("Malformed message: {}", e)))
                    .await;
            }
        };

        tracing::debug!(session = %self.session.id, "Request: {}", op);

        match op {
            Operation::Describe => {
                let response = self.handler.handle_describe();
                self.send(&response).await
            }
            Operation::Invoke => {
                let response = self.handler.handle_invoke(&msg).await;
                self.send(&response).await
            }
            Operation::Shutdown => {
                tracing::info!("Shutdown requested by client");
                self.shutdown();
                Ok(())
            }
            Operation::Unknown(name) => {
                tracing::debug!("Ignoring unknown op {:?}", name);
                Ok(())
            }
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), ServerError> {
        if let Response::Exception(err) = response {
            self.session.record_error();
            tracing::debug!(
                id = err.id.as_deref().unwrap_or("-"),
                "Exception: {}",
                err.message
            );
        }
        self.transport.send_response(response).await?;
        Ok(())
    }
}
