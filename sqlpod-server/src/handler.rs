//! Operation handlers.

use crate::registry::{VarError, VariableRegistry};
use sqlpod_protocol::{Description, Dict, InvokeError, InvokeRequest, Response};
use std::sync::Arc;
use tokio::task::JoinError;

/// Handles `describe` and `invoke` against a shared registry.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    registry: Arc<VariableRegistry>,
}

impl CommandHandler {
    pub fn new(registry: Arc<VariableRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Builds the `describe` response from the registry contents.
    pub fn handle_describe(&self) -> Response {
        Response::Describe(Description::new(self.registry.describe()))
    }

    /// Validates an invoke message, runs the variable and builds the reply.
    ///
    /// Never fails: every problem becomes an exception response, carrying
    /// the request id once it is known.
    pub async fn handle_invoke(&self, msg: &Dict) -> Response {
        let InvokeRequest { id, var, args } = match InvokeRequest::parse(msg) {
            Ok(request) => request,
            Err(err) => return err.into(),
        };

        let Some(handler) = self.registry.lookup(&var) else {
            tracing::debug!("[{}] No such var {:?}", id, var);
            return Response::exception(Some(&id), format!("No such var: \"{}\"", var));
        };

        tracing::debug!("[{}] Invoking {}", id, var);
        let result = tokio::task::spawn_blocking(move || handler.invoke(&args)).await;

        match result {
            Ok(Ok(output)) => Response::value(id, output.into_wire()),
            Ok(Err(VarError { message, data })) => InvokeError {
                id: Some(id),
                message,
                data,
            }
            .into(),
            Err(join_err) => {
                tracing::error!("[{}] {} did not complete: {}", id, var, join_err);
                Response::exception(Some(&id), failure_message(&var, join_err))
            }
        }
    }
}

fn failure_message(var: &str, err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("{} failed: {}", var, reason)
    } else {
        format!("{} was cancelled", var)
    }
}
