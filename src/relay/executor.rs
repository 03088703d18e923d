// Remote Command Execution
//
// One call opens one session, runs one command, and closes the session.
// There is no pooling, reconnection, or retry at this layer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::relay::credential::RemoteCredential;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::types::ExecutionResult;

/// Runs a single command string on the remote host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        credential: &RemoteCredential,
        command: &str,
    ) -> RelayResult<ExecutionResult>;
}

/// An established, authenticated session. Implementations block.
pub trait RemoteSession: Send {
    /// Run `command` in a fresh channel and collect its output and exit code
    fn run(&mut self, command: &str) -> RelayResult<ExecutionResult>;

    /// Tear the session down; called exactly once by [`SessionGuard`]
    fn close(&mut self);
}

/// Opens sessions to the remote host. Implementations block.
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteSession + 'static;

    fn connect(&self, credential: &RemoteCredential) -> RelayResult<Self::Session>;
}

/// Owns a session for the duration of one call and closes it on every exit path
pub struct SessionGuard<S: RemoteSession> {
    session: Option<S>,
}

impl<S: RemoteSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn run(&mut self, command: &str) -> RelayResult<ExecutionResult> {
        match self.session.as_mut() {
            Some(session) => session.run(command),
            None => Err(RelayError::internal("session already closed")),
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl<S: RemoteSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Connect, run once, close
pub fn execute_blocking<C: Connector>(
    connector: &C,
    credential: &RemoteCredential,
    command: &str,
) -> RelayResult<ExecutionResult> {
    let session = connector.connect(credential).map_err(|e| match e {
        RelayError::Connection(_) | RelayError::HostKeyMismatch { .. } => e,
        other => RelayError::connection(other.to_string()),
    })?;
    log::debug!("Session established to {}", credential.address());

    let mut guard = SessionGuard::new(session);
    let result = guard.run(command);
    guard.close();
    log::debug!("Session to {} closed", credential.address());

    result
}

/// [`RemoteExecutor`] that drives a blocking [`Connector`] on the blocking thread pool
pub struct SessionExecutor<C: Connector> {
    connector: Arc<C>,
}

impl<C: Connector> SessionExecutor<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }
}

#[async_trait]
impl<C: Connector> RemoteExecutor for SessionExecutor<C> {
    async fn execute(
        &self,
        credential: &RemoteCredential,
        command: &str,
    ) -> RelayResult<ExecutionResult> {
        let connector = Arc::clone(&self.connector);
        let credential = credential.clone();
        let command = command.to_string();

        let result = tokio::task::spawn_blocking(move || {
            execute_blocking(connector.as_ref(), &credential, &command)
        })
        .await
        .map_err(|e| RelayError::internal(format!("remote execution task failed: {}", e)))?;

        match &result {
            Ok(output) => log::info!("Remote command exited with code {}", output.exit_code),
            Err(e) => log::warn!("Remote command failed: {}", e),
        }

        result
    }
}
