// Command Orchestration
//
// Per inbound event: authorize, acknowledge, optionally run the timed restart
// warnings, execute the configured remote command, and report exactly one
// final message. Every failure past authorization is turned into that final
// message; nothing here is retried and nothing can be cancelled.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::relay::auth::Authorizer;
use crate::relay::config::{self, ConfigProvider};
use crate::relay::credential;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::executor::RemoteExecutor;
use crate::relay::types::*;

pub const NOT_AUTHORIZED: &str = "Not authorized.";

/// One restart warning: broadcast `message`, then wait `delay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningStep {
    pub message: String,
    pub delay: Duration,
}

impl WarningStep {
    pub fn new(message: impl Into<String>, delay: Duration) -> Self {
        Self {
            message: message.into(),
            delay,
        }
    }
}

/// Ordered warning steps run before a non-forced restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSchedule {
    steps: Vec<WarningStep>,
}

impl RestartSchedule {
    pub fn new(steps: Vec<WarningStep>) -> Self {
        Self { steps }
    }

    /// 90s, 20s, 10s: two minutes of escalating warnings
    pub fn canonical() -> Self {
        Self::new(vec![
            WarningStep::new(
                "Server restart in 2 minutes. Please finish what you are doing.",
                Duration::from_secs(90),
            ),
            WarningStep::new(
                "Server restart in 30 seconds! Find a safe spot.",
                Duration::from_secs(20),
            ),
            WarningStep::new(
                "Server restart in 10 seconds! Log out now.",
                Duration::from_secs(10),
            ),
        ])
    }

    pub fn steps(&self) -> &[WarningStep] {
        &self.steps
    }

    pub fn total_delay(&self) -> Duration {
        self.steps.iter().map(|step| step.delay).sum()
    }
}

impl Default for RestartSchedule {
    fn default() -> Self {
        Self::canonical()
    }
}

/// Entry point for command events
pub struct Orchestrator {
    authorizer: Arc<dyn Authorizer>,
    executor: Arc<dyn RemoteExecutor>,
    config: Arc<dyn ConfigProvider>,
    schedule: RestartSchedule,
}

impl Orchestrator {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        executor: Arc<dyn RemoteExecutor>,
        config: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            authorizer,
            executor,
            config,
            schedule: RestartSchedule::canonical(),
        }
    }

    pub fn with_schedule(mut self, schedule: RestartSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Handle `event` on its own task and return its outcome stream.
    /// The stream ends after the [`Outcome::Final`] element.
    pub fn handle(self: &Arc<Self>, event: CommandEvent) -> mpsc::UnboundedReceiver<Outcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(event, &tx).await;
        });
        rx
    }

    /// Drive one event to its final outcome on the current task
    pub async fn run(&self, event: CommandEvent, outcomes: &mpsc::UnboundedSender<Outcome>) {
        let id = event.interaction_id;

        if !self.authorizer.is_allowed(&event) {
            log::info!(
                "[{}] {} rejected for user {}",
                id,
                event.command,
                event.invoker.user_id
            );
            emit(outcomes, Outcome::Final(Reply::ephemeral(NOT_AUTHORIZED)));
            return;
        }

        log::info!(
            "[{}] {} authorized for user {}",
            id,
            event.command,
            event.invoker.user_id
        );
        emit(outcomes, Outcome::Deferred);

        let reply = match self.dispatch(&event, outcomes).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[{}] {} failed: {}", id, event.command, e);
                Reply::ephemeral(truncate(&format!("Error: {}", e), MAX_REPLY_CHARS))
            }
        };

        emit(outcomes, Outcome::Final(reply));
    }

    async fn dispatch(
        &self,
        event: &CommandEvent,
        outcomes: &mpsc::UnboundedSender<Outcome>,
    ) -> RelayResult<Reply> {
        match event.command {
            CommandKind::Restart => {
                let command = config::command_for(self.config.as_ref(), event.command)?;
                self.run_warnings(event, outcomes).await;
                self.restart(&command).await
            }
            CommandKind::RestartForce => {
                let command = config::command_for(self.config.as_ref(), event.command)?;
                self.restart(&command).await
            }
            CommandKind::Status => self.status().await,
            CommandKind::AdminMessage => self.admin_message(event).await,
        }
    }

    // A failed broadcast is reported to the invoker but does not stop the sequence.
    async fn run_warnings(&self, event: &CommandEvent, outcomes: &mpsc::UnboundedSender<Outcome>) {
        let total = self.schedule.steps().len();

        for (index, step) in self.schedule.steps().iter().enumerate() {
            let progress = match self.broadcast(&step.message).await {
                Ok(()) => format!("Warning {}/{} sent: {}", index + 1, total, step.message),
                Err(e) => {
                    log::warn!(
                        "[{}] warning broadcast {}/{} failed: {}",
                        event.interaction_id,
                        index + 1,
                        total,
                        e
                    );
                    truncate(
                        &format!(
                            "Warning {}/{} could not be broadcast ({}): {}",
                            index + 1,
                            total,
                            e,
                            step.message
                        ),
                        MAX_REPLY_CHARS,
                    )
                }
            };
            emit(outcomes, Outcome::Progress { content: progress });

            tokio::time::sleep(step.delay).await;
        }
    }

    async fn broadcast(&self, message: &str) -> RelayResult<()> {
        let command = config::broadcast_command(self.config.as_ref(), message)?;
        let result = self.remote(&command).await?;
        if result.success() {
            Ok(())
        } else {
            Err(RelayError::RemoteCommandFailure {
                exit_code: result.exit_code,
                output: result.failure_output(),
            })
        }
    }

    async fn restart(&self, command: &str) -> RelayResult<Reply> {
        let result = self.remote(command).await?;
        Ok(if result.success() {
            Reply::ephemeral("Restart command completed successfully.")
        } else {
            Reply::ephemeral(failure_message("Restart", &result))
        })
    }

    async fn status(&self) -> RelayResult<Reply> {
        let command = config::command_for(self.config.as_ref(), CommandKind::Status)?;
        let result = self.remote(&command).await?;
        Ok(if result.success() {
            let stdout = if result.stdout.trim().is_empty() {
                NO_OUTPUT
            } else {
                result.stdout.as_str()
            };
            Reply::ephemeral(truncate(stdout, MAX_REPLY_CHARS))
        } else {
            Reply::ephemeral(failure_message("Status check", &result))
        })
    }

    async fn admin_message(&self, event: &CommandEvent) -> RelayResult<Reply> {
        let text = event
            .argument(MESSAGE_ARGUMENT)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| RelayError::invalid_argument("message is required"))?;

        let template = config::command_for(self.config.as_ref(), CommandKind::AdminMessage)?;
        let result = self.remote(&config::substitute(&template, text)).await?;
        Ok(if result.success() {
            Reply::ephemeral(truncate(&format!("Message sent: {}", text), MAX_REPLY_CHARS))
        } else {
            Reply::ephemeral(failure_message("Admin message", &result))
        })
    }

    // Credentials are resolved afresh for every remote call.
    async fn remote(&self, command: &str) -> RelayResult<ExecutionResult> {
        let credential = credential::resolve(self.config.as_ref())?;
        self.executor.execute(&credential, command).await
    }
}

fn failure_message(operation: &str, result: &ExecutionResult) -> String {
    let header = format!("{} failed (exit code {}):\n", operation, result.exit_code);
    format!(
        "{}{}",
        header,
        truncate(&result.failure_output(), MAX_REPLY_CHARS - header.chars().count())
    )
}

fn emit(outcomes: &mpsc::UnboundedSender<Outcome>, outcome: Outcome) {
    // The adapter may have gone away; the sequence still runs to completion.
    let _ = outcomes.send(outcome);
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
