// Platform Adapter
//
// The chat platform sits behind `PlatformAdapter`. `relay` forwards one
// outcome stream to it; `ConsoleAdapter` is a line-oriented JSON adapter
// used by the binary and for local operation.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::relay::error::{RelayError, RelayResult};
use crate::relay::orchestrator::Orchestrator;
use crate::relay::types::*;

/// Outbound calls to the chat platform for one interaction
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Provisional invoker-only acknowledgment
    async fn defer(&self, interaction: InteractionId) -> RelayResult<()>;

    /// Intermediate progress message
    async fn followup(&self, interaction: InteractionId, content: &str) -> RelayResult<()>;

    /// Terminal message
    async fn reply(&self, interaction: InteractionId, reply: &Reply) -> RelayResult<()>;
}

/// Forward an outcome stream to `adapter` until the final message is delivered.
///
/// Delivery failures are logged and skipped; the orchestration behind the
/// stream keeps running either way.
pub async fn relay<A: PlatformAdapter + ?Sized>(
    adapter: &A,
    interaction: InteractionId,
    mut outcomes: mpsc::UnboundedReceiver<Outcome>,
) {
    while let Some(outcome) = outcomes.recv().await {
        let delivered = match &outcome {
            Outcome::Deferred => adapter.defer(interaction).await,
            Outcome::Progress { content } => adapter.followup(interaction, content).await,
            Outcome::Final(reply) => adapter.reply(interaction, reply).await,
        };

        if let Err(e) = delivered {
            log::warn!("[{}] failed to deliver outcome: {}", interaction, e);
        }

        if outcome.is_final() {
            break;
        }
    }
}

/// Parse one JSON event line and apply the checks the platform would make
/// before the event reaches the orchestrator.
pub fn parse_event(line: &str) -> RelayResult<CommandEvent> {
    let event: CommandEvent = serde_json::from_str(line)
        .map_err(|e| RelayError::invalid_argument(format!("malformed event: {}", e)))?;

    if event.command == CommandKind::AdminMessage {
        let text = event.argument(MESSAGE_ARGUMENT).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(RelayError::invalid_argument("message is required"));
        }
        if text.chars().count() > MAX_ADMIN_MESSAGE_CHARS {
            return Err(RelayError::invalid_argument(format!(
                "message exceeds {} characters",
                MAX_ADMIN_MESSAGE_CHARS
            )));
        }
    }

    Ok(event)
}

#[derive(Serialize)]
struct ConsoleLine<'a> {
    interaction_id: Option<InteractionId>,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

/// Writes each outcome as one JSON line
pub struct ConsoleAdapter<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> ConsoleAdapter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn write(&self, interaction: Option<InteractionId>, outcome: &Outcome) -> RelayResult<()> {
        let mut line = serde_json::to_string(&ConsoleLine {
            interaction_id: interaction,
            outcome,
        })
        .map_err(|e| RelayError::internal(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> PlatformAdapter for ConsoleAdapter<W> {
    async fn defer(&self, interaction: InteractionId) -> RelayResult<()> {
        self.write(Some(interaction), &Outcome::Deferred).await
    }

    async fn followup(&self, interaction: InteractionId, content: &str) -> RelayResult<()> {
        let outcome = Outcome::Progress {
            content: content.to_string(),
        };
        self.write(Some(interaction), &outcome).await
    }

    async fn reply(&self, interaction: InteractionId, reply: &Reply) -> RelayResult<()> {
        self.write(Some(interaction), &Outcome::Final(reply.clone())).await
    }
}

/// Read events line by line from `input`, handle each concurrently, and
/// return once input is exhausted and every orchestration has reported.
///
/// A line that is not valid UTF-8 or not a valid event is rejected on its own
/// and reading continues. A read error stops intake, but events already
/// accepted still run to their final message before the error is returned.
pub async fn serve<R, W>(
    orchestrator: Arc<Orchestrator>,
    mut input: R,
    adapter: Arc<ConsoleAdapter<W>>,
) -> RelayResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut in_flight = JoinSet::new();
    let mut buf = Vec::new();

    let read_error = loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf).await {
            Ok(0) => break None,
            Ok(_) => {}
            Err(e) => break Some(e),
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                let e = RelayError::invalid_argument(format!("event is not valid UTF-8: {}", e));
                reject(adapter.as_ref(), e).await;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let event = match parse_event(line) {
            Ok(event) => event,
            Err(e) => {
                reject(adapter.as_ref(), e).await;
                continue;
            }
        };

        log::debug!("[{}] received {}", event.interaction_id, event.command);
        let interaction = event.interaction_id;
        let outcomes = orchestrator.handle(event);
        let adapter = Arc::clone(&adapter);
        in_flight.spawn(async move {
            relay(adapter.as_ref(), interaction, outcomes).await;
        });
    };

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            log::error!("Outcome relay task failed: {}", e);
        }
    }

    match read_error {
        Some(e) => {
            log::error!("Reading command events failed: {}", e);
            Err(e.into())
        }
        None => Ok(()),
    }
}

async fn reject<W: AsyncWrite + Unpin + Send>(adapter: &ConsoleAdapter<W>, error: RelayError) {
    log::warn!("Rejected inbound event: {}", error);
    let reply = Outcome::Final(Reply::ephemeral(error.to_string()));
    if let Err(e) = adapter.write(None, &reply).await {
        log::warn!("Failed to report rejected event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingAdapter {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl PlatformAdapter for RecordingAdapter {
        async fn defer(&self, _interaction: InteractionId) -> RelayResult<()> {
            self.calls.lock().unwrap().push("defer".into());
            Ok(())
        }

        async fn followup(&self, _interaction: InteractionId, content: &str) -> RelayResult<()> {
            self.calls.lock().unwrap().push(format!("followup:{}", content));
            Err(RelayError::internal("platform unavailable"))
        }

        async fn reply(&self, _interaction: InteractionId, reply: &Reply) -> RelayResult<()> {
            self.calls.lock().unwrap().push(format!("reply:{}", reply.content));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_relay_stops_after_final_and_tolerates_delivery_errors() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Outcome::Deferred).unwrap();
        tx.send(Outcome::Progress { content: "1/3".into() }).unwrap();
        tx.send(Outcome::Final(Reply::ephemeral("done"))).unwrap();
        tx.send(Outcome::Progress { content: "late".into() }).unwrap();

        let adapter = RecordingAdapter::default();
        relay(&adapter, uuid::Uuid::new_v4(), rx).await;

        assert_eq!(
            *adapter.calls.lock().unwrap(),
            vec!["defer", "followup:1/3", "reply:done"]
        );
    }

    #[test]
    fn test_parse_event_enforces_message_limit() {
        let ok = format!(
            r#"{{"invoker":{{"user_id":"1"}},"command":"admin-message","arguments":{{"message":"{}"}}}}"#,
            "a".repeat(MAX_ADMIN_MESSAGE_CHARS)
        );
        assert!(parse_event(&ok).is_ok());

        let too_long = format!(
            r#"{{"invoker":{{"user_id":"1"}},"command":"admin-message","arguments":{{"message":"{}"}}}}"#,
            "a".repeat(MAX_ADMIN_MESSAGE_CHARS + 1)
        );
        assert!(matches!(parse_event(&too_long), Err(RelayError::InvalidArgument(_))));

        let missing = r#"{"invoker":{"user_id":"1"},"command":"admin-message"}"#;
        assert!(parse_event(missing).is_err());
    }

    #[test]
    fn test_parse_event_rejects_unknown_commands() {
        let line = r#"{"invoker":{"user_id":"1"},"command":"shutdown"}"#;
        assert!(matches!(parse_event(line), Err(RelayError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_console_adapter_writes_json_lines() {
        let adapter = ConsoleAdapter::new(Vec::new());
        let id = uuid::Uuid::new_v4();
        adapter.defer(id).await.unwrap();
        adapter.reply(id, &Reply::ephemeral("ok")).await.unwrap();

        let output = String::from_utf8(adapter.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "deferred");
        assert_eq!(lines[0]["interaction_id"], id.to_string());
        assert_eq!(lines[1]["kind"], "final");
        assert_eq!(lines[1]["content"], "ok");
    }
}
