use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one inbound interaction
pub type InteractionId = Uuid;

/// Chat-platform user identifier
pub type UserId = String;

/// Chat-platform role identifier
pub type RoleId = String;

/// Upper bound on any text surfaced back to the invoker, in characters
pub const MAX_REPLY_CHARS: usize = 1900;

/// Upper bound on the `admin-message` text argument, in characters
pub const MAX_ADMIN_MESSAGE_CHARS: usize = 1800;

/// Name of the text argument carried by `admin-message`
pub const MESSAGE_ARGUMENT: &str = "message";

/// Placeholder shown when a failed command produced no output at all
pub const NO_OUTPUT: &str = "no output";

/// Identity of the user who issued a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoker {
    pub user_id: UserId,
    /// Roles held in the context the command was issued from; empty when unknown
    #[serde(default)]
    pub role_ids: BTreeSet<RoleId>,
    /// Platform-level administrator signal
    #[serde(default)]
    pub administrator: bool,
}

impl Invoker {
    /// Create an invoker with no roles and no elevated permission
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role_ids: BTreeSet::new(),
            administrator: false,
        }
    }

    pub fn with_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.role_ids.insert(role_id.into());
        self
    }

    pub fn with_administrator(mut self, administrator: bool) -> Self {
        self.administrator = administrator;
        self
    }
}

/// Supported slash commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Restart the managed service after the timed warning sequence
    Restart,
    /// Restart the managed service immediately
    RestartForce,
    /// Query the managed service status
    Status,
    /// Send an administrative message through the managed service
    AdminMessage,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Restart => "restart",
            CommandKind::RestartForce => "restart-force",
            CommandKind::Status => "status",
            CommandKind::AdminMessage => "admin-message",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One inbound slash-command invocation, read-only to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    #[serde(default = "Uuid::new_v4")]
    pub interaction_id: InteractionId,
    pub invoker: Invoker,
    pub command: CommandKind,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
}

impl CommandEvent {
    /// Create an event with a fresh interaction id and no arguments
    pub fn new(invoker: Invoker, command: CommandKind) -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            invoker,
            command,
            arguments: HashMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Look up a string argument by name
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }
}

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output to show on failure: stderr if present, else stdout, else a placeholder.
    /// Always bounded by [`MAX_REPLY_CHARS`].
    pub fn failure_output(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        let text = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            NO_OUTPUT
        };
        truncate(text, MAX_REPLY_CHARS)
    }
}

/// Terminal reply delivered to the invoker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    /// Visible only to the invoker
    pub ephemeral: bool,
}

impl Reply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// One element of the outcome stream produced for a [`CommandEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Provisional invoker-only acknowledgment
    Deferred,
    /// Intermediate progress message
    Progress { content: String },
    /// Terminal message; nothing follows it
    Final(Reply),
}

impl Outcome {
    pub fn is_final(&self) -> bool {
        matches!(self, Outcome::Final(_))
    }
}

/// Truncate `text` to at most `max_chars` characters, never splitting a code point
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
