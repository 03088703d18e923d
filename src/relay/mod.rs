// Remote Administration Relay
//
// This module authorizes chat slash-command events and turns them into
// one-shot commands on a single remote host over SSH, relaying progress and
// the final result back to the invoker.

pub mod adapter;
pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod orchestrator;
#[cfg(feature = "ssh")]
pub mod ssh;
pub mod types;

// Re-export main types and traits
pub use adapter::{ConsoleAdapter, PlatformAdapter, parse_event, relay, serve};
pub use auth::{AuthorizationPolicy, Authorizer};
pub use config::{ConfigProvider, EnvConfig, LayeredConfig, MapConfig};
pub use credential::{AuthMethod, HostKeyVerifier, RemoteCredential};
pub use error::{RelayError, RelayResult};
pub use executor::{Connector, RemoteExecutor, RemoteSession, SessionExecutor, SessionGuard};
pub use orchestrator::{NOT_AUTHORIZED, Orchestrator, RestartSchedule, WarningStep};
#[cfg(feature = "ssh")]
pub use ssh::{SshConnector, SshExecutor, ssh_executor};
pub use types::*;
