// SSH transport for the remote executor, backed by libssh2.

use ssh2::{HashType, Session};
use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::time::Duration;

use crate::relay::credential::{AuthMethod, RemoteCredential};
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::executor::{Connector, RemoteSession, SessionExecutor};
use crate::relay::types::ExecutionResult;

const READ_BUFFER_SIZE: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Opens authenticated SSH sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }

    fn establish(session: &mut Session, credential: &RemoteCredential) -> RelayResult<()> {
        session
            .handshake()
            .map_err(|e| RelayError::connection(format!("SSH handshake failed: {}", e)))?;

        let presented = session.host_key_hash(HashType::Sha256);
        credential.host_key.verify(presented)?;

        match &credential.auth {
            AuthMethod::PrivateKey { key, passphrase } => session
                .userauth_pubkey_memory(&credential.username, None, key, passphrase.as_deref())
                .map_err(|e| RelayError::connection(format!("SSH key authentication failed: {}", e)))?,
            AuthMethod::Password(password) => session
                .userauth_password(&credential.username, password)
                .map_err(|e| {
                    RelayError::connection(format!("SSH password authentication failed: {}", e))
                })?,
        }

        if !session.authenticated() {
            return Err(RelayError::connection("SSH authentication failed"));
        }

        Ok(())
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    fn connect(&self, credential: &RemoteCredential) -> RelayResult<SshSession> {
        let address = credential.address();
        log::debug!("Connecting to {} as {}", address, credential.username);

        let tcp = TcpStream::connect(&address)
            .map_err(|e| RelayError::connection(format!("{}: {}", address, e)))?;

        let mut session = Session::new()
            .map_err(|e| RelayError::connection(format!("failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);

        if let Err(e) = Self::establish(&mut session, credential) {
            let _ = session.disconnect(None, "session rejected", None);
            return Err(e);
        }

        Ok(SshSession { session })
    }
}

/// An authenticated libssh2 session
pub struct SshSession {
    session: Session,
}

/// Read both streams until neither makes progress and `eof` reports the
/// remote end is done. `WouldBlock` is a gap, not an error.
fn drain_streams<O, E>(
    stdout: &mut O,
    stderr: &mut E,
    mut eof: impl FnMut() -> bool,
) -> RelayResult<(Vec<u8>, Vec<u8>)>
where
    O: Read,
    E: Read,
{
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let read_out = read_available(stdout, &mut buf, &mut out, "stdout")?;
        let read_err = read_available(stderr, &mut buf, &mut err, "stderr")?;

        if !read_out && !read_err {
            if eof() {
                return Ok((out, err));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn read_available<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
    stream: &str,
) -> RelayResult<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(RelayError::transport(format!("{} read failed: {}", stream, e))),
    }
}

/// A missing exit status counts as success.
fn collect_output(exit_status: Option<i32>, stdout: &[u8], stderr: &[u8]) -> ExecutionResult {
    ExecutionResult {
        exit_code: exit_status.unwrap_or(0),
        stdout: String::from_utf8_lossy(stdout).into_owned(),
        stderr: String::from_utf8_lossy(stderr).into_owned(),
    }
}

impl RemoteSession for SshSession {
    fn run(&mut self, command: &str) -> RelayResult<ExecutionResult> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| RelayError::transport(format!("failed to open channel: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| RelayError::transport(format!("failed to start command: {}", e)))?;

        let mut stdout = channel.stream(0);
        let mut stderr = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_streams(&mut stdout, &mut stderr, || channel.eof());
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel
            .wait_close()
            .map_err(|e| RelayError::transport(format!("failed to close channel: {}", e)))?;

        Ok(collect_output(channel.exit_status().ok(), &stdout, &stderr))
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "command complete", None) {
            log::debug!("SSH disconnect failed: {}", e);
        }
    }
}

/// Production executor: one SSH session per command
pub type SshExecutor = SessionExecutor<SshConnector>;

pub fn ssh_executor() -> SshExecutor {
    SessionExecutor::new(SshConnector::new())
}
