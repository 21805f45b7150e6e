//! # Auth Session
//!
//! Per-connection logon state machine.
//!
//! ## Phases
//! ```text
//! LogonChallenge --challenge ok--> LogonProof --proof ok--> WaitingRealmList
//!       ^    |                          |
//!       +----+ unknown/banned/build     +--proof failed--> Closed
//! ```
//! `ReconnectProof` and `Authorized` exist for the reconnect and realm-list flows, which
//! this gateway does not serve. Any command the current phase has no handler for closes
//! the session.
//!
//! Phase data lives inside the [`Phase`] variant, so the SRP state only exists while a
//! proof is expected and the session key only once one was verified.
//!
//! ## Command Loop
//! [`AuthSession::process_input`] peeks the next command id and hands the input buffer
//! to the phase's handler. A handler either consumes exactly one message
//! ([`CommandOutcome::Handled`]) or consumes nothing and reports
//! [`CommandOutcome::Incomplete`], in which case the loop waits for the next
//! `DataReady`. Unknown ids, malformed payloads and phase violations are errors and end
//! the session.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core::buffer::ByteBuffer;
use crate::error::{AuthError, FramingError, SocketError};
use crate::protocol::account::AccountDirectory;
use crate::protocol::command::{
    challenge_failure, challenge_success, proof_failure, proof_success, AuthCommand, AuthResult,
    ClientVersion, LogonChallengeRequest, LogonProofRequest,
};
use crate::protocol::srp::{SessionKey, SrpServer};
use crate::transport::socket::{ConnectionId, ConnectionSocket, SocketEvent};
use crate::utils::metrics::{Metrics, Timer};

/// Result of one command handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// One message was consumed
    Handled,
    /// The message is not complete yet; nothing was consumed
    Incomplete,
}

/// State carried between a successful challenge and the proof
pub struct ChallengeState {
    pub account: String,
    pub version: ClientVersion,
    pub server: SrpServer,
}

/// State of an authenticated client
#[derive(Debug)]
pub struct AuthorizedState {
    pub account: String,
    pub version: ClientVersion,
    pub session_key: SessionKey,
}

/// Position in the logon handshake
pub enum Phase {
    LogonChallenge,
    LogonProof(Box<ChallengeState>),
    ReconnectProof,
    Authorized(AuthorizedState),
    WaitingRealmList(AuthorizedState),
    Closed,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::LogonChallenge => "LogonChallenge",
            Phase::LogonProof(_) => "LogonProof",
            Phase::ReconnectProof => "ReconnectProof",
            Phase::Authorized(_) => "Authorized",
            Phase::WaitingRealmList(_) => "WaitingRealmList",
            Phase::Closed => "Closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Phase::Closed)
    }

    /// Session key once the proof verified
    pub fn session_key(&self) -> Option<&SessionKey> {
        match self {
            Phase::Authorized(state) | Phase::WaitingRealmList(state) => Some(&state.session_key),
            _ => None,
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed the connection
    PeerClosed,
    /// No traffic within the idle timeout
    Timeout,
    Transport(SocketError),
    /// Framing or phase violation
    Protocol(AuthError),
    /// The client failed the SRP proof
    AuthenticationFailed,
    /// Closed through the registry or on shutdown
    Requested,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Timeout => f.write_str("idle timeout"),
            CloseReason::Transport(err) => write!(f, "transport: {err}"),
            CloseReason::Protocol(err) => write!(f, "protocol: {err}"),
            CloseReason::AuthenticationFailed => f.write_str("authentication failed"),
            CloseReason::Requested => f.write_str("requested"),
        }
    }
}

/// Collaborators shared by every session of a service
#[derive(Clone)]
pub struct SessionContext {
    pub accounts: Arc<dyn AccountDirectory>,
    /// Builds allowed to log in. Empty allows every build.
    pub allowed_builds: Arc<[u16]>,
    pub metrics: Arc<Metrics>,
}

impl SessionContext {
    pub fn new(accounts: Arc<dyn AccountDirectory>) -> Self {
        Self {
            accounts,
            allowed_builds: Arc::from(Vec::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn build_allowed(&self, build: u16) -> bool {
        self.allowed_builds.is_empty() || self.allowed_builds.contains(&build)
    }
}

/// Protocol state of one connection
pub struct AuthSession {
    socket: ConnectionSocket,
    phase: Phase,
    context: SessionContext,
}

impl AuthSession {
    pub fn new(socket: ConnectionSocket, context: SessionContext) -> Self {
        Self {
            socket,
            phase: Phase::LogonChallenge,
            context,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.socket.id()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn socket(&self) -> &ConnectionSocket {
        &self.socket
    }

    /// Move to `Closed` and close the socket. Safe to call more than once.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.socket.close();
    }

    /// Handle every complete command in the input buffer
    pub fn process_input(&mut self) -> Result<(), AuthError> {
        while !self.phase.is_closed() {
            let Some(id) = self.socket.with_input(|input| input.peek::<u8>().ok()) else {
                return Ok(());
            };
            let command = AuthCommand::try_from(id)?;
            match self.dispatch(command)? {
                CommandOutcome::Handled => {}
                CommandOutcome::Incomplete => return Ok(()),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: AuthCommand) -> Result<CommandOutcome, AuthError> {
        match (command, &self.phase) {
            (AuthCommand::LogonChallenge, Phase::LogonChallenge) => self.handle_logon_challenge(),
            (AuthCommand::LogonProof, Phase::LogonProof(_)) => self.handle_logon_proof(),
            (command, phase) => Err(FramingError::UnexpectedCommand {
                command: command.name(),
                phase: phase.name(),
            }
            .into()),
        }
    }

    fn send(&self, packet: ByteBuffer) {
        self.socket.send_async(packet);
    }

    fn reject_challenge(&self, result: AuthResult) -> Result<CommandOutcome, AuthError> {
        self.context.metrics.challenge_rejected();
        self.send(challenge_failure(result)?);
        Ok(CommandOutcome::Handled)
    }

    #[instrument(skip(self), fields(conn = %self.socket.id()))]
    fn handle_logon_challenge(&mut self) -> Result<CommandOutcome, AuthError> {
        let Some(request) = self.socket.with_input(LogonChallengeRequest::decode)? else {
            return Ok(CommandOutcome::Incomplete);
        };
        debug!(
            account = %request.account_name,
            version = %request.version,
            platform = %request.platform,
            os = %request.os,
            locale = %request.locale,
            ip = %request.ip,
            "Logon challenge"
        );

        if !self.context.build_allowed(request.version.build) {
            info!(build = request.version.build, "Rejected client build");
            return self.reject_challenge(AuthResult::FailVersionInvalid);
        }

        let account = request.account_name.to_ascii_lowercase();
        let Some(credential) = self.context.accounts.lookup(&account) else {
            info!(account = %account, "Unknown account");
            return self.reject_challenge(AuthResult::FailUnknownAccount);
        };
        if credential.banned {
            info!(account = %account, "Banned account");
            return self.reject_challenge(AuthResult::FailBanned);
        }

        let server = SrpServer::new(&account, credential.salt, credential.verifier);
        let crc_salt: [u8; 16] = rand::random();
        self.context.metrics.handshake_attempt();
        self.send(challenge_success(server.public_key(), server.salt(), &crc_salt)?);

        self.phase = Phase::LogonProof(Box::new(ChallengeState {
            account,
            version: request.version,
            server,
        }));
        Ok(CommandOutcome::Handled)
    }

    #[instrument(skip(self), fields(conn = %self.socket.id()))]
    fn handle_logon_proof(&mut self) -> Result<CommandOutcome, AuthError> {
        let Some(request) = self.socket.with_input(LogonProofRequest::decode)? else {
            return Ok(CommandOutcome::Incomplete);
        };
        let state = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::LogonProof(state) => state,
            other => {
                let phase = other.name();
                self.phase = other;
                return Err(FramingError::UnexpectedCommand {
                    command: AuthCommand::LogonProof.name(),
                    phase,
                }
                .into());
            }
        };
        let ChallengeState {
            account,
            version,
            server,
        } = *state;

        let verified = {
            let _timer = Timer::start("srp_verify");
            server.verify_proof(&request.client_public, &request.client_proof)
        };
        match verified {
            Ok(proof) => {
                self.context.metrics.handshake_success();
                self.send(proof_success(&proof.server_proof, &version)?);
                info!(account = %account, "Client authenticated");
                self.phase = Phase::WaitingRealmList(AuthorizedState {
                    account,
                    version,
                    session_key: proof.session_key,
                });
            }
            Err(err) => {
                self.context.metrics.handshake_failed();
                self.send(proof_failure(&version)?);
                warn!(account = %account, error = %err, "Authentication failed");
                // phase stays Closed
            }
        }
        Ok(CommandOutcome::Handled)
    }
}

/// Drive `session` from its socket events until it closes.
///
/// Data and writability events run the command loop, skipped while the socket is
/// congested. Timeouts, transport errors and peer closes end the session. The socket is
/// closed before the reason is returned.
#[instrument(skip_all, fields(conn = %session.id()))]
pub async fn run_session(
    mut session: AuthSession,
    mut events: mpsc::Receiver<SocketEvent>,
) -> CloseReason {
    let reason = loop {
        let Some(event) = events.recv().await else {
            break CloseReason::Requested;
        };
        match event {
            SocketEvent::DataReady | SocketEvent::Writable => {
                if session.socket.is_congested() {
                    continue;
                }
                if let Err(err) = session.process_input() {
                    break CloseReason::Protocol(err);
                }
                if session.phase.is_closed() {
                    break CloseReason::AuthenticationFailed;
                }
            }
            SocketEvent::Timeout => break CloseReason::Timeout,
            SocketEvent::Error(err) => break CloseReason::Transport(err),
            SocketEvent::Closed => break CloseReason::PeerClosed,
        }
    };
    debug!(reason = %reason, phase = session.phase.name(), "Session ending");
    session.close();
    reason
}
