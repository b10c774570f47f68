//! Wire vocabulary of the relay controller and the operator-facing external
//! command socket.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{ContactState, MacroSlot, RelayId};

pub const PING: &str = "ping";
const ENERGIZE_SUFFIX: char = 'e';
const DE_ENERGIZE_SUFFIX: char = 'd';
const SUCCESS_MARKER: &str = "success";
const FAILURE_MARKER: &str = "failure";
const SWITCH_PREFIX: &str = "switch:";

/// Commands understood by the controller.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    Ping,
    SetRelay { relay: RelayId, state: ContactState },
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::Ping => PING.to_string(),
            Command::SetRelay { relay, state } => {
                let suffix = match state {
                    ContactState::Energized => ENERGIZE_SUFFIX,
                    ContactState::DeEnergized => DE_ENERGIZE_SUFFIX,
                };
                format!("{}{}", relay, suffix)
            }
        }
    }
}

/// A controller response. Anything without a terminal marker is progress.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Reply {
    Success(String),
    Failure { text: String, reason: Option<String> },
    Progress(String),
}

impl Reply {
    /// The marker that appears first decides the outcome, so a reason text
    /// mentioning the other marker does not flip it.
    pub fn classify(text: &str) -> Reply {
        match (text.find(SUCCESS_MARKER), text.find(FAILURE_MARKER)) {
            (Some(success), Some(failure)) if success < failure => Reply::Success(text.to_string()),
            (_, Some(pos)) => {
                let reason = text[pos + FAILURE_MARKER.len()..]
                    .strip_prefix(':')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty());
                Reply::Failure {
                    text: text.to_string(),
                    reason,
                }
            }
            (Some(_), None) => Reply::Success(text.to_string()),
            (None, None) => Reply::Progress(text.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Reply::Progress(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Success(text) | Reply::Progress(text) => text,
            Reply::Failure { text, .. } => text,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExternalCommandError {
    #[error("unrecognised command {0:?}")]
    Unrecognised(String),

    #[error("bad macro number {0:?}")]
    BadNumber(String),
}

/// Commands accepted on the external command socket.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExternalCommand {
    /// Run a macro. The wire carries a 1-based number; the slot is 0-based.
    Switch(MacroSlot),
}

impl ExternalCommand {
    pub fn parse(text: &str) -> Result<Self, ExternalCommandError> {
        let text = text.trim();
        let number = text
            .strip_prefix(SWITCH_PREFIX)
            .ok_or_else(|| ExternalCommandError::Unrecognised(text.to_string()))?
            .trim();
        number
            .parse::<usize>()
            .ok()
            .and_then(MacroSlot::from_number)
            .map(ExternalCommand::Switch)
            .ok_or_else(|| ExternalCommandError::BadNumber(number.to_string()))
    }
}

/// Receives `switch:<n>` datagrams from other programs and forwards them to
/// the control task.
pub struct ExternalCommandListener {
    socket: UdpSocket,
}

impl ExternalCommandListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind external command socket on {}", addr))?;
        info!("Listening for external commands on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs until the receiving side of `tx` is dropped or the task is aborted.
    pub fn spawn(self, tx: mpsc::Sender<ExternalCommand>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let (n, from) = match self.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("External command receive error: {}", e);
                        continue;
                    }
                };
                let text = match std::str::from_utf8(&buf[..n]) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Ext cmd failed: {} from {}", e, from);
                        continue;
                    }
                };
                match ExternalCommand::parse(text) {
                    Ok(cmd) => {
                        info!("External command from {}: {:?}", from, cmd);
                        if tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ext cmd failed: {}", e),
                }
            }
        })
    }
}
