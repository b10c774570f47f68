//! Command/response link to the remote relay controller.
//!
//! Every transport failure is caught here and surfaced as a [`StatusEvent`];
//! nothing network-related is returned to callers as an error.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use crate::comms::{Command, Reply};
use crate::error::LinkError;
use crate::hal::{Connector, DatagramTransport};
use crate::types::{ContactState, Endpoint, LinkStatus, RelayId, RelayStates};

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub probe_timeout: Duration,
    pub reply_timeout: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Progress,
    Success,
    Failure,
    Online,
    Offline,
    NotConfigured,
}

/// Status text delivered to the presentation side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub relay: Option<RelayId>,
    pub kind: StatusKind,
    pub text: String,
}

pub type StatusSender = mpsc::UnboundedSender<StatusEvent>;

/// Issues a single relay-set command.
#[async_trait]
pub trait RelayControl: Send {
    async fn set_relay(&mut self, relay: RelayId, state: ContactState);
}

/// State shared between the link and its reply listeners.
struct Shared {
    status: watch::Sender<LinkStatus>,
    // Bumped whenever the transport is released; listeners bound to an older
    // transport must not change the status of the new one.
    generation: AtomicU64,
    events: StatusSender,
}

impl Shared {
    fn report(&self, relay: Option<RelayId>, kind: StatusKind, text: impl Into<String>) {
        let text = text.into();
        match kind {
            StatusKind::Failure | StatusKind::Offline | StatusKind::NotConfigured => {
                warn!("[relay {:?}] {}", relay.map(RelayId::get), text)
            }
            _ => info!("[relay {:?}] {}", relay.map(RelayId::get), text),
        }
        let _ = self.events.send(StatusEvent { relay, kind, text });
    }

    fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    fn mark_offline(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let went_offline = self.status.send_if_modified(|status| {
            if *status == LinkStatus::Online {
                *status = LinkStatus::Offline;
                true
            } else {
                false
            }
        });
        if went_offline {
            self.report(None, StatusKind::Offline, "offline: controller is not responding");
        }
    }
}

pub struct RelayLink {
    connector: Arc<dyn Connector>,
    endpoint: Option<Endpoint>,
    transport: Option<Arc<dyn DatagramTransport>>,
    shared: Arc<Shared>,
    timing: LinkTiming,
    pending: Vec<JoinHandle<()>>,
}

impl RelayLink {
    pub fn new(connector: Arc<dyn Connector>, events: StatusSender, timing: LinkTiming) -> Self {
        let (status, _) = watch::channel(LinkStatus::Unconfigured);
        Self {
            connector,
            endpoint: None,
            transport: None,
            shared: Arc::new(Shared {
                status,
                generation: AtomicU64::new(0),
                events,
            }),
            timing,
            pending: Vec::new(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status.subscribe()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// New timeouts apply to the next probe and to listeners spawned after
    /// this call.
    pub fn set_timing(&mut self, timing: LinkTiming) {
        self.timing = timing;
    }

    /// Points the link at a new controller. The previous transport is released
    /// before the new one is opened; liveness is not probed here.
    pub async fn configure(&mut self, endpoint: Endpoint) {
        self.release();
        info!("Controller endpoint set to {}", endpoint);
        self.endpoint = Some(endpoint);
        self.shared.status.send_replace(LinkStatus::Offline);
        self.ensure_transport().await;
    }

    /// Forgets the endpoint; every network operation becomes a no-op.
    pub fn unconfigure(&mut self) {
        self.release();
        self.endpoint = None;
        self.shared.status.send_replace(LinkStatus::Unconfigured);
    }

    /// Sends the liveness token and waits briefly for any reply. Does not
    /// change the link status.
    pub async fn probe(&mut self) -> bool {
        let Some(transport) = self.ensure_transport().await else {
            return false;
        };
        match ping(transport.as_ref(), self.timing.probe_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Probe failed: {}", e);
                false
            }
        }
    }

    /// Returns immediately when already online. Otherwise makes one probe; on
    /// success the link goes online and every relay in `current` is replayed
    /// so a controller that reset picks up the desired states again.
    pub async fn is_online(&mut self, current: &RelayStates) -> bool {
        if self.endpoint.is_none() {
            return false;
        }
        if self.status() == LinkStatus::Online {
            return true;
        }
        if !self.probe().await {
            return false;
        }

        self.shared.status.send_replace(LinkStatus::Online);
        self.shared
            .report(None, StatusKind::Online, "online: controller is responding");
        for (relay, state) in current {
            self.set_relay(*relay, *state).await;
        }
        true
    }

    /// Sends one relay command. A reply is only awaited while the link is
    /// online; offline sends are best effort.
    pub async fn set_relay(&mut self, relay: RelayId, state: ContactState) {
        if self.endpoint.is_none() {
            self.shared.report(
                Some(relay),
                StatusKind::NotConfigured,
                LinkError::NotConfigured.to_string(),
            );
            return;
        }
        let Some(transport) = self.ensure_transport().await else {
            return;
        };

        let cmd = Command::SetRelay { relay, state }.encode();
        debug!("TX {:?}", cmd);
        if let Err(e) = transport.send(cmd.as_bytes()).await {
            self.shared
                .report(Some(relay), StatusKind::Failure, LinkError::from(e).to_string());
            self.shared.mark_offline(self.generation());
            return;
        }

        if self.status() == LinkStatus::Online {
            self.pending.retain(|h| !h.is_finished());
            let handle = tokio::spawn(await_reply(
                self.shared.clone(),
                transport,
                relay,
                self.generation(),
                self.timing.reply_timeout,
            ));
            self.pending.push(handle);
        } else {
            self.shared.report(
                Some(relay),
                StatusKind::Offline,
                format!(
                    "offline: controller is not responding, relay {} {} not confirmed",
                    relay, state
                ),
            );
        }
    }

    /// De-energizes every listed relay.
    pub async fn reset_relays(&mut self, relays: impl IntoIterator<Item = RelayId>) {
        for relay in relays {
            self.set_relay(relay, ContactState::DeEnergized).await;
        }
    }

    /// Waits for every outstanding reply listener to finish.
    pub async fn settle(&mut self) {
        for handle in self.pending.drain(..) {
            let _ = handle.await;
        }
    }

    /// Releases the transport and waits for outstanding listeners. Listeners
    /// keep their own handle, so they finish their read undisturbed.
    pub async fn shutdown(&mut self) {
        self.release();
        self.settle().await;
    }

    fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        if self.transport.take().is_some() {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            debug!("Released controller transport");
        }
    }

    async fn ensure_transport(&mut self) -> Option<Arc<dyn DatagramTransport>> {
        let endpoint = self.endpoint.clone()?;
        if self.transport.is_none() {
            match self.connector.open(&endpoint).await {
                Ok(transport) => self.transport = Some(transport),
                Err(e) => {
                    self.shared
                        .report(None, StatusKind::Failure, LinkError::from(e).to_string());
                    return None;
                }
            }
        }
        self.transport.clone()
    }
}

#[async_trait]
impl RelayControl for RelayLink {
    async fn set_relay(&mut self, relay: RelayId, state: ContactState) {
        RelayLink::set_relay(self, relay, state).await
    }
}

async fn ping(transport: &dyn DatagramTransport, wait: Duration) -> Result<(), LinkError> {
    transport.send(Command::Ping.encode().as_bytes()).await?;
    let mut buf = [0u8; RECV_BUFFER];
    timeout(wait, transport.recv(&mut buf))
        .await
        .map_err(|_| LinkError::Timeout(wait))??;
    Ok(())
}

/// Reports every reply for one exchange until a terminal marker arrives or the
/// deadline passes.
async fn await_reply(
    shared: Arc<Shared>,
    transport: Arc<dyn DatagramTransport>,
    relay: RelayId,
    generation: u64,
    wait: Duration,
) {
    shared.report(Some(relay), StatusKind::Progress, "Communicating with controller...");
    let deadline = Instant::now() + wait;
    let mut buf = [0u8; RECV_BUFFER];

    loop {
        let received = match timeout_at(deadline, transport.recv(&mut buf)).await {
            Ok(result) => result.map_err(LinkError::from),
            Err(_) => Err(LinkError::Timeout(wait)),
        };
        let n = match received {
            Ok(n) => n,
            Err(e) => {
                shared.report(Some(relay), StatusKind::Failure, e.to_string());
                shared.mark_offline(generation);
                return;
            }
        };

        match std::str::from_utf8(&buf[..n]) {
            Ok(text) => {
                let reply = Reply::classify(text);
                let kind = match reply {
                    Reply::Success(_) => StatusKind::Success,
                    Reply::Failure { .. } => StatusKind::Failure,
                    Reply::Progress(_) => StatusKind::Progress,
                };
                shared.report(Some(relay), kind, reply.text());
                if reply.is_terminal() {
                    return;
                }
            }
            Err(e) => {
                shared.report(Some(relay), StatusKind::Progress, LinkError::from(e).to_string());
            }
        }
    }
}
