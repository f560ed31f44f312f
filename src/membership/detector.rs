//! The SWIM failure-detection cycle: direct ping, indirect ping via `K`
//! helpers, suspicion/failure classification, gossip dissemination, and the
//! join-via-introducer protocol (§4.3).

use crate::config::Config;
use crate::error::Result;
use crate::membership::table::MembershipTable;
use crate::membership::wire::{CmdPayload, ControlMessage, JoinOutcome};
use crate::resolver::EndpointResolver;
use crate::transport::control::ControlChannel;
use crate::types::{Member, MemberState, NodeId};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Runs the periodic detection cycle and serves inbound control frames for
/// one node.
pub struct FailureDetector {
    local_id: NodeId,
    config: Config,
    table: Arc<MembershipTable>,
    resolver: Arc<dyn EndpointResolver>,
    channel: Arc<ControlChannel>,
    /// This node's own incarnation, advanced only by itself on refutation.
    incarnation: AtomicU64,
    /// Whether a `Suspected` classification is used at all, or failures are
    /// declared directly — toggled at runtime via `CMD ON`/`CMD OFF`.
    suspicion_mode: RwLock<bool>,
    shutdown: Arc<Notify>,
}

impl FailureDetector {
    pub fn new(
        local_id: NodeId,
        config: Config,
        table: Arc<MembershipTable>,
        resolver: Arc<dyn EndpointResolver>,
        channel: Arc<ControlChannel>,
    ) -> Self {
        let suspicion_mode = config.failure_detector.suspicion_mode;
        Self {
            local_id,
            config,
            table,
            resolver,
            channel,
            incarnation: AtomicU64::new(0),
            suspicion_mode: RwLock::new(suspicion_mode),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Join the cluster via `introducer`: ping it, then send a `JOIN` frame
    /// over the gossip channel and wait for `APPROVED <table>` /
    /// `REJECTED <reason>`, matching the original's text-based handshake.
    ///
    /// The reply is read by the gossip socket's sole reader task
    /// (`serve_gossip`), never by this call directly, so registering the
    /// waiter before sending is what lets the two coexist on one socket.
    pub async fn join(&self, introducer: SocketAddr, self_address: &str) -> Result<JoinOutcome> {
        self.channel
            .send_ping(introducer, &ControlMessage::Ping { sender: self.local_id })
            .await?;
        let reply = self.channel.await_join_reply(introducer);
        let join_frame =
            ControlMessage::Join { node_id: self.local_id, address: self_address.to_string() };
        self.channel.send_gossip_raw(introducer, &join_frame.serialize()).await?;
        let body = tokio::time::timeout(self.config.failure_detector.gossip_duration, reply)
            .await
            .map_err(|_| crate::error::Error::Timeout {
                operation: "join".to_string(),
                duration: self.config.failure_detector.gossip_duration,
            })?
            .map_err(|_| crate::error::Error::Unreachable {
                peer: introducer.to_string(),
                message: "join reply channel closed".to_string(),
            })?;
        JoinOutcome::parse(&body)
    }

    /// Announce this node's own current entry to `G` random peers. Called
    /// once a join has been merged locally, so members that learned of this
    /// node only indirectly (e.g. an earlier joiner that never saw this
    /// node in its own `APPROVED` table) converge without waiting for this
    /// node's first state change.
    pub async fn announce_self(&self) {
        if let Some(me) = self.table.get(self.local_id) {
            self.gossip_change(&me).await;
        }
    }

    /// Handle an inbound `JOIN` frame as the introducer: admit the joining
    /// node into the table and reply with the current table, or reject it.
    pub async fn handle_join(&self, node_id: NodeId, address: String, reply_to: SocketAddr) {
        let outcome = if self.table.len() >= self.config.cluster.expected_nodes && !self.table.contains(node_id) {
            JoinOutcome::Rejected("cluster is full".to_string())
        } else {
            self.table.insert(Member::new(node_id, address));
            JoinOutcome::Approved(clone_table(&self.table))
        };
        let _ = self.channel.send_gossip_raw(reply_to, &outcome.serialize()).await;
    }

    /// One full detection cycle: pick a random peer, ping it directly, and
    /// on timeout escalate to indirect pings through `K` helpers before
    /// classifying the peer as suspected or failed.
    pub async fn run_cycle(&self) -> Result<()> {
        let Some(target) = self.table.random_member(self.local_id) else {
            debug!("no peers to probe this cycle");
            return Ok(());
        };
        let Some(addr) = self.resolver.resolve(target.id) else {
            warn!(node = %target.id, "no address for ping target, skipping cycle");
            return Ok(());
        };

        if self.direct_ping(target.id, addr).await {
            self.refute_if_self_misreported(target.id).await;
            return Ok(());
        }

        if self.indirect_ping(target.id).await {
            return Ok(());
        }

        self.classify_unreachable(target.id).await;
        Ok(())
    }

    /// Probe `target` directly. Registers the ack waiter before sending so
    /// the reply — read by `serve_ping`'s own loop, not this call — cannot
    /// arrive and be discarded before anyone is listening for it.
    async fn direct_ping(&self, target: NodeId, addr: SocketAddr) -> bool {
        let ack = self.channel.await_ack(target);
        if self.channel.send_ping(addr, &ControlMessage::Ping { sender: self.local_id }).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(self.config.failure_detector.ping_timeout, ack).await, Ok(Ok(())))
    }

    async fn indirect_ping(&self, target: NodeId) -> bool {
        let helpers = self.table.sample(self.config.failure_detector.indirect_fanout, &[self.local_id, target]);
        if helpers.is_empty() {
            return false;
        }
        let rpa = self.channel.await_rpa(target);
        for helper in &helpers {
            if let Some(helper_addr) = self.resolver.resolve(helper.id) {
                let _ = self
                    .channel
                    .send_reping(helper_addr, &ControlMessage::Reping { sender: self.local_id, target })
                    .await;
            }
        }
        matches!(tokio::time::timeout(self.config.failure_detector.reping_timeout, rpa).await, Ok(Ok(())))
    }

    /// Mark `target` as `Suspected` (if suspicion mode is on) or `Failed`
    /// directly, and gossip the change to `G` random peers.
    async fn classify_unreachable(&self, target: NodeId) {
        let Some(current) = self.table.get(target) else { return };
        let suspicion_on = *self.suspicion_mode.read();
        let next_state = if suspicion_on { MemberState::Suspected } else { MemberState::Failed };
        if current.state == next_state || current.state == MemberState::Failed {
            return;
        }
        let updated = Member {
            state: next_state,
            last_change: chrono::Utc::now(),
            ..current
        };
        if self.table.update(updated.clone()) {
            warn!(node = %target, state = %next_state, "marking peer");
            self.gossip_change(&updated).await;
        }
    }

    /// Promote any `Suspected` member whose suspicion window has elapsed to
    /// `Failed`. Carried from the original's dedicated `updateFailure` loop
    /// (see module docs), folded into this detector's own periodic task.
    pub async fn run_suspicion_sweep(&self) {
        let timeout = self.config.failure_detector.suspicion_timeout;
        let now = chrono::Utc::now();
        for member in self.table.all() {
            if member.state != MemberState::Suspected {
                continue;
            }
            let elapsed = now.signed_duration_since(member.last_change);
            if elapsed.to_std().unwrap_or(Duration::ZERO) < timeout {
                continue;
            }
            let updated = Member { state: MemberState::Failed, last_change: now, ..member };
            if self.table.update(updated.clone()) {
                warn!(node = %updated.id, "suspicion window elapsed, marking failed");
                self.gossip_change(&updated).await;
            }
        }
    }

    /// If gossip or a probe reported *this* node as suspected/failed, bump
    /// our own incarnation and re-announce `Alive` — the refutation rule
    /// that lets a live node outrun a stale suspicion.
    async fn refute_if_self_misreported(&self, _observed_from: NodeId) {
        if let Some(me) = self.table.get(self.local_id) {
            if me.state != MemberState::Alive {
                let incarnation = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
                self.table.set_self_state(self.local_id, MemberState::Alive, incarnation);
                let refuted = self.table.get(self.local_id).expect("just set");
                self.gossip_change(&refuted).await;
            }
        }
    }

    async fn gossip_change(&self, member: &Member) {
        let fanout = self.config.failure_detector.gossip_fanout;
        let targets = self.table.sample(fanout, &[self.local_id]);
        let frame = ControlMessage::Gossip {
            origin: self.local_id,
            subject: member.id,
            state: member.state,
            incarnation: member.incarnation,
            timestamp_millis: member.last_change.timestamp_millis(),
        };
        for peer in targets {
            if let Some(addr) = self.resolver.resolve(peer.id) {
                let _ = self.channel.send_gossip(addr, &frame).await;
            }
        }
    }

    /// Handle one inbound gossip frame: merge it into the table via the
    /// newer-wins rule, then re-gossip if it actually changed anything
    /// (bounded infection-style dissemination).
    pub async fn handle_gossip(&self, msg: ControlMessage) {
        if let ControlMessage::Gossip { subject, state, incarnation, timestamp_millis, .. } = msg {
            let last_change = chrono::DateTime::from_timestamp_millis(timestamp_millis).unwrap_or_else(chrono::Utc::now);
            let address = self.table.get(subject).map(|m| m.address).unwrap_or_default();
            let incoming = Member { id: subject, address, state, incarnation, last_change };
            if self.table.update(incoming.clone()) {
                self.gossip_change(&incoming).await;
            }
        }
    }

    /// Handle an inbound `CMD` frame: toggle suspicion mode or adjust the
    /// control channel's artificial drop rate.
    pub fn handle_cmd(&self, payload: CmdPayload) {
        match payload {
            CmdPayload::SuspicionToggle(on) => {
                *self.suspicion_mode.write() = on;
                info!(suspicion_mode = on, "suspicion mode toggled via CMD");
            }
            CmdPayload::DropRate(rate) => {
                self.channel.set_drop_rate(rate);
                info!(rate, "control channel drop rate set via CMD");
            }
        }
    }

    /// Serve inbound control frames until shutdown: ping replies, indirect
    /// ping relays, gossip merges, and cmd toggles, each on its own socket
    /// so one never blocks another (§4.1/§5).
    pub async fn serve(self: Arc<Self>) {
        let ping_task = {
            let this = self.clone();
            tokio::spawn(async move { this.serve_ping().await })
        };
        let reping_task = {
            let this = self.clone();
            tokio::spawn(async move { this.serve_reping().await })
        };
        let gossip_task = {
            let this = self.clone();
            tokio::spawn(async move { this.serve_gossip().await })
        };
        let cmd_task = {
            let this = self.clone();
            tokio::spawn(async move { this.serve_cmd().await })
        };
        self.shutdown.notified().await;
        ping_task.abort();
        reping_task.abort();
        gossip_task.abort();
        cmd_task.abort();
    }

    /// Sole reader of the ping socket: answers inbound `Ping`s with an `Ack`
    /// and resolves any `direct_ping` waiting on an `Ack` of its own, so the
    /// two never race for the same datagram.
    async fn serve_ping(&self) {
        loop {
            match self.channel.recv_ping().await {
                Ok((ControlMessage::Ping { sender }, from)) => {
                    let _ = self.channel.send_ping(from, &ControlMessage::Ack { sender: self.local_id }).await;
                    let _ = sender;
                }
                Ok((ControlMessage::Ack { sender }, _)) => self.channel.complete_ack(sender),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "dropping malformed ping frame"),
            }
        }
    }

    /// Sole reader of the reping socket: relays inbound `Reping`s (spawned
    /// off so a slow relay can't stall other reping traffic) and resolves
    /// any `indirect_ping` waiting on an `Rpa`.
    async fn serve_reping(self: Arc<Self>) {
        loop {
            match self.channel.recv_reping().await {
                Ok((ControlMessage::Reping { sender, target }, _)) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.relay_indirect_ping(sender, target).await });
                }
                Ok((ControlMessage::Rpa { target, .. }, _)) => self.channel.complete_rpa(target),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "dropping malformed reping frame"),
            }
        }
    }

    /// Relay one indirect-ping request: direct-ping `target` ourselves and,
    /// if it acks, forward an `Rpa` back to the original `sender`.
    async fn relay_indirect_ping(&self, sender: NodeId, target: NodeId) {
        let Some(target_addr) = self.resolver.resolve(target) else { return };
        if self.direct_ping(target, target_addr).await {
            if let Some(sender_addr) = self.resolver.resolve(sender) {
                let _ = self
                    .channel
                    .send_reping(sender_addr, &ControlMessage::Rpa { sender: self.local_id, target })
                    .await;
            }
        }
    }

    /// Sole reader of the gossip socket: it carries both `ControlMessage`
    /// frames and raw `APPROVED`/`REJECTED` join-reply text, so replies are
    /// demultiplexed here before falling back to normal gossip handling.
    async fn serve_gossip(&self) {
        loop {
            match self.channel.recv_gossip_raw().await {
                Ok((text, from)) => {
                    if text.starts_with("APPROVED") || text.starts_with("REJECTED") {
                        self.channel.complete_join_reply(from, text);
                        continue;
                    }
                    match ControlMessage::parse(&text) {
                        Ok(ControlMessage::Join { node_id, address }) => {
                            self.handle_join(node_id, address, from).await;
                        }
                        Ok(msg) => self.handle_gossip(msg).await,
                        Err(e) => debug!(error = %e, "dropping malformed gossip frame"),
                    }
                }
                Err(e) => debug!(error = %e, "dropping malformed gossip frame"),
            }
        }
    }

    async fn serve_cmd(&self) {
        loop {
            match self.channel.recv_cmd().await {
                Ok((ControlMessage::Cmd { payload }, _)) => self.handle_cmd(payload),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "dropping malformed cmd frame"),
            }
        }
    }
}

/// `MembershipTable` has no `Clone` impl (it wraps a lock); a serialize/
/// parse round trip is the simplest way to hand an independent snapshot to
/// a joining node.
fn clone_table(table: &MembershipTable) -> MembershipTable {
    MembershipTable::parse(&table.serialize()).unwrap_or_default()
}
