//! UDP datagram channel for the control plane: ping, indirect-ping,
//! gossip and cmd each get their own socket/port so a burst of gossip
//! traffic can never head-of-line block a ping ack (§4.1).

use crate::config::PortConfig;
use crate::error::{Error, Result};
use crate::membership::wire::ControlMessage;
use crate::types::NodeId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

const MAX_FRAME_BYTES: usize = 4096;

/// Waiters for an ack/rpa keyed by the id of the node the reply must come
/// from. Several probes can legitimately race for the same target (the main
/// detection cycle and a helper relaying an indirect ping both end up
/// `direct_ping`-ing the same suspect); any one matching reply satisfies all
/// of them, so every waiter registered under that key is woken.
type ReplyWaiters = Mutex<HashMap<NodeId, Vec<oneshot::Sender<()>>>>;

/// The four control-plane sockets, bound once at node startup.
///
/// Each socket has exactly one long-running reader — the corresponding
/// `FailureDetector::serve_*` task — so that a reply to an outstanding probe
/// is never raced against the server loop for the same datagram. Callers
/// that need to correlate a reply to a request register a waiter here
/// first, then send, then await the waiter with their own timeout; the
/// reader task resolves the waiter when a matching reply arrives.
pub struct ControlChannel {
    ping: UdpSocket,
    reping: UdpSocket,
    gossip: UdpSocket,
    cmd: UdpSocket,
    /// Artificial drop rate for chaos testing of the control channel,
    /// toggled via `CMD <float>` (the original's `rate_0`..`rate_20`).
    drop_rate: RwLock<f64>,
    ack_waiters: ReplyWaiters,
    rpa_waiters: ReplyWaiters,
    /// Pending join responses, keyed by the introducer address the `JOIN`
    /// was sent to (the reply carries no node id, only raw `APPROVED`/
    /// `REJECTED` text, so the source address is the correlation key).
    join_waiters: Mutex<HashMap<SocketAddr, oneshot::Sender<String>>>,
}

impl ControlChannel {
    /// Bind all four sockets on `bind_ip` using the ports from `ports`.
    pub async fn bind(bind_ip: &str, ports: &PortConfig) -> Result<Self> {
        let ping = UdpSocket::bind((bind_ip, ports.ping_port)).await?;
        let reping = UdpSocket::bind((bind_ip, ports.reping_port)).await?;
        let gossip = UdpSocket::bind((bind_ip, ports.gossip_port)).await?;
        let cmd = UdpSocket::bind((bind_ip, ports.cmd_port)).await?;
        debug!(%bind_ip, ping_port = ports.ping_port, reping_port = ports.reping_port,
            gossip_port = ports.gossip_port, cmd_port = ports.cmd_port, "control channel bound");
        Ok(Self {
            ping,
            reping,
            gossip,
            cmd,
            drop_rate: RwLock::new(0.0),
            ack_waiters: Mutex::new(HashMap::new()),
            rpa_waiters: Mutex::new(HashMap::new()),
            join_waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Register interest in an `ACK` from `target`. Must be called before
    /// the triggering `PING` is sent, so the reply cannot arrive and be
    /// discarded before anyone is listening for it.
    pub fn await_ack(&self, target: NodeId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.ack_waiters.lock().entry(target).or_default().push(tx);
        rx
    }

    /// Resolve every waiter registered for `from` — called by the ping
    /// socket's sole reader task when an `ACK { sender: from }` arrives.
    pub fn complete_ack(&self, from: NodeId) {
        if let Some(waiters) = self.ack_waiters.lock().remove(&from) {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    /// Register interest in an `RPA` relayed back for `target`. Must be
    /// called before the triggering `REPING`s are sent.
    pub fn await_rpa(&self, target: NodeId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.rpa_waiters.lock().entry(target).or_default().push(tx);
        rx
    }

    /// Resolve every waiter registered for `target` — called by the reping
    /// socket's sole reader task when an `RPA { target, .. }` arrives.
    pub fn complete_rpa(&self, target: NodeId) {
        if let Some(waiters) = self.rpa_waiters.lock().remove(&target) {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    /// Register interest in the `APPROVED`/`REJECTED` reply to a `JOIN`
    /// sent to `introducer`. Must be called before the `JOIN` frame is sent.
    pub fn await_join_reply(&self, introducer: SocketAddr) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.join_waiters.lock().insert(introducer, tx);
        rx
    }

    /// Resolve the waiter registered for `from` with the raw reply body —
    /// called by the gossip socket's sole reader task when a frame that
    /// isn't a `ControlMessage` (an `APPROVED`/`REJECTED` join reply) is
    /// read from `from`.
    pub fn complete_join_reply(&self, from: SocketAddr, body: String) {
        if let Some(tx) = self.join_waiters.lock().remove(&from) {
            let _ = tx.send(body);
        }
    }

    pub fn set_drop_rate(&self, rate: f64) {
        *self.drop_rate.write() = rate.clamp(0.0, 1.0);
    }

    fn should_drop(&self) -> bool {
        let rate = *self.drop_rate.read();
        rate > 0.0 && rand::random::<f64>() < rate
    }

    async fn send_on(&self, socket: &UdpSocket, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
        if self.should_drop() {
            trace!(?to, "dropping outbound control frame (artificial drop rate)");
            return Ok(());
        }
        let bytes = msg.serialize();
        socket
            .send_to(bytes.as_bytes(), to)
            .await
            .map_err(|e| Error::Unreachable { peer: to.to_string(), message: e.to_string() })?;
        Ok(())
    }

    pub async fn send_ping(&self, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
        self.send_on(&self.ping, to, msg).await
    }

    pub async fn send_reping(&self, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
        self.send_on(&self.reping, to, msg).await
    }

    pub async fn send_gossip(&self, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
        self.send_on(&self.gossip, to, msg).await
    }

    pub async fn send_cmd(&self, to: SocketAddr, msg: &ControlMessage) -> Result<()> {
        self.send_on(&self.cmd, to, msg).await
    }

    async fn recv_on(socket: &UdpSocket) -> Result<(ControlMessage, SocketAddr)> {
        let mut buf = [0u8; MAX_FRAME_BYTES];
        let (len, from) = socket.recv_from(&mut buf).await?;
        let text = std::str::from_utf8(&buf[..len])
            .map_err(|e| Error::Malformed { message: format!("non-utf8 control frame: {}", e) })?;
        match ControlMessage::parse(text) {
            Ok(msg) => Ok((msg, from)),
            Err(e) => {
                warn!(%from, error = %e, "discarding malformed control frame");
                Err(e)
            }
        }
    }

    pub async fn recv_ping(&self) -> Result<(ControlMessage, SocketAddr)> {
        Self::recv_on(&self.ping).await
    }

    pub async fn recv_reping(&self) -> Result<(ControlMessage, SocketAddr)> {
        Self::recv_on(&self.reping).await
    }

    pub async fn recv_cmd(&self) -> Result<(ControlMessage, SocketAddr)> {
        Self::recv_on(&self.cmd).await
    }

    /// Send raw text on the gossip socket, bypassing `ControlMessage`
    /// framing — used only for the join handshake's `APPROVED`/`REJECTED`
    /// response, which is not itself a control frame.
    pub async fn send_gossip_raw(&self, to: SocketAddr, text: &str) -> Result<()> {
        if self.should_drop() {
            trace!(?to, "dropping outbound raw gossip frame (artificial drop rate)");
            return Ok(());
        }
        self.gossip
            .send_to(text.as_bytes(), to)
            .await
            .map_err(|e| Error::Unreachable { peer: to.to_string(), message: e.to_string() })?;
        Ok(())
    }

    /// Receive raw text from the gossip socket without `ControlMessage`
    /// parsing, for the join handshake's response leg.
    pub async fn recv_gossip_raw(&self) -> Result<(String, SocketAddr)> {
        let mut buf = [0u8; MAX_FRAME_BYTES];
        let (len, from) = self.gossip.recv_from(&mut buf).await?;
        let text = std::str::from_utf8(&buf[..len])
            .map_err(|e| Error::Malformed { message: format!("non-utf8 gossip frame: {}", e) })?;
        Ok((text.to_string(), from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    async fn channel_pair() -> (ControlChannel, ControlChannel, PortConfig, PortConfig) {
        let ports_a = PortConfig {
            ping_port: 0,
            reping_port: 0,
            gossip_port: 0,
            cmd_port: 0,
            rpc_port: 0,
        };
        let a = ControlChannel::bind("127.0.0.1", &ports_a).await.unwrap();
        let b = ControlChannel::bind("127.0.0.1", &ports_a).await.unwrap();
        (a, b, ports_a.clone(), ports_a)
    }

    #[tokio::test]
    async fn ping_round_trips_over_loopback() {
        let (a, b, _, _) = channel_pair().await;
        let b_addr = b.ping.local_addr().unwrap();
        a.send_ping(b_addr, &ControlMessage::Ping { sender: NodeId(1) }).await.unwrap();
        let (msg, _) = b.recv_ping().await.unwrap();
        assert_eq!(msg, ControlMessage::Ping { sender: NodeId(1) });
    }

    #[tokio::test]
    async fn full_drop_rate_suppresses_send() {
        let (a, b, _, _) = channel_pair().await;
        a.set_drop_rate(1.0);
        let b_addr = b.ping.local_addr().unwrap();
        a.send_ping(b_addr, &ControlMessage::Ping { sender: NodeId(2) }).await.unwrap();
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(100), b.recv_ping()).await;
        assert!(outcome.is_err(), "expected no datagram to arrive under a 100% drop rate");
    }
}
