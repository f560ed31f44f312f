//! Text wire format for the control channel: ping/ack/indirect-ping/gossip/
//! cmd/join frames, space-separated, one frame per datagram (§6).

use crate::error::{Error, Result};
use crate::types::{MemberState, NodeId};
use std::str::FromStr;

/// A parsed control-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// `PING <sender>`
    Ping { sender: NodeId },
    /// `ACK <sender>`
    Ack { sender: NodeId },
    /// `REPING <sender> <target>` — indirect-ping request: please ping
    /// `target` on my behalf and relay the result back to `sender`.
    Reping { sender: NodeId, target: NodeId },
    /// `RPA <sender> <target>` — indirect-ping ack, relayed from a helper.
    Rpa { sender: NodeId, target: NodeId },
    /// `GOSSIP <origin> <subject> <state> <incarnation> <timestamp_millis>`
    Gossip { origin: NodeId, subject: NodeId, state: MemberState, incarnation: u64, timestamp_millis: i64 },
    /// `CMD <payload>` — advisory control frame, see `CmdPayload`.
    Cmd { payload: CmdPayload },
    /// `JOIN <node_id> <address>` — sent to the introducer.
    Join { node_id: NodeId, address: String },
}

/// The payload of a `CMD` frame, matching the original's `CMD ON`/`CMD
/// OFF`/`CMD <float>` shapes with a typed signal instead of a shared bool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmdPayload {
    SuspicionToggle(bool),
    DropRate(f64),
}

impl ControlMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim().split_whitespace();
        let tag = parts.next().ok_or_else(|| Error::Malformed { message: "empty control frame".into() })?;
        let rest: Vec<&str> = parts.collect();
        match tag {
            "PING" => Ok(ControlMessage::Ping { sender: parse_node_id(&rest, 0)? }),
            "ACK" => Ok(ControlMessage::Ack { sender: parse_node_id(&rest, 0)? }),
            "REPING" => Ok(ControlMessage::Reping {
                sender: parse_node_id(&rest, 0)?,
                target: parse_node_id(&rest, 1)?,
            }),
            "RPA" => Ok(ControlMessage::Rpa {
                sender: parse_node_id(&rest, 0)?,
                target: parse_node_id(&rest, 1)?,
            }),
            "GOSSIP" => {
                if rest.len() != 5 {
                    return Err(Error::Malformed { message: format!("malformed GOSSIP frame: '{}'", line) });
                }
                Ok(ControlMessage::Gossip {
                    origin: parse_node_id(&rest, 0)?,
                    subject: parse_node_id(&rest, 1)?,
                    state: MemberState::from_str(rest[2])?,
                    incarnation: rest[3].parse().map_err(|_| Error::Malformed {
                        message: format!("bad incarnation in GOSSIP frame: '{}'", line),
                    })?,
                    timestamp_millis: rest[4].parse().map_err(|_| Error::Malformed {
                        message: format!("bad timestamp in GOSSIP frame: '{}'", line),
                    })?,
                })
            }
            "CMD" => {
                let arg = rest.first().ok_or_else(|| Error::Malformed { message: "empty CMD frame".into() })?;
                let payload = match *arg {
                    "ON" => CmdPayload::SuspicionToggle(true),
                    "OFF" => CmdPayload::SuspicionToggle(false),
                    other => {
                        let rate: f64 = other
                            .parse()
                            .map_err(|_| Error::Malformed { message: format!("bad CMD payload: '{}'", other) })?;
                        CmdPayload::DropRate(rate)
                    }
                };
                Ok(ControlMessage::Cmd { payload })
            }
            "JOIN" => {
                if rest.len() != 2 {
                    return Err(Error::Malformed { message: format!("malformed JOIN frame: '{}'", line) });
                }
                Ok(ControlMessage::Join { node_id: parse_node_id(&rest, 0)?, address: rest[1].to_string() })
            }
            other => Err(Error::Malformed { message: format!("unknown control frame tag '{}'", other) }),
        }
    }

    pub fn serialize(&self) -> String {
        match self {
            ControlMessage::Ping { sender } => format!("PING {}", sender),
            ControlMessage::Ack { sender } => format!("ACK {}", sender),
            ControlMessage::Reping { sender, target } => format!("REPING {} {}", sender, target),
            ControlMessage::Rpa { sender, target } => format!("RPA {} {}", sender, target),
            ControlMessage::Gossip { origin, subject, state, incarnation, timestamp_millis } => {
                format!("GOSSIP {} {} {} {} {}", origin, subject, state, incarnation, timestamp_millis)
            }
            ControlMessage::Cmd { payload } => match payload {
                CmdPayload::SuspicionToggle(true) => "CMD ON".to_string(),
                CmdPayload::SuspicionToggle(false) => "CMD OFF".to_string(),
                CmdPayload::DropRate(rate) => format!("CMD {}", rate),
            },
            ControlMessage::Join { node_id, address } => format!("JOIN {} {}", node_id, address),
        }
    }
}

fn parse_node_id(rest: &[&str], idx: usize) -> Result<NodeId> {
    rest.get(idx)
        .and_then(|s| s.parse::<u32>().ok())
        .map(NodeId)
        .ok_or_else(|| Error::Malformed { message: format!("missing/invalid node id at position {}", idx) })
}

/// The outcome of a join attempt against the introducer, per the original's
/// `APPROVED <table>` / rejection text.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Approved(crate::membership::table::MembershipTable),
    Rejected(String),
}

impl JoinOutcome {
    /// `APPROVED\n<serialized table>` or `REJECTED <reason>`.
    pub fn parse(body: &str) -> Result<Self> {
        if let Some(table_text) = body.strip_prefix("APPROVED\n") {
            return Ok(JoinOutcome::Approved(crate::membership::table::MembershipTable::parse(table_text)?));
        }
        if let Some(reason) = body.strip_prefix("REJECTED ") {
            return Ok(JoinOutcome::Rejected(reason.to_string()));
        }
        Err(Error::Malformed { message: format!("malformed join response: '{}'", body) })
    }

    pub fn serialize(&self) -> String {
        match self {
            JoinOutcome::Approved(table) => format!("APPROVED\n{}", table.serialize()),
            JoinOutcome::Rejected(reason) => format!("REJECTED {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Member;

    #[test]
    fn ping_round_trip() {
        let msg = ControlMessage::Ping { sender: NodeId(3) };
        assert_eq!(ControlMessage::parse(&msg.serialize()).unwrap(), msg);
    }

    #[test]
    fn gossip_round_trip() {
        let msg = ControlMessage::Gossip {
            origin: NodeId(1),
            subject: NodeId(2),
            state: MemberState::Suspected,
            incarnation: 7,
            timestamp_millis: 1_700_000_000_000,
        };
        assert_eq!(ControlMessage::parse(&msg.serialize()).unwrap(), msg);
    }

    #[test]
    fn cmd_on_off_and_droprate() {
        assert_eq!(
            ControlMessage::parse("CMD ON").unwrap(),
            ControlMessage::Cmd { payload: CmdPayload::SuspicionToggle(true) }
        );
        assert_eq!(
            ControlMessage::parse("CMD OFF").unwrap(),
            ControlMessage::Cmd { payload: CmdPayload::SuspicionToggle(false) }
        );
        assert_eq!(
            ControlMessage::parse("CMD 0.2").unwrap(),
            ControlMessage::Cmd { payload: CmdPayload::DropRate(0.2) }
        );
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert!(ControlMessage::parse("FROB 1").is_err());
    }

    #[test]
    fn join_outcome_round_trip() {
        let table = crate::membership::table::MembershipTable::new();
        table.insert(Member::new(NodeId(1), "127.0.0.1:7000"));
        let outcome = JoinOutcome::Approved(table);
        let serialized = outcome.serialize();
        match JoinOutcome::parse(&serialized).unwrap() {
            JoinOutcome::Approved(restored) => assert_eq!(restored.len(), 1),
            JoinOutcome::Rejected(_) => panic!("expected Approved"),
        }
    }

    #[test]
    fn join_outcome_rejected() {
        match JoinOutcome::parse("REJECTED introducer not in network").unwrap() {
            JoinOutcome::Rejected(reason) => assert_eq!(reason, "introducer not in network"),
            JoinOutcome::Approved(_) => panic!("expected Rejected"),
        }
    }
}
