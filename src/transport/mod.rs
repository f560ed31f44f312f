//! Wire-level transport: the UDP control channel (§4.1 ping/indirect-ping/
//! gossip/cmd) and the HTTP file RPC surface (§6).

pub mod control;
pub mod rpc;
