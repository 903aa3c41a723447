//! Group communication over IPv6 multicast: channel URIs are mapped to
//! IPv6 multicast group addresses, messages are framed with a small
//! sequenced header, and a Context/Socket/Channel object model wraps the
//! underlying datagram sockets.
//!
//! No reliability, retransmission, cross-sender ordering, congestion
//! control, authentication, encryption, flow control, or fragmentation
//! beyond one datagram is implemented — see the module-level docs on
//! `channel` and `recv` for what is and isn't guaranteed.

pub mod channel;
pub mod context;
pub mod error;
pub mod hash;
pub mod logging;
pub mod message;
pub mod probe;
pub mod random;
pub mod recv;
pub mod registry;
pub mod socket;
pub mod store;
pub mod wire;

pub use channel::Channel;
pub use context::{Context, NullTap, TapProvider};
pub use error::{Error, Result};
pub use message::{Message, PayloadSource};
pub use recv::Callbacks;
pub use registry::Registry;
pub use socket::Socket;
pub use wire::Opcode;

use std::net::Ipv6Addr;

/// Default multicast base address, `ff3e::` — an organization-local scope
/// multicast prefix.
pub const DEFAULT_BASE_ADDR: &str = "ff3e::";

/// Default UDP port every channel is bound to unless overridden.
pub const DEFAULT_PORT: u16 = 4242;

/// Default path of the embedded store file.
pub const DEFAULT_STORE_PATH: &str = "librecast.db";

/// Parses `DEFAULT_BASE_ADDR`; only fails if the constant itself is ever
/// edited to something unparsable; this is exercised in tests.
pub fn default_base_addr() -> Ipv6Addr {
    DEFAULT_BASE_ADDR
        .parse()
        .expect("DEFAULT_BASE_ADDR must be a valid IPv6 address")
}

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

/// The process-wide channel registry (spec.md §4.I), shared by every
/// `Channel::new` and the receive loop.
pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_addr_parses() {
        let addr = default_base_addr();
        assert_eq!(addr.octets()[0], 0xff);
        assert_eq!(addr.octets()[1], 0x3e);
    }
}
