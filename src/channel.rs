//! Channel (spec.md §4.G).
//!
//! `lc_channel_new` hashes the channel's group address (4.A), resolves it,
//! and links the Channel into the global registry (4.I); `lc_channel_bind`
//! sets `SO_REUSEADDR` and binds; `lc_channel_join`/`lc_channel_part`
//! manage multicast membership; `lc_msg_send` frames and transmits a
//! message, pre-incrementing `seq`. The original checks `setsockopt`'s
//! return value for `IPV6_MULTICAST_LOOP` but not for `IPV6_MULTICAST_IF`
//! (`setsockopt(... ) == 0` where the comparison is against the wrong
//! operand) — this crate checks both and surfaces a network-runtime error
//! if either fails, per the corrected behaviour this crate commits to.
//!
//! `seq`/`rnd` are protected by the `ChannelClock` mutex rather than the
//! unsynchronized pair of fields the original mutates directly; `send`
//! (the calling thread) and the receive worker (4.H) both go through the
//! same lock, giving the single-writer discipline the concurrency model
//! calls for.

use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex, Weak};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::hash::channel_group;
use crate::logging::{debug, trace, Logger};
use crate::message::Message;
use crate::random::{random_u32, random_u64};
use crate::registry::Registration;
use crate::socket::Socket;
use crate::wire::{self, Header, Opcode};

/// `seq`/`rnd`, mutated under single-writer discipline by `send` and by
/// the receive loop's clock-update rule.
#[derive(Default)]
struct ChannelClock {
    seq: u64,
    rnd: u64,
}

/// A multicast channel: a URI mapped to a resolved group address, plus the
/// socket it is currently bound to, if any.
pub struct Channel {
    id: u32,
    uri: String,
    addr: Ipv6Addr,
    port: u16,
    ctx: Weak<Context>,
    socket: Mutex<Option<Weak<Socket>>>,
    clock: Mutex<ChannelClock>,
    log: Logger,
    // Held only to deregister this channel's address on drop; never read.
    // Set once, right after construction, via `new`.
    _registration: Mutex<Option<Registration>>,
}

impl Channel {
    /// `lc_channel_new`: computes the group address, registers the
    /// channel, and returns it wrapped for shared (weak-reffable)
    /// ownership, the way `Socket::new` also hands back an `Arc`.
    pub fn new(ctx: &Arc<Context>, uri: &str, base: &Ipv6Addr, port: u16) -> Result<Arc<Channel>> {
        let addr = channel_group(base, uri, 0)?;
        let id = random_u32()?;
        debug!(ctx.log(), "creating channel"; "uri" => uri, "addr" => %addr);

        let channel = Arc::new(Channel {
            id,
            uri: uri.to_string(),
            addr,
            port,
            ctx: Arc::downgrade(ctx),
            socket: Mutex::new(None),
            clock: Mutex::new(ChannelClock::default()),
            log: ctx.log().clone(),
            _registration: Mutex::new(None),
        });

        let registration = crate::registry().register(addr.to_string(), &channel);
        *channel._registration.lock().unwrap() = Some(registration);

        Ok(channel)
    }

    /// Builds a bare Channel not tied to any Context or registry entry,
    /// used only to exercise the registry in isolation.
    #[cfg(test)]
    pub fn new_for_test() -> Channel {
        Channel {
            id: 1,
            uri: "test://channel".to_string(),
            addr: "ff3e::1".parse().unwrap(),
            port: 4242,
            ctx: Weak::new(),
            socket: Mutex::new(None),
            clock: Mutex::new(ChannelClock::default()),
            log: crate::logging::discard_logger(),
            _registration: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn context(&self) -> Option<Arc<Context>> {
        self.ctx.upgrade()
    }

    /// `lc_channel_bind`: sets `SO_REUSEADDR` and binds `sock` to this
    /// channel's resolved address, recording the socket reference.
    pub fn bind(&self, sock: &Arc<Socket>) -> Result<()> {
        sock.bind(self.addr, self.port)?;
        *self.socket.lock().unwrap() = Some(Arc::downgrade(sock));
        Ok(())
    }

    /// `lc_channel_unbind`: clears the socket reference without closing
    /// the descriptor.
    pub fn unbind(&self) {
        *self.socket.lock().unwrap() = None;
    }

    /// `lc_channel_socket`.
    pub fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// `lc_channel_socket_raw`.
    pub fn socket_raw(&self) -> Option<std::os::unix::io::RawFd> {
        self.socket().map(|s| s.raw())
    }

    /// `lc_channel_join`: joins the multicast group on every interface the
    /// OS enumerates, succeeding if at least one join succeeds; falls back
    /// to a default-interface join if enumeration itself fails.
    pub fn join(&self) -> Result<()> {
        let sock = self.socket().ok_or(Error::SocketRequired)?;
        let interfaces = enumerate_ipv6_interface_indexes();

        let indexes: Vec<u32> = match interfaces {
            Ok(list) if !list.is_empty() => list,
            _ => vec![0],
        };

        let mut joined = false;
        for index in indexes {
            if set_membership(sock.raw(), &self.addr, index, true).is_ok() {
                joined = true;
            }
        }

        if !joined {
            return Err(Error::McastJoin);
        }
        trace!(self.log, "joined multicast group"; "addr" => %self.addr);
        Ok(())
    }

    /// `lc_channel_part`: drops membership on the default interface.
    pub fn part(&self) -> Result<()> {
        let sock = self.socket().ok_or(Error::SocketRequired)?;
        set_membership(sock.raw(), &self.addr, 0, false).map_err(Error::McastLeave)
    }

    /// `lc_msg_send`: pre-increments `seq`, draws a fresh `rnd`, encodes
    /// the header, and transmits `[header || payload]` to the channel's
    /// group address. The message is consumed — the caller doesn't reuse
    /// it after this returns, mirroring the original releasing ownership
    /// on send.
    pub fn send(&self, msg: Message) -> Result<()> {
        let sock = self.socket().ok_or(Error::SocketRequired)?;

        let rnd = random_u64()?;
        let seq = {
            let mut clock = self.clock.lock().unwrap();
            clock.seq += 1;
            clock.rnd = rnd;
            clock.seq
        };

        let header = Header {
            seq,
            rnd,
            op: msg.opcode(),
            len: msg.len() as u64,
        };
        let datagram = wire::encode_message(&header, msg.data());

        set_multicast_loop(sock.raw(), true).map_err(Error::Send)?;
        set_multicast_if(sock.raw(), self.interface_index()).map_err(Error::Send)?;

        sendto(sock.raw(), &datagram, &self.addr, self.port).map_err(Error::Send)?;
        trace!(self.log, "sent message"; "seq" => seq, "len" => header.len);
        Ok(())
    }

    /// `lc_channel_setval`: frames a `SET` payload and sends it; the
    /// receiving end is what actually writes the keyval store row (4.H).
    pub fn setval(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let payload = wire::encode_set_payload(key, val);
        let msg = Message::from_bytes(&payload, Opcode::Set);
        self.send(msg)
    }

    /// `lc_channel_by_address`: linear scan of the registry for a channel
    /// whose resolved address, stringified, matches `addr_text`.
    pub fn by_address(addr_text: &str) -> Option<Arc<Channel>> {
        crate::registry().by_address(addr_text)
    }

    fn interface_index(&self) -> u32 {
        self.context()
            .and_then(|ctx| if_nametoindex(ctx.tapname()))
            .unwrap_or(0)
    }

    /// Applies the receive-side clock update rule:
    /// `seq' = max(received_seq + 1, chan.seq + 1)`, `rnd' = received_rnd`.
    pub(crate) fn update_clock(&self, received_seq: u64, received_rnd: u64) {
        let mut clock = self.clock.lock().unwrap();
        clock.seq = std::cmp::max(received_seq + 1, clock.seq + 1);
        clock.rnd = received_rnd;
    }

    pub(crate) fn clock(&self) -> (u64, u64) {
        let clock = self.clock.lock().unwrap();
        (clock.seq, clock.rnd)
    }
}

fn if_nametoindex(name: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        None
    } else {
        Some(index)
    }
}

fn enumerate_ipv6_interface_indexes() -> Result<Vec<u32>> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    let rc = unsafe { libc::getifaddrs(&mut addrs) };
    if rc != 0 {
        return Err(Error::McastJoin);
    }

    let mut indexes = Vec::new();
    let mut cursor = addrs;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        if !entry.ifa_name.is_null() {
            if let Some(index) = unsafe {
                let name = std::ffi::CStr::from_ptr(entry.ifa_name);
                name.to_str().ok().and_then(if_nametoindex)
            } {
                if !indexes.contains(&index) {
                    indexes.push(index);
                }
            }
        }
        cursor = entry.ifa_next;
    }
    unsafe { libc::freeifaddrs(addrs) };
    Ok(indexes)
}

fn set_membership(
    fd: std::os::unix::io::RawFd,
    addr: &Ipv6Addr,
    index: u32,
    join: bool,
) -> std::io::Result<()> {
    let mreq = libc::ipv6_mreq {
        ipv6mr_multiaddr: libc::in6_addr {
            s6_addr: addr.octets(),
        },
        ipv6mr_interface: index,
    };
    let opt = if join {
        libc::IPV6_ADD_MEMBERSHIP
    } else {
        libc::IPV6_DROP_MEMBERSHIP
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            opt,
            &mreq as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::ipv6_mreq>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_multicast_loop(fd: std::os::unix::io::RawFd, on: bool) -> std::io::Result<()> {
    let val: libc::c_int = on as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_LOOP,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_multicast_if(fd: std::os::unix::io::RawFd, index: u32) -> std::io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_IF,
            &index as *const _ as *const libc::c_void,
            std::mem::size_of_val(&index) as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn sendto(
    fd: std::os::unix::io::RawFd,
    datagram: &[u8],
    addr: &Ipv6Addr,
    port: u16,
) -> std::io::Result<()> {
    let mut sockaddr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sockaddr.sin6_port = port.to_be();
    sockaddr.sin6_addr = libc::in6_addr {
        s6_addr: addr.octets(),
    };

    let rc = unsafe {
        libc::sendto(
            fd,
            datagram.as_ptr() as *const libc::c_void,
            datagram.len(),
            0,
            &sockaddr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_update_takes_the_max_plus_one() {
        let channel = Channel::new_for_test();
        channel.update_clock(5, 0xaaaa);
        assert_eq!(channel.clock(), (6, 0xaaaa));

        // A stale/out-of-order receive doesn't roll seq backwards.
        channel.update_clock(1, 0xbbbb);
        assert_eq!(channel.clock(), (7, 0xbbbb));
    }

    #[test]
    fn new_for_test_channel_has_no_bound_socket() {
        let channel = Channel::new_for_test();
        assert!(channel.socket().is_none());
    }
}
