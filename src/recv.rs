//! Receive Loop (spec.md §4.H).
//!
//! One worker per socket, started by `Socket::listen`. The original blocks
//! in a single `recvmsg(2)` call that also retrieves the `IPV6_PKTINFO`
//! ancillary data needed to recover the destination address, parses the
//! header, updates the matching channel's clock, logs to the store, and
//! invokes the user's message callback — looping forever, with
//! `pthread_cancel` as the only way out. This crate's worker does the same
//! sequence of steps per datagram but polls a cancellation flag between
//! timed-out `recvmsg` calls instead (see `socket.rs`).
//!
//! Any buffer allocated around the blocking call is stack-local to this
//! function and so is dropped automatically however the loop exits —
//! there is no heap allocation that needs a dedicated cleanup hook the way
//! the original's cancellation cleanup handler frees one.

use std::net::Ipv6Addr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::logging::{error, trace, warn};
use crate::message::Message;
use crate::socket::{Socket, CANCEL_POLL_INTERVAL_MS};
use crate::store::{KeyvalEntry, LogEntry};
use crate::wire::{self, Opcode};

pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// The pair of user callbacks a listener is started with.
#[derive(Clone)]
pub struct Callbacks {
    on_msg: MessageCallback,
    on_err: ErrorCallback,
}

impl Callbacks {
    pub fn new(on_msg: MessageCallback, on_err: ErrorCallback) -> Callbacks {
        Callbacks { on_msg, on_err }
    }

    /// Callbacks that do nothing, for tests that only care about listener
    /// lifecycle.
    pub fn noop() -> Callbacks {
        Callbacks {
            on_msg: Arc::new(|_msg| {}),
            on_err: Arc::new(|_err| {}),
        }
    }
}

/// Runs the receive loop until `cancel` is set. Invoked on its own thread
/// by `Socket::listen`.
pub fn run(socket: Arc<Socket>, callbacks: Callbacks, cancel: Arc<AtomicBool>) {
    if let Err(err) = set_recv_timeout(socket.raw(), CANCEL_POLL_INTERVAL_MS) {
        error!(socket.log(), "failed to set receive timeout"; "err" => %err);
        return;
    }

    while !cancel.load(Ordering::SeqCst) {
        match receive_one(socket.raw()) {
            Ok(Some((datagram, src, dst))) => {
                handle_datagram(&socket, &datagram, src, dst, &callbacks);
            }
            Ok(None) => continue, // timed out, loop to recheck `cancel`
            Err(err) => {
                warn!(socket.log(), "receive error"; "err" => %err);
                (callbacks.on_err)(Error::Receive(err));
            }
        }
    }
    trace!(socket.log(), "receive worker exiting"; "socket" => socket.id());
}

fn handle_datagram(
    socket: &Arc<Socket>,
    datagram: &[u8],
    src: Ipv6Addr,
    dst: Ipv6Addr,
    callbacks: &Callbacks,
) {
    let (header, body) = match wire::decode_message(datagram) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(socket.log(), "dropping malformed datagram"; "err" => %err);
            (callbacks.on_err)(err);
            return;
        }
    };

    let mut msg = Message::from_bytes(body, header.op);
    msg.socket_id = socket.id();
    msg.src = Some(src);
    msg.dst = Some(dst);

    if let Some(channel) = crate::registry().by_address(&dst.to_string()) {
        channel.update_clock(header.seq, header.rnd);

        if let Some(ctx) = channel.context() {
            let store = ctx.store();
            let log_result = store.insert_message(&LogEntry {
                src,
                dst,
                seq: header.seq,
                rnd: header.rnd,
                channel: channel.uri(),
                msg: body,
            });
            if let Err(err) = log_result {
                warn!(socket.log(), "failed to log message"; "err" => %err);
            }

            if header.op == Opcode::Set {
                if let Ok((key, value)) = wire::decode_set_payload(body) {
                    let result = store.insert_keyval_channel(&KeyvalEntry {
                        src,
                        seq: header.seq,
                        rnd: header.rnd,
                        channel: channel.uri(),
                        k: key,
                        v: value,
                    });
                    if let Err(err) = result {
                        warn!(socket.log(), "failed to persist keyval"; "err" => %err);
                    }
                }
            }
        }
    }

    (callbacks.on_msg)(msg);
}

fn set_recv_timeout(fd: RawFd, millis: i64) -> std::io::Result<()> {
    let tv = libc::timeval {
        tv_sec: millis / 1000,
        tv_usec: (millis % 1000) * 1000,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Blocks in one `recvmsg` call (bounded by `SO_RCVTIMEO`), returning the
/// datagram bytes plus the recovered `(src, dst)` pair on success, `None`
/// on a timeout (so the caller can recheck cancellation), or an I/O error.
fn receive_one(fd: RawFd) -> std::io::Result<Option<(Vec<u8>, Ipv6Addr, Ipv6Addr)>> {
    let mut buf = vec![0u8; wire::MAX_DATAGRAM_LEN];
    let mut name: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    let mut cmsg_buf = [0u8; 128];

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_name = &mut name as *mut _ as *mut libc::c_void;
    msghdr.msg_namelen = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;
    msghdr.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msghdr.msg_controllen = cmsg_buf.len() as _;

    let n = unsafe { libc::recvmsg(fd, &mut msghdr, 0) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        return match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Ok(None),
            _ => Err(err),
        };
    }

    let src = Ipv6Addr::from(name.sin6_addr.s6_addr);
    let dst = extract_pktinfo_addr(&msghdr).unwrap_or(Ipv6Addr::UNSPECIFIED);

    buf.truncate(n as usize);
    Ok(Some((buf, src, dst)))
}

/// Walks the ancillary data looking for `IPV6_PKTINFO`, returning the
/// packet's destination address.
fn extract_pktinfo_addr(msghdr: &libc::msghdr) -> Option<Ipv6Addr> {
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msghdr);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_PKTINFO {
                let pktinfo = libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo;
                return Some(Ipv6Addr::from((*pktinfo).ipi6_addr.s6_addr));
            }
            cmsg = libc::CMSG_NXTHDR(msghdr, cmsg);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callbacks_do_not_panic() {
        let callbacks = Callbacks::noop();
        (callbacks.on_msg)(Message::new(crate::wire::Opcode::Set));
        (callbacks.on_err)(Error::ThreadJoin);
    }
}
