//! Socket (spec.md §4.F).
//!
//! `lc_socket_new` opens an IPv6 datagram endpoint, sets
//! `IPV6_RECVPKTINFO` so the receive path can recover the destination
//! address from ancillary data, and hands the caller an id. `listen` spins
//! up exactly one worker per socket (`SOCKET_LISTENING` guards against a
//! second); `listen_cancel` stops it cooperatively. The original cancels
//! a POSIX thread blocked in `recvmsg` with `pthread_cancel`; Rust has no
//! safe equivalent, so the worker's socket carries a short `SO_RCVTIMEO`
//! and the worker polls a cancellation flag between timed-out `recvmsg`
//! calls — still cooperative, still only checked at what is logically the
//! single blocking call, but expressible without unsafe thread control.

use std::net::Ipv6Addr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::logging::{debug, trace, Logger};
use crate::random::random_u32;
use crate::recv::{self, Callbacks};

/// How often the worker's blocking receive times out to check for a
/// cancellation request.
pub const CANCEL_POLL_INTERVAL_MS: i64 = 200;

/// Sentinel stored in `Socket::fd` once the descriptor has been closed, so
/// a later `Drop` (or a second `close()`) doesn't close a fd number the
/// kernel may since have handed to an unrelated descriptor.
const CLOSED_FD: libc::c_int = -1;

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// An IPv6 datagram socket plus at most one receive worker. Weakly
/// references the `Context` it was created under, the same non-owning
/// relationship `Channel` holds.
pub struct Socket {
    id: u32,
    fd: AtomicI32,
    ctx: Weak<Context>,
    worker: Mutex<Option<Worker>>,
    log: Logger,
}

impl Socket {
    /// `lc_socket_new`: creates the descriptor and sets `IPV6_RECVPKTINFO`.
    pub fn new(ctx: &Arc<Context>, log: Logger) -> Result<Arc<Socket>> {
        let id = random_u32()?;
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::SocketCreate(std::io::Error::last_os_error()));
        }

        let on: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_RECVPKTINFO,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of_val(&on) as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::SocketConfigure(err));
        }

        debug!(log, "created socket"; "id" => id, "fd" => fd);
        Ok(Arc::new(Socket {
            id,
            fd: AtomicI32::new(fd),
            ctx: Arc::downgrade(ctx),
            worker: Mutex::new(None),
            log,
        }))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The Context this socket was created under, if it's still alive.
    pub fn context(&self) -> Option<Arc<Context>> {
        self.ctx.upgrade()
    }

    /// `lc_socket_raw`: escape hatch for selection/polling. Returns a
    /// negative value if the socket has already been closed.
    pub fn raw(&self) -> RawFd {
        self.fd.load(Ordering::SeqCst)
    }

    pub(crate) fn log(&self) -> &Logger {
        &self.log
    }

    /// Binds this socket to `addr` with `SO_REUSEADDR` set first, the way
    /// `lc_channel_bind` prepares a socket before `bind(2)`.
    pub fn bind(&self, addr: Ipv6Addr, port: u16) -> Result<()> {
        let fd = self.raw();
        let on: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of_val(&on) as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(Error::SocketConfigure(std::io::Error::last_os_error()));
        }

        let mut sockaddr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
        sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sockaddr.sin6_port = port.to_be();
        sockaddr.sin6_addr = libc::in6_addr {
            s6_addr: addr.octets(),
        };

        let rc = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(Error::SocketBind(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// `lc_socket_listen`: starts exactly one receive worker (spec.md
    /// §4.H) with copies of the two callbacks.
    pub fn listen(self: &Arc<Self>, callbacks: Callbacks) -> Result<()> {
        let mut guard = self.worker.lock().unwrap();
        if guard.is_some() {
            return Err(Error::SocketListening);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let worker_socket = self.clone();

        trace!(self.log, "starting receive worker"; "socket" => self.id);
        let handle = std::thread::spawn(move || {
            recv::run(worker_socket, callbacks, worker_cancel);
        });

        *guard = Some(Worker { handle, cancel });
        Ok(())
    }

    /// `lc_socket_listen_cancel`: requests cancellation at the worker's
    /// next poll of the blocking receive and joins it.
    pub fn listen_cancel(&self) -> Result<()> {
        let worker = self.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        worker.cancel.store(true, Ordering::SeqCst);
        worker.handle.join().map_err(|_| Error::ThreadJoin)?;
        Ok(())
    }

    /// `lc_socket_close`: cancels the listener and closes the descriptor.
    /// Swaps `fd` for `CLOSED_FD` first, so the descriptor is closed
    /// exactly once even if `Drop` runs later on the same `Socket`.
    pub fn close(&self) -> Result<()> {
        self.listen_cancel()?;
        let fd = self.fd.swap(CLOSED_FD, Ordering::SeqCst);
        if fd == CLOSED_FD {
            return Ok(());
        }
        let rc = unsafe { libc::close(fd) };
        if rc != 0 {
            return Err(Error::SocketConfigure(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.listen_cancel();
        let fd = self.fd.swap(CLOSED_FD, Ordering::SeqCst);
        if fd != CLOSED_FD {
            unsafe { libc::close(fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::logging::discard_logger;

    #[test]
    fn new_socket_has_a_valid_fd() {
        let ctx = Arc::new(Context::new_for_test());
        let sock = Socket::new(&ctx, discard_logger()).unwrap();
        assert!(sock.raw() >= 0);
        assert!(sock.context().is_some());
    }

    #[test]
    fn double_listen_is_rejected() {
        let ctx = Arc::new(Context::new_for_test());
        let sock = Socket::new(&ctx, discard_logger()).unwrap();
        let callbacks = Callbacks::noop();
        sock.listen(callbacks.clone()).unwrap();
        let err = sock.listen(callbacks).unwrap_err();
        assert!(matches!(err, Error::SocketListening));
        sock.listen_cancel().unwrap();
    }

    #[test]
    fn listen_cancel_without_a_worker_is_a_noop() {
        let ctx = Arc::new(Context::new_for_test());
        let sock = Socket::new(&ctx, discard_logger()).unwrap();
        sock.listen_cancel().unwrap();
    }

    #[test]
    fn close_then_drop_does_not_double_close() {
        let ctx = Arc::new(Context::new_for_test());
        let sock = Socket::new(&ctx, discard_logger()).unwrap();
        sock.close().unwrap();
        assert_eq!(sock.raw(), CLOSED_FD);
        // Dropping here must not attempt a second `libc::close` on a
        // recycled fd number; `close()` already rendered it inert.
    }

    #[test]
    fn context_is_none_once_context_is_dropped() {
        let ctx = Arc::new(Context::new_for_test());
        let sock = Socket::new(&ctx, discard_logger()).unwrap();
        drop(ctx);
        assert!(sock.context().is_none());
    }
}
