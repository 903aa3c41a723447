//! Closed error taxonomy for librecast.
//!
//! The original C source returns sentinel `LC_ERROR_*` integers from every
//! call. `server/lib/flux/src/shared.rs` already reshapes that pattern for
//! a Rust library into `NetworkError { Wait, Fatal(ErrorType) }` plus a
//! `From<io::Error>` impl that special-cases `WouldBlock`. We follow the
//! same split, grouped by the seven error kinds in spec.md §7 instead of
//! flux's TCP-channel-specific variants.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 1. Resource construction
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),
    #[error("failed to configure socket: {0}")]
    SocketConfigure(#[source] io::Error),

    // 2. Parameter / state
    #[error("a context is required for this operation")]
    CtxRequired,
    #[error("a socket is required for this operation")]
    SocketRequired,
    #[error("a channel is required for this operation")]
    ChannelRequired,
    #[error("unknown message attribute")]
    MsgAttrUnknown,
    #[error("a listener is already running on this socket")]
    SocketListening,

    // 3. Address / hashing
    #[error("invalid base multicast address")]
    InvalidBaseAddr,
    #[error("failed to initialize hash state")]
    HashInit,
    #[error("failed to update hash state")]
    HashUpdate,
    #[error("failed to finalize hash state")]
    HashFinal,
    #[error("failed to resolve channel group address: {0}")]
    AddrResolve(#[source] io::Error),

    // 4. Network runtime
    #[error("failed to bind socket: {0}")]
    SocketBind(#[source] io::Error),
    #[error("failed to join multicast group")]
    McastJoin,
    #[error("failed to leave multicast group: {0}")]
    McastLeave(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    // 5. Store
    #[error("failed to open store: {0}")]
    DbOpen(#[source] rusqlite::Error),
    #[error("store operation failed: {0}")]
    DbExec(#[source] rusqlite::Error),
    #[error("a store connection is required for this operation")]
    DbRequired,

    // 6. Thread
    #[error("failed to cancel receive worker")]
    ThreadCancel,
    #[error("failed to join receive worker")]
    ThreadJoin,

    // 7. Randomness / misc
    #[error("failed to open entropy source: {0}")]
    RandomOpen(#[source] io::Error),
    #[error("failed to read from entropy source: {0}")]
    RandomRead(#[source] io::Error),
    #[error("allocation failed")]
    Malloc,
}
