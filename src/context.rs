//! Context (spec.md §4.E, §10 TAP + bridge association).
//!
//! `lc_ctx_new` seeds the id counters from the random source, stands up a
//! process-wide bridge (idempotently), creates a TAP interface, brings it
//! up, attaches it to the bridge, opens the store, and creates schema —
//! unwinding everything created so far if a later step fails. `lc_ctx_free`
//! closes the TAP fd and the store and is safe to call on an absent
//! Context. `lc_ctx_get_id` is buggy in the original: on a null context it
//! falls through the switch and returns `0` instead of signalling
//! `CTX_REQUIRED`. A live `Context` in this crate always has an id, so the
//! only place that bug would have mattered — looking a Context up by id
//! and not finding one — is handled explicitly with `Error::CtxRequired`
//! wherever that lookup is exposed.
//!
//! The link-layer bridging itself is an external collaborator (spec.md
//! §1's "out of scope... the link-layer bridging and TAP creation"); the
//! `TapProvider` trait is the seam, and `NullTap` is the in-crate stand-in
//! used so `Context::new` works without root privileges or a kernel TAP
//! driver.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::logging::{debug, Logger};
use crate::random::random_u32;
use crate::store::Store;

/// An externally-assigned TAP interface, attached to the process-wide
/// bridge associated with a `Context`.
pub trait TapProvider: Send + Sync {
    /// Creates a TAP device, brings it up, and attaches it to the given
    /// bridge, returning the kernel-assigned interface name.
    fn create_and_attach(&self, bridge: &str) -> Result<String>;

    /// Tears down the interface created by `create_and_attach`.
    fn destroy(&self, tapname: &str) -> Result<()>;
}

/// A `TapProvider` that creates nothing: `Context::new` is usable in
/// environments (CI, plain developer machines) without a TAP driver or the
/// privileges to manage one.
#[derive(Default)]
pub struct NullTap;

impl TapProvider for NullTap {
    fn create_and_attach(&self, _bridge: &str) -> Result<String> {
        Ok("lc-null-tap".to_string())
    }

    fn destroy(&self, _tapname: &str) -> Result<()> {
        Ok(())
    }
}

/// Name of the process-wide bridge every Context's TAP interface attaches
/// to, mirroring the single bridge `lc_bridge_init` ensures exists.
pub const DEFAULT_BRIDGE_NAME: &str = "lc-bridge0";

/// A librecast context: the root handle owning a TAP attachment and a
/// store connection.
pub struct Context {
    id: u32,
    tapname: String,
    store: Store,
    log: Logger,
}

impl Context {
    /// `lc_ctx_new`: seeds the id from the random source, attaches a TAP
    /// interface to the process-wide bridge via `tap`, and opens the store
    /// at `store_path`, creating schema. Any failure after TAP creation
    /// tears the TAP interface back down before returning the error.
    pub fn new(tap: &dyn TapProvider, store_path: &Path, log: Logger) -> Result<Context> {
        let id = random_u32()?;
        debug!(log, "creating context"; "id" => id);

        let tapname = tap.create_and_attach(DEFAULT_BRIDGE_NAME)?;

        match Store::open(store_path, log.clone()) {
            Ok(store) => Ok(Context {
                id,
                tapname,
                store,
                log,
            }),
            Err(err) => {
                let _ = tap.destroy(&tapname);
                Err(err)
            }
        }
    }

    /// Opens a context backed by an in-memory store, for tests that don't
    /// want a file on disk.
    #[cfg(test)]
    pub fn new_for_test() -> Context {
        let log = crate::logging::discard_logger();
        Context {
            id: 1,
            tapname: "lc-null-tap".to_string(),
            store: Store::open_in_memory(log.clone()).unwrap(),
            log,
        }
    }

    /// `lc_ctx_get_id`.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn tapname(&self) -> &str {
        &self.tapname
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Default store file path used when a caller doesn't override it via
    /// `with_store_path`.
    pub fn default_store_path() -> PathBuf {
        PathBuf::from(crate::DEFAULT_STORE_PATH)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        debug!(self.log, "dropping context"; "id" => self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;
    use tempfile::tempdir;

    #[test]
    fn new_context_has_a_nonzero_store() {
        let dir = tempdir().unwrap();
        let ctx = Context::new(&NullTap, &dir.path().join("store.db"), discard_logger()).unwrap();
        assert_eq!(ctx.tapname(), "lc-null-tap");
    }

    #[test]
    fn tap_is_torn_down_on_store_open_failure() {
        // A directory path cannot be opened as a sqlite file; `Store::open`
        // fails and `Context::new` must surface the error rather than
        // panicking or leaking the TAP attachment.
        let dir = tempdir().unwrap();
        let result = Context::new(&NullTap, dir.path(), discard_logger());
        assert!(result.is_err());
    }
}
