//! Random Source (spec.md §4.B).
//!
//! The original `lc_getrandom` opens `/dev/urandom` and reads into the
//! caller's buffer, failing the whole call rather than ever returning a
//! short read:
//!
//! ```c
//! int lc_getrandom(void *buf, size_t buflen, unsigned int flags)
//! {
//!     if ((fd = open("/dev/urandom", O_RDONLY)) == -1)
//!         return lc_error_log(LOG_ERROR, LC_ERROR_RANDOM_OPEN);
//!     if ((len = read(fd, buf, buflen)) == -1)
//!         return lc_error_log(LOG_ERROR, LC_ERROR_RANDOM_READ);
//!     close(fd);
//!     return 0;
//! }
//! ```
//!
//! `getrandom` is the idiomatic replacement: it talks to the same kernel
//! entropy source (`getrandom(2)`, falling back to `/dev/urandom`) and
//! never returns a partial fill.

use crate::error::{Error, Result};

/// Reserved for future use, mirrors the unused `flags` parameter of
/// `lc_getrandom`.
pub type Flags = u32;

/// Fills `buf` with cryptographically strong random bytes, or fails
/// entirely — never partially fills `buf`.
pub fn random_bytes(buf: &mut [u8], _flags: Flags) -> Result<()> {
    getrandom::getrandom(buf).map_err(|err| Error::RandomRead(err.into()))
}

/// Draws a fresh random `u64`, used for per-channel nonces (`rnd`) and for
/// seeding the process-wide id counters in `Context::new`.
pub fn random_u64() -> Result<u64> {
    let mut buf = [0u8; 8];
    random_bytes(&mut buf, 0)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Draws a fresh random `u32`, used for object ids.
pub fn random_u32() -> Result<u32> {
    let mut buf = [0u8; 4];
    random_bytes(&mut buf, 0)?;
    Ok(u32::from_ne_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_the_whole_buffer() {
        let mut buf = [0u8; 32];
        random_bytes(&mut buf, 0).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn successive_draws_differ() {
        let a = random_u64().unwrap();
        let b = random_u64().unwrap();
        assert_ne!(a, b);
    }
}
