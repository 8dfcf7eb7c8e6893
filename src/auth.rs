//! Cookie authentication for the control port.
//!
//! Tor writes a 32-byte secret to `CookieAuthFile` when
//! `CookieAuthentication` is enabled; controllers prove local access by
//! presenting it hex-encoded in `AUTHENTICATE`.

use std::fmt;
use std::io;
use std::path::Path;

/// Length of the cookie Tor writes.
pub const COOKIE_LEN: usize = 32;

/// The control-port authentication cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCookie(Vec<u8>);

impl AuthCookie {
    /// Wrap raw cookie bytes, checking their length.
    pub fn from_bytes(bytes: Vec<u8>) -> io::Result<Self> {
        if bytes.len() != COOKIE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cookie has invalid length {} (expected {})",
                    bytes.len(),
                    COOKIE_LEN
                ),
            ));
        }
        Ok(AuthCookie(bytes))
    }

    /// Read the cookie Tor wrote at `path`.
    pub async fn read(path: &Path) -> io::Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to read cookie file '{}': {}", path.display(), e),
            )
        })?;
        Self::from_bytes(bytes)
    }

    /// Upper-case hex rendering for the AUTHENTICATE command.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    /// Raw cookie bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AuthCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCookie([{} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_length_checked() {
        assert!(AuthCookie::from_bytes(vec![0u8; 31]).is_err());
        assert!(AuthCookie::from_bytes(vec![0u8; 33]).is_err());
        assert!(AuthCookie::from_bytes(vec![0u8; 32]).is_ok());
    }

    #[test]
    fn test_cookie_hex_is_upper() {
        let cookie = AuthCookie::from_bytes(vec![0xab; 32]).unwrap();
        assert_eq!(cookie.to_hex(), "AB".repeat(32));
    }

    #[test]
    fn test_cookie_debug_hides_bytes() {
        let cookie = AuthCookie::from_bytes(vec![0x42; 32]).unwrap();
        let shown = format!("{:?}", cookie);
        assert_eq!(shown, "AuthCookie([32 bytes])");
    }

    #[tokio::test]
    async fn test_cookie_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AuthCookie::read(&dir.path().join("control_auth_cookie"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cookie_read_roundtrip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_auth_cookie");
        std::fs::write(&path, [7u8; 32]).unwrap();
        let cookie = AuthCookie::read(&path).await.unwrap();
        assert_eq!(cookie.as_bytes(), &[7u8; 32]);
    }
}
