//! API credentials and HMAC-SHA256 signing.
//!
//! REST: `hex(hmac(secret, timestamp + api_key + recv_window + payload))`
//! where payload is the query string (GET) or the JSON body (POST).
//!
//! Private stream auth: `hex(hmac(secret, "GET/realtime" + expires))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

/// API key pair. The secret is wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// True when both key and secret are set.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| {
            ExchangeError::Auth {
                code: 0,
                message: format!("invalid api secret: {e}"),
            }
        })?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature for a REST request.
    pub fn rest_signature(
        &self,
        timestamp_ms: u64,
        recv_window_ms: u64,
        payload: &str,
    ) -> ExchangeResult<String> {
        self.sign(&format!(
            "{timestamp_ms}{}{recv_window_ms}{payload}",
            self.api_key
        ))
    }

    /// `args` for the private stream `auth` op: `[api_key, expires, signature]`.
    pub fn ws_auth_args(&self, expires_ms: u64) -> ExchangeResult<(String, u64, String)> {
        let signature = self.sign(&format!("GET/realtime{expires_ms}"))?;
        Ok((self.api_key.clone(), expires_ms, signature))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let creds = Credentials::new("k", "Jefe");
        let sig = creds.sign("what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_rest_signature_concatenation() {
        let creds = Credentials::new("key123", "secret");
        let direct = creds
            .sign("1700000000000key1235000category=linear&symbol=BTCUSDT")
            .unwrap();
        let rest = creds
            .rest_signature(1_700_000_000_000, 5000, "category=linear&symbol=BTCUSDT")
            .unwrap();
        assert_eq!(direct, rest);
        assert_eq!(rest.len(), 64);
    }

    #[test]
    fn test_ws_auth_args() {
        let creds = Credentials::new("key123", "secret");
        let (key, expires, sig) = creds.ws_auth_args(1_700_000_010_000).unwrap();
        assert_eq!(key, "key123");
        assert_eq!(expires, 1_700_000_010_000);
        assert_eq!(sig, creds.sign("GET/realtime1700000010000").unwrap());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("key123", "super-secret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("key123"));
        assert!(!printed.contains("super-secret"));
        assert!(creds.is_configured());
        assert!(!Credentials::new("", "").is_configured());
    }
}
