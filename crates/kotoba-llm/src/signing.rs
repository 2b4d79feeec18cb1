//! Request-signing capability for the remote client.
//!
//! The remote service authenticates requests with signed headers; the
//! concrete scheme is the deployment's concern, so the client takes an
//! injected [`RequestSigner`]. [`HmacSigner`] is the shipped default;
//! [`NoopSigner`] is for tests and unauthenticated endpoints.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Produces the authentication headers for one request.
pub trait RequestSigner: Send + Sync {
    /// Headers to attach to a `POST url` with `body`.
    fn sign(&self, url: &str, body: &[u8]) -> HashMap<String, String>;
}

/// HMAC-SHA256 signer over `date \n url \n body`.
pub struct HmacSigner {
    key_id: String,
    secret: Vec<u8>,
    region: String,
}

impl HmacSigner {
    /// Create a signer for `key_id`/`secret` scoped to `region`.
    pub fn new(key_id: impl Into<String>, secret: impl Into<Vec<u8>>, region: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
            region: region.into(),
        }
    }
}

impl RequestSigner for HmacSigner {
    fn sign(&self, url: &str, body: &[u8]) -> HashMap<String, String> {
        let date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(date.as_bytes());
        mac.update(b"\n");
        mac.update(url.as_bytes());
        mac.update(b"\n");
        mac.update(body);
        let digest = mac.finalize().into_bytes();

        let mut signature = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(signature, "{byte:02x}");
        }

        HashMap::from([
            ("X-Kotoba-Date".into(), date),
            (
                "Authorization".into(),
                format!(
                    "KOTOBA1-HMAC-SHA256 KeyId={}/{}, Signature={signature}",
                    self.key_id, self.region
                ),
            ),
        ])
    }
}

/// Signer that attaches no headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSigner;

impl RequestSigner for NoopSigner {
    fn sign(&self, _url: &str, _body: &[u8]) -> HashMap<String, String> {
        HashMap::new()
    }
}
