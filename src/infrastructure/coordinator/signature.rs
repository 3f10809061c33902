//! Request signing with the worker's shared secret.
//!
//! `signature = hex(HMAC-SHA256(secret, path + ":" + time))`, with `time` in
//! epoch milliseconds.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The credentials attached to one signed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPath {
    /// Worker account name
    pub username: String,
    /// Hex-encoded signature
    pub signature: String,
    /// Epoch milliseconds the signature was made at
    pub time: i64,
}

impl SignedPath {
    /// Query parameters carrying the signature on HTTP calls.
    pub fn query_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("workerUsername", self.username.clone()),
            ("workerSignature", self.signature.clone()),
            ("workerTime", self.time.to_string()),
        ]
    }
}

/// Signs request paths for one worker account.
#[derive(Clone)]
pub struct RequestSigner {
    username: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Create a signer for `username` keyed with `secret`.
    pub fn new(username: impl Into<String>, secret: &str) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            username: username.into(),
            mac: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    /// Worker account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sign `path` at an explicit time.
    pub fn sign_at(&self, path: &str, time: i64) -> SignedPath {
        let mut mac = self.mac.clone();
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(time.to_string().as_bytes());
        SignedPath {
            username: self.username.clone(),
            signature: hex::encode(mac.finalize().into_bytes()),
            time,
        }
    }

    /// Sign `path` at the current time.
    pub fn sign(&self, path: &str) -> SignedPath {
        self.sign_at(path, chrono::Utc::now().timestamp_millis())
    }
}
