//! CSRF tokens and the Referer allow-list used by the pre-flight check.
//!
//! Tokens are stateless: `base64(HMAC-SHA256(secret_key, "csrf:" + account_id))`. A token is
//! therefore only valid for the identity it was issued to, and rotating `secret_key` revokes
//! every outstanding token.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use hmac::{Hmac, Mac, digest::InvalidLength};
use sha2::Sha256;

use crate::auth::Identity;

type HmacSha256 = Hmac<Sha256>;

pub trait CsrfValidator: Send + Sync {
    /// Issue a token bound to `identity`
    fn issue(&self, identity: &Identity) -> String;

    fn validate(&self, token: &str, identity: &Identity) -> bool;
}

pub trait RefererAllowlist: Send + Sync {
    fn contains(&self, host: &str) -> bool;
}

pub struct HmacCsrfValidator {
    keyed: HmacSha256,
}

impl HmacCsrfValidator {
    pub fn new(secret_key: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret_key.as_bytes())?,
        })
    }

    fn mac(&self, identity: &Identity) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(b"csrf:");
        mac.update(identity.account_id.as_bytes());
        mac
    }
}

impl CsrfValidator for HmacCsrfValidator {
    fn issue(&self, identity: &Identity) -> String {
        BASE64_STANDARD.encode(self.mac(identity).finalize().into_bytes())
    }

    fn validate(&self, token: &str, identity: &Identity) -> bool {
        let Ok(provided) = BASE64_STANDARD.decode(token.trim()) else {
            return false;
        };
        // Constant-time comparison
        self.mac(identity).verify_slice(&provided).is_ok()
    }
}

/// Exact, case-insensitive host match.
#[derive(Debug, Clone, Default)]
pub struct HostAllowlist {
    hosts: Vec<String>,
}

impl HostAllowlist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts.into_iter().map(|h| h.as_ref().trim().to_ascii_lowercase()).collect(),
        }
    }
}

impl RefererAllowlist for HostAllowlist {
    fn contains(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|allowed| *allowed == host)
    }
}
