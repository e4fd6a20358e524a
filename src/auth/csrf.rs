//! Double-submit anti-forgery tokens.
//!
//! The browser holds a random nonce in the [`COOKIE_NAME`] cookie. Every form
//! carries `nonce.mac`, where `mac` is HMAC-SHA256 of the nonce under the
//! application secret. A submission is genuine when the MAC verifies and the
//! nonce matches the cookie.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "csrf_token";

const NONCE_LEN: usize = 32;

/// Token to embed in a form, plus the cookie to set when the request had none.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub set_cookie: Option<String>,
}

#[derive(Clone)]
pub struct CsrfGuard {
    mac: HmacSha256,
    secure_cookie: bool,
}

impl CsrfGuard {
    pub fn new(secret: &str, secure_cookie: bool) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("csrf key: {e}"))?;
        Ok(Self { mac, secure_cookie })
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    fn sign(&self, nonce: &str) -> String {
        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Reuses the cookie nonce when it is well formed, otherwise mints one.
    pub fn issue(&self, cookie_nonce: Option<&str>) -> IssuedToken {
        match cookie_nonce.filter(|n| is_nonce(n)) {
            Some(nonce) => IssuedToken {
                token: format!("{nonce}.{}", self.sign(nonce)),
                set_cookie: None,
            },
            None => {
                let mut raw = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut raw);
                let nonce = hex::encode(raw);
                IssuedToken {
                    token: format!("{nonce}.{}", self.sign(&nonce)),
                    set_cookie: Some(self.cookie(&nonce)),
                }
            }
        }
    }

    pub fn verify(&self, cookie_nonce: Option<&str>, token: &str) -> bool {
        let Some(cookie_nonce) = cookie_nonce else {
            return false;
        };
        let Some((nonce, sig)) = token.split_once('.') else {
            return false;
        };
        if !is_nonce(nonce) || !is_nonce(cookie_nonce) {
            return false;
        }
        let Ok(sig) = hex::decode(sig) else {
            return false;
        };
        // Both nonces must carry the same MAC; no plain comparison of the cookie.
        self.signs(cookie_nonce, &sig) & self.signs(nonce, &sig)
    }

    fn signs(&self, nonce: &str, sig: &[u8]) -> bool {
        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        mac.verify_slice(sig).is_ok()
    }

    fn cookie(&self, nonce: &str) -> String {
        let mut cookie = format!("{COOKIE_NAME}={nonce}; Path=/; HttpOnly; SameSite=Lax");
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

fn is_nonce(s: &str) -> bool {
    s.len() == NONCE_LEN * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
