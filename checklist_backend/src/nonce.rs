//! Short-lived authenticity tokens bound to a user and an action.
//!
//! A token is valid for the tick it was minted in and the one after, where a
//! tick is half the configured lifetime.

use crate::config::NonceConfig;
use chrono::Utc;
use sha2::{Digest, Sha256};

pub const TOGGLE_ACTION: &str = "update_checkbox_state";

const TOKEN_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct NonceIssuer {
    secret: String,
    lifetime_secs: u64,
}

impl NonceIssuer {
    pub fn new(config: &NonceConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            lifetime_secs: config.lifetime_secs,
        }
    }

    pub fn create(&self, action: &str, user_id: i64) -> String {
        self.create_at(action, user_id, now_secs())
    }

    pub fn verify(&self, nonce: &str, action: &str, user_id: i64) -> bool {
        self.verify_at(nonce, action, user_id, now_secs())
    }

    fn tick(&self, now: u64) -> u64 {
        let half = (self.lifetime_secs / 2).max(1);
        now.div_ceil(half)
    }

    fn token(&self, tick: u64, action: &str, user_id: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{tick}|{action}|{user_id}|{}", self.secret).as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..TOKEN_LEN].to_string()
    }

    pub(crate) fn create_at(&self, action: &str, user_id: i64, now: u64) -> String {
        self.token(self.tick(now), action, user_id)
    }

    pub(crate) fn verify_at(&self, nonce: &str, action: &str, user_id: i64, now: u64) -> bool {
        if nonce.len() != TOKEN_LEN {
            return false;
        }
        let tick = self.tick(now);
        [tick, tick.saturating_sub(1)]
            .iter()
            .any(|candidate| constant_time_eq(&self.token(*candidate, action, user_id), nonce))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
