use std::collections::HashMap;

use xai_core::types::Timestamp;
use xai_core::RejectReason;

/// Per-peer replay defense: a bounded set of recently accepted message
/// nonces. A nonce is remembered for the TTL window; seeing it again inside
/// the window is a replay.
#[derive(Debug, Default)]
pub struct NonceWindow {
    seen: HashMap<u128, Timestamp>,
}

impl NonceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record `nonce` at `now`. Rejects a nonce already seen within
    /// `ttl_secs`; entries older than the window are forgotten first, so the
    /// set stays bounded by the peer's message rate × TTL.
    pub fn observe(&mut self, nonce: u128, now: Timestamp, ttl_secs: i64) -> Result<(), RejectReason> {
        self.seen.retain(|_, seen_at| now - *seen_at <= ttl_secs);
        if self.seen.contains_key(&nonce) {
            return Err(RejectReason::ReplayNonce(format!("nonce {nonce} already seen")));
        }
        self.seen.insert(nonce, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_within_window_rejected() {
        let mut w = NonceWindow::new();
        w.observe(42, 100, 300).unwrap();
        assert!(matches!(
            w.observe(42, 200, 300),
            Err(RejectReason::ReplayNonce(_))
        ));
    }

    #[test]
    fn nonce_reusable_after_ttl() {
        let mut w = NonceWindow::new();
        w.observe(42, 100, 300).unwrap();
        // 301 seconds later the old entry has aged out.
        w.observe(42, 401, 300).unwrap();
    }

    #[test]
    fn window_stays_bounded() {
        let mut w = NonceWindow::new();
        for n in 0..100u128 {
            w.observe(n, n as i64, 10).unwrap();
        }
        assert!(w.len() <= 12, "entries beyond the TTL are pruned");
    }
}
