//! Cooperative cancellation threaded through every orchestrator step, backed by a plain `Arc<AtomicBool>` rather than a channel, since the
//! only consumer action is a poll at step boundaries.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use trident_api::{Kind, TridentError};

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Call at the boundary of every orchestrator step.
    pub fn check(&self) -> Result<(), TridentError> {
        if self.is_cancelled() {
            Err(TridentError::new(
                Kind::OperatorError,
                "operation cancelled",
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_succeeds_until_cancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.check().is_err());
    }

    #[test]
    fn clones_share_the_same_cancellation_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
