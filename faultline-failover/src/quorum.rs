use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faultline_grid::GridMember;

use crate::bootstrap::Bootstrapper;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Whether the cluster currently has enough members to trust local
/// scheduling decisions.
pub enum QuorumState {
    Present,
    NotPresent,
}

#[derive(Clone)]
/// The hard gate every scheduling decision reads before acting.
///
/// Initialised to [`QuorumState::NotPresent`] at startup and flipped only by
/// quorum-change notifications. Handlers skip triggering entirely while
/// quorum is absent; the skipped work is recovered by the bootstrapper once
/// quorum returns.
pub struct QuorumGate {
    present: Arc<AtomicBool>,
}

impl QuorumGate {
    pub(crate) fn new() -> Self {
        Self {
            present: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> QuorumState {
        if self.is_present() {
            QuorumState::Present
        } else {
            QuorumState::NotPresent
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

/// Applies quorum transitions: flip the gate, then recover or suspend local
/// scheduling accordingly.
pub struct QuorumHandler {
    gate: QuorumGate,
    bootstrap: Bootstrapper,
}

impl QuorumHandler {
    pub(crate) fn new(gate: QuorumGate, bootstrap: Bootstrapper) -> Self {
        Self { gate, bootstrap }
    }

    pub async fn on_quorum_change(&self, present: bool, members: &[GridMember]) {
        if present {
            info!(
                num_members = members.len(),
                "Cluster quorum established, recovering application tasks.",
            );
            self.gate.set(true);
            self.bootstrap.initialize_application_tasks().await;
        } else {
            warn!(
                num_members = members.len(),
                "Cluster quorum lost, suspending local scheduling.",
            );
            self.gate.set(false);
            self.bootstrap.remove_all_schedules_from_current_node().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_absent() {
        let gate = QuorumGate::new();
        assert_eq!(gate.state(), QuorumState::NotPresent);
        assert!(!gate.is_present());

        gate.set(true);
        assert_eq!(gate.state(), QuorumState::Present);
    }
}
