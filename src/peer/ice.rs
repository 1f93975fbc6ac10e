use crate::peer::connection::PeerController;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Remote candidates received before the remote description was set
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!(queued = self.queue.len() + 1, "remote description not set yet, queuing candidate");
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Empties the queue, oldest first
    pub fn take_all(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }
}

/// Applies every queued candidate in arrival order, returns how many were accepted.
/// A rejected candidate is logged and skipped; the rest still go in.
pub async fn apply_pending_candidates(
    peer: &dyn PeerController,
    pending: &mut PendingCandidates,
) -> usize {
    let mut applied = 0;
    for candidate in pending.take_all() {
        debug!(candidate = %candidate.candidate, "applying pending candidate");
        match peer.add_remote_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(error = %e, "failed to apply pending candidate"),
        }
    }
    applied
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );

    if summary.relay == 0 {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    summary
}
