use crate::config::DEFAULT_LOG_FILTER;
use crate::peer::types::IceCandidate;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the build-dependent default. Calling this more than
/// once (or after another subscriber was installed) is harmless.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// Trace one trickled candidate
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        label,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        username_fragment = ?cand.username_fragment,
        "trickle candidate"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        dump_candidate(
            "LOCAL",
            &IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host"),
        );
    }
}
