use super::{FeedEnvelope, Signature};
use crate::anchors::build_anchors;
use crate::logging::{log_anim, log_sample, ProfileScope};
use crate::render::AnimationWindow;
use crate::state::{AppState, Trend};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// New data applied; derived views and the poll timer need refreshing.
    Updated(IngestReport),
    /// Newest sample matches the last ingest; nothing touched.
    Unchanged,
    /// Fewer than two usable samples; nothing touched.
    Insufficient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub samples: usize,
    pub updated_at_server: f64,
    pub interval_secs: f64,
    pub anim: AnimationWindow,
}

/// Apply a fetched envelope to shared state.
///
/// The animation runs from the previous sample to the newest one, starting
/// now and ending at the predicted next update.
pub fn ingest_feed(state: &mut AppState, envelope: &FeedEnvelope, now_server: f64) -> IngestOutcome {
    let _scope = ProfileScope::new("ingest_feed");

    let samples = envelope.samples();
    let n = samples.len();
    if n < 2 {
        return IngestOutcome::Insufficient;
    }

    let prev = samples[n - 2];
    let latest = samples[n - 1];
    let signature = Signature::from(&latest);
    if state.signature == Some(signature) {
        return IngestOutcome::Unchanged;
    }
    state.signature = Some(signature);

    let interval = envelope.interval_secs();
    let updated_at = envelope.updated_at_or(latest.ts);
    state.interval_secs = Some(interval);
    state.updated_at_server = Some(updated_at);

    state.last_value = Some(prev.value);
    state.target_value = Some(latest.value);
    state.trend = Trend::between(prev.value, latest.value);

    let next_update = updated_at + interval;
    let anim = AnimationWindow::new(prev.value, latest.value, now_server, next_update);
    state.anim = Some(anim);

    state.anchors = build_anchors(&samples);
    state.samples = samples;

    log_sample(updated_at, next_update, n);
    log_anim(anim.start_value, anim.target_value, anim.start_server, anim.duration_secs);

    IngestOutcome::Updated(IngestReport {
        samples: n,
        updated_at_server: updated_at,
        interval_secs: interval,
        anim,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_last_two_samples() {
        let env = FeedEnvelope::from_pairs(Some(1000), Some(60), &[(1000, 110.0), (940, 100.0)]);
        let mut st = AppState::default();
        let out = ingest_feed(&mut st, &env, 1000.0);
        assert!(matches!(out, IngestOutcome::Updated(_)));
        assert_eq!(st.last_value, Some(100.0));
        assert_eq!(st.target_value, Some(110.0));
        assert_eq!(st.trend, Trend::Up);
        assert_eq!(st.anim.unwrap().duration_secs, 60.0);
        assert_eq!(st.samples.len(), 2);
    }

    #[test]
    fn insufficient_leaves_state_alone() {
        let env = FeedEnvelope::from_pairs(Some(1000), Some(60), &[(1000, 110.0)]);
        let mut st = AppState::default();
        assert_eq!(ingest_feed(&mut st, &env, 1000.0), IngestOutcome::Insufficient);
        assert!(st.signature.is_none());
        assert!(st.target_value.is_none());
    }

    #[test]
    fn missing_meta_uses_defaults() {
        let env = FeedEnvelope::parse(r#"{"prices":[{"ts":0,"value":5},{"ts":60,"value":4}]}"#).unwrap();
        let mut st = AppState::default();
        match ingest_feed(&mut st, &env, 100.0) {
            IngestOutcome::Updated(r) => {
                assert_eq!(r.interval_secs, 60.0);
                assert_eq!(r.updated_at_server, 60.0);
                // predicted update (120) is 20s out
                assert_eq!(r.anim.duration_secs, 20.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(st.trend, Trend::Down);
    }
}
