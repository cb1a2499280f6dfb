// src/tracking/association.rs
//
// Nearest-centroid association of detections to active tracks.
//
// Design:
//   - Per-detection greedy match in enumeration order, no global assignment
//   - A detection matches the closest track strictly inside the threshold
//   - Ties go to the first candidate seen (registry iterates by ascending id)
//   - Greedy policy lets two detections claim one track in the same frame;
//     Exclusive policy removes a track from candidacy once claimed

use crate::types::{MatchingPolicy, Point, TrackId, TrackingConfig};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Association {
    Matched { track_id: TrackId, distance: f32 },
    New,
}

#[derive(Debug)]
pub struct Associator {
    threshold: f32,
    policy: MatchingPolicy,
    claimed: BTreeSet<TrackId>,
}

impl Associator {
    pub fn new(threshold: f32, policy: MatchingPolicy) -> Self {
        Self {
            threshold,
            policy,
            claimed: BTreeSet::new(),
        }
    }

    pub fn from_config(cfg: &TrackingConfig) -> Self {
        Self::new(cfg.tracking_threshold, cfg.matching_policy)
    }

    /// Forget the claims of the previous frame.
    pub fn begin_frame(&mut self) {
        self.claimed.clear();
    }

    /// Record that `track_id` was taken this frame (matched or freshly created).
    pub fn claim(&mut self, track_id: TrackId) {
        if !self.claimed.insert(track_id) && self.policy == MatchingPolicy::Greedy {
            debug!(
                "Track {} claimed by more than one detection this frame",
                track_id
            );
        }
    }

    /// Closest candidate strictly within the threshold, ignoring claims.
    pub fn nearest<I>(&self, centroid: &Point, candidates: I) -> Option<(TrackId, f32)>
    where
        I: IntoIterator<Item = (TrackId, Point)>,
    {
        let mut best: Option<(TrackId, f32)> = None;
        for (id, position) in candidates {
            let dist = centroid.distance(&position);
            if dist >= self.threshold {
                continue;
            }
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((id, dist)),
            }
        }
        best
    }

    /// Decide the fate of one detection and record the claim when it matches.
    pub fn associate<I>(&mut self, centroid: &Point, candidates: I) -> Association
    where
        I: IntoIterator<Item = (TrackId, Point)>,
    {
        let exclusive = self.policy == MatchingPolicy::Exclusive;
        let claimed = &self.claimed;
        let available = candidates
            .into_iter()
            .filter(|(id, _)| !exclusive || !claimed.contains(id));

        match self.nearest(centroid, available) {
            Some((track_id, distance)) => {
                self.claim(track_id);
                Association::Matched { track_id, distance }
            }
            None => Association::New,
        }
    }
}
