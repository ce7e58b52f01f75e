//! Where each line-chart series gets its portrait.

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::{FallbackPolicy, PlacementMode, PlacementParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlacementKind {
    /// Last index of the series.
    Last,
    /// Accepted by the random sampler.
    Sampled,
    /// Sampler gave up and the fallback policy placed it.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Placement {
    pub index: usize,
    pub value: f64,
    pub kind: PlacementKind,
}

/// Places points for one chart, remembering what it already placed.
pub struct Placer<'a, R: Rng> {
    params: &'a PlacementParams,
    rng: R,
    placed: Vec<Placement>,
}

impl<'a, R: Rng> Placer<'a, R> {
    pub fn new(params: &'a PlacementParams, rng: R) -> Self {
        Self {
            params,
            rng,
            placed: Vec::new(),
        }
    }

    pub fn placed(&self) -> &[Placement] {
        &self.placed
    }

    pub fn place(&mut self, gains: &[f64]) -> Option<Placement> {
        let placement = match self.params.mode {
            PlacementMode::Last => last_point(gains, PlacementKind::Last),
            PlacementMode::Random => self.sample(gains).or_else(|| match self.params.fallback {
                FallbackPolicy::Last => last_point(gains, PlacementKind::Fallback),
                FallbackPolicy::Skip => None,
            }),
        }?;
        self.placed.push(placement);
        Some(placement)
    }

    fn sample(&mut self, gains: &[f64]) -> Option<Placement> {
        let n = gains.len();
        if n == 0 {
            return None;
        }
        let lo = self.params.edge_margin;
        let hi = n.saturating_sub(self.params.edge_margin).min(n - 1);
        if lo > hi {
            debug!("series of {} points too short to sample", n);
            return None;
        }
        for _ in 0..self.params.attempts {
            let index = self.rng.gen_range(lo..=hi);
            let value = gains[index];
            if value.is_finite() && self.is_clear(index, value) {
                return Some(Placement {
                    index,
                    value,
                    kind: PlacementKind::Sampled,
                });
            }
        }
        debug!(
            "no free spot after {} attempts in [{}, {}]",
            self.params.attempts, lo, hi
        );
        None
    }

    /// A candidate collides only when it is close on both axes at once.
    fn is_clear(&self, index: usize, value: f64) -> bool {
        !self.placed.iter().any(|p| {
            (p.index as f64 - index as f64).abs() < self.params.min_index_gap
                && (p.value - value).abs() < self.params.min_value_gap
        })
    }
}

fn last_point(gains: &[f64], kind: PlacementKind) -> Option<Placement> {
    gains
        .iter()
        .enumerate()
        .rev()
        .find(|(_, v)| v.is_finite())
        .map(|(index, &value)| Placement { index, value, kind })
}

/// One optional placement per series, in series order.
pub fn choose_placements<R: Rng>(
    series: &[&[f64]],
    params: &PlacementParams,
    rng: R,
) -> Vec<Option<Placement>> {
    let mut placer = Placer::new(params, rng);
    series.iter().map(|gains| placer.place(gains)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_params() -> PlacementParams {
        PlacementParams {
            mode: PlacementMode::Random,
            ..PlacementParams::default()
        }
    }

    fn ramp(n: usize, slope: f64, offset: f64) -> Vec<f64> {
        (0..n).map(|i| offset + slope * i as f64).collect()
    }

    #[test]
    fn test_last_mode_anchors_at_last_index() {
        let gains = ramp(30, 0.5, 0.0);
        let placements = choose_placements(
            &[gains.as_slice()],
            &PlacementParams::default(),
            StdRng::seed_from_u64(1),
        );
        let p = placements[0].unwrap();
        assert_eq!(p.index, 29);
        assert_eq!(p.value, gains[29]);
        assert_eq!(p.kind, PlacementKind::Last);
    }

    #[test]
    fn test_last_mode_skips_trailing_missing_values() {
        let gains = vec![0.0, 1.0, 2.0, f64::NAN];
        let params = PlacementParams::default();
        let mut placer = Placer::new(&params, StdRng::seed_from_u64(1));
        assert_eq!(placer.place(&gains).unwrap().index, 2);
    }

    #[test]
    fn test_random_indices_stay_inside_margin() {
        let params = random_params();
        for seed in 0..200 {
            let gains = ramp(12 + seed as usize % 50, 1.0, 0.0);
            let mut placer = Placer::new(&params, StdRng::seed_from_u64(seed));
            let p = placer.place(&gains).unwrap();
            assert_eq!(p.kind, PlacementKind::Sampled);
            assert!(p.index >= 5 && p.index <= gains.len() - 5, "index {}", p.index);
        }
    }

    #[test]
    fn test_sampled_points_respect_separation() {
        let params = random_params();
        let series: Vec<Vec<f64>> = (0..8).map(|i| ramp(200, 0.05, i as f64 * 0.7)).collect();
        let refs: Vec<&[f64]> = series.iter().map(|s| s.as_slice()).collect();
        for seed in 0..50 {
            let mut placer = Placer::new(&params, StdRng::seed_from_u64(seed));
            for gains in &refs {
                placer.place(gains);
            }
            let sampled: Vec<&Placement> = placer
                .placed()
                .iter()
                .filter(|p| p.kind == PlacementKind::Sampled)
                .collect();
            for (i, a) in sampled.iter().enumerate() {
                for b in &sampled[i + 1..] {
                    let close_x = (a.index as f64 - b.index as f64).abs() < params.min_index_gap;
                    let close_y = (a.value - b.value).abs() < params.min_value_gap;
                    assert!(!(close_x && close_y), "{a:?} collides with {b:?}");
                }
            }
        }
    }

    #[test]
    fn test_fallback_policy_when_no_spot_is_free() {
        let flat = vec![0.0; 20];
        let mut params = random_params();
        params.min_index_gap = 1000.0;
        params.min_value_gap = 1000.0;

        let mut placer = Placer::new(&params, StdRng::seed_from_u64(7));
        assert_eq!(placer.place(&flat).unwrap().kind, PlacementKind::Sampled);
        let fallback = placer.place(&flat).unwrap();
        assert_eq!(fallback.kind, PlacementKind::Fallback);
        assert_eq!(fallback.index, 19);

        params.fallback = FallbackPolicy::Skip;
        let mut placer = Placer::new(&params, StdRng::seed_from_u64(7));
        assert!(placer.place(&flat).is_some());
        assert!(placer.place(&flat).is_none());
        assert_eq!(placer.placed().len(), 1);
    }

    #[test]
    fn test_short_series_falls_back() {
        let gains = ramp(7, 1.0, 0.0);
        let placements = choose_placements(&[gains.as_slice()], &random_params(), StdRng::seed_from_u64(3));
        let p = placements[0].unwrap();
        assert_eq!(p.kind, PlacementKind::Fallback);
        assert_eq!(p.index, 6);
    }

    #[test]
    fn test_same_seed_same_placements() {
        let series: Vec<Vec<f64>> = (0..4).map(|i| ramp(150, 0.1, i as f64 * 3.0)).collect();
        let refs: Vec<&[f64]> = series.iter().map(|s| s.as_slice()).collect();
        let a = choose_placements(&refs, &random_params(), StdRng::seed_from_u64(42));
        let b = choose_placements(&refs, &random_params(), StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
