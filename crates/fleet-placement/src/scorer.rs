//! Host scoring for placement decisions.
//!
//! One explicit weighted formula:
//!
//! ```text
//! score = w_load     · (1 − running / max_containers)
//!       + w_priority · min(priority, 10) / 10
//!       + w_env      · env_match
//! ```
//!
//! `env_match` is 1.0 when the host carries the requested environment tag and
//! 0.5 when the host is untagged or no environment was requested. Hosts
//! tagged with a *different* environment, inactive hosts and hosts at
//! capacity are not eligible at all.
//!
//! Ranking is total: highest score first, then lower load ratio, then higher
//! priority, then the lexicographically smaller host id.

use std::cmp::Ordering;

use serde::Serialize;

use fleet_state::{HostId, HostNode};

/// Priority values above this no longer raise the score.
pub const PRIORITY_CEILING: u32 = 10;

/// A host together with the number of containers it currently runs.
#[derive(Debug, Clone)]
pub struct HostLoad {
    pub host: HostNode,
    pub running: u32,
}

impl HostLoad {
    pub fn new(host: HostNode, running: u32) -> Self {
        Self { host, running }
    }

    pub fn load_ratio(&self) -> f64 {
        if self.host.max_containers == 0 {
            return 1.0;
        }
        self.running as f64 / self.host.max_containers as f64
    }

    pub fn has_capacity(&self) -> bool {
        self.running < self.host.max_containers
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringWeights {
    pub load: f64,
    pub priority: f64,
    pub environment: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            load: 0.6,
            priority: 0.25,
            environment: 0.15,
        }
    }
}

/// Individual score components, kept for justifications.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub load_ratio: f64,
    pub priority: f64,
    pub env_match: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostScore {
    pub host_id: HostId,
    pub score: f64,
    pub running: u32,
    pub capacity: u32,
    pub priority: u32,
    pub breakdown: ScoreBreakdown,
}

impl HostScore {
    /// `h2 score=0.812 load=2/10 priority=1 env=1.0`
    pub fn summary(&self) -> String {
        format!(
            "{} score={:.3} load={}/{} priority={} env={:.1}",
            self.host_id, self.score, self.running, self.capacity, self.priority, self.breakdown.env_match
        )
    }
}

/// Score one host, or `None` if it is not eligible.
pub fn score_host(load: &HostLoad, environment: Option<&str>, weights: &ScoringWeights) -> Option<HostScore> {
    let host = &load.host;
    if !host.is_active() || !load.has_capacity() {
        return None;
    }

    let env_match = match (environment, host.environment.as_deref()) {
        (Some(wanted), Some(tag)) if wanted == tag => 1.0,
        (Some(_), Some(_)) => return None,
        _ => 0.5,
    };

    let load_ratio = load.load_ratio();
    let priority = host.priority.min(PRIORITY_CEILING) as f64 / PRIORITY_CEILING as f64;
    let score = weights.load * (1.0 - load_ratio) + weights.priority * priority + weights.environment * env_match;

    Some(HostScore {
        host_id: host.id.clone(),
        score,
        running: load.running,
        capacity: host.max_containers,
        priority: host.priority,
        breakdown: ScoreBreakdown {
            load_ratio,
            priority,
            env_match,
        },
    })
}

/// Total order: best candidate first.
pub fn compare_scores(a: &HostScore, b: &HostScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.breakdown.load_ratio.total_cmp(&b.breakdown.load_ratio))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.host_id.cmp(&b.host_id))
}

/// Score every eligible host and sort best first.
pub fn rank_hosts(loads: &[HostLoad], environment: Option<&str>, weights: &ScoringWeights) -> Vec<HostScore> {
    let mut scores: Vec<_> = loads
        .iter()
        .filter_map(|l| score_host(l, environment, weights))
        .collect();
    scores.sort_by(compare_scores);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_state::HostStatus;

    fn make_host(id: &str, capacity: u32, running: u32) -> HostLoad {
        let mut host = HostNode::new(id, "10.0.0.1");
        host.max_containers = capacity;
        HostLoad::new(host, running)
    }

    #[test]
    fn lower_load_wins() {
        // Host A: 8/10, host B: 2/10.
        let loads = vec![make_host("a", 10, 8), make_host("b", 10, 2)];
        let ranked = rank_hosts(&loads, None, &ScoringWeights::default());
        assert_eq!(ranked[0].host_id, "b");
        assert_eq!(ranked[1].host_id, "a");
    }

    #[test]
    fn rejects_inactive_and_full_hosts() {
        let mut inactive = make_host("a", 10, 0);
        inactive.host.status = HostStatus::Unreachable;
        let full = make_host("b", 10, 10);
        let weights = ScoringWeights::default();

        assert!(score_host(&inactive, None, &weights).is_none());
        assert!(score_host(&full, None, &weights).is_none());
    }

    #[test]
    fn environment_tags_gate_and_boost() {
        let mut prod = make_host("prod", 10, 5);
        prod.host.environment = Some("prod".into());
        let mut lab = make_host("lab", 10, 0);
        lab.host.environment = Some("lab".into());
        let untagged = make_host("plain", 10, 5);
        let weights = ScoringWeights::default();

        assert!(score_host(&lab, Some("prod"), &weights).is_none());
        let tagged = score_host(&prod, Some("prod"), &weights).unwrap();
        let neutral = score_host(&untagged, Some("prod"), &weights).unwrap();
        assert!(tagged.score > neutral.score);

        let ranked = rank_hosts(&[prod, lab, untagged], Some("prod"), &weights);
        let ids: Vec<_> = ranked.iter().map(|s| s.host_id.as_str()).collect();
        assert_eq!(ids, vec!["prod", "plain"]);
    }

    #[test]
    fn priority_is_capped() {
        let mut high = make_host("a", 10, 0);
        high.host.priority = 50;
        let mut ten = make_host("b", 10, 0);
        ten.host.priority = 10;
        let weights = ScoringWeights::default();

        let a = score_host(&high, None, &weights).unwrap();
        let b = score_host(&ten, None, &weights).unwrap();
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn ties_break_on_priority_then_id() {
        let weights = ScoringWeights {
            load: 1.0,
            priority: 0.0,
            environment: 0.0,
        };
        let mut low = make_host("a", 10, 3);
        low.host.priority = 1;
        let mut high = make_host("b", 10, 3);
        high.host.priority = 5;
        let ranked = rank_hosts(&[low.clone(), high], None, &weights);
        assert_eq!(ranked[0].host_id, "b");

        let twin = make_host("c", 10, 3);
        let ranked = rank_hosts(&[twin, low], None, &weights);
        assert_eq!(ranked[0].host_id, "a");
    }

    #[test]
    fn equal_score_prefers_lower_load() {
        // Priority compensates exactly for the extra load on "busy".
        let weights = ScoringWeights {
            load: 1.0,
            priority: 1.0,
            environment: 0.0,
        };
        let mut busy = make_host("a", 10, 1);
        busy.host.priority = 1;
        let idle = make_host("b", 10, 0);
        let mut idle = idle;
        idle.host.priority = 0;

        let ranked = rank_hosts(&[busy, idle], None, &weights);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].host_id, "b");
    }
}
