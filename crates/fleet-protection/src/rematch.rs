//! Rematch suggestions: which observed container most likely belongs to an
//! asset whose recorded container went missing.
//!
//! Each factor only counts when the asset carries the information needed
//! to evaluate it, and the score is normalized by the weight of the factors
//! that were evaluated:
//!
//! | factor        | weight | earned when                                 |
//! |---------------|--------|---------------------------------------------|
//! | image         | 0.5    | exact reference (0.3 for same repository)   |
//! | name          | 0.3    | one name contains the other                 |
//! | ports         | 0.1    | a container port overlaps                   |
//! | host affinity | 0.1    | container runs on the preferred host        |

use std::collections::BTreeSet;

use serde::Serialize;

use fleet_discovery::ContainerInfo;
use fleet_state::{DeploymentTarget, HostId, parse_port_spec, split_image_ref};

pub const IMAGE_WEIGHT: f64 = 0.5;
pub const IMAGE_STEM_CREDIT: f64 = 0.3;
pub const NAME_WEIGHT: f64 = 0.3;
pub const PORT_WEIGHT: f64 = 0.1;
pub const HOST_WEIGHT: f64 = 0.1;

/// Candidates scoring below this are dropped.
pub const MIN_SCORE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn for_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RematchCandidate {
    pub container_id: String,
    pub container_name: String,
    pub host_id: HostId,
    pub image: String,
    pub score: f64,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
}

fn repo_stem(image: &str) -> String {
    let (repo, _) = split_image_ref(image);
    repo.rsplit('/').next().unwrap_or(&repo).to_ascii_lowercase()
}

fn normalized_ref(image: &str) -> String {
    let (repo, tag) = split_image_ref(image);
    format!("{}:{}", repo.to_ascii_lowercase(), tag)
}

/// Score `containers` against `asset`, best first.
pub fn suggest_rematch(asset: &DeploymentTarget, containers: &[ContainerInfo]) -> Vec<RematchCandidate> {
    let wanted_ports: BTreeSet<u16> = asset
        .ports
        .as_deref()
        .and_then(|spec| parse_port_spec(spec).ok())
        .map(|mappings| mappings.into_iter().map(|m| m.container_port).collect())
        .unwrap_or_default();
    let name = asset.name.trim().to_ascii_lowercase();

    let mut candidates: Vec<_> = containers
        .iter()
        .filter_map(|c| {
            let mut possible = 0.0;
            let mut earned = 0.0;
            let mut reasons = Vec::new();

            if let Some(image) = asset.image.as_deref() {
                possible += IMAGE_WEIGHT;
                if normalized_ref(image) == normalized_ref(&c.image) {
                    earned += IMAGE_WEIGHT;
                    reasons.push(format!("image {} matches", c.image));
                } else if repo_stem(image) == repo_stem(&c.image) {
                    earned += IMAGE_STEM_CREDIT;
                    reasons.push(format!("same repository as {image}"));
                }
            }

            if !name.is_empty() {
                possible += NAME_WEIGHT;
                let container_name = c.name.to_ascii_lowercase();
                if container_name.contains(&name) || (!container_name.is_empty() && name.contains(&container_name)) {
                    earned += NAME_WEIGHT;
                    reasons.push(format!("name {} resembles {}", c.name, asset.name));
                }
            }

            if !wanted_ports.is_empty() {
                possible += PORT_WEIGHT;
                if c.ports.iter().any(|p| wanted_ports.contains(&p.container_port)) {
                    earned += PORT_WEIGHT;
                    reasons.push("container port overlaps".to_string());
                }
            }

            if let Some(preferred) = asset.preferred_host.as_deref() {
                possible += HOST_WEIGHT;
                if c.host_id == preferred {
                    earned += HOST_WEIGHT;
                    reasons.push(format!("on preferred host {preferred}"));
                }
            }

            if possible == 0.0 {
                return None;
            }
            let score = earned / possible;
            (score >= MIN_SCORE).then(|| RematchCandidate {
                container_id: c.id.clone(),
                container_name: c.name.clone(),
                host_id: c.host_id.clone(),
                image: c.image.clone(),
                score,
                confidence: Confidence::for_score(score),
                reasons,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.container_id.cmp(&b.container_id))
    });
    candidates
}
