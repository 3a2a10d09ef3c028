use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;
use crate::routing::tree::StopCriterion;

/// Decay settings in the form they are written in configuration files, e.g.
/// `{ type: hansen, beta: 0.002, cutoffTime: 1800 }`. Missing cutoffs mean "no limit".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff_distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
}

/// Time (seconds) and distance (meters) ceiling. Unset limits are `f64::INFINITY`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cutoff {
    pub time: f64,
    pub distance: f64,
}

impl Cutoff {
    pub fn new(time: Option<f64>, distance: Option<f64>) -> Result<Self, ConfigError> {
        let time = time.unwrap_or(f64::INFINITY);
        let distance = distance.unwrap_or(f64::INFINITY);
        for (name, value) in [("cutoffTime", time), ("cutoffDistance", distance)] {
            if value.is_nan() || value < 0. {
                return Err(ConfigError::InvalidCutoff { name, value });
            }
        }
        Ok(Cutoff { time, distance })
    }

    pub fn unlimited() -> Self {
        Cutoff {
            time: f64::INFINITY,
            distance: f64::INFINITY,
        }
    }

    fn is_unlimited(&self) -> bool {
        self.time.is_infinite() && self.distance.is_infinite()
    }
}

/// Turns the cost of reaching a destination into a weight multiplier and bounds how far the
/// trees have to grow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayFunction {
    /// `exp(-beta * cost)`. The cutoff only bounds tree growth.
    Hansen { beta: f64, cutoff: Cutoff },
    /// Everything within the cutoff counts fully, everything beyond not at all.
    Isochrone { cutoff: Cutoff },
}

impl DecayFunction {
    pub fn hansen(
        beta: f64,
        cutoff_time: Option<f64>,
        cutoff_distance: Option<f64>,
    ) -> Result<Self, ConfigError> {
        if !beta.is_finite() || beta < 0. {
            return Err(ConfigError::InvalidBeta(beta));
        }
        Ok(DecayFunction::Hansen {
            beta,
            cutoff: Cutoff::new(cutoff_time, cutoff_distance)?,
        })
    }

    pub fn isochrone(
        cutoff_time: Option<f64>,
        cutoff_distance: Option<f64>,
    ) -> Result<Self, ConfigError> {
        let cutoff = Cutoff::new(cutoff_time, cutoff_distance)?;
        if cutoff.is_unlimited() {
            return Err(ConfigError::MissingParameter {
                decay: "isochrone",
                parameter: "cutoffTime or cutoffDistance",
            });
        }
        Ok(DecayFunction::Isochrone { cutoff })
    }

    pub fn cutoff(&self) -> Cutoff {
        match *self {
            DecayFunction::Hansen { cutoff, .. } | DecayFunction::Isochrone { cutoff } => cutoff,
        }
    }

    /// Non increasing in `cost`, 1 for a cost of 0 and 0 for unreachable destinations.
    #[inline]
    pub fn decay(&self, cost: f64) -> f64 {
        if !cost.is_finite() {
            return 0.;
        }
        match *self {
            DecayFunction::Hansen { beta, .. } => (-beta * cost).exp(),
            DecayFunction::Isochrone { .. } => 1.,
        }
    }

    #[inline]
    pub fn within_cutoff(&self, distance: f64, time: f64) -> bool {
        let cutoff = self.cutoff();
        distance <= cutoff.distance && time <= cutoff.time
    }

    #[inline]
    pub fn beyond_cutoff(&self, distance: f64, time: f64) -> bool {
        !self.within_cutoff(distance, time)
    }

    /// Decay applied only to destinations within the cutoff.
    #[inline]
    pub fn weight(&self, cost: f64, distance: f64, time: f64) -> f64 {
        if self.within_cutoff(distance, time) {
            self.decay(cost)
        } else {
            0.
        }
    }

    pub fn tree_stop_criterion(&self) -> StopCriterion {
        let cutoff = self.cutoff();
        if cutoff.is_unlimited() {
            StopCriterion::Unbounded
        } else {
            StopCriterion::Cutoff {
                max_distance: cutoff.distance,
                max_time: cutoff.time,
            }
        }
    }
}

impl TryFrom<DecayParameters> for DecayFunction {
    type Error = ConfigError;

    fn try_from(parameters: DecayParameters) -> Result<Self, Self::Error> {
        match parameters.kind.to_lowercase().as_str() {
            "hansen" => {
                let beta = parameters.beta.ok_or(ConfigError::MissingParameter {
                    decay: "hansen",
                    parameter: "beta",
                })?;
                DecayFunction::hansen(beta, parameters.cutoff_time, parameters.cutoff_distance)
            }
            "isochrone" => {
                if parameters.beta.is_some() {
                    warn!("beta is ignored for isochrone decay.");
                }
                DecayFunction::isochrone(parameters.cutoff_time, parameters.cutoff_distance)
            }
            _ => Err(ConfigError::UnknownDecayType(parameters.kind)),
        }
    }
}

impl From<DecayFunction> for DecayParameters {
    fn from(decay: DecayFunction) -> Self {
        let cutoff = decay.cutoff();
        let finite = |v: f64| v.is_finite().then_some(v);
        let (kind, beta) = match decay {
            DecayFunction::Hansen { beta, .. } => ("hansen", Some(beta)),
            DecayFunction::Isochrone { .. } => ("isochrone", None),
        };
        DecayParameters {
            kind: kind.to_string(),
            cutoff_time: finite(cutoff.time),
            cutoff_distance: finite(cutoff.distance),
            beta,
        }
    }
}

/// Beta for which a share `percentile` of all trips has a decay of at least `1 - percentile`, given
/// the cost at that percentile: `-ln(1 - p) / cost`.
pub fn estimate_beta(percentile: f64, cost_at_percentile: f64) -> Result<f64, ConfigError> {
    if !(percentile > 0. && percentile < 1.) {
        return Err(ConfigError::InvalidPercentile(percentile));
    }
    if !cost_at_percentile.is_finite() || cost_at_percentile <= 0. {
        return Err(ConfigError::InvalidPercentileCost(cost_at_percentile));
    }
    Ok(-(1. - percentile).ln() / cost_at_percentile)
}

/// [`estimate_beta`] with the percentile cost taken from observed trip costs (nearest rank).
/// Non finite and negative observations are ignored.
pub fn estimate_beta_from_costs(costs: &[f64], percentile: f64) -> Result<f64, ConfigError> {
    if !(percentile > 0. && percentile < 1.) {
        return Err(ConfigError::InvalidPercentile(percentile));
    }
    let mut sorted: Vec<f64> = costs
        .iter()
        .copied()
        .filter(|c| c.is_finite() && *c >= 0.)
        .collect();
    if sorted.is_empty() {
        return Err(ConfigError::EmptyCostSample);
    }
    sorted.sort_by(f64::total_cmp);

    let rank = (percentile * sorted.len() as f64).ceil() as usize;
    let cost = sorted[rank.clamp(1, sorted.len()) - 1];
    estimate_beta(percentile, cost)
}
