//! Cost drivers and their probability distributions.
//!
//! External JSON keeps the dashboard shape: a concrete driver is
//! `{ id, name, category?, distType, cost: { mean, min, max, ... } }` and an
//! abstract driver groups concrete ones under `concreteCostDrivers`.

use serde::{Deserialize, Serialize};

/// Probability distribution of a cost driver, one parameter record per case.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Uniform { min: f64, max: f64 },
    Triangular { min: f64, mode: f64, max: f64 },
    Normal { mean: f64, std_dev: f64 },
    Lognormal { geo_mean: f64, gsd: f64 },
    Deterministic { mean: f64 },
    /// A `distType` this version does not know. Maps to no value.
    Unknown(String),
}

impl Distribution {
    /// The `distType` string used in persisted data.
    pub fn dist_type(&self) -> &str {
        match self {
            Distribution::Uniform { .. } => "uniform",
            Distribution::Triangular { .. } => "triangular",
            Distribution::Normal { .. } => "normal",
            Distribution::Lognormal { .. } => "lognormal",
            Distribution::Deterministic { .. } => "deterministic",
            Distribution::Unknown(name) => name,
        }
    }

    /// Central parameter used when a driver carries no explicit mean.
    pub fn central_value(&self) -> Option<f64> {
        match *self {
            Distribution::Uniform { min, max } => Some((min + max) / 2.0),
            Distribution::Triangular { min, mode, max } => Some((min + mode + max) / 3.0),
            Distribution::Normal { mean, .. } => Some(mean),
            Distribution::Lognormal { geo_mean, .. } => Some(geo_mean),
            Distribution::Deterministic { mean } => Some(mean),
            Distribution::Unknown(_) => None,
        }
    }

    /// Check the parameter invariants. Unknown distributions pass: they are
    /// reported when mapped, not rejected up front.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        match *self {
            Distribution::Uniform { min, max } => {
                if !finite(&[min, max]) {
                    return Err("uniform bounds must be finite".into());
                }
                if min > max {
                    return Err(format!("uniform min {min} exceeds max {max}"));
                }
            }
            Distribution::Triangular { min, mode, max } => {
                if !finite(&[min, mode, max]) {
                    return Err("triangular parameters must be finite".into());
                }
                if !(min <= mode && mode <= max) {
                    return Err(format!("triangular needs min <= mode <= max, got {min}/{mode}/{max}"));
                }
                if min == max {
                    return Err("triangular needs min < max".into());
                }
            }
            Distribution::Normal { mean, std_dev } => {
                if !finite(&[mean, std_dev]) || std_dev < 0.0 {
                    return Err(format!("normal needs finite mean and stdDev >= 0, got {mean}/{std_dev}"));
                }
            }
            Distribution::Lognormal { geo_mean, gsd } => {
                if !finite(&[geo_mean, gsd]) || gsd <= 0.0 {
                    return Err(format!("lognormal needs gsd > 0, got {gsd}"));
                }
            }
            Distribution::Deterministic { mean } => {
                if !mean.is_finite() {
                    return Err("deterministic mean must be finite".into());
                }
            }
            Distribution::Unknown(_) => {}
        }
        Ok(())
    }
}

/// A concrete cost driver with its sampling distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCostDriver", into = "RawCostDriver")]
pub struct CostDriver {
    pub id: String,
    pub name: String,
    /// Id of the abstract driver this concrete driver belongs to.
    pub category: String,
    pub distribution: Distribution,
    /// Nominal cost, used wherever the driver is held fixed.
    pub mean: f64,
}

impl CostDriver {
    /// Build a driver whose nominal mean is the distribution's central value.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        distribution: Distribution,
    ) -> Self {
        let mean = distribution.central_value().unwrap_or(0.0);
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            distribution,
            mean,
        }
    }

    pub fn with_mean(mut self, mean: f64) -> Self {
        self.mean = mean;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    std_dev: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geo_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gsd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCostDriver {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dist_type: Option<String>,
    #[serde(default)]
    cost: RawCost,
}

impl TryFrom<RawCostDriver> for CostDriver {
    type Error = String;

    fn try_from(raw: RawCostDriver) -> std::result::Result<Self, Self::Error> {
        let cost = &raw.cost;
        let need = |field: Option<f64>, label: &str| {
            field.ok_or_else(|| format!("driver {}: missing cost.{label}", raw.id))
        };
        let distribution = match raw.dist_type.as_deref() {
            Some("uniform") => Distribution::Uniform {
                min: need(cost.min, "min")?,
                max: need(cost.max, "max")?,
            },
            Some("triangular") => Distribution::Triangular {
                min: need(cost.min, "min")?,
                mode: need(cost.mode, "mode")?,
                max: need(cost.max, "max")?,
            },
            Some("normal") => Distribution::Normal {
                mean: need(cost.mean, "mean")?,
                std_dev: need(cost.std_dev, "stdDev")?,
            },
            Some("lognormal") => Distribution::Lognormal {
                geo_mean: need(cost.geo_mean, "geoMean")?,
                gsd: need(cost.gsd, "gsd")?,
            },
            Some("deterministic") | None => Distribution::Deterministic {
                mean: need(cost.mean, "mean")?,
            },
            Some(other) => Distribution::Unknown(other.to_string()),
        };
        let mean = cost
            .mean
            .or_else(|| distribution.central_value())
            .unwrap_or(0.0);

        Ok(CostDriver {
            id: raw.id,
            name: raw.name,
            category: raw.category,
            distribution,
            mean,
        })
    }
}

impl From<CostDriver> for RawCostDriver {
    fn from(driver: CostDriver) -> Self {
        let mut cost = RawCost {
            mean: Some(driver.mean),
            ..RawCost::default()
        };
        match driver.distribution {
            Distribution::Uniform { min, max } => {
                cost.min = Some(min);
                cost.max = Some(max);
            }
            Distribution::Triangular { min, mode, max } => {
                cost.min = Some(min);
                cost.mode = Some(mode);
                cost.max = Some(max);
            }
            Distribution::Normal { std_dev, .. } => cost.std_dev = Some(std_dev),
            Distribution::Lognormal { geo_mean, gsd } => {
                cost.geo_mean = Some(geo_mean);
                cost.gsd = Some(gsd);
            }
            Distribution::Deterministic { .. } | Distribution::Unknown(_) => {}
        }
        // The normal mean is the sampling mean; keep it authoritative in the output.
        if let Distribution::Normal { mean, .. } = driver.distribution {
            cost.mean = Some(mean);
        }
        let dist_type = driver.distribution.dist_type().to_string();
        RawCostDriver {
            id: driver.id,
            name: driver.name,
            category: driver.category,
            dist_type: Some(dist_type),
            cost,
        }
    }
}

/// A group of concrete cost drivers, as owned by a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractCostDriver {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub concrete_cost_drivers: Vec<CostDriver>,
}

/// Per-iteration snapshot of a concrete driver with a fixed scalar cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledCostDriver {
    pub id: String,
    pub name: String,
    pub category: String,
    pub cost: f64,
}

impl SampledCostDriver {
    pub fn from_driver(driver: &CostDriver, cost: f64) -> Self {
        Self {
            id: driver.id.clone(),
            name: driver.name.clone(),
            category: driver.category.clone(),
            cost,
        }
    }
}

/// Abstract driver shape handed to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledAbstractDriver {
    pub id: String,
    pub concrete_cost_drivers: Vec<SampledCostDriver>,
}

/// Flatten abstract drivers into the concrete list, preserving order and
/// tagging each concrete driver with its abstract driver id.
pub fn flatten(abstract_drivers: &[AbstractCostDriver]) -> Vec<CostDriver> {
    abstract_drivers
        .iter()
        .flat_map(|group| {
            group.concrete_cost_drivers.iter().map(|concrete| CostDriver {
                category: group.id.clone(),
                ..concrete.clone()
            })
        })
        .collect()
}

/// Group sampled concrete drivers back by category, in first-seen order.
pub fn rebuild(sampled: &[SampledCostDriver]) -> Vec<SampledAbstractDriver> {
    let mut groups: Vec<SampledAbstractDriver> = Vec::new();
    for driver in sampled {
        match groups.iter_mut().find(|g| g.id == driver.category) {
            Some(group) => group.concrete_cost_drivers.push(driver.clone()),
            None => groups.push(SampledAbstractDriver {
                id: driver.category.clone(),
                concrete_cost_drivers: vec![driver.clone()],
            }),
        }
    }
    groups
}
