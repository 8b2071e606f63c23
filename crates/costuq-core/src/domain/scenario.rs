//! The slice of a scenario the analyses read.

use serde::{Deserialize, Deserializer, Serialize};

use super::driver::AbstractCostDriver;
use super::error::ValidationError;

/// Frequencies are percentages and must add up to this.
const FREQUENCY_TOTAL: f64 = 100.0;
const FREQUENCY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub environment_impact_parameters: EnvironmentImpactParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentImpactParameters {
    #[serde(default)]
    pub cost_drivers: Vec<AbstractCostDriver>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// A process variant with its share of executions, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub frequency: f64,
}

impl Scenario {
    /// Variant frequencies must sum to 100%. No variants sum to 0 and fail.
    pub fn validate_frequencies(&self) -> Result<(), ValidationError> {
        let sum: f64 = self
            .environment_impact_parameters
            .variants
            .iter()
            .map(|v| v.frequency)
            .sum();
        if (sum - FREQUENCY_TOTAL).abs() > FREQUENCY_TOLERANCE {
            return Err(ValidationError::FrequencySum { sum });
        }
        Ok(())
    }
}

/// Dashboards store frequencies as either numbers or numeric strings.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario(freqs: serde_json::Value) -> Scenario {
        serde_json::from_value(json!({
            "name": "s1",
            "environmentImpactParameters": {
                "costDrivers": [],
                "variants": freqs
            }
        }))
        .unwrap()
    }

    #[test]
    fn frequencies_summing_to_hundred_pass() {
        let s = scenario(json!([{ "frequency": 40 }, { "frequency": "60" }]));
        assert!(s.validate_frequencies().is_ok());
    }

    #[test]
    fn decimal_frequencies_are_accepted() {
        let s = scenario(json!([{ "frequency": 33.5 }, { "frequency": 66.5 }]));
        assert!(s.validate_frequencies().is_ok());
    }

    #[test]
    fn wrong_sum_is_rejected() {
        let s = scenario(json!([{ "frequency": 40 }, { "frequency": 50 }]));
        assert_eq!(
            s.validate_frequencies(),
            Err(ValidationError::FrequencySum { sum: 90.0 })
        );
    }

    #[test]
    fn scenario_without_variants_is_rejected() {
        let s = scenario(json!([]));
        assert_eq!(
            s.validate_frequencies(),
            Err(ValidationError::FrequencySum { sum: 0.0 })
        );
    }
}
