//! Risk buckets derived from data quality and emission intensity.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk of a single loan. `intensity` is kg CO2e per $1,000 outstanding.
pub fn loan_risk(data_quality: f64, intensity: f64) -> RiskLevel {
    if data_quality >= 5.0 || intensity > 5.0 {
        RiskLevel::High
    } else if data_quality >= 4.0 || intensity > 3.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Risk of a whole portfolio from its average quality and intensity.
pub fn portfolio_risk(avg_data_quality: f64, intensity: f64) -> RiskLevel {
    if avg_data_quality > 4.0 || intensity > 4.0 {
        RiskLevel::High
    } else if avg_data_quality > 3.0 || intensity > 2.5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Portfolio rule, with sectors of fewer than five loans always high.
pub fn sector_risk(avg_data_quality: f64, intensity: f64, loan_count: usize) -> RiskLevel {
    if loan_count < 5 {
        return RiskLevel::High;
    }
    portfolio_risk(avg_data_quality, intensity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_thresholds() {
        assert_eq!(loan_risk(5.0, 0.0), RiskLevel::High);
        assert_eq!(loan_risk(1.0, 5.01), RiskLevel::High);
        assert_eq!(loan_risk(4.0, 0.0), RiskLevel::Medium);
        assert_eq!(loan_risk(1.0, 3.01), RiskLevel::Medium);
        assert_eq!(loan_risk(3.99, 3.0), RiskLevel::Low);
    }

    #[test]
    fn portfolio_thresholds_are_strict() {
        assert_eq!(portfolio_risk(4.0, 4.0), RiskLevel::Medium);
        assert_eq!(portfolio_risk(4.1, 0.0), RiskLevel::High);
        assert_eq!(portfolio_risk(3.0, 2.5), RiskLevel::Low);
        assert_eq!(portfolio_risk(2.0, 2.6), RiskLevel::Medium);
    }

    #[test]
    fn small_sectors_are_high_risk() {
        assert_eq!(sector_risk(1.0, 0.0, 4), RiskLevel::High);
        assert_eq!(sector_risk(1.0, 0.0, 5), RiskLevel::Low);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_value(RiskLevel::Medium).unwrap(), "medium");
        assert_eq!(RiskLevel::High.to_string(), "high");
    }
}
