//! Test requests: test identifiers, input data and options

use crate::errors::{EngineError, Result};
use crate::precision::RoundingMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// TEST IDENTIFIERS
// =============================================================================

/// Every hypothesis test the engine can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    OneSampleT,
    TwoSampleT,
    WelchT,
    PairedT,
    OneWayAnova,
    VarianceRatioF,
    BrownForsythe,
    ChiSquareGoodnessOfFit,
    ChiSquareIndependence,
    BinomialExact,
    FisherExact,
    ExactMultinomial,
    MannWhitneyU,
    WilcoxonSignedRank,
    KruskalWallis,
    Pearson,
    Spearman,
    LinearRegression,
    TheilSen,
}

/// Test families, one implementation module each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFamily {
    Location,
    Anova,
    VarianceRatio,
    Categorical,
    RankBased,
    Correlation,
    Regression,
}

impl TestType {
    pub const ALL: [TestType; 19] = [
        TestType::OneSampleT,
        TestType::TwoSampleT,
        TestType::WelchT,
        TestType::PairedT,
        TestType::OneWayAnova,
        TestType::VarianceRatioF,
        TestType::BrownForsythe,
        TestType::ChiSquareGoodnessOfFit,
        TestType::ChiSquareIndependence,
        TestType::BinomialExact,
        TestType::FisherExact,
        TestType::ExactMultinomial,
        TestType::MannWhitneyU,
        TestType::WilcoxonSignedRank,
        TestType::KruskalWallis,
        TestType::Pearson,
        TestType::Spearman,
        TestType::LinearRegression,
        TestType::TheilSen,
    ];

    pub fn family(&self) -> TestFamily {
        match self {
            TestType::OneSampleT | TestType::TwoSampleT | TestType::WelchT | TestType::PairedT => {
                TestFamily::Location
            }
            TestType::OneWayAnova => TestFamily::Anova,
            TestType::VarianceRatioF | TestType::BrownForsythe => TestFamily::VarianceRatio,
            TestType::ChiSquareGoodnessOfFit
            | TestType::ChiSquareIndependence
            | TestType::BinomialExact
            | TestType::FisherExact
            | TestType::ExactMultinomial => TestFamily::Categorical,
            TestType::MannWhitneyU | TestType::WilcoxonSignedRank | TestType::KruskalWallis => {
                TestFamily::RankBased
            }
            TestType::Pearson | TestType::Spearman => TestFamily::Correlation,
            TestType::LinearRegression | TestType::TheilSen => TestFamily::Regression,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::OneSampleT => "one_sample_t",
            TestType::TwoSampleT => "two_sample_t",
            TestType::WelchT => "welch_t",
            TestType::PairedT => "paired_t",
            TestType::OneWayAnova => "one_way_anova",
            TestType::VarianceRatioF => "variance_ratio_f",
            TestType::BrownForsythe => "brown_forsythe",
            TestType::ChiSquareGoodnessOfFit => "chi_square_goodness_of_fit",
            TestType::ChiSquareIndependence => "chi_square_independence",
            TestType::BinomialExact => "binomial_exact",
            TestType::FisherExact => "fisher_exact",
            TestType::ExactMultinomial => "exact_multinomial",
            TestType::MannWhitneyU => "mann_whitney_u",
            TestType::WilcoxonSignedRank => "wilcoxon_signed_rank",
            TestType::KruskalWallis => "kruskal_wallis",
            TestType::Pearson => "pearson",
            TestType::Spearman => "spearman",
            TestType::LinearRegression => "linear_regression",
            TestType::TheilSen => "theil_sen",
        }
    }

    /// Omnibus tests have a single rejection region in the upper tail
    pub fn is_omnibus(&self) -> bool {
        matches!(
            self,
            TestType::OneWayAnova
                | TestType::BrownForsythe
                | TestType::ChiSquareGoodnessOfFit
                | TestType::ChiSquareIndependence
                | TestType::KruskalWallis
                | TestType::ExactMultinomial
        )
    }

    /// Parametric tests whose validity rests on distributional assumptions
    pub fn is_parametric(&self) -> bool {
        matches!(
            self,
            TestType::OneSampleT
                | TestType::TwoSampleT
                | TestType::WelchT
                | TestType::PairedT
                | TestType::OneWayAnova
                | TestType::VarianceRatioF
                | TestType::ChiSquareGoodnessOfFit
                | TestType::ChiSquareIndependence
                | TestType::Pearson
                | TestType::LinearRegression
        )
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        TestType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::validation("test_type", format!("unknown test type '{s}'")))
    }
}

impl fmt::Display for TestFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestFamily::Location => "location",
            TestFamily::Anova => "anova",
            TestFamily::VarianceRatio => "variance_ratio",
            TestFamily::Categorical => "categorical",
            TestFamily::RankBased => "rank_based",
            TestFamily::Correlation => "correlation",
            TestFamily::Regression => "regression",
        };
        f.write_str(name)
    }
}

/// Alternative hypothesis direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tails {
    #[default]
    TwoSided,
    Less,
    Greater,
}

impl fmt::Display for Tails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tails::TwoSided => write!(f, "two_sided"),
            Tails::Less => write!(f, "less"),
            Tails::Greater => write!(f, "greater"),
        }
    }
}

// =============================================================================
// INPUT DATA
// =============================================================================

/// One labelled group of raw observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub label: String,
    pub values: Vec<f64>,
}

impl Sample {
    pub fn new(label: &str, values: Vec<f64>) -> Self {
        Self {
            label: label.to_string(),
            values,
        }
    }
}

/// Group described by its sufficient statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    #[serde(default)]
    pub label: String,
    pub n: u64,
    pub mean: f64,
    pub sd: f64,
}

/// Test input, tagged by shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestData {
    Samples { groups: Vec<Sample> },
    Paired { first: Vec<f64>, second: Vec<f64> },
    Summary { groups: Vec<SummaryStats> },
    Frequencies {
        observed: Vec<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<Vec<f64>>,
    },
    Contingency { table: Vec<Vec<u64>> },
    Binomial { successes: u64, trials: u64 },
    Bivariate { x: Vec<f64>, y: Vec<f64> },
}

impl TestData {
    pub fn kind(&self) -> &'static str {
        match self {
            TestData::Samples { .. } => "samples",
            TestData::Paired { .. } => "paired",
            TestData::Summary { .. } => "summary",
            TestData::Frequencies { .. } => "frequencies",
            TestData::Contingency { .. } => "contingency",
            TestData::Binomial { .. } => "binomial",
            TestData::Bivariate { .. } => "bivariate",
        }
    }

    /// Observation counts per group (or cell totals for count data)
    pub fn sample_sizes(&self) -> Vec<u64> {
        match self {
            TestData::Samples { groups } => groups.iter().map(|g| g.values.len() as u64).collect(),
            TestData::Paired { first, .. } => vec![first.len() as u64],
            TestData::Summary { groups } => groups.iter().map(|g| g.n).collect(),
            TestData::Frequencies { observed, .. } => {
                vec![observed.iter().fold(0u64, |acc, &c| acc.saturating_add(c))]
            }
            TestData::Contingency { table } => {
                vec![table.iter().flatten().fold(0u64, |acc, &c| acc.saturating_add(c))]
            }
            TestData::Binomial { trials, .. } => vec![*trials],
            TestData::Bivariate { x, .. } => vec![x.len() as u64],
        }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

fn default_alpha() -> f64 {
    0.05
}

/// A single test request
///
/// Treated as immutable once submitted: every stage borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    pub test_type: TestType,
    pub data: TestData,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub tails: Tails,
    /// Significant digits; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default)]
    pub rounding: RoundingMode,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl TestRequest {
    pub fn new(test_type: TestType, data: TestData) -> Self {
        Self {
            test_type,
            data,
            alpha: default_alpha(),
            tails: Tails::TwoSided,
            precision: None,
            rounding: RoundingMode::HalfEven,
            options: BTreeMap::new(),
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_tails(mut self, tails: Tails) -> Self {
        self.tails = tails;
        self
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// Same request re-targeted at another test, used by the recommender switch
    pub fn retarget(&self, test_type: TestType) -> Self {
        Self {
            test_type,
            ..self.clone()
        }
    }

    /// Numeric option; a present but non-numeric value is a validation error
    pub fn option_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.options.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                EngineError::validation(key, format!("expected a number, got {value}"))
            }),
        }
    }

    pub fn option_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.options.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| {
                EngineError::validation(key, format!("expected a boolean, got {value}"))
            }),
        }
    }

    /// String-list option; a single string is accepted as a one-element list
    pub fn option_strings(&self, key: &str) -> Result<Vec<String>> {
        match self.options.get(key) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        EngineError::validation(key, "expected a list of strings")
                    })
                })
                .collect(),
            Some(value) => Err(EngineError::validation(
                key,
                format!("expected a list of strings, got {value}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_type_round_trips_through_its_name() {
        for t in TestType::ALL {
            assert_eq!(t.as_str().parse::<TestType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("t_test".parse::<TestType>().is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: TestRequest = serde_json::from_value(json!({
            "test_type": "welch_t",
            "data": {"kind": "samples", "groups": [
                {"label": "a", "values": [1.0, 2.0]},
                {"label": "b", "values": [3.0, 4.0]}
            ]}
        }))
        .unwrap();
        assert_eq!(request.alpha, 0.05);
        assert_eq!(request.tails, Tails::TwoSided);
        assert_eq!(request.precision, None);
        assert_eq!(request.data.sample_sizes(), vec![2, 2]);
    }

    #[test]
    fn test_option_accessors() {
        let request = TestRequest::new(TestType::OneSampleT, TestData::Paired {
            first: vec![],
            second: vec![],
        })
        .with_option("mu", json!(2.5))
        .with_option("exact", json!("yes"))
        .with_option("variables", json!("dose"));
        assert_eq!(request.option_f64("mu").unwrap(), Some(2.5));
        assert_eq!(request.option_f64("p0").unwrap(), None);
        assert!(request.option_bool("exact").is_err());
        assert_eq!(request.option_strings("variables").unwrap(), vec!["dose"]);
    }

    #[test]
    fn test_families_cover_all_types() {
        let omnibus: Vec<_> = TestType::ALL.iter().filter(|t| t.is_omnibus()).collect();
        assert_eq!(omnibus.len(), 6);
        assert_eq!(TestType::TheilSen.family(), TestFamily::Regression);
        assert_eq!(TestType::BrownForsythe.family(), TestFamily::VarianceRatio);
    }
}
