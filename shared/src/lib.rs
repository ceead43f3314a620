use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

/// Ordered severity categories produced by the classifier. The declaration
/// order is the model's output order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    Serialize,
    Deserialize,
)]
pub enum SeverityLevel {
    #[strum(serialize = "Extremely Mild")]
    #[serde(rename = "Extremely Mild")]
    ExtremelyMild,
    Mild,
    Moderate,
    Severe,
}

impl SeverityLevel {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn index(self) -> usize {
        Self::iter().position(|level| level == self).unwrap_or_default()
    }

    pub fn labels() -> Vec<String> {
        Self::iter().map(|level| level.to_string()).collect()
    }

    pub const fn count() -> usize {
        Self::COUNT
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub severity_level: u8,
    pub label: String,
    pub confidence: f32,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "OK".into(),
            message: "Server is running.".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}
