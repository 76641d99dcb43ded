use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub type EventId = i64;
pub type Receipt = String;

// Requests carry no body; both remote endpoints are plain GETs.

/// One scheduled game as served by `GET /schedule`.
///
/// String fields default to empty when the upstream feed omits them so a
/// sparse payload deserializes instead of erroring. Entries without both
/// team names are dropped during normalization, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub stadium: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub status: String,
}
impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} @ {} | {} {} | {}, {}",
            self.id, self.away_team, self.home_team, self.date, self.time, self.stadium, self.city
        )
    }
}

// Responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub success: bool,
    #[serde(default)]
    pub schedule: Vec<Event>,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The payload unlocked by payment. Fetched fresh per request and never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub matchup: String,
    #[serde(default)]
    pub date: Option<String>,
    pub statistical_analysis: StatisticalAnalysis,
    #[serde(default)]
    pub confidence_scores: HashMap<String, f64>,
    #[serde(default)]
    pub betting_recommendations: Vec<BetRecommendation>,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatisticalAnalysis {
    #[serde(default)]
    pub advantages: HashMap<String, Vec<String>>,
}
/// Market-consensus and key-number entries carry no odds or confidence,
/// hence the options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub bet: String,
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub explanation: String,
}
