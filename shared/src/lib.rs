use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Batik motif regions the reference model was trained on, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum BatikClass {
    Bangkalan,
    Pamekasan,
    Sampang,
    Sumenep,
}

impl BatikClass {
    pub fn names() -> Vec<String> {
        Self::iter().map(|class| class.to_string()).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub class: String,
    pub confidence: f32,
    pub image_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub classes: Vec<String>,
}
