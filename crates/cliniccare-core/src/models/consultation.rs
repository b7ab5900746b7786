use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Diagnosis;

/// A patient consultation with the diagnoses recorded during it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Consultation {
    pub id: Uuid,
    pub patient_full_name: String,
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
    pub consultation_date: NaiveDateTime,
    #[serde(default)]
    pub notes: String,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub diagnoses: Vec<Diagnosis>,
}

impl Consultation {
    pub fn diagnosis_count(&self) -> usize {
        self.diagnoses.len()
    }

    /// First diagnosis code plus a count of the rest, e.g. `J06.9 +2 more`
    pub fn diagnosis_summary(&self) -> String {
        match self.diagnoses.split_first() {
            None => "No diagnoses".to_string(),
            Some((first, [])) => first.code.clone(),
            Some((first, rest)) => format!("{} +{} more", first.code, rest.len()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ConsultationCreate {
    pub patient_full_name: String,
    pub consultation_date: NaiveDateTime,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub diagnosis_ids: Vec<Uuid>,
}
