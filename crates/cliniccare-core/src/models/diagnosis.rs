use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ICD-10 diagnosis code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Diagnosis {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub created_at: NaiveDateTime,
}
