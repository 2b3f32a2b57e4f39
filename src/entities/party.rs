// 🏛️ Party Entity - static reference data
//
// Parties carry no area: a PartyList ballot takes its area from the caller.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: i64,
    pub name: String,

    #[serde(default)]
    pub picture_url: Option<String>,
}
