//! Registration record model
//!
//! Field names serialize in the camelCase form the registration form and the
//! document collection have always used (`fullName`, `idNumber`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Housing status of a registered person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HousingStatus {
    #[default]
    Rent,
    Own,
}

impl HousingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HousingStatus::Rent => "rent",
            HousingStatus::Own => "own",
        }
    }
}

impl fmt::Display for HousingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HousingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rent" => Ok(HousingStatus::Rent),
            "own" => Ok(HousingStatus::Own),
            other => Err(Error::InvalidInput(format!(
                "housing status must be 'rent' or 'own', got '{}'",
                other
            ))),
        }
    }
}

/// The four administrative-location values chosen for a record
///
/// Stored as plain strings; nothing links them back to the location hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSelection {
    pub district: String,
    pub sector: String,
    pub cell: String,
    pub village: String,
}

/// One registration record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPerson {
    /// Identifier assigned by the storage layer; absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub full_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub id_number: String,
    pub district: String,
    pub sector: String,
    pub cell: String,
    pub village: String,
    #[serde(default)]
    pub isibo: String,
    #[serde(default)]
    pub isibo_leader: String,
    #[serde(default)]
    pub rpf_member: bool,
    #[serde(default)]
    pub house_number: String,
    #[serde(default)]
    pub education: String,
    #[serde(default)]
    pub housing_status: HousingStatus,
}

impl RegisteredPerson {
    /// Location values of this record
    pub fn location(&self) -> LocationSelection {
        LocationSelection {
            district: self.district.clone(),
            sector: self.sector.clone(),
            cell: self.cell.clone(),
            village: self.village.clone(),
        }
    }

    /// Text fields consulted by the dashboard search, in display order
    ///
    /// The affiliation flag is not text and is never searched.
    pub fn text_fields(&self) -> [&str; 13] {
        [
            &self.full_name,
            &self.phone,
            self.email.as_deref().unwrap_or(""),
            &self.id_number,
            &self.district,
            &self.sector,
            &self.cell,
            &self.village,
            &self.isibo,
            &self.isibo_leader,
            &self.house_number,
            &self.education,
            self.housing_status.as_str(),
        ]
    }
}
