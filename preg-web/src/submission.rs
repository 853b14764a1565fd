//! Registration form and submission
//!
//! Holds the non-location form fields for one session. The location values
//! come from the selector at submit time. Submitting hands the record to the
//! outbox and returns at once; storage happens in the background.

use preg_common::{
    validate_identity_number, HousingStatus, IdentityNumberError, LocationSelection,
    RegisteredPerson,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::outbox::{Outbox, OutboxError};

/// Form errors
#[derive(Debug, Error)]
pub enum FormError {
    #[error("Unknown form field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: FormField, reason: String },

    #[error("{0}")]
    IdentityNumber(#[from] IdentityNumberError),

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("Failed to queue submission: {0}")]
    Outbox(#[from] OutboxError),
}

/// Editable non-location fields, by their form names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    FullName,
    Phone,
    Email,
    IdNumber,
    Isibo,
    IsiboLeader,
    RpfMember,
    HouseNumber,
    Education,
    HousingStatus,
}

impl FormField {
    pub const ALL: [FormField; 10] = [
        FormField::FullName,
        FormField::Phone,
        FormField::Email,
        FormField::IdNumber,
        FormField::Isibo,
        FormField::IsiboLeader,
        FormField::RpfMember,
        FormField::HouseNumber,
        FormField::Education,
        FormField::HousingStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FormField::FullName => "fullName",
            FormField::Phone => "phone",
            FormField::Email => "email",
            FormField::IdNumber => "idNumber",
            FormField::Isibo => "isibo",
            FormField::IsiboLeader => "isiboLeader",
            FormField::RpfMember => "rpfMember",
            FormField::HouseNumber => "houseNumber",
            FormField::Education => "education",
            FormField::HousingStatus => "housingStatus",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormField {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| FormError::UnknownField(s.to_string()))
    }
}

/// Value sent for one field: text, or a checkbox flag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

/// Outcome of checking an identity number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdNumberVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IdentityNumberError>,
}

impl IdNumberVerdict {
    pub fn check(raw: &str) -> Self {
        match validate_identity_number(raw) {
            Ok(()) => Self {
                valid: true,
                reason: None,
            },
            Err(e) => Self {
                valid: false,
                reason: Some(e),
            },
        }
    }
}

/// Current contents of the registration form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub id_number: String,
    pub isibo: String,
    pub isibo_leader: String,
    pub rpf_member: bool,
    pub house_number: String,
    pub education: String,
    pub housing_status: HousingStatus,
}

/// Result of a successful submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Submitted { outbox_id: String },
}

/// Registration form state plus submit
pub struct SubmissionController {
    outbox: Outbox,
    form: RegistrationForm,
    id_number_error: Option<IdentityNumberError>,
}

impl SubmissionController {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            form: RegistrationForm::default(),
            id_number_error: None,
        }
    }

    pub fn form(&self) -> &RegistrationForm {
        &self.form
    }

    /// Inline error for the identity-number field, if any
    pub fn id_number_error(&self) -> Option<IdentityNumberError> {
        self.id_number_error
    }

    /// Check an identity number without touching the form
    pub fn validate_identity_number(raw: &str) -> IdNumberVerdict {
        IdNumberVerdict::check(raw)
    }

    /// Set one field
    ///
    /// The value is kept even when the identity number is invalid, so the
    /// user can keep typing; the verdict is returned for inline display.
    pub fn update_field(
        &mut self,
        field: FormField,
        value: FieldValue,
    ) -> Result<Option<IdNumberVerdict>, FormError> {
        let form = &mut self.form;

        match (field, value) {
            (FormField::RpfMember, FieldValue::Flag(flag)) => form.rpf_member = flag,
            (FormField::RpfMember, FieldValue::Text(_)) => {
                return Err(FormError::InvalidValue {
                    field,
                    reason: "expected true or false".to_string(),
                })
            }
            (_, FieldValue::Flag(_)) => {
                return Err(FormError::InvalidValue {
                    field,
                    reason: "expected text".to_string(),
                })
            }
            (FormField::HousingStatus, FieldValue::Text(text)) => {
                form.housing_status = text.parse().map_err(|e: preg_common::Error| {
                    FormError::InvalidValue {
                        field,
                        reason: e.to_string(),
                    }
                })?;
            }
            (FormField::IdNumber, FieldValue::Text(text)) => {
                let verdict = IdNumberVerdict::check(&text);
                form.id_number = text;
                self.id_number_error = verdict.reason;
                return Ok(Some(verdict));
            }
            (FormField::FullName, FieldValue::Text(text)) => form.full_name = text,
            (FormField::Phone, FieldValue::Text(text)) => form.phone = text,
            (FormField::Email, FieldValue::Text(text)) => form.email = text,
            (FormField::Isibo, FieldValue::Text(text)) => form.isibo = text,
            (FormField::IsiboLeader, FieldValue::Text(text)) => form.isibo_leader = text,
            (FormField::HouseNumber, FieldValue::Text(text)) => form.house_number = text,
            (FormField::Education, FieldValue::Text(text)) => form.education = text,
        }

        Ok(None)
    }

    /// Build the record the form currently describes
    ///
    /// Runs the submit-time checks: identity number first, then the
    /// required fields.
    pub fn build_record(&self, selection: &LocationSelection) -> Result<RegisteredPerson, FormError> {
        let form = &self.form;

        validate_identity_number(&form.id_number)?;

        let required = [
            ("fullName", form.full_name.as_str()),
            ("phone", form.phone.as_str()),
            ("district", selection.district.as_str()),
            ("sector", selection.sector.as_str()),
            ("cell", selection.cell.as_str()),
            ("village", selection.village.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(FormError::MissingField(*name));
        }

        let email = form.email.trim();

        Ok(RegisteredPerson {
            id: None,
            full_name: form.full_name.clone(),
            phone: form.phone.clone(),
            email: (!email.is_empty()).then(|| email.to_string()),
            id_number: form.id_number.clone(),
            district: selection.district.clone(),
            sector: selection.sector.clone(),
            cell: selection.cell.clone(),
            village: selection.village.clone(),
            isibo: form.isibo.clone(),
            isibo_leader: form.isibo_leader.clone(),
            rpf_member: form.rpf_member,
            house_number: form.house_number.clone(),
            education: form.education.clone(),
            housing_status: form.housing_status,
        })
    }

    /// Validate, queue, and reset the form
    ///
    /// Returns as soon as the record is queued; storing it is the outbox
    /// worker's job. On a validation failure nothing is queued and the form
    /// is left as it was.
    pub async fn submit(&mut self, selection: &LocationSelection) -> Result<SubmitOutcome, FormError> {
        let record = match self.build_record(selection) {
            Ok(record) => record,
            Err(e) => {
                if let FormError::IdentityNumber(reason) = &e {
                    self.id_number_error = Some(*reason);
                }
                return Err(e);
            }
        };

        let outbox_id = self.outbox.enqueue(&record).await?;
        info!(outbox_id = %outbox_id, district = %record.district, "Registration submitted");

        self.reset();
        Ok(SubmitOutcome::Submitted { outbox_id })
    }

    pub fn reset(&mut self) {
        self.form = RegistrationForm::default();
        self.id_number_error = None;
    }
}
