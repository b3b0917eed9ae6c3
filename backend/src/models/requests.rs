//! Payloads accepted by the lifecycle coordinator.
//!
//! Each operation has its own request type with explicit required and
//! optional fields; [`DonationCommand`] tags them for callers that dispatch
//! from a single entry point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, DonationDish, DonationForm, DonationStatus, FieldMerge};
use crate::errors::AppError;

/// An image file supplied alongside a create or update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Donation fields supplied by a donor when submitting a new donation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDonation {
    pub donation_dishes: Vec<DonationDish>,
    pub pickup_address: Address,
    #[serde(default)]
    pub pickup_instructions: String,
    pub pickup_start_time: DateTime<Utc>,
    pub pickup_end_time: DateTime<Utc>,
    #[serde(default)]
    pub drop_off_address: Option<Address>,
    #[serde(default)]
    pub drop_off_instructions: Option<String>,
    /// Free text used as the body of the admin notification
    #[serde(default)]
    pub description: Option<String>,
}

/// Create a donation for a user and enqueue it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub donation: NewDonation,
    #[serde(skip)]
    pub image: Option<ImageUpload>,
}

impl CreateDonationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("No user id specified in request".to_string()));
        }
        validate_dishes(&self.donation.donation_dishes)?;
        validate_window(
            self.donation.pickup_start_time,
            self.donation.pickup_end_time,
        )
    }
}

/// Fields a donor or volunteer may change on an ongoing donation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationPatch {
    #[serde(default)]
    pub status: Option<DonationStatus>,
    #[serde(default)]
    pub donation_dishes: Option<Vec<DonationDish>>,
    #[serde(default)]
    pub pickup_address: Option<Address>,
    #[serde(default)]
    pub pickup_instructions: Option<String>,
    #[serde(default)]
    pub pickup_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub drop_off_address: Option<Address>,
    #[serde(default)]
    pub drop_off_instructions: Option<String>,
}

impl DonationPatch {
    /// Convert into a store-level merge, attaching a freshly stored image URL.
    pub fn to_merge(&self, image_link: Option<String>) -> FieldMerge {
        FieldMerge {
            status: self.status,
            image_link,
            donation_dishes: self.donation_dishes.clone(),
            pickup_address: self.pickup_address.clone(),
            pickup_instructions: self.pickup_instructions.clone(),
            pickup_start_time: self.pickup_start_time,
            pickup_end_time: self.pickup_end_time,
            drop_off_address: self.drop_off_address.clone(),
            drop_off_instructions: self.drop_off_instructions.clone(),
            ..FieldMerge::default()
        }
    }
}

/// Update an ongoing donation in both stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDonationRequest {
    #[serde(rename = "donationID")]
    pub donation_id: String,
    #[serde(default)]
    pub changes: DonationPatch,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
    #[serde(skip)]
    pub image: Option<ImageUpload>,
}

impl UpdateDonationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.donation_id.trim().is_empty() {
            return Err(AppError::Validation("Missing donation id".to_string()));
        }
        if self.image.is_none() && self.changes.to_merge(None).is_empty() {
            return Err(AppError::Validation(
                "No changes and no image supplied for donation".to_string(),
            ));
        }
        match self.changes.status {
            Some(status) if status.is_terminal() => {
                return Err(AppError::Validation(format!(
                    "A donation is only marked '{}' when it is retired",
                    status
                )));
            }
            Some(status) if status != DonationStatus::PendingPickup => {
                return Err(AppError::Validation(format!(
                    "A donation is only marked '{}' by its assigned volunteer",
                    status
                )));
            }
            _ => {}
        }
        if let Some(dishes) = &self.changes.donation_dishes {
            validate_dishes(dishes)?;
        }
        if let (Some(start), Some(end)) = (
            self.changes.pickup_start_time,
            self.changes.pickup_end_time,
        ) {
            validate_window(start, end)?;
        }
        Ok(())
    }
}

fn default_terminal_status() -> DonationStatus {
    DonationStatus::Delivered
}

/// Remove a donation from the ongoing queue and close its embedded form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetireDonationRequest {
    #[serde(rename = "donationID")]
    pub donation_id: String,
    #[serde(default = "default_terminal_status")]
    pub terminal_status: DonationStatus,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl RetireDonationRequest {
    pub fn new(donation_id: impl Into<String>) -> Self {
        Self {
            donation_id: donation_id.into(),
            terminal_status: default_terminal_status(),
            expected_version: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.donation_id.trim().is_empty() {
            return Err(AppError::Validation("Missing ongoing donation id".to_string()));
        }
        if !self.terminal_status.is_terminal() {
            return Err(AppError::Validation(format!(
                "Cannot retire a donation as '{}'",
                self.terminal_status
            )));
        }
        Ok(())
    }
}

/// A lifecycle operation tagged by its `operation` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum DonationCommand {
    Create(CreateDonationRequest),
    Update(UpdateDonationRequest),
    Retire(RetireDonationRequest),
}

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedDonation {
    pub donation: DonationForm,
    /// Set when the replaced image could not be removed from the object store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cleanup_error: Option<String>,
}

/// Result of [`DonationCommand`] execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", content = "donation", rename_all = "camelCase")]
pub enum CommandOutcome {
    Created(DonationForm),
    Updated(UpdatedDonation),
    Retired(DonationForm),
}

fn validate_dishes(dishes: &[DonationDish]) -> Result<(), AppError> {
    if dishes.is_empty() {
        return Err(AppError::Validation(
            "A donation needs at least one dish".to_string(),
        ));
    }
    if let Some(dish) = dishes
        .iter()
        .find(|d| d.dish_id.trim().is_empty() || d.quantity == 0)
    {
        return Err(AppError::Validation(format!(
            "Invalid donation dish '{}': a dish id and a positive quantity are required",
            dish.dish_id
        )));
    }
    Ok(())
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::Validation(
            "Pickup end time must not be before the start time".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_is_tagged_by_operation() {
        let command: DonationCommand = serde_json::from_value(json!({
            "operation": "retire",
            "donationID": "abc",
            "terminalStatus": "rejected"
        }))
        .unwrap();

        match command {
            DonationCommand::Retire(request) => {
                assert_eq!(request.donation_id, "abc");
                assert_eq!(request.terminal_status, DonationStatus::Rejected);
                assert!(request.expected_version.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_retire_defaults_to_delivered_and_rejects_non_terminal() {
        let request = RetireDonationRequest::new("abc");
        assert_eq!(request.terminal_status, DonationStatus::Delivered);
        assert!(request.validate().is_ok());

        let request = RetireDonationRequest {
            terminal_status: DonationStatus::PickedUp,
            ..RetireDonationRequest::new("abc")
        };
        assert_eq!(
            request.validate().unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );
        assert!(RetireDonationRequest::new(" ").validate().is_err());
    }

    #[test]
    fn test_update_requires_some_change() {
        let request = UpdateDonationRequest {
            donation_id: "abc".to_string(),
            changes: DonationPatch::default(),
            expected_version: None,
            image: None,
        };
        assert!(request.validate().is_err());

        let request = UpdateDonationRequest {
            changes: DonationPatch {
                pickup_instructions: Some("Ring twice".to_string()),
                ..DonationPatch::default()
            },
            ..request
        };
        assert!(request.validate().is_ok());

        let request = UpdateDonationRequest {
            changes: DonationPatch {
                status: Some(DonationStatus::Delivered),
                ..DonationPatch::default()
            },
            ..request
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_update_leaves_milestone_statuses_to_volunteers() {
        let with_status = |status| UpdateDonationRequest {
            donation_id: "abc".to_string(),
            changes: DonationPatch {
                status: Some(status),
                ..DonationPatch::default()
            },
            expected_version: None,
            image: None,
        };

        assert!(with_status(DonationStatus::PendingPickup).validate().is_ok());
        for status in [DonationStatus::PickedUp, DonationStatus::DroppedOff] {
            let err = with_status(status).validate().unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION_ERROR");
            assert!(err.message().contains("assigned volunteer"));
        }
    }

    #[test]
    fn test_dish_quantities_must_be_positive() {
        let dishes = vec![DonationDish {
            dish_id: "d1".to_string(),
            quantity: 0,
        }];
        assert!(validate_dishes(&dishes).is_err());
        assert!(validate_dishes(&[]).is_err());
    }
}
