//! Donation form and ongoing donation models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, User};
use crate::errors::AppError;

/// Lifecycle status shared by donation forms and ongoing donations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DonationStatus {
    #[serde(rename = "pending pickup")]
    PendingPickup,
    #[serde(rename = "picked up")]
    PickedUp,
    #[serde(rename = "dropped off")]
    DroppedOff,
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "rejected")]
    Rejected,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::PendingPickup => "pending pickup",
            DonationStatus::PickedUp => "picked up",
            DonationStatus::DroppedOff => "dropped off",
            DonationStatus::Delivered => "delivered",
            DonationStatus::Rejected => "rejected",
        }
    }

    /// Terminal statuses end the donation's time in the ongoing queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DonationStatus::Delivered | DonationStatus::Rejected)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Re-asserting the current status is not a transition and is always allowed.
    pub fn can_transition_to(&self, next: DonationStatus) -> bool {
        use DonationStatus::*;

        *self == next
            || matches!(
                (self, next),
                (PendingPickup, PickedUp)
                    | (PendingPickup, Rejected)
                    | (PickedUp, DroppedOff)
                    | (PickedUp, Delivered)
                    | (DroppedOff, Delivered)
            )
    }
}

impl FromStr for DonationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending pickup" => Ok(DonationStatus::PendingPickup),
            "picked up" => Ok(DonationStatus::PickedUp),
            "dropped off" => Ok(DonationStatus::DroppedOff),
            "delivered" => Ok(DonationStatus::Delivered),
            "rejected" => Ok(DonationStatus::Rejected),
            other => Err(AppError::Validation(format!(
                "Unknown donation status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dish and quantity inside a donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationDish {
    #[serde(rename = "dishID")]
    pub dish_id: String,
    pub quantity: u32,
}

/// Fields mirrored between a donation form and its ongoing donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationDetails {
    pub status: DonationStatus,
    pub image_link: String,
    pub donation_dishes: Vec<DonationDish>,
    pub pickup_address: Address,
    pub pickup_instructions: String,
    pub pickup_start_time: DateTime<Utc>,
    pub pickup_end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_off_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_off_instructions: Option<String>,
    pub locked_by_volunteer: bool,
    #[serde(rename = "volunteerID", default, skip_serializing_if = "Option::is_none")]
    pub volunteer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volunteer_lock_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_pick_up_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_drop_off_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_confirmation_time: Option<DateTime<Utc>>,
}

/// A donation submission embedded in its owning user's donation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationForm {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub ongoing: bool,
    #[serde(flatten)]
    pub details: DonationDetails,
    pub created_at: DateTime<Utc>,
    /// Internal version for optimistic concurrency control
    pub version: i64,
}

/// Queue-side mirror of an active donation form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OngoingDonation {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub business_name: String,
    #[serde(flatten)]
    pub details: DonationDetails,
    /// Internal version for optimistic concurrency control
    pub version: i64,
}

/// Donation dish joined with the dish it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedDonationDish {
    #[serde(rename = "dishID")]
    pub dish_id: String,
    pub quantity: u32,
    pub dish_name: String,
    pub cost: f64,
    pub pounds: f64,
    pub allergens: Vec<String>,
    pub image_link: String,
    pub comments: String,
}

/// Ongoing donation with its dishes resolved against the owner's catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OngoingDonationView {
    #[serde(flatten)]
    pub donation: OngoingDonation,
    pub dishes: Vec<EnrichedDonationDish>,
}

/// Delivered donation annotated with its donor's contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationHistoryEntry {
    #[serde(flatten)]
    pub donation: DonationForm,
    pub name: String,
    pub business_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl DonationHistoryEntry {
    pub fn new(donation: DonationForm, donor: &User) -> Self {
        Self {
            donation,
            name: donor.name.clone(),
            business_name: donor.business_name.clone(),
            email: donor.email.clone(),
            phone_number: donor.phone_number.clone(),
        }
    }
}

/// Partial field update applied key by key to both stores.
///
/// Unset fields are left unchanged. The id is not part of a merge, so it can
/// never be overwritten. `ongoing` only exists on the embedded form and is
/// ignored by the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMerge {
    pub ongoing: Option<bool>,
    pub status: Option<DonationStatus>,
    pub image_link: Option<String>,
    pub donation_dishes: Option<Vec<DonationDish>>,
    pub pickup_address: Option<Address>,
    pub pickup_instructions: Option<String>,
    pub pickup_start_time: Option<DateTime<Utc>>,
    pub pickup_end_time: Option<DateTime<Utc>>,
    pub drop_off_address: Option<Address>,
    pub drop_off_instructions: Option<String>,
    pub locked_by_volunteer: Option<bool>,
    pub volunteer_id: Option<String>,
    pub volunteer_lock_time: Option<DateTime<Utc>>,
    pub confirm_pick_up_time: Option<DateTime<Utc>>,
    pub confirm_drop_off_time: Option<DateTime<Utc>>,
    pub donor_confirmation_time: Option<DateTime<Utc>>,
}

impl FieldMerge {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite every field of `details` that this merge sets.
    pub fn apply_to(&self, details: &mut DonationDetails) {
        if let Some(status) = self.status {
            details.status = status;
        }
        if let Some(image_link) = &self.image_link {
            details.image_link = image_link.clone();
        }
        if let Some(dishes) = &self.donation_dishes {
            details.donation_dishes = dishes.clone();
        }
        if let Some(address) = &self.pickup_address {
            details.pickup_address = address.clone();
        }
        if let Some(instructions) = &self.pickup_instructions {
            details.pickup_instructions = instructions.clone();
        }
        if let Some(start) = self.pickup_start_time {
            details.pickup_start_time = start;
        }
        if let Some(end) = self.pickup_end_time {
            details.pickup_end_time = end;
        }
        if let Some(address) = &self.drop_off_address {
            details.drop_off_address = Some(address.clone());
        }
        if let Some(instructions) = &self.drop_off_instructions {
            details.drop_off_instructions = Some(instructions.clone());
        }
        if let Some(locked) = self.locked_by_volunteer {
            details.locked_by_volunteer = locked;
        }
        if let Some(volunteer_id) = &self.volunteer_id {
            details.volunteer_id = Some(volunteer_id.clone());
        }
        if let Some(time) = self.volunteer_lock_time {
            details.volunteer_lock_time = Some(time);
        }
        if let Some(time) = self.confirm_pick_up_time {
            details.confirm_pick_up_time = Some(time);
        }
        if let Some(time) = self.confirm_drop_off_time {
            details.confirm_drop_off_time = Some(time);
        }
        if let Some(time) = self.donor_confirmation_time {
            details.donor_confirmation_time = Some(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DonationStatus::*;

    #[test]
    fn test_status_transitions_follow_lifecycle() {
        assert!(PendingPickup.can_transition_to(PickedUp));
        assert!(PendingPickup.can_transition_to(Rejected));
        assert!(PickedUp.can_transition_to(DroppedOff));
        assert!(PickedUp.can_transition_to(Delivered));
        assert!(DroppedOff.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Delivered));

        assert!(!PendingPickup.can_transition_to(DroppedOff));
        assert!(!PickedUp.can_transition_to(PendingPickup));
        assert!(!PickedUp.can_transition_to(Rejected));
        assert!(!Delivered.can_transition_to(PickedUp));
        assert!(!Rejected.can_transition_to(PendingPickup));
    }

    #[test]
    fn test_only_delivered_and_rejected_are_terminal() {
        let terminal: Vec<_> = [PendingPickup, PickedUp, DroppedOff, Delivered, Rejected]
            .into_iter()
            .filter(DonationStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![Delivered, Rejected]);
    }

    #[test]
    fn test_status_serializes_as_lowercase_phrases() {
        assert_eq!(
            serde_json::to_string(&PendingPickup).unwrap(),
            "\"pending pickup\""
        );
        assert_eq!("dropped off".parse::<DonationStatus>().unwrap(), DroppedOff);
        assert!("completed".parse::<DonationStatus>().is_err());
    }

    #[test]
    fn test_field_merge_only_touches_set_fields() {
        let now = Utc::now();
        let mut details = DonationDetails {
            status: PendingPickup,
            image_link: "old.png".to_string(),
            donation_dishes: vec![DonationDish {
                dish_id: "d1".to_string(),
                quantity: 2,
            }],
            pickup_address: Address {
                street_address: "1 Main St".to_string(),
                building_number: None,
                city: "Atlanta".to_string(),
                state: "GA".to_string(),
                zip_code: "30332".to_string(),
                longitude: -84.39,
                latitude: 33.77,
            },
            pickup_instructions: "Back door".to_string(),
            pickup_start_time: now,
            pickup_end_time: now,
            drop_off_address: None,
            drop_off_instructions: None,
            locked_by_volunteer: false,
            volunteer_id: None,
            volunteer_lock_time: None,
            confirm_pick_up_time: None,
            confirm_drop_off_time: None,
            donor_confirmation_time: None,
        };
        let before = details.clone();

        let merge = FieldMerge {
            status: Some(PickedUp),
            pickup_instructions: Some("Front desk".to_string()),
            ..FieldMerge::default()
        };
        merge.apply_to(&mut details);

        assert_eq!(details.status, PickedUp);
        assert_eq!(details.pickup_instructions, "Front desk");
        assert_eq!(details.image_link, before.image_link);
        assert_eq!(details.donation_dishes, before.donation_dishes);
        assert!(FieldMerge::default().is_empty());
        assert!(!merge.is_empty());
    }
}
