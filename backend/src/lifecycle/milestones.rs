//! Milestone actions gated by the caller's identity.

use chrono::Utc;
use sqlx::SqliteConnection;

use super::{ensure_mirrored, ensure_transition, finish, LifecycleCoordinator};
use crate::auth::{Claims, Role};
use crate::db::donation_forms::merge_form;
use crate::db::ongoing_donations::{find_entry, merge_entry};
use crate::errors::AppError;
use crate::models::{DonationForm, DonationStatus, FieldMerge, OngoingDonation, User};

impl LifecycleCoordinator {
    /// Reserve a pending donation for the calling volunteer.
    pub async fn reserve(
        &self,
        credential: &str,
        donation_id: &str,
    ) -> Result<DonationForm, AppError> {
        let (claims, volunteer) = self.caller(credential).await?;
        if !claims.has_role(Role::Volunteer) {
            return Err(AppError::Authorization(
                "Only volunteers can reserve donations".to_string(),
            ));
        }

        let merge = FieldMerge {
            locked_by_volunteer: Some(true),
            volunteer_id: Some(volunteer.id.clone()),
            volunteer_lock_time: Some(Utc::now()),
            ..FieldMerge::default()
        };
        self.apply_milestone(donation_id, &merge, |entry| {
            if entry.details.status != DonationStatus::PendingPickup {
                return Err(AppError::Conflict(format!(
                    "Donation {} is already {}",
                    entry.id, entry.details.status
                )));
            }
            if entry.details.locked_by_volunteer
                && entry.details.volunteer_id.as_deref() != Some(volunteer.id.as_str())
            {
                return Err(AppError::Conflict(format!(
                    "Donation {} is reserved by another volunteer",
                    entry.id
                )));
            }
            Ok(())
        })
        .await
    }

    /// Confirm that the assigned volunteer collected the donation.
    pub async fn pick_up(&self, credential: &str, donation_id: &str) -> Result<DonationForm, AppError> {
        let (_, volunteer) = self.caller(credential).await?;

        let merge = FieldMerge {
            status: Some(DonationStatus::PickedUp),
            confirm_pick_up_time: Some(Utc::now()),
            ..FieldMerge::default()
        };
        self.apply_milestone(donation_id, &merge, |entry| {
            require_assigned_volunteer(entry, &volunteer, "pick up")?;
            require_status(entry, DonationStatus::PendingPickup, DonationStatus::PickedUp)
        })
        .await
    }

    /// Confirm that the assigned volunteer dropped the donation off.
    pub async fn drop_off(
        &self,
        credential: &str,
        donation_id: &str,
    ) -> Result<DonationForm, AppError> {
        let (_, volunteer) = self.caller(credential).await?;

        let merge = FieldMerge {
            status: Some(DonationStatus::DroppedOff),
            confirm_drop_off_time: Some(Utc::now()),
            ..FieldMerge::default()
        };
        self.apply_milestone(donation_id, &merge, |entry| {
            require_assigned_volunteer(entry, &volunteer, "drop off")?;
            require_status(entry, DonationStatus::PickedUp, DonationStatus::DroppedOff)
        })
        .await
    }

    /// Record the donor's confirmation of their own donation.
    pub async fn donor_confirm(
        &self,
        credential: &str,
        donation_id: &str,
    ) -> Result<DonationForm, AppError> {
        let (_, donor) = self.caller(credential).await?;

        let merge = FieldMerge {
            donor_confirmation_time: Some(Utc::now()),
            ..FieldMerge::default()
        };
        self.apply_milestone(donation_id, &merge, |entry| {
            if entry.user_id != donor.id {
                return Err(AppError::Authorization(
                    "Only the donor can confirm this donation".to_string(),
                ));
            }
            Ok(())
        })
        .await
    }

    /// Verify a credential and resolve the user linked to its subject.
    async fn caller(&self, credential: &str) -> Result<(Claims, User), AppError> {
        let claims = self.identity.verify(credential).await?;
        let user = self
            .repo
            .find_user_by_subject(&claims.subject)
            .await?
            .ok_or_else(|| {
                AppError::Authorization("No user is linked to this identity".to_string())
            })?;
        Ok((claims, user))
    }

    /// Check `precondition` against the current queue entry, then write
    /// `merge` to both stores, all in one transaction.
    async fn apply_milestone<F>(
        &self,
        donation_id: &str,
        merge: &FieldMerge,
        precondition: F,
    ) -> Result<DonationForm, AppError>
    where
        F: FnOnce(&OngoingDonation) -> Result<(), AppError>,
    {
        let mut tx = self.repo.begin().await?;
        let result = write_milestone(&mut tx, donation_id, merge, precondition).await;
        let (form, previous) = finish(tx, result).await?;

        tracing::info!(donation_id = %form.id, status = %form.details.status, "Recorded donation milestone");

        if form.details.status != previous {
            self.notify_owner(&form.user_id, form.details.status);
        }
        Ok(form)
    }
}

async fn write_milestone<F>(
    conn: &mut SqliteConnection,
    donation_id: &str,
    merge: &FieldMerge,
    precondition: F,
) -> Result<(DonationForm, DonationStatus), AppError>
where
    F: FnOnce(&OngoingDonation) -> Result<(), AppError>,
{
    let entry = find_entry(conn, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ongoing donation {} not found", donation_id)))?;
    precondition(&entry)?;

    let previous = entry.details.status;
    let entry = merge_entry(conn, donation_id, merge, Some(entry.version)).await?;
    let form = merge_form(conn, &entry.user_id, donation_id, merge, None).await?;
    ensure_mirrored(&form, &entry)?;
    Ok((form, previous))
}

fn require_assigned_volunteer(
    entry: &OngoingDonation,
    caller: &User,
    action: &str,
) -> Result<(), AppError> {
    let assigned = entry.details.locked_by_volunteer
        && entry.details.volunteer_id.as_deref() == Some(caller.id.as_str());
    if !assigned {
        return Err(AppError::Authorization(format!(
            "Only the assigned volunteer can {} donation {}",
            action, entry.id
        )));
    }
    Ok(())
}

fn require_status(
    entry: &OngoingDonation,
    expected: DonationStatus,
    next: DonationStatus,
) -> Result<(), AppError> {
    if entry.details.status != expected {
        return Err(AppError::Validation(format!(
            "Donation {} is {}, expected {}",
            entry.id, entry.details.status, expected
        )));
    }
    ensure_transition(expected, next)
}
