//! Donation lifecycle coordinator.
//!
//! The coordinator is the only writer of the donation form store and the
//! ongoing donation queue. Every operation runs in one SQLite transaction
//! that writes both sides, so a form and its queue entry are always observed
//! together: an ongoing form has a queue entry with the same mirrored fields,
//! and retiring an entry closes its form in the same commit.
//!
//! Image uploads, image cleanup and push notifications happen outside the
//! transaction and never fail a committed operation. Notifications, recipient
//! lookup included, run as spawned tasks after commit.

mod milestones;

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::auth::IdentityVerifier;
use crate::db::donation_forms::{append_form, merge_form};
use crate::db::ongoing_donations::{delete_entry, insert_entry, merge_entry};
use crate::db::users::dishes_for_user;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    CommandOutcome, CreateDonationRequest, DonationCommand, DonationDetails, DonationDish,
    DonationForm, DonationStatus, FieldMerge, OngoingDonation, RetireDonationRequest,
    UpdateDonationRequest, UpdatedDonation, User,
};
use crate::notify::Notifier;
use crate::storage::{upload_image, ObjectStore};

/// Fallback body of the admin notification for a new donation.
const DEFAULT_DONATION_BODY: &str = "Check app for details";

pub struct LifecycleCoordinator {
    repo: Arc<Repository>,
    images: Arc<dyn ObjectStore>,
    identity: Arc<dyn IdentityVerifier>,
    notifier: Notifier,
}

impl LifecycleCoordinator {
    pub fn new(
        repo: Arc<Repository>,
        images: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityVerifier>,
        notifier: Notifier,
    ) -> Self {
        Self {
            repo,
            images,
            identity,
            notifier,
        }
    }

    /// Run a tagged command.
    pub async fn execute(&self, command: DonationCommand) -> Result<CommandOutcome, AppError> {
        match command {
            DonationCommand::Create(request) => self.create(request).await.map(CommandOutcome::Created),
            DonationCommand::Update(request) => self.update(request).await.map(CommandOutcome::Updated),
            DonationCommand::Retire(request) => self.retire(request).await.map(CommandOutcome::Retired),
        }
    }

    /// Submit a new donation: append it to the donor's forms and enqueue it.
    pub async fn create(&self, request: CreateDonationRequest) -> Result<DonationForm, AppError> {
        request.validate()?;

        let (uploaded, owner) = tokio::join!(
            upload_image(self.images.as_ref(), request.image.as_ref()),
            self.repo.get_user(&request.user_id),
        );
        let image_link = uploaded?;
        let owner = match owner {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                self.discard_image(&image_link).await;
                return Err(AppError::NotFound(format!(
                    "User {} not found",
                    request.user_id
                )));
            }
            Err(e) => {
                self.discard_image(&image_link).await;
                return Err(e);
            }
        };

        let donation = request.donation;
        let details = DonationDetails {
            status: DonationStatus::PendingPickup,
            image_link: image_link.clone(),
            donation_dishes: donation.donation_dishes,
            pickup_address: donation.pickup_address,
            pickup_instructions: donation.pickup_instructions,
            pickup_start_time: donation.pickup_start_time,
            pickup_end_time: donation.pickup_end_time,
            drop_off_address: donation.drop_off_address,
            drop_off_instructions: donation.drop_off_instructions,
            locked_by_volunteer: false,
            volunteer_id: None,
            volunteer_lock_time: None,
            confirm_pick_up_time: None,
            confirm_drop_off_time: None,
            donor_confirmation_time: None,
        };

        let mut tx = self.repo.begin().await?;
        let result = write_create(&mut tx, &owner, &details).await;
        let form = match finish(tx, result).await {
            Ok(form) => form,
            Err(e) => {
                self.discard_image(&image_link).await;
                return Err(e);
            }
        };

        tracing::info!(user_id = %owner.id, donation_id = %form.id, "Created donation");

        let body = donation
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DONATION_BODY.to_string());
        self.notify_admins(format!("New Donation from {}", owner.business_name), body);

        Ok(form)
    }

    /// Apply a partial update, and optionally a replacement image, to an
    /// ongoing donation in both stores.
    pub async fn update(&self, request: UpdateDonationRequest) -> Result<UpdatedDonation, AppError> {
        request.validate()?;

        let (uploaded, current) = tokio::join!(
            upload_image(self.images.as_ref(), request.image.as_ref()),
            self.repo.ongoing_donation(&request.donation_id),
        );
        let new_image = uploaded?;
        let current = match current {
            Ok(Some(current)) => current,
            Ok(None) => {
                self.discard_image(&new_image).await;
                return Err(self.missing_ongoing(&request.donation_id).await);
            }
            Err(e) => {
                self.discard_image(&new_image).await;
                return Err(e);
            }
        };

        let form = match self.write_update(&request, &current, &new_image).await {
            Ok(form) => form,
            Err(e) => {
                self.discard_image(&new_image).await;
                return Err(e);
            }
        };

        tracing::info!(donation_id = %form.id, version = form.version, "Updated donation");

        // The replaced image is only removed once the new link is committed
        let mut image_cleanup_error = None;
        let old_image = &current.details.image_link;
        if !new_image.is_empty() && !old_image.is_empty() && *old_image != new_image {
            if let Err(e) = self.images.delete(old_image).await {
                tracing::warn!(donation_id = %form.id, error = %e, "Failed to delete replaced image");
                image_cleanup_error = Some(e.message().to_string());
            }
        }

        if form.details.status != current.details.status {
            self.notify_owner(&form.user_id, form.details.status);
        }

        Ok(UpdatedDonation {
            donation: form,
            image_cleanup_error,
        })
    }

    /// Remove a donation from the queue and close its form with a terminal status.
    pub async fn retire(&self, request: RetireDonationRequest) -> Result<DonationForm, AppError> {
        request.validate()?;

        let mut tx = self.repo.begin().await?;
        let result = write_retire(&mut tx, &request).await;
        let (form, previous) = finish(tx, result).await?;

        tracing::info!(donation_id = %form.id, status = %form.details.status, "Retired donation");

        if form.details.status != previous {
            self.notify_owner(&form.user_id, form.details.status);
        }
        Ok(form)
    }

    async fn write_update(
        &self,
        request: &UpdateDonationRequest,
        current: &OngoingDonation,
        new_image: &str,
    ) -> Result<DonationForm, AppError> {
        if let Some(next) = request.changes.status {
            ensure_transition(current.details.status, next)?;
        }

        let image_link = (!new_image.is_empty()).then(|| new_image.to_string());
        let merge = request.changes.to_merge(image_link);
        let expected_version = request.expected_version.unwrap_or(current.version);

        let mut tx = self.repo.begin().await?;
        let result = write_mirrored_merge(&mut tx, current, &merge, expected_version).await;
        finish(tx, result).await
    }

    /// Error for an update that names no queue entry.
    async fn missing_ongoing(&self, donation_id: &str) -> AppError {
        match self.repo.donation_form(donation_id).await {
            Ok(Some(form)) if !form.ongoing => AppError::Conflict(format!(
                "Donation {} is no longer ongoing",
                donation_id
            )),
            Ok(_) => AppError::NotFound(format!("Ongoing donation {} not found", donation_id)),
            Err(e) => e,
        }
    }

    /// Best-effort removal of an image that never made it into a commit.
    async fn discard_image(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        if let Err(e) = self.images.delete(url).await {
            tracing::warn!(url, error = %e, "Failed to delete orphaned image");
        }
    }

    fn notify_admins(&self, title: String, body: String) {
        let repo = self.repo.clone();
        self.notifier
            .dispatch_to(title, body, async move { repo.admin_push_tokens().await });
    }

    fn notify_owner(&self, user_id: &str, status: DonationStatus) {
        let repo = self.repo.clone();
        let user_id = user_id.to_string();
        self.notifier.dispatch_to(
            "Donation update".to_string(),
            format!("Your donation is now {}", status),
            async move {
                repo.get_user(&user_id)
                    .await?
                    .map(|owner| owner.push_tokens)
                    .ok_or_else(|| AppError::NotFound(format!("Donation owner {} not found", user_id)))
            },
        );
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn write_create(
    conn: &mut SqliteConnection,
    owner: &User,
    details: &DonationDetails,
) -> Result<DonationForm, AppError> {
    ensure_dishes_exist(conn, &owner.id, &details.donation_dishes).await?;

    let form = append_form(conn, &owner.id, details).await?;
    let entry = insert_entry(conn, &form, &owner.business_name).await?;
    ensure_mirrored(&form, &entry)?;
    Ok(form)
}

/// Write one merge to a queue entry and its form.
async fn write_mirrored_merge(
    conn: &mut SqliteConnection,
    current: &OngoingDonation,
    merge: &FieldMerge,
    expected_version: i64,
) -> Result<DonationForm, AppError> {
    if let Some(dishes) = &merge.donation_dishes {
        ensure_dishes_exist(conn, &current.user_id, dishes).await?;
    }

    let entry = merge_entry(conn, &current.id, merge, Some(expected_version))
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => AppError::Conflict(format!(
                "Donation {} was retired concurrently",
                current.id
            )),
            other => other,
        })?;
    let form = merge_form(conn, &entry.user_id, &entry.id, merge, None).await?;
    ensure_mirrored(&form, &entry)?;
    Ok(form)
}

async fn write_retire(
    conn: &mut SqliteConnection,
    request: &RetireDonationRequest,
) -> Result<(DonationForm, DonationStatus), AppError> {
    let entry = delete_entry(conn, &request.donation_id, request.expected_version).await?;
    let previous = entry.details.status;
    ensure_transition(previous, request.terminal_status)?;

    let merge = FieldMerge {
        ongoing: Some(false),
        status: Some(request.terminal_status),
        ..FieldMerge::default()
    };
    let form = merge_form(conn, &entry.user_id, &entry.id, &merge, None).await?;
    if form.ongoing || !form.details.status.is_terminal() {
        return Err(AppError::Internal(format!(
            "Donation {} was not closed by retirement",
            form.id
        )));
    }
    Ok((form, previous))
}

fn ensure_transition(from: DonationStatus, to: DonationStatus) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Cannot change donation status from '{}' to '{}'",
            from, to
        )))
    }
}

/// Every donation dish must reference one of the owner's dishes.
async fn ensure_dishes_exist(
    conn: &mut SqliteConnection,
    user_id: &str,
    dishes: &[DonationDish],
) -> Result<(), AppError> {
    let known: HashSet<String> = dishes_for_user(conn, user_id)
        .await?
        .into_iter()
        .map(|dish| dish.id)
        .collect();

    match dishes.iter().find(|d| !known.contains(&d.dish_id)) {
        Some(missing) => Err(AppError::NotFound(format!(
            "Dish {} not found for user {}",
            missing.dish_id, user_id
        ))),
        None => Ok(()),
    }
}

fn ensure_mirrored(form: &DonationForm, entry: &OngoingDonation) -> Result<(), AppError> {
    if form.id != entry.id || form.user_id != entry.user_id || form.details != entry.details {
        return Err(AppError::Internal(format!(
            "Donation {} diverged between its form and the ongoing queue",
            form.id
        )));
    }
    Ok(())
}
