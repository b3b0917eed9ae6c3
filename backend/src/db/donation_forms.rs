//! Donation record store: the ordered list of donation forms embedded under
//! each user.
//!
//! Forms are never deleted. Retirement only flips `ongoing` and sets a
//! terminal status through [`merge_form`].

use chrono::{DateTime, Datelike, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::codec::{
    bind_details, details_from_row, DETAIL_ASSIGNMENTS, DETAIL_COLUMNS, DETAIL_PLACEHOLDERS,
};
use super::users::{find_user, user_exists};
use super::Repository;
use crate::errors::AppError;
use crate::models::{
    DonationDetails, DonationForm, DonationHistoryEntry, DonationStatus, FieldMerge, User,
};

impl Repository {
    /// Get a user's donation forms in creation order, or the single form `form_id`.
    pub async fn donation_forms(
        &self,
        user_id: &str,
        form_id: Option<&str>,
    ) -> Result<Vec<DonationForm>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_forms(&mut conn, user_id, form_id).await
    }

    /// Get a user's donation forms that are still in the ongoing queue.
    pub async fn ongoing_donation_forms(&self, user_id: &str) -> Result<Vec<DonationForm>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let forms = fetch_forms(&mut conn, user_id, None).await?;
        Ok(forms.into_iter().filter(|form| form.ongoing).collect())
    }

    /// Look a donation form up by id, whichever user owns it.
    pub async fn donation_form(&self, form_id: &str) -> Result<Option<DonationForm>, AppError> {
        let mut conn = self.pool.acquire().await?;
        find_form(&mut conn, form_id).await
    }

    /// Delivered donations whose drop-off was confirmed within the last `days` days.
    pub async fn delivered_donations_since(
        &self,
        days: i64,
    ) -> Result<Vec<DonationHistoryEntry>, AppError> {
        if days <= 0 {
            return Err(AppError::Validation(
                "The history window must be at least one day".to_string(),
            ));
        }
        let cutoff = Utc::now() - Duration::days(days);
        self.delivered_donations(|dropped_off| dropped_off > cutoff)
            .await
    }

    /// Delivered donations dropped off in the given calendar month.
    pub async fn delivered_donations_in_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<DonationHistoryEntry>, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Validation(format!("Invalid month: {}", month)));
        }
        self.delivered_donations(|dropped_off| {
            dropped_off.year() == year && dropped_off.month() == month
        })
        .await
    }

    async fn delivered_donations<F>(&self, keep: F) -> Result<Vec<DonationHistoryEntry>, AppError>
    where
        F: Fn(DateTime<Utc>) -> bool,
    {
        let mut conn = self.pool.acquire().await?;
        let sql = select_forms_sql(
            "WHERE status = ? AND confirm_drop_off_time IS NOT NULL ORDER BY user_id, position",
        );
        let rows = sqlx::query(&sql)
            .bind(DonationStatus::Delivered.as_str())
            .fetch_all(&mut *conn)
            .await?;

        let mut history = Vec::new();
        let mut donor = None;
        for row in &rows {
            let form = form_from_row(row)?;
            let Some(dropped_off) = form.details.confirm_drop_off_time else {
                continue;
            };
            if !keep(dropped_off) {
                continue;
            }
            let cached = donor
                .as_ref()
                .is_some_and(|user: &User| user.id == form.user_id);
            if !cached {
                donor = find_user(&mut conn, &form.user_id).await?;
            }
            if let Some(user) = &donor {
                history.push(DonationHistoryEntry::new(form, user));
            }
        }
        Ok(history)
    }
}

fn select_forms_sql(filter: &str) -> String {
    format!(
        "SELECT id, user_id, ongoing, {}, created_at, version FROM donation_forms {}",
        DETAIL_COLUMNS, filter
    )
}

/// Read a user's forms, or only the form `form_id`.
///
/// An unknown user, or an unknown form when one is requested, is `NotFound`.
pub(crate) async fn fetch_forms(
    conn: &mut SqliteConnection,
    user_id: &str,
    form_id: Option<&str>,
) -> Result<Vec<DonationForm>, AppError> {
    if !user_exists(conn, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    match form_id {
        None => {
            let sql = select_forms_sql("WHERE user_id = ? ORDER BY position");
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(&mut *conn)
                .await?;
            rows.iter().map(form_from_row).collect()
        }
        Some(form_id) => {
            let sql = select_forms_sql("WHERE user_id = ? AND id = ?");
            let row = sqlx::query(&sql)
                .bind(user_id)
                .bind(form_id)
                .fetch_optional(&mut *conn)
                .await?;
            match row {
                Some(row) => Ok(vec![form_from_row(&row)?]),
                None => Err(AppError::NotFound(format!(
                    "Could not find donation form {} for user {}",
                    form_id, user_id
                ))),
            }
        }
    }
}

/// Look a form up by id alone, whichever user owns it.
pub(crate) async fn find_form(
    conn: &mut SqliteConnection,
    form_id: &str,
) -> Result<Option<DonationForm>, AppError> {
    let sql = select_forms_sql("WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(form_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(form_from_row).transpose()
}

/// Push a new ongoing form to the end of the user's list and return it with
/// its assigned id.
pub(crate) async fn append_form(
    conn: &mut SqliteConnection,
    user_id: &str,
    details: &DonationDetails,
) -> Result<DonationForm, AppError> {
    if !user_exists(conn, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let position: i64 = sqlx::query(
        "SELECT COALESCE(MAX(position) + 1, 0) AS next FROM donation_forms WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?
    .try_get("next")?;

    let sql = format!(
        "INSERT INTO donation_forms (id, user_id, position, ongoing, {}, created_at, version) VALUES (?, ?, ?, ?, {}, ?, 1)",
        DETAIL_COLUMNS, DETAIL_PLACEHOLDERS
    );
    let query = sqlx::query(&sql)
        .bind(id.clone())
        .bind(user_id.to_string())
        .bind(position)
        .bind(true);
    bind_details(query, details)?
        .bind(now)
        .execute(&mut *conn)
        .await?;

    tracing::debug!(user_id, form_id = %id, position, "Appended donation form");

    Ok(DonationForm {
        id,
        user_id: user_id.to_string(),
        ongoing: true,
        details: details.clone(),
        created_at: now,
        version: 1,
    })
}

/// Apply a shallow field merge to one form and bump its version.
///
/// Nothing is written when the user or form does not exist (`NotFound`) or
/// when `expected_version` does not match (`Conflict`).
pub(crate) async fn merge_form(
    conn: &mut SqliteConnection,
    user_id: &str,
    form_id: &str,
    merge: &FieldMerge,
    expected_version: Option<i64>,
) -> Result<DonationForm, AppError> {
    let mut form = fetch_forms(conn, user_id, Some(form_id))
        .await?
        .pop()
        .ok_or_else(|| AppError::NotFound(format!("Donation form {} not found", form_id)))?;

    if let Some(expected) = expected_version {
        if form.version != expected {
            return Err(AppError::Conflict(format!(
                "Version mismatch on donation form {}: expected {}, current {}",
                form_id, expected, form.version
            )));
        }
    }

    merge.apply_to(&mut form.details);
    if let Some(ongoing) = merge.ongoing {
        form.ongoing = ongoing;
    }

    let sql = format!(
        "UPDATE donation_forms SET ongoing = ?, {}, version = ? WHERE id = ? AND user_id = ? AND version = ?",
        DETAIL_ASSIGNMENTS
    );
    let query = sqlx::query(&sql).bind(form.ongoing);
    let result = bind_details(query, &form.details)?
        .bind(form.version + 1)
        .bind(form_id.to_string())
        .bind(user_id.to_string())
        .bind(form.version)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        // Race condition - version changed between read and write
        return Err(AppError::Conflict(format!(
            "Concurrent modification detected for donation form {}",
            form_id
        )));
    }

    form.version += 1;
    Ok(form)
}

// Helper functions for row conversion

fn form_from_row(row: &SqliteRow) -> Result<DonationForm, AppError> {
    Ok(DonationForm {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        ongoing: row.try_get("ongoing")?,
        details: details_from_row(row)?,
        created_at: row.try_get("created_at")?,
        version: row.try_get("version")?,
    })
}
