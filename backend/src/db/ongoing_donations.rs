//! Ongoing donation queue: one standalone record per active donation form,
//! used for cross-user listing.
//!
//! Entry ids are pinned to the id of the embedded form they mirror.

use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::codec::{
    bind_details, details_from_row, DETAIL_ASSIGNMENTS, DETAIL_COLUMNS, DETAIL_PLACEHOLDERS,
};
use super::users::dishes_for_user;
use super::Repository;
use crate::errors::AppError;
use crate::models::{
    Dish, DonationForm, EnrichedDonationDish, FieldMerge, OngoingDonation, OngoingDonationView,
};

impl Repository {
    /// List every ongoing donation, oldest first.
    pub async fn ongoing_donations(&self) -> Result<Vec<OngoingDonation>, AppError> {
        let mut conn = self.pool.acquire().await?;
        list_entries(&mut conn).await
    }

    /// Get an ongoing donation by ID.
    pub async fn ongoing_donation(&self, id: &str) -> Result<Option<OngoingDonation>, AppError> {
        let mut conn = self.pool.acquire().await?;
        find_entry(&mut conn, id).await
    }

    /// List ongoing donations with their dishes resolved against each owner's
    /// dish catalogue.
    pub async fn ongoing_donations_with_dishes(
        &self,
    ) -> Result<Vec<OngoingDonationView>, AppError> {
        let mut conn = self.pool.acquire().await?;
        list_enriched(&mut conn).await
    }
}

fn select_entries_sql(filter: &str) -> String {
    format!(
        "SELECT id, user_id, business_name, {}, version FROM ongoing_donations {}",
        DETAIL_COLUMNS, filter
    )
}

pub(crate) async fn list_entries(
    conn: &mut SqliteConnection,
) -> Result<Vec<OngoingDonation>, AppError> {
    let sql = select_entries_sql("ORDER BY rowid");
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter().map(entry_from_row).collect()
}

pub(crate) async fn find_entry(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<OngoingDonation>, AppError> {
    let sql = select_entries_sql("WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Mirror a freshly appended form into the queue under the form's id.
pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    form: &DonationForm,
    business_name: &str,
) -> Result<OngoingDonation, AppError> {
    let sql = format!(
        "INSERT INTO ongoing_donations (id, user_id, business_name, {}, version) VALUES (?, ?, ?, {}, ?)",
        DETAIL_COLUMNS, DETAIL_PLACEHOLDERS
    );
    let query = sqlx::query(&sql)
        .bind(form.id.clone())
        .bind(form.user_id.clone())
        .bind(business_name.to_string());
    bind_details(query, &form.details)?
        .bind(form.version)
        .execute(&mut *conn)
        .await?;

    Ok(OngoingDonation {
        id: form.id.clone(),
        user_id: form.user_id.clone(),
        business_name: business_name.to_string(),
        details: form.details.clone(),
        version: form.version,
    })
}

/// Apply a shallow field merge to one entry and bump its version.
pub(crate) async fn merge_entry(
    conn: &mut SqliteConnection,
    id: &str,
    merge: &FieldMerge,
    expected_version: Option<i64>,
) -> Result<OngoingDonation, AppError> {
    let mut entry = find_entry(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ongoing donation {} not found", id)))?;
    check_version(&entry, expected_version)?;

    merge.apply_to(&mut entry.details);

    let sql = format!(
        "UPDATE ongoing_donations SET {}, version = ? WHERE id = ? AND version = ?",
        DETAIL_ASSIGNMENTS
    );
    let query = sqlx::query(&sql);
    let result = bind_details(query, &entry.details)?
        .bind(entry.version + 1)
        .bind(id.to_string())
        .bind(entry.version)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Concurrent modification detected for ongoing donation {}",
            id
        )));
    }

    entry.version += 1;
    Ok(entry)
}

/// Remove an entry from the queue and return what was removed.
pub(crate) async fn delete_entry(
    conn: &mut SqliteConnection,
    id: &str,
    expected_version: Option<i64>,
) -> Result<OngoingDonation, AppError> {
    let entry = find_entry(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ongoing donation {} not found", id)))?;
    check_version(&entry, expected_version)?;

    let result = sqlx::query("DELETE FROM ongoing_donations WHERE id = ? AND version = ?")
        .bind(id)
        .bind(entry.version)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() != 1 {
        return Err(AppError::Conflict(format!(
            "Could not delete ongoing donation {}: it was modified concurrently",
            id
        )));
    }

    Ok(entry)
}

/// Join every entry's donation dishes with the owner's dishes.
///
/// Dish references that cannot be resolved are dropped from the view. Nothing
/// is written.
pub(crate) async fn list_enriched(
    conn: &mut SqliteConnection,
) -> Result<Vec<OngoingDonationView>, AppError> {
    let entries = list_entries(conn).await?;
    let mut catalogues: HashMap<String, HashMap<String, Dish>> = HashMap::new();

    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        if !catalogues.contains_key(&entry.user_id) {
            let dishes = dishes_for_user(conn, &entry.user_id).await?;
            let by_id = dishes.into_iter().map(|d| (d.id.clone(), d)).collect();
            catalogues.insert(entry.user_id.clone(), by_id);
        }
        let catalogue = catalogues.get(&entry.user_id);

        let dishes = entry
            .details
            .donation_dishes
            .iter()
            .filter_map(|item| {
                let dish = catalogue?.get(&item.dish_id)?;
                Some(EnrichedDonationDish {
                    dish_id: item.dish_id.clone(),
                    quantity: item.quantity,
                    dish_name: dish.dish_name.clone(),
                    cost: dish.cost,
                    pounds: dish.pounds,
                    allergens: dish.allergens.clone(),
                    image_link: dish.image_link.clone(),
                    comments: dish.comments.clone(),
                })
            })
            .collect();

        views.push(OngoingDonationView {
            donation: entry,
            dishes,
        });
    }
    Ok(views)
}

fn check_version(entry: &OngoingDonation, expected_version: Option<i64>) -> Result<(), AppError> {
    match expected_version {
        Some(expected) if expected != entry.version => Err(AppError::Conflict(format!(
            "Version mismatch on ongoing donation {}: expected {}, current {}",
            entry.id, expected, entry.version
        ))),
        _ => Ok(()),
    }
}

// Helper functions for row conversion

fn entry_from_row(row: &SqliteRow) -> Result<OngoingDonation, AppError> {
    Ok(OngoingDonation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        business_name: row.try_get("business_name")?,
        details: details_from_row(row)?,
        version: row.try_get("version")?,
    })
}
