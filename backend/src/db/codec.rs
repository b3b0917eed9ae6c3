//! Column layout and row conversion for the fields mirrored between the
//! donation form store and the ongoing donation queue.
//!
//! Both tables share these columns so that one encoder writes both sides of
//! a mirrored update.

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::errors::AppError;
use crate::models::{Address, DonationDetails, DonationDish, DonationStatus};

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub(crate) const DETAIL_COLUMN_DEFINITIONS: &str = r#"status TEXT NOT NULL,
            image_link TEXT NOT NULL DEFAULT '',
            donation_dishes TEXT NOT NULL,
            pickup_address TEXT NOT NULL,
            pickup_instructions TEXT NOT NULL DEFAULT '',
            pickup_start_time TEXT NOT NULL,
            pickup_end_time TEXT NOT NULL,
            drop_off_address TEXT,
            drop_off_instructions TEXT,
            locked_by_volunteer INTEGER NOT NULL DEFAULT 0,
            volunteer_id TEXT,
            volunteer_lock_time TEXT,
            confirm_pick_up_time TEXT,
            confirm_drop_off_time TEXT,
            donor_confirmation_time TEXT"#;

pub(crate) const DETAIL_COLUMNS: &str = "status, image_link, donation_dishes, pickup_address, \
     pickup_instructions, pickup_start_time, pickup_end_time, drop_off_address, \
     drop_off_instructions, locked_by_volunteer, volunteer_id, volunteer_lock_time, \
     confirm_pick_up_time, confirm_drop_off_time, donor_confirmation_time";

pub(crate) const DETAIL_PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

pub(crate) const DETAIL_ASSIGNMENTS: &str = "status = ?, image_link = ?, donation_dishes = ?, \
     pickup_address = ?, pickup_instructions = ?, pickup_start_time = ?, pickup_end_time = ?, \
     drop_off_address = ?, drop_off_instructions = ?, locked_by_volunteer = ?, \
     volunteer_id = ?, volunteer_lock_time = ?, confirm_pick_up_time = ?, \
     confirm_drop_off_time = ?, donor_confirmation_time = ?";

/// Bind the mirrored fields in [`DETAIL_COLUMNS`] order.
pub(crate) fn bind_details<'q>(
    query: SqliteQuery<'q>,
    details: &DonationDetails,
) -> Result<SqliteQuery<'q>, AppError> {
    let dishes_json = serde_json::to_string(&details.donation_dishes)?;
    let pickup_json = serde_json::to_string(&details.pickup_address)?;
    let drop_off_json = details
        .drop_off_address
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(query
        .bind(details.status.as_str())
        .bind(details.image_link.clone())
        .bind(dishes_json)
        .bind(pickup_json)
        .bind(details.pickup_instructions.clone())
        .bind(details.pickup_start_time)
        .bind(details.pickup_end_time)
        .bind(drop_off_json)
        .bind(details.drop_off_instructions.clone())
        .bind(details.locked_by_volunteer)
        .bind(details.volunteer_id.clone())
        .bind(details.volunteer_lock_time)
        .bind(details.confirm_pick_up_time)
        .bind(details.confirm_drop_off_time)
        .bind(details.donor_confirmation_time))
}

/// Decode the mirrored fields of a `donation_forms` or `ongoing_donations` row.
pub(crate) fn details_from_row(row: &SqliteRow) -> Result<DonationDetails, AppError> {
    let status: String = row.try_get("status")?;
    let status: DonationStatus = status
        .parse()
        .map_err(|_| AppError::Database(format!("Stored donation status is invalid: {}", status)))?;
    let dishes_str: String = row.try_get("donation_dishes")?;
    let pickup_str: String = row.try_get("pickup_address")?;
    let drop_off_str: Option<String> = row.try_get("drop_off_address")?;

    Ok(DonationDetails {
        status,
        image_link: row.try_get("image_link")?,
        donation_dishes: serde_json::from_str::<Vec<DonationDish>>(&dishes_str)?,
        pickup_address: serde_json::from_str::<Address>(&pickup_str)?,
        pickup_instructions: row.try_get("pickup_instructions")?,
        pickup_start_time: row.try_get("pickup_start_time")?,
        pickup_end_time: row.try_get("pickup_end_time")?,
        drop_off_address: drop_off_str
            .map(|s| serde_json::from_str::<Address>(&s))
            .transpose()?,
        drop_off_instructions: row.try_get("drop_off_instructions")?,
        locked_by_volunteer: row.try_get("locked_by_volunteer")?,
        volunteer_id: row.try_get("volunteer_id")?,
        volunteer_lock_time: row.try_get("volunteer_lock_time")?,
        confirm_pick_up_time: row.try_get("confirm_pick_up_time")?,
        confirm_drop_off_time: row.try_get("confirm_drop_off_time")?,
        donor_confirmation_time: row.try_get("donor_confirmation_time")?,
    })
}

/// Decode a JSON array column, treating corrupt data as a database error.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<T, AppError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}
