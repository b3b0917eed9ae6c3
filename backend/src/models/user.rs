//! User, address and dish models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;

/// A pickup or drop-off location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street_address: String,
    #[serde(default)]
    pub building_number: Option<u32>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// An account of the app: donor, volunteer, recipient or administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub business_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub is_admin: bool,
    /// Subject claim of the identity provider linked to this account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_subject: Option<String>,
    pub roles: Vec<Role>,
    pub push_tokens: Vec<String>,
    pub pickup_addresses: Vec<Address>,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub auth_subject: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub push_tokens: Vec<String>,
    #[serde(default)]
    pub pickup_addresses: Vec<Address>,
}

/// A dish in a donor's catalogue, referenced by donation dishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dish {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub dish_name: String,
    pub cost: f64,
    pub pounds: f64,
    pub allergens: Vec<String>,
    pub image_link: String,
    pub comments: String,
    pub favorite: bool,
}

/// Request body for adding a dish.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDish {
    pub dish_name: String,
    pub cost: f64,
    pub pounds: f64,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub image_link: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub favorite: bool,
}

/// Request body for updating a dish; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishPatch {
    #[serde(default)]
    pub dish_name: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub pounds: Option<f64>,
    #[serde(default)]
    pub allergens: Option<Vec<String>>,
    #[serde(default)]
    pub image_link: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub favorite: Option<bool>,
}
