//! User directory: accounts, push tokens, pickup addresses and dishes.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::codec::json_column;
use super::Repository;
use crate::errors::AppError;
use crate::models::{Address, Dish, DishPatch, NewDish, NewUser, User};

const USER_COLUMNS: &str = "id, name, email, business_name, phone_number, is_admin, auth_subject, \
     roles, push_tokens, pickup_addresses, created_at";

const DISH_COLUMNS: &str =
    "id, user_id, dish_name, cost, pounds, allergens, image_link, comments, favorite";

impl Repository {
    // ==================== USER OPERATIONS ====================

    /// Create a new user.
    pub async fn create_user(&self, request: &NewUser) -> Result<User, AppError> {
        if request.name.trim().is_empty() || request.email.trim().is_empty() {
            return Err(AppError::Validation(
                "Name and email are required".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut push_tokens: Vec<String> = Vec::new();
        for token in &request.push_tokens {
            if !push_tokens.contains(token) {
                push_tokens.push(token.clone());
            }
        }

        sqlx::query(
            "INSERT INTO users (id, name, email, business_name, phone_number, is_admin, auth_subject, roles, push_tokens, pickup_addresses, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(&request.name)
        .bind(&request.email)
        .bind(&request.business_name)
        .bind(&request.phone_number)
        .bind(request.is_admin)
        .bind(&request.auth_subject)
        .bind(serde_json::to_string(&request.roles)?)
        .bind(serde_json::to_string(&push_tokens)?)
        .bind(serde_json::to_string(&request.pickup_addresses)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %id, "Created user");

        Ok(User {
            id,
            name: request.name.clone(),
            email: request.email.clone(),
            business_name: request.business_name.clone(),
            phone_number: request.phone_number.clone(),
            is_admin: request.is_admin,
            auth_subject: request.auth_subject.clone(),
            roles: request.roles.clone(),
            push_tokens,
            pickup_addresses: request.pickup_addresses.clone(),
            created_at: now,
        })
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let mut conn = self.pool.acquire().await?;
        find_user(&mut conn, id).await
    }

    /// Find the user linked to an identity provider subject.
    pub async fn find_user_by_subject(&self, subject: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE auth_subject = ?", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Register a push token for a user; already known tokens are ignored.
    pub async fn add_push_token(&self, user_id: &str, token: &str) -> Result<User, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::Validation("Push token is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let mut user = find_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        if !user.push_tokens.iter().any(|t| t == token) {
            user.push_tokens.push(token.to_string());
            sqlx::query("UPDATE users SET push_tokens = ? WHERE id = ?")
                .bind(serde_json::to_string(&user.push_tokens)?)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user)
    }

    /// Append a pickup address to a user's address book.
    pub async fn add_pickup_address(
        &self,
        user_id: &str,
        address: &Address,
    ) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut user = find_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        user.pickup_addresses.push(address.clone());
        sqlx::query("UPDATE users SET pickup_addresses = ? WHERE id = ?")
            .bind(serde_json::to_string(&user.pickup_addresses)?)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    /// Collect the push tokens of every administrator.
    pub async fn admin_push_tokens(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT push_tokens FROM users WHERE is_admin = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut tokens = Vec::new();
        for row in &rows {
            let user_tokens: Vec<String> = json_column(row, "push_tokens")?;
            tokens.extend(user_tokens);
        }
        Ok(tokens)
    }

    // ==================== DISH OPERATIONS ====================

    /// Add a dish to a user's catalogue.
    pub async fn create_dish(&self, user_id: &str, request: &NewDish) -> Result<Dish, AppError> {
        if request.dish_name.trim().is_empty() {
            return Err(AppError::Validation("Dish name is required".to_string()));
        }

        let mut conn = self.pool.acquire().await?;
        if !user_exists(&mut conn, user_id).await? {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO dishes (id, user_id, dish_name, cost, pounds, allergens, image_link, comments, favorite, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(user_id)
        .bind(&request.dish_name)
        .bind(request.cost)
        .bind(request.pounds)
        .bind(serde_json::to_string(&request.allergens)?)
        .bind(&request.image_link)
        .bind(&request.comments)
        .bind(request.favorite)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(Dish {
            id,
            user_id: user_id.to_string(),
            dish_name: request.dish_name.clone(),
            cost: request.cost,
            pounds: request.pounds,
            allergens: request.allergens.clone(),
            image_link: request.image_link.clone(),
            comments: request.comments.clone(),
            favorite: request.favorite,
        })
    }

    /// List a user's dishes.
    pub async fn list_dishes(&self, user_id: &str) -> Result<Vec<Dish>, AppError> {
        let mut conn = self.pool.acquire().await?;
        if !user_exists(&mut conn, user_id).await? {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        dishes_for_user(&mut conn, user_id).await
    }

    /// Get one of a user's dishes.
    pub async fn get_dish(&self, user_id: &str, dish_id: &str) -> Result<Option<Dish>, AppError> {
        let sql = format!(
            "SELECT {} FROM dishes WHERE user_id = ? AND id = ?",
            DISH_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(dish_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(dish_from_row).transpose()
    }

    /// Update a dish; fields absent from the patch keep their value.
    pub async fn update_dish(
        &self,
        user_id: &str,
        dish_id: &str,
        patch: &DishPatch,
    ) -> Result<Dish, AppError> {
        let existing = self.get_dish(user_id, dish_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Dish {} not found for user {}", dish_id, user_id))
        })?;

        let dish = Dish {
            dish_name: patch.dish_name.clone().unwrap_or(existing.dish_name),
            cost: patch.cost.unwrap_or(existing.cost),
            pounds: patch.pounds.unwrap_or(existing.pounds),
            allergens: patch.allergens.clone().unwrap_or(existing.allergens),
            image_link: patch.image_link.clone().unwrap_or(existing.image_link),
            comments: patch.comments.clone().unwrap_or(existing.comments),
            favorite: patch.favorite.unwrap_or(existing.favorite),
            ..existing
        };

        let result = sqlx::query(
            "UPDATE dishes SET dish_name = ?, cost = ?, pounds = ?, allergens = ?, image_link = ?, comments = ?, favorite = ? WHERE id = ? AND user_id = ?"
        )
        .bind(&dish.dish_name)
        .bind(dish.cost)
        .bind(dish.pounds)
        .bind(serde_json::to_string(&dish.allergens)?)
        .bind(&dish.image_link)
        .bind(&dish.comments)
        .bind(dish.favorite)
        .bind(dish_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Dish {} not found for user {}",
                dish_id, user_id
            )));
        }

        Ok(dish)
    }

    /// Delete a dish.
    pub async fn delete_dish(&self, user_id: &str, dish_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM dishes WHERE id = ? AND user_id = ?")
            .bind(dish_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Dish {} not found for user {}",
                dish_id, user_id
            )));
        }
        Ok(())
    }
}

pub(crate) async fn find_user(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<User>, AppError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;

    row.as_ref().map(user_from_row).transpose()
}

pub(crate) async fn user_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool, AppError> {
    let row = sqlx::query("SELECT 1 FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub(crate) async fn dishes_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<Dish>, AppError> {
    let sql = format!(
        "SELECT {} FROM dishes WHERE user_id = ? ORDER BY created_at, id",
        DISH_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(dish_from_row).collect()
}

// Helper functions for row conversion

fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        business_name: row.try_get("business_name")?,
        phone_number: row.try_get("phone_number")?,
        is_admin: row.try_get("is_admin")?,
        auth_subject: row.try_get("auth_subject")?,
        roles: json_column(row, "roles")?,
        push_tokens: json_column(row, "push_tokens")?,
        pickup_addresses: json_column(row, "pickup_addresses")?,
        created_at: row.try_get("created_at")?,
    })
}

fn dish_from_row(row: &SqliteRow) -> Result<Dish, AppError> {
    Ok(Dish {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        dish_name: row.try_get("dish_name")?,
        cost: row.try_get("cost")?,
        pounds: row.try_get("pounds")?,
        allergens: json_column(row, "allergens")?,
        image_link: row.try_get("image_link")?,
        comments: row.try_get("comments")?,
        favorite: row.try_get("favorite")?,
    })
}
