//! Test utilities for the backend crate: in-memory collaborators and a
//! seeded database fixture.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use crate::auth::{Role, StaticCredential, StaticTokenVerifier};
use crate::db::{init_database, Repository};
use crate::errors::AppError;
use crate::lifecycle::LifecycleCoordinator;
use crate::models::{
    Address, CreateDonationRequest, Dish, DonationDish, DonationForm, ImageUpload, NewDish,
    NewDonation, NewUser, User,
};
use crate::notify::{DeliveryReceipt, DeliveryStatus, Notifier, PushGateway};

pub const DONOR_TOKEN: &str = "donor-token";
pub const VOLUNTEER_TOKEN: &str = "volunteer-token";
pub const OTHER_VOLUNTEER_TOKEN: &str = "other-volunteer-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub const DONOR_PUSH_TOKEN: &str = "ExponentPushToken[donor]";
pub const ADMIN_PUSH_TOKEN: &str = "ExponentPushToken[admin]";

/// Object store that keeps blobs in memory and records deletions.
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
    counter: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn contains(&self, url: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(url)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Every URL passed to `delete`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl crate::storage::ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, bytes: &[u8], _content_type: &str) -> Result<String, AppError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("memory://image-container/{}-{}", n, name);
        self.blobs.lock().unwrap().insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<(), AppError> {
        if url.is_empty() {
            return Ok(());
        }
        self.deleted.lock().unwrap().push(url.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("object store unavailable".to_string()));
        }
        self.blobs.lock().unwrap().remove(url);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPush {
    pub title: String,
    pub body: String,
    pub tokens: Vec<String>,
}

/// Push gateway that records every batch, including the ones it fails.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<SentPush>>,
    fail_sends: AtomicBool,
}

impl RecordingGateway {
    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Wait until at least `count` batches were sent, for up to two seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<SentPush> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send_batch(
        &self,
        title: &str,
        body: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryReceipt>, AppError> {
        self.sent.lock().unwrap().push(SentPush {
            title: title.to_string(),
            body: body.to_string(),
            tokens: tokens.to_vec(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("push service unavailable".to_string()));
        }
        Ok(tokens
            .iter()
            .map(|token| DeliveryReceipt {
                token: token.clone(),
                status: DeliveryStatus::Delivered,
            })
            .collect())
    }
}

pub fn address(street: &str) -> Address {
    Address {
        street_address: street.to_string(),
        building_number: Some(2),
        city: "Atlanta".to_string(),
        state: "GA".to_string(),
        zip_code: "30332".to_string(),
        longitude: -84.3963,
        latitude: 33.7756,
    }
}

pub fn image(name: &str) -> ImageUpload {
    ImageUpload {
        file_name: name.to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

/// Temporary database seeded with a donor (and their dishes), two
/// volunteers and an administrator.
pub struct Fixture {
    pub repo: Arc<Repository>,
    pub coordinator: LifecycleCoordinator,
    pub images: Arc<MemoryObjectStore>,
    pub gateway: Arc<RecordingGateway>,
    pub donor: User,
    pub volunteer: User,
    pub other_volunteer: User,
    pub admin: User,
    pub dishes: Vec<Dish>,
    _temp_dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let donor = repo
            .create_user(&NewUser {
                name: "Dana Donor".to_string(),
                email: "dana@example.com".to_string(),
                business_name: "Umi Kitchen".to_string(),
                phone_number: Some("555-0100".to_string()),
                auth_subject: Some("auth0|donor".to_string()),
                roles: vec![Role::Donor],
                push_tokens: vec![DONOR_PUSH_TOKEN.to_string()],
                pickup_addresses: vec![address("1 Donor Way")],
                ..NewUser::default()
            })
            .await
            .unwrap();
        let volunteer = repo
            .create_user(&NewUser {
                name: "Val Volunteer".to_string(),
                email: "val@example.com".to_string(),
                auth_subject: Some("auth0|volunteer".to_string()),
                roles: vec![Role::Volunteer],
                ..NewUser::default()
            })
            .await
            .unwrap();
        let other_volunteer = repo
            .create_user(&NewUser {
                name: "Otto Volunteer".to_string(),
                email: "otto@example.com".to_string(),
                auth_subject: Some("auth0|volunteer2".to_string()),
                roles: vec![Role::Volunteer],
                ..NewUser::default()
            })
            .await
            .unwrap();
        let admin = repo
            .create_user(&NewUser {
                name: "Ada Admin".to_string(),
                email: "ada@example.com".to_string(),
                is_admin: true,
                auth_subject: Some("auth0|admin".to_string()),
                roles: vec![Role::Admin],
                push_tokens: vec![ADMIN_PUSH_TOKEN.to_string()],
                ..NewUser::default()
            })
            .await
            .unwrap();

        let mut dishes = Vec::new();
        for (name, cost, pounds) in [("Curry", 12.5, 3.0), ("Rice", 4.0, 5.5)] {
            let dish = repo
                .create_dish(
                    &donor.id,
                    &NewDish {
                        dish_name: name.to_string(),
                        cost,
                        pounds,
                        allergens: vec!["nuts".to_string()],
                        ..NewDish::default()
                    },
                )
                .await
                .unwrap();
            dishes.push(dish);
        }

        let credential = |token: &str, subject: &str, role: Role| StaticCredential {
            token: token.to_string(),
            subject: subject.to_string(),
            roles: vec![role],
        };
        let verifier = StaticTokenVerifier::new(vec![
            credential(DONOR_TOKEN, "auth0|donor", Role::Donor),
            credential(VOLUNTEER_TOKEN, "auth0|volunteer", Role::Volunteer),
            credential(OTHER_VOLUNTEER_TOKEN, "auth0|volunteer2", Role::Volunteer),
            credential(ADMIN_TOKEN, "auth0|admin", Role::Admin),
        ]);

        let images = Arc::new(MemoryObjectStore::default());
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = LifecycleCoordinator::new(
            repo.clone(),
            images.clone(),
            Arc::new(verifier),
            Notifier::new(gateway.clone()),
        );

        Fixture {
            repo,
            coordinator,
            images,
            gateway,
            donor,
            volunteer,
            other_volunteer,
            admin,
            dishes,
            _temp_dir: temp_dir,
        }
    }

    /// A valid donation of both seeded dishes, without an image.
    pub fn donation_request(&self) -> CreateDonationRequest {
        let start = Utc::now() + chrono::Duration::hours(1);
        CreateDonationRequest {
            user_id: self.donor.id.clone(),
            donation: NewDonation {
                donation_dishes: self
                    .dishes
                    .iter()
                    .map(|dish| DonationDish {
                        dish_id: dish.id.clone(),
                        quantity: 3,
                    })
                    .collect(),
                pickup_address: address("1 Donor Way"),
                pickup_instructions: "Back door".to_string(),
                pickup_start_time: start,
                pickup_end_time: start + chrono::Duration::hours(2),
                drop_off_address: Some(address("9 Shelter Rd")),
                drop_off_instructions: None,
                description: Some("Leftover catering".to_string()),
            },
            image: None,
        }
    }

    pub async fn create_donation(&self) -> DonationForm {
        self.coordinator
            .create(self.donation_request())
            .await
            .expect("Failed to create donation")
    }

    /// Run raw SQL against the fixture database, e.g. to install fault triggers.
    pub async fn execute_sql(&self, sql: &str) {
        sqlx::query(sql)
            .execute(self.repo.pool())
            .await
            .expect("Failed to execute SQL");
    }
}
