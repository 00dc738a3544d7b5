// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (plus unique email/username index documents)
//! - Device authorizations (plus a unique user-code index)
//! - Rate limit counters
//!
//! Conditional writes run inside read-write transactions. Reads go through a
//! client bound to the transaction so Firestore locks the documents they
//! touch (including ones that do not exist yet); a conflicting transaction
//! fails to commit and is retried from scratch.

use crate::db::{collections, Store};
use crate::error::AppError;
use crate::models::{
    ConfirmOutcome, ConfirmRejection, CreateUserOutcome, DeviceAuthorization, NewUser,
    RateLimitRecord, User,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

const MAX_TRANSACTION_ATTEMPTS: usize = 3;

/// User IDs stay below 2^53 so they survive a round trip through JSON numbers.
const MAX_USER_ID: u64 = (1 << 53) - 1;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Index document pointing at the owning user.
#[derive(Debug, Serialize, Deserialize)]
struct UserIndexEntry {
    user_id: u64,
}

/// Index document pointing at a device authorization.
#[derive(Debug, Serialize, Deserialize)]
struct UserCodeEntry {
    user_code: String,
    device_code: String,
    expires_at: i64,
}

/// Result of one transaction attempt.
enum Attempt<T> {
    Done(T),
    Contended,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client; every operation returns a database error.
    ///
    /// Used to exercise the fail-closed paths.
    pub fn new_offline() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Begin a transaction and return it with a client whose reads join it.
    async fn begin(
        &self,
    ) -> Result<(firestore::FirestoreTransaction<'_>, firestore::FirestoreDb), AppError> {
        let client = self.get_client()?;
        let transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let reader = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );

        Ok((transaction, reader))
    }

    /// Commit, mapping a failed commit to `Contended` so the caller retries.
    async fn commit<T>(
        transaction: firestore::FirestoreTransaction<'_>,
        value: T,
    ) -> Result<Attempt<T>, AppError> {
        match transaction.commit().await {
            Ok(_) => Ok(Attempt::Done(value)),
            Err(e) => {
                tracing::warn!(error = %e, "Transaction commit failed, retrying");
                Ok(Attempt::Contended)
            }
        }
    }

    async fn read<T>(
        client: &firestore::FirestoreDb,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, AppError>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    fn write_in<T>(
        &self,
        transaction: &mut firestore::FirestoreTransaction<'_>,
        collection: &str,
        id: &str,
        object: &T,
    ) -> Result<(), AppError>
    where
        T: Serialize + Sync + Send + for<'de> Deserialize<'de>,
    {
        self.get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(object)
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to add {} write to transaction: {}",
                    collection, e
                ))
            })?;
        Ok(())
    }

    async fn query_one<T>(
        &self,
        collection: &str,
        field: &'static str,
        value: &str,
    ) -> Result<Option<T>, AppError>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        let value = value.to_string();
        let mut found: Vec<T> = self
            .get_client()?
            .fluent()
            .select()
            .from(collection)
            .filter(move |q| q.for_all([q.field(field).eq(value.clone())]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(found.pop())
    }

    /// Run `attempt` until it commits, up to `MAX_TRANSACTION_ATTEMPTS` times.
    async fn with_retries<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Attempt<T>, AppError>>,
    {
        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            if let Attempt::Done(value) = attempt().await? {
                return Ok(value);
            }
        }
        Err(AppError::Database(format!(
            "{operation}: transaction contended {MAX_TRANSACTION_ATTEMPTS} times"
        )))
    }

    // ─── Attempts ────────────────────────────────────────────────

    async fn try_create_user(&self, user: &NewUser) -> Result<Attempt<CreateUserOutcome>, AppError> {
        let id = random_user_id()?;
        let email_key = urlencoding::encode(&user.email).into_owned();
        let username_key = urlencoding::encode(&user.username).into_owned();

        let (mut transaction, reader) = self.begin().await?;

        let email_owner: Option<UserIndexEntry> =
            Self::read(&reader, collections::USER_EMAILS, &email_key).await?;
        if email_owner.is_some() {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(CreateUserOutcome::EmailTaken));
        }

        let username_owner: Option<UserIndexEntry> =
            Self::read(&reader, collections::USERNAMES, &username_key).await?;
        if username_owner.is_some() {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(CreateUserOutcome::UsernameTaken));
        }

        let id_in_use: Option<User> = Self::read(&reader, collections::USERS, &id.to_string()).await?;
        if id_in_use.is_some() {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Contended);
        }

        let created = user.clone().into_user(id);
        let index = UserIndexEntry { user_id: id };

        self.write_in(&mut transaction, collections::USERS, &id.to_string(), &created)?;
        self.write_in(&mut transaction, collections::USER_EMAILS, &email_key, &index)?;
        self.write_in(&mut transaction, collections::USERNAMES, &username_key, &index)?;

        Self::commit(transaction, CreateUserOutcome::Created(created)).await
    }

    async fn try_update_user(
        &self,
        id: u64,
        update: &(dyn Fn(&mut User) + Send + Sync),
    ) -> Result<Attempt<Option<User>>, AppError> {
        let (mut transaction, reader) = self.begin().await?;

        let user: Option<User> = Self::read(&reader, collections::USERS, &id.to_string()).await?;
        let Some(mut user) = user else {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(None));
        };

        update(&mut user);
        self.write_in(&mut transaction, collections::USERS, &id.to_string(), &user)?;

        Self::commit(transaction, Some(user)).await
    }

    async fn try_insert_device(
        &self,
        record: &DeviceAuthorization,
    ) -> Result<Attempt<bool>, AppError> {
        let (mut transaction, reader) = self.begin().await?;

        let by_device: Option<DeviceAuthorization> =
            Self::read(&reader, collections::DEVICE_AUTHORIZATIONS, &record.device_code).await?;
        let by_user_code: Option<UserCodeEntry> =
            Self::read(&reader, collections::DEVICE_USER_CODES, &record.user_code).await?;

        if by_device.is_some() || by_user_code.is_some() {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(false));
        }

        let index = UserCodeEntry {
            user_code: record.user_code.clone(),
            device_code: record.device_code.clone(),
            expires_at: record.expires_at,
        };

        self.write_in(
            &mut transaction,
            collections::DEVICE_AUTHORIZATIONS,
            &record.device_code,
            record,
        )?;
        self.write_in(
            &mut transaction,
            collections::DEVICE_USER_CODES,
            &record.user_code,
            &index,
        )?;

        Self::commit(transaction, true).await
    }

    async fn try_confirm(
        &self,
        user_code: &str,
        user_id: u64,
        fresh_token: &str,
        now: i64,
    ) -> Result<Attempt<ConfirmOutcome>, AppError> {
        let (mut transaction, reader) = self.begin().await?;

        let index: Option<UserCodeEntry> =
            Self::read(&reader, collections::DEVICE_USER_CODES, user_code).await?;
        let record: Option<DeviceAuthorization> = match index {
            Some(index) => {
                Self::read(&reader, collections::DEVICE_AUTHORIZATIONS, &index.device_code)
                    .await?
            }
            None => None,
        };

        let Some(mut record) = record else {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(ConfirmOutcome::Rejected(
                ConfirmRejection::InvalidCode,
            )));
        };

        if let Err(rejection) = record.confirmable(now) {
            let _ = transaction.rollback().await;
            return Ok(Attempt::Done(ConfirmOutcome::Rejected(rejection)));
        }

        let user: Option<User> =
            Self::read(&reader, collections::USERS, &user_id.to_string()).await?;
        let Some(mut user) = user else {
            let _ = transaction.rollback().await;
            return Err(AppError::NotFound(format!("User {user_id} not found")));
        };

        let token = match &user.api_token {
            Some(existing) => existing.clone(),
            None => {
                user.api_token = Some(fresh_token.to_string());
                user.api_token_issued_at = Some(now);
                self.write_in(&mut transaction, collections::USERS, &user_id.to_string(), &user)?;
                fresh_token.to_string()
            }
        };

        record.approve(user_id, token.clone());
        self.write_in(
            &mut transaction,
            collections::DEVICE_AUTHORIZATIONS,
            &record.device_code,
            &record,
        )?;

        Self::commit(transaction, ConfirmOutcome::Approved { token }).await
    }

    async fn try_hit_rate_limit(
        &self,
        key: &str,
        now: i64,
        window_secs: i64,
    ) -> Result<Attempt<RateLimitRecord>, AppError> {
        let doc_id = urlencoding::encode(key).into_owned();
        let (mut transaction, reader) = self.begin().await?;

        let existing: Option<RateLimitRecord> =
            Self::read(&reader, collections::RATE_LIMITS, &doc_id).await?;
        let next = RateLimitRecord::hit(existing, key, now, window_secs);

        self.write_in(&mut transaction, collections::RATE_LIMITS, &doc_id, &next)?;

        Self::commit(transaction, next).await
    }

    // ─── Helper Methods ────────────────────────────────────────────

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&T) -> String,
    {
        let client = self.get_client()?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for FirestoreDb {
    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, id: u64) -> Result<Option<User>, AppError> {
        Self::read(self.get_client()?, collections::USERS, &id.to_string()).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let key = urlencoding::encode(email).into_owned();
        let index: Option<UserIndexEntry> =
            Self::read(self.get_client()?, collections::USER_EMAILS, &key).await?;
        match index {
            Some(index) => self.get_user(index.user_id).await,
            None => Ok(None),
        }
    }

    async fn find_user_by_api_token(&self, token: &str) -> Result<Option<User>, AppError> {
        self.query_one(collections::USERS, "api_token", token).await
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome, AppError> {
        let outcome = self
            .with_retries("create_user", || self.try_create_user(&user))
            .await?;

        if let CreateUserOutcome::Created(created) = &outcome {
            tracing::info!(user_id = created.id, "User created");
        }
        Ok(outcome)
    }

    async fn set_user_visibility(
        &self,
        id: u64,
        is_public: bool,
    ) -> Result<Option<User>, AppError> {
        let update = move |user: &mut User| user.is_public = is_public;
        self.with_retries("set_user_visibility", || self.try_update_user(id, &update))
            .await
    }

    async fn replace_api_token(
        &self,
        id: u64,
        token: &str,
        issued_at: i64,
    ) -> Result<Option<User>, AppError> {
        let token = token.to_string();
        let update = move |user: &mut User| {
            user.api_token = Some(token.clone());
            user.api_token_issued_at = Some(issued_at);
        };
        self.with_retries("replace_api_token", || self.try_update_user(id, &update))
            .await
    }

    // ─── Device Authorization Operations ─────────────────────────

    async fn insert_device_authorization(
        &self,
        record: &DeviceAuthorization,
    ) -> Result<bool, AppError> {
        self.with_retries("insert_device_authorization", || {
            self.try_insert_device(record)
        })
        .await
    }

    async fn get_device_authorization(
        &self,
        device_code: &str,
    ) -> Result<Option<DeviceAuthorization>, AppError> {
        Self::read(
            self.get_client()?,
            collections::DEVICE_AUTHORIZATIONS,
            device_code,
        )
        .await
    }

    async fn confirm_device_authorization(
        &self,
        user_code: &str,
        user_id: u64,
        fresh_token: &str,
        now: i64,
    ) -> Result<ConfirmOutcome, AppError> {
        self.with_retries("confirm_device_authorization", || {
            self.try_confirm(user_code, user_id, fresh_token, now)
        })
        .await
    }

    // ─── Rate Limit Operations ───────────────────────────────────

    async fn hit_rate_limit(
        &self,
        key: &str,
        now: i64,
        window_secs: i64,
    ) -> Result<RateLimitRecord, AppError> {
        self.with_retries("hit_rate_limit", || {
            self.try_hit_rate_limit(key, now, window_secs)
        })
        .await
    }

    // ─── Cleanup Operations ──────────────────────────────────────

    async fn delete_expired_device_authorizations(
        &self,
        cutoff: i64,
    ) -> Result<usize, AppError> {
        let expired: Vec<DeviceAuthorization> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::DEVICE_AUTHORIZATIONS)
            .filter(move |q| q.for_all([q.field("expires_at").less_than(cutoff)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Index entries carry their own expiry, so an entry orphaned by a
        // partial failure is still found on the next sweep.
        let expired_codes: Vec<UserCodeEntry> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::DEVICE_USER_CODES)
            .filter(move |q| q.for_all([q.field("expires_at").less_than(cutoff)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.batch_delete(&expired, collections::DEVICE_AUTHORIZATIONS, |r| {
            r.device_code.clone()
        })
        .await?;
        self.batch_delete(&expired_codes, collections::DEVICE_USER_CODES, |e| {
            e.user_code.clone()
        })
        .await?;

        tracing::debug!(count = expired.len(), "Deleted expired device authorizations");
        Ok(expired.len())
    }

    async fn delete_stale_rate_limits(&self, now: i64) -> Result<usize, AppError> {
        let stale: Vec<RateLimitRecord> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::RATE_LIMITS)
            .filter(move |q| q.for_all([q.field("window_end").less_than(now + 1)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.batch_delete(&stale, collections::RATE_LIMITS, |r| {
            urlencoding::encode(&r.key).into_owned()
        })
        .await?;

        tracing::debug!(count = stale.len(), "Deleted stale rate limit records");
        Ok(stale.len())
    }
}

fn random_user_id() -> Result<u64, AppError> {
    let bytes = crate::services::credentials::random_bytes::<8>()?;
    Ok((u64::from_be_bytes(bytes) & MAX_USER_ID).max(1))
}
