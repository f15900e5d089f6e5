// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user Telegram session registry.
//!
//! Owns the `telegram_id → client` map for the whole process. The map is a
//! plain `RefCell` because the registry lives inside the fabric thread and
//! is never touched from anywhere else; a client found bound to a foreign
//! loop is discarded and rebuilt rather than reused.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use grapevine_core::GrapevineError;
use grapevine_core::traits::cache::qr_session_key;
use grapevine_core::traits::{Cache, QrWaiter, TelegramClient, TelegramConnector};
use grapevine_core::types::{AuthStatus, TelegramCredentials};
use grapevine_store::Database;
use grapevine_store::models::User;
use grapevine_store::queries::{invites, users};
use grapevine_vault::Vault;

/// Transient QR session metadata lives this long in the shared cache.
const QR_SESSION_TTL: Duration = Duration::from_secs(600);
/// How long the login waiter pends before giving up.
const QR_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);
/// Failed authorizations before the cooldown block kicks in.
const AUTH_FAILURE_THRESHOLD: u32 = 5;
/// Cooldown applied once the threshold is reached.
const AUTH_BLOCK_MINUTES: i64 = 30;

/// What `create_qr_session` hands back to the caller: enough to render a
/// QR code and poll for completion.
#[derive(Debug, Clone)]
pub struct QrSession {
    pub session_id: String,
    pub deep_link: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// QR session state as stored under `qr_session:{id}`. The auth and bot
/// processes poll the same record, so the shape is part of the cache
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrSessionState {
    pub telegram_id: i64,
    pub invite_code: String,
    pub status: String,
    pub deep_link: String,
}

struct ActiveClient {
    client: Arc<dyn TelegramClient>,
    home_thread: ThreadId,
}

/// Owns one Telegram client per authenticated user, pinned to the
/// ingestion loop.
pub struct SessionRegistry {
    connector: Arc<dyn TelegramConnector>,
    db: Database,
    vault: Arc<Vault>,
    cache: Arc<dyn Cache>,
    sessions_dir: PathBuf,
    master_credentials: Option<TelegramCredentials>,
    active_clients: RefCell<HashMap<i64, ActiveClient>>,
    home_thread: ThreadId,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn TelegramConnector>,
        db: Database,
        vault: Arc<Vault>,
        cache: Arc<dyn Cache>,
        sessions_dir: PathBuf,
        master_credentials: Option<TelegramCredentials>,
    ) -> Self {
        Self {
            connector,
            db,
            vault,
            cache,
            sessions_dir,
            master_credentials,
            active_clients: RefCell::new(HashMap::new()),
            home_thread: std::thread::current().id(),
        }
    }

    /// The relational store this registry writes auth state to.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Where the session file for this account lives:
    /// `sessions/user_{telegram_id}.session`.
    pub fn session_path(&self, telegram_id: i64) -> PathBuf {
        self.sessions_dir
            .join(format!("user_{telegram_id}.session"))
    }

    /// Return a connected, authorized client for the user.
    ///
    /// A cached client whose recorded home thread differs from the
    /// registry's loop is discarded and replaced. Authorization failures
    /// bump the failure counter and, past the threshold, block the user
    /// with a cooldown.
    pub async fn get_client(
        &self,
        telegram_id: i64,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError> {
        let cached = {
            let mut map = self.active_clients.borrow_mut();
            match map.get(&telegram_id) {
                Some(entry) if entry.home_thread == self.home_thread => {
                    Some(Arc::clone(&entry.client))
                }
                Some(_) => {
                    warn!(telegram_id, "cached client bound to a foreign loop, discarding");
                    map.remove(&telegram_id);
                    None
                }
                None => None,
            }
        };
        if let Some(client) = cached {
            return Ok(client);
        }

        let user = users::get_by_telegram_id(&self.db, telegram_id)
            .await?
            .ok_or_else(|| GrapevineError::Validation(format!("unknown user {telegram_id}")))?;

        let now = Utc::now();
        if user.auth_status == AuthStatus::Blocked && !user.block_elapsed(now) {
            return Err(GrapevineError::AuthRequired { telegram_id });
        }

        let credentials = self.credentials_for(&user)?;
        let session_path = self.session_path(telegram_id);

        let client = match self
            .connector
            .connect(telegram_id, &credentials, &session_path)
            .await
        {
            Ok(client) => client,
            Err(GrapevineError::AuthRequired { .. }) => {
                let attempts = users::record_auth_failure(
                    &self.db,
                    telegram_id,
                    now,
                    AUTH_FAILURE_THRESHOLD,
                    chrono::Duration::minutes(AUTH_BLOCK_MINUTES),
                )
                .await?;
                if attempts < AUTH_FAILURE_THRESHOLD {
                    users::set_auth_status(&self.db, telegram_id, AuthStatus::Pending).await?;
                }
                warn!(telegram_id, attempts, "telegram authorization failed");
                return Err(GrapevineError::AuthRequired { telegram_id });
            }
            // Flood waits carry the server hint; the scheduler retries,
            // not us.
            Err(e) => return Err(e),
        };

        let authorized = client.authorized_user_id().await?;
        if authorized != telegram_id {
            error!(
                telegram_id,
                authorized, "session file authorized a different account, dropping it"
            );
            client.disconnect().await;
            return Err(GrapevineError::AuthRequired { telegram_id });
        }

        self.publish(telegram_id, Arc::clone(&client));
        Ok(client)
    }

    /// Begin a QR login flow.
    ///
    /// Validates the invite, exports a login token, parks the session
    /// metadata in the shared cache and spawns the waiter that finalizes
    /// (or expires) the login in the background.
    pub async fn create_qr_session(
        self: Rc<Self>,
        telegram_id: i64,
        invite_code: &str,
    ) -> Result<QrSession, GrapevineError> {
        let invite = invites::get(&self.db, invite_code)
            .await?
            .ok_or_else(|| GrapevineError::Validation("unknown invite code".into()))?;
        if invite.expires_at <= Utc::now() || invite.uses_count >= invite.max_uses {
            return Err(GrapevineError::Validation(
                "invite code expired or exhausted".into(),
            ));
        }

        let user = users::upsert(&self.db, telegram_id, None, None).await?;
        let credentials = self.credentials_for(&user)?;
        let (login, waiter) = self.connector.begin_qr_login(&credentials).await?;

        let session_id = Uuid::new_v4().to_string();
        let state = QrSessionState {
            telegram_id,
            invite_code: invite.code.clone(),
            status: "pending".to_string(),
            deep_link: login.deep_link.clone(),
        };
        self.write_qr_state(&session_id, &state).await;

        let registry = Rc::clone(&self);
        let waiter_session = session_id.clone();
        tokio::task::spawn_local(async move {
            registry
                .await_qr_login(waiter_session, telegram_id, state.invite_code, waiter)
                .await;
        });

        info!(telegram_id, session_id, "qr login session created");
        Ok(QrSession {
            session_id,
            deep_link: login.deep_link,
            expires_at: login.expires_at,
        })
    }

    async fn await_qr_login(
        self: Rc<Self>,
        session_id: String,
        telegram_id: i64,
        invite_code: String,
        waiter: Box<dyn QrWaiter>,
    ) {
        match waiter.wait_authorized(QR_LOGIN_TIMEOUT).await {
            Ok(client) => {
                if let Err(e) = self
                    .finalize(&session_id, telegram_id, &invite_code, client)
                    .await
                {
                    warn!(telegram_id, session_id, error = %e, "qr login finalization failed");
                }
            }
            Err(e) => {
                warn!(telegram_id, session_id, error = %e, "qr login expired");
                self.set_qr_status(&session_id, "timeout").await;
            }
        }
    }

    /// Complete a QR login with the freshly authorized client.
    ///
    /// The authorized account id must equal the claimed `telegram_id`; a
    /// mismatch records `security_mismatch` and mutates nothing else.
    pub async fn finalize(
        &self,
        session_id: &str,
        telegram_id: i64,
        invite_code: &str,
        client: Arc<dyn TelegramClient>,
    ) -> Result<(), GrapevineError> {
        let authorized = client.authorized_user_id().await?;
        if authorized != telegram_id {
            error!(
                telegram_id,
                authorized, "qr login authorized a different account"
            );
            client.disconnect().await;
            self.set_qr_status(session_id, "security_mismatch").await;
            return Err(GrapevineError::Validation(
                "authorized account does not match the claimed identity".into(),
            ));
        }

        let Some(invite) = invites::consume(&self.db, invite_code, Utc::now()).await? else {
            client.disconnect().await;
            self.set_qr_status(session_id, "invite_exhausted").await;
            return Err(GrapevineError::Validation(
                "invite code expired or exhausted".into(),
            ));
        };

        let expires = invite
            .default_trial_days
            .map(|days| Utc::now() + chrono::Duration::days(i64::from(days)));
        users::activate_tier(&self.db, telegram_id, invite.default_tier, expires).await?;

        client.persist_session(&self.session_path(telegram_id)).await?;
        users::set_auth_status(&self.db, telegram_id, AuthStatus::Authenticated).await?;
        users::reset_auth_failures(&self.db, telegram_id).await?;

        self.publish(telegram_id, client);
        self.set_qr_status(session_id, "authenticated").await;
        info!(telegram_id, session_id, tier = %invite.default_tier, "qr login finalized");
        Ok(())
    }

    /// Current status of a QR session, if the cache still holds it.
    pub async fn qr_status(&self, session_id: &str) -> Result<Option<String>, GrapevineError> {
        let value = self.cache.get_json(&qr_session_key(session_id)).await?;
        Ok(value.and_then(|v| {
            serde_json::from_value::<QrSessionState>(v)
                .ok()
                .map(|s| s.status)
        }))
    }

    /// Drop the user's client, closing the connection.
    pub async fn disconnect(&self, telegram_id: i64) {
        let entry = self.active_clients.borrow_mut().remove(&telegram_id);
        if let Some(entry) = entry {
            entry.client.disconnect().await;
            info!(telegram_id, "telegram session disconnected");
        }
        metrics::gauge!("grapevine_active_sessions")
            .set(self.active_clients.borrow().len() as f64);
    }

    /// Drop every client. Called when the ingestion loop winds down.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(i64, ActiveClient)> =
            self.active_clients.borrow_mut().drain().collect();
        for (telegram_id, entry) in drained {
            entry.client.disconnect().await;
            info!(telegram_id, "telegram session disconnected");
        }
        metrics::gauge!("grapevine_active_sessions").set(0.0);
    }

    fn publish(&self, telegram_id: i64, client: Arc<dyn TelegramClient>) {
        self.active_clients.borrow_mut().insert(
            telegram_id,
            ActiveClient {
                client,
                home_thread: std::thread::current().id(),
            },
        );
        metrics::gauge!("grapevine_active_sessions")
            .set(self.active_clients.borrow().len() as f64);
    }

    /// Decrypt the user's own API credentials, falling back to the master
    /// bundle. Plaintext never leaves this thread.
    fn credentials_for(&self, user: &User) -> Result<TelegramCredentials, GrapevineError> {
        if let (Some(id_enc), Some(hash_enc)) = (&user.api_id_enc, &user.api_hash_enc) {
            let api_id_raw = self.vault.decrypt(id_enc)?;
            let api_id: i32 = api_id_raw
                .parse()
                .map_err(|_| GrapevineError::Vault("decrypted api_id is not numeric".into()))?;
            let api_hash = self.vault.decrypt(hash_enc)?;
            let phone = match &user.phone_enc {
                Some(enc) => Some(self.vault.decrypt(enc)?),
                None => None,
            };
            return Ok(TelegramCredentials {
                api_id,
                api_hash,
                phone,
            });
        }
        self.master_credentials.clone().ok_or_else(|| {
            GrapevineError::Config("no Telegram API credentials configured".into())
        })
    }

    async fn write_qr_state(&self, session_id: &str, state: &QrSessionState) {
        let Ok(value) = serde_json::to_value(state) else {
            return;
        };
        if let Err(e) = self
            .cache
            .set_json(&qr_session_key(session_id), &value, QR_SESSION_TTL)
            .await
        {
            warn!(session_id, error = %e, "failed to cache qr session state");
        }
    }

    async fn set_qr_status(&self, session_id: &str, status: &str) {
        let current = self.cache.get_json(&qr_session_key(session_id)).await;
        let Ok(Some(value)) = current else { return };
        let Ok(mut state) = serde_json::from_value::<QrSessionState>(value) else {
            return;
        };
        state.status = status.to_string();
        self.write_qr_state(session_id, &state).await;
    }
}
