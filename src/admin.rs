// admin.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PollError, StoreError};
use crate::models::{VotingOption, MAX_OPTIONS};
use crate::store::VoteStore;
use crate::sync::PollView;

pub const COLOR_PALETTE: [&str; 15] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEEAD", "#D4A5A5", "#9B5DE5", "#F15BB5",
    "#00BBF9", "#00F5D4", "#FF9F1C", "#2EC4B6", "#E71D36", "#FF3366", "#4D8B31",
];

/// A palette color not yet taken, or the first palette color once all are used.
pub fn pick_color(used: &[&str]) -> String {
    let available: Vec<&str> = COLOR_PALETTE
        .iter()
        .copied()
        .filter(|color| !used.iter().any(|u| u.eq_ignore_ascii_case(color)))
        .collect();

    available
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(COLOR_PALETTE[0])
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Password-based identity provider for the single admin account.
#[derive(Clone)]
pub struct SessionStore {
    email: String,
    password: Option<String>,
    ttl: Duration,
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new(email: impl Into<String>, password: Option<String>, ttl: Duration) -> Self {
        Self {
            email: email.into(),
            password,
            ttl,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `None` on bad credentials or when no admin password is configured.
    pub async fn sign_in(&self, email: &str, password: &str) -> Option<Session> {
        let expected = self.password.as_deref()?;
        if !email.trim().eq_ignore_ascii_case(&self.email) || password != expected {
            warn!("Rejected admin sign-in for {email}");
            return None;
        }

        let session = Session {
            token: Uuid::new_v4(),
            email: self.email.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.write().await.insert(session.token, session.clone());
        info!("Admin signed in");
        Some(session)
    }

    /// Present and unexpired sessions only. Expired ones are dropped on lookup.
    pub async fn get_session(&self, token: Uuid) -> Option<Session> {
        let session = self.sessions.read().await.get(&token).cloned()?;
        if session.is_valid() {
            return Some(session);
        }

        self.sessions.write().await.remove(&token);
        None
    }

    pub async fn sign_out(&self, token: Uuid) {
        if self.sessions.write().await.remove(&token).is_some() {
            info!("Admin signed out");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminAction {
    UpdateMessage(String),
    AddOption(String),
    DeleteOption { id: i64, confirmed: bool },
    ResetVotes { confirmed: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdminOutcome {
    MessageUpdated { message: String },
    OptionAdded { option: VotingOption },
    OptionDeleted { id: i64 },
    /// Every vote is gone; the requesting client reloads the whole page.
    ReloadRequired { removed: u64 },
}

/// Admin surface. Every mutation is refused locally unless a valid session is present.
#[derive(Clone)]
pub struct AdminConsole {
    store: Arc<dyn VoteStore>,
    view: PollView,
    // held from the cap check until the options view is updated
    options_lock: Arc<Mutex<()>>,
}

impl AdminConsole {
    pub fn new(store: Arc<dyn VoteStore>, view: PollView) -> Self {
        Self {
            store,
            view,
            options_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Mount check: an absent or expired session closes the surface.
    pub fn open(&self, session: Option<&Session>) -> Result<Session, PollError> {
        session
            .filter(|session| session.is_valid())
            .cloned()
            .ok_or(PollError::AuthRequired)
    }

    pub async fn mutate(
        &self,
        session: Option<&Session>,
        action: AdminAction,
    ) -> Result<AdminOutcome, PollError> {
        self.open(session)?;

        match action {
            AdminAction::UpdateMessage(message) => {
                let message = non_empty(&message, "message")?;
                self.store.insert_message(&message).await?;
                self.view.set_message(message.clone());
                Ok(AdminOutcome::MessageUpdated { message })
            }
            AdminAction::AddOption(label) => {
                let label = non_empty(&label, "option label")?;
                let _guard = self.options_lock.lock().await;
                let options = self.view.snapshot().options;
                if options.len() >= MAX_OPTIONS {
                    return Err(PollError::OptionLimit(MAX_OPTIONS));
                }

                let color = {
                    let used: Vec<&str> = options.iter().map(|o| o.color.as_str()).collect();
                    pick_color(&used)
                };
                let option = self
                    .store
                    .add_option(&label, &color)
                    .await
                    .map_err(|e| match e {
                        StoreError::OptionLimit(max) => PollError::OptionLimit(max),
                        other => PollError::from(other),
                    })?;
                info!("Added voting option {} ({})", option.label, option.id);

                let mut options = options;
                options.push(option.clone());
                self.view.set_options(options);
                Ok(AdminOutcome::OptionAdded { option })
            }
            AdminAction::DeleteOption { id, confirmed } => {
                if !confirmed {
                    return Err(PollError::ConfirmationRequired);
                }
                let _guard = self.options_lock.lock().await;
                self.store.delete_option(id).await?;
                info!("Deleted voting option {id} and its votes");

                let mut options = self.view.snapshot().options;
                options.retain(|option| option.id != id);
                self.view.set_options(options);
                Ok(AdminOutcome::OptionDeleted { id })
            }
            AdminAction::ResetVotes { confirmed } => {
                if !confirmed {
                    return Err(PollError::ConfirmationRequired);
                }
                let removed = self.store.reset_votes().await?;
                warn!("Reset all votes ({removed} removed)");
                Ok(AdminOutcome::ReloadRequired { removed })
            }
        }
    }
}

fn non_empty(input: &str, what: &str) -> Result<String, PollError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PollError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}
