// store/pg.rs
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Pool, Postgres};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::VoteStore;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::models::{
    AggregateRow, Change, Demographics, Location, Vote, VoteLocation, VotingOption, MAX_OPTIONS,
};

/// Channel the table triggers notify on.
pub const CHANGE_CHANNEL: &str = "poll_changes";

const FOREIGN_KEY_VIOLATION: &str = "23503";

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Advisory lock key held while checking the option cap and inserting.
const OPTION_LIMIT_LOCK: i64 = 0x706f_6c6c;

pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<Pool<Postgres>, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");

    Ok(pool)
}

/// Forwards trigger notifications into the in-process feed, so every server
/// instance sees changes made through any other.
///
/// Notifications sent while the connection is down are lost, so once it is
/// back every table is announced as updated.
pub async fn spawn_change_listener(
    pool: &PgPool,
    feed: ChangeFeed,
) -> Result<JoinHandle<()>, StoreError> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;

    Ok(tokio::spawn(async move {
        let mut resync = false;
        loop {
            if resync {
                // any query reconnects and re-issues LISTEN
                match sqlx::query("SELECT 1").execute(&mut listener).await {
                    Ok(_) => {
                        info!("Change listener reconnected, refetching every table");
                        feed.resync();
                        resync = false;
                    }
                    Err(e) => {
                        error!("Change listener reconnect failed: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }

            match listener.try_recv().await {
                Ok(Some(notification)) => match notification.payload().parse::<Change>() {
                    Ok(change) => feed.publish(change),
                    Err(e) => warn!("Ignoring notification: {e}"),
                },
                Ok(None) => {
                    warn!("Change listener lost its connection");
                    resync = true;
                }
                Err(e) => {
                    error!("Change listener error: {e}");
                    resync = true;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }))
}

/// Vote store over the tables and views created by `migrations/`.
///
/// Change notifications come from the table triggers, see [`spawn_change_listener`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteStore for PgStore {
    async fn list_options(&self) -> Result<Vec<VotingOption>, StoreError> {
        let options = sqlx::query_as::<_, VotingOption>(
            "SELECT id, label, color, active, created_at FROM voting_options ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(options)
    }

    async fn latest_message(&self) -> Result<Option<String>, StoreError> {
        let message: Option<(String,)> = sqlx::query_as(
            "SELECT message FROM admin_messages ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(message.map(|(text,)| text))
    }

    async fn cast_vote(
        &self,
        option_id: i64,
        location: &Location,
        demographics: &Demographics,
    ) -> Result<Vote, StoreError> {
        let inserted = sqlx::query_as::<_, Vote>(
            r#"
            INSERT INTO votes (option_id, state, latitude, longitude, age_range, gender)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, option_id, state, latitude, longitude, age_range, gender, created_at
            "#,
        )
        .bind(option_id)
        .bind(&location.state)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(demographics.age_range.as_str())
        .bind(demographics.gender.as_str())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(vote) => Ok(vote),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(StoreError::UnknownOption(option_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn vote_option_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT option_id FROM votes")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(option_id,)| option_id).collect())
    }

    async fn state_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            "SELECT state AS category, label, vote_count FROM state_votes",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn age_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            "SELECT age_range AS category, label, vote_count FROM age_votes",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn gender_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            "SELECT gender AS category, label, vote_count FROM gender_votes",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn vote_locations(&self) -> Result<Vec<VoteLocation>, StoreError> {
        let rows = sqlx::query_as::<_, VoteLocation>(
            r#"
            SELECT v.id, v.option_id, v.latitude, v.longitude, v.state, v.created_at,
                   o.label, o.color
            FROM votes v
            INNER JOIN voting_options o ON o.id = v.option_id
            ORDER BY v.created_at DESC, v.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_message(&self, message: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO admin_messages (message) VALUES ($1)")
            .bind(message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_option(&self, label: &str, color: &str) -> Result<VotingOption, StoreError> {
        let mut tx = self.pool.begin().await?;

        // serializes concurrent adds from every instance until commit
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(OPTION_LIMIT_LOCK)
            .execute(&mut *tx)
            .await?;

        let option = sqlx::query_as::<_, VotingOption>(
            r#"
            INSERT INTO voting_options (label, color, active)
            SELECT $1, $2, TRUE
            WHERE (SELECT count(*) FROM voting_options) < $3
            RETURNING id, label, color, active, created_at
            "#,
        )
        .bind(label)
        .bind(color)
        .bind(MAX_OPTIONS as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(option) = option else {
            return Err(StoreError::OptionLimit(MAX_OPTIONS));
        };
        tx.commit().await?;

        Ok(option)
    }

    async fn delete_option(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM voting_options WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownOption(id));
        }
        Ok(())
    }

    async fn reset_votes(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM votes")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
