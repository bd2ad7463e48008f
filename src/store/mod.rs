//! Access to the four logical tables (options, votes, messages, aggregate views).
//!
//! [`VoteStore`] is the seam between the poll logic and the storage backend.
//! [`PgStore`] talks to PostgreSQL, where table triggers announce changes that
//! [`spawn_change_listener`] forwards into the [`ChangeFeed`](crate::feed::ChangeFeed).
//! [`MemoryStore`] keeps everything in process and publishes to the feed itself.
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    AggregateRow, Demographics, Location, Vote, VoteLocation, VotingOption,
};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::{create_pool, spawn_change_listener, PgStore};

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Ordered by creation time, oldest first.
    async fn list_options(&self) -> Result<Vec<VotingOption>, StoreError>;

    /// Text of the most recent admin message, if any.
    async fn latest_message(&self) -> Result<Option<String>, StoreError>;

    async fn cast_vote(
        &self,
        option_id: i64,
        location: &Location,
        demographics: &Demographics,
    ) -> Result<Vote, StoreError>;

    /// Option id of every vote row.
    async fn vote_option_ids(&self) -> Result<Vec<i64>, StoreError>;

    async fn state_votes(&self) -> Result<Vec<AggregateRow>, StoreError>;

    async fn age_votes(&self) -> Result<Vec<AggregateRow>, StoreError>;

    async fn gender_votes(&self) -> Result<Vec<AggregateRow>, StoreError>;

    /// Newest first.
    async fn vote_locations(&self) -> Result<Vec<VoteLocation>, StoreError>;

    async fn insert_message(&self, message: &str) -> Result<(), StoreError>;

    /// Refused with [`StoreError::OptionLimit`] once [`MAX_OPTIONS`](crate::models::MAX_OPTIONS) options exist.
    async fn add_option(&self, label: &str, color: &str) -> Result<VotingOption, StoreError>;

    /// Also removes the option's votes.
    async fn delete_option(&self, id: i64) -> Result<(), StoreError>;

    /// Removes every vote, returning how many were deleted.
    async fn reset_votes(&self) -> Result<u64, StoreError>;
}
