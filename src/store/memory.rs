// store/memory.rs
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::VoteStore;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::models::{
    AdminMessage, AggregateRow, Change, ChangeKind, Demographics, Location, Table, Vote,
    VoteLocation, VotingOption, MAX_OPTIONS,
};

#[derive(Default)]
struct Tables {
    options: Vec<VotingOption>,
    votes: Vec<Vote>,
    messages: Vec<AdminMessage>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn label_of(&self, option_id: i64) -> Option<&VotingOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    /// Same shape as the `*_votes` views, grouped in first-seen vote order.
    fn aggregate(&self, category: impl Fn(&Vote) -> &str) -> Vec<AggregateRow> {
        let mut rows: Vec<AggregateRow> = Vec::new();
        for vote in &self.votes {
            let Some(option) = self.label_of(vote.option_id) else {
                continue;
            };
            let key = category(vote);
            match rows
                .iter_mut()
                .find(|row| row.category == key && row.label == option.label)
            {
                Some(row) => row.vote_count += 1,
                None => rows.push(AggregateRow::new(key, option.label.clone(), 1)),
            }
        }
        rows
    }
}

/// Process-local store with the same semantics as the Postgres schema.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            feed,
        }
    }

    pub async fn vote_count(&self) -> usize {
        self.tables.read().await.votes.len()
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn list_options(&self) -> Result<Vec<VotingOption>, StoreError> {
        let mut options = self.tables.read().await.options.clone();
        options.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(options)
    }

    async fn latest_message(&self) -> Result<Option<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|m| m.message.clone()))
    }

    async fn cast_vote(
        &self,
        option_id: i64,
        location: &Location,
        demographics: &Demographics,
    ) -> Result<Vote, StoreError> {
        let vote = {
            let mut tables = self.tables.write().await;
            if tables.label_of(option_id).is_none() {
                return Err(StoreError::UnknownOption(option_id));
            }

            let vote = Vote {
                id: tables.next_id(),
                option_id,
                state: location.state.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                age_range: demographics.age_range.to_string(),
                gender: demographics.gender.to_string(),
                created_at: Utc::now(),
            };
            tables.votes.push(vote.clone());
            vote
        };

        self.feed.publish(Change::new(Table::Votes, ChangeKind::Insert));
        Ok(vote)
    }

    async fn vote_option_ids(&self) -> Result<Vec<i64>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.votes.iter().map(|vote| vote.option_id).collect())
    }

    async fn state_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        Ok(self.tables.read().await.aggregate(|vote| vote.state.as_str()))
    }

    async fn age_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        Ok(self.tables.read().await.aggregate(|vote| vote.age_range.as_str()))
    }

    async fn gender_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        Ok(self.tables.read().await.aggregate(|vote| vote.gender.as_str()))
    }

    async fn vote_locations(&self) -> Result<Vec<VoteLocation>, StoreError> {
        let tables = self.tables.read().await;
        let mut locations: Vec<VoteLocation> = tables
            .votes
            .iter()
            .filter_map(|vote| {
                let option = tables.label_of(vote.option_id)?;
                Some(VoteLocation {
                    id: vote.id,
                    option_id: vote.option_id,
                    latitude: vote.latitude,
                    longitude: vote.longitude,
                    state: vote.state.clone(),
                    created_at: vote.created_at,
                    label: option.label.clone(),
                    color: option.color.clone(),
                })
            })
            .collect();
        locations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(locations)
    }

    async fn insert_message(&self, message: &str) -> Result<(), StoreError> {
        {
            let mut tables = self.tables.write().await;
            let id = tables.next_id();
            tables.messages.push(AdminMessage {
                id,
                message: message.to_string(),
                created_at: Utc::now(),
            });
        }

        self.feed.publish(Change::new(Table::AdminMessages, ChangeKind::Insert));
        Ok(())
    }

    async fn add_option(&self, label: &str, color: &str) -> Result<VotingOption, StoreError> {
        let option = {
            let mut tables = self.tables.write().await;
            if tables.options.len() >= MAX_OPTIONS {
                return Err(StoreError::OptionLimit(MAX_OPTIONS));
            }
            let option = VotingOption {
                id: tables.next_id(),
                label: label.to_string(),
                color: color.to_string(),
                active: true,
                created_at: Utc::now(),
            };
            tables.options.push(option.clone());
            option
        };

        self.feed.publish(Change::new(Table::VotingOptions, ChangeKind::Insert));
        Ok(option)
    }

    async fn delete_option(&self, id: i64) -> Result<(), StoreError> {
        let removed_votes = {
            let mut tables = self.tables.write().await;
            let before = tables.options.len();
            tables.options.retain(|option| option.id != id);
            if tables.options.len() == before {
                return Err(StoreError::UnknownOption(id));
            }

            let votes_before = tables.votes.len();
            tables.votes.retain(|vote| vote.option_id != id);
            votes_before != tables.votes.len()
        };

        self.feed.publish(Change::new(Table::VotingOptions, ChangeKind::Delete));
        if removed_votes {
            self.feed.publish(Change::new(Table::Votes, ChangeKind::Delete));
        }
        Ok(())
    }

    async fn reset_votes(&self) -> Result<u64, StoreError> {
        let removed = {
            let mut tables = self.tables.write().await;
            let removed = tables.votes.len() as u64;
            tables.votes.clear();
            removed
        };

        self.feed.publish(Change::new(Table::Votes, ChangeKind::Delete));
        Ok(removed)
    }
}
