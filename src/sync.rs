//! Live sync: keeps the in-memory poll view current by refetching on table changes.
//!
//! Each watched table gets a channel with the lifecycle
//! `Idle -> Subscribed -> Refreshing -> Subscribed`, ending in `Closed` on
//! teardown. Every refetch is a full re-read, so overlapping refreshes are fine
//! and the last one to finish wins.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::aggregate::{pivot, tally, Dimension, PivotRow};
use crate::feed::{ChangeFeed, Subscription};
use crate::models::{Table, VoteLocation, VotingOption};
use crate::store::VoteStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollSnapshot {
    pub options: Vec<VotingOption>,
    pub message: String,
    pub tally: BTreeMap<i64, u64>,
    pub by_state: Vec<PivotRow>,
    pub by_age: Vec<PivotRow>,
    pub by_gender: Vec<PivotRow>,
    pub locations: Vec<VoteLocation>,
}

/// Shared, observable poll state. Each setter replaces only its own view.
#[derive(Clone)]
pub struct PollView {
    state: Arc<watch::Sender<PollSnapshot>>,
}

impl PollView {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PollSnapshot::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.state.subscribe()
    }

    pub fn option_count(&self) -> usize {
        self.state.borrow().options.len()
    }

    pub fn count_for(&self, option_id: i64) -> u64 {
        self.state.borrow().tally.get(&option_id).copied().unwrap_or(0)
    }

    pub fn set_options(&self, options: Vec<VotingOption>) {
        self.state.send_modify(|snapshot| snapshot.options = options);
    }

    pub fn set_message(&self, message: String) {
        self.state.send_modify(|snapshot| snapshot.message = message);
    }

    pub fn set_tally(&self, counts: BTreeMap<i64, u64>) {
        self.state.send_modify(|snapshot| snapshot.tally = counts);
    }

    pub fn set_by_state(&self, rows: Vec<PivotRow>) {
        self.state.send_modify(|snapshot| snapshot.by_state = rows);
    }

    pub fn set_demographics(&self, by_age: Vec<PivotRow>, by_gender: Vec<PivotRow>) {
        self.state.send_modify(|snapshot| {
            snapshot.by_age = by_age;
            snapshot.by_gender = by_gender;
        });
    }

    pub fn set_locations(&self, locations: Vec<VoteLocation>) {
        self.state.send_modify(|snapshot| snapshot.locations = locations);
    }
}

impl Default for PollView {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn refresh_options(store: &dyn VoteStore, view: &PollView) {
    match store.list_options().await {
        Ok(options) => view.set_options(options),
        Err(e) => error!("Error fetching options: {e}"),
    }
}

pub async fn refresh_message(store: &dyn VoteStore, view: &PollView) {
    match store.latest_message().await {
        Ok(message) => view.set_message(message.unwrap_or_default()),
        Err(e) => error!("Error fetching admin message: {e}"),
    }
}

pub async fn refresh_tally(store: &dyn VoteStore, view: &PollView) {
    match store.vote_option_ids().await {
        Ok(option_ids) => view.set_tally(tally(&option_ids)),
        Err(e) => error!("Error fetching vote counts: {e}"),
    }
}

pub async fn refresh_state_votes(store: &dyn VoteStore, view: &PollView) {
    match store.state_votes().await {
        Ok(rows) => view.set_by_state(pivot(Dimension::State, &rows)),
        Err(e) => error!("Error fetching state votes: {e}"),
    }
}

/// Age and gender are fetched together and only applied if both succeed.
pub async fn refresh_demographic_votes(store: &dyn VoteStore, view: &PollView) {
    match tokio::try_join!(store.age_votes(), store.gender_votes()) {
        Ok((age, gender)) => view.set_demographics(
            pivot(Dimension::AgeRange, &age),
            pivot(Dimension::Gender, &gender),
        ),
        Err(e) => error!("Error fetching demographic votes: {e}"),
    }
}

pub async fn refresh_locations(store: &dyn VoteStore, view: &PollView) {
    match store.vote_locations().await {
        Ok(locations) => view.set_locations(locations),
        Err(e) => error!("Error fetching vote locations: {e}"),
    }
}

/// Refetches everything that depends on `table`.
pub async fn refresh_table(store: &dyn VoteStore, view: &PollView, table: Table) {
    match table {
        Table::Votes => {
            tokio::join!(
                refresh_tally(store, view),
                refresh_state_votes(store, view),
                refresh_demographic_votes(store, view),
                refresh_locations(store, view),
            );
        }
        Table::VotingOptions => refresh_options(store, view).await,
        Table::AdminMessages => refresh_message(store, view).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Idle,
    Subscribed,
    Refreshing,
    Closed,
}

#[derive(Default)]
struct ChannelStatus {
    subscribed: AtomicBool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

impl ChannelStatus {
    fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::SeqCst) {
            ChannelState::Closed
        } else if !self.subscribed.load(Ordering::SeqCst) {
            ChannelState::Idle
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            ChannelState::Refreshing
        } else {
            ChannelState::Subscribed
        }
    }
}

/// Counts one refetch in flight. Aborted refetches are uncounted on drop.
struct Refreshing<'a>(&'a ChannelStatus);

impl<'a> Refreshing<'a> {
    fn enter(status: &'a ChannelStatus) -> Self {
        status.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(status)
    }
}

impl Drop for Refreshing<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Channel {
    table: Table,
    status: Arc<ChannelStatus>,
    subscription: Option<Subscription>,
}

pub const WATCHED_TABLES: [Table; 3] = Table::ALL;

pub struct LiveSync {
    store: Arc<dyn VoteStore>,
    view: PollView,
    feed: ChangeFeed,
    channels: Mutex<Vec<Channel>>,
}

impl LiveSync {
    pub fn new(store: Arc<dyn VoteStore>, view: PollView, feed: ChangeFeed) -> Self {
        let channels = WATCHED_TABLES
            .into_iter()
            .map(|table| Channel {
                table,
                status: Arc::new(ChannelStatus::default()),
                subscription: None,
            })
            .collect();

        Self {
            store,
            view,
            feed,
            channels: Mutex::new(channels),
        }
    }

    pub fn view(&self) -> &PollView {
        &self.view
    }

    /// Initial load of every view.
    pub async fn refresh_all(&self) {
        let store = self.store.as_ref();
        tokio::join!(
            refresh_options(store, &self.view),
            refresh_message(store, &self.view),
            refresh_table(store, &self.view, Table::Votes),
        );
    }

    /// Opens a subscription for every idle channel. Closed channels stay closed.
    pub fn start(&self) {
        let mut channels = self.lock_channels();
        for channel in channels.iter_mut() {
            if channel.status.state() != ChannelState::Idle {
                continue;
            }

            let store = self.store.clone();
            let view = self.view.clone();
            let status = channel.status.clone();
            let table = channel.table;

            channel.subscription = Some(self.feed.subscribe(table, move |_change| {
                let store = store.clone();
                let view = view.clone();
                let status = status.clone();
                async move {
                    if status.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let _refreshing = Refreshing::enter(&status);
                    refresh_table(store.as_ref(), &view, table).await;
                }
            }));
            channel.status.subscribed.store(true, Ordering::SeqCst);
            info!("Live sync subscribed to {}", table.as_str());
        }
    }

    pub fn state(&self, table: Table) -> ChannelState {
        self.lock_channels()
            .iter()
            .find(|channel| channel.table == table)
            .map(|channel| channel.status.state())
            .unwrap_or(ChannelState::Closed)
    }

    /// Unsubscribes every channel. Idempotent.
    pub fn teardown(&self) {
        let mut channels = self.lock_channels();
        for channel in channels.iter_mut() {
            channel.status.closed.store(true, Ordering::SeqCst);
            if let Some(subscription) = channel.subscription.take() {
                subscription.cancel();
            }
        }
        info!("Live sync torn down");
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, Vec<Channel>> {
        // a poisoned lock only means a panic elsewhere, the channel list itself stays valid
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.teardown();
    }
}
