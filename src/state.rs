// state.rs
use std::sync::Arc;

use chrono::Duration;

use crate::admin::{AdminConsole, SessionStore};
use crate::client::Poll;
use crate::config::Config;
use crate::feed::ChangeFeed;
use crate::geo::GeoResolver;
use crate::store::{MemoryStore, VoteStore};
use crate::sync::{LiveSync, PollView};

#[derive(Clone)]
pub struct AppState {
    pub poll: Poll,
    pub admin: AdminConsole,
    pub sessions: SessionStore,
    pub sync: Arc<LiveSync>,
}

impl AppState {
    /// Wires the store into the view and opens the live-sync channels.
    pub fn new(
        config: &Config,
        store: Arc<dyn VoteStore>,
        feed: ChangeFeed,
        resolver: GeoResolver,
    ) -> Self {
        let view = PollView::new();
        let sync = Arc::new(LiveSync::new(store.clone(), view.clone(), feed));
        sync.start();

        Self {
            poll: Poll::new(store.clone(), resolver, view.clone()),
            admin: AdminConsole::new(store, view),
            sessions: SessionStore::new(
                config.admin_email.clone(),
                config.admin_password.clone(),
                Duration::minutes(config.admin_session_ttl_minutes),
            ),
            sync,
        }
    }

    /// Database-free state over a [`MemoryStore`].
    pub fn in_memory(config: &Config, resolver: GeoResolver) -> Self {
        let feed = ChangeFeed::new();
        let store = Arc::new(MemoryStore::new(feed.clone()));
        Self::new(config, store, feed, resolver)
    }
}
