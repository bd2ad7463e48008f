use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use live_poll::{
    admin::{AdminAction, AdminConsole, AdminOutcome, Session, SessionStore, COLOR_PALETTE},
    aggregate::tally,
    client::{Poll, PollClient},
    demographics::DemographicsStore,
    error::{PollError, StoreError},
    feed::ChangeFeed,
    geo::{GeoResolver, FALLBACK_LOCATIONS},
    models::{
        AggregateRow, AgeRange, Demographics, Gender, Location, Table, Vote, VoteLocation,
        VotingOption, MAX_OPTIONS,
    },
    store::{MemoryStore, VoteStore},
    sync::{ChannelState, LiveSync, PollView},
};
use uuid::Uuid;

/// Wraps the memory store and counts every call that reaches it.
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn new(feed: ChangeFeed) -> Self {
        Self {
            inner: MemoryStore::new(feed),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoteStore for CountingStore {
    async fn list_options(&self) -> Result<Vec<VotingOption>, StoreError> {
        self.hit();
        self.inner.list_options().await
    }

    async fn latest_message(&self) -> Result<Option<String>, StoreError> {
        self.hit();
        self.inner.latest_message().await
    }

    async fn cast_vote(
        &self,
        option_id: i64,
        location: &Location,
        demographics: &Demographics,
    ) -> Result<Vote, StoreError> {
        self.hit();
        self.inner.cast_vote(option_id, location, demographics).await
    }

    async fn vote_option_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.hit();
        self.inner.vote_option_ids().await
    }

    async fn state_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.hit();
        self.inner.state_votes().await
    }

    async fn age_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.hit();
        self.inner.age_votes().await
    }

    async fn gender_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.hit();
        self.inner.gender_votes().await
    }

    async fn vote_locations(&self) -> Result<Vec<VoteLocation>, StoreError> {
        self.hit();
        self.inner.vote_locations().await
    }

    async fn insert_message(&self, message: &str) -> Result<(), StoreError> {
        self.hit();
        self.inner.insert_message(message).await
    }

    async fn add_option(&self, label: &str, color: &str) -> Result<VotingOption, StoreError> {
        self.hit();
        self.inner.add_option(label, color).await
    }

    async fn delete_option(&self, id: i64) -> Result<(), StoreError> {
        self.hit();
        self.inner.delete_option(id).await
    }

    async fn reset_votes(&self) -> Result<u64, StoreError> {
        self.hit();
        self.inner.reset_votes().await
    }
}

/// Memory store whose vote write, option insert and message read take `delay`.
/// The vote row is committed before the delay, the option only after it.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    fn new(feed: ChangeFeed, delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(feed),
            delay,
        }
    }
}

#[async_trait]
impl VoteStore for SlowStore {
    async fn list_options(&self) -> Result<Vec<VotingOption>, StoreError> {
        self.inner.list_options().await
    }

    async fn latest_message(&self) -> Result<Option<String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.latest_message().await
    }

    async fn cast_vote(
        &self,
        option_id: i64,
        location: &Location,
        demographics: &Demographics,
    ) -> Result<Vote, StoreError> {
        let vote = self.inner.cast_vote(option_id, location, demographics).await?;
        tokio::time::sleep(self.delay).await;
        Ok(vote)
    }

    async fn vote_option_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.inner.vote_option_ids().await
    }

    async fn state_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.inner.state_votes().await
    }

    async fn age_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.inner.age_votes().await
    }

    async fn gender_votes(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.inner.gender_votes().await
    }

    async fn vote_locations(&self) -> Result<Vec<VoteLocation>, StoreError> {
        self.inner.vote_locations().await
    }

    async fn insert_message(&self, message: &str) -> Result<(), StoreError> {
        self.inner.insert_message(message).await
    }

    async fn add_option(&self, label: &str, color: &str) -> Result<VotingOption, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.add_option(label, color).await
    }

    async fn delete_option(&self, id: i64) -> Result<(), StoreError> {
        self.inner.delete_option(id).await
    }

    async fn reset_votes(&self) -> Result<u64, StoreError> {
        self.inner.reset_votes().await
    }
}

fn admin_session() -> Session {
    Session {
        token: Uuid::new_v4(),
        email: "admin@poll.test".to_string(),
        expires_at: Utc::now() + chrono::Duration::minutes(10),
    }
}

async fn seeded_store(labels: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(ChangeFeed::new()));
    for (label, color) in labels.iter().zip(COLOR_PALETTE) {
        store.add_option(label, color).await.unwrap();
    }
    store
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn voting_requires_captured_demographics() {
    let store = seeded_store(&["Yes", "No", "Maybe"]).await;
    let view = PollView::new();
    let poll = Poll::new(store.clone(), GeoResolver::new(Vec::new()), view.clone());
    let dir = tempfile::tempdir().unwrap();
    let mut client = PollClient::new(poll, DemographicsStore::new(dir.path()));

    assert!(client.needs_demographics());
    assert!(matches!(client.vote(3).await, Err(PollError::DemographicsRequired)));
    assert_eq!(store.vote_count().await, 0);

    client
        .submit_demographics("25-34".parse().unwrap(), "Female".parse().unwrap())
        .unwrap();
    assert!(!client.needs_demographics());

    let before = client.count_for(3);
    let vote = client.vote(3).await.unwrap();
    assert_eq!(client.count_for(3), before + 1);
    assert_eq!(vote.option_id, 3);
    assert_eq!(vote.age_range, "25-34");
    assert_eq!(vote.gender, "Female");
    assert!(!client.is_voting());

    let location = Location::new(&vote.state, vote.latitude, vote.longitude);
    assert!(FALLBACK_LOCATIONS
        .iter()
        .any(|(state, lat, lon)| location == Location::new(state, *lat, *lon)));
}

#[tokio::test]
async fn captured_demographics_are_reused_on_next_load() {
    let store = seeded_store(&["Yes"]).await;
    let dir = tempfile::tempdir().unwrap();
    DemographicsStore::new(dir.path())
        .submit(AgeRange::From45To54, Gender::Male)
        .unwrap();

    let poll = Poll::new(store, GeoResolver::new(Vec::new()), PollView::new());
    let client = PollClient::new(poll, DemographicsStore::new(dir.path()));

    assert!(!client.needs_demographics());
    assert_eq!(
        client.demographics(),
        Some(Demographics {
            age_range: AgeRange::From45To54,
            gender: Gender::Male,
        })
    );
    assert!(client.vote(1).await.is_ok());
}

#[tokio::test]
async fn failed_vote_leaves_tally_untouched() {
    let store = seeded_store(&["Yes"]).await;
    let view = PollView::new();
    let poll = Poll::new(store, GeoResolver::new(Vec::new()), view.clone());
    let demographics = Demographics {
        age_range: AgeRange::From18To24,
        gender: Gender::Other,
    };

    let result = poll.cast_vote(99, Some(demographics), None).await;
    assert!(matches!(
        result,
        Err(PollError::Network(StoreError::UnknownOption(99)))
    ));
    assert_eq!(view.count_for(99), 0);
}

#[tokio::test]
async fn sixteenth_option_is_refused_without_store_call() {
    let store = Arc::new(CountingStore::new(ChangeFeed::new()));
    let view = PollView::new();
    let admin = AdminConsole::new(store.clone(), view.clone());
    let session = admin_session();

    for i in 0..MAX_OPTIONS {
        admin
            .mutate(Some(&session), AdminAction::AddOption(format!("Option {i}")))
            .await
            .unwrap();
    }
    assert_eq!(view.option_count(), MAX_OPTIONS);

    let colors: Vec<String> = view.snapshot().options.into_iter().map(|o| o.color).collect();
    for color in COLOR_PALETTE {
        assert!(colors.iter().any(|c| c == color));
    }

    let calls = store.calls();
    let result = admin
        .mutate(Some(&session), AdminAction::AddOption("Option 16".to_string()))
        .await;
    assert!(matches!(result, Err(PollError::OptionLimit(15))));
    assert_eq!(store.calls(), calls);
}

#[tokio::test]
async fn admin_mutations_without_session_never_reach_the_store() {
    let feed = ChangeFeed::new();
    let store = Arc::new(CountingStore::new(feed));
    let admin = AdminConsole::new(store.clone(), PollView::new());

    let actions = [
        AdminAction::UpdateMessage("Polls close at noon".to_string()),
        AdminAction::AddOption("Yes".to_string()),
        AdminAction::DeleteOption { id: 1, confirmed: true },
        AdminAction::ResetVotes { confirmed: true },
    ];

    for action in actions {
        let result = admin.mutate(None, action).await;
        assert!(matches!(result, Err(PollError::AuthRequired)));
    }

    let expired = Session {
        expires_at: Utc::now() - chrono::Duration::seconds(1),
        ..admin_session()
    };
    let result = admin
        .mutate(Some(&expired), AdminAction::ResetVotes { confirmed: true })
        .await;
    assert!(matches!(result, Err(PollError::AuthRequired)));
    assert!(admin.open(None).is_err());

    assert_eq!(store.calls(), 0);
    assert_eq!(store.inner.message_count().await, 0);
}

#[tokio::test]
async fn destructive_actions_need_confirmation() {
    let store = seeded_store(&["Yes", "No"]).await;
    let admin = AdminConsole::new(store.clone(), PollView::new());
    let session = admin_session();
    let demographics = Demographics {
        age_range: AgeRange::From35To44,
        gender: Gender::Female,
    };
    let ohio = Location::new("Ohio", 40.0, -82.0);
    store.cast_vote(1, &ohio, &demographics).await.unwrap();
    store.cast_vote(2, &ohio, &demographics).await.unwrap();

    let unconfirmed = admin
        .mutate(Some(&session), AdminAction::DeleteOption { id: 1, confirmed: false })
        .await;
    assert!(matches!(unconfirmed, Err(PollError::ConfirmationRequired)));
    assert_eq!(store.vote_count().await, 2);

    let deleted = admin
        .mutate(Some(&session), AdminAction::DeleteOption { id: 1, confirmed: true })
        .await
        .unwrap();
    assert_eq!(deleted, AdminOutcome::OptionDeleted { id: 1 });
    assert_eq!(store.vote_count().await, 1);

    let reset = admin
        .mutate(Some(&session), AdminAction::ResetVotes { confirmed: true })
        .await
        .unwrap();
    assert_eq!(reset, AdminOutcome::ReloadRequired { removed: 1 });
    assert_eq!(store.vote_count().await, 0);
}

#[tokio::test]
async fn empty_admin_input_is_blocked() {
    let store = Arc::new(CountingStore::new(ChangeFeed::new()));
    let admin = AdminConsole::new(store.clone(), PollView::new());
    let session = admin_session();

    let result = admin
        .mutate(Some(&session), AdminAction::UpdateMessage("   ".to_string()))
        .await;
    assert!(matches!(result, Err(PollError::Validation(_))));

    let result = admin
        .mutate(Some(&session), AdminAction::AddOption(String::new()))
        .await;
    assert!(matches!(result, Err(PollError::Validation(_))));
    assert_eq!(store.calls(), 0);

    let updated = admin
        .mutate(Some(&session), AdminAction::UpdateMessage("  Vote now!  ".to_string()))
        .await
        .unwrap();
    assert_eq!(
        updated,
        AdminOutcome::MessageUpdated {
            message: "Vote now!".to_string()
        }
    );
    assert_eq!(store.inner.latest_message().await.unwrap().as_deref(), Some("Vote now!"));
}

#[tokio::test]
async fn session_store_issues_usable_sessions() {
    let sessions = SessionStore::new("admin@poll.test", Some("secret".into()), chrono::Duration::minutes(5));
    let store = seeded_store(&[]).await;
    let admin = AdminConsole::new(store, PollView::new());

    let session = sessions.sign_in("admin@poll.test", "secret").await.unwrap();
    let found = sessions.get_session(session.token).await;
    assert!(admin.open(found.as_ref()).is_ok());

    sessions.sign_out(session.token).await;
    let found = sessions.get_session(session.token).await;
    assert!(matches!(admin.open(found.as_ref()), Err(PollError::AuthRequired)));
}

#[tokio::test]
async fn live_sync_refetches_on_every_change() {
    let feed = ChangeFeed::new();
    let store = Arc::new(MemoryStore::new(feed.clone()));
    let view = PollView::new();
    let sync = LiveSync::new(store.clone(), view.clone(), feed);

    for table in [Table::Votes, Table::VotingOptions, Table::AdminMessages] {
        assert_eq!(sync.state(table), ChannelState::Idle);
    }
    sync.start();
    for table in [Table::Votes, Table::VotingOptions, Table::AdminMessages] {
        assert_eq!(sync.state(table), ChannelState::Subscribed);
    }

    let yes = store.add_option("Yes", "#FF6B6B").await.unwrap();
    wait_for(|| view.option_count() == 1).await;

    store.insert_message("Results are live").await.unwrap();
    wait_for(|| view.snapshot().message == "Results are live").await;

    let demographics = Demographics {
        age_range: AgeRange::From25To34,
        gender: Gender::Female,
    };
    for state in ["Texas", "texas", "Texas"] {
        store
            .cast_vote(yes.id, &Location::new(state, 31.0, -99.0), &demographics)
            .await
            .unwrap();
    }

    wait_for(|| view.count_for(yes.id) == 3 && view.snapshot().locations.len() == 3).await;
    wait_for(|| view.snapshot().by_state.len() == 2).await;
    let snapshot = view.snapshot();
    assert_eq!(snapshot.by_state[0].category, "Texas");
    assert_eq!(snapshot.by_state[0].count("Yes"), Some(2));
    assert_eq!(snapshot.by_state[1].category, "texas");
    assert_eq!(snapshot.by_age[0].count("Yes"), Some(3));
    assert_eq!(snapshot.by_gender[0].category, "Female");

    wait_for(|| sync.state(Table::Votes) == ChannelState::Subscribed).await;
    sync.teardown();
    sync.teardown();
    assert_eq!(sync.state(Table::Votes), ChannelState::Closed);

    store.insert_message("After teardown").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(view.snapshot().message, "Results are live");
}

#[tokio::test]
async fn refresh_recomputes_tally_from_scratch() {
    let feed = ChangeFeed::new();
    let store = Arc::new(MemoryStore::new(feed.clone()));
    let yes = store.add_option("Yes", "#FF6B6B").await.unwrap();
    let view = PollView::new();
    let sync = LiveSync::new(store.clone(), view.clone(), feed);

    let poll = Poll::new(store.clone(), GeoResolver::new(Vec::new()), view.clone());
    let demographics = Demographics {
        age_range: AgeRange::Over65,
        gender: Gender::Male,
    };
    poll.cast_vote(yes.id, Some(demographics), None).await.unwrap();
    assert_eq!(view.count_for(yes.id), 1);

    view.set_tally(tally(&[yes.id, yes.id, yes.id]));
    sync.refresh_all().await;
    assert_eq!(view.count_for(yes.id), 1);
    assert_eq!(view.snapshot().options.len(), 1);
}

#[tokio::test]
async fn vote_racing_a_refetch_is_counted_once() {
    let feed = ChangeFeed::new();
    let store = Arc::new(SlowStore::new(feed.clone(), Duration::from_millis(50)));
    let yes = store.add_option("Yes", "#FF6B6B").await.unwrap();
    let view = PollView::new();
    let sync = LiveSync::new(store.clone(), view.clone(), feed);
    sync.refresh_all().await;
    sync.start();

    let poll = Poll::new(store.clone(), GeoResolver::new(Vec::new()), view.clone());
    let demographics = Demographics {
        age_range: AgeRange::From18To24,
        gender: Gender::Male,
    };
    poll.cast_vote(yes.id, Some(demographics), None).await.unwrap();
    assert_eq!(view.count_for(yes.id), 1);

    wait_for(|| sync.state(Table::Votes) == ChannelState::Subscribed).await;
    assert_eq!(store.inner.vote_count().await, 1);
    assert_eq!(view.count_for(yes.id), 1);
    sync.teardown();
}

#[tokio::test]
async fn concurrent_adds_respect_the_option_cap() {
    let store = Arc::new(SlowStore::new(ChangeFeed::new(), Duration::from_millis(20)));
    let view = PollView::new();
    let admin = AdminConsole::new(store.clone(), view.clone());
    let session = admin_session();

    for i in 0..MAX_OPTIONS - 1 {
        admin
            .mutate(Some(&session), AdminAction::AddOption(format!("Option {i}")))
            .await
            .unwrap();
    }

    let (first, second) = tokio::join!(
        admin.mutate(Some(&session), AdminAction::AddOption("Left".to_string())),
        admin.mutate(Some(&session), AdminAction::AddOption("Right".to_string())),
    );
    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(
        first.err().or(second.err()),
        Some(PollError::OptionLimit(15))
    ));
    assert_eq!(store.list_options().await.unwrap().len(), MAX_OPTIONS);
    assert_eq!(view.option_count(), MAX_OPTIONS);
}

#[tokio::test]
async fn option_cap_holds_when_the_view_never_loaded() {
    let store = seeded_store(&COLOR_PALETTE).await;
    let admin = AdminConsole::new(store.clone(), PollView::new());

    let result = admin
        .mutate(Some(&admin_session()), AdminAction::AddOption("Extra".to_string()))
        .await;
    assert!(matches!(result, Err(PollError::OptionLimit(15))));
    assert_eq!(store.list_options().await.unwrap().len(), MAX_OPTIONS);
}

#[tokio::test]
async fn teardown_stops_refetches_in_flight() {
    let feed = ChangeFeed::new();
    let store = Arc::new(SlowStore::new(feed.clone(), Duration::from_millis(30)));
    let view = PollView::new();
    let sync = LiveSync::new(store.clone(), view.clone(), feed);
    sync.start();

    store.insert_message("late").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(sync.state(Table::AdminMessages), ChannelState::Refreshing);

    sync.teardown();
    assert_eq!(view.snapshot().message, "");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(view.snapshot().message, "");
    assert_eq!(sync.state(Table::AdminMessages), ChannelState::Closed);
}
