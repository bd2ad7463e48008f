// client.rs
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::demographics::DemographicsStore;
use crate::error::PollError;
use crate::geo::GeoResolver;
use crate::models::{AgeRange, Demographics, Gender, Vote};
use crate::store::VoteStore;
use crate::sync::{refresh_tally, PollView};

/// Vote submission pipeline: geolocate, write one row, re-read the tally.
///
/// The view is shared by every client, so the new vote shows up through a
/// fresh count of the vote rows rather than a local increment that a
/// concurrent refetch could double.
#[derive(Clone)]
pub struct Poll {
    store: Arc<dyn VoteStore>,
    resolver: GeoResolver,
    view: PollView,
}

impl Poll {
    pub fn new(store: Arc<dyn VoteStore>, resolver: GeoResolver, view: PollView) -> Self {
        Self {
            store,
            resolver,
            view,
        }
    }

    pub fn store(&self) -> &Arc<dyn VoteStore> {
        &self.store
    }

    pub fn view(&self) -> &PollView {
        &self.view
    }

    pub async fn cast_vote(
        &self,
        option_id: i64,
        demographics: Option<Demographics>,
        client_ip: Option<IpAddr>,
    ) -> Result<Vote, PollError> {
        let demographics = demographics.ok_or(PollError::DemographicsRequired)?;

        let location = self.resolver.resolve(client_ip).await;
        let vote = self
            .store
            .cast_vote(option_id, &location, &demographics)
            .await
            .map_err(|e| {
                error!("Error recording vote: {e}");
                PollError::from(e)
            })?;

        refresh_tally(self.store.as_ref(), &self.view).await;
        info!("Vote recorded for option {option_id} from {}", location.state);
        Ok(vote)
    }
}

/// One device's view of the poll: demographics captured once, one submission at a time.
pub struct PollClient {
    poll: Poll,
    storage: DemographicsStore,
    demographics: Option<Demographics>,
    voting: AtomicBool,
}

impl PollClient {
    /// Loads any previously captured demographics from `storage`.
    pub fn new(poll: Poll, storage: DemographicsStore) -> Self {
        let demographics = storage.load();
        Self {
            poll,
            storage,
            demographics,
            voting: AtomicBool::new(false),
        }
    }

    pub fn needs_demographics(&self) -> bool {
        self.demographics.is_none()
    }

    pub fn demographics(&self) -> Option<Demographics> {
        self.demographics
    }

    pub fn submit_demographics(
        &mut self,
        age_range: AgeRange,
        gender: Gender,
    ) -> Result<Demographics, PollError> {
        let demographics = self.storage.submit(age_range, gender)?;
        self.demographics = Some(demographics);
        Ok(demographics)
    }

    /// Whether the vote buttons should be disabled.
    pub fn is_voting(&self) -> bool {
        self.voting.load(Ordering::SeqCst)
    }

    pub fn count_for(&self, option_id: i64) -> u64 {
        self.poll.view().count_for(option_id)
    }

    pub async fn vote(&self, option_id: i64) -> Result<Vote, PollError> {
        let Some(demographics) = self.demographics else {
            return Err(PollError::DemographicsRequired);
        };

        if self.voting.swap(true, Ordering::SeqCst) {
            return Err(PollError::VoteInProgress);
        }
        let _in_flight = InFlight(&self.voting);

        self.poll.cast_vote(option_id, Some(demographics), None).await
    }
}

/// Clears the in-flight flag even if the vote future is dropped early.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
