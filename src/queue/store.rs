//! Thread-safe registry of every train.
//!
//! The store is the only writer of car state. Each mutation is described as a
//! journal payload, appended to the journal (when one is attached), and then
//! applied in memory by the same code that replays the journal on restart.
//! Live state and replayed state therefore cannot diverge.
//!
//! Car updates use optimistic locking: callers pass the `lock_version` they
//! read, and the update fails with [`StoreError::StaleObject`] if another
//! writer got there first.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::train::{Placement, TrainQueue};
use crate::persistence::{EventLog, JournalError, StateEventPayload, prepare_file};
use crate::types::{Car, DequeueCause, MergeRequestId, PipelineId, TrainKey, TransitionError};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{merge_request} is already on train {train}")]
    AlreadyOnTrain {
        merge_request: MergeRequestId,
        train: TrainKey,
    },

    #[error("{merge_request} is not on a train")]
    NotOnTrain { merge_request: MergeRequestId },

    /// Another writer updated the car since it was read.
    #[error("stale car {merge_request}: expected lock version {expected}, found {actual}")]
    StaleObject {
        merge_request: MergeRequestId,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Default)]
struct StoreState {
    trains: BTreeMap<TrainKey, TrainQueue>,
    locations: HashMap<MergeRequestId, TrainKey>,
    journal: Option<EventLog>,
}

impl StoreState {
    fn queue(&self, id: MergeRequestId) -> Option<&TrainQueue> {
        self.locations.get(&id).and_then(|key| self.trains.get(key))
    }

    fn car(&self, id: MergeRequestId) -> Option<&Car> {
        self.queue(id).and_then(|queue| queue.get(id))
    }

    /// Journals a payload, then applies it.
    fn commit(&mut self, payload: StateEventPayload) -> Result<()> {
        let seq = match self.journal.as_mut() {
            Some(journal) => journal.append(payload.clone())?.seq,
            None => 0,
        };
        self.apply(seq, payload)?;
        Ok(())
    }

    fn apply(&mut self, seq: u64, payload: StateEventPayload) -> std::result::Result<(), JournalError> {
        match payload {
            StateEventPayload::CarEnqueued { car, position } => {
                let key = car.train_key();
                self.locations.insert(car.merge_request_id, key.clone());
                self.trains.entry(key).or_default().insert_at(position, car);
            }
            StateEventPayload::CarTransitioned { car } | StateEventPayload::CarUpdated { car } => {
                let merge_request = car.merge_request_id;
                let replaced = self
                    .locations
                    .get(&merge_request)
                    .and_then(|key| self.trains.get_mut(key))
                    .is_some_and(|queue| queue.replace(car));
                if !replaced {
                    return Err(JournalError::UnknownCar { seq, merge_request });
                }
            }
            StateEventPayload::CarDequeued {
                train,
                merge_request,
                ..
            } => {
                self.locations.remove(&merge_request);
                if let Some(queue) = self.trains.get_mut(&train) {
                    queue.remove(merge_request);
                    if queue.is_empty() {
                        self.trains.remove(&train);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Registry of all trains.
#[derive(Debug, Default)]
pub struct TrainStore {
    state: RwLock<StoreState>,
}

impl TrainStore {
    /// Creates an in-memory store without a journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the store from a journal and keeps appending to it.
    ///
    /// A missing journal is created; a torn tail is truncated.
    pub fn restore(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        prepare_file(path).map_err(JournalError::from)?;
        let replay = EventLog::replay_from(path, 0)?;

        let mut state = StoreState::default();
        let replayed = replay.events.len();
        for event in replay.events {
            state.apply(event.seq, event.payload)?;
        }
        state.journal = Some(EventLog::open_with_seq(path, replay.next_seq).map_err(JournalError::from)?);

        info!(
            path = %path.display(),
            events = replayed,
            trains = state.trains.len(),
            cars = state.locations.len(),
            "restored train store"
        );
        Ok(TrainStore {
            state: RwLock::new(state),
        })
    }

    /// Adds a car to its train. Returns the stored car.
    pub async fn enqueue(&self, car: Car, placement: Placement) -> Result<Car> {
        let mut state = self.state.write().await;
        let merge_request = car.merge_request_id;
        if let Some(train) = state.locations.get(&merge_request) {
            return Err(StoreError::AlreadyOnTrain {
                merge_request,
                train: train.clone(),
            });
        }

        let key = car.train_key();
        let position = state
            .trains
            .get(&key)
            .map_or(0, |queue| queue.slot_for(placement));
        state.commit(StateEventPayload::CarEnqueued {
            car: car.clone(),
            position,
        })?;

        debug!(merge_request = %merge_request, train = %key, position, ?placement, "car enqueued");
        Ok(car)
    }

    /// Returns the current record of a car.
    pub async fn car(&self, id: MergeRequestId) -> Option<Car> {
        self.state.read().await.car(id).cloned()
    }

    /// Returns the car in front of `id`, or `None` if `id` is the head.
    pub async fn previous(&self, id: MergeRequestId) -> Option<Car> {
        let state = self.state.read().await;
        state.queue(id)?.previous(id).cloned()
    }

    /// Returns the head car of a train.
    pub async fn head(&self, key: &TrainKey) -> Option<Car> {
        let state = self.state.read().await;
        state.trains.get(key)?.head().cloned()
    }

    /// Returns the 0-based index of a car within its train.
    pub async fn position(&self, id: MergeRequestId) -> Option<usize> {
        let state = self.state.read().await;
        state.queue(id)?.index_of(id)
    }

    /// Returns the cars of a train, head first.
    pub async fn cars(&self, key: &TrainKey) -> Vec<Car> {
        let state = self.state.read().await;
        state
            .trains
            .get(key)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the keys of all non-empty trains.
    pub async fn trains(&self) -> Vec<TrainKey> {
        self.state.read().await.trains.keys().cloned().collect()
    }

    /// Finds the car whose current pipeline is `pipeline`.
    pub async fn find_by_pipeline(&self, pipeline: PipelineId) -> Option<Car> {
        let state = self.state.read().await;
        state
            .trains
            .values()
            .flat_map(|queue| queue.iter())
            .find(|car| car.pipeline_id == Some(pipeline))
            .cloned()
    }

    /// Applies a transition to a car if nobody changed it since it was read.
    ///
    /// On success the lock version is bumped and the updated car returned.
    pub async fn update<F>(&self, id: MergeRequestId, expected_lock_version: u64, transition: F) -> Result<Car>
    where
        F: FnOnce(&mut Car) -> std::result::Result<(), TransitionError>,
    {
        let mut state = self.state.write().await;
        let current = state
            .car(id)
            .ok_or(StoreError::NotOnTrain { merge_request: id })?;
        if current.lock_version != expected_lock_version {
            return Err(StoreError::StaleObject {
                merge_request: id,
                expected: expected_lock_version,
                actual: current.lock_version,
            });
        }

        let mut car = current.clone();
        transition(&mut car)?;
        car.lock_version += 1;
        car.updated_at = Utc::now();

        let payload = if car.status != current.status {
            StateEventPayload::CarTransitioned { car: car.clone() }
        } else {
            StateEventPayload::CarUpdated { car: car.clone() }
        };
        state.commit(payload)?;
        Ok(car)
    }

    /// Removes a car from its train. Returns the removed car, or `None` if it
    /// was already gone.
    pub async fn dequeue(&self, id: MergeRequestId, cause: DequeueCause) -> Result<Option<Car>> {
        let mut state = self.state.write().await;
        let Some(car) = state.car(id).cloned() else {
            return Ok(None);
        };
        let train = car.train_key();
        state.commit(StateEventPayload::CarDequeued {
            train: train.clone(),
            merge_request: id,
            cause,
        })?;

        debug!(merge_request = %id, train = %train, ?cause, "car dequeued");
        Ok(Some(car))
    }

    /// Flushes batched journal writes.
    pub async fn sync(&self) -> Result<()> {
        let state = self.state.read().await;
        if let Some(journal) = &state.journal {
            journal.sync().map_err(JournalError::from)?;
        }
        Ok(())
    }
}
