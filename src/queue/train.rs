//! The ordered queue of one train.
//!
//! Cars are keyed by a signed position. Tail insertion takes `max + 1`, head
//! insertion takes `min - 1`, and removal never renumbers, so the relative
//! order of cars that stay on the train never changes.
//!
//! The one exception to `min - 1` is a head insertion while the front car is
//! merging: the new car goes directly behind the merging car(s) instead of in
//! front of them. If that slot is taken, the cars from that slot backwards
//! shift by one. Their relative order is preserved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Car, CarStatus, MergeRequestId};

/// Where a new car joins its train.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Behind every car already on the train.
    #[default]
    Tail,
    /// In front of every car that is not already merging.
    Head,
}

/// One train: cars ordered by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainQueue {
    cars: BTreeMap<i64, Car>,
}

impl TrainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    /// Returns the position a new car with this placement would take.
    pub fn slot_for(&self, placement: Placement) -> i64 {
        match placement {
            Placement::Tail => self.cars.keys().next_back().map_or(0, |max| max + 1),
            Placement::Head => {
                let behind_merging = self
                    .cars
                    .iter()
                    .take_while(|(_, car)| is_pinned(car))
                    .last()
                    .map(|(position, _)| position + 1);
                behind_merging.unwrap_or_else(|| self.cars.keys().next().map_or(0, |min| min - 1))
            }
        }
    }

    /// Inserts a car at `position`, shifting occupied slots backwards.
    pub fn insert_at(&mut self, position: i64, car: Car) {
        if self.cars.contains_key(&position) {
            let shifted: Vec<i64> = self.cars.range(position..).map(|(p, _)| *p).collect();
            for old in shifted.into_iter().rev() {
                if let Some(moved) = self.cars.remove(&old) {
                    self.cars.insert(old + 1, moved);
                }
            }
        }
        self.cars.insert(position, car);
    }

    /// Replaces the stored record of a car. Returns false if it is not queued.
    pub fn replace(&mut self, car: Car) -> bool {
        match self.position_of(car.merge_request_id) {
            Some(position) => {
                self.cars.insert(position, car);
                true
            }
            None => false,
        }
    }

    /// Removes a car, returning it if it was queued.
    pub fn remove(&mut self, id: MergeRequestId) -> Option<Car> {
        let position = self.position_of(id)?;
        self.cars.remove(&position)
    }

    pub fn get(&self, id: MergeRequestId) -> Option<&Car> {
        self.cars.values().find(|car| car.merge_request_id == id)
    }

    /// Returns the raw position key of a car.
    pub fn position_of(&self, id: MergeRequestId) -> Option<i64> {
        self.cars
            .iter()
            .find(|(_, car)| car.merge_request_id == id)
            .map(|(position, _)| *position)
    }

    /// Returns the 0-based index of a car in train order.
    pub fn index_of(&self, id: MergeRequestId) -> Option<usize> {
        self.cars
            .values()
            .position(|car| car.merge_request_id == id)
    }

    pub fn head(&self) -> Option<&Car> {
        self.cars.values().next()
    }

    /// Returns the car directly in front of `id`, or `None` for the head.
    pub fn previous(&self, id: MergeRequestId) -> Option<&Car> {
        let position = self.position_of(id)?;
        self.cars.range(..position).next_back().map(|(_, car)| car)
    }

    /// Iterates cars head first.
    pub fn iter(&self) -> impl Iterator<Item = &Car> {
        self.cars.values()
    }
}

fn is_pinned(car: &Car) -> bool {
    matches!(car.status, CarStatus::Merging | CarStatus::Merged)
}
