// nowcast_core/src/data/mod.rs

//! The per-run dataset: sensor readings keyed by (region, epiweek, sensor)
//! and the retrospectively finalized ground truth.
//!
//! Absence is represented by a missing entry, never by a sentinel number.
//! Readings may be revised after publication; every revision carries the
//! epiweek it was issued so that a backtest only ever sees what was known at
//! the simulated time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::epiweek::Epiweek;
use crate::types::{Region, SensorId};

/// One published value of a sensor cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Revision {
    pub issued: Epiweek,
    pub value: f64,
}

/// Immutable once built; shared read-only across all filter runs.
#[derive(Debug, Clone, Default)]
pub struct SensorTable {
    /// Revisions per cell, sorted by issue week.
    readings: HashMap<Region, HashMap<SensorId, BTreeMap<Epiweek, Vec<Revision>>>>,
    truth: HashMap<Region, BTreeMap<Epiweek, f64>>,
}

impl SensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading published in the same week it describes.
    pub fn insert_reading(&mut self, region: Region, sensor: SensorId, epiweek: Epiweek, value: f64) {
        self.insert_revision(region, sensor, epiweek, epiweek, value);
    }

    /// Records a reading for `epiweek` that became known in week `issued`.
    /// A later call with the same issue week replaces the earlier value.
    pub fn insert_revision(
        &mut self,
        region: Region,
        sensor: SensorId,
        epiweek: Epiweek,
        issued: Epiweek,
        value: f64,
    ) {
        let revisions = self
            .readings
            .entry(region)
            .or_default()
            .entry(sensor)
            .or_default()
            .entry(epiweek)
            .or_default();
        match revisions.binary_search_by(|r| r.issued.cmp(&issued)) {
            Ok(i) => revisions[i].value = value,
            Err(i) => revisions.insert(i, Revision { issued, value }),
        }
    }

    pub fn insert_truth(&mut self, region: Region, epiweek: Epiweek, value: f64) {
        self.truth.entry(region).or_default().insert(epiweek, value);
    }

    /// The latest value for the cell that had been issued by week `as_of`.
    /// The value may be non-finite if the source published garbage; callers
    /// decide how to treat that.
    pub fn reading_as_of(
        &self,
        region: &Region,
        sensor: &SensorId,
        epiweek: Epiweek,
        as_of: Epiweek,
    ) -> Option<f64> {
        self.revisions(region, sensor, epiweek)?
            .iter()
            .rev()
            .find(|r| r.issued <= as_of)
            .map(|r| r.value)
    }

    /// The most recent revision, regardless of when it was issued.
    pub fn final_reading(&self, region: &Region, sensor: &SensorId, epiweek: Epiweek) -> Option<f64> {
        self.revisions(region, sensor, epiweek)?.last().map(|r| r.value)
    }

    pub fn revisions(&self, region: &Region, sensor: &SensorId, epiweek: Epiweek) -> Option<&[Revision]> {
        self.readings
            .get(region)?
            .get(sensor)?
            .get(&epiweek)
            .map(Vec::as_slice)
    }

    /// Finalized ground truth. Only for scoring and noise fitting.
    pub fn truth(&self, region: &Region, epiweek: Epiweek) -> Option<f64> {
        self.truth.get(region)?.get(&epiweek).copied()
    }

    /// True if any sensor has any reading for `region` in `start..=end`.
    pub fn has_readings_in(&self, region: &Region, start: Epiweek, end: Epiweek) -> bool {
        self.readings.get(region).is_some_and(|sensors| {
            sensors
                .values()
                .any(|weeks| weeks.range(start..=end).next().is_some())
        })
    }

    pub fn regions(&self) -> BTreeSet<Region> {
        self.readings
            .keys()
            .cloned()
            .chain(self.truth.keys().cloned())
            .collect()
    }

    pub fn sensors(&self) -> BTreeSet<SensorId> {
        self.readings
            .values()
            .flat_map(|sensors| sensors.keys().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty() && self.truth.is_empty()
    }
}
