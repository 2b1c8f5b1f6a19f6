use crate::track::reconcile::{reconcile_slot, Reconciliation};
use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use log::debug;
use serde::Serialize;
use std::fmt;

pub mod notify;
pub mod reconcile;
pub mod store;

/// Milliseconds since the epoch, as embedded into snapshots by the upstream pipeline.
pub type Timestamp = i64;

/// Scored value observed for one attribute slot.
///
/// `total_score` is supplied by the detector and is the only comparator used during
/// reconciliation. It is never recomputed from the other two scores.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeObservation {
    pub value: Option<String>,
    pub attribute_score: f32,
    pub detection_score: f32,
    pub total_score: f32,
}

impl AttributeObservation {
    pub fn new(
        value: Option<String>,
        attribute_score: f32,
        detection_score: f32,
        total_score: f32,
    ) -> Self {
        Self {
            value,
            attribute_score,
            detection_score,
            total_score,
        }
    }

    /// Observation where all three scores are equal to `total_score`.
    ///
    pub fn scored(value: &str, total_score: f32) -> Self {
        Self::new(
            Some(value.to_string()),
            total_score,
            total_score,
            total_score,
        )
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}/{}/{})",
            self.value.as_deref().unwrap_or("-"),
            self.attribute_score,
            self.detection_score,
            self.total_score
        )
    }
}

/// License plate evidence carried by one detection.
///
/// `None` for an attribute means the detection says nothing about it; the slot is left untouched.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateEvidence {
    pub lp_id: String,
    pub lp_string: Option<AttributeObservation>,
    pub lp_region: Option<AttributeObservation>,
}

impl PlateEvidence {
    pub fn new(lp_id: &str) -> Self {
        Self {
            lp_id: lp_id.to_string(),
            ..Default::default()
        }
    }

    pub fn lp_string(mut self, obs: AttributeObservation) -> Self {
        self.lp_string = Some(obs);
        self
    }

    pub fn lp_region(mut self, obs: AttributeObservation) -> Self {
        self.lp_region = Some(obs);
        self
    }
}

/// Vehicle evidence carried by one detection.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleEvidence {
    pub vehicle_id: String,
    pub make_model: Option<AttributeObservation>,
    pub color: Option<AttributeObservation>,
}

impl VehicleEvidence {
    pub fn new(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            ..Default::default()
        }
    }

    pub fn make_model(mut self, obs: AttributeObservation) -> Self {
        self.make_model = Some(obs);
        self
    }

    pub fn color(mut self, obs: AttributeObservation) -> Self {
        self.color = Some(obs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Got,
    Changed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Got => write!(f, "Got"),
            ReportStatus::Changed => write!(f, "Changed"),
        }
    }
}

/// Emitted every time a track changes one of its attribute values.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    pub source_id: String,
    pub track_id: u64,
    pub frame_seq: u64,
    pub status: ReportStatus,
    pub summary: String,
}

/// Emitted exactly once per track, when its attributes are declared authoritative.
///
#[derive(Debug, Clone)]
pub struct FinalizeEvent {
    pub track_id: u64,
    pub summary: String,
    pub object: TrackedObject,
}

/// Renders a millisecond timestamp as `HH:MM:SS` (UTC).
///
pub fn clock_label(ts: Timestamp) -> String {
    let secs = ts.div_euclid(1000).rem_euclid(86_400);
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        secs % 3600 / 60,
        secs % 60
    )
}

/// One physical entity (a vehicle and/or its plate) aggregated across frames.
///
/// The object is owned by [`TrackStore`](crate::track::store::TrackStore); the rest of the engine
/// only borrows it for the duration of a call.
///
#[derive(Debug, Clone, Serialize)]
pub struct TrackedObject {
    track_id: u64,
    source_id: String,
    frame_source: String,
    primary_lp_id: Option<String>,
    primary_vehicle_id: Option<String>,
    lp_string: AttributeObservation,
    lp_region: AttributeObservation,
    make_model: AttributeObservation,
    color: AttributeObservation,
    first_timestamp: Timestamp,
    last_seen_timestamp: Timestamp,
    last_update_timestamp: Timestamp,
    times_reported: usize,
    finalized: bool,
    merge_history: Vec<u64>,
}

impl TrackedObject {
    /// Creates an empty track first seen at `ts`.
    ///
    pub fn new(track_id: u64, ts: Timestamp, source_id: &str, frame_source: &str) -> Self {
        Self {
            track_id,
            source_id: source_id.to_string(),
            frame_source: frame_source.to_string(),
            primary_lp_id: None,
            primary_vehicle_id: None,
            lp_string: AttributeObservation::default(),
            lp_region: AttributeObservation::default(),
            make_model: AttributeObservation::default(),
            color: AttributeObservation::default(),
            first_timestamp: ts,
            last_seen_timestamp: ts,
            last_update_timestamp: ts,
            times_reported: 0,
            finalized: false,
            merge_history: vec![track_id],
        }
    }

    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn frame_source(&self) -> &str {
        &self.frame_source
    }

    pub fn primary_lp_id(&self) -> Option<&str> {
        self.primary_lp_id.as_deref()
    }

    pub fn primary_vehicle_id(&self) -> Option<&str> {
        self.primary_vehicle_id.as_deref()
    }

    pub fn lp_string(&self) -> &AttributeObservation {
        &self.lp_string
    }

    pub fn lp_region(&self) -> &AttributeObservation {
        &self.lp_region
    }

    pub fn make_model(&self) -> &AttributeObservation {
        &self.make_model
    }

    pub fn color(&self) -> &AttributeObservation {
        &self.color
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.first_timestamp
    }

    pub fn last_seen_timestamp(&self) -> Timestamp {
        self.last_seen_timestamp
    }

    pub fn last_update_timestamp(&self) -> Timestamp {
        self.last_update_timestamp
    }

    pub fn times_reported(&self) -> usize {
        self.times_reported
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Track ids folded into this track, its own id first.
    ///
    pub fn merge_history(&self) -> &[u64] {
        &self.merge_history
    }

    /// Time between the first and the last observation.
    ///
    pub fn duration(&self) -> Timestamp {
        self.last_seen_timestamp.saturating_sub(self.first_timestamp)
    }

    /// Label used for plate crops.
    ///
    pub fn plate_label(&self) -> String {
        self.lp_string.value.clone().unwrap_or_else(|| "-".into())
    }

    /// Label used for vehicle crops.
    ///
    pub fn vehicle_label(&self) -> String {
        format!(
            "{}-{}",
            self.make_model.value.as_deref().unwrap_or("-"),
            self.color.value.as_deref().unwrap_or("-")
        )
    }

    fn touch(&mut self, ts: Timestamp) {
        self.last_seen_timestamp = self.last_seen_timestamp.max(ts);
    }

    fn mark_updated(&mut self, ts: Timestamp) {
        self.last_update_timestamp = self.last_update_timestamp.max(ts).min(self.last_seen_timestamp);
    }

    /// Applies vehicle evidence observed at `ts`.
    ///
    /// Returns `true` when the make/model or the color value changed. A finalized track is
    /// left untouched and `false` is returned.
    ///
    pub fn update_vehicle_attrs(
        &mut self,
        ts: Timestamp,
        vehicle: &VehicleEvidence,
        mode: Reconciliation,
    ) -> bool {
        if self.finalized {
            return false;
        }
        if let Some(prev) = &self.primary_vehicle_id {
            if *prev != vehicle.vehicle_id {
                debug!(
                    "Track {}: vehicle id {} superseded by {}",
                    self.track_id, prev, vehicle.vehicle_id
                );
            }
        }
        self.primary_vehicle_id = Some(vehicle.vehicle_id.clone());
        self.touch(ts);

        let mut changed = false;
        if let Some(obs) = &vehicle.make_model {
            changed |= reconcile_slot(&mut self.make_model, obs, mode);
        }
        if let Some(obs) = &vehicle.color {
            changed |= reconcile_slot(&mut self.color, obs, mode);
        }
        if changed {
            self.mark_updated(ts);
        }
        changed
    }

    /// Applies plate evidence observed at `ts`.
    ///
    /// Returns `true` when the plate string or the region value changed. A finalized track is
    /// left untouched and `false` is returned.
    ///
    pub fn update_lp_attrs(
        &mut self,
        ts: Timestamp,
        plate: &PlateEvidence,
        mode: Reconciliation,
    ) -> bool {
        if self.finalized {
            return false;
        }
        if let Some(prev) = &self.primary_lp_id {
            if *prev != plate.lp_id {
                debug!(
                    "Track {}: plate id {} superseded by {}",
                    self.track_id, prev, plate.lp_id
                );
            }
        }
        self.primary_lp_id = Some(plate.lp_id.clone());
        self.touch(ts);

        let mut changed = false;
        if let Some(obs) = &plate.lp_string {
            changed |= reconcile_slot(&mut self.lp_string, obs, mode);
        }
        if let Some(obs) = &plate.lp_region {
            changed |= reconcile_slot(&mut self.lp_region, obs, mode);
        }
        if changed {
            self.mark_updated(ts);
        }
        changed
    }

    /// Applies the plate evidence and, if present, the linked vehicle evidence.
    ///
    /// Returns `true` when either side changed.
    ///
    pub fn update_both(
        &mut self,
        ts: Timestamp,
        plate: &PlateEvidence,
        plate_mode: Reconciliation,
        vehicle: Option<&VehicleEvidence>,
        vehicle_mode: Reconciliation,
    ) -> bool {
        let changed = self.update_lp_attrs(ts, plate, plate_mode);
        match vehicle {
            Some(vehicle) => self.update_vehicle_attrs(ts, vehicle, vehicle_mode) || changed,
            None => changed,
        }
    }

    /// Folds `other` into the current track.
    ///
    /// Both histories were built independently, so every slot keeps the more confident of the
    /// two observations. Identity ids missing on `self` are taken from `other`, the first
    /// timestamp becomes the earliest of both, report counters and merge histories are joined.
    ///
    /// # Returns
    /// * `Ok(true)` if any attribute value of `self` changed
    /// * `Err(Errors::MergeIntoFinalized)` if either track is finalized, nothing is modified
    /// * `Err(Errors::SelfMerge)` if `other` is the same track
    ///
    pub fn merge(&mut self, other: &TrackedObject, ts: Timestamp) -> Result<bool> {
        if other.track_id == self.track_id {
            return Err(Errors::SelfMerge(self.track_id).into());
        }
        if self.finalized {
            return Err(Errors::MergeIntoFinalized(self.track_id).into());
        }
        if other.finalized {
            return Err(Errors::MergeIntoFinalized(other.track_id).into());
        }

        let mode = Reconciliation::BestEvidence;
        let mut changed = false;
        for (slot, candidate) in [
            (&mut self.lp_string, &other.lp_string),
            (&mut self.lp_region, &other.lp_region),
            (&mut self.make_model, &other.make_model),
            (&mut self.color, &other.color),
        ] {
            changed |= reconcile_slot(slot, candidate, mode);
        }

        if self.primary_lp_id.is_none() {
            self.primary_lp_id = other.primary_lp_id.clone();
        }
        if self.primary_vehicle_id.is_none() {
            self.primary_vehicle_id = other.primary_vehicle_id.clone();
        }

        self.first_timestamp = self.first_timestamp.min(other.first_timestamp);
        self.touch(ts.max(other.last_seen_timestamp));
        if changed {
            self.mark_updated(ts);
        }
        self.times_reported += other.times_reported;
        self.merge_history.extend_from_slice(&other.merge_history);
        Ok(changed)
    }

    fn identity(&self) -> String {
        let vehicle = self.primary_vehicle_id.as_ref().map(|id| {
            format!(
                "Vehicle {} - {} {}",
                id,
                self.color.describe(),
                self.make_model.describe()
            )
        });
        let plate = self.primary_lp_id.as_ref().map(|id| {
            format!(
                "LP {} - {} {}",
                id,
                self.lp_string.describe(),
                self.lp_region.describe()
            )
        });
        let text = [vehicle, plate].into_iter().flatten().join("; ");
        if text.is_empty() {
            "no identity observed".to_string()
        } else {
            text
        }
    }

    /// Builds a change report and counts it.
    ///
    /// The first report of a track has the `Got` status, all later ones `Changed`.
    ///
    pub fn report(&mut self, frame_seq: u64, timestamp_label: &str) -> ReportEvent {
        let status = if self.times_reported == 0 {
            ReportStatus::Got
        } else {
            ReportStatus::Changed
        };
        let summary = format!(
            "{} - [{}-{}-{}] {} {}",
            timestamp_label,
            self.source_id,
            self.frame_source,
            frame_seq,
            status,
            self.identity()
        );
        self.times_reported += 1;
        ReportEvent {
            source_id: self.source_id.clone(),
            track_id: self.track_id,
            frame_seq,
            status,
            summary,
        }
    }

    /// Declares the track attributes authoritative.
    ///
    /// Returns the event for the finalize callback the first time it is called, `None` afterwards.
    ///
    pub fn final_report(&mut self) -> Option<FinalizeEvent> {
        if self.finalized {
            return None;
        }
        let summary = format!(
            "{}-{} [{}] - [{}] - [{}] FINAL REPORT: {}",
            clock_label(self.first_timestamp),
            clock_label(self.last_seen_timestamp),
            self.times_reported,
            self.source_id,
            self.frame_source,
            self.identity()
        );
        self.finalized = true;
        Some(FinalizeEvent {
            track_id: self.track_id,
            summary,
            object: self.clone(),
        })
    }
}
