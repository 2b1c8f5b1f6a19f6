use crate::fusion::dispatch::Dispatcher;
use crate::fusion::identity::IdentityResolver;
use crate::fusion::options::FusionOptions;
use crate::snapshot::{PlateDetection, Snapshot, VehicleDetection};
use crate::track::notify::{ImageSaveRequest, ImageSink, TrackObserver};
use crate::track::store::TrackStore;
use crate::track::{clock_label, TrackedObject, VehicleEvidence};
use crate::utils::bbox::BoundingBox;
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};
use std::collections::HashSet;


/// What happened while one snapshot was processed.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// plate detections accepted
    pub plates: usize,
    /// vehicle detections accepted, linked or not
    pub vehicles: usize,
    /// malformed detections skipped
    pub skipped: usize,
    pub reports: usize,
    pub merges: usize,
    pub finalized: usize,
    pub evicted: usize,
}

/// Orchestrates snapshots: identity resolution, evidence updates, reports and the retention sweep.
///
/// Snapshots must be fed one at a time, in arrival order. Side effects are handed to a
/// [`Dispatcher`] and never awaited.
///
pub struct FrameProcessor {
    opts: FusionOptions,
    store: TrackStore,
    dispatcher: Dispatcher,
    frame_seq: u64,
}

impl FrameProcessor {
    pub fn new<O: TrackObserver>(opts: FusionOptions, observer: O) -> Self {
        Self::with_dispatcher(opts, Dispatcher::new(Box::new(observer), None))
    }

    /// Creates a processor that also requests crops of every reported detection.
    ///
    pub fn with_image_sink<O: TrackObserver, S: ImageSink>(
        opts: FusionOptions,
        observer: O,
        sink: S,
    ) -> Self {
        Self::with_dispatcher(opts, Dispatcher::new(Box::new(observer), Some(Box::new(sink))))
    }

    fn with_dispatcher(opts: FusionOptions, dispatcher: Dispatcher) -> Self {
        Self {
            store: opts.store(),
            opts,
            dispatcher,
            frame_seq: 0,
        }
    }

    pub fn options(&self) -> &FusionOptions {
        &self.opts
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Sequence number of the last processed snapshot, `0` before the first one
    ///
    pub fn frame_seq(&self) -> u64 {
        self.frame_seq
    }

    /// Decodes and processes one snapshot.
    ///
    /// Only a malformed envelope is an error; malformed detections are skipped.
    ///
    pub fn process_json(&mut self, frame: &str) -> Result<FrameStats> {
        let snapshot = Snapshot::from_json(frame)?;
        Ok(self.process(&snapshot))
    }

    /// Same as [`process_json`](Self::process_json) with the frame number given by the caller.
    ///
    pub fn process_json_numbered(&mut self, frame: &str, frame_seq: u64) -> Result<FrameStats> {
        let snapshot = Snapshot::from_json(frame)?;
        Ok(self.process_numbered(&snapshot, frame_seq))
    }

    /// Processes a snapshot numbered right after the previous one.
    ///
    pub fn process(&mut self, snapshot: &Snapshot) -> FrameStats {
        let frame_seq = self.frame_seq.saturating_add(1);
        self.process_numbered(snapshot, frame_seq)
    }

    /// Processes a snapshot under the frame number the pipeline assigned to it (its tick).
    /// The number shows up in reports and crop file names.
    ///
    pub fn process_numbered(&mut self, snapshot: &Snapshot, frame_seq: u64) -> FrameStats {
        self.frame_seq = frame_seq;
        let mut stats = FrameStats::default();
        let mut linked = HashSet::new();

        for detection in snapshot.plates() {
            let plate = match detection {
                Ok(plate) => plate,
                Err(e) => {
                    warn!("Frame {}: {}", self.frame_seq, e);
                    stats.skipped += 1;
                    continue;
                }
            };
            stats.plates += 1;

            let vehicle = match plate.linked_vehicle_id.as_deref() {
                Some(id) => {
                    linked.insert(id.to_string());
                    match snapshot.vehicle(id) {
                        Some(Ok(vehicle)) => {
                            stats.vehicles += 1;
                            Some(vehicle)
                        }
                        Some(Err(e)) => {
                            warn!("Frame {}: {}", self.frame_seq, e);
                            stats.skipped += 1;
                            None
                        }
                        None => None,
                    }
                }
                None => None,
            };

            if let Err(e) = self.process_plate(snapshot, &plate, vehicle.as_ref(), &mut stats) {
                warn!(
                    "Frame {}: plate {} is not processed: {}",
                    self.frame_seq, plate.plate.lp_id, e
                );
            }
        }

        for detection in snapshot.vehicles() {
            let vehicle = match detection {
                Ok(vehicle) => vehicle,
                Err(e) => {
                    // linked ones were already counted on the plate side
                    if !is_linked(&e, &linked) {
                        warn!("Frame {}: {}", self.frame_seq, e);
                        stats.skipped += 1;
                    }
                    continue;
                }
            };
            if linked.contains(&vehicle.vehicle.vehicle_id) {
                continue;
            }
            stats.vehicles += 1;
            if let Err(e) = self.process_vehicle(snapshot, &vehicle, &mut stats) {
                warn!(
                    "Frame {}: vehicle {} is not processed: {}",
                    self.frame_seq, vehicle.vehicle.vehicle_id, e
                );
            }
        }

        let res = self.store.sweep(snapshot.frame_timestamp);
        stats.finalized = res.finalized.len();
        stats.evicted = res.evicted.len();
        for event in res.finalized {
            self.dispatcher.finalize(event);
        }

        debug!("Frame {} processed: {:?}", self.frame_seq, stats);
        stats
    }

    /// Reports the track when one of its attribute values changed, either through the frame
    /// evidence or through a merge.
    ///
    fn process_plate(
        &mut self,
        snapshot: &Snapshot,
        plate: &PlateDetection,
        vehicle: Option<&VehicleDetection>,
        stats: &mut FrameStats,
    ) -> Result<()> {
        let ts = snapshot.frame_timestamp;
        let binding = IdentityResolver::new(
            &mut self.store,
            ts,
            &snapshot.source_id,
            snapshot.frame_source_name(),
        )
        .bind_plate(&plate.plate.lp_id, plate.linked_vehicle_id.as_deref())?;
        if binding.merged {
            stats.merges += 1;
        }

        // a link to a vehicle missing from the frame still names the vehicle
        let bare_vehicle = plate.linked_vehicle_id.as_deref().map(VehicleEvidence::new);
        let vehicle_evidence = vehicle.map(|v| &v.vehicle).or(bare_vehicle.as_ref());

        let track = self
            .store
            .get_mut(binding.track_id)
            .ok_or(Errors::MissingTrack(binding.track_id))?;
        let changed = track.update_both(
            ts,
            &plate.plate,
            binding.plate_mode,
            vehicle_evidence,
            binding.vehicle_mode,
        );
        if !(changed || binding.changed) || track.is_finalized() {
            return Ok(());
        }

        let event = track.report(self.frame_seq, &clock_label(ts));
        stats.reports += 1;
        self.dispatcher.report(event);

        if self.dispatcher.saves_images() {
            let plate_crop = crop_request(snapshot, self.frame_seq, plate.bbox, track.plate_label());
            let vehicle_crop = vehicle.and_then(|v| {
                crop_request(snapshot, self.frame_seq, v.bbox, track.vehicle_label())
            });
            for request in plate_crop.into_iter().chain(vehicle_crop) {
                self.dispatcher.save_image(request);
            }
        }
        Ok(())
    }

    fn process_vehicle(
        &mut self,
        snapshot: &Snapshot,
        vehicle: &VehicleDetection,
        stats: &mut FrameStats,
    ) -> Result<()> {
        let ts = snapshot.frame_timestamp;
        let binding = IdentityResolver::new(
            &mut self.store,
            ts,
            &snapshot.source_id,
            snapshot.frame_source_name(),
        )
        .bind_vehicle(&vehicle.vehicle.vehicle_id)?;

        let track = self
            .store
            .get_mut(binding.track_id)
            .ok_or(Errors::MissingTrack(binding.track_id))?;
        let changed = track.update_vehicle_attrs(ts, &vehicle.vehicle, binding.vehicle_mode);
        if !changed || self.opts.get_only_report_linked_plates() {
            return Ok(());
        }

        let event = track.report(self.frame_seq, &clock_label(ts));
        stats.reports += 1;
        self.dispatcher.report(event);

        if let Some(request) =
            crop_request(snapshot, self.frame_seq, vehicle.bbox, track.vehicle_label())
        {
            self.dispatcher.save_image(request);
        }
        Ok(())
    }

    /// Final-reports every live track and empties the store. Used at shutdown.
    ///
    pub fn finalize_all(&mut self) -> usize {
        let events = self.store.finalize_all();
        let n = events.len();
        for event in events {
            self.dispatcher.finalize(event);
        }
        n
    }

    /// Copies of the live tracks, ordered by track id
    ///
    pub fn live_tracks(&self) -> Vec<TrackedObject> {
        self.store
            .track_ids()
            .into_iter()
            .filter_map(|track_id| self.store.get(track_id).cloned())
            .collect()
    }
}

fn is_linked(e: &anyhow::Error, linked: &HashSet<String>) -> bool {
    matches!(
        e.downcast_ref::<Errors>(),
        Some(Errors::MalformedDetection { id, .. }) if linked.contains(id)
    )
}

fn crop_request(
    snapshot: &Snapshot,
    frame_seq: u64,
    bbox: Option<BoundingBox>,
    label: String,
) -> Option<ImageSaveRequest> {
    let bbox = bbox?;
    if !bbox.fits(&snapshot.frame_dimensions) {
        debug!("Crop {:?} does not fit the frame, skipped", bbox);
        return None;
    }
    Some(ImageSaveRequest {
        source_id: snapshot.source_id.clone(),
        frame_seq,
        image_id: snapshot.image_id().map(String::from),
        label,
        bbox,
        frame: snapshot.frame_dimensions,
    })
}
