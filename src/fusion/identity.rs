use crate::track::reconcile::Reconciliation;
use crate::track::store::{Alias, TrackStore};
use crate::track::Timestamp;
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};

/// How a detection was attached to the store.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Plate and vehicle aliases point to two different tracks; `from` is folded into `into`
    Merge { into: u64, from: u64 },
    /// Only the vehicle alias is known; the track gets the plate alias too
    AdoptByVehicle(u64),
    /// Only the plate alias is known
    ContinueByPlate(u64),
    /// Vehicle-only detection whose alias is known
    Continue(u64),
    /// No alias is known but a track still carries the vehicle id as its primary one
    Reacquire(u64),
    /// Nothing matched
    Create,
}

/// Track the detection evidence goes to and the reconciliation modes for both sides.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub track_id: u64,
    pub resolution: Resolution,
    pub plate_mode: Reconciliation,
    pub vehicle_mode: Reconciliation,
    /// Whether a merge actually happened
    pub merged: bool,
    /// Whether the merge changed an attribute value of the track
    pub changed: bool,
}

/// Maps per-frame detections onto tracks of the store.
///
/// Priority of the plate branches: merge, adopt-by-vehicle, continue-by-plate, vehicle search,
/// create. The resolver always prefers an existing identity over spawning a new one.
///
pub struct IdentityResolver<'a> {
    store: &'a mut TrackStore,
    ts: Timestamp,
    source_id: &'a str,
    frame_source: &'a str,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(
        store: &'a mut TrackStore,
        ts: Timestamp,
        source_id: &'a str,
        frame_source: &'a str,
    ) -> Self {
        Self {
            store,
            ts,
            source_id,
            frame_source,
        }
    }

    /// Decides the branch for a plate detection, optionally linked to a vehicle. The store is not
    /// modified.
    ///
    pub fn resolve_plate(&self, lp_id: &str, vehicle_id: Option<&str>) -> Resolution {
        let by_plate = self.store.lookup_id(&Alias::plate(lp_id));
        let by_vehicle = vehicle_id.and_then(|id| self.store.lookup_id(&Alias::vehicle(id)));
        match (by_plate, by_vehicle) {
            (Some(into), Some(from)) if into != from => Resolution::Merge { into, from },
            (Some(track_id), _) => Resolution::ContinueByPlate(track_id),
            (None, Some(track_id)) => Resolution::AdoptByVehicle(track_id),
            (None, None) => vehicle_id
                .and_then(|id| self.store.find_by_vehicle_id(id))
                .map(Resolution::Reacquire)
                .unwrap_or(Resolution::Create),
        }
    }

    /// Decides the branch for a vehicle detection without a plate. The store is not modified.
    ///
    pub fn resolve_vehicle(&self, vehicle_id: &str) -> Resolution {
        if let Some(track_id) = self.store.lookup_id(&Alias::vehicle(vehicle_id)) {
            Resolution::Continue(track_id)
        } else if let Some(track_id) = self.store.find_by_vehicle_id(vehicle_id) {
            Resolution::Reacquire(track_id)
        } else {
            Resolution::Create
        }
    }

    fn vehicle_mode_of(&self, track_id: u64) -> Reconciliation {
        self.store
            .get(track_id)
            .map(|t| Reconciliation::from(t.primary_vehicle_id().is_none()))
            .unwrap_or(Reconciliation::TrustLatest)
    }

    fn register_vehicle(&mut self, vehicle_id: Option<&str>, track_id: u64) -> Result<()> {
        match vehicle_id {
            Some(id) => self.store.register(Alias::vehicle(id), track_id),
            None => Ok(()),
        }
    }

    /// Resolves a plate detection and applies the decision to the store: merges tracks, creates
    /// tracks and registers aliases. Attribute evidence is not applied.
    ///
    /// A merge rejected by the store (a finalized track on either side) is logged and dropped;
    /// the evidence then goes to the plate track and the vehicle alias stays where it was.
    ///
    pub fn bind_plate(&mut self, lp_id: &str, vehicle_id: Option<&str>) -> Result<Binding> {
        let resolution = self.resolve_plate(lp_id, vehicle_id);
        debug!(
            "Plate {} (vehicle {:?}) resolved as {:?}",
            lp_id, vehicle_id, resolution
        );
        let binding = match resolution {
            Resolution::Merge { into, from } => match self.store.merge(into, from, self.ts) {
                Ok(changed) => {
                    self.register_vehicle(vehicle_id, into)?;
                    Binding {
                        track_id: into,
                        resolution,
                        plate_mode: Reconciliation::BestEvidence,
                        vehicle_mode: Reconciliation::TrustLatest,
                        merged: true,
                        changed,
                    }
                }
                Err(e) => {
                    if !matches!(e.downcast_ref::<Errors>(), Some(Errors::MergeIntoFinalized(_))) {
                        return Err(e);
                    }
                    warn!("Merge of track {} into {} dropped: {}", from, into, e);
                    Binding {
                        track_id: into,
                        resolution,
                        plate_mode: Reconciliation::BestEvidence,
                        vehicle_mode: self.vehicle_mode_of(into),
                        merged: false,
                        changed: false,
                    }
                }
            },
            // the plate id is new to the track, its reading supersedes the old plate's one
            Resolution::AdoptByVehicle(track_id) => {
                self.store.register(Alias::plate(lp_id), track_id)?;
                Binding {
                    track_id,
                    resolution,
                    plate_mode: Reconciliation::TrustLatest,
                    vehicle_mode: Reconciliation::BestEvidence,
                    merged: false,
                    changed: false,
                }
            }
            Resolution::ContinueByPlate(track_id) | Resolution::Continue(track_id) => {
                let vehicle_mode = self.vehicle_mode_of(track_id);
                self.register_vehicle(vehicle_id, track_id)?;
                Binding {
                    track_id,
                    resolution,
                    plate_mode: Reconciliation::BestEvidence,
                    vehicle_mode,
                    merged: false,
                    changed: false,
                }
            }
            Resolution::Reacquire(track_id) => {
                self.store.register(Alias::plate(lp_id), track_id)?;
                self.register_vehicle(vehicle_id, track_id)?;
                Binding {
                    track_id,
                    resolution,
                    plate_mode: Reconciliation::BestEvidence,
                    vehicle_mode: Reconciliation::BestEvidence,
                    merged: false,
                    changed: false,
                }
            }
            Resolution::Create => {
                let track_id = self
                    .store
                    .create(self.ts, self.source_id, self.frame_source);
                self.store.register(Alias::plate(lp_id), track_id)?;
                self.register_vehicle(vehicle_id, track_id)?;
                Binding {
                    track_id,
                    resolution,
                    plate_mode: Reconciliation::TrustLatest,
                    vehicle_mode: Reconciliation::TrustLatest,
                    merged: false,
                    changed: false,
                }
            }
        };
        Ok(binding)
    }

    /// Resolves a vehicle detection that carries no plate and registers its alias.
    ///
    pub fn bind_vehicle(&mut self, vehicle_id: &str) -> Result<Binding> {
        let resolution = self.resolve_vehicle(vehicle_id);
        debug!("Vehicle {} resolved as {:?}", vehicle_id, resolution);
        let track_id = match resolution {
            Resolution::Continue(track_id) | Resolution::Reacquire(track_id) => track_id,
            _ => self
                .store
                .create(self.ts, self.source_id, self.frame_source),
        };
        let vehicle_mode = self.vehicle_mode_of(track_id);
        self.store.register(Alias::vehicle(vehicle_id), track_id)?;
        Ok(Binding {
            track_id,
            resolution,
            plate_mode: Reconciliation::BestEvidence,
            vehicle_mode,
            merged: false,
            changed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::fusion::identity::{IdentityResolver, Resolution};
    use crate::track::reconcile::Reconciliation::{BestEvidence, TrustLatest};
    use crate::track::store::{Alias, TrackStore};
    use crate::track::{AttributeObservation, PlateEvidence, VehicleEvidence};
    use anyhow::Result;

    fn plate(id: &str, s: &str) -> PlateEvidence {
        PlateEvidence::new(id).lp_string(AttributeObservation::scored(s, 0.9))
    }

    fn vehicle(id: &str, mm: &str) -> VehicleEvidence {
        VehicleEvidence::new(id).make_model(AttributeObservation::scored(mm, 0.8))
    }

    fn seed_plate(store: &mut TrackStore, lp_id: &str, s: &str) -> Result<u64> {
        let b = IdentityResolver::new(store, 0, "cam", "").bind_plate(lp_id, None)?;
        if let Some(t) = store.get_mut(b.track_id) {
            t.update_lp_attrs(0, &plate(lp_id, s), b.plate_mode);
        }
        Ok(b.track_id)
    }

    fn seed_vehicle(store: &mut TrackStore, vehicle_id: &str, mm: &str) -> Result<u64> {
        let b = IdentityResolver::new(store, 0, "cam", "").bind_vehicle(vehicle_id)?;
        if let Some(t) = store.get_mut(b.track_id) {
            t.update_vehicle_attrs(0, &vehicle(vehicle_id, mm), b.vehicle_mode);
        }
        Ok(b.track_id)
    }

    #[test]
    fn create() -> Result<()> {
        let mut store = TrackStore::default();
        let b = IdentityResolver::new(&mut store, 5, "cam", "clip.mp4").bind_plate("L1", Some("V1"))?;
        assert_eq!(b.resolution, Resolution::Create);
        assert_eq!((b.plate_mode, b.vehicle_mode), (TrustLatest, TrustLatest));
        assert_eq!(store.lookup_id(&Alias::plate("L1")), Some(b.track_id));
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(b.track_id));
        let t = store.get(b.track_id).unwrap();
        assert_eq!(t.first_timestamp(), 5);
        assert_eq!(t.frame_source(), "clip.mp4");
        Ok(())
    }

    #[test]
    fn continue_by_plate() -> Result<()> {
        let mut store = TrackStore::default();
        let track_id = seed_plate(&mut store, "L1", "ABC123")?;

        let r = IdentityResolver::new(&mut store, 10, "cam", "");
        assert_eq!(r.resolve_plate("L1", None), Resolution::ContinueByPlate(track_id));

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L1", Some("V1"))?;
        assert_eq!(b.track_id, track_id);
        assert_eq!(b.plate_mode, BestEvidence);
        assert_eq!(b.vehicle_mode, TrustLatest);
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(track_id));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn adopt_by_vehicle() -> Result<()> {
        let mut store = TrackStore::default();
        let track_id = seed_vehicle(&mut store, "V1", "Toyota")?;

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L7", Some("V1"))?;
        assert_eq!(b.resolution, Resolution::AdoptByVehicle(track_id));
        assert_eq!((b.plate_mode, b.vehicle_mode), (TrustLatest, BestEvidence));
        assert_eq!(store.lookup_id(&Alias::plate("L7")), Some(track_id));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn adopt_by_vehicle_trusts_new_plate_id() -> Result<()> {
        let mut store = TrackStore::default();
        let b = IdentityResolver::new(&mut store, 0, "cam", "").bind_plate("L1", Some("V1"))?;
        if let Some(t) = store.get_mut(b.track_id) {
            t.update_lp_attrs(0, &plate("L1", "ABC123"), b.plate_mode);
        }

        let adopted = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L2", Some("V1"))?;
        assert_eq!(adopted.resolution, Resolution::AdoptByVehicle(b.track_id));
        assert_eq!(adopted.plate_mode, TrustLatest);
        assert_eq!(store.lookup_id(&Alias::plate("L2")), Some(b.track_id));
        Ok(())
    }

    #[test]
    fn merge() -> Result<()> {
        let mut store = TrackStore::default();
        let lp_track = seed_plate(&mut store, "L1", "XYZ999")?;
        let car_track = seed_vehicle(&mut store, "V1", "Honda")?;

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L1", Some("V1"))?;
        assert_eq!(
            b.resolution,
            Resolution::Merge {
                into: lp_track,
                from: car_track
            }
        );
        assert!(b.merged);
        assert!(b.changed);
        assert_eq!((b.plate_mode, b.vehicle_mode), (BestEvidence, TrustLatest));
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(lp_track));
        let t = store.get(lp_track).unwrap();
        assert_eq!(t.lp_string().value.as_deref(), Some("XYZ999"));
        assert_eq!(t.make_model().value.as_deref(), Some("Honda"));
        Ok(())
    }

    #[test]
    fn merge_with_finalized_track_is_dropped() -> Result<()> {
        let mut store = TrackStore::default();
        let lp_track = seed_plate(&mut store, "L1", "XYZ999")?;
        let car_track = seed_vehicle(&mut store, "V1", "Honda")?;
        if let Some(t) = store.get_mut(car_track) {
            t.final_report();
        }

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L1", Some("V1"))?;
        assert!(!b.merged);
        assert_eq!(b.track_id, lp_track);
        assert_eq!(b.vehicle_mode, TrustLatest);
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(car_track));
        assert!(store.get(car_track).unwrap().is_finalized());
        Ok(())
    }

    #[test]
    fn reacquire_after_alias_loss() -> Result<()> {
        let mut store = TrackStore::default();
        let track_id = seed_vehicle(&mut store, "V1", "Honda")?;
        store.unregister(&Alias::vehicle("V1"));

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_plate("L9", Some("V1"))?;
        assert_eq!(b.resolution, Resolution::Reacquire(track_id));
        assert_eq!((b.plate_mode, b.vehicle_mode), (BestEvidence, BestEvidence));
        assert_eq!(store.lookup_id(&Alias::plate("L9")), Some(track_id));
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(track_id));
        Ok(())
    }

    #[test]
    fn vehicle_only_branches() -> Result<()> {
        let mut store = TrackStore::default();
        let track_id = seed_vehicle(&mut store, "V1", "Honda")?;

        let b = IdentityResolver::new(&mut store, 10, "cam", "").bind_vehicle("V1")?;
        assert_eq!(b.resolution, Resolution::Continue(track_id));
        assert_eq!(b.vehicle_mode, BestEvidence);

        store.unregister(&Alias::vehicle("V1"));
        let b = IdentityResolver::new(&mut store, 20, "cam", "").bind_vehicle("V1")?;
        assert_eq!(b.resolution, Resolution::Reacquire(track_id));
        assert_eq!(store.lookup_id(&Alias::vehicle("V1")), Some(track_id));

        let b = IdentityResolver::new(&mut store, 30, "cam", "").bind_vehicle("V2")?;
        assert_eq!(b.resolution, Resolution::Create);
        assert_eq!(b.vehicle_mode, TrustLatest);
        assert_eq!(store.len(), 2);
        Ok(())
    }
}
