use crate::track::{FinalizeEvent, Timestamp, TrackedObject};
use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use log::debug;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

pub mod builder;


/// Default time a track survives without observations, ms
pub const DEFAULT_MEMORY_DEPTH_MS: Timestamp = 10_000;

/// Detection kind the alias id comes from.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AliasKind {
    Plate,
    Vehicle,
}

/// Transient detector id that currently maps to a tracked object.
///
/// Plate and vehicle ids live in separate namespaces, so `L1` as a plate and `L1` as a vehicle
/// never collide.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias {
    pub kind: AliasKind,
    pub id: String,
}

impl Alias {
    pub fn plate(id: &str) -> Self {
        Self {
            kind: AliasKind::Plate,
            id: id.to_string(),
        }
    }

    pub fn vehicle(id: &str) -> Self {
        Self {
            kind: AliasKind::Vehicle,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AliasKind::Plate => write!(f, "lp:{}", self.id),
            AliasKind::Vehicle => write!(f, "vehicle:{}", self.id),
        }
    }
}

enum SweepVerdict {
    Evict,
    Finalize,
}

/// Outcome of a [`TrackStore::sweep`].
///
#[derive(Debug, Default)]
pub struct SweepResult {
    /// Final determinations made during the sweep, ordered by track id
    pub finalized: Vec<FinalizeEvent>,
    /// Tracks removed from the store
    pub evicted: Vec<u64>,
}

/// Registry of live tracked objects.
///
/// Objects are kept by their track id; the alias index maps every detector id that currently
/// belongs to an object onto that track id. One object may be reachable under several aliases,
/// an alias never points to more than one object.
///
#[derive(Debug)]
pub struct TrackStore {
    memory_depth_ms: Timestamp,
    max_track_duration_ms: Timestamp,
    objects: HashMap<u64, TrackedObject>,
    aliases: HashMap<Alias, u64>,
    track_id: u64,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_DEPTH_MS, 0)
    }
}

impl TrackStore {
    /// Creates a store
    ///
    /// # Parameters
    /// * `memory_depth_ms` - a track unseen for longer than that is finalized and removed
    /// * `max_track_duration_ms` - a track observed for that long is finalized but kept; `0` disables the policy
    ///
    pub fn new(memory_depth_ms: Timestamp, max_track_duration_ms: Timestamp) -> Self {
        Self {
            memory_depth_ms,
            max_track_duration_ms,
            objects: HashMap::default(),
            aliases: HashMap::default(),
            track_id: 0,
        }
    }

    pub fn memory_depth_ms(&self) -> Timestamp {
        self.memory_depth_ms
    }

    pub fn max_track_duration_ms(&self) -> Timestamp {
        self.max_track_duration_ms
    }

    fn gen_track_id(&mut self) -> u64 {
        self.track_id += 1;
        self.track_id
    }

    /// Creates an empty object first seen at `ts` and returns its track id.
    ///
    /// The object is not reachable by any alias until [`register`](Self::register) is called.
    ///
    pub fn create(&mut self, ts: Timestamp, source_id: &str, frame_source: &str) -> u64 {
        let track_id = self.gen_track_id();
        self.objects.insert(
            track_id,
            TrackedObject::new(track_id, ts, source_id, frame_source),
        );
        debug!("Track {} created at {}", track_id, ts);
        track_id
    }

    pub fn lookup(&self, alias: &Alias) -> Option<&TrackedObject> {
        self.aliases
            .get(alias)
            .and_then(|track_id| self.objects.get(track_id))
    }

    pub fn lookup_id(&self, alias: &Alias) -> Option<u64> {
        self.aliases.get(alias).copied()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackedObject> {
        self.objects.get(&track_id)
    }

    pub fn get_mut(&mut self, track_id: u64) -> Option<&mut TrackedObject> {
        self.objects.get_mut(&track_id)
    }

    /// Points `alias` to the track. An alias owned by another track is moved.
    ///
    pub fn register(&mut self, alias: Alias, track_id: u64) -> Result<()> {
        if !self.objects.contains_key(&track_id) {
            return Err(Errors::MissingTrack(track_id).into());
        }
        if let Some(prev) = self.aliases.insert(alias.clone(), track_id) {
            if prev != track_id {
                debug!("Alias {} moved from track {} to {}", alias, prev, track_id);
            }
        }
        Ok(())
    }

    /// Removes the alias from the index and returns the track it pointed to.
    ///
    pub fn unregister(&mut self, alias: &Alias) -> Option<u64> {
        self.aliases.remove(alias)
    }

    /// Aliases pointing to the track, sorted.
    ///
    pub fn aliases_of(&self, track_id: u64) -> Vec<Alias> {
        self.aliases
            .iter()
            .filter(|(_, id)| **id == track_id)
            .map(|(alias, _)| alias.clone())
            .sorted()
            .collect()
    }

    /// Finds a live object whose primary vehicle id is `vehicle_id`, regardless of the aliases
    /// currently indexed. When several objects qualify the most recently seen one wins.
    ///
    pub fn find_by_vehicle_id(&self, vehicle_id: &str) -> Option<u64> {
        self.objects
            .values()
            .filter(|obj| obj.primary_vehicle_id() == Some(vehicle_id))
            .max_by(|l, r| {
                l.last_seen_timestamp()
                    .cmp(&r.last_seen_timestamp())
                    .then(r.track_id().cmp(&l.track_id()))
            })
            .map(|obj| obj.track_id())
    }

    /// Folds track `src` into track `dest` and re-points every alias of `src` to `dest`.
    ///
    /// On error both tracks and the alias index are left as they were.
    ///
    /// # Returns
    /// * `Ok(changed)` - whether an attribute value of `dest` changed
    ///
    pub fn merge(&mut self, dest: u64, src: u64, ts: Timestamp) -> Result<bool> {
        if dest == src {
            return Err(Errors::SelfMerge(dest).into());
        }
        if !self.objects.contains_key(&dest) {
            return Err(Errors::MissingTrack(dest).into());
        }
        let other = self
            .objects
            .remove(&src)
            .ok_or(Errors::MissingTrack(src))?;

        let res = match self.objects.get_mut(&dest) {
            Some(track) => track.merge(&other, ts),
            None => Err(Errors::MissingTrack(dest).into()),
        };

        match res {
            Ok(changed) => {
                self.aliases
                    .values_mut()
                    .filter(|track_id| **track_id == src)
                    .for_each(|track_id| *track_id = dest);
                debug!("Track {} merged into {}", src, dest);
                Ok(changed)
            }
            Err(e) => {
                self.objects.insert(src, other);
                Err(e)
            }
        }
    }

    fn remove(&mut self, track_id: u64) -> Option<TrackedObject> {
        let obj = self.objects.remove(&track_id)?;
        self.aliases.retain(|_, id| *id != track_id);
        Some(obj)
    }

    /// Applies the retention policies at snapshot time `now`.
    ///
    /// * unseen for longer than memory depth - final report (if not made yet) and removal;
    /// * observed for at least the max track duration - final report, the track stays in the store.
    ///
    pub fn sweep(&mut self, now: Timestamp) -> SweepResult {
        let memory_depth_ms = self.memory_depth_ms;
        let max_track_duration_ms = self.max_track_duration_ms;

        let verdicts = self
            .objects
            .par_iter()
            .filter_map(|(track_id, obj)| {
                if now.saturating_sub(obj.last_seen_timestamp()) > memory_depth_ms {
                    Some((*track_id, SweepVerdict::Evict))
                } else if max_track_duration_ms > 0
                    && !obj.is_finalized()
                    && obj.duration() >= max_track_duration_ms
                {
                    Some((*track_id, SweepVerdict::Finalize))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();

        let mut res = SweepResult::default();
        for (track_id, verdict) in verdicts.into_iter().sorted_by_key(|(id, _)| *id) {
            match verdict {
                SweepVerdict::Evict => {
                    if let Some(mut obj) = self.remove(track_id) {
                        res.finalized.extend(obj.final_report());
                        res.evicted.push(track_id);
                        debug!("Track {} evicted at {}", track_id, now);
                    }
                }
                SweepVerdict::Finalize => {
                    if let Some(obj) = self.objects.get_mut(&track_id) {
                        res.finalized.extend(obj.final_report());
                        debug!("Track {} reached max duration at {}", track_id, now);
                    }
                }
            }
        }
        res
    }

    /// Final-reports every object still in the store and empties it.
    ///
    pub fn finalize_all(&mut self) -> Vec<FinalizeEvent> {
        let track_ids = self.objects.keys().copied().sorted().collect::<Vec<_>>();
        let events = track_ids
            .into_iter()
            .filter_map(|track_id| self.objects.remove(&track_id))
            .filter_map(|mut obj| obj.final_report())
            .collect();
        self.aliases.clear();
        events
    }

    /// Number of live objects
    ///
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of indexed aliases
    ///
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Ids of live objects, sorted
    ///
    pub fn track_ids(&self) -> Vec<u64> {
        self.objects.keys().copied().sorted().collect()
    }
}
