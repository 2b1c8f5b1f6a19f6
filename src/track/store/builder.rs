use crate::track::store::{TrackStore, DEFAULT_MEMORY_DEPTH_MS};
use crate::track::Timestamp;

/// Builder for TrackStore
///
#[derive(Debug, Default)]
pub struct TrackStoreBuilder {
    memory_depth_ms: Option<Timestamp>,
    max_track_duration_ms: Option<Timestamp>,
}

impl TrackStoreBuilder {
    /// Creates a new builder
    ///
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a track survives without observations before it is finalized and removed
    ///
    pub fn memory_depth_ms(mut self, ms: Timestamp) -> Self {
        assert!(
            self.memory_depth_ms.is_none(),
            "The method `memory_depth_ms` must be called once."
        );
        assert!(ms >= 0, "Memory depth must not be negative");
        self.memory_depth_ms = Some(ms);
        self
    }

    /// Sets the observation time after which a track is finalized while kept alive, `0` disables it
    ///
    pub fn max_track_duration_ms(mut self, ms: Timestamp) -> Self {
        assert!(
            self.max_track_duration_ms.is_none(),
            "The method `max_track_duration_ms` must be called once."
        );
        assert!(ms >= 0, "Max track duration must not be negative");
        self.max_track_duration_ms = Some(ms);
        self
    }

    /// Builds the TrackStore
    ///
    pub fn build(self) -> TrackStore {
        TrackStore::new(
            self.memory_depth_ms.unwrap_or(DEFAULT_MEMORY_DEPTH_MS),
            self.max_track_duration_ms.unwrap_or(0),
        )
    }
}
