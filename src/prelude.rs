use crate::fusion;
use crate::track;

pub use fusion::identity::{Binding, IdentityResolver, Resolution};
pub use fusion::options::{ConfigError, FusionOptions};
pub use fusion::processor::{FrameProcessor, FrameStats};
pub use track::notify::{
    ImageSaveRequest, ImageSink, LogObserver, NoopImageSink, NoopObserver, TrackObserver,
};
pub use track::reconcile::{reconcile, Reconciliation};
pub use track::store::builder::TrackStoreBuilder;
pub use track::store::{Alias, AliasKind, SweepResult, TrackStore};
pub use track::{
    AttributeObservation, FinalizeEvent, PlateEvidence, ReportEvent, ReportStatus, TrackedObject,
    VehicleEvidence,
};

pub use crate::snapshot::{PlateDetection, Snapshot, VehicleDetection};
pub use crate::utils::bbox::{BoundingBox, FrameDimensions};
pub use crate::Errors;
