pub mod fusion;
pub mod prelude;
pub mod snapshot;
pub mod track;
pub mod utils;

#[cfg(feature = "python")]
mod py;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Malformed {kind} detection {id}: {reason}")]
    MalformedDetection {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("Missing track {0}.")]
    MissingTrack(u64),
    #[error("Track {0} is finalized and cannot take part in a merge.")]
    MergeIntoFinalized(u64),
    #[error("Track {0} cannot be merged with itself.")]
    SelfMerge(u64),
}
