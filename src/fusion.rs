/// Side effects delivery worker
pub mod dispatch;
/// Mapping of detections onto tracks
pub mod identity;
/// Engine configuration
pub mod options;
/// Snapshot orchestration
pub mod processor;
