use serde::{Deserialize, Serialize};

/// Lifecycle of the live relay's transcoder process.
///
/// `Stopped -> Starting -> Running -> Failed -> Starting -> ...`; `Disabled`
/// is terminal for the run when the transcoder binary is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RelayState {
    Disabled,
    #[default]
    Stopped,
    Starting,
    Running,
    Failed,
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub launches: u64,
    pub restarts: u64,
}

/// Snapshot of the engine for health and status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub out_of_home: bool,
    pub watching: bool,
    pub confirm_counter: u32,
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
    pub relay_state: RelayState,
    pub relay: RelayStats,
}
