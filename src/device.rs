//! Device availability gating.
//!
//! Before any work is done for a board, its status is queried once. Only
//! online boards go on to rootfs resolution and job dispatch; offline and
//! retired boards are abandoned for the run.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::board::Board;

/// Result type for device status queries.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Reasons a board does not pass the gate.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The board is offline or retired.
    #[error("Device is {0}, not sending jobs")]
    Unavailable(DeviceStatus),

    /// The status provider could not be queried.
    #[error("Failed to query device status: {0}")]
    Query(String),
}

/// Availability of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Retired,
}

impl DeviceStatus {
    /// Maps a scheduler status string to a [`DeviceStatus`].
    ///
    /// Schedulers report finer states (`idle`, `running`, `reserved`, ...);
    /// only `offline` and `retired` make a board unavailable.
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "offline" => DeviceStatus::Offline,
            "retired" => DeviceStatus::Retired,
            _ => DeviceStatus::Online,
        }
    }

    pub fn is_available(self) -> bool {
        self == DeviceStatus::Online
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Source of board availability.
#[async_trait]
pub trait DeviceStatusProvider: Send + Sync {
    /// Returns the current status of `board`.
    async fn device_status(&self, board: &Board) -> DeviceResult<DeviceStatus>;
}

/// Provider for backends without a device registry: every board is online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl DeviceStatusProvider for AlwaysOnline {
    async fn device_status(&self, _board: &Board) -> DeviceResult<DeviceStatus> {
        Ok(DeviceStatus::Online)
    }
}

/// Queries `board` once and lets it through only when online.
pub async fn check_board(provider: &dyn DeviceStatusProvider, board: &Board) -> DeviceResult<()> {
    let status = provider.device_status(board).await?;
    if status.is_available() {
        Ok(())
    } else {
        Err(DeviceError::Unavailable(status))
    }
}
