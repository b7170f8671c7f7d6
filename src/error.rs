use std::time::Duration;

use thiserror::Error;

use crate::port::PortError;

#[derive(Debug, Error)]
pub enum WheelError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("no response to {command} within {waited:?}")]
    NoResponse { command: String, waited: Duration },
    #[error("invalid position report: {raw:?}")]
    InvalidPosition { raw: String },
    #[error("slot {requested} outside 1..={slots}")]
    OutOfRange { requested: i64, slots: u32 },
    #[error("device rejected {command}: {response:?}")]
    DeviceRejected { command: String, response: String },
    #[error("wheel not connected")]
    NotConnected,
}

impl WheelError {
    /// Failures of the line itself, as opposed to the device answering badly.
    pub fn is_transport(&self) -> bool {
        matches!(self, WheelError::Port(_))
    }
}
