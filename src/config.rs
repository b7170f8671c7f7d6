use std::time::Duration;

use crate::port::LineSettings;
use crate::proto::exchange::ReadPolicy;

pub const DEFAULT_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_SLOTS: u32 = 5;

/// Startup configuration for one wheel. Nothing here is negotiated with the
/// device at runtime.
#[derive(Debug, Clone)]
pub struct WheelConfig {
    pub path: String,
    pub slots: u32,
    pub baud: u32,
    /// Time the device needs to reboot after the line is opened.
    pub settle: Duration,
    /// Upper bound on draining boot noise after the settle window.
    pub flush_window: Duration,
    pub per_read_timeout: Duration,
    pub max_reads: usize,
    pub max_line: usize,
    pub query_timeout: Duration,
    pub move_timeout: Duration,
    pub home_timeout: Duration,
    pub home_on_connect: bool,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            slots: DEFAULT_SLOTS,
            baud: 115_200,
            settle: Duration::from_secs(2),
            flush_window: Duration::from_millis(250),
            per_read_timeout: Duration::from_millis(300),
            max_reads: 512,
            max_line: 128,
            query_timeout: Duration::from_secs(2),
            move_timeout: Duration::from_secs(30),
            home_timeout: Duration::from_secs(30),
            home_on_connect: true,
        }
    }
}

impl WheelConfig {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings { baud: self.baud }
    }

    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            per_read: self.per_read_timeout,
            max_reads: self.max_reads,
            max_line: self.max_line,
        }
    }
}
