//! Driver core for a serial, motorized filter wheel.
//!
//! The wheel speaks a newline-terminated ASCII protocol at 115200 8-N-1:
//! `ID`, `HOME`, `POS?` and `GOTO n`. [`wheel::Wheel`] runs the connect
//! handshake and the exchanges; [`wheel::FilterWheel`] is the four-call
//! surface a host framework adapter plugs into.

pub mod config;
pub mod error;
pub mod port;
pub mod proto;
pub mod sim;
pub mod wheel;

pub use config::WheelConfig;
pub use error::WheelError;
pub use wheel::{FilterWheel, POSITION_UNKNOWN, Wheel, WheelState};
