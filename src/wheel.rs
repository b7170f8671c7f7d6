//! Filter wheel engine.
//!
//! [`Wheel`] owns at most one open channel and drives the connect handshake
//! and the request/response exchanges on it. [`FilterWheel`] is the surface a
//! host framework adapter calls; it reports failures as `false` / `-1` and
//! leaves the details in the log.

use tracing::{debug, error, info, warn};

use crate::config::WheelConfig;
use crate::error::WheelError;
use crate::port::{Channel, Opener};
use crate::proto::command::Command;
use crate::proto::exchange::send_command;
use crate::proto::parser::{is_ack, parse_position};

/// Returned by [`FilterWheel::query_filter`] when the position is unknown.
pub const POSITION_UNKNOWN: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelState {
    Disconnected,
    Ready,
}

/// What the host framework needs from a filter wheel.
pub trait FilterWheel {
    fn connect(&mut self) -> bool;
    fn disconnect(&mut self);
    fn select_filter(&mut self, position: i32) -> bool;
    /// Current slot, or [`POSITION_UNKNOWN`].
    fn query_filter(&mut self) -> i32;
}

pub struct Wheel<O: Opener> {
    opener: O,
    config: WheelConfig,
    channel: Option<O::Channel>,
    identity: Option<String>,
    position: Option<u32>,
}

impl<O: Opener> Wheel<O> {
    pub fn new(opener: O, config: WheelConfig) -> Self {
        Self {
            opener,
            config,
            channel: None,
            identity: None,
            position: None,
        }
    }

    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    pub fn state(&self) -> WheelState {
        match self.channel {
            Some(_) => WheelState::Ready,
            None => WheelState::Disconnected,
        }
    }

    /// Identity reported by the device during the last handshake.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Last known slot. `None` until a query or move succeeds, and after any
    /// of them fails.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Open the line and run the handshake:
    /// open, configure, settle, flush, `ID`, optional `HOME`, `POS?`.
    ///
    /// Any failure drops the freshly opened channel before returning, so the
    /// wheel is left disconnected and can be connected again from scratch.
    pub fn open(&mut self) -> Result<(), WheelError> {
        if self.channel.is_some() {
            debug!(path = %self.config.path, "already connected");
            return Ok(());
        }
        let cfg = &self.config;
        let settings = cfg.line_settings();

        let mut ch = self.opener.open(&cfg.path, &settings)?;
        ch.configure(&settings)?;
        debug!(settle = ?cfg.settle, "waiting for device boot");
        std::thread::sleep(cfg.settle);
        ch.discard_input(cfg.flush_window)?;

        let identity = identify(&mut ch, cfg)?;
        info!(path = %cfg.path, identity = %identity, "wheel connected");

        if cfg.home_on_connect {
            // Best effort: a failed home does not fail the connection.
            if let Err(e) = home(&mut ch, cfg) {
                if e.is_transport() {
                    return Err(e);
                }
                warn!(error = %e, "homing failed, continuing");
            }
        }

        let position = match query_position(&mut ch, cfg) {
            Ok(p) => Some(p),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                warn!(error = %e, "initial position unknown");
                None
            }
        };

        self.channel = Some(ch);
        self.identity = Some(identity);
        self.position = position;
        Ok(())
    }

    /// Release the channel. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(ch) = self.channel.take() {
            drop(ch);
            info!(path = %self.config.path, "wheel disconnected");
        }
        self.identity = None;
        self.position = None;
    }

    fn channel(&mut self) -> Result<&mut O::Channel, WheelError> {
        self.channel.as_mut().ok_or(WheelError::NotConnected)
    }

    pub fn identify(&mut self) -> Result<String, WheelError> {
        let cfg = self.config.clone();
        identify(self.channel()?, &cfg)
    }

    pub fn home(&mut self) -> Result<(), WheelError> {
        let cfg = self.config.clone();
        let result = home(self.channel()?, &cfg);
        // The wheel has moved; only a fresh query says where to.
        self.position = None;
        result
    }

    pub fn query_position(&mut self) -> Result<u32, WheelError> {
        let cfg = self.config.clone();
        let result = query_position(self.channel()?, &cfg);
        self.position = result.as_ref().ok().copied();
        result
    }

    /// Move to `slot`. Requests outside `1..=slots` fail before anything is
    /// written to the line.
    pub fn select_position(&mut self, slot: i64) -> Result<(), WheelError> {
        let slots = self.config.slots;
        let target = u32::try_from(slot)
            .ok()
            .filter(|n| (1..=slots).contains(n))
            .ok_or(WheelError::OutOfRange {
                requested: slot,
                slots,
            })?;

        let cfg = self.config.clone();
        let cmd = Command::Goto(target);
        let result = send_command(self.channel()?, &cmd, cfg.move_timeout, &cfg.read_policy())
            .and_then(|reply| {
                if is_ack(&reply) {
                    Ok(())
                } else {
                    Err(WheelError::DeviceRejected {
                        command: cmd.to_string(),
                        response: reply,
                    })
                }
            });
        self.position = result.as_ref().ok().map(|_| target);
        result
    }
}

fn identify(ch: &mut dyn Channel, cfg: &WheelConfig) -> Result<String, WheelError> {
    send_command(ch, &Command::Id, cfg.query_timeout, &cfg.read_policy())
}

fn home(ch: &mut dyn Channel, cfg: &WheelConfig) -> Result<(), WheelError> {
    // Any reply line counts as done.
    send_command(ch, &Command::Home, cfg.home_timeout, &cfg.read_policy()).map(|_| ())
}

fn query_position(ch: &mut dyn Channel, cfg: &WheelConfig) -> Result<u32, WheelError> {
    let reply = send_command(ch, &Command::Position, cfg.query_timeout, &cfg.read_policy())?;
    parse_position(&reply, cfg.slots).map_err(|e| {
        debug!(error = %e, "position parse");
        WheelError::InvalidPosition { raw: reply }
    })
}

fn log_failure(op: &str, err: &WheelError) {
    match err {
        WheelError::DeviceRejected { command, response } => {
            error!(op, command = %command, response = %response, "device rejected command");
        }
        WheelError::InvalidPosition { raw } => {
            error!(op, response = %raw, "invalid position report");
        }
        WheelError::NoResponse { command, waited } => {
            error!(op, command = %command, waited = ?waited, "no response");
        }
        other => error!(op, error = %other, "operation failed"),
    }
}

impl<O: Opener> FilterWheel for Wheel<O> {
    fn connect(&mut self) -> bool {
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                log_failure("connect", &e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.close();
    }

    fn select_filter(&mut self, position: i32) -> bool {
        match self.select_position(i64::from(position)) {
            Ok(()) => {
                info!(slot = position, "filter selected");
                true
            }
            Err(e) => {
                log_failure("select_filter", &e);
                false
            }
        }
    }

    fn query_filter(&mut self) -> i32 {
        match self.query_position() {
            Ok(slot) => i32::try_from(slot).unwrap_or(POSITION_UNKNOWN),
            Err(e) => {
                log_failure("query_filter", &e);
                POSITION_UNKNOWN
            }
        }
    }
}
