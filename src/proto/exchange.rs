//! Request/response exchange over a [`Channel`].
//!
//! The protocol is strictly half-duplex: one command goes out, one line comes
//! back. Replies are collected a byte at a time so nothing past the
//! terminator is ever consumed from the line.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::command::Command;
use crate::error::WheelError;
use crate::port::Channel;

/// Bounds on collecting a single reply line.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    /// Longest wait for any one byte.
    pub per_read: Duration,
    /// Cap on read attempts, including ones that came back empty.
    pub max_reads: usize,
    /// Reply bytes kept before the line is cut off.
    pub max_line: usize,
}

pub fn write_command(ch: &mut dyn Channel, cmd: &Command) -> Result<(), WheelError> {
    trace!(command = %cmd, "send");
    ch.write(&cmd.encode())?;
    Ok(())
}

/// Collect one reply line. Stops at `\n`, at `max_line` bytes, after
/// `max_reads` attempts, or once `timeout` has elapsed, whichever comes first.
/// `\r` is dropped and blank lines are skipped. Returns `None` if nothing was
/// gathered.
pub fn read_line(
    ch: &mut dyn Channel,
    timeout: Duration,
    policy: &ReadPolicy,
) -> Result<Option<String>, WheelError> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::with_capacity(policy.max_line.min(256));
    let mut byte = [0u8; 1];

    for _ in 0..policy.max_reads {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if ch.read(&mut byte, remaining.min(policy.per_read))? == 0 {
            continue;
        }
        match byte[0] {
            b'\n' if line.is_empty() => continue,
            b'\n' => break,
            b'\r' => {}
            b => {
                line.push(b);
                if line.len() >= policy.max_line {
                    debug!(max = policy.max_line, "reply truncated");
                    break;
                }
            }
        }
    }

    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Throw away whatever is already waiting on the line, such as a reply that
/// showed up after its command timed out. Reads never block here and are
/// capped at `max_reads`.
pub fn drop_stale_input(ch: &mut dyn Channel, policy: &ReadPolicy) -> Result<usize, WheelError> {
    let mut buf = [0u8; 64];
    let mut dropped = 0;
    for _ in 0..policy.max_reads {
        let n = ch.read(&mut buf, Duration::ZERO)?;
        if n == 0 {
            break;
        }
        dropped += n;
    }
    ch.clear_input()?;
    Ok(dropped)
}

/// Send `cmd` and wait up to `timeout` for its reply. Stale input is dropped
/// first so a late reply to an earlier command is never taken for this one.
pub fn send_command(
    ch: &mut dyn Channel,
    cmd: &Command,
    timeout: Duration,
    policy: &ReadPolicy,
) -> Result<String, WheelError> {
    let stale = drop_stale_input(ch, policy)?;
    if stale > 0 {
        debug!(command = %cmd, bytes = stale, "dropped stale input");
    }
    write_command(ch, cmd)?;
    let started = Instant::now();
    match read_line(ch, timeout, policy)? {
        Some(reply) => {
            debug!(command = %cmd, reply = %reply, "exchange");
            Ok(reply)
        }
        None => Err(WheelError::NoResponse {
            command: cmd.to_string(),
            waited: started.elapsed(),
        }),
    }
}
