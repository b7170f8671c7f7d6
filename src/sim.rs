//! Simulated filter wheel.
//!
//! Behaves like the microcontroller on the other end of the line: it reboots
//! when opened and babbles until it has booted, then answers `ID`, `HOME`,
//! `POS?` and `GOTO n` one line at a time. Replies can be overridden per verb
//! and the line can be made to drop writes, so error paths are reachable
//! without hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::port::{Channel, LineSettings, Opener, PortError};
use crate::proto::command::Command;
use crate::proto::parser::parse_command;

pub const DEFAULT_IDENTITY: &str = "DIY Filter Wheel v1.0";

const BOOT_NOISE: &[u8] = b"\x00\xfe\xff#rst cause:2 boot(3,7)\r\n\x1b[0m~ld";
const POLL: Duration = Duration::from_millis(5);

/// What the device sends back for a verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A line; the device appends `\r\n`.
    Line(String),
    /// Bytes exactly as given.
    Raw(Vec<u8>),
    /// Nothing at all.
    Silent,
}

#[derive(Debug)]
pub struct SimDevice {
    slots: u32,
    position: u32,
    identity: String,
    boot_time: Duration,
    booted_at: Option<Instant>,
    move_time: Duration,
    overrides: HashMap<&'static str, Reply>,
    silent: bool,
    write_limit: Option<usize>,
    fail_open: bool,
    fail_configure: bool,

    partial: Vec<u8>,
    outbox: VecDeque<(Instant, Vec<u8>)>,
    rx: VecDeque<u8>,

    requests: Vec<String>,
    writes: usize,
    opens: usize,
    closes: usize,
}

impl SimDevice {
    pub fn new(slots: u32) -> Self {
        Self {
            slots,
            position: 1,
            identity: DEFAULT_IDENTITY.to_string(),
            boot_time: Duration::ZERO,
            booted_at: None,
            move_time: Duration::ZERO,
            overrides: HashMap::new(),
            silent: false,
            write_limit: None,
            fail_open: false,
            fail_configure: false,
            partial: Vec::new(),
            outbox: VecDeque::new(),
            rx: VecDeque::new(),
            requests: Vec::new(),
            writes: 0,
            opens: 0,
            closes: 0,
        }
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Emit noise and ignore requests for `boot` after every open.
    pub fn with_boot_noise(mut self, boot: Duration) -> Self {
        self.boot_time = boot;
        self
    }

    /// Delay before a `GOTO` or `HOME` reply shows up.
    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    pub fn with_reply(mut self, verb: &'static str, reply: Reply) -> Self {
        self.overrides.insert(verb, reply);
        self
    }

    /// Never answer anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Accept at most `limit` bytes per write call.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    fn booting(&self, now: Instant) -> bool {
        self.booted_at.is_some_and(|at| now < at)
    }

    fn reboot(&mut self, now: Instant) {
        self.booted_at = Some(now + self.boot_time);
        self.partial.clear();
        self.outbox.clear();
        self.rx.clear();
        if !self.boot_time.is_zero() {
            self.rx.extend(BOOT_NOISE);
        }
    }

    fn pump(&mut self, now: Instant) {
        if self.booting(now) {
            self.rx.extend(BOOT_NOISE);
        }
        while let Some((ready, _)) = self.outbox.front() {
            if *ready > now {
                break;
            }
            if let Some((_, bytes)) = self.outbox.pop_front() {
                self.rx.extend(bytes);
            }
        }
    }

    fn receive(&mut self, bytes: &[u8], now: Instant) {
        for &b in bytes {
            if b != b'\n' {
                self.partial.push(b);
                continue;
            }
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            if self.booting(now) {
                trace!(line = %line, "sim: dropped request during boot");
                continue;
            }
            self.requests.push(line.clone());
            self.answer(&line, now);
        }
    }

    fn answer(&mut self, line: &str, now: Instant) {
        let (verb, reply, delay) = match parse_command(line) {
            Ok(cmd) => {
                let (reply, delay) = self.execute(cmd);
                (cmd.verb(), reply, delay)
            }
            Err(e) => ("", Reply::Line(format!("ERR {}", e)), Duration::ZERO),
        };
        let reply = self.overrides.get(verb).cloned().unwrap_or(reply);
        if self.silent {
            return;
        }
        let bytes = match reply {
            Reply::Line(text) => format!("{}\r\n", text).into_bytes(),
            Reply::Raw(bytes) => bytes,
            Reply::Silent => return,
        };
        self.outbox.push_back((now + delay, bytes));
    }

    fn execute(&mut self, cmd: Command) -> (Reply, Duration) {
        match cmd {
            Command::Id => (Reply::Line(self.identity.clone()), Duration::ZERO),
            Command::Home => {
                self.position = 1;
                (Reply::Line("OK".into()), self.move_time)
            }
            Command::Position => (Reply::Line(format!("POS {}", self.position)), Duration::ZERO),
            Command::Goto(n) if (1..=self.slots).contains(&n) => {
                self.position = n;
                (Reply::Line("OK".into()), self.move_time)
            }
            Command::Goto(_) => (Reply::Line("ERR bad slot".into()), Duration::ZERO),
        }
    }
}

/// Shared view of a simulated device, kept by tests after the channel has
/// been handed to the wheel.
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<Mutex<SimDevice>>);

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimDevice> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete request lines the device accepted, in order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of write calls that reached the device, accepted or not.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn position(&self) -> u32 {
        self.lock().position
    }

    pub fn set_position(&self, position: u32) {
        self.lock().position = position;
    }

    pub fn set_reply(&self, verb: &'static str, reply: Reply) {
        self.lock().overrides.insert(verb, reply);
    }

    pub fn clear_reply(&self, verb: &'static str) {
        self.lock().overrides.remove(verb);
    }

    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }
}

pub struct SimOpener {
    device: SimHandle,
}

impl SimOpener {
    pub fn new(device: SimDevice) -> Self {
        Self {
            device: SimHandle(Arc::new(Mutex::new(device))),
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.device.clone()
    }
}

impl Opener for SimOpener {
    type Channel = SimChannel;

    fn open(&mut self, path: &str, _settings: &LineSettings) -> Result<SimChannel, PortError> {
        let mut dev = self.device.lock();
        if dev.fail_open {
            return Err(PortError::ChannelUnavailable {
                path: path.to_string(),
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device"),
            });
        }
        dev.opens += 1;
        dev.reboot(Instant::now());
        drop(dev);
        Ok(SimChannel {
            device: self.device.clone(),
        })
    }
}

pub struct SimChannel {
    device: SimHandle,
}

impl Channel for SimChannel {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), PortError> {
        if self.device.lock().fail_configure {
            return Err(PortError::Configuration(serialport::Error::new(
                serialport::ErrorKind::InvalidInput,
                format!("baud {} not supported", settings.baud),
            )));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        let start = Instant::now();
        loop {
            {
                let mut dev = self.device.lock();
                dev.pump(Instant::now());
                if !dev.rx.is_empty() {
                    let n = buf.len().min(dev.rx.len());
                    for (slot, b) in buf.iter_mut().zip(dev.rx.drain(..n)) {
                        *slot = b;
                    }
                    return Ok(n);
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(0);
            }
            std::thread::sleep(POLL.min(timeout - elapsed));
        }
    }

    fn write_some(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
        let mut dev = self.device.lock();
        dev.writes += 1;
        let accepted = dev.write_limit.map_or(bytes.len(), |l| l.min(bytes.len()));
        dev.receive(&bytes[..accepted], Instant::now());
        Ok(accepted)
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        let mut dev = self.device.lock();
        dev.pump(Instant::now());
        dev.rx.clear();
        Ok(())
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        self.device.lock().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(device: SimDevice) -> (SimChannel, SimHandle) {
        let mut opener = SimOpener::new(device);
        let handle = opener.handle();
        let ch = opener
            .open("sim", &LineSettings::default())
            .ok()
            .expect("sim open");
        (ch, handle)
    }

    fn read_all(ch: &mut SimChannel) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let n = ch.read(&mut buf, Duration::from_millis(20)).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn answers_requests() {
        let (mut ch, handle) = open(SimDevice::new(5));
        ch.write(b"GOTO 4\nPOS?\n").unwrap();
        assert_eq!(read_all(&mut ch), "OK\r\nPOS 4\r\n");
        assert_eq!(handle.requests(), vec!["GOTO 4", "POS?"]);
        assert_eq!(handle.position(), 4);
    }

    #[test]
    fn bad_slot_is_refused() {
        let (mut ch, handle) = open(SimDevice::new(5).with_position(2));
        ch.write(b"GOTO 9\n").unwrap();
        assert_eq!(read_all(&mut ch), "ERR bad slot\r\n");
        assert_eq!(handle.position(), 2);
    }

    #[test]
    fn override_replaces_reply() {
        let (mut ch, _) = open(SimDevice::new(5).with_reply("POS?", Reply::Raw(b"pos=3 ok\n".to_vec())));
        ch.write(b"POS?\n").unwrap();
        assert_eq!(read_all(&mut ch), "pos=3 ok\n");
    }

    #[test]
    fn ignores_requests_while_booting() {
        let (mut ch, handle) = open(SimDevice::new(5).with_boot_noise(Duration::from_millis(100)));
        ch.write(b"ID\n").unwrap();
        assert!(handle.requests().is_empty());
        std::thread::sleep(Duration::from_millis(120));
        ch.discard_input(Duration::from_millis(50)).unwrap();
        ch.write(b"ID\n").unwrap();
        assert_eq!(read_all(&mut ch), format!("{}\r\n", DEFAULT_IDENTITY));
    }

    #[test]
    fn drop_counts_close() {
        let (ch, handle) = open(SimDevice::new(5));
        assert_eq!(handle.opens(), 1);
        drop(ch);
        assert_eq!(handle.closes(), 1);
    }
}
