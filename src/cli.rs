use clap::{Args, Parser, Subcommand};
use filter_wheel::WheelConfig;
use filter_wheel::config::{DEFAULT_PATH, DEFAULT_SLOTS};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "filter-wheel", about = "Serial filter wheel control")]
pub struct Cli {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Connect and print identity and position
    Info,
    /// Print the current slot
    Pos,
    /// Move to a slot
    Goto {
        #[arg(allow_negative_numbers = true)]
        slot: i32,
    },
    /// Run the homing sequence
    Home,
    /// Poll the position at a fixed interval
    Watch(WatchOpts),
    /// Visit every slot and check the reported position
    Cycle,
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, global = true, default_value = DEFAULT_PATH)]
    pub dev: String,
    /// Baud rate
    #[arg(long, global = true, default_value_t = 115_200)]
    pub baud: u32,
    /// Number of filter slots
    #[arg(long, global = true, default_value_t = DEFAULT_SLOTS,
          value_parser = clap::value_parser!(u32).range(1..=255))]
    pub slots: u32,
    /// Wait after opening the port while the device reboots (ms)
    #[arg(long, global = true, default_value_t = 2000)]
    pub settle_ms: u64,
    /// Reply timeout for ID and POS? (ms)
    #[arg(long, global = true, default_value_t = 2000)]
    pub timeout_ms: u64,
    /// Skip HOME during connect
    #[arg(long, global = true, default_value_t = false)]
    pub no_home: bool,
    /// Talk to a simulated wheel instead of a port
    #[arg(long, global = true, default_value_t = false)]
    pub sim: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WatchOpts {
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
    /// Stop after this many polls (0 = forever)
    #[arg(long, default_value_t = 0)]
    pub count: u64,
}

impl SerialOpts {
    pub fn wheel_config(&self) -> WheelConfig {
        WheelConfig {
            path: self.dev.clone(),
            slots: self.slots,
            baud: self.baud,
            settle: Duration::from_millis(self.settle_ms),
            query_timeout: Duration::from_millis(self.timeout_ms),
            home_on_connect: !self.no_home,
            ..WheelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wheel_defaults() {
        let cli = Cli::parse_from(["filter-wheel", "pos"]);
        let cfg = cli.ser.wheel_config();
        let def = WheelConfig::default();
        assert_eq!(cfg.path, def.path);
        assert_eq!(cfg.slots, def.slots);
        assert_eq!(cfg.baud, def.baud);
        assert_eq!(cfg.settle, def.settle);
        assert_eq!(cfg.query_timeout, def.query_timeout);
        assert!(cfg.home_on_connect);
    }

    #[test]
    fn options_after_subcommand() {
        let cli = Cli::parse_from([
            "filter-wheel", "goto", "3", "--dev", "/dev/ttyACM1", "--slots", "8", "--no-home",
        ]);
        assert!(matches!(cli.cmd, Cmd::Goto { slot: 3 }));
        let cfg = cli.ser.wheel_config();
        assert_eq!(cfg.path, "/dev/ttyACM1");
        assert_eq!(cfg.slots, 8);
        assert!(!cfg.home_on_connect);
    }

    #[test]
    fn zero_slots_rejected() {
        assert!(Cli::try_parse_from(["filter-wheel", "--slots", "0", "pos"]).is_err());
    }
}
