use anyhow::{Context, Result, bail};
use clap::Parser;
use filter_wheel::port::{Opener, SerialOpener};
use filter_wheel::sim::{SimDevice, SimOpener};
use filter_wheel::{FilterWheel, POSITION_UNKNOWN, Wheel};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Cmd, WatchOpts};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.debug);

    let config = args.ser.wheel_config();
    if args.ser.sim {
        let device = SimDevice::new(config.slots)
            .with_boot_noise(config.settle / 2)
            .with_move_time(Duration::from_millis(250));
        run(Wheel::new(SimOpener::new(device), config), &args)
    } else {
        run(Wheel::new(SerialOpener, config), &args)
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run<O: Opener>(mut wheel: Wheel<O>, args: &Cli) -> Result<()> {
    if !wheel.connect() {
        bail!("could not connect to filter wheel on {}", wheel.config().path);
    }
    let result = dispatch(&mut wheel, &args.cmd);
    wheel.disconnect();
    result
}

fn dispatch<O: Opener>(wheel: &mut Wheel<O>, cmd: &Cmd) -> Result<()> {
    match cmd {
        Cmd::Info => {
            println!("identity: {}", wheel.identity().unwrap_or("-"));
            println!("slots:    {}", wheel.config().slots);
            println!("position: {}", current(wheel)?);
        }
        Cmd::Pos => println!("{}", current(wheel)?),
        Cmd::Goto { slot } => {
            if !wheel.select_filter(*slot) {
                bail!("move to slot {} failed", slot);
            }
            println!("{}", current(wheel)?);
        }
        Cmd::Home => {
            wheel.home().context("homing")?;
            println!("{}", current(wheel)?);
        }
        Cmd::Watch(opts) => watch(wheel, opts),
        Cmd::Cycle => cycle(wheel)?,
    }
    Ok(())
}

fn current<O: Opener>(wheel: &mut Wheel<O>) -> Result<i32> {
    match wheel.query_filter() {
        POSITION_UNKNOWN => bail!("position unknown"),
        slot => Ok(slot),
    }
}

fn watch<O: Opener>(wheel: &mut Wheel<O>, opts: &WatchOpts) {
    let interval = Duration::from_millis(opts.interval_ms);
    let mut last = None;
    let mut polls = 0u64;
    loop {
        let slot = wheel.query_filter();
        if last != Some(slot) {
            info!(slot, "position");
            println!("{}", slot);
            last = Some(slot);
        }
        polls += 1;
        if opts.count != 0 && polls >= opts.count {
            break;
        }
        std::thread::sleep(interval);
    }
}

fn cycle<O: Opener>(wheel: &mut Wheel<O>) -> Result<()> {
    let slots = i32::try_from(wheel.config().slots).context("slot count")?;
    let mut failed = 0;
    for n in 1..=slots {
        let ok = wheel.select_filter(n) && wheel.query_filter() == n;
        println!("slot {}: {}", n, if ok { "ok" } else { "FAIL" });
        if !ok {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} slots failed", failed, slots);
    }
    Ok(())
}
