mod config;
mod frame;
mod saves;

use anyhow::{Context, bail};
use clap::Parser;
use log::{LevelFilter, error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tickboy_core::{EmuError, GameBoy, ModeSelect, cartridge::Cartridge};

use config::Config;
use saves::SaveFiles;

/// Frames per second of the real LCD.
const FRAME_RATE: f64 = 59.7275;

#[derive(Parser)]
#[command(name = "tickboy", version, about = "Headless Game Boy / Game Boy Color emulator")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Force DMG mode
    #[arg(long)]
    dmg: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Stop after this many seconds of wall time
    #[arg(long)]
    seconds: Option<u64>,

    /// Run as fast as possible
    #[arg(long)]
    no_pacing: bool,

    /// Write the last frame to this path as a PNG image
    #[arg(long, value_name = "PATH")]
    dump_frame: Option<PathBuf>,

    /// Print serial output to stdout
    #[arg(long)]
    serial: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Store the effective settings in the config file before running
    #[arg(long)]
    write_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Effective settings once flags are layered over the config file.
struct Settings {
    mode: ModeSelect,
    pacing: bool,
    save_interval: Duration,
    print_serial: bool,
    frame_limit: Option<u64>,
    time_limit: Option<Duration>,
}

impl Settings {
    fn merge(args: &Args, cfg: &Config) -> Self {
        Self {
            mode: if args.dmg {
                ModeSelect::Dmg
            } else {
                cfg.mode.into()
            },
            pacing: cfg.pacing && !args.no_pacing,
            save_interval: Duration::from_millis(cfg.save_interval_ms.max(1)),
            print_serial: cfg.print_serial || args.serial,
            frame_limit: args.frames,
            time_limit: args.seconds.map(Duration::from_secs),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<EmuError>() {
                Some(emu) if emu.is_guest_hang() => error!("Guest program hung: {err:#}"),
                _ => error!("{err:#}"),
            }
            eprintln!("tickboy: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    if args.config.is_some() && !args.write_config && !config_path.exists() {
        bail!("config file {} does not exist", config_path.display());
    }
    let cfg = config::load_from_file(&config_path);
    let settings = Settings::merge(args, &cfg);
    if args.write_config {
        let effective = Config {
            mode: if args.dmg {
                config::EmulationMode::Dmg
            } else {
                cfg.mode
            },
            pacing: settings.pacing,
            save_interval_ms: cfg.save_interval_ms,
            print_serial: settings.print_serial,
        };
        config::save_to_file(&config_path, &effective)
            .with_context(|| format!("failed to write config {}", config_path.display()))?;
        info!("Saved settings to {}", config_path.display());
    }

    let data = std::fs::read(&args.rom)
        .with_context(|| format!("failed to read ROM {}", args.rom.display()))?;
    let cart = Cartridge::from_bytes(data)
        .with_context(|| format!("failed to load ROM {}", args.rom.display()))?;
    let mut gb = GameBoy::new(cart, settings.mode)?;
    info!(
        "Running {:?} in {} mode",
        gb.title(),
        if gb.is_cgb() { "CGB" } else { "DMG" }
    );

    let saves = SaveFiles::for_rom(&args.rom);
    saves.restore(&mut gb)?;
    if gb.has_battery() {
        info!("Battery RAM is kept in {}", saves.ram_path().display());
    }
    if gb.mmu.cart.has_rtc() {
        info!("Clock state is kept in {}", saves.rtc_path().display());
    }

    let result = emulate(&mut gb, &settings, &saves);
    saves.flush_all(&mut gb);
    result?;

    if let Some(path) = &args.dump_frame {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        frame::write_png(&mut out, &gb.framebuffer()[..])
            .with_context(|| format!("failed to encode {}", path.display()))?;
        out.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote frame {} to {}", gb.frame_count(), path.display());
    }
    Ok(())
}

fn emulate(gb: &mut GameBoy, settings: &Settings, saves: &SaveFiles) -> anyhow::Result<()> {
    let frame_time = Duration::from_secs_f64(1.0 / FRAME_RATE);
    let start = Instant::now();
    let mut next_frame = start + frame_time;
    let mut last_flush = start;
    let mut frames = 0u64;
    let stdout = std::io::stdout();

    loop {
        if settings.frame_limit.is_some_and(|max| frames >= max) {
            break;
        }
        if settings.time_limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }

        gb.run_frame()
            .with_context(|| format!("emulation stopped after {frames} frames"))?;
        frames += 1;

        if settings.print_serial {
            let serial = gb.take_serial();
            if !serial.is_empty() {
                let mut out = stdout.lock();
                out.write_all(frame::escape_serial(&serial).as_bytes())?;
                out.flush()?;
            }
        }

        if last_flush.elapsed() >= settings.save_interval {
            saves.flush_dirty(gb);
            last_flush = Instant::now();
        }

        if settings.pacing {
            let now = Instant::now();
            if next_frame > now {
                std::thread::sleep(next_frame - now);
            } else if now - next_frame > frame_time {
                // Too far behind to catch up; resync instead of bursting.
                next_frame = now;
            }
            next_frame += frame_time;
        }
    }

    info!(
        "Ran {frames} frames ({} machine cycles) in {:.2?}",
        gb.cpu.cycles,
        start.elapsed()
    );
    Ok(())
}
