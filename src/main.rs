use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use gbcc::config::{Config, LinkCable, default_config_path};
use gbcc_core::{
    Core,
    cartridge::Cartridge,
    hardware::CLOCKS_PER_FRAME,
    printer::PrintedImage,
};
use log::{error, info, warn};

/// Display refresh the headless vsync thread pretends to have.
const REFRESH: Duration = Duration::from_micros(16_743);
/// Roughly a minute of emulated time between battery save checks.
const AUTOSAVE_FRAMES: u64 = 3600;

#[derive(Parser)]
#[command(version, about = "Cycle-accurate Game Boy / Game Boy Color emulator")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Config file (defaults to $XDG_CONFIG_HOME/gbcc/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// GameShark or Game Genie code, may be repeated
    #[arg(long = "cheat")]
    cheats: Vec<String>,

    /// DMG palette name
    #[arg(long)]
    palette: Option<String>,

    /// Number of frames to run
    #[arg(long, conflicts_with = "cycles")]
    frames: Option<u64>,

    /// Number of clocks to run
    #[arg(long)]
    cycles: Option<u64>,

    /// Run as fast as possible
    #[arg(long)]
    turbo: bool,

    /// What is plugged into the link port
    #[arg(long, value_enum)]
    link: Option<LinkCable>,

    /// Savestate slot to load before running
    #[arg(long, value_name = "SLOT")]
    load_state: Option<u8>,

    /// Savestate slot to write after running
    #[arg(long, value_name = "SLOT")]
    save_state: Option<u8>,

    /// Don't write the battery save on exit
    #[arg(long)]
    no_save: bool,
}

/// Stand-in for a renderer: posts the frame semaphore once per refresh
/// until told to stop.
struct VsyncThread {
    quit: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl VsyncThread {
    fn spawn(core: &Core) -> Self {
        let sync = core.frame_sync();
        let quit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&quit);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(REFRESH);
                sync.post();
            }
            sync.post();
        });
        Self { quit, handle }
    }

    fn stop(self) {
        self.quit.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            warn!("Vsync thread panicked");
        }
    }
}

fn configure(core: &mut Core, cfg: &Config, args: &Args) {
    if let Some(name) = args.palette.as_ref().or(cfg.palette.as_ref()) {
        if let Err(e) = core.set_palette(name) {
            warn!("{e}");
        }
    }
    for code in cfg.cheats.iter().chain(&args.cheats) {
        if let Err(e) = core.add_cheat(code) {
            warn!("Skipping cheat {code}: {e}");
        }
    }
    core.set_link_state(args.link.unwrap_or(cfg.link_cable).into());
    core.hide_layers(cfg.hide_background, cfg.hide_window, cfg.hide_sprites);
    core.set_turbo(args.turbo || cfg.turbo);
    core.set_turbo_speed(cfg.turbo_speed);
    core.set_sync_to_video(cfg.sync_to_video && !args.turbo);
}

/// Write the battery save if the game touched SRAM since the last write.
fn autosave(core: &mut Core, save_path: Option<&Path>) {
    let Some(path) = save_path else { return };
    if core.mmu.cart.sram_dirty {
        if let Err(e) = core.save_to_file(path) {
            error!("Couldn't write {}: {e}", path.display());
        }
    }
}

/// Run until the frame or clock budget is spent, or the core reports an
/// error. Returns false on error.
fn run(core: &mut Core, args: &Args, save_path: Option<&Path>) -> bool {
    if let Some(cycles) = args.cycles {
        let mut done = 0;
        let mut batches = 0u64;
        while done < cycles && !core.error {
            let batch = (cycles - done).min(CLOCKS_PER_FRAME as u64);
            for _ in 0..batch {
                core.emulate_cycle();
            }
            done += batch;
            batches += 1;
            if batches % AUTOSAVE_FRAMES == 0 {
                autosave(core, save_path);
            }
        }
    } else {
        let mut frames = 0;
        while args.frames.is_none_or(|max| frames < max) && !core.error {
            core.run_frame();
            frames += 1;
            if frames % AUTOSAVE_FRAMES == 0 {
                autosave(core, save_path);
            }
        }
    }
    if core.error {
        error!(
            "{} (PC=0x{:04X})",
            core.error_msg.unwrap_or("Emulation stopped."),
            core.cpu.regs.pc
        );
        return false;
    }
    info!("Ran {} frames", core.frame_count());
    true
}

/// Write a printout as a binary PGM next to the save files.
fn write_printout(dir: &Path, rom: &Path, n: usize, image: &PrintedImage) {
    let stem = rom.file_stem().unwrap_or_default().to_string_lossy();
    let path = dir.join(format!("{stem}-print{n}.pgm"));
    let mut data = format!("P5\n{} {}\n255\n", image.width, image.height).into_bytes();
    data.extend_from_slice(&image.pixels);
    match fs::write(&path, data) {
        Ok(()) => info!("Printed to {}", path.display()),
        Err(e) => error!("Couldn't write {}: {e}", path.display()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = Config::load_or_default(&config_path);

    let mut core = match Core::initialise(&args.rom) {
        Ok(core) => core,
        Err(e) => {
            error!("Failed to load ROM: {e}");
            return ExitCode::FAILURE;
        }
    };
    configure(&mut core, &cfg, &args);

    let save_dir = cfg
        .save_dir
        .clone()
        .or_else(|| args.rom.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let save_path = Cartridge::save_path(&save_dir, &args.rom);
    if let Err(e) = core.load_from_file(&save_path) {
        error!("Couldn't read {}: {e}", save_path.display());
    }

    if let Some(slot) = args.load_state {
        let path = Core::savestate_path(&save_dir, &args.rom, slot);
        if let Err(e) = core.load_state_from_file(&path) {
            error!("Couldn't load state {}: {e}", path.display());
        } else if args.turbo || cfg.turbo {
            core.set_turbo(true);
        }
    }

    let vsync = (cfg.sync_to_video && !args.turbo).then(|| VsyncThread::spawn(&core));
    let ok = run(&mut core, &args, (!args.no_save).then_some(save_path.as_path()));
    if let Some(vsync) = vsync {
        vsync.stop();
    }

    let mut printouts = 0;
    while let Some(image) = core.take_printed() {
        printouts += 1;
        write_printout(&save_dir, &args.rom, printouts, &image);
    }

    if let Some(slot) = args.save_state {
        let path = Core::savestate_path(&save_dir, &args.rom, slot);
        if let Err(e) = core.save_state_to_file(&path) {
            error!("Couldn't save state {}: {e}", path.display());
        }
    }

    if !args.no_save {
        if let Err(e) = core.save_to_file(&save_path) {
            error!("Couldn't write {}: {e}", save_path.display());
        }
    }

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
