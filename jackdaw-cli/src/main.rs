use std::io::Read;
use std::path::PathBuf;

use uxn::{Uxn, UxnRam};
use varvara::Varvara;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

/// Uxn runner
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// ROM to load and execute
    rom: PathBuf,
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("JACKDAW_LOG", "info")
        .write_style_or("JACKDAW_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let mut f = std::fs::File::open(&args.rom)
        .with_context(|| format!("failed to open {:?}", args.rom))?;

    let mut rom = vec![];
    f.read_to_end(&mut rom).context("failed to read file")?;

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::new();

    let start = std::time::Instant::now();
    let result = vm.run(&mut dev);
    result.with_context(|| format!("machine fault at {:#06x}", vm.pc()))?;
    info!("halted after {:?}", start.elapsed());

    Ok(())
}
