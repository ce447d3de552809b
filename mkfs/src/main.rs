//! Builds a fresh block-image file, bootstraps its root directory, and
//! optionally copies in files from the host filesystem.

use std::{fs, path::PathBuf, process::ExitCode};

use clap::Parser;
use sfs_core::{FileBlockStore, Filesystem};
use sfs_types::{BLOCK_SIZE, S_IFREG};

/// Creates a block-image filesystem and seeds it with files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path of the image file to create (overwritten if it already exists).
    #[arg(short, long)]
    output: PathBuf,

    /// Total size of the image in blocks.
    #[arg(short, long, default_value_t = 4096)]
    blocks: u32,

    /// Host files to copy into the image root, named by their base name.
    #[arg(short, long)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        log::error!("{err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: &Args) -> anyhow::Result<()> {
    let store = FileBlockStore::create(&args.output, args.blocks)?;
    let mut fs = Filesystem::mount(store)?;
    log::info!(
        "created {} ({} blocks, {} bytes each)",
        args.output.display(),
        args.blocks,
        BLOCK_SIZE,
    );

    for path in &args.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("{}: not a valid file name", path.display()))?;
        let contents = fs::read(path)?;

        let dest = format!("/{name}");
        fs.mknod(&dest, S_IFREG | 0o644)?;
        fs.write(&dest, 0, &contents)?;
        log::info!("added {dest} ({} bytes)", contents.len());
    }

    let mut store = fs.into_inner();
    store.sync()?;
    Ok(())
}
