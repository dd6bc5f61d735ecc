use anyhow::{bail, Context, Result};
use clap::Parser;
use log::debug;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use vsfs::io::{BlockStorage, FileBlockEmulator};
use vsfs::{CheckReport, Geometry, ValidationReport, Vsfs};

/// Checks a VSFS image and repairs its bitmaps and inode pointers in place.
#[derive(Parser, Debug)]
#[command(name = "vsfsck", version)]
struct Args {
    /// Path to the image. Prompted for on standard input when omitted.
    image: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let path = match args.image {
        Some(path) => path,
        None => prompt_for_image(&mut io::stdin().lock(), &mut io::stdout())?,
    };

    let mut out = io::stdout().lock();
    check_image(&path, &mut out)
}

fn prompt_for_image<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<PathBuf> {
    write!(output, "Enter the file name of the VSFS image: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("failed to read image path")?;
    let name = line.trim();
    if name.is_empty() {
        bail!("no image path given");
    }
    Ok(PathBuf::from(name))
}

fn check_image<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let dev = FileBlockEmulator::open_disk(path, Geometry::VSFS.total_blocks)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut fs = Vsfs::open(dev).with_context(|| format!("failed to read {}", path.display()))?;
    write_validation(out, fs.validation())?;

    let report = fs
        .check()
        .with_context(|| format!("failed to repair {}", path.display()))?;
    debug!(
        "{} repairs over {} rounds",
        report.repairs().count(),
        report.rounds.len()
    );
    write_report(out, &report)?;
    Ok(())
}

fn write_validation<W: Write>(out: &mut W, validation: &ValidationReport) -> io::Result<()> {
    writeln!(out, "Superblock Validation:")?;
    for check in &validation.checks {
        writeln!(out, "  {}", check)?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &CheckReport) -> io::Result<()> {
    for round in &report.rounds {
        writeln!(out, "\nInode and Data Bitmap Consistency:")?;
        for repair in &round.inodes {
            writeln!(out, "  FIX: {}", repair)?;
        }
        writeln!(out, "\nFixing data bitmap inconsistencies:")?;
        for repair in &round.data_bitmap {
            writeln!(out, "  FIX: {}", repair)?;
        }
    }
    writeln!(
        out,
        "\nAll detected issues have been fixed. Re-check with this tool to verify."
    )
}
