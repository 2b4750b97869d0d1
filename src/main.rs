use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::Level;
use tractconv::anatomy::has_anatomy_extension;
use tractconv::walk::{walk_and_convert, WalkOptions};
use tractconv::{convert_file, detect_format, merge_files, Format, Header};

#[derive(Parser)]
#[command(name = "tractconv", version, about = "Convert between tractography formats (TRK, TCK, FIB, VTK)")]
struct Cli {
    /// Log debug detail (byte order, fallback scans)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one file; the output format follows the output extension
    Convert {
        input:  PathBuf,
        output: PathBuf,
        /// Anatomy (.nii or .nii.gz) supplying TRK volume metadata
        #[arg(short, long)]
        anatomy: Option<PathBuf>,
    },
    /// Concatenate several files into one
    Merge {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        anatomy: Option<PathBuf>,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Convert every matching file in a folder
    Walk {
        #[arg(short, long)]
        input: PathBuf,
        /// Output folder (default: next to each source)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        anatomy: Option<PathBuf>,
        /// Descend into sub-folders
        #[arg(short = 'R', long)]
        recursive: bool,
        /// Overwrite existing destinations
        #[arg(short, long)]
        force: bool,
        #[command(flatten)]
        conversions: ConversionFlags,
    },
    /// Show detected format and header fields
    Info {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ConversionFlags {
    #[arg(long)] tck2trk: bool,
    #[arg(long)] tck2fib: bool,
    #[arg(long)] tck2vtk: bool,
    #[arg(long)] trk2tck: bool,
    #[arg(long)] trk2fib: bool,
    #[arg(long)] trk2vtk: bool,
    #[arg(long)] fib2tck: bool,
    #[arg(long)] fib2trk: bool,
    #[arg(long)] fib2vtk: bool,
    #[arg(long)] vtk2tck: bool,
    #[arg(long)] vtk2trk: bool,
    #[arg(long)] vtk2fib: bool,
}

impl ConversionFlags {
    fn to_map(&self) -> anyhow::Result<BTreeMap<Format, Format>> {
        use Format::*;
        let pairs = [
            (self.tck2trk, Tck, Trk), (self.tck2fib, Tck, Fib), (self.tck2vtk, Tck, Vtk),
            (self.trk2tck, Trk, Tck), (self.trk2fib, Trk, Fib), (self.trk2vtk, Trk, Vtk),
            (self.fib2tck, Fib, Tck), (self.fib2trk, Fib, Trk), (self.fib2vtk, Fib, Vtk),
            (self.vtk2tck, Vtk, Tck), (self.vtk2trk, Vtk, Trk), (self.vtk2fib, Vtk, Fib),
        ];
        let mut map = BTreeMap::new();
        for (on, src, dst) in pairs {
            if on && map.insert(src, dst).is_some() {
                bail!("only one conversion per source format ({src} requested twice)");
            }
        }
        if map.is_empty() {
            bail!("no conversion requested (e.g. --trk2tck)");
        }
        Ok(map)
    }
}

#[derive(serde::Serialize)]
struct InfoReport<'a> {
    path:   &'a Path,
    format: Format,
    header: &'a Header,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    match cli.command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, anatomy } => {
            let anatomy = checked_anatomy(anatomy)?;
            let n = convert_file(&input, &output, anatomy.as_deref())
                .with_context(|| format!("converting {} to {}", input.display(), output.display()))?;
            println!("Converted {n} streamline(s) → {}", output.display());
        }

        // ── Merge ────────────────────────────────────────────────────────────
        Commands::Merge { output, anatomy, inputs } => {
            let anatomy = checked_anatomy(anatomy)?;
            let refs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
            let n = merge_files(&refs, &output, anatomy.as_deref())
                .with_context(|| format!("merging into {}", output.display()))?;
            println!("Merged {n} streamline(s) → {}", output.display());
        }

        // ── Walk ─────────────────────────────────────────────────────────────
        Commands::Walk { input, output, anatomy, recursive, force, conversions } => {
            if !input.is_dir() {
                bail!("{} is not a folder", input.display());
            }
            if let Some(dir) = &output {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            let options = WalkOptions {
                recursive,
                overwrite:   force,
                output_dir:  output,
                anatomy:     checked_anatomy(anatomy)?,
                conversions: conversions.to_map()?,
            };
            let report = walk_and_convert(&input, &options)
                .with_context(|| format!("walking {}", input.display()))?;
            println!(
                "Converted {} file(s) ({} streamlines), {} already done, {} ignored",
                report.converted, report.fibers, report.skipped_existing, report.ignored
            );
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { file, json } => {
            let format = detect_format(&file)
                .with_context(|| format!("{} is not a supported tract file", file.display()))?;
            let reader = format.open(&file)?;
            let header = reader.header();
            if json {
                let report = InfoReport { path: &file, format, header };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("── {format} ─────────────────────────────────────────────");
                println!("  Path           {}", file.display());
                for (key, value) in header.iter() {
                    println!("  {:<22} {value}", format!("{key:?}"));
                }
                if let Some(g) = header.geometry {
                    println!("  {:<22} {:?}", "Dim", g.dim);
                    println!("  {:<22} {:?}", "VoxelSize", g.voxel_size);
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn checked_anatomy(anatomy: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    match anatomy {
        Some(path) if !has_anatomy_extension(&path) => {
            bail!("anatomy file must be .nii or .nii.gz: {}", path.display())
        }
        Some(path) if !path.is_file() => bail!("anatomy file not found: {}", path.display()),
        other => Ok(other),
    }
}
