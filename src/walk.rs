//! Directory walker: batch conversion over a folder tree.
//!
//! Planning happens up front: every candidate file is paired with its
//! destination, existing destinations are skipped unless `overwrite` is set,
//! and two sources that would write the same destination are rejected before
//! anything is converted.  Jobs then run sequentially, or on the rayon pool
//! when the `parallel` feature is enabled.  The first failure aborts the walk.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::engine::convert_file;
use crate::error::{Result, TractError};
use crate::formats::Format;

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub recursive:   bool,
    pub overwrite:   bool,
    /// Destination folder; `None` writes next to each source.
    pub output_dir:  Option<PathBuf>,
    pub anatomy:     Option<PathBuf>,
    /// Source format → destination format.
    pub conversions: BTreeMap<Format, Format>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input:  PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub converted:        usize,
    pub skipped_existing: usize,
    /// Files whose extension matches no requested conversion.
    pub ignored:          usize,
    pub fibers:           u64,
}

fn destination_for(input: &Path, target: Format, output_dir: Option<&Path>) -> PathBuf {
    let name = input.with_extension(target.extension());
    match (output_dir, name.file_name()) {
        (Some(dir), Some(file)) => dir.join(file),
        _                       => name,
    }
}

/// Enumerate files under `root` and pair each with its destination.
pub fn plan(root: &Path, options: &WalkOptions) -> Result<(Vec<Job>, WalkReport)> {
    let mut walker = WalkDir::new(root).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut report  = WalkReport::default();
    let mut jobs    = Vec::new();
    let mut targets = HashSet::new();

    for entry in walker {
        let entry = entry.map_err(|e| TractError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let input = entry.path();
        let target = Format::from_path_extension(input)
            .and_then(|src| options.conversions.get(&src));
        let Some(&target) = target else {
            report.ignored += 1;
            continue;
        };

        let output = destination_for(input, target, options.output_dir.as_deref());
        if !targets.insert(output.clone()) {
            return Err(TractError::DuplicateDestination(output));
        }
        if output.exists() && !options.overwrite {
            info!("{}: destination exists, skipping", input.display());
            report.skipped_existing += 1;
            continue;
        }
        jobs.push(Job { input: input.to_path_buf(), output });
    }
    Ok((jobs, report))
}

fn run_job(job: &Job, anatomy: Option<&Path>) -> Result<u64> {
    info!("{}", job.input.display());
    convert_file(&job.input, &job.output, anatomy)
}

/// Plan, then convert every job.
pub fn walk_and_convert(root: &Path, options: &WalkOptions) -> Result<WalkReport> {
    let (jobs, mut report) = plan(root, options)?;
    info!("Processing \"{}\": {} file(s) to convert", root.display(), jobs.len());
    let anatomy = options.anatomy.as_deref();

    #[cfg(feature = "parallel")]
    let fibers: u64 = {
        use rayon::prelude::*;
        jobs.par_iter()
            .map(|job| run_job(job, anatomy))
            .collect::<Result<Vec<u64>>>()?
            .into_iter()
            .sum()
    };

    #[cfg(not(feature = "parallel"))]
    let fibers: u64 = {
        let mut total = 0;
        for job in &jobs {
            total += run_job(job, anatomy)?;
        }
        total
    };

    if report.ignored > 0 {
        warn!("{} file(s) ignored: no requested conversion matches", report.ignored);
    }
    report.converted = jobs.len();
    report.fibers    = fibers;
    info!("Conversion finished!");
    Ok(report)
}
