//! Schema resolution, end-to-end pipeline and diff
//!
//! [`Pipeline`] turns a set of source units into a [`Snapshot`]: objects
//! resolved in dependency order by the [`SchemaResolver`], plus the object
//! and column graphs. [`DiffEngine`] compares two snapshots.

pub mod diff;
pub mod pipeline;
pub mod resolver;

pub use diff::{DiffEngine, DEFAULT_IMPACT_DEPTH};
pub use pipeline::{discover, Pipeline, PipelineError, Snapshot};
pub use resolver::{Catalog, SchemaResolver, STAR_COLUMN};

use colineage_core::{Config, DiffReport};
use std::path::Path;

/// Run base and head pipelines concurrently and compare them
pub fn diff_dirs(config: &Config, base: &Path, head: &Path) -> Result<DiffReport, PipelineError> {
    let pipeline = Pipeline::new(config.clone());
    let (base, head) = rayon::join(|| pipeline.run_dir(base), || pipeline.run_dir(head));
    let (base, head) = (base?, head?);
    Ok(DiffEngine::new(config.impact.max_depth).compare(&base, &head))
}
