//! End-to-end extraction
//!
//! Source discovery, per-unit analysis, object graph, resolution fold and
//! column graph. The result is an immutable [`Snapshot`].

use crate::resolver::{Catalog, SchemaResolver};
use colineage_core::{
    CatalogFile, Config, Diagnostic, DiagnosticCode, Location, ObjectBody, ObjectDescriptor,
    ObjectInfo, ObjectKind, Report, ResolvedObject,
};
use colineage_graph::{ColumnGraph, ImpactEdge, ObjectGraph};
use colineage_sql::{SourceUnit, StatementAnalyzer};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Below this many units analysis stays on the calling thread
const PARALLEL_THRESHOLD: usize = 8;

/// Run-fatal pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot read source directory {}: {message}", path.display())]
    UnreadableSource { path: PathBuf, message: String },

    #[error("cannot load catalog {}: {message}", path.display())]
    Catalog { path: PathBuf, message: String },

    #[error("cannot write {}: {message}", path.display())]
    UnwritableOutput { path: PathBuf, message: String },
}

/// Collect the SQL files under `dir` that pass the include/exclude globs
///
/// Files are returned in path order. Unreadable individual files are
/// skipped with a warning; an unreadable directory is an error.
pub fn discover(dir: &Path, config: &Config) -> Result<Vec<SourceUnit>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::UnreadableSource {
            path: dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let mut units = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::UnreadableSource {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let file_name = entry.file_name().to_string_lossy();
        let relative_text = relative.to_string_lossy().replace('\\', "/");
        if !config.is_included(&file_name) && !config.is_included(&relative_text) {
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(text) => {
                let stem = entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                units.push(SourceUnit::new(stem, text).with_path(relative_text));
            }
            Err(error) => {
                tracing::warn!(file = %entry.path().display(), error = %error, "skipping unreadable file");
            }
        }
    }

    tracing::info!(dir = %dir.display(), files = units.len(), "discovered sources");
    Ok(units)
}

/// Fully resolved state of one corpus
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Resolved objects in topological order
    pub objects: Vec<ResolvedObject>,

    pub graph: ObjectGraph,

    pub column_graph: ColumnGraph,

    /// Every diagnostic of the run
    pub diagnostics: Vec<Diagnostic>,
}

impl Snapshot {
    /// Look up a resolved object by canonical name
    pub fn get(&self, name: &str) -> Option<&ResolvedObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Descriptors for every object with a known schema, minus ignored ones
    pub fn descriptors(&self, config: &Config) -> Vec<ObjectDescriptor> {
        self.objects
            .iter()
            .filter(|o| o.has_schema() && !is_ignored(config, &o.name))
            .map(|o| ObjectDescriptor::new(o, config.namespace.as_deref()))
            .collect()
    }

    /// Diagnostics report with graph statistics
    pub fn report(&self) -> Report {
        Report::from_diagnostics(self.diagnostics.clone()).with_graph(
            self.objects.len(),
            self.column_graph.edge_count(),
            self.column_graph.fingerprint(),
        )
    }

    /// Impact query against the column graph
    pub fn impact(&self, selector: &str, max_depth: usize) -> Vec<ImpactEdge> {
        self.column_graph.impact(selector, max_depth)
    }

    /// Write one `<object>.json` per descriptor plus `report.json`
    pub fn write(&self, out_dir: &Path, config: &Config) -> Result<usize, PipelineError> {
        let unwritable = |path: &Path, message: String| PipelineError::UnwritableOutput {
            path: path.to_path_buf(),
            message,
        };

        std::fs::create_dir_all(out_dir).map_err(|e| unwritable(out_dir, e.to_string()))?;

        let descriptors = self.descriptors(config);
        for descriptor in &descriptors {
            let path = out_dir.join(format!("{}.json", descriptor.name));
            let json = serde_json::to_string_pretty(descriptor)
                .map_err(|e| unwritable(&path, e.to_string()))?;
            std::fs::write(&path, json).map_err(|e| unwritable(&path, e.to_string()))?;
        }

        let path = out_dir.join("report.json");
        let json = serde_json::to_string_pretty(&self.report())
            .map_err(|e| unwritable(&path, e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| unwritable(&path, e.to_string()))?;

        tracing::info!(dir = %out_dir.display(), objects = descriptors.len(), "wrote descriptors");
        Ok(descriptors.len())
    }
}

/// Analysis and resolution driver for one configuration
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    analyzer: StatementAnalyzer,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let analyzer = StatementAnalyzer::for_config(&config);
        Self { config, analyzer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover, load the configured catalog and run
    pub fn run_dir(&self, dir: &Path) -> Result<Snapshot, PipelineError> {
        let units = discover(dir, &self.config)?;
        let catalog = self.load_catalog()?;
        Ok(self.run(&units, &catalog))
    }

    /// External table schemas named by the configuration
    pub fn load_catalog(&self) -> Result<CatalogFile, PipelineError> {
        match self.config.catalog_path() {
            Some(path) => CatalogFile::from_file(&path).map_err(|e| PipelineError::Catalog {
                path,
                message: e.to_string(),
            }),
            None => Ok(CatalogFile::default()),
        }
    }

    /// Run over an in-memory set of units; input order does not matter
    pub fn run(&self, units: &[SourceUnit], catalog: &CatalogFile) -> Snapshot {
        tracing::info!(units = units.len(), dialect = self.analyzer.dialect().name(), "analyzing");
        let analyzed = self.analyze(units);

        let mut diagnostics = Vec::new();
        let mut objects = dedup_objects(analyzed, &mut diagnostics);
        self.register_catalog(catalog, &mut objects);

        tracing::info!(objects = objects.len(), "building object graph");
        let graph = ObjectGraph::build(&objects);

        let mut by_name: BTreeMap<String, ObjectInfo> = objects
            .into_iter()
            .flat_map(ObjectInfo::flatten)
            .map(|o| (o.name.clone(), o))
            .collect();

        tracing::info!(objects = by_name.len(), "resolving schemas");
        let mut catalog = Catalog::new();
        let mut resolved = Vec::with_capacity(by_name.len());
        for name in graph.topological_order() {
            let Some(object) = by_name.remove(name) else {
                continue;
            };
            let result = SchemaResolver::resolve(&object, &catalog);
            catalog.insert(result.clone());
            resolved.push(result);
        }

        for object in &resolved {
            diagnostics.extend(object.diagnostics.iter().cloned());
        }
        diagnostics.extend(graph.diagnostics().iter().cloned());

        let column_graph = ColumnGraph::build(&resolved);
        tracing::info!(
            columns = column_graph.node_count(),
            edges = column_graph.edge_count(),
            "column graph ready"
        );

        Snapshot {
            objects: resolved,
            graph,
            column_graph,
            diagnostics,
        }
    }

    /// Analyze every unit with a fresh context, in parallel above a threshold
    fn analyze(&self, units: &[SourceUnit]) -> Vec<ObjectInfo> {
        let analyze = |unit: &SourceUnit| self.analyzer.analyze(unit, self.analyzer.context(&self.config));
        if units.len() > PARALLEL_THRESHOLD {
            units.par_iter().map(analyze).collect()
        } else {
            units.iter().map(analyze).collect()
        }
    }

    /// Add catalog tables the corpus does not define itself
    fn register_catalog(&self, catalog: &CatalogFile, objects: &mut Vec<ObjectInfo>) {
        let ctx = self.analyzer.context(&self.config);
        for table in &catalog.tables {
            let Some(name) = ctx.qualify(&table.name) else {
                tracing::warn!(table = %table.name, "skipping catalog table with an invalid name");
                continue;
            };
            if objects.iter().any(|o| o.name == name) {
                continue;
            }
            objects.push(
                ObjectInfo::new(name, ObjectKind::Table).with_body(ObjectBody::Declared(table.schema())),
            );
        }
    }
}

/// Keep one definition per canonical name: the one from the first source
/// path, so the choice does not depend on analysis order
fn dedup_objects(mut objects: Vec<ObjectInfo>, diagnostics: &mut Vec<Diagnostic>) -> Vec<ObjectInfo> {
    objects.sort_by(|a, b| (&a.name, &a.source).cmp(&(&b.name, &b.source)));

    let mut kept: Vec<ObjectInfo> = Vec::with_capacity(objects.len());
    for object in objects {
        match kept.last() {
            Some(previous) if previous.name == object.name => {
                tracing::warn!(
                    object = %object.name,
                    kept = previous.source.as_deref().unwrap_or("<memory>"),
                    dropped = object.source.as_deref().unwrap_or("<memory>"),
                    "duplicate object definition"
                );
                let mut diagnostic = Diagnostic::warn(
                    DiagnosticCode::DuplicateObject,
                    format!(
                        "'{}' is defined more than once; keeping {}",
                        object.name,
                        previous.source.as_deref().unwrap_or("the first definition")
                    ),
                )
                .with_object(object.name.clone());
                if let Some(source) = &object.source {
                    diagnostic = diagnostic.with_location(Location::new(source.clone()));
                }
                diagnostics.push(diagnostic);
            }
            _ => kept.push(object),
        }
    }
    kept
}

/// Ignore globs match either the canonical name or its `schema.name` tail
fn is_ignored(config: &Config, name: &str) -> bool {
    config.is_ignored(name)
        || name
            .split_once('.')
            .is_some_and(|(_, tail)| config.is_ignored(tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(name: &str, text: &str) -> SourceUnit {
        SourceUnit::new(name, text).with_path(format!("{}.sql", name))
    }

    #[test]
    fn duplicates_keep_first_path() {
        let pipeline = Pipeline::new(Config::default());
        let snapshot = pipeline.run(
            &[
                unit("b_orders", "CREATE TABLE dbo.orders (id INT, extra INT)"),
                unit("a_orders", "CREATE TABLE dbo.orders (id INT)"),
            ],
            &CatalogFile::default(),
        );
        let orders = snapshot.get("warehouse.dbo.orders").unwrap();
        assert_eq!(orders.schema.column_names(), vec!["id"]);
        assert!(snapshot
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::DuplicateObject));
    }

    #[test]
    fn catalog_tables_feed_resolution() {
        let catalog = CatalogFile::from_toml(
            r#"
            [[tables]]
            name = "dbo.customers"
            columns = [
                { name = "id", type = "INT", nullable = false },
                { name = "name", type = "NVARCHAR(100)" },
            ]
            "#,
        )
        .unwrap();
        let pipeline = Pipeline::new(Config::default());
        let snapshot = pipeline.run(
            &[unit("v", "CREATE VIEW dbo.v AS SELECT * FROM dbo.customers")],
            &catalog,
        );
        let view = snapshot.get("warehouse.dbo.v").unwrap();
        assert_eq!(view.schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn ignored_objects_are_not_described() {
        let config = Config {
            ignore: vec!["dbo.tmp_*".to_string()],
            ..Config::default()
        };
        let pipeline = Pipeline::new(config.clone());
        let snapshot = pipeline.run(
            &[
                unit("keep", "CREATE TABLE dbo.keep (id INT)"),
                unit("tmp", "CREATE TABLE dbo.tmp_scratch (id INT)"),
            ],
            &CatalogFile::default(),
        );
        let names: Vec<String> = snapshot.descriptors(&config).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["warehouse.dbo.keep"]);
    }
}
