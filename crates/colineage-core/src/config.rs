//! Configuration schema (colineage.toml)

use crate::report::ChangeSeverity;
use crate::schema::{Column, LogicalType, Nullability, Schema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// Microsoft SQL Server / T-SQL
    #[default]
    MsSql,

    /// Generic ANSI SQL
    Ansi,

    /// PostgreSQL SQL dialect
    Postgres,

    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,
}

/// Impact query settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Maximum traversal depth in hops
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    10
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Diff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Lowest severity that makes `diff` exit with the breaking status
    #[serde(default = "default_fail_on")]
    pub fail_on: ChangeSeverity,
}

fn default_fail_on() -> ChangeSeverity {
    ChangeSeverity::PotentiallyBreaking
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            fail_on: default_fail_on(),
        }
    }
}

fn default_database() -> String {
    "warehouse".to_string()
}

fn default_include() -> Vec<String> {
    vec!["*.sql".to_string()]
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQL dialect
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Database used for names without a database part (and no `USE`)
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Schema used for names without a schema part; dialect default when unset
    #[serde(default)]
    pub default_schema: Option<String>,

    /// Namespace URI prefix for reported column identifiers
    #[serde(default)]
    pub namespace: Option<String>,

    /// File name globs to analyze
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// File name globs to skip
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Canonical object name globs left out of the results
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Optional catalog file with external table schemas
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Impact query settings
    #[serde(default)]
    pub impact: ImpactConfig,

    /// Diff settings
    #[serde(default)]
    pub diff: DiffConfig,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: DialectConfig::default(),
            default_database: default_database(),
            default_schema: None,
            namespace: None,
            include: default_include(),
            exclude: Vec::new(),
            ignore: Vec::new(),
            catalog: None,
            impact: ImpactConfig::default(),
            diff: DiffConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for pattern in self.include.iter().chain(&self.exclude).chain(&self.ignore) {
            glob::Pattern::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
        }
        if self.default_database.trim().is_empty() {
            return Err(ConfigError::ParseError(
                "default_database must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a canonical object name is excluded by the `ignore` patterns
    pub fn is_ignored(&self, object: &str) -> bool {
        matches_any(&self.ignore, object)
    }

    /// Whether a file name passes the include/exclude globs
    pub fn is_included(&self, file_name: &str) -> bool {
        matches_any(&self.include, file_name) && !matches_any(&self.exclude, file_name)
    }

    /// Resolve the catalog path against the project root
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog.as_ref().map(|p| {
            if p.is_relative() {
                self.project_root.join(p)
            } else {
                p.clone()
            }
        })
    }
}

/// Case-insensitive glob match against any pattern
fn matches_any(patterns: &[String], text: &str) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches_with(text, options))
            .unwrap_or(false)
    })
}

/// A column of an external catalog table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,

    #[serde(rename = "type", default)]
    pub data_type: String,

    #[serde(default)]
    pub nullable: Option<bool>,
}

/// An external table with a known schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTable {
    /// Possibly partially qualified table name
    pub name: String,

    #[serde(default)]
    pub columns: Vec<CatalogColumn>,
}

impl CatalogTable {
    /// Convert declared columns to a schema
    pub fn schema(&self) -> Schema {
        Schema::from_columns(
            self.columns
                .iter()
                .map(|c| {
                    Column::new(c.name.clone(), LogicalType::parse(&c.data_type))
                        .with_nullability(Nullability::from_flag(c.nullable))
                })
                .collect(),
        )
    }
}

/// Catalog file (`[[tables]]` entries)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub tables: Vec<CatalogTable>,
}

impl CatalogFile {
    /// Load a catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Load a catalog from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, DialectConfig::MsSql);
        assert_eq!(config.default_database, "warehouse");
        assert_eq!(config.impact.max_depth, 10);
        assert_eq!(config.diff.fail_on, ChangeSeverity::PotentiallyBreaking);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
            dialect = "postgres"
            default_database = "analytics"
            default_schema = "public"
            ignore = ["analytics.scratch.*"]

            [impact]
            max_depth = 4

            [diff]
            fail_on = "BREAKING"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.dialect, DialectConfig::Postgres);
        assert_eq!(config.default_schema.as_deref(), Some("public"));
        assert_eq!(config.impact.max_depth, 4);
        assert_eq!(config.diff.fail_on, ChangeSeverity::Breaking);
        assert!(config.is_ignored("analytics.scratch.tmp_orders"));
        assert!(!config.is_ignored("analytics.public.orders"));
    }

    #[test]
    fn include_and_exclude_globs() {
        let mut config = Config::default();
        config.exclude = vec!["*_test.sql".to_string()];
        assert!(config.is_included("Orders.SQL"));
        assert!(!config.is_included("orders_test.sql"));
        assert!(!config.is_included("readme.md"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let result = Config::from_toml("ignore = [\"[abc\"]");
        assert!(matches!(result, Err(ConfigError::InvalidPattern(_, _))));
    }

    #[test]
    fn catalog_columns_become_schema() {
        let catalog = CatalogFile::from_toml(
            r#"
            [[tables]]
            name = "dbo.Orders"
            columns = [
                { name = "OrderID", type = "int", nullable = false },
                { name = "Status", type = "varchar(20)" },
            ]
            "#,
        )
        .unwrap();

        let schema = catalog.tables[0].schema();
        assert_eq!(schema.column_names(), vec!["OrderID", "Status"]);
        assert_eq!(schema.columns[0].nullable, Nullability::No);
        assert_eq!(schema.columns[1].logical_type, LogicalType::varchar(20));
        assert_eq!(schema.columns[1].nullable, Nullability::Unknown);
    }
}
