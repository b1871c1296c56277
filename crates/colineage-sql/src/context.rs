//! Per-unit analysis inputs

use colineage_core::object::{is_temp_name, temp_object_name};
use colineage_core::QualifiedName;

/// One source file (or in-memory text) to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Object name used when the text does not declare one (file stem)
    pub name_hint: String,

    /// Path relative to the scanned directory
    pub path: Option<String>,

    /// Raw SQL text
    pub text: String,
}

impl SourceUnit {
    pub fn new(name_hint: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name_hint: name_hint.into(),
            path: None,
            text: text.into(),
        }
    }

    /// Set the source path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Name-resolution state for a single unit
///
/// A fresh value is built for every unit; nothing carries over between units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisContext {
    /// Current database (`USE` overrides the configured default)
    pub database: String,

    /// Default schema for unqualified names
    pub schema: String,

    /// Canonical name of the object owning temp tables in this unit
    pub owner: Option<String>,
}

impl AnalysisContext {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into().to_lowercase(),
            schema: schema.into().to_lowercase(),
            owner: None,
        }
    }

    /// Switch the current database
    pub fn use_database(&mut self, database: &str) {
        self.database = database.trim().to_lowercase();
    }

    /// Canonical name for a table reference; temp tables are scoped to the owner
    pub fn qualify(&self, raw: &str) -> Option<String> {
        if is_temp_name(raw) {
            let owner = self.owner.clone().unwrap_or_else(|| {
                format!("{}.{}.batch", self.database, self.schema)
            });
            return Some(temp_object_name(&owner, raw));
        }
        QualifiedName::resolve(raw, &self.database, &self.schema).map(|q| q.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualify_uses_current_database() {
        let mut ctx = AnalysisContext::new("Warehouse", "dbo");
        assert_eq!(ctx.qualify("[Orders]").as_deref(), Some("warehouse.dbo.orders"));

        ctx.use_database("Staging");
        assert_eq!(ctx.qualify("sales.Orders").as_deref(), Some("staging.sales.orders"));
    }

    #[test]
    fn temp_tables_resolve_against_owner() {
        let mut ctx = AnalysisContext::new("dw", "dbo");
        ctx.owner = Some("dw.dbo.load_sales".to_string());
        assert_eq!(ctx.qualify("#Stage").as_deref(), Some("dw.dbo.load_sales#stage"));
    }
}
