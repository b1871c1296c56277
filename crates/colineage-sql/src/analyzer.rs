//! Statement analyzer: one source unit to one object
//!
//! Analysis runs an ordered chain of strategies. Each returns a tagged
//! [`Attempt`]; the next strategy only runs on a partial or failed result and
//! receives it as input.

use crate::context::{AnalysisContext, SourceUnit};
use crate::dialect::{dialect_for, SqlDialect};
use crate::parser::SqlParser;
use crate::preprocess::preprocess;
use crate::recovery;
use crate::script::{hint_name, lower_statements};
use colineage_core::{Config, Diagnostic, DiagnosticCode, Location, ObjectBody, ObjectInfo, ObjectKind};

/// Result of one strategy
#[derive(Debug, Clone)]
pub enum Attempt {
    /// Every statement was understood
    Complete(ObjectInfo),

    /// An object was produced but some statements were skipped
    Partial(ObjectInfo),

    /// Nothing usable; diagnostics explain why
    Failed(Vec<Diagnostic>),
}

impl Attempt {
    fn label(&self) -> &'static str {
        match self {
            Attempt::Complete(_) => "complete",
            Attempt::Partial(_) => "partial",
            Attempt::Failed(_) => "failed",
        }
    }
}

/// Preprocessed unit handed to each strategy
#[derive(Debug)]
pub struct PreparedUnit<'u> {
    pub unit: &'u SourceUnit,

    /// Text after preprocessing
    pub text: String,

    /// Context after applying `USE`
    pub ctx: AnalysisContext,
}

/// One step of the analysis chain
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Try to produce the object, given the previous step's result
    fn attempt(&self, input: &PreparedUnit<'_>, dialect: &dyn SqlDialect, previous: Attempt) -> Attempt;
}

/// Full grammar parse followed by lowering
#[derive(Debug, Default)]
pub struct GrammarStrategy;

impl Strategy for GrammarStrategy {
    fn name(&self) -> &'static str {
        "grammar"
    }

    fn attempt(&self, input: &PreparedUnit<'_>, dialect: &dyn SqlDialect, _previous: Attempt) -> Attempt {
        let parser = SqlParser::new(dialect);
        match parser.parse(&input.text, input.unit.path.as_deref()) {
            Ok(parsed) if parsed.statement_count() == 0 => Attempt::Failed(Vec::new()),
            Ok(parsed) => {
                let result = lower_statements(&parsed.statements, input.unit, &input.ctx, dialect);
                if result.complete {
                    Attempt::Complete(result.object)
                } else {
                    Attempt::Partial(result.object)
                }
            }
            Err(failure) => {
                tracing::debug!(error = %failure, "grammar parse failed");
                Attempt::Failed(vec![failure.to_diagnostic()])
            }
        }
    }
}

/// Token and pattern based recovery
#[derive(Debug, Default)]
pub struct RecoveryStrategy;

impl Strategy for RecoveryStrategy {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn attempt(&self, input: &PreparedUnit<'_>, dialect: &dyn SqlDialect, previous: Attempt) -> Attempt {
        match previous {
            Attempt::Partial(prior) => {
                let known = Some((prior.name.clone(), prior.kind));
                let recovered = recovery::recover(&input.text, input.unit, &input.ctx, dialect, known);
                tracing::warn!(object = %prior.name, "partially parsed, recovered remaining statements");
                Attempt::Complete(recovery::merge(prior, recovered))
            }
            Attempt::Failed(diagnostics) => {
                let mut object = recovery::recover(&input.text, input.unit, &input.ctx, dialect, None);
                if !is_usable(&object) {
                    return Attempt::Failed(diagnostics);
                }
                tracing::warn!(object = %object.name, "grammar failed, object recovered");
                let recovered = std::mem::take(&mut object.diagnostics);
                for diagnostic in diagnostics.into_iter().chain(recovered) {
                    object.push_diagnostic(diagnostic);
                }
                Attempt::Complete(object)
            }
            complete => complete,
        }
    }
}

/// Minimal object named after the unit
#[derive(Debug, Default)]
pub struct StubStrategy;

impl Strategy for StubStrategy {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn attempt(&self, input: &PreparedUnit<'_>, dialect: &dyn SqlDialect, previous: Attempt) -> Attempt {
        match previous {
            Attempt::Partial(object) => Attempt::Complete(object),
            Attempt::Failed(diagnostics) => Attempt::Complete(stub(input, dialect, diagnostics)),
            complete => complete,
        }
    }
}

/// Whether recovery found anything
fn is_usable(object: &ObjectInfo) -> bool {
    !object.dependencies.is_empty()
        || !object.scoped.is_empty()
        || !matches!(object.body, ObjectBody::Opaque)
}

fn stub(input: &PreparedUnit<'_>, dialect: &dyn SqlDialect, diagnostics: Vec<Diagnostic>) -> ObjectInfo {
    let name = hint_name(input.unit, &input.ctx, dialect);
    tracing::warn!(object = %name, "no lineage could be extracted");

    let mut object = ObjectInfo::new(name, ObjectKind::View).with_source(input.unit.path.clone());
    for diagnostic in diagnostics {
        object.push_diagnostic(diagnostic);
    }
    let location = Location::new(input.unit.path.clone().unwrap_or_else(|| input.unit.name_hint.clone()));
    object.push_diagnostic(
        Diagnostic::warn(DiagnosticCode::ParseFailure, "No object definition could be extracted")
            .with_location(location),
    );
    object
}

/// Analyzes source units against one dialect
#[derive(Debug)]
pub struct StatementAnalyzer {
    dialect: Box<dyn SqlDialect>,
    strategies: Vec<Box<dyn Strategy>>,
}

impl StatementAnalyzer {
    /// Analyzer with the default strategy chain
    pub fn new(dialect: Box<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            strategies: vec![
                Box::new(GrammarStrategy),
                Box::new(RecoveryStrategy),
                Box::new(StubStrategy),
            ],
        }
    }

    /// Analyzer for the configured dialect
    pub fn for_config(config: &Config) -> Self {
        Self::new(dialect_for(config.dialect))
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Fresh context from configuration defaults
    pub fn context(&self, config: &Config) -> AnalysisContext {
        let schema = config
            .default_schema
            .clone()
            .unwrap_or_else(|| self.dialect.default_schema().to_string());
        AnalysisContext::new(config.default_database.clone(), schema)
    }

    /// Analyze one unit; never fails
    pub fn analyze(&self, unit: &SourceUnit, mut ctx: AnalysisContext) -> ObjectInfo {
        let prepared = preprocess(&unit.text);
        if let Some(database) = &prepared.database {
            ctx.use_database(database);
        }
        let input = PreparedUnit {
            unit,
            text: prepared.text,
            ctx,
        };

        let mut attempt = Attempt::Failed(Vec::new());
        for strategy in &self.strategies {
            attempt = strategy.attempt(&input, self.dialect(), attempt);
            tracing::debug!(
                unit = %unit.name_hint,
                strategy = strategy.name(),
                result = attempt.label(),
                "analysis step"
            );
            if matches!(attempt, Attempt::Complete(_)) {
                break;
            }
        }

        let mut object = match attempt {
            Attempt::Complete(object) | Attempt::Partial(object) => object,
            Attempt::Failed(diagnostics) => stub(&input, self.dialect(), diagnostics),
        };
        if object.source.is_none() {
            object.source = unit.path.clone();
        }
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MsSql;
    use pretty_assertions::assert_eq;

    fn analyze(hint: &str, sql: &str) -> ObjectInfo {
        let analyzer = StatementAnalyzer::new(Box::new(MsSql));
        analyzer.analyze(&SourceUnit::new(hint, sql), AnalysisContext::new("dw", "dbo"))
    }

    fn codes(object: &ObjectInfo) -> Vec<DiagnosticCode> {
        object.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn grammar_path_has_no_recovery_diagnostics() {
        let object = analyze("v", "CREATE VIEW dbo.v AS SELECT o.id FROM dbo.orders o");
        assert_eq!(object.name, "dw.dbo.v");
        assert!(codes(&object).is_empty());
    }

    #[test]
    fn use_statement_sets_database() {
        let object = analyze("v", "USE Sales\nGO\nCREATE VIEW dbo.v AS SELECT id FROM dbo.orders");
        assert_eq!(object.name, "sales.dbo.v");
        assert!(object.dependencies.contains("sales.dbo.orders"));
    }

    #[test]
    fn unparseable_text_is_recovered() {
        let object = analyze(
            "load",
            "CREATE PROCEDURE dbo.load AS BEGIN SELECT a.id INTO #t FROM dbo.a a INNER JOIN dbo.b b ON a.id = b.id WHERE a.flag = = 1 END",
        );
        assert_eq!(object.name, "dw.dbo.load");
        assert!(object.dependencies.contains("dw.dbo.a"));
        assert!(object.dependencies.contains("dw.dbo.b"));
        assert!(codes(&object).contains(&DiagnosticCode::RecoveryUsed));
    }

    #[test]
    fn empty_input_becomes_stub() {
        let object = analyze("nothing_here", "   ");
        assert_eq!(object.name, "dw.dbo.nothing_here");
        assert_eq!(object.body, ObjectBody::Opaque);
        assert!(codes(&object).contains(&DiagnosticCode::ParseFailure));
    }
}
