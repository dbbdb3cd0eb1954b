use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use serde_sarif::sarif::{
    ArtifactChange, ArtifactContent, ArtifactLocation, Fix, Location, LogicalLocation, Message,
    PhysicalLocation, Region, Replacement,
};

use crate::engine::AnalysisContext;
use crate::fix::TextEdit;
use crate::ir::MemberKind;
use crate::model::{SemanticModel, Symbol};
use crate::syntax::{LineIndex, Span};

// Rule modules are discovered by build.rs.
include!(concat!(env!("OUT_DIR"), "/rule_modules.rs"));

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    /// Title of the code fix the rule offers.
    pub(crate) fix_title: &'static str,
}

/// Rule interface for analysis and fixing.
pub(crate) trait Rule {
    fn metadata(&self) -> RuleMetadata;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>>;
    /// Edits resolving one diagnostic previously reported by `run` on the same context.
    ///
    /// An empty list means the diagnostic cannot be fixed automatically.
    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>>;
}

/// Wrapper struct for rule factory functions to enable inventory collection.
pub(crate) struct RuleFactory(pub fn() -> Box<dyn Rule + Sync>);

inventory::collect!(RuleFactory);

/// Macro to register a rule implementation.
///
/// Usage: `register_rule!(RuleName);`
/// This macro creates a factory function and registers it with inventory.
#[macro_export]
macro_rules! register_rule {
    ($rule_type:ty) => {
        inventory::submit! {
            $crate::rules::RuleFactory(|| Box::new(<$rule_type>::default()))
        }
    };
}

/// Returns all registered rules as boxed trait objects.
pub(crate) fn all_rules() -> Vec<Box<dyn Rule + Sync>> {
    inventory::iter::<RuleFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

/// Finding reported by a rule.
///
/// Two diagnostics are the same finding when their locations are equal.
#[derive(Clone, Debug)]
pub(crate) struct Diagnostic {
    pub(crate) location: Span,
    /// Element named in the message.
    pub(crate) name: String,
    /// SARIF logical location kind of the element.
    pub(crate) kind: &'static str,
    pub(crate) message: String,
}

impl Diagnostic {
    pub(crate) fn new(
        location: Span,
        name: impl Into<String>,
        kind: &'static str,
        message: String,
    ) -> Self {
        Self {
            location,
            name: name.into(),
            kind,
            message,
        }
    }

    pub(crate) fn for_symbol(
        model: &SemanticModel,
        symbol: Symbol,
        message: impl FnOnce(&str) -> String,
    ) -> Self {
        let name = model.name(symbol);
        Self {
            location: model.location(symbol),
            name: name.to_string(),
            kind: symbol_kind(model, symbol),
            message: message(name),
        }
    }
}

impl PartialEq for Diagnostic {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Diagnostic {}

impl Hash for Diagnostic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

/// Drop diagnostics whose location was already reported, keeping the first.
pub(crate) fn deduplicate(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = BTreeSet::new();
    diagnostics
        .into_iter()
        .filter(|diagnostic| seen.insert(diagnostic.location))
        .collect()
}

fn symbol_kind(model: &SemanticModel, symbol: Symbol) -> &'static str {
    match symbol {
        Symbol::Type(_) => "type",
        Symbol::Parameter(_, _) | Symbol::ValueParameter(_) => "parameter",
        Symbol::Field(_, _) => "variable",
        Symbol::Member(id) => match model.member(id).kind {
            MemberKind::Method | MemberKind::Constructor => "function",
            MemberKind::Field | MemberKind::EventField => "variable",
            _ => "member",
        },
    }
}

pub(crate) fn region(text: &str, lines: &LineIndex, span: Span) -> Region {
    let start = lines.position(text, span.start);
    let end = lines.position(text, span.end);
    Region::builder()
        .start_line(start.line as i64)
        .start_column(start.column as i64)
        .end_line(end.line as i64)
        .end_column(end.column as i64)
        .build()
}

pub(crate) fn diagnostic_location(
    uri: &str,
    text: &str,
    lines: &LineIndex,
    diagnostic: &Diagnostic,
) -> Location {
    let logical = LogicalLocation::builder()
        .name(diagnostic.name.clone())
        .kind(diagnostic.kind)
        .build();
    let artifact_location = ArtifactLocation::builder().uri(uri.to_string()).build();
    let physical = PhysicalLocation::builder()
        .artifact_location(artifact_location)
        .region(region(text, lines, diagnostic.location))
        .build();
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

/// SARIF fix carrying the edits of one code fix.
pub(crate) fn sarif_fix(
    uri: &str,
    text: &str,
    lines: &LineIndex,
    title: &str,
    edits: &[TextEdit],
) -> Fix {
    let replacements: Vec<Replacement> = edits
        .iter()
        .map(|edit| {
            Replacement::builder()
                .deleted_region(region(text, lines, edit.span))
                .inserted_content(ArtifactContent::builder().text(edit.text.clone()).build())
                .build()
        })
        .collect();
    let change = ArtifactChange::builder()
        .artifact_location(ArtifactLocation::builder().uri(uri.to_string()).build())
        .replacements(replacements)
        .build();
    Fix::builder()
        .description(result_message(title))
        .artifact_changes(vec![change])
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
