use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use opentelemetry::KeyValue;
use rayon::prelude::*;
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor, Result as SarifResult};
use tracing::{debug, warn};

use crate::contract_class::ContractClassIndex;
use crate::contracts::{Assertion, collect_assertions};
use crate::fix::{TextEdit, apply_edits};
use crate::model::SemanticModel;
use crate::rules::{
    Diagnostic, Rule, RuleMetadata, all_rules, deduplicate, diagnostic_location, result_message,
    sarif_fix,
};
use crate::scan::SourceDocument;
use crate::syntax::LineIndex;
use crate::telemetry::{
    Telemetry, record_fix, rule_attribute, uri_attribute, with_span, with_span_in,
};

/// Upper bound on fixes applied to one document before giving up.
const MAX_FIXES_PER_DOCUMENT: usize = 10_000;

/// Inputs shared by analysis rules for one document.
pub(crate) struct AnalysisContext {
    pub(crate) uri: String,
    pub(crate) text: String,
    pub(crate) model: SemanticModel,
    pub(crate) contract_classes: ContractClassIndex,
    pub(crate) assertions: Vec<Assertion>,
    lines: LineIndex,
    telemetry: Option<Arc<Telemetry>>,
}

impl AnalysisContext {
    /// Parse and index a document; `None` when the parser produced no tree.
    pub(crate) fn new(
        uri: impl Into<String>,
        text: impl Into<String>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Result<Option<Self>> {
        let uri = uri.into();
        let text = text.into();
        let Some(model) = SemanticModel::from_source(&text)
            .with_context(|| format!("failed to parse {uri}"))?
        else {
            return Ok(None);
        };
        let contract_classes = ContractClassIndex::build(&model);
        let assertions = collect_assertions(&model);
        let lines = LineIndex::new(&text);
        Ok(Some(Self {
            uri,
            text,
            model,
            contract_classes,
            assertions,
            lines,
            telemetry,
        }))
    }

    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }

    pub(crate) fn lines(&self) -> &LineIndex {
        &self.lines
    }
}

/// Cooperative cancellation flag shared between the caller and a running pass.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("analysis cancelled");
        }
        Ok(())
    }
}

/// Analysis engine that executes configured rules.
pub(crate) struct Engine {
    rules: Vec<Box<dyn Rule + Sync>>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        let mut rules = all_rules();
        rules.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        Self { rules }
    }

    /// Engine restricted to the given rule ids; an empty selection keeps every rule.
    pub(crate) fn with_rules(ids: &[String]) -> Result<Self> {
        let engine = Self::new();
        if ids.is_empty() {
            return Ok(engine);
        }
        for id in ids {
            if !engine.rules.iter().any(|rule| rule.metadata().id == id) {
                let known: Vec<_> = engine.rules.iter().map(|rule| rule.metadata().id).collect();
                bail!("unknown rule: {id} (known rules: {})", known.join(", "));
            }
        }
        let rules = engine
            .rules
            .into_iter()
            .filter(|rule| ids.iter().any(|id| id == rule.metadata().id))
            .collect();
        Ok(Self { rules })
    }

    pub(crate) fn rule_descriptors(&self) -> Vec<ReportingDescriptor> {
        self.rules
            .iter()
            .map(|rule| rule_descriptor(&rule.metadata()))
            .collect()
    }

    pub(crate) fn analyze(
        &self,
        documents: &[SourceDocument],
        telemetry: Option<Arc<Telemetry>>,
        cancellation: &CancellationToken,
    ) -> Result<EngineOutput> {
        let parent = opentelemetry::Context::current();
        let per_document = documents
            .par_iter()
            .enumerate()
            .map(|(index, document)| -> Result<Vec<_>> {
                cancellation.check()?;
                let attributes = [uri_attribute(&document.uri)];
                let results = with_span_in(
                    telemetry.as_deref(),
                    &format!("document:{}", document.uri),
                    &attributes,
                    &parent,
                    || self.analyze_document(document, telemetry.clone(), cancellation),
                )?;
                Ok(results
                    .into_iter()
                    .map(|(rule_id, offset, result)| (rule_id, index, offset, result))
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ordered: Vec<_> = per_document.into_iter().flatten().collect();
        ordered.sort_by_key(|(rule_id, index, offset, _)| (*rule_id, *index, *offset));
        let results = ordered
            .into_iter()
            .map(|(_, _, _, result)| result)
            .collect();

        Ok(EngineOutput {
            rules: self.rule_descriptors(),
            results,
        })
    }

    fn analyze_document(
        &self,
        document: &SourceDocument,
        telemetry: Option<Arc<Telemetry>>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<(&'static str, usize, SarifResult)>> {
        let Some(context) = AnalysisContext::new(&document.uri, &document.text, telemetry)? else {
            warn!(uri = %document.uri, "document could not be parsed; skipping");
            return Ok(Vec::new());
        };
        let mut results = Vec::new();
        for rule in &self.rules {
            cancellation.check()?;
            let metadata = rule.metadata();
            for diagnostic in run_rule(rule.as_ref(), &metadata, &context)? {
                let result = sarif_result(rule.as_ref(), &metadata, &context, &diagnostic);
                results.push((metadata.id, diagnostic.location.start, result));
            }
        }
        Ok(results)
    }

    /// Apply fixes for the selected rules until none remain.
    ///
    /// Each fix is applied to a fresh parse of the current text. Nothing is returned
    /// unless the whole loop succeeds.
    pub(crate) fn fix_document(
        &self,
        document: &SourceDocument,
        telemetry: Option<Arc<Telemetry>>,
        cancellation: &CancellationToken,
    ) -> Result<FixOutcome> {
        let mut text = document.text.clone();
        let mut applied = 0;
        loop {
            cancellation.check()?;
            let Some(context) = AnalysisContext::new(&document.uri, text.as_str(), telemetry.clone())?
            else {
                warn!(uri = %document.uri, "document could not be parsed; skipping fixes");
                break;
            };
            let Some((metadata, diagnostic, edits)) = self.next_fix(&context)? else {
                break;
            };
            let updated = apply_edits(&text, &edits).with_context(|| {
                format!("{} fix for '{}' in {}", metadata.id, diagnostic.name, document.uri)
            })?;
            if updated == text {
                bail!(
                    "{} fix for '{}' in {} did not change the document",
                    metadata.id,
                    diagnostic.name,
                    document.uri
                );
            }
            debug!(rule = metadata.id, element = %diagnostic.name, uri = %document.uri, "applied fix");
            record_fix(metadata.id, &diagnostic.name);
            text = updated;
            applied += 1;
            if applied > MAX_FIXES_PER_DOCUMENT {
                bail!("fixes for {} did not converge", document.uri);
            }
        }
        Ok(FixOutcome {
            path: document.path.clone(),
            bom: document.bom,
            text,
            applied,
        })
    }

    pub(crate) fn fix(
        &self,
        documents: &[SourceDocument],
        telemetry: Option<Arc<Telemetry>>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<FixOutcome>> {
        let parent = opentelemetry::Context::current();
        documents
            .par_iter()
            .map(|document| {
                let attributes = [uri_attribute(&document.uri)];
                with_span_in(
                    telemetry.as_deref(),
                    &format!("fix:{}", document.uri),
                    &attributes,
                    &parent,
                    || self.fix_document(document, telemetry.clone(), cancellation),
                )
            })
            .collect()
    }

    fn next_fix(
        &self,
        context: &AnalysisContext,
    ) -> Result<Option<(RuleMetadata, Diagnostic, Vec<TextEdit>)>> {
        for rule in &self.rules {
            let metadata = rule.metadata();
            for diagnostic in run_rule(rule.as_ref(), &metadata, context)? {
                let edits = context.with_span(
                    &format!("fix:{}", metadata.id),
                    &[rule_attribute(metadata.id)],
                    || rule.fix(context, &diagnostic),
                )?;
                if edits.is_empty() {
                    debug!(rule = metadata.id, element = %diagnostic.name, "no automatic fix");
                    continue;
                }
                return Ok(Some((metadata, diagnostic, edits)));
            }
        }
        Ok(None)
    }
}

fn run_rule(
    rule: &(dyn Rule + Sync),
    metadata: &RuleMetadata,
    context: &AnalysisContext,
) -> Result<Vec<Diagnostic>> {
    let rule_span_attributes = [rule_attribute(metadata.id), uri_attribute(&context.uri)];
    let diagnostics = context.with_span(
        &format!("rule:{}", metadata.id),
        &rule_span_attributes,
        || rule.run(context),
    )?;
    let mut diagnostics = deduplicate(diagnostics);
    diagnostics.sort_by_key(|diagnostic| diagnostic.location);
    Ok(diagnostics)
}

fn sarif_result(
    rule: &(dyn Rule + Sync),
    metadata: &RuleMetadata,
    context: &AnalysisContext,
    diagnostic: &Diagnostic,
) -> SarifResult {
    let location = diagnostic_location(&context.uri, &context.text, context.lines(), diagnostic);
    let mut result = SarifResult::builder()
        .message(result_message(diagnostic.message.clone()))
        .locations(vec![location])
        .build();
    result.rule_id = Some(metadata.id.to_string());
    match rule.fix(context, diagnostic) {
        Ok(edits) if !edits.is_empty() => {
            result.fixes = Some(vec![sarif_fix(
                &context.uri,
                &context.text,
                context.lines(),
                metadata.fix_title,
                &edits,
            )]);
        }
        Ok(_) => {}
        Err(err) => {
            warn!(rule = metadata.id, element = %diagnostic.name, "fix unavailable: {err:#}");
        }
    }
    result
}

/// Aggregated SARIF payload from rule execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

/// Fixed text of one document.
pub(crate) struct FixOutcome {
    pub(crate) path: PathBuf,
    pub(crate) bom: bool,
    pub(crate) text: String,
    pub(crate) applied: usize,
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}
