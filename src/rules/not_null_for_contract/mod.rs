use anyhow::Result;

use crate::contracts::{Assertion, ContractCategory, Subject};
use crate::engine::AnalysisContext;
use crate::fix::{TextEdit, add_declaration_attribute, add_parameter_attribute, append_usings};
use crate::ir::{AccessorKind, MemberKind};
use crate::model::Symbol;
use crate::rules::{Diagnostic, Rule, RuleMetadata};

/// Rule that reports not-null contracts whose element lacks a `[NotNull]` attribute.
#[derive(Default)]
pub(crate) struct NotNullForContractRule;

crate::register_rule!(NotNullForContractRule);

impl Rule for NotNullForContractRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NotNullForContract",
            name: "Not-null contract without [NotNull]",
            description: "Elements with a not-null contract should have a [NotNull] attribute",
            fix_title: "Add [NotNull] attribute",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>> {
        let model = &context.model;
        let mut diagnostics = Vec::new();
        for assertion in &context.assertions {
            let Some(symbol) = asserted_symbol(context, assertion) else {
                continue;
            };
            let target = context.contract_classes.annotation_target(model, symbol);
            if model.attributes(target).has_not_null() {
                continue;
            }
            // The setter's `value` is annotated through its property.
            let reported = match target {
                Symbol::ValueParameter(id) => Symbol::Member(id),
                other => other,
            };
            diagnostics.push(Diagnostic::for_symbol(model, reported, |name| {
                format!(
                    "Element '{name}' has a not-null contract but does not have a corresponding [NotNull] attribute."
                )
            }));
        }
        Ok(diagnostics)
    }

    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>> {
        let model = &context.model;
        let edit = match model.symbol_at(diagnostic.location) {
            Some(Symbol::Parameter(id, index)) => {
                let parameter = &model.member(id).parameters[index];
                add_parameter_attribute(parameter.span, &parameter.attributes.lists, "NotNull")
            }
            Some(Symbol::Member(id)) => {
                let member = model.member(id);
                add_declaration_attribute(
                    &context.text,
                    member.span,
                    &member.attributes.lists,
                    "NotNull",
                )
            }
            _ => return Ok(Vec::new()),
        };
        let offset = edit.span.start;
        let mut edits = vec![edit];
        edits.extend(append_usings(
            model,
            &context.text,
            offset,
            &["JetBrains.Annotations"],
        ));
        Ok(edits)
    }
}

/// Declaration an assertion declares non-null, before contract-class mapping.
fn asserted_symbol(context: &AnalysisContext, assertion: &Assertion) -> Option<Symbol> {
    let model = &context.model;
    match (assertion.category, &assertion.subject) {
        (ContractCategory::Requires, Subject::Name(name)) => {
            match model.bind(assertion.member, assertion.accessor, name)? {
                symbol @ (Symbol::Parameter(_, _) | Symbol::ValueParameter(_)) => Some(symbol),
                _ => None,
            }
        }
        (ContractCategory::Ensures, Subject::Result) => {
            let hosts_result = match model.member(assertion.member).kind {
                MemberKind::Method => assertion.accessor.is_none(),
                MemberKind::Property => assertion.accessor == Some(AccessorKind::Get),
                _ => false,
            };
            hosts_result.then_some(Symbol::Member(assertion.member))
        }
        (ContractCategory::Invariant, Subject::Name(name)) => {
            match model.bind(assertion.member, assertion.accessor, name)? {
                symbol @ (Symbol::Field(_, _) | Symbol::Member(_)) => Some(symbol),
                _ => None,
            }
        }
        _ => None,
    }
}
