use anyhow::Result;

use crate::contracts::{ContractCategory, Subject, asserts_name, ensures_result, leading_requires};
use crate::engine::AnalysisContext;
use crate::fix::{TextEdit, append_usings, insert_statement, insert_statements};
use crate::ir::{AccessorKind, Block, Member, MemberKind};
use crate::model::{MemberId, SemanticModel, Symbol};
use crate::rules::{Diagnostic, Rule, RuleMetadata};

/// Rule that reports `[NotNull]` elements without a matching not-null contract.
#[derive(Default)]
pub(crate) struct ContractForNotNullRule;

crate::register_rule!(ContractForNotNullRule);

impl Rule for ContractForNotNullRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "ContractForNotNull",
            name: "[NotNull] without not-null contract",
            description: "Elements with a [NotNull] attribute should have a corresponding not-null contract",
            fix_title: "Add not-null contract",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>> {
        let model = &context.model;
        let mut symbols = Vec::new();
        for (id, member) in model.all_members() {
            match member.kind {
                MemberKind::Method | MemberKind::Constructor => {
                    let Some(host) = host_member(context, id) else {
                        continue;
                    };
                    let host_member = model.member(host);
                    let Some(body) = host_member.body.as_ref() else {
                        continue;
                    };
                    for (index, parameter) in member.parameters.iter().enumerate() {
                        if !parameter.attributes.has_not_null()
                            || parameter.modifiers.iter().any(|modifier| modifier == "out")
                        {
                            continue;
                        }
                        let Some(host_parameter) = host_member.parameters.get(index) else {
                            continue;
                        };
                        if !asserts_name(body, ContractCategory::Requires, &host_parameter.name) {
                            symbols.push(Symbol::Parameter(id, index));
                        }
                    }
                    if member.kind == MemberKind::Method
                        && member.attributes.has_not_null()
                        && !member.is_void()
                        && !ensures_result(body)
                    {
                        symbols.push(Symbol::Member(id));
                    }
                }
                MemberKind::Property if member.attributes.has_not_null() => {
                    let Some(host) = host_member(context, id) else {
                        continue;
                    };
                    let host_member = model.member(host);
                    if missing_getter_ensures(host_member).is_some()
                        || missing_setter_requires(host_member).is_some()
                    {
                        symbols.push(Symbol::Member(id));
                    }
                }
                MemberKind::Field if needs_invariant(member) => {
                    let Some(body) = invariant_body(model, id) else {
                        continue;
                    };
                    if let Some(index) = member.declarators.iter().position(|declarator| {
                        !asserts_name(body, ContractCategory::Invariant, &declarator.name)
                    }) {
                        symbols.push(Symbol::Field(id, index));
                    }
                }
                _ => {}
            }
        }
        Ok(symbols
            .into_iter()
            .map(|symbol| {
                Diagnostic::for_symbol(model, symbol, |name| {
                    format!(
                        "Element '{name}' has a [NotNull] attribute but does not have a corresponding not-null contract."
                    )
                })
            })
            .collect())
    }

    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>> {
        let model = &context.model;
        let text = &context.text;
        let mut edits = match model.symbol_at(diagnostic.location) {
            Some(Symbol::Parameter(id, index)) => fix_parameter(context, id, index),
            Some(Symbol::Member(id)) => match model.member(id).kind {
                MemberKind::Method => fix_method_result(context, id),
                MemberKind::Property => fix_property(context, id),
                MemberKind::Field => fix_field(context, id),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let Some(first) = edits.first() else {
            return Ok(edits);
        };
        let offset = first.span.start;
        edits.extend(append_usings(
            model,
            text,
            offset,
            &["System.Diagnostics.Contracts"],
        ));
        Ok(edits)
    }
}

/// Member whose body hosts the contracts of `id`.
///
/// Abstract and interface members delegate to their contract-class implementation;
/// overrides never host contracts.
fn host_member(context: &AnalysisContext, id: MemberId) -> Option<MemberId> {
    let model = &context.model;
    let member = model.member(id);
    let host = if model.type_decl(id.ty).is_interface() || member.is_abstract() {
        context.contract_classes.implementing_member(model, id)?
    } else if member.is_override() {
        return None;
    } else {
        id
    };
    let host_member = model.member(host);
    let has_body = host_member.body.is_some()
        || host_member
            .accessors
            .iter()
            .any(|accessor| accessor.body.is_some());
    has_body.then_some(host)
}

fn missing_getter_ensures(member: &Member) -> Option<&Block> {
    member
        .accessor(AccessorKind::Get)
        .and_then(|accessor| accessor.body.as_ref())
        .filter(|body| !ensures_result(body))
}

fn missing_setter_requires(member: &Member) -> Option<&Block> {
    member
        .setter()
        .and_then(|accessor| accessor.body.as_ref())
        .filter(|body| !asserts_name(body, ContractCategory::Requires, "value"))
}

/// Annotated field that an invariant can cover.
fn needs_invariant(member: &Member) -> bool {
    member.attributes.has_not_null()
        && !member.has_modifier("const")
        && !(member.has_modifier("static") && member.has_modifier("readonly"))
}

fn invariant_body(model: &SemanticModel, field: MemberId) -> Option<&Block> {
    let invariant = model.invariant_method(field.ty)?;
    model.member(invariant).body.as_ref()
}

fn ensures_statement(member: &Member) -> Option<String> {
    let result_type = member.type_text.as_deref()?.trim();
    Some(format!(
        "Contract.Ensures(Contract.Result<{result_type}>() != null);"
    ))
}

fn fix_parameter(context: &AnalysisContext, id: MemberId, index: usize) -> Vec<TextEdit> {
    let model = &context.model;
    let Some(host) = host_member(context, id) else {
        return Vec::new();
    };
    let host_member = model.member(host);
    let (Some(body), Some(parameter)) = (host_member.body.as_ref(), host_member.parameters.get(index))
    else {
        return Vec::new();
    };
    let preceding: Vec<&str> = host_member.parameters[..index]
        .iter()
        .map(|parameter| parameter.name.as_str())
        .collect();
    // Keep Requires in parameter order.
    let position = leading_requires(body)
        .iter()
        .take_while(|subject| {
            matches!(subject, Some(Subject::Name(name)) if preceding.contains(&name.as_str()))
        })
        .count();
    vec![insert_statement(
        &context.text,
        body,
        position,
        &format!("Contract.Requires({} != null);", parameter.name),
    )]
}

fn fix_method_result(context: &AnalysisContext, id: MemberId) -> Vec<TextEdit> {
    let model = &context.model;
    let Some(host) = host_member(context, id) else {
        return Vec::new();
    };
    let host_member = model.member(host);
    let (Some(body), Some(statement)) = (host_member.body.as_ref(), ensures_statement(host_member))
    else {
        return Vec::new();
    };
    let position = leading_requires(body).len();
    vec![insert_statement(&context.text, body, position, &statement)]
}

fn fix_property(context: &AnalysisContext, id: MemberId) -> Vec<TextEdit> {
    let model = &context.model;
    let Some(host) = host_member(context, id) else {
        return Vec::new();
    };
    let host_member = model.member(host);
    let mut edits = Vec::new();
    if let (Some(body), Some(statement)) =
        (missing_getter_ensures(host_member), ensures_statement(host_member))
    {
        let position = leading_requires(body).len();
        edits.push(insert_statement(&context.text, body, position, &statement));
    }
    if let Some(body) = missing_setter_requires(host_member) {
        edits.push(insert_statement(
            &context.text,
            body,
            0,
            "Contract.Requires(value != null);",
        ));
    }
    edits
}

fn fix_field(context: &AnalysisContext, id: MemberId) -> Vec<TextEdit> {
    let model = &context.model;
    let Some(body) = invariant_body(model, id) else {
        return Vec::new();
    };
    let statements: Vec<String> = model
        .member(id)
        .declarators
        .iter()
        .filter(|declarator| !asserts_name(body, ContractCategory::Invariant, &declarator.name))
        .map(|declarator| format!("Contract.Invariant({} != null);", declarator.name))
        .collect();
    if statements.is_empty() {
        return Vec::new();
    }
    vec![insert_statements(
        &context.text,
        body,
        body.statements.len(),
        &statements,
    )]
}
