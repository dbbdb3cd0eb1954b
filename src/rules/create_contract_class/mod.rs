use anyhow::{Context, Result, bail};

use crate::engine::AnalysisContext;
use crate::fix::{TextEdit, add_declaration_attribute, insert_after, prepend_usings};
use crate::ir::{Member, MemberKind, Parameter, TypeDecl};
use crate::model::Symbol;
use crate::rules::{Diagnostic, Rule, RuleMetadata};
use crate::syntax::{indent_unit, line_indent};

/// Rule that reports annotated interfaces and abstract classes without a contract class.
#[derive(Default)]
pub(crate) struct CreateContractClassRule;

crate::register_rule!(CreateContractClassRule);

impl Rule for CreateContractClassRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "CreateContractClass",
            name: "Missing contract class",
            description: "Interfaces and abstract classes with [NotNull] annotations should have a contract class",
            fix_title: "Add contract class",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();
        for (_, decl) in context.model.types() {
            if !needs_contract_class(decl) {
                continue;
            }
            diagnostics.push(Diagnostic::new(
                decl.span,
                decl.name.clone(),
                "type",
                format!(
                    "Interface or abstract class '{}' has [NotNull] annotations but no contract class.",
                    decl.name
                ),
            ));
        }
        Ok(diagnostics)
    }

    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>> {
        let model = &context.model;
        let text = &context.text;
        let Some(Symbol::Type(ty)) = model.symbol_at(diagnostic.location) else {
            return Ok(Vec::new());
        };
        let decl = model.type_decl(ty);
        let contract_name = contract_class_name(decl);
        let lines = contract_class_lines(text, decl, &contract_name)
            .with_context(|| format!("create contract class for '{}'", decl.name))?;

        let mut edits = Vec::new();
        edits.extend(prepend_usings(
            model,
            text,
            decl.span.start,
            &["System", "System.Diagnostics.Contracts"],
        ));
        edits.push(add_declaration_attribute(
            text,
            decl.span,
            &decl.attributes.lists,
            &format!(
                "ContractClass(typeof({contract_name}{}))",
                open_generic(decl.type_parameters.len())
            ),
        ));
        edits.push(insert_after(text, decl.span, &lines));
        Ok(edits)
    }
}

fn needs_contract_class(decl: &TypeDecl) -> bool {
    if decl.attributes.contains("ContractClass") {
        return false;
    }
    if decl.is_interface() {
        return decl.members.iter().any(has_not_null_annotations);
    }
    decl.is_abstract_class()
        && decl
            .members
            .iter()
            .filter(|member| member.is_abstract())
            .any(has_not_null_annotations)
}

fn has_not_null_annotations(member: &Member) -> bool {
    match member.kind {
        MemberKind::Method => {
            member.attributes.has_not_null()
                || member
                    .parameters
                    .iter()
                    .any(|parameter| parameter.attributes.has_not_null())
        }
        MemberKind::Property => member.attributes.has_not_null(),
        _ => false,
    }
}

/// `IFoo` becomes `FooContract`; class names keep their first letter.
fn contract_class_name(decl: &TypeDecl) -> String {
    let base = if decl.is_interface() {
        decl.name.strip_prefix('I').unwrap_or(&decl.name)
    } else {
        &decl.name
    };
    format!("{base}Contract")
}

/// `<>`, `<,>`, ... for a generic definition of the given arity.
fn open_generic(arity: usize) -> String {
    if arity == 0 {
        return String::new();
    }
    format!("<{}>", ",".repeat(arity - 1))
}

fn closed_generic(parameters: &[String]) -> String {
    if parameters.is_empty() {
        return String::new();
    }
    format!("<{}>", parameters.join(", "))
}

fn contract_class_lines(text: &str, decl: &TypeDecl, contract_name: &str) -> Result<Vec<String>> {
    let unit = indent_unit(line_indent(text, decl.span.start));
    let interface = decl.is_interface();
    let generics = closed_generic(&decl.type_parameters);
    let mut lines = vec![
        format!(
            "[ContractClassFor(typeof({}{}))]",
            decl.name,
            open_generic(decl.type_parameters.len())
        ),
        format!(
            "internal abstract class {contract_name}{generics} : {}{generics}",
            decl.name
        ),
        "{".to_string(),
    ];
    let members = decl
        .members
        .iter()
        .filter(|member| interface || member.is_abstract());
    for (index, member) in members.enumerate() {
        if index > 0 {
            lines.push(String::new());
        }
        for line in member_lines(text, member, interface, unit)? {
            lines.push(indented(unit, line));
        }
    }
    lines.push("}".to_string());
    Ok(lines)
}

fn member_lines(text: &str, member: &Member, interface: bool, unit: &str) -> Result<Vec<String>> {
    let modifiers = if interface { "public" } else { "public override" };
    let member_type = member.type_text.as_deref().map(str::trim).unwrap_or("void");
    match member.kind {
        MemberKind::Method => {
            let parameters: Vec<String> = member
                .parameters
                .iter()
                .map(|parameter| parameter_text(text, parameter))
                .collect();
            let mut header = format!(
                "{modifiers} {member_type} {}{}({})",
                member.name,
                closed_generic(&member.type_parameters),
                parameters.join(", ")
            );
            // Overrides inherit their constraints.
            if interface {
                for clause in &member.constraint_clauses {
                    header.push(' ');
                    header.push_str(clause.trim());
                }
            }
            let mut lines = vec![header];
            lines.extend(throwing_block(unit));
            Ok(lines)
        }
        MemberKind::Property => {
            let mut lines = vec![
                format!("{modifiers} {member_type} {}", member.name),
                "{".to_string(),
            ];
            for (index, accessor) in member.accessors.iter().enumerate() {
                if index > 0 {
                    lines.push(String::new());
                }
                let accessor_modifiers: String = accessor
                    .modifiers
                    .iter()
                    .map(|modifier| format!("{modifier} "))
                    .collect();
                lines.push(format!(
                    "{unit}{accessor_modifiers}{}",
                    accessor.kind.keyword()
                ));
                for line in throwing_block(unit) {
                    lines.push(indented(unit, line));
                }
            }
            lines.push("}".to_string());
            Ok(lines)
        }
        MemberKind::EventField => {
            let names: Vec<&str> = member
                .declarators
                .iter()
                .map(|declarator| declarator.name.as_str())
                .collect();
            let modifiers = if interface {
                "public abstract"
            } else {
                "public abstract override"
            };
            Ok(vec![format!(
                "{modifiers} event {member_type} {};",
                names.join(", ")
            )])
        }
        _ => bail!("unsupported abstract member '{}'", member.name),
    }
}

fn throwing_block(unit: &str) -> [String; 3] {
    [
        "{".to_string(),
        format!("{unit}throw new NotImplementedException();"),
        "}".to_string(),
    ]
}

fn indented(unit: &str, line: String) -> String {
    if line.is_empty() {
        line
    } else {
        format!("{unit}{line}")
    }
}

/// Parameter as written, without its attribute lists.
fn parameter_text(text: &str, parameter: &Parameter) -> String {
    let mut cursor = parameter.span.start;
    let mut stripped = String::new();
    for list in &parameter.attributes.lists {
        stripped.push_str(&text[cursor..list.start]);
        cursor = list.end;
    }
    stripped.push_str(&text[cursor..parameter.span.end]);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
