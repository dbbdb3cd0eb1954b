use anyhow::Result;

use crate::engine::AnalysisContext;
use crate::fix::{TextEdit, add_declaration_attribute, append_usings};
use crate::ir::{AttributeArgument, Member, MemberKind};
use crate::model::Symbol;
use crate::rules::{Diagnostic, Rule, RuleMetadata};

const CONTRACTS_FULL: &str = "\"CONTRACTS_FULL\"";

/// Rule that reports contract invariant methods compiled into every build.
///
/// Without `[Conditional("CONTRACTS_FULL")]` the invariant method stays in builds that
/// do not run the contract rewriter.
#[derive(Default)]
pub(crate) struct ConditionalForContractInvariantRule;

crate::register_rule!(ConditionalForContractInvariantRule);

impl Rule for ConditionalForContractInvariantRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "ConditionalForContractInvariant",
            name: "Contract invariant method without [Conditional]",
            description: "Contract invariant methods should be conditional on CONTRACTS_FULL",
            fix_title: "Add [Conditional(\"CONTRACTS_FULL\")] attribute",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>> {
        let model = &context.model;
        Ok(model
            .all_members()
            .filter(|(_, member)| is_unconditional_invariant(member))
            .map(|(id, _)| {
                Diagnostic::for_symbol(model, Symbol::Member(id), |name| {
                    format!(
                        "Method '{name}' is the contract invariant method but does not have a [Conditional(\"CONTRACTS_FULL\")] attribute."
                    )
                })
            })
            .collect())
    }

    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>> {
        let model = &context.model;
        let Some(Symbol::Member(id)) = model.symbol_at(diagnostic.location) else {
            return Ok(Vec::new());
        };
        let member = model.member(id);
        let attribute = add_declaration_attribute(
            &context.text,
            member.span,
            &member.attributes.lists,
            &format!("Conditional({CONTRACTS_FULL})"),
        );
        let mut edits = vec![attribute];
        edits.extend(append_usings(
            model,
            &context.text,
            member.span.start,
            &["System.Diagnostics"],
        ));
        Ok(edits)
    }
}

fn is_unconditional_invariant(member: &Member) -> bool {
    if member.kind != MemberKind::Method || !member.attributes.contains("ContractInvariantMethod") {
        return false;
    }
    !member.attributes.attributes.iter().any(|attribute| {
        attribute.name == "Conditional"
            && attribute.arguments.iter().any(|argument| {
                matches!(argument, AttributeArgument::Text(text) if text.trim() == CONTRACTS_FULL)
            })
    })
}

#[cfg(test)]
mod tests {
    use crate::test_harness::{analyze_source, findings, fix_source, positions};

    const RULE: &str = "ConditionalForContractInvariant";

    fn assert_no_findings(source: &str) {
        let output = analyze_source(RULE, source);
        let found = findings(&output, RULE);
        assert!(found.is_empty(), "expected no findings, got {found:?}");
    }

    #[test]
    fn conditional_for_contract_invariant_reports_missing_attribute() {
        let source = r#"
using System.Diagnostics.Contracts;
using System.Diagnostics.CodeAnalysis;

namespace Test
{
    class Class
    {
        private object _field;

        [ContractInvariantMethod]
        [SuppressMessage("Microsoft.Performance", "CA1822: MarkMembersAsStatic", Justification = "Required for code contracts.")]
        private void ObjectInvariant()
        {
            Contract.Invariant(_field != null);
        }
    }
}"#;
        let output = analyze_source(RULE, source);
        let found = findings(&output, RULE);
        assert_eq!(positions(&output, RULE), vec![(13, 22)], "got {found:?}");
        assert_eq!(found[0].name, "ObjectInvariant");
        assert_eq!(
            found[0].message,
            "Method 'ObjectInvariant' is the contract invariant method but does not have a [Conditional(\"CONTRACTS_FULL\")] attribute."
        );

        let fixed = fix_source(RULE, source);
        assert_eq!(
            fixed,
            r#"
using System.Diagnostics.Contracts;
using System.Diagnostics.CodeAnalysis;
using System.Diagnostics;

namespace Test
{
    class Class
    {
        private object _field;

        [ContractInvariantMethod]
        [SuppressMessage("Microsoft.Performance", "CA1822: MarkMembersAsStatic", Justification = "Required for code contracts.")]
        [Conditional("CONTRACTS_FULL")]
        private void ObjectInvariant()
        {
            Contract.Invariant(_field != null);
        }
    }
}"#
        );
        assert_no_findings(&fixed);
    }

    #[test]
    fn conditional_for_contract_invariant_accepts_discrete_attribute() {
        assert_no_findings(
            r#"
using System.Diagnostics;
using System.Diagnostics.Contracts;

namespace Test
{
    class Class
    {
        private object _field;

        [ContractInvariantMethod]
        [Conditional("CONTRACTS_FULL")]
        private void ObjectInvariant()
        {
            Contract.Invariant(_field != null);
        }
    }
}"#,
        );
    }

    #[test]
    fn conditional_for_contract_invariant_accepts_qualified_combined_attribute() {
        assert_no_findings(
            r#"
using System.Diagnostics.Contracts;

namespace Test
{
    class Class
    {
        private object _field;

        [ContractInvariantMethod, System.Diagnostics.Conditional("CONTRACTS_FULL")]
        private void ObjectInvariant()
        {
            Contract.Invariant(_field != null);
        }
    }
}"#,
        );
    }

    #[test]
    fn conditional_for_contract_invariant_requires_contracts_full_symbol() {
        let source = r#"
using System.Diagnostics;
using System.Diagnostics.Contracts;

namespace Test
{
    class Class
    {
        private object _field;

        [ContractInvariantMethod, Conditional("DEBUG")]
        private void ObjectInvariant()
        {
            Contract.Invariant(_field != null);
        }
    }
}"#;
        let output = analyze_source(RULE, source);
        assert_eq!(positions(&output, RULE), vec![(12, 22)]);

        let fixed = fix_source(RULE, source);
        assert!(
            fixed.contains(
                "[ContractInvariantMethod, Conditional(\"DEBUG\")]\n        [Conditional(\"CONTRACTS_FULL\")]\n        private void ObjectInvariant()"
            ),
            "expected attribute on its own line, got {fixed}"
        );
        assert!(
            !fixed.contains("using System.Diagnostics;\nusing System.Diagnostics;"),
            "using must not be duplicated"
        );
    }
}
