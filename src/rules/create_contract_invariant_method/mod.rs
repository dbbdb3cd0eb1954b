use anyhow::Result;

use crate::engine::AnalysisContext;
use crate::fix::{TextEdit, append_member, prepend_usings};
use crate::ir::{MemberKind, TypeKind};
use crate::model::{SemanticModel, Symbol, TypeId};
use crate::rules::{Diagnostic, Rule, RuleMetadata};

const INVARIANT_METHOD: [&str; 6] = [
    "[ContractInvariantMethod]",
    r#"[SuppressMessage("Microsoft.Performance", "CA1822: MarkMembersAsStatic", Justification = "Required for code contracts.")]"#,
    r#"[Conditional("CONTRACTS_FULL")]"#,
    "private void ObjectInvariant()",
    "{",
    "}",
];

/// Rule that reports classes with annotated fields but no contract invariant method.
#[derive(Default)]
pub(crate) struct CreateContractInvariantMethodRule;

crate::register_rule!(CreateContractInvariantMethodRule);

impl Rule for CreateContractInvariantMethodRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "CreateContractInvariantMethod",
            name: "Missing contract invariant method",
            description: "Classes with [NotNull] fields should have a contract invariant method",
            fix_title: "Add contract invariant method",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<Diagnostic>> {
        let model = &context.model;
        Ok(model
            .types()
            .filter(|(ty, _)| needs_invariant_method(model, *ty))
            .map(|(ty, _)| {
                Diagnostic::for_symbol(model, Symbol::Type(ty), |name| {
                    format!(
                        "Class '{name}' has [NotNull] annotations on fields but no contract invariant method."
                    )
                })
            })
            .collect())
    }

    fn fix(&self, context: &AnalysisContext, diagnostic: &Diagnostic) -> Result<Vec<TextEdit>> {
        let model = &context.model;
        let Some(Symbol::Type(ty)) = model.symbol_at(diagnostic.location) else {
            return Ok(Vec::new());
        };
        let decl = model.type_decl(ty);
        let lines: Vec<String> = INVARIANT_METHOD
            .iter()
            .map(|line| line.to_string())
            .collect();
        let Some(member) = append_member(&context.text, decl, &lines) else {
            return Ok(Vec::new());
        };
        let mut edits = Vec::new();
        edits.extend(prepend_usings(
            model,
            &context.text,
            decl.span.start,
            &[
                "System.Diagnostics",
                "System.Diagnostics.Contracts",
                "System.Diagnostics.CodeAnalysis",
            ],
        ));
        edits.push(member);
        Ok(edits)
    }
}

fn needs_invariant_method(model: &SemanticModel, ty: TypeId) -> bool {
    let decl = model.type_decl(ty);
    if decl.kind != TypeKind::Class || model.invariant_method(ty).is_some() {
        return false;
    }
    decl.members.iter().any(|member| {
        member.kind == MemberKind::Field
            && member.attributes.has_not_null()
            && !member.has_modifier("const")
            && !(member.has_modifier("static") && member.has_modifier("readonly"))
    })
}

#[cfg(test)]
mod tests {
    use crate::test_harness::{analyze_source, findings, fix_source, positions};

    const RULE: &str = "CreateContractInvariantMethod";

    fn assert_fix(original: &str, expected: &str) {
        let fixed = fix_source(RULE, original);
        assert_eq!(fixed, expected);
        let output = analyze_source(RULE, &fixed);
        assert!(
            positions(&output, RULE).is_empty(),
            "expected no findings after fix, got {:?}",
            findings(&output, RULE)
        );
    }

    #[test]
    fn create_contract_invariant_method_ignores_classes_without_annotated_fields() {
        let source = r#"
using System.Diagnostics.Contracts;
using JetBrains.Annotations;

namespace Test
{
    class ClassA
    {
        private object _fieldA;

        [NotNull]
        public object PropertyY { get; set; }
    }

    class ClassB
    {
        [NotNull] private static readonly object Shared = new object();
        [NotNull] private const string Name = "name";
    }

    class ClassC
    {
        [NotNull] private object _fieldA;

        [ContractInvariantMethod]
        private void Invariants()
        {
            Contract.Invariant(_fieldA != null);
        }
    }
}"#;
        let output = analyze_source(RULE, source);
        let found = findings(&output, RULE);
        assert!(found.is_empty(), "expected no findings, got {found:?}");
    }

    #[test]
    fn create_contract_invariant_method_reports_class_with_annotated_field() {
        let source = r#"
using System.Diagnostics.CodeAnalysis;
using System.Diagnostics.Contracts;
using JetBrains.Annotations;

namespace Test
{
    class ClassA
    {
        [NotNull] private readonly object _fieldA;

        ClassA(object varOne)
        {
            _fieldA = varOne;
        }
    }
}"#;
        let output = analyze_source(RULE, source);
        let found = findings(&output, RULE);
        assert_eq!(positions(&output, RULE), vec![(8, 11)], "got {found:?}");
        assert_eq!(
            found[0].message,
            "Class 'ClassA' has [NotNull] annotations on fields but no contract invariant method."
        );

        assert_fix(
            source,
            r#"
using System.Diagnostics;
using System.Diagnostics.CodeAnalysis;
using System.Diagnostics.Contracts;
using JetBrains.Annotations;

namespace Test
{
    class ClassA
    {
        [NotNull] private readonly object _fieldA;

        ClassA(object varOne)
        {
            _fieldA = varOne;
        }

        [ContractInvariantMethod]
        [SuppressMessage("Microsoft.Performance", "CA1822: MarkMembersAsStatic", Justification = "Required for code contracts.")]
        [Conditional("CONTRACTS_FULL")]
        private void ObjectInvariant()
        {
        }
    }
}"#,
        );
    }

    #[test]
    fn create_contract_invariant_method_fix_adds_usings_inside_namespace() {
        let source = r#"
namespace Test
{
    using System.Diagnostics.CodeAnalysis;
    using JetBrains.Annotations;

    class ClassA
    {
        [NotNull] private object _fieldA;
    }
}"#;
        let output = analyze_source(RULE, source);
        assert_eq!(positions(&output, RULE), vec![(7, 11)]);

        assert_fix(
            source,
            r#"
namespace Test
{
    using System.Diagnostics;
    using System.Diagnostics.Contracts;
    using System.Diagnostics.CodeAnalysis;
    using JetBrains.Annotations;

    class ClassA
    {
        [NotNull] private object _fieldA;

        [ContractInvariantMethod]
        [SuppressMessage("Microsoft.Performance", "CA1822: MarkMembersAsStatic", Justification = "Required for code contracts.")]
        [Conditional("CONTRACTS_FULL")]
        private void ObjectInvariant()
        {
        }
    }
}"#,
        );
    }
}
