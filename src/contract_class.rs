use std::collections::BTreeMap;

use crate::ir::{AttributeArgument, AttributeSet, Member, TypeDecl, TypeName};
use crate::model::{MemberId, SemanticModel, Symbol, TypeId};

/// Link from a contract class to the type it provides contracts for.
#[derive(Clone, Debug)]
struct ContractLink {
    target: TypeId,
    /// Target type parameter to the argument the contract class closes it with.
    substitutions: BTreeMap<String, String>,
}

/// Contract-class links of one document, in both directions.
#[derive(Clone, Debug, Default)]
pub(crate) struct ContractClassIndex {
    targets: BTreeMap<TypeId, ContractLink>,
    contract_classes: BTreeMap<TypeId, TypeId>,
}

impl ContractClassIndex {
    pub(crate) fn build(model: &SemanticModel) -> Self {
        let mut targets = BTreeMap::new();
        for (ty, decl) in model.types() {
            let Some(reference) = typeof_argument(&decl.attributes, "ContractClassFor") else {
                continue;
            };
            if let Some(link) = resolve_link(model, decl, reference) {
                if link.target != ty {
                    targets.insert(ty, link);
                }
            }
        }

        let mut contract_classes = BTreeMap::new();
        for (ty, decl) in model.types() {
            let Some(reference) = typeof_argument(&decl.attributes, "ContractClass") else {
                continue;
            };
            let Some(contract) = model.find_type(&reference.name, reference.arity()) else {
                continue;
            };
            if targets
                .get(&contract)
                .is_some_and(|link: &ContractLink| link.target == ty)
            {
                contract_classes.insert(ty, contract);
            }
        }
        for (contract, link) in &targets {
            contract_classes.entry(link.target).or_insert(*contract);
        }

        Self {
            targets,
            contract_classes,
        }
    }

    pub(crate) fn contract_class_of(&self, ty: TypeId) -> Option<TypeId> {
        self.contract_classes.get(&ty).copied()
    }

    /// Member of the linked target that a contract-class member implements.
    pub(crate) fn declaring_member(
        &self,
        model: &SemanticModel,
        member: MemberId,
    ) -> Option<MemberId> {
        let link = self.targets.get(&member.ty)?;
        let source = model.member(member);
        let interface = model.type_decl(link.target).is_interface();
        model
            .members(link.target)
            .find(|(_, candidate)| {
                implements(source, candidate, interface, &link.substitutions)
            })
            .map(|(id, _)| id)
    }

    /// Member of the linked contract class that hosts contracts for `member`.
    pub(crate) fn implementing_member(
        &self,
        model: &SemanticModel,
        member: MemberId,
    ) -> Option<MemberId> {
        let contract = self.contract_class_of(member.ty)?;
        model
            .members(contract)
            .find(|(id, _)| self.declaring_member(model, *id) == Some(member))
            .map(|(id, _)| id)
    }

    /// Declaration that should carry the annotation for `symbol`.
    ///
    /// Contract-class members map to the member they implement; anything that does
    /// not resolve is returned unchanged.
    pub(crate) fn annotation_target(&self, model: &SemanticModel, symbol: Symbol) -> Symbol {
        match symbol {
            Symbol::Member(id) => self
                .declaring_member(model, id)
                .map(Symbol::Member)
                .unwrap_or(symbol),
            Symbol::ValueParameter(id) => self
                .declaring_member(model, id)
                .map(Symbol::ValueParameter)
                .unwrap_or(symbol),
            Symbol::Parameter(id, index) => self
                .declaring_member(model, id)
                .filter(|target| model.member(*target).parameters.len() > index)
                .map(|target| Symbol::Parameter(target, index))
                .unwrap_or(symbol),
            Symbol::Type(_) | Symbol::Field(_, _) => symbol,
        }
    }
}

fn typeof_argument<'a>(attributes: &'a AttributeSet, name: &str) -> Option<&'a TypeName> {
    attributes
        .find(name)?
        .arguments
        .iter()
        .find_map(|argument| match argument {
            AttributeArgument::TypeOf(type_name) => Some(type_name),
            AttributeArgument::Text(_) => None,
        })
}

fn resolve_link(
    model: &SemanticModel,
    contract: &TypeDecl,
    reference: &TypeName,
) -> Option<ContractLink> {
    let target = model.find_type(&reference.name, reference.arity())?;
    // `typeof(IFoo<>)` names the open definition; close it with the base list entry.
    let arguments = if reference.is_open() {
        contract
            .bases
            .iter()
            .find(|base| base.name == reference.name && base.arity() == reference.arity())
            .map(|base| base.arguments.clone())
            .unwrap_or_default()
    } else {
        reference.arguments.clone()
    };
    let substitutions = model
        .type_decl(target)
        .type_parameters
        .iter()
        .cloned()
        .zip(arguments)
        .collect();
    Some(ContractLink {
        target,
        substitutions,
    })
}

fn implements(
    source: &Member,
    candidate: &Member,
    interface: bool,
    substitutions: &BTreeMap<String, String>,
) -> bool {
    if source.kind != candidate.kind
        || source.name != candidate.name
        || source.parameters.len() != candidate.parameters.len()
        || source.type_parameters.len() != candidate.type_parameters.len()
    {
        return false;
    }
    let empty = BTreeMap::new();
    // Method type parameters correspond by position and shadow the type-level ones.
    let mut substitutions = substitutions.clone();
    substitutions.extend(
        candidate
            .type_parameters
            .iter()
            .cloned()
            .zip(source.type_parameters.iter().cloned()),
    );
    let substitutions = &substitutions;
    let parameters_match = source
        .parameters
        .iter()
        .zip(&candidate.parameters)
        .all(|(left, right)| {
            normalize_type(&left.type_text, &empty)
                == normalize_type(&right.type_text, substitutions)
        });
    if !parameters_match {
        return false;
    }
    if interface {
        return true;
    }
    let overridable = candidate.is_abstract() || candidate.has_modifier("virtual");
    let returns_match = match (&source.type_text, &candidate.type_text) {
        (Some(left), Some(right)) => {
            normalize_type(left, &empty) == normalize_type(right, substitutions)
        }
        (None, None) => true,
        _ => false,
    };
    overridable && source.is_override() && returns_match
}

/// Canonical spelling of a type for signature comparison.
///
/// Qualified names reduce to their last segment and CLR names of built-in types to
/// their keyword; type parameters are replaced through `substitutions`.
pub(crate) fn normalize_type(text: &str, substitutions: &BTreeMap<String, String>) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.replace("global::", "");
    let mut normalized = String::with_capacity(compact.len());
    let mut token = String::new();
    for c in compact.chars() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            token.push(c);
            continue;
        }
        if !token.is_empty() {
            normalized.push_str(&normalize_token(&token, substitutions));
            token.clear();
        }
        normalized.push(c);
    }
    if !token.is_empty() {
        normalized.push_str(&normalize_token(&token, substitutions));
    }
    normalized
}

fn normalize_token(token: &str, substitutions: &BTreeMap<String, String>) -> String {
    if let Some(replacement) = substitutions.get(token) {
        return normalize_type(replacement, &BTreeMap::new());
    }
    let simple = token.rsplit('.').next().unwrap_or(token);
    keyword_alias(simple).unwrap_or(simple).to_string()
}

fn keyword_alias(name: &str) -> Option<&'static str> {
    let keyword = match name {
        "Object" => "object",
        "String" => "string",
        "Boolean" => "bool",
        "Byte" => "byte",
        "SByte" => "sbyte",
        "Char" => "char",
        "Decimal" => "decimal",
        "Double" => "double",
        "Single" => "float",
        "Int16" => "short",
        "Int32" => "int",
        "Int64" => "long",
        "UInt16" => "ushort",
        "UInt32" => "uint",
        "UInt64" => "ulong",
        "Void" => "void",
        _ => return None,
    };
    Some(keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(source: &str) -> SemanticModel {
        SemanticModel::from_source(source)
            .expect("parse")
            .expect("tree")
    }

    fn type_named(model: &SemanticModel, name: &str) -> TypeId {
        model
            .types()
            .find(|(_, decl)| decl.name == name)
            .map(|(ty, _)| ty)
            .expect("type")
    }

    #[test]
    fn links_interface_and_contract_class_both_ways() {
        let model = model(
            r#"
[ContractClass(typeof(ClassAContract))]
interface IClassA
{
    object MethodX(object varOne);
}

[ContractClassFor(typeof(IClassA))]
abstract class ClassAContract : IClassA
{
    public object MethodX(object varOne)
    {
        return null;
    }
}
"#,
        );
        let index = ContractClassIndex::build(&model);
        let interface = type_named(&model, "IClassA");
        let contract = type_named(&model, "ClassAContract");
        assert_eq!(index.contract_class_of(interface), Some(contract));

        let (implementation, _) = model.members(contract).next().expect("member");
        let (declaration, _) = model.members(interface).next().expect("member");
        assert_eq!(
            index.declaring_member(&model, implementation),
            Some(declaration)
        );
        assert_eq!(
            index.implementing_member(&model, declaration),
            Some(implementation)
        );
        assert_eq!(
            index.annotation_target(&model, Symbol::Parameter(implementation, 0)),
            Symbol::Parameter(declaration, 0)
        );
    }

    #[test]
    fn abstract_targets_require_matching_override() {
        let model = model(
            r#"
[ContractClass(typeof(ClassAContract))]
abstract class ClassA
{
    public abstract string MethodX(int varOne);
    public abstract string MethodY(int varOne);
}

[ContractClassFor(typeof(ClassA))]
abstract class ClassAContract : ClassA
{
    public override String MethodX(System.Int32 varOne) { return null; }
    public String MethodY(long varOne) { return null; }
}
"#,
        );
        let index = ContractClassIndex::build(&model);
        let contract = type_named(&model, "ClassAContract");
        let members: Vec<_> = model.members(contract).map(|(id, _)| id).collect();
        assert!(index.declaring_member(&model, members[0]).is_some());
        assert!(index.declaring_member(&model, members[1]).is_none());
        assert_eq!(
            index.annotation_target(&model, Symbol::Member(members[1])),
            Symbol::Member(members[1])
        );
    }

    #[test]
    fn open_generic_link_is_closed_against_base_list() {
        let model = model(
            r#"
[ContractClass(typeof(ClassAContract<>))]
interface IClassA<T>
{
    T MethodX(T varOne);
}

[ContractClassFor(typeof(IClassA<>))]
abstract class ClassAContract<TItem> : IClassA<TItem>
{
    public TItem MethodX(TItem varOne) { return default(TItem); }
}
"#,
        );
        let index = ContractClassIndex::build(&model);
        let contract = type_named(&model, "ClassAContract");
        let (implementation, _) = model.members(contract).next().expect("member");
        assert!(index.declaring_member(&model, implementation).is_some());
    }

    #[test]
    fn method_type_parameters_match_by_position() {
        let model = model(
            r#"
[ContractClass(typeof(ClassAContract))]
abstract class ClassA
{
    public abstract T MethodX<T, TKey>(T varOne, TKey varTwo);
    public abstract void MethodY<T, TKey>(T varOne, TKey varTwo);
}

[ContractClassFor(typeof(ClassA))]
abstract class ClassAContract : ClassA
{
    public override TItem MethodX<TItem, TId>(TItem varOne, TId varTwo) { return default(TItem); }
    public override void MethodY<TItem, TId>(TId varOne, TItem varTwo) { }
}
"#,
        );
        let index = ContractClassIndex::build(&model);
        let target = type_named(&model, "ClassA");
        let contract = type_named(&model, "ClassAContract");
        let declarations: Vec<_> = model.members(target).map(|(id, _)| id).collect();
        let members: Vec<_> = model.members(contract).map(|(id, _)| id).collect();
        assert_eq!(
            index.declaring_member(&model, members[0]),
            Some(declarations[0])
        );
        assert!(index.declaring_member(&model, members[1]).is_none());
    }

    #[test]
    fn normalize_type_aliases_and_substitutes() {
        let mut substitutions = BTreeMap::new();
        substitutions.insert("T".to_string(), "System.String".to_string());
        assert_eq!(
            normalize_type("System.Collections.Generic.IList< T >", &substitutions),
            "IList<string>"
        );
        assert_eq!(normalize_type("Object[]", &BTreeMap::new()), "object[]");
    }
}
