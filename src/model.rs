use anyhow::Result;
use tree_sitter::{Node, Tree};

use crate::ir::{
    Accessor, AccessorKind, Attribute, AttributeArgument, AttributeSet, Block, CompilationUnit,
    Declarator, Expr, Member, MemberKind, Parameter, Statement, TypeDecl, TypeKind, TypeName,
    UsingDirective,
};
use crate::syntax::{
    self, Span, children, children_of_kind, first_child_of_kind, named_children, node_text,
};

/// Index of a type declaration within one document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct TypeId(pub(crate) usize);

/// Index of a member within its declaring type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MemberId {
    pub(crate) ty: TypeId,
    pub(crate) index: usize,
}

/// Declaration a diagnostic or fix is anchored to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Symbol {
    Type(TypeId),
    Member(MemberId),
    Parameter(MemberId, usize),
    /// Implicit `value` parameter of a property setter.
    ValueParameter(MemberId),
    Field(MemberId, usize),
}

/// Declarations of one document with name binding and location lookup.
#[derive(Clone, Debug)]
pub(crate) struct SemanticModel {
    unit: CompilationUnit,
}

impl SemanticModel {
    pub(crate) fn new(unit: CompilationUnit) -> Self {
        Self { unit }
    }

    /// Parse and lower a document; `None` when the parser produced no tree.
    pub(crate) fn from_source(text: &str) -> Result<Option<Self>> {
        let Some(tree) = syntax::parse(text)? else {
            return Ok(None);
        };
        Ok(Some(Self::new(lower(&tree, text))))
    }

    pub(crate) fn usings(&self) -> &[UsingDirective] {
        &self.unit.usings
    }

    pub(crate) fn first_item(&self) -> Option<usize> {
        self.unit.first_item
    }

    pub(crate) fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDecl)> {
        self.unit
            .types
            .iter()
            .enumerate()
            .map(|(index, decl)| (TypeId(index), decl))
    }

    pub(crate) fn type_decl(&self, id: TypeId) -> &TypeDecl {
        &self.unit.types[id.0]
    }

    pub(crate) fn member(&self, id: MemberId) -> &Member {
        &self.unit.types[id.ty.0].members[id.index]
    }

    pub(crate) fn members(&self, ty: TypeId) -> impl Iterator<Item = (MemberId, &Member)> {
        self.type_decl(ty)
            .members
            .iter()
            .enumerate()
            .map(move |(index, member)| (MemberId { ty, index }, member))
    }

    pub(crate) fn all_members(&self) -> impl Iterator<Item = (MemberId, &Member)> {
        self.types().flat_map(move |(ty, _)| self.members(ty))
    }

    /// Attribute lists of the declaration a symbol names.
    ///
    /// A setter's `value` carries the attributes of its property.
    pub(crate) fn attributes(&self, symbol: Symbol) -> &AttributeSet {
        match symbol {
            Symbol::Type(ty) => &self.type_decl(ty).attributes,
            Symbol::Member(id) | Symbol::ValueParameter(id) | Symbol::Field(id, _) => {
                &self.member(id).attributes
            }
            Symbol::Parameter(id, index) => &self.member(id).parameters[index].attributes,
        }
    }

    /// Source location diagnostics use for a symbol.
    pub(crate) fn location(&self, symbol: Symbol) -> Span {
        match symbol {
            Symbol::Type(ty) => self.type_decl(ty).name_span,
            Symbol::Member(id) | Symbol::ValueParameter(id) => {
                let member = self.member(id);
                match member.kind {
                    MemberKind::Field | MemberKind::EventField => member.declaration_span,
                    _ => member.name_span,
                }
            }
            Symbol::Parameter(id, index) => self.member(id).parameters[index].name_span,
            Symbol::Field(id, _) => self.member(id).declaration_span,
        }
    }

    /// Element name used in diagnostic messages.
    pub(crate) fn name(&self, symbol: Symbol) -> &str {
        match symbol {
            Symbol::Type(ty) => &self.type_decl(ty).name,
            Symbol::Member(id) | Symbol::ValueParameter(id) => &self.member(id).name,
            Symbol::Parameter(id, index) => &self.member(id).parameters[index].name,
            Symbol::Field(id, declarator) => &self.member(id).declarators[declarator].name,
        }
    }

    /// Declaration whose diagnostic location is exactly `span`.
    pub(crate) fn symbol_at(&self, span: Span) -> Option<Symbol> {
        for (id, member) in self.all_members() {
            if let Some(index) = member
                .parameters
                .iter()
                .position(|parameter| parameter.name_span == span)
            {
                return Some(Symbol::Parameter(id, index));
            }
            if self.location(Symbol::Member(id)) == span {
                return Some(Symbol::Member(id));
            }
        }
        self.types()
            .find(|(_, decl)| decl.name_span == span || decl.span == span)
            .map(|(ty, _)| Symbol::Type(ty))
    }

    /// Resolve a simple name used inside a member body.
    pub(crate) fn bind(
        &self,
        member: MemberId,
        accessor: Option<AccessorKind>,
        name: &str,
    ) -> Option<Symbol> {
        let declaring = self.member(member);
        if name == "value" && matches!(accessor, Some(AccessorKind::Set | AccessorKind::Init)) {
            return Some(Symbol::ValueParameter(member));
        }
        if let Some(index) = declaring.parameter_index(name) {
            return Some(Symbol::Parameter(member, index));
        }
        for (id, candidate) in self.members(member.ty) {
            match candidate.kind {
                MemberKind::Field | MemberKind::EventField => {
                    if let Some(index) = candidate
                        .declarators
                        .iter()
                        .position(|declarator| declarator.name == name)
                    {
                        return Some(Symbol::Field(id, index));
                    }
                }
                MemberKind::Property if candidate.name == name => {
                    return Some(Symbol::Member(id));
                }
                _ => {}
            }
        }
        None
    }

    /// Find a type by simple name and number of type parameters.
    pub(crate) fn find_type(&self, name: &str, arity: usize) -> Option<TypeId> {
        self.types()
            .find(|(_, decl)| decl.name == name && decl.type_parameters.len() == arity)
            .map(|(ty, _)| ty)
    }

    /// True when `namespace` is imported in a scope enclosing `offset`.
    pub(crate) fn has_using(&self, offset: usize, namespace: &str) -> bool {
        self.unit
            .usings
            .iter()
            .any(|using| using.namespace == namespace && using.scope.encloses(Span::new(offset, offset)))
    }

    /// Method marked `[ContractInvariantMethod]` in the given type.
    pub(crate) fn invariant_method(&self, ty: TypeId) -> Option<MemberId> {
        self.members(ty)
            .find(|(_, member)| {
                member.kind == MemberKind::Method
                    && member.attributes.contains("ContractInvariantMethod")
            })
            .map(|(id, _)| id)
    }
}

const MODIFIER_KEYWORDS: [&str; 20] = [
    "public", "private", "protected", "internal", "static", "readonly", "abstract", "virtual",
    "override", "sealed", "new", "extern", "unsafe", "volatile", "async", "partial", "const",
    "required", "file", "fixed",
];

/// Lower a tree-sitter C# tree into declarations.
pub(crate) fn lower(tree: &Tree, text: &str) -> CompilationUnit {
    let mut unit = CompilationUnit::default();
    lower_container(
        tree.root_node(),
        text,
        Span::new(0, text.len()),
        true,
        &mut unit,
    );
    unit
}

fn lower_container(
    node: Node<'_>,
    text: &str,
    scope: Span,
    top_level: bool,
    unit: &mut CompilationUnit,
) {
    for child in named_children(node) {
        let kind = child.kind();
        if top_level
            && unit.first_item.is_none()
            && !matches!(kind, "using_directive" | "comment" | "extern_alias_directive")
        {
            unit.first_item = Some(child.start_byte());
        }
        match kind {
            "using_directive" => {
                if let Some(namespace) = using_namespace(child, text) {
                    unit.usings.push(UsingDirective {
                        namespace,
                        span: Span::of(child),
                        scope,
                        top_level,
                    });
                }
            }
            "namespace_declaration" => {
                let body = child
                    .child_by_field_name("body")
                    .or_else(|| first_child_of_kind(child, "declaration_list"));
                if let Some(body) = body {
                    lower_container(body, text, Span::of(body), false, unit);
                }
            }
            "file_scoped_namespace_declaration" => {
                let scope = Span::new(child.start_byte(), text.len());
                lower_container(child, text, scope, false, unit);
            }
            "class_declaration" | "interface_declaration" | "struct_declaration" => {
                lower_type(child, text, unit);
            }
            _ => {}
        }
    }
}

fn using_namespace(node: Node<'_>, text: &str) -> Option<String> {
    let raw = node_text(node, text).trim();
    let raw = raw.strip_prefix("global").map(str::trim_start).unwrap_or(raw);
    let raw = raw.strip_prefix("using")?.trim();
    let raw = raw.strip_suffix(';').unwrap_or(raw).trim();
    if raw.starts_with("static ") || raw.contains('=') {
        return None;
    }
    Some(raw.chars().filter(|c| !c.is_whitespace()).collect())
}

fn lower_type(node: Node<'_>, text: &str, unit: &mut CompilationUnit) {
    let kind = match node.kind() {
        "class_declaration" => TypeKind::Class,
        "interface_declaration" => TypeKind::Interface,
        "struct_declaration" => TypeKind::Struct,
        _ => return,
    };
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let body = node
        .child_by_field_name("body")
        .or_else(|| first_child_of_kind(node, "declaration_list"));
    let decl = TypeDecl {
        kind,
        name: node_text(name_node, text).to_string(),
        name_span: Span::of(name_node),
        span: Span::of(node),
        modifiers: modifiers(node, text),
        attributes: attributes(node, text),
        type_parameters: type_parameters(node, text),
        bases: first_child_of_kind(node, "base_list")
            .map(|list| base_types(list, text))
            .unwrap_or_default(),
        members: Vec::new(),
        body: body.map(Span::of),
    };
    let index = unit.types.len();
    unit.types.push(decl);

    let Some(body) = body else {
        return;
    };
    for child in named_children(body) {
        match child.kind() {
            "class_declaration" | "interface_declaration" | "struct_declaration" => {
                lower_type(child, text, unit);
            }
            _ => {
                if let Some(member) = lower_member(child, text) {
                    unit.types[index].members.push(member);
                }
            }
        }
    }
}

fn base_types(list: Node<'_>, text: &str) -> Vec<TypeName> {
    named_children(list)
        .into_iter()
        .filter_map(|child| match child.kind() {
            "argument_list" | "comment" => None,
            "primary_constructor_base_type" => named_children(child)
                .into_iter()
                .next()
                .map(|inner| TypeName::parse(node_text(inner, text))),
            _ => Some(TypeName::parse(node_text(child, text))),
        })
        .collect()
}

fn type_parameters(node: Node<'_>, text: &str) -> Vec<String> {
    let Some(list) = first_child_of_kind(node, "type_parameter_list") else {
        return Vec::new();
    };
    children_of_kind(list, "type_parameter")
        .into_iter()
        .map(|parameter| {
            parameter
                .child_by_field_name("name")
                .or_else(|| first_child_of_kind(parameter, "identifier"))
                .map(|name| node_text(name, text).to_string())
                .unwrap_or_else(|| node_text(parameter, text).to_string())
        })
        .collect()
}

fn modifiers(node: Node<'_>, text: &str) -> Vec<String> {
    children(node)
        .into_iter()
        .filter_map(|child| {
            if child.kind() == "modifier" {
                Some(node_text(child, text).trim().to_string())
            } else if !child.is_named() && MODIFIER_KEYWORDS.contains(&child.kind()) {
                Some(child.kind().to_string())
            } else {
                None
            }
        })
        .collect()
}

fn attributes(node: Node<'_>, text: &str) -> AttributeSet {
    let mut set = AttributeSet::default();
    for list in children_of_kind(node, "attribute_list") {
        set.lists.push(Span::of(list));
        for attribute in children_of_kind(list, "attribute") {
            if let Some(lowered) = lower_attribute(attribute, text) {
                set.attributes.push(lowered);
            }
        }
    }
    set
}

fn lower_attribute(node: Node<'_>, text: &str) -> Option<Attribute> {
    let name_node = node.child_by_field_name("name")?;
    let name: String = node_text(name_node, text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let arguments = first_child_of_kind(node, "attribute_argument_list")
        .map(|list| {
            children_of_kind(list, "attribute_argument")
                .into_iter()
                .map(|argument| lower_attribute_argument(argument, text))
                .collect()
        })
        .unwrap_or_default();
    Some(Attribute {
        name: simple_attribute_name(&name),
        arguments,
    })
}

fn lower_attribute_argument(node: Node<'_>, text: &str) -> AttributeArgument {
    let typeof_node = named_children(node)
        .into_iter()
        .find(|child| child.kind() == "typeof_expression");
    if let Some(typeof_node) = typeof_node {
        let type_text = match typeof_node.child_by_field_name("type") {
            Some(type_node) => node_text(type_node, text).to_string(),
            None => {
                let raw = node_text(typeof_node, text);
                raw.trim_start_matches("typeof")
                    .trim()
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .to_string()
            }
        };
        return AttributeArgument::TypeOf(TypeName::parse(&type_text));
    }
    AttributeArgument::Text(node_text(node, text).to_string())
}

/// `JetBrains.Annotations.NotNullAttribute` becomes `NotNull`.
pub(crate) fn simple_attribute_name(name: &str) -> String {
    let last = name.rsplit(['.', ':']).next().unwrap_or(name);
    let last = last.split('<').next().unwrap_or(last);
    last.strip_suffix("Attribute")
        .filter(|stripped| !stripped.is_empty())
        .unwrap_or(last)
        .to_string()
}

fn lower_member(node: Node<'_>, text: &str) -> Option<Member> {
    let kind = match node.kind() {
        "method_declaration" => MemberKind::Method,
        "constructor_declaration" => MemberKind::Constructor,
        "property_declaration" => MemberKind::Property,
        "indexer_declaration" => MemberKind::Indexer,
        "field_declaration" => MemberKind::Field,
        "event_declaration" => MemberKind::Event,
        "event_field_declaration" => MemberKind::EventField,
        "operator_declaration" | "conversion_operator_declaration" | "destructor_declaration" => {
            MemberKind::Other
        }
        _ => return None,
    };
    let span = Span::of(node);
    let declaration_start = children(node)
        .into_iter()
        .find(|child| !matches!(child.kind(), "attribute_list" | "comment"))
        .map(|child| child.start_byte())
        .unwrap_or(span.start);
    let mut member = Member {
        kind,
        name: String::new(),
        name_span: span,
        span,
        declaration_span: Span::new(declaration_start, span.end),
        modifiers: modifiers(node, text),
        attributes: attributes(node, text),
        type_text: None,
        type_parameters: Vec::new(),
        constraint_clauses: Vec::new(),
        parameters: Vec::new(),
        body: None,
        accessors: Vec::new(),
        declarators: Vec::new(),
    };

    match kind {
        MemberKind::Field | MemberKind::EventField => {
            let declaration = first_child_of_kind(node, "variable_declaration")?;
            member.type_text = declaration
                .child_by_field_name("type")
                .map(|type_node| node_text(type_node, text).to_string());
            member.declarators = children_of_kind(declaration, "variable_declarator")
                .into_iter()
                .filter_map(|declarator| lower_declarator(declarator, text))
                .collect();
            let first = member.declarators.first()?;
            member.name = first.name.clone();
            member.name_span = first.name_span;
        }
        MemberKind::Indexer => {
            member.name = "this".to_string();
            if let Some(keyword) = children(node).into_iter().find(|child| child.kind() == "this") {
                member.name_span = Span::of(keyword);
            }
            member.type_text = member_type(node, text);
            member.parameters = parameters(node, text);
            member.accessors = accessors(node, text);
        }
        MemberKind::Other => {
            member.name = node.kind().to_string();
        }
        _ => {
            let name_node = node.child_by_field_name("name")?;
            member.name = node_text(name_node, text).to_string();
            member.name_span = Span::of(name_node);
            member.type_text = member_type(node, text);
            member.type_parameters = type_parameters(node, text);
            member.constraint_clauses = children_of_kind(node, "type_parameter_constraints_clause")
                .into_iter()
                .map(|clause| node_text(clause, text).to_string())
                .collect();
            member.parameters = parameters(node, text);
            member.body = node
                .child_by_field_name("body")
                .filter(|body| body.kind() == "block")
                .or_else(|| first_child_of_kind(node, "block"))
                .map(|body| lower_block(body, text));
            member.accessors = accessors(node, text);
        }
    }
    Some(member)
}

fn member_type(node: Node<'_>, text: &str) -> Option<String> {
    node.child_by_field_name("returns")
        .or_else(|| node.child_by_field_name("type"))
        .map(|type_node| node_text(type_node, text).to_string())
}

fn lower_declarator(node: Node<'_>, text: &str) -> Option<Declarator> {
    let name_node = node
        .child_by_field_name("name")
        .or_else(|| first_child_of_kind(node, "identifier"))?;
    Some(Declarator {
        name: node_text(name_node, text).to_string(),
        name_span: Span::of(name_node),
    })
}

fn parameters(node: Node<'_>, text: &str) -> Vec<Parameter> {
    let list = node
        .child_by_field_name("parameters")
        .or_else(|| first_child_of_kind(node, "parameter_list"))
        .or_else(|| first_child_of_kind(node, "bracketed_parameter_list"));
    let Some(list) = list else {
        return Vec::new();
    };
    children_of_kind(list, "parameter")
        .into_iter()
        .filter_map(|parameter| {
            let name_node = parameter.child_by_field_name("name")?;
            Some(Parameter {
                name: node_text(name_node, text).to_string(),
                name_span: Span::of(name_node),
                span: Span::of(parameter),
                type_text: parameter
                    .child_by_field_name("type")
                    .map(|type_node| node_text(type_node, text).to_string())
                    .unwrap_or_default(),
                modifiers: children(parameter)
                    .into_iter()
                    .filter(|child| {
                        matches!(child.kind(), "modifier" | "parameter_modifier")
                            || matches!(child.kind(), "ref" | "out" | "in" | "params" | "this")
                    })
                    .map(|child| node_text(child, text).to_string())
                    .collect(),
                attributes: attributes(parameter, text),
            })
        })
        .collect()
}

fn accessors(node: Node<'_>, text: &str) -> Vec<Accessor> {
    let list = node
        .child_by_field_name("accessors")
        .or_else(|| first_child_of_kind(node, "accessor_list"));
    let Some(list) = list else {
        return Vec::new();
    };
    children_of_kind(list, "accessor_declaration")
        .into_iter()
        .filter_map(|accessor| {
            let kind = children(accessor)
                .into_iter()
                .find_map(|child| AccessorKind::from_keyword(child.kind()))?;
            Some(Accessor {
                kind,
                modifiers: modifiers(accessor, text),
                body: first_child_of_kind(accessor, "block").map(|body| lower_block(body, text)),
            })
        })
        .collect()
}

fn lower_block(node: Node<'_>, text: &str) -> Block {
    let statements = named_children(node)
        .into_iter()
        .filter(|child| child.kind() != "comment")
        .map(|statement| Statement {
            span: Span::of(statement),
            expression: if statement.kind() == "expression_statement" {
                named_children(statement)
                    .into_iter()
                    .find(|child| child.kind() != "comment")
                    .map(|expression| lower_expr(expression, text))
            } else {
                None
            },
        })
        .collect();

    let mut invocations = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "invocation_expression" {
            invocations.push(lower_expr(current, text));
        }
        let mut nested = named_children(current);
        nested.reverse();
        stack.extend(nested);
    }

    Block {
        span: Span::of(node),
        statements,
        invocations,
    }
}

fn lower_expr(node: Node<'_>, text: &str) -> Expr {
    match node.kind() {
        "identifier" => Expr::Identifier(node_text(node, text).to_string()),
        "generic_name" => Expr::Identifier(simple_name(node, text)),
        "member_access_expression" => {
            let (Some(receiver), Some(name)) = (
                node.child_by_field_name("expression"),
                node.child_by_field_name("name"),
            ) else {
                return Expr::Other;
            };
            Expr::MemberAccess {
                receiver: Box::new(lower_expr(receiver, text)),
                name: simple_name(name, text),
            }
        }
        "invocation_expression" => {
            let Some(function) = node.child_by_field_name("function") else {
                return Expr::Other;
            };
            let arguments = node
                .child_by_field_name("arguments")
                .map(|list| {
                    children_of_kind(list, "argument")
                        .into_iter()
                        .filter_map(|argument| named_children(argument).into_iter().last())
                        .map(|expression| lower_expr(expression, text))
                        .collect()
                })
                .unwrap_or_default();
            Expr::Invocation {
                function: Box::new(lower_expr(function, text)),
                function_text: node_text(function, text)
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect(),
                arguments,
            }
        }
        "binary_expression" => {
            let (Some(left), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) else {
                return Expr::Other;
            };
            let operator = node
                .child_by_field_name("operator")
                .map(|operator| node_text(operator, text).to_string())
                .unwrap_or_else(|| {
                    text.get(left.end_byte()..right.start_byte())
                        .unwrap_or("")
                        .trim()
                        .to_string()
                });
            Expr::Binary {
                left: Box::new(lower_expr(left, text)),
                operator,
                right: Box::new(lower_expr(right, text)),
            }
        }
        "prefix_unary_expression" => {
            let is_not = children(node)
                .first()
                .is_some_and(|operator| operator.kind() == "!");
            match named_children(node).into_iter().last() {
                Some(operand) if is_not => Expr::Not(Box::new(lower_expr(operand, text))),
                _ => Expr::Other,
            }
        }
        "null_literal" => Expr::Null,
        _ => Expr::Other,
    }
}

fn simple_name(node: Node<'_>, text: &str) -> String {
    if node.kind() == "generic_name" {
        if let Some(identifier) = first_child_of_kind(node, "identifier") {
            return node_text(identifier, text).to_string();
        }
        let raw = node_text(node, text);
        return raw.split('<').next().unwrap_or(raw).trim().to_string();
    }
    node_text(node, text).to_string()
}
