use crate::syntax::Span;

/// Intermediate representation for the declarations of one C# document.
#[derive(Clone, Debug, Default)]
pub(crate) struct CompilationUnit {
    pub(crate) usings: Vec<UsingDirective>,
    /// Types in document order; nested types follow their container.
    pub(crate) types: Vec<TypeDecl>,
    /// Start of the first non-using top-level item.
    pub(crate) first_item: Option<usize>,
}

/// `using` directive and the region where it is visible.
#[derive(Clone, Debug)]
pub(crate) struct UsingDirective {
    pub(crate) namespace: String,
    pub(crate) span: Span,
    pub(crate) scope: Span,
    pub(crate) top_level: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TypeKind {
    Class,
    Interface,
    Struct,
}

/// Class, interface or struct declaration.
#[derive(Clone, Debug)]
pub(crate) struct TypeDecl {
    pub(crate) kind: TypeKind,
    pub(crate) name: String,
    pub(crate) name_span: Span,
    pub(crate) span: Span,
    pub(crate) modifiers: Vec<String>,
    pub(crate) attributes: AttributeSet,
    pub(crate) type_parameters: Vec<String>,
    pub(crate) bases: Vec<TypeName>,
    pub(crate) members: Vec<Member>,
    /// Declaration list including braces.
    pub(crate) body: Option<Span>,
}

impl TypeDecl {
    pub(crate) fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|value| value == modifier)
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub(crate) fn is_abstract_class(&self) -> bool {
        self.kind == TypeKind::Class && self.has_modifier("abstract")
    }
}

/// Name of a referenced type split into its simple name and type arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TypeName {
    pub(crate) text: String,
    pub(crate) name: String,
    pub(crate) arguments: Vec<String>,
}

impl TypeName {
    pub(crate) fn parse(text: &str) -> Self {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let compact = compact.trim_start_matches("global::").to_string();
        let (head, arguments) = match compact.find('<') {
            Some(open) if compact.ends_with('>') => {
                let inner = &compact[open + 1..compact.len() - 1];
                (compact[..open].to_string(), split_type_arguments(inner))
            }
            _ => (compact.clone(), Vec::new()),
        };
        let name = head.rsplit('.').next().unwrap_or(&head).to_string();
        Self {
            text: compact,
            name,
            arguments,
        }
    }

    pub(crate) fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// True for unbound generic references such as `IFoo<>` or `IBar<,>`.
    pub(crate) fn is_open(&self) -> bool {
        !self.arguments.is_empty() && self.arguments.iter().all(|arg| arg.is_empty())
    }
}

fn split_type_arguments(inner: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '<' | '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            '>' | ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => arguments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    arguments.push(current);
    arguments
}

/// Attribute lists attached to a declaration.
#[derive(Clone, Debug, Default)]
pub(crate) struct AttributeSet {
    pub(crate) lists: Vec<Span>,
    pub(crate) attributes: Vec<Attribute>,
}

impl AttributeSet {
    pub(crate) fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub(crate) fn has_not_null(&self) -> bool {
        self.contains("NotNull")
    }
}

/// Single attribute with its name reduced to the simple form (`NotNull`).
#[derive(Clone, Debug)]
pub(crate) struct Attribute {
    pub(crate) name: String,
    pub(crate) arguments: Vec<AttributeArgument>,
}

#[derive(Clone, Debug)]
pub(crate) enum AttributeArgument {
    TypeOf(TypeName),
    Text(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MemberKind {
    Method,
    Constructor,
    Property,
    Indexer,
    Field,
    Event,
    EventField,
    Other,
}

/// Member of a type declaration.
#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub(crate) kind: MemberKind,
    pub(crate) name: String,
    pub(crate) name_span: Span,
    pub(crate) span: Span,
    /// Declaration without its leading attribute lists.
    pub(crate) declaration_span: Span,
    pub(crate) modifiers: Vec<String>,
    pub(crate) attributes: AttributeSet,
    /// Return, property, field or event type as written.
    pub(crate) type_text: Option<String>,
    pub(crate) type_parameters: Vec<String>,
    /// `where` clauses as written.
    pub(crate) constraint_clauses: Vec<String>,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) body: Option<Block>,
    pub(crate) accessors: Vec<Accessor>,
    pub(crate) declarators: Vec<Declarator>,
}

impl Member {
    pub(crate) fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|value| value == modifier)
    }

    pub(crate) fn is_override(&self) -> bool {
        self.has_modifier("override")
    }

    pub(crate) fn is_abstract(&self) -> bool {
        self.has_modifier("abstract")
    }

    pub(crate) fn is_void(&self) -> bool {
        self.type_text.as_deref().map(str::trim) == Some("void")
    }

    pub(crate) fn accessor(&self, kind: AccessorKind) -> Option<&Accessor> {
        self.accessors.iter().find(|accessor| accessor.kind == kind)
    }

    pub(crate) fn setter(&self) -> Option<&Accessor> {
        self.accessor(AccessorKind::Set)
            .or_else(|| self.accessor(AccessorKind::Init))
    }

    pub(crate) fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters
            .iter()
            .position(|parameter| parameter.name == name)
    }
}

/// Formal parameter of a method, constructor or indexer.
#[derive(Clone, Debug)]
pub(crate) struct Parameter {
    pub(crate) name: String,
    pub(crate) name_span: Span,
    pub(crate) span: Span,
    pub(crate) type_text: String,
    pub(crate) modifiers: Vec<String>,
    pub(crate) attributes: AttributeSet,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum AccessorKind {
    Get,
    Set,
    Init,
    Add,
    Remove,
}

impl AccessorKind {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            AccessorKind::Get => "get",
            AccessorKind::Set => "set",
            AccessorKind::Init => "init",
            AccessorKind::Add => "add",
            AccessorKind::Remove => "remove",
        }
    }

    pub(crate) fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "get" => Some(AccessorKind::Get),
            "set" => Some(AccessorKind::Set),
            "init" => Some(AccessorKind::Init),
            "add" => Some(AccessorKind::Add),
            "remove" => Some(AccessorKind::Remove),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Accessor {
    pub(crate) kind: AccessorKind,
    pub(crate) modifiers: Vec<String>,
    pub(crate) body: Option<Block>,
}

/// Variable declared by a field or event field declaration.
#[derive(Clone, Debug)]
pub(crate) struct Declarator {
    pub(crate) name: String,
    pub(crate) name_span: Span,
}

/// Statement block with its top-level statements and every invocation inside it.
#[derive(Clone, Debug)]
pub(crate) struct Block {
    pub(crate) span: Span,
    pub(crate) statements: Vec<Statement>,
    pub(crate) invocations: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub(crate) struct Statement {
    pub(crate) span: Span,
    /// Expression of an expression statement.
    pub(crate) expression: Option<Expr>,
}

/// Expression shapes the contract classifier inspects.
#[derive(Clone, Debug)]
pub(crate) enum Expr {
    Identifier(String),
    MemberAccess {
        receiver: Box<Expr>,
        name: String,
    },
    Invocation {
        function: Box<Expr>,
        function_text: String,
        arguments: Vec<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: String,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Null,
    Other,
}

impl Expr {
    /// Rightmost simple name of an identifier or member access.
    pub(crate) fn simple_name(&self) -> Option<&str> {
        match self {
            Expr::Identifier(name) => Some(name),
            Expr::MemberAccess { name, .. } => Some(name),
            _ => None,
        }
    }
}
