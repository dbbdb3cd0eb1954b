use crate::ir::{AccessorKind, Block, Expr};
use crate::model::{MemberId, SemanticModel};

/// Kind of Code Contracts assertion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum ContractCategory {
    Requires,
    Ensures,
    Invariant,
}

impl ContractCategory {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Requires" => Some(ContractCategory::Requires),
            "Ensures" => Some(ContractCategory::Ensures),
            "Invariant" => Some(ContractCategory::Invariant),
            _ => None,
        }
    }
}

/// Normalized expression whose value an assertion declares non-null.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Subject {
    Name(String),
    /// `Contract.Result<T>()`
    Result,
}

/// Classified assertion found in a member body.
#[derive(Clone, Debug)]
pub(crate) struct Assertion {
    pub(crate) category: ContractCategory,
    pub(crate) subject: Subject,
    pub(crate) member: MemberId,
    pub(crate) accessor: Option<AccessorKind>,
}

const STRING_CHECKS: [&str; 4] = [
    "string.IsNullOrEmpty",
    "string.IsNullOrWhiteSpace",
    "System.String.IsNullOrEmpty",
    "System.String.IsNullOrWhiteSpace",
];

/// Category of an invocation of `Contract.Requires` and friends.
///
/// The invoked expression must end in `Contract.<Category>`; any namespace
/// qualification before it is accepted.
pub(crate) fn contract_category(invocation: &Expr) -> Option<ContractCategory> {
    let Expr::Invocation { function, .. } = invocation else {
        return None;
    };
    let Expr::MemberAccess { receiver, name } = function.as_ref() else {
        return None;
    };
    if receiver.simple_name() != Some("Contract") {
        return None;
    }
    ContractCategory::from_name(name)
}

/// Expression asserted non-null by a single-argument contract invocation.
pub(crate) fn not_null_argument(invocation: &Expr) -> Option<&Expr> {
    let Expr::Invocation { arguments, .. } = invocation else {
        return None;
    };
    match arguments.as_slice() {
        [argument] => not_null_operand(argument),
        _ => None,
    }
}

fn not_null_operand(argument: &Expr) -> Option<&Expr> {
    match argument {
        Expr::Binary {
            left,
            operator,
            right,
        } => {
            // `x.Member` anywhere in the comparison already implies `x != null`.
            if let Expr::MemberAccess { receiver, .. } = left.as_ref() {
                return Some(receiver);
            }
            if let Expr::MemberAccess { receiver, .. } = right.as_ref() {
                return Some(receiver);
            }
            if !matches!(operator.as_str(), "!=" | ">" | "<") {
                return None;
            }
            match (left.as_ref(), right.as_ref()) {
                (Expr::Null, other) => Some(other),
                (other, Expr::Null) => Some(other),
                _ => None,
            }
        }
        Expr::Not(operand) => {
            let Expr::Invocation {
                function_text,
                arguments,
                ..
            } = operand.as_ref()
            else {
                return None;
            };
            let is_string_check = STRING_CHECKS
                .iter()
                .any(|check| check.eq_ignore_ascii_case(function_text));
            match arguments.as_slice() {
                [argument] if is_string_check => Some(argument),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Normalized subject of a contract invocation, if it is a not-null assertion.
pub(crate) fn subject(invocation: &Expr) -> Option<Subject> {
    match not_null_argument(invocation)? {
        Expr::Identifier(name) => Some(Subject::Name(name.clone())),
        Expr::Invocation { function, .. } => match function.as_ref() {
            Expr::MemberAccess { name, .. } if name == "Result" => Some(Subject::Result),
            _ => None,
        },
        _ => None,
    }
}

/// Category and subject of a not-null assertion.
pub(crate) fn classify(invocation: &Expr) -> Option<(ContractCategory, Subject)> {
    let category = contract_category(invocation)?;
    Some((category, subject(invocation)?))
}

/// Collect every not-null assertion in the document.
pub(crate) fn collect_assertions(model: &SemanticModel) -> Vec<Assertion> {
    let mut assertions = Vec::new();
    for (id, member) in model.all_members() {
        let blocks = member
            .body
            .iter()
            .map(|block| (block, None))
            .chain(member.accessors.iter().filter_map(|accessor| {
                accessor
                    .body
                    .as_ref()
                    .map(|block| (block, Some(accessor.kind)))
            }));
        for (block, accessor) in blocks {
            for invocation in &block.invocations {
                if let Some((category, subject)) = classify(invocation) {
                    assertions.push(Assertion {
                        category,
                        subject,
                        member: id,
                        accessor,
                    });
                }
            }
        }
    }
    assertions
}

/// Subjects of the contract statements a block starts with, stopping at the first
/// statement that is not a `Contract.Requires` call.
///
/// Requires calls that are not not-null assertions yield `None`.
pub(crate) fn leading_requires(block: &Block) -> Vec<Option<Subject>> {
    block
        .statements
        .iter()
        .map_while(|statement| {
            let expression = statement.expression.as_ref()?;
            (contract_category(expression)? == ContractCategory::Requires)
                .then(|| subject(expression))
        })
        .collect()
}

/// True when the block contains `Contract.Ensures(Contract.Result<T>() != null)`.
pub(crate) fn ensures_result(block: &Block) -> bool {
    block.invocations.iter().any(|invocation| {
        classify(invocation) == Some((ContractCategory::Ensures, Subject::Result))
    })
}

/// True when the block contains a not-null assertion of `name` in `category`.
pub(crate) fn asserts_name(block: &Block, category: ContractCategory, name: &str) -> bool {
    block.invocations.iter().any(|invocation| {
        matches!(classify(invocation), Some((found, Subject::Name(subject))) if found == category && subject == name)
    })
}
