//! Best-effort reduction of arguments to concrete strings.
//!
//! An argument resolves only when every fragment is known. Variable
//! references resolve through an explicit [`Scope`] when one is given and
//! never otherwise; command substitutions, arithmetic and unterminated
//! markers never resolve. A partially known argument is `Unresolved`: the
//! resolver may miss values but never invents one.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::analyzer::tree::{Node, NodeKind};

/// Outcome of resolving one argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentResolution {
    Resolved(String),
    Unresolved,
}

impl ArgumentResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unresolved => None,
        }
    }

    /// Resolved to the empty string.
    pub fn is_empty(&self) -> bool {
        self.value() == Some("")
    }
}

impl fmt::Display for ArgumentResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(value) => write!(f, "{value}"),
            Self::Unresolved => write!(f, "<unresolved>"),
        }
    }
}

/// Variable assignments visible at a point of the file (`ARG`/`ENV` style).
///
/// The last assignment of a name wins.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    assignments: HashMap<String, Node>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name=value`, where `value` is an `Argument` node.
    pub fn assign(&mut self, name: impl Into<String>, value: Node) {
        self.assignments.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Node) -> Self {
        self.assign(name, value);
        self
    }

    fn lookup(&self, name: &str) -> Option<&Node> {
        self.assignments.get(name)
    }
}

/// Resolves argument nodes, optionally through a scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentResolver<'s> {
    scope: Option<&'s Scope>,
}

impl<'s> ArgumentResolver<'s> {
    /// Resolver where every variable reference is unresolved.
    pub fn new() -> Self {
        Self { scope: None }
    }

    pub fn with_scope(scope: &'s Scope) -> Self {
        Self { scope: Some(scope) }
    }

    pub fn resolve(&self, node: &Node) -> ArgumentResolution {
        self.resolve_inner(node, &mut HashSet::new())
    }

    fn resolve_inner(&self, node: &Node, visiting: &mut HashSet<String>) -> ArgumentResolution {
        match node.kind() {
            NodeKind::Argument => {
                let mut value = String::new();
                for fragment in node.children() {
                    match self.resolve_inner(fragment, visiting) {
                        ArgumentResolution::Resolved(part) => value.push_str(&part),
                        ArgumentResolution::Unresolved => return ArgumentResolution::Unresolved,
                    }
                }
                ArgumentResolution::Resolved(value)
            }
            NodeKind::Literal | NodeKind::Scalar => match node.value() {
                Some(value) => ArgumentResolution::Resolved(value.to_string()),
                None => ArgumentResolution::Unresolved,
            },
            NodeKind::Expansion => self.resolve_expansion(node, visiting),
            _ => ArgumentResolution::Unresolved,
        }
    }

    fn resolve_expansion(&self, node: &Node, visiting: &mut HashSet<String>) -> ArgumentResolution {
        let (Some(scope), Some("variable"), Some(name)) = (
            self.scope,
            node.attribute("expansion"),
            node.attribute("name"),
        ) else {
            return ArgumentResolution::Unresolved;
        };
        if name.is_empty() {
            return ArgumentResolution::Unresolved;
        }

        let value = self.resolve_variable(scope, name, visiting);
        match node.attribute("modifier") {
            None => value,
            Some(":-") => match value {
                ArgumentResolution::Resolved(v) if v.is_empty() => {
                    resolve_operand(node.attribute("operand"))
                }
                other => other,
            },
            // `:+`, `=`, `?`, `#`, `%` and friends depend on runtime state
            Some(_) => ArgumentResolution::Unresolved,
        }
    }

    fn resolve_variable(
        &self,
        scope: &Scope,
        name: &str,
        visiting: &mut HashSet<String>,
    ) -> ArgumentResolution {
        let Some(assigned) = scope.lookup(name) else {
            return ArgumentResolution::Unresolved;
        };
        if !visiting.insert(name.to_string()) {
            // cycle through the scope
            return ArgumentResolution::Unresolved;
        }
        let value = self.resolve_inner(assigned, visiting);
        visiting.remove(name);
        value
    }
}

/// Operand of `${NAME:-operand}`; only plain text is taken.
fn resolve_operand(operand: Option<&str>) -> ArgumentResolution {
    match operand {
        Some(text) if !text.contains(['$', '`', '\'', '"', '\\']) => {
            ArgumentResolution::Resolved(text.to_string())
        }
        _ => ArgumentResolution::Unresolved,
    }
}

/// Resolve without a scope.
pub fn resolve(node: &Node) -> ArgumentResolution {
    ArgumentResolver::new().resolve(node)
}

/// Quote a value so that lexing the result yields exactly that literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
