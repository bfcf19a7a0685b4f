//! Cluster objects that other manifests of the same chart refer to.
//!
//! Collected from rendered trees in a first pass over a chart, before any
//! check runs. Only the fields the checks need are kept.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::analyzer::location::TextRange;
use crate::analyzer::tree::{Node, Tree};

/// Three-valued boolean read from a manifest field.
///
/// A field that is absent, templated away, or not a boolean literal is
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trilean {
    True,
    False,
    #[default]
    Unknown,
}

impl Trilean {
    pub fn from_scalar(node: Option<&Node>) -> Self {
        match node.and_then(Node::as_str) {
            Some(v) if v.eq_ignore_ascii_case("true") => Self::True,
            Some(v) if v.eq_ignore_ascii_case("false") => Self::False,
            _ => Self::Unknown,
        }
    }

    pub fn is_true(&self) -> bool {
        *self == Self::True
    }

    pub fn is_false(&self) -> bool {
        *self == Self::False
    }
}

/// A `ServiceAccount` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAccount {
    pub name: String,
    /// Value of `automountServiceAccountToken`.
    pub automount: Trilean,
    /// Where `automountServiceAccountToken` is set, if it is.
    pub automount_range: Option<TextRange>,
}

/// One entry of a binding's `subjects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
}

impl Subject {
    fn from_node(node: &Node) -> Self {
        let field = |key: &str| node.get(key).and_then(Node::as_str).map(str::to_string);
        Self {
            kind: field("kind"),
            name: field("name"),
            namespace: field("namespace"),
        }
    }

    /// Whether this subject grants roles to the service account `name` in
    /// `namespace`.
    pub fn binds_service_account(&self, namespace: &str, name: &str) -> bool {
        self.kind.as_deref() == Some("ServiceAccount")
            && self.name.as_deref() == Some(name)
            && self.namespace.as_deref() == Some(namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ResourceFacts {
    ServiceAccount(ServiceAccount),
    RoleBinding { subjects: Vec<Subject> },
    ClusterRoleBinding { subjects: Vec<Subject> },
}

/// A collected object and where it was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectResource {
    pub file: PathBuf,
    /// `metadata.namespace`, empty when unset.
    pub namespace: String,
    pub facts: ResourceFacts,
}

impl ProjectResource {
    pub fn service_account(&self) -> Option<&ServiceAccount> {
        match &self.facts {
            ResourceFacts::ServiceAccount(account) => Some(account),
            _ => None,
        }
    }

    /// Subjects of a `RoleBinding` or `ClusterRoleBinding`.
    pub fn subjects(&self) -> &[Subject] {
        match &self.facts {
            ResourceFacts::RoleBinding { subjects } | ResourceFacts::ClusterRoleBinding { subjects } => subjects,
            _ => &[],
        }
    }

    /// Rewrite recorded ranges, e.g. from rendered to template coordinates.
    pub fn map_ranges(&mut self, map: impl Fn(&TextRange) -> TextRange) {
        if let ResourceFacts::ServiceAccount(account) = &mut self.facts {
            account.automount_range = account.automount_range.as_ref().map(map);
        }
    }
}

/// Namespace of a manifest; empty when unset.
pub fn namespace_of(document: &Node) -> String {
    document
        .path(&["metadata", "namespace"])
        .and_then(Node::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Collect every known object declared in `tree`.
pub fn collect_resources(tree: &Tree, file: &Path) -> Vec<ProjectResource> {
    tree.document_roots()
        .filter_map(|document| {
            let facts = resource_facts(document)?;
            Some(ProjectResource {
                file: file.to_path_buf(),
                namespace: namespace_of(document),
                facts,
            })
        })
        .collect()
}

fn resource_facts(document: &Node) -> Option<ResourceFacts> {
    let kind = document.get("kind").and_then(Node::as_str)?;
    match kind {
        "ServiceAccount" => {
            let name = document.path(&["metadata", "name"]).and_then(Node::as_str)?;
            let value = document.get("automountServiceAccountToken");
            Some(ResourceFacts::ServiceAccount(ServiceAccount {
                name: name.to_string(),
                automount: Trilean::from_scalar(value),
                automount_range: value.map(Node::range),
            }))
        }
        "RoleBinding" => Some(ResourceFacts::RoleBinding {
            subjects: subjects(document),
        }),
        "ClusterRoleBinding" => Some(ResourceFacts::ClusterRoleBinding {
            subjects: subjects(document),
        }),
        _ => None,
    }
}

fn subjects(document: &Node) -> Vec<Subject> {
    document
        .get("subjects")
        .map(|s| s.items().iter().map(Subject::from_node).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tree::yaml;

    fn collect(text: &str) -> Vec<ProjectResource> {
        collect_resources(&yaml::parse(text).unwrap(), Path::new("templates/x.yaml"))
    }

    #[test]
    fn test_service_account() {
        let resources = collect(
            "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: app\n  namespace: prod\nautomountServiceAccountToken: false\n",
        );
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].namespace, "prod");
        let account = resources[0].service_account().unwrap();
        assert_eq!(account.name, "app");
        assert_eq!(account.automount, Trilean::False);
        assert_eq!(account.automount_range, Some(TextRange::of(6, 30, 6, 35)));
    }

    #[test]
    fn test_service_account_without_name_is_ignored() {
        assert!(collect("kind: ServiceAccount\nmetadata: {}\n").is_empty());
    }

    #[test]
    fn test_automount_defaults_to_unknown() {
        let resources = collect("kind: ServiceAccount\nmetadata:\n  name: app\n");
        let account = resources[0].service_account().unwrap();
        assert_eq!(account.automount, Trilean::Unknown);
        assert_eq!(account.automount_range, None);
        assert_eq!(resources[0].namespace, "");
    }

    #[test]
    fn test_bindings_across_documents() {
        let resources = collect(
            "kind: RoleBinding\nsubjects:\n  - kind: ServiceAccount\n    name: app\n    namespace: prod\n---\nkind: ClusterRoleBinding\nsubjects:\n  - kind: User\n    name: jane\n",
        );
        assert_eq!(resources.len(), 2);
        assert!(resources[0].subjects()[0].binds_service_account("prod", "app"));
        assert!(!resources[0].subjects()[0].binds_service_account("", "app"));
        assert_eq!(resources[1].subjects()[0].kind.as_deref(), Some("User"));
    }

    #[test]
    fn test_other_kinds_are_ignored() {
        assert!(collect("kind: Pod\nmetadata:\n  name: p\n").is_empty());
        assert!(collect("kind: LimitRange\nmetadata:\n  name: l\nspec:\n  limits: []\n").is_empty());
        assert!(collect("- a\n- b\n").is_empty());
    }

    #[test]
    fn test_trilean() {
        let tree = yaml::parse("a: true\nb: False\nc: '{{ x }}'\n").unwrap();
        let root = tree.document_roots().next().unwrap();
        assert_eq!(Trilean::from_scalar(root.get("a")), Trilean::True);
        assert_eq!(Trilean::from_scalar(root.get("b")), Trilean::False);
        assert_eq!(Trilean::from_scalar(root.get("c")), Trilean::Unknown);
        assert_eq!(Trilean::from_scalar(None), Trilean::Unknown);
    }

    #[test]
    fn test_map_ranges() {
        let mut resources =
            collect("kind: ServiceAccount\nmetadata:\n  name: app\nautomountServiceAccountToken: true\n");
        resources[0].map_ranges(|_| TextRange::of(9, 0, 9, 4));
        assert_eq!(
            resources[0].service_account().unwrap().automount_range,
            Some(TextRange::of(9, 0, 9, 4))
        );
    }
}
