//! Chart-scoped aggregate of collected resources.
//!
//! Files of one chart feed a [`ChartAccumulator`] concurrently during the
//! collection pass. Once every file has been collected the accumulator is
//! frozen into a read-only [`ChartContext`] shared by all checks of the
//! chart. Resources never cross chart boundaries.
//!
//! Files outside any chart share one accumulator, but a standalone file only
//! sees resources declared in its own directory or below it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

use crate::analyzer::helm::chart::ChartMetadata;
use crate::analyzer::kubernetes::resources::{ProjectResource, ResourceFacts, ServiceAccount, Subject};

/// Collection-pass sink for one chart.
#[derive(Debug, Default)]
pub struct ChartAccumulator {
    root: Option<PathBuf>,
    metadata: Option<ChartMetadata>,
    resources: Mutex<Vec<ProjectResource>>,
}

impl ChartAccumulator {
    pub fn new(root: Option<PathBuf>, metadata: Option<ChartMetadata>) -> Self {
        Self {
            root,
            metadata,
            resources: Mutex::new(Vec::new()),
        }
    }

    pub fn extend(&self, resources: impl IntoIterator<Item = ProjectResource>) {
        self.resources.lock().extend(resources);
    }

    /// Stop collecting and index what was gathered.
    ///
    /// Resources are ordered by file so that the context does not depend on
    /// the order in which files finished.
    pub fn freeze(self) -> ChartContext {
        let mut resources = self.resources.into_inner();
        resources.sort_by(|a, b| a.file.cmp(&b.file));

        let mut accounts_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, resource) in resources.iter().enumerate() {
            if let Some(account) = resource.service_account() {
                accounts_by_name.entry(account.name.clone()).or_default().push(idx);
            }
        }

        debug!(
            "Chart context {} frozen with {} resources",
            self.root
                .as_deref()
                .map(|r| r.display().to_string())
                .unwrap_or_else(|| "<standalone>".to_string()),
            resources.len()
        );
        ChartContext {
            root: self.root,
            metadata: self.metadata,
            resources,
            accounts_by_name,
        }
    }
}

/// Read-only chart-wide facts.
#[derive(Debug, Clone, Default)]
pub struct ChartContext {
    root: Option<PathBuf>,
    metadata: Option<ChartMetadata>,
    resources: Vec<ProjectResource>,
    accounts_by_name: HashMap<String, Vec<usize>>,
}

impl ChartContext {
    /// Context over resources that are already collected.
    pub fn from_resources(resources: Vec<ProjectResource>) -> Self {
        let accumulator = ChartAccumulator::default();
        accumulator.extend(resources);
        accumulator.freeze()
    }

    /// Chart root, `None` for files outside any chart.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn metadata(&self) -> Option<&ChartMetadata> {
        self.metadata.as_ref()
    }

    pub fn resources(&self) -> &[ProjectResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Whether a resource is visible from the file `from`.
    fn is_visible(&self, resource: &ProjectResource, from: &Path) -> bool {
        if self.root.is_some() {
            return true;
        }
        from.parent().is_none_or(|dir| resource.file.starts_with(dir))
    }

    /// Service accounts called `name` in `namespace` visible from `from`,
    /// with their files.
    pub fn service_accounts<'a>(
        &'a self,
        from: &'a Path,
        namespace: &'a str,
        name: &str,
    ) -> impl Iterator<Item = (&'a Path, &'a ServiceAccount)> + 'a {
        self.accounts_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&idx| &self.resources[idx])
            .filter(move |r| r.namespace == namespace && self.is_visible(r, from))
            .filter_map(|r| Some((r.file.as_path(), r.service_account()?)))
    }

    /// Subjects of every `RoleBinding` declared in `namespace` and of every
    /// `ClusterRoleBinding`, as far as they are visible from `from`.
    pub fn binding_subjects<'a>(
        &'a self,
        from: &'a Path,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Subject> + 'a {
        self.resources
            .iter()
            .filter(move |r| match r.facts {
                ResourceFacts::ClusterRoleBinding { .. } => true,
                _ => r.namespace == namespace,
            })
            .filter(move |r| self.is_visible(r, from))
            .flat_map(ProjectResource::subjects)
    }

    /// Whether some binding visible from `from` grants roles to the account.
    pub fn is_bound(&self, from: &Path, namespace: &str, name: &str) -> bool {
        self.binding_subjects(from, namespace)
            .any(|subject| subject.binds_service_account(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::kubernetes::resources::collect_resources;
    use crate::analyzer::tree::yaml;
    use rayon::prelude::*;

    fn resources(file: &str, text: &str) -> Vec<ProjectResource> {
        collect_resources(&yaml::parse(text).unwrap(), Path::new(file))
    }

    #[test]
    fn test_concurrent_collection() {
        let accumulator = ChartAccumulator::new(Some(PathBuf::from("/chart")), None);
        (0..16).into_par_iter().for_each(|i| {
            let text = format!("kind: ServiceAccount\nmetadata:\n  name: sa-{i}\n");
            accumulator.extend(resources(&format!("/chart/templates/{i:02}.yaml"), &text));
        });
        let context = accumulator.freeze();
        assert_eq!(context.len(), 16);
        assert_eq!(context.root(), Some(Path::new("/chart")));
        assert!(context.resources().windows(2).all(|w| w[0].file <= w[1].file));
        assert_eq!(context.service_accounts(Path::new("/chart/templates/00.yaml"), "", "sa-7").count(), 1);
    }

    #[test]
    fn test_service_accounts_are_namespaced() {
        let mut all = resources(
            "a.yaml",
            "kind: ServiceAccount\nmetadata:\n  name: app\n  namespace: prod\n",
        );
        all.extend(resources("b.yaml", "kind: ServiceAccount\nmetadata:\n  name: app\n"));
        let context = ChartContext::from_resources(all);
        let from = Path::new("pod.yaml");

        let prod: Vec<_> = context.service_accounts(from, "prod", "app").collect();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].0, Path::new("a.yaml"));
        assert_eq!(context.service_accounts(from, "", "app").count(), 1);
        assert_eq!(context.service_accounts(from, "dev", "app").count(), 0);
        assert_eq!(context.service_accounts(from, "prod", "other").count(), 0);
    }

    #[test]
    fn test_is_bound() {
        let context = ChartContext::from_resources(resources(
            "rbac.yaml",
            "kind: RoleBinding\nmetadata:\n  namespace: prod\nsubjects:\n  - kind: ServiceAccount\n    name: app\n    namespace: prod\n",
        ));
        let from = Path::new("pod.yaml");
        assert!(context.is_bound(from, "prod", "app"));
        assert!(!context.is_bound(from, "prod", "other"));
        assert!(!context.is_bound(from, "", "app"));
    }

    #[test]
    fn test_cluster_role_bindings_span_namespaces() {
        let context = ChartContext::from_resources(resources(
            "rbac.yaml",
            "kind: ClusterRoleBinding\nsubjects:\n  - kind: ServiceAccount\n    name: app\n    namespace: prod\n",
        ));
        assert!(context.is_bound(Path::new("pod.yaml"), "prod", "app"));
    }

    #[test]
    fn test_standalone_files_see_their_directory_and_below() {
        let mut all = resources("/work/sa.yaml", "kind: ServiceAccount\nmetadata:\n  name: root\n");
        all.extend(resources("/work/team-a/sa.yaml", "kind: ServiceAccount\nmetadata:\n  name: app\n"));
        all.extend(resources("/work/team-a/deep/sa.yaml", "kind: ServiceAccount\nmetadata:\n  name: deep\n"));
        let context = ChartContext::from_resources(all);

        let team_a = Path::new("/work/team-a/pod.yaml");
        let team_b = Path::new("/work/team-b/pod.yaml");
        assert_eq!(context.service_accounts(team_a, "", "app").count(), 1);
        assert_eq!(context.service_accounts(team_a, "", "deep").count(), 1);
        assert_eq!(context.service_accounts(team_a, "", "root").count(), 0);
        assert_eq!(context.service_accounts(team_b, "", "app").count(), 0);
        assert_eq!(context.service_accounts(Path::new("/work/pod.yaml"), "", "app").count(), 1);
    }

    #[test]
    fn test_chart_files_see_the_whole_chart() {
        let accumulator = ChartAccumulator::new(Some(PathBuf::from("/chart")), None);
        accumulator.extend(resources(
            "/chart/templates/rbac/binding.yaml",
            "kind: ClusterRoleBinding\nsubjects:\n  - kind: ServiceAccount\n    name: app\n    namespace: ''\n",
        ));
        let context = accumulator.freeze();
        assert!(context.is_bound(Path::new("/chart/templates/pod.yaml"), "", "app"));
    }

    #[test]
    fn test_empty_context() {
        let context = ChartContext::default();
        assert!(context.is_empty());
        assert!(context.metadata().is_none());
        assert!(!context.is_bound(Path::new("pod.yaml"), "", "app"));
    }
}
