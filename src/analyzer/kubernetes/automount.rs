//! K8S001: workloads that mount a service account token nobody restricts.

use crate::analyzer::checks::{Check, CheckContext, InitContext, SecondaryLocation};
use crate::analyzer::kubernetes::context::ChartContext;
use crate::analyzer::kubernetes::resources::namespace_of;
use crate::analyzer::tree::{Node, NodeKind};

const MESSAGE_BIND_ACCOUNT_NAME: &str =
    "Bind this resource's automounted service account to RBAC or disable automounting.";
const MESSAGE_BIND_ACCOUNT_RESOURCE: &str =
    "Bind this Service Account to RBAC or disable \"automountServiceAccountToken\".";
const MESSAGE_SECONDARY: &str = "Change this setting";

const SERVICE_ACCOUNT_NAME: &str = "serviceAccountName";
const AUTOMOUNT: &str = "automountServiceAccountToken";

/// Kinds whose pod spec sits under `spec.template.spec`.
const KINDS_WITH_TEMPLATE: [&str; 6] = [
    "DaemonSet",
    "Deployment",
    "Job",
    "ReplicaSet",
    "ReplicationController",
    "StatefulSet",
];

pub struct AutomountServiceAccountTokenCheck;

impl Check for AutomountServiceAccountTokenCheck {
    fn code(&self) -> &'static str {
        "K8S001"
    }

    fn name(&self) -> &'static str {
        "automount-service-account-token"
    }

    fn needs_chart_context(&self) -> bool {
        true
    }

    fn initialize(&self, init: &mut InitContext) {
        init.register(NodeKind::Document, |ctx, document| {
            let Some(root) = document.children().first() else {
                return;
            };
            let Some(spec) = pod_spec(root) else {
                return;
            };
            if spec.get(AUTOMOUNT).and_then(Node::as_str) == Some("false") {
                return;
            }
            let Some(containers) = spec.entry("containers") else {
                return;
            };
            let namespace = namespace_of(root);
            check_account(ctx, spec, containers, &namespace);
        });
    }
}

fn pod_spec(root: &Node) -> Option<&Node> {
    let kind = root.get("kind").and_then(Node::as_str)?;
    let spec = if kind == "Pod" {
        root.get("spec")
    } else if kind == "CronJob" || KINDS_WITH_TEMPLATE.contains(&kind) {
        root.path(&["spec", "template", "spec"])
    } else {
        None
    }?;
    spec.is(NodeKind::Mapping).then_some(spec)
}

fn check_account(ctx: &mut CheckContext<'_>, spec: &Node, containers: &Node, namespace: &str) {
    let empty = ChartContext::default();
    let chart = ctx.chart().unwrap_or(&empty);
    let account_node = spec.get(SERVICE_ACCOUNT_NAME);
    let account_name = account_node.and_then(Node::as_str);

    let Some((name, name_node)) = account_name.zip(account_node) else {
        if let Some(key) = containers.key() {
            ctx.report_issue(key, MESSAGE_BIND_ACCOUNT_NAME);
        }
        return;
    };

    if chart.is_bound(ctx.file(), namespace, name) {
        return;
    }

    let accounts: Vec<_> = chart.service_accounts(ctx.file(), namespace, name).collect();
    if accounts.iter().any(|(_, account)| account.automount.is_false()) {
        return;
    }

    // one account per name and namespace is expected; the first one is linked
    let secondary = accounts
        .first()
        .filter(|(_, account)| account.automount.is_true())
        .and_then(|(file, account)| {
            let range = account.automount_range?;
            Some(SecondaryLocation::new(range, MESSAGE_SECONDARY).in_file(*file))
        })
        .into_iter()
        .collect();
    ctx.report_issue_with_secondary(name_node, MESSAGE_BIND_ACCOUNT_RESOURCE, secondary);
}
