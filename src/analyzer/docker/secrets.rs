//! DKR001: secrets generated at build time end up in the image.
//!
//! Only the final stage of a Dockerfile ends up in the shipped image, so
//! earlier stages are not checked. `RUN --mount=type=secret` instructions
//! are trusted to handle their secrets.

use crate::analyzer::checks::{Check, CheckContext, InitContext};
use crate::analyzer::docker::dockerfile::{FINAL_STAGE, INSTRUCTION, SECRET_MOUNT, STAGE};
use crate::analyzer::docker::htpasswd::{is_sensitive_htpasswd, split_commands};
use crate::analyzer::docker::resolution::{ArgumentResolution, ArgumentResolver, Scope};
use crate::analyzer::location::TextRange;
use crate::analyzer::tree::{Node, NodeKind};

const MESSAGE: &str = "Change this code not to store a secret in the image.";

pub struct SecretsGenerationCheck;

impl Check for SecretsGenerationCheck {
    fn code(&self) -> &'static str {
        "DKR001"
    }

    fn name(&self) -> &'static str {
        "secrets-generation"
    }

    fn initialize(&self, init: &mut InitContext) {
        init.register(NodeKind::Block, |ctx, stage| {
            if stage.attribute(STAGE).is_none() || stage.attribute(FINAL_STAGE) != Some("true") {
                return;
            }

            // assignments are visible to the instructions after them
            let mut scope = Scope::new();
            for instruction in stage.children() {
                match instruction.attribute(INSTRUCTION) {
                    Some("ARG") | Some("ENV") => {
                        for pair in instruction.children() {
                            let name = pair.key().and_then(Node::as_str);
                            if let (Some(name), Some(value)) = (name, pair.tuple_value()) {
                                scope.assign(name, value.clone());
                            }
                        }
                    }
                    Some("RUN") if instruction.attribute(SECRET_MOUNT).is_none() => {
                        let resolver = ArgumentResolver::with_scope(&scope);
                        for command in instruction.children().iter().filter(|c| c.is(NodeKind::Command)) {
                            check_command(ctx, command, &resolver);
                        }
                    }
                    _ => {}
                }
            }
        });
    }
}

fn check_command(ctx: &mut CheckContext<'_>, command: &Node, resolver: &ArgumentResolver<'_>) {
    let arguments: Vec<(&Node, ArgumentResolution)> = command
        .children()
        .iter()
        .filter(|a| a.is(NodeKind::Argument))
        .map(|a| (a, resolver.resolve(a)))
        .collect();

    for invocation in split_commands(&arguments, |(_, resolution)| resolution) {
        let resolutions: Vec<ArgumentResolution> =
            invocation.iter().map(|(_, r)| r.clone()).collect();
        if !is_sensitive_htpasswd(&resolutions) {
            continue;
        }
        let first = invocation[0].0.range();
        let range: TextRange = invocation
            .iter()
            .fold(first, |acc, (node, _)| acc.merge(&node.range()));
        ctx.report_issue(&range, MESSAGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::checks::ChecksVisitor;
    use crate::analyzer::docker::dockerfile::parse_dockerfile;
    use std::path::Path;

    fn scan(dockerfile: &str) -> Vec<TextRange> {
        let checks: Vec<Box<dyn Check>> = vec![Box::new(SecretsGenerationCheck)];
        let tree = parse_dockerfile(dockerfile);
        ChecksVisitor::new(&checks)
            .scan(&tree, Path::new("Dockerfile"), None)
            .issues
            .into_iter()
            .map(|i| {
                assert_eq!(i.message, MESSAGE);
                i.range
            })
            .collect()
    }

    fn run(line: &str) -> Vec<TextRange> {
        scan(&format!("FROM httpd\nRUN {line}\n"))
    }

    #[test]
    fn test_reports_inline_password() {
        let line = "apt-get install -y apache2-utils && htpasswd -b -c /etc/nginx/pw admin s3cret";
        assert_eq!(run(line), vec![TextRange::of(2, 40, 2, 81)]);
    }

    #[test]
    fn test_password_from_variable_is_still_reported() {
        assert_eq!(run("htpasswd -bn admin \"$PASSWORD\"").len(), 1);
    }

    #[test]
    fn test_compliant_invocations() {
        assert!(run("htpasswd -c /etc/nginx/pw admin").is_empty());
        assert!(run("$TOOL -b -c /etc/nginx/pw admin s3cret").is_empty());
        assert!(run("echo htpasswd -b f u p").is_empty());
    }

    #[test]
    fn test_command_name_from_build_arg() {
        assert_eq!(scan("FROM httpd\nARG T=htpasswd\nRUN $T -b f u p\n").len(), 1);
        assert_eq!(scan("FROM httpd\nENV T htpasswd\nRUN ${T} -b f u p\n").len(), 1);
        // global default pulled into the stage
        assert_eq!(scan("ARG T=htpasswd\nFROM httpd\nARG T\nRUN $T -b f u p\n").len(), 1);
        // assigned only after the RUN
        assert!(scan("FROM httpd\nRUN $T -b f u p\nARG T=htpasswd\n").is_empty());
    }

    #[test]
    fn test_only_final_stage_is_checked() {
        assert!(scan("FROM httpd AS build\nRUN htpasswd -b -c f u p\nFROM nginx\n").is_empty());
        let issues = scan("FROM httpd AS build\nRUN echo\nFROM nginx\nRUN htpasswd -b -c f u p\n");
        assert_eq!(issues, vec![TextRange::of(4, 4, 4, 24)]);
    }

    #[test]
    fn test_secret_mount_is_trusted() {
        assert!(scan("FROM httpd\nRUN --mount=type=secret,id=pw htpasswd -b -c f u p\n").is_empty());
        assert_eq!(scan("FROM httpd\nRUN --mount=type=cache,target=/c htpasswd -b -c f u p\n").len(), 1);
    }
}
