//! Helm chart layout: chart root discovery, files that are not analyzed on
//! their own, and the chart-wide inputs of template evaluation.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILES: [&str; 2] = ["values.yaml", "values.yml"];

/// Extensions of chart files made available to templates.
const COMPANION_EXTENSIONS: [&str; 6] = ["yaml", "yml", "tpl", "txt", "toml", "properties"];

/// `{{` inside a comment, a quoted string, or a `${{ var }}` CI variable is
/// not a template action.
static INERT_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(#.*\{\{|'[^']*\{\{[^']*'|"[^"]*\{\{[^"]*"|\$\{\{[\w\s]+}})"#).unwrap()
});

/// Nearest directory holding a `Chart.yaml`, walking up from `file`.
///
/// The walk never leaves `base_dir`: a chart root outside of it, or no chart
/// root at all, is `None`.
pub fn find_chart_root(file: &Path, base_dir: &Path) -> Option<PathBuf> {
    let mut current = Some(file);
    while let Some(dir) = current {
        if !dir.starts_with(base_dir) {
            debug!("No chart root for {} inside {}", file.display(), base_dir.display());
            return None;
        }
        if dir.join(CHART_FILE).is_file() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Whether a line holds a template action.
pub fn has_template_content_in_line(line: &str) -> bool {
    line.contains("{{") && !INERT_DIRECTIVE.is_match(line)
}

/// Whether any line of `text` holds a template action.
pub fn has_template_content(text: &str) -> bool {
    text.lines().any(has_template_content_in_line)
}

/// Why a chart file must not be analyzed on its own, if it must not.
///
/// Values files and `Chart.yaml` at the chart root are inputs of evaluation,
/// `.tpl` files hold named templates pulled in by other templates.
pub fn skip_reason(file: &Path, chart_root: Option<&Path>) -> Option<&'static str> {
    let name = file.file_name()?.to_str()?;
    if name.ends_with(".tpl") {
        return Some("template helpers file");
    }
    let in_root = chart_root.is_some_and(|root| file.parent() == Some(root));
    if in_root && VALUES_FILES.contains(&name) {
        return Some("chart values file");
    }
    if in_root && name == CHART_FILE {
        return Some("chart descriptor");
    }
    None
}

/// Path with `/` separators.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Fields of `Chart.yaml` the analysis reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ChartMetadata {
    pub fn from_yaml(text: &str) -> Option<Self> {
        match serde_yaml::from_str(text) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("Unreadable chart descriptor: {}", e);
                None
            }
        }
    }
}

/// Chart-wide evaluation inputs, read once per chart.
#[derive(Debug, Clone, Default)]
pub struct Chart {
    root: PathBuf,
    metadata: ChartMetadata,
    values: String,
    /// Companion files by `/`-separated chart-relative path.
    files: BTreeMap<String, String>,
}

impl Chart {
    /// Read the descriptor, the values file and the companion files of the
    /// chart rooted at `root`.
    pub fn load(root: &Path) -> io::Result<Self> {
        let descriptor = fs::read_to_string(root.join(CHART_FILE))?;
        let metadata = ChartMetadata::from_yaml(&descriptor).unwrap_or_default();

        let values = VALUES_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
            .map(fs::read_to_string)
            .transpose()?
            .unwrap_or_default();

        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_companion(path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            match fs::read_to_string(path) {
                Ok(content) => {
                    files.insert(normalize_path(relative), content);
                }
                Err(e) => debug!("Skipping chart file {}: {}", path.display(), e),
            }
        }

        debug!(
            "Loaded chart {} with {} companion files",
            root.display(),
            files.len()
        );
        Ok(Self {
            root: root.to_path_buf(),
            metadata,
            values,
            files,
        })
    }

    /// Evaluation inputs for a file outside of any chart.
    pub fn standalone(dir: &Path) -> Self {
        Self {
            root: dir.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &ChartMetadata {
        &self.metadata
    }

    /// Values document; empty when the chart has none.
    pub fn values(&self) -> &str {
        &self.values
    }

    /// Chart-relative name of `file`.
    pub fn template_name(&self, file: &Path) -> String {
        match file.strip_prefix(&self.root) {
            Ok(relative) => normalize_path(relative),
            Err(_) => normalize_path(file),
        }
    }

    /// Companion files visible to the template at `file`, itself excluded.
    pub fn files_for(&self, file: &Path) -> Vec<(String, String)> {
        let own = self.template_name(file);
        self.files
            .iter()
            .filter(|(name, _)| **name != own)
            .map(|(name, content)| (name.clone(), content.clone()))
            .collect()
    }
}

fn is_companion(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| COMPANION_EXTENSIONS.contains(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_finds_nearest_chart_root() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let sub = project.join("charts/sub");
        touch(&sub.join(CHART_FILE), "name: sub\n");
        touch(&project.join(CHART_FILE), "name: umbrella\n");
        let file = sub.join("templates/deployment.yaml");
        touch(&file, "kind: Deployment\n");

        assert_eq!(find_chart_root(&file, &project), Some(sub));
    }

    #[test]
    fn test_chart_root_outside_base_dir_is_none() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("outside").join(CHART_FILE), "name: x\n");
        let project = dir.path().join("outside/project");
        let file = project.join("templates/pod.yaml");
        touch(&file, "kind: Pod\n");

        assert_eq!(find_chart_root(&file, &project), None);
    }

    #[test]
    fn test_no_chart_at_all() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("pod.yaml");
        touch(&file, "kind: Pod\n");
        assert_eq!(find_chart_root(&file, dir.path()), None);
    }

    #[test]
    fn test_template_content_detection() {
        assert!(has_template_content("name: {{ .Values.name }}"));
        assert!(!has_template_content("name: x # {{ not a template }}"));
        assert!(!has_template_content("name: '{{ quoted }}'"));
        assert!(!has_template_content("name: \"{{ quoted }}\""));
        assert!(!has_template_content("run: ${{ SECRET_TOKEN }}"));
        assert!(!has_template_content("kind: Pod\n"));
    }

    #[test]
    fn test_skip_rules() {
        let root = Path::new("/c");
        assert!(skip_reason(Path::new("/c/values.yaml"), Some(root)).is_some());
        assert!(skip_reason(Path::new("/c/values.yml"), Some(root)).is_some());
        assert!(skip_reason(Path::new("/c/Chart.yaml"), Some(root)).is_some());
        assert!(skip_reason(Path::new("/c/templates/_helpers.tpl"), Some(root)).is_some());
        assert!(skip_reason(Path::new("/c/templates/values.yaml"), Some(root)).is_none());
        assert!(skip_reason(Path::new("/c/values.yaml"), None).is_none());
        assert!(skip_reason(Path::new("/c/templates/pod.yaml"), Some(root)).is_none());
    }

    #[test]
    fn test_load_chart() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join(CHART_FILE), "apiVersion: v2\nname: demo\nversion: 1.2.3\n");
        touch(&root.join("values.yml"), "replicas: 2\n");
        touch(&root.join("templates/_helpers.tpl"), "{{- define \"x\" }}{{ end }}");
        touch(&root.join("templates/pod.yaml"), "kind: Pod\n");
        touch(&root.join("files/app.properties"), "a=b\n");
        touch(&root.join("README.md"), "# demo\n");

        let chart = Chart::load(root).unwrap();
        assert_eq!(chart.metadata().api_version.as_deref(), Some("v2"));
        assert_eq!(chart.metadata().name.as_deref(), Some("demo"));
        assert_eq!(chart.values(), "replicas: 2\n");

        let pod = root.join("templates/pod.yaml");
        assert_eq!(chart.template_name(&pod), "templates/pod.yaml");
        let names: Vec<String> = chart.files_for(&pod).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["Chart.yaml", "files/app.properties", "templates/_helpers.tpl", "values.yml"]
        );
    }

    #[test]
    fn test_missing_values_is_empty() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join(CHART_FILE), "name: demo\n");
        let chart = Chart::load(dir.path()).unwrap();
        assert_eq!(chart.values(), "");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new(r"templates\pod.yaml")), "templates/pod.yaml");
    }
}
