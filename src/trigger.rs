//! Build-trigger form model: workflow catalog, validation and the hook body.

use crate::bitrise::BuildRecord;
use crate::git_ref::{GitRefKind, GitReference};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_WORKFLOWS: &[&str] = &[
    "fabric-beta",
    "fabric-beta-production",
    "test",
    "release",
    "release-with-stack",
];

/// Workflows that may only run against a tag.
pub const DEFAULT_RELEASE_WORKFLOWS: &[&str] = &["release", "release-with-stack"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

pub fn release_set<I, S>(ids: I) -> HashSet<WorkflowId>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(WorkflowId::new).collect()
}

/// Tags allow any workflow. Branch references, including the empty branch,
/// reject release workflows.
pub fn is_submittable(
    workflow: &WorkflowId,
    git_ref: &GitReference,
    release_workflows: &HashSet<WorkflowId>,
) -> bool {
    git_ref.is_tag() || !release_workflows.contains(workflow)
}

/// Ordered, duplicate-free list of workflows offered by the trigger form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowCatalog {
    ids: Vec<WorkflowId>,
}

impl WorkflowCatalog {
    pub fn new<I, S>(defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for id in defaults {
            catalog.append(id);
        }
        catalog
    }

    /// Returns `false` for blank or already-present ids.
    pub fn append(&mut self, id: impl Into<String>) -> bool {
        let id = id.into().trim().to_string();
        if id.is_empty() || self.ids.iter().any(|w| w.as_str() == id) {
            return false;
        }
        self.ids.push(WorkflowId(id));
        true
    }

    pub fn remove_at(&mut self, index: usize) -> Option<WorkflowId> {
        (index < self.ids.len()).then(|| self.ids.remove(index))
    }

    pub fn ids(&self) -> &[WorkflowId] {
        &self.ids
    }

    pub fn get(&self, index: usize) -> Option<&WorkflowId> {
        self.ids.get(index)
    }

    pub fn position(&self, id: &WorkflowId) -> Option<usize> {
        self.ids.iter().position(|w| w == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Environment variable overrides, unique by key, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
    entries: Vec<(String, String)>,
}

impl EnvironmentOverrides {
    /// Replaces the value in place when the key already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<(String, String)> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses the `KEY:VALUE` shorthand of the form's environment input.
pub fn parse_env_entry(input: &str) -> Option<(String, String)> {
    let mut parts = input.trim().split(':');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();
    if parts.next().is_some() || key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Why a draft cannot be submitted yet. None of these are failures: the form
/// simply is not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    MissingToken,
    MissingWorkflow,
    EmptyGitReference,
    ReleaseRequiresTag,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NotReady::MissingToken => "API token required",
            NotReady::MissingWorkflow => "select a workflow",
            NotReady::EmptyGitReference => "enter a branch or tag",
            NotReady::ReleaseRequiresTag => "release workflows require a tag",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRequestDraft {
    pub workflow: Option<WorkflowId>,
    pub git_ref: GitReference,
    pub api_token: Option<String>,
    pub environments: EnvironmentOverrides,
}

impl TriggerRequestDraft {
    pub fn prepare(&self, release: &HashSet<WorkflowId>) -> Result<TriggerRequest, NotReady> {
        let token = self
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(NotReady::MissingToken)?;
        let workflow = self.workflow.clone().ok_or(NotReady::MissingWorkflow)?;
        if !is_submittable(&workflow, &self.git_ref, release) {
            return Err(NotReady::ReleaseRequiresTag);
        }
        if self.git_ref.name().trim().is_empty() {
            return Err(NotReady::EmptyGitReference);
        }

        Ok(TriggerRequest {
            hook_info: HookInfo {
                kind: "bitrise",
                api_token: token.to_string(),
            },
            build_params: BuildParams {
                git_ref: self.git_ref.with_name(self.git_ref.name().trim()),
                workflow_id: workflow,
                environments: self
                    .environments
                    .iter()
                    .map(|(key, value)| EnvironmentParam {
                        mapped_to: key.to_string(),
                        value: value.to_string(),
                        is_expand: true,
                    })
                    .collect(),
            },
        })
    }

    /// `None` whenever no request can be produced yet.
    pub fn build_request(&self, release: &HashSet<WorkflowId>) -> Option<TriggerRequest> {
        self.prepare(release).ok()
    }
}

/// Body of `POST /app/{slug}/build/start.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRequest {
    pub hook_info: HookInfo,
    pub build_params: BuildParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub api_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildParams {
    #[serde(flatten)]
    pub git_ref: GitReference,
    pub workflow_id: WorkflowId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvironmentParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentParam {
    pub mapped_to: String,
    pub value: String,
    pub is_expand: bool,
}

/// Distinct branch or tag names from the build list, most recent first,
/// skipping the name already typed.
pub fn git_ref_suggestions(kind: GitRefKind, builds: &[BuildRecord], current: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    builds
        .iter()
        .filter_map(|b| match kind {
            GitRefKind::Branch => b.branch.as_deref(),
            GitRefKind::Tag => b.tag.as_deref(),
        })
        .filter(|name| !name.is_empty() && *name != current)
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn release() -> HashSet<WorkflowId> {
        release_set(["release"])
    }

    fn branch(name: &str) -> GitReference {
        GitReference::Branch(name.to_string())
    }

    fn tag(name: &str) -> GitReference {
        GitReference::Tag(name.to_string())
    }

    #[test]
    fn release_on_branch_is_rejected() {
        assert!(!is_submittable(&"release".into(), &branch("main"), &release()));
    }

    #[test]
    fn release_on_tag_is_allowed() {
        assert!(is_submittable(&"release".into(), &tag("v1.0"), &release()));
    }

    #[test]
    fn non_release_on_branch_is_allowed() {
        assert!(is_submittable(&"test".into(), &branch("main"), &release()));
    }

    #[test]
    fn empty_branch_still_rejects_release() {
        assert!(!is_submittable(&"release".into(), &branch(""), &release()));
    }

    #[test]
    fn default_release_set() {
        let set = release_set(DEFAULT_RELEASE_WORKFLOWS.iter().copied());
        assert!(!is_submittable(&"release-with-stack".into(), &branch("main"), &set));
        assert!(is_submittable(&"fabric-beta".into(), &branch("main"), &set));
    }

    fn ready_draft() -> TriggerRequestDraft {
        TriggerRequestDraft {
            workflow: Some("test".into()),
            git_ref: branch("develop"),
            api_token: Some("hook-token".to_string()),
            environments: EnvironmentOverrides::default(),
        }
    }

    #[test]
    fn missing_token_is_not_ready() {
        let mut draft = ready_draft();
        draft.api_token = None;
        assert_eq!(draft.prepare(&release()), Err(NotReady::MissingToken));
        draft.api_token = Some("   ".to_string());
        assert_eq!(draft.build_request(&release()), None);
    }

    #[test]
    fn missing_workflow_is_not_ready() {
        let mut draft = ready_draft();
        draft.workflow = None;
        assert_eq!(draft.prepare(&release()), Err(NotReady::MissingWorkflow));
    }

    #[test]
    fn empty_name_is_not_ready() {
        let mut draft = ready_draft();
        draft.git_ref = branch("  ");
        assert_eq!(draft.prepare(&release()), Err(NotReady::EmptyGitReference));
    }

    #[test]
    fn release_on_branch_is_not_ready() {
        let mut draft = ready_draft();
        draft.workflow = Some("release".into());
        assert_eq!(draft.prepare(&release()), Err(NotReady::ReleaseRequiresTag));
        draft.git_ref = tag("v2.0.0");
        assert!(draft.prepare(&release()).is_ok());
    }

    #[test]
    fn request_body_shape() {
        let mut draft = ready_draft();
        draft.environments.set("PLATFORM", "tvOS");
        draft.environments.set("CONFIG", "Debug");
        let request = draft.build_request(&release()).unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "hook_info": {"type": "bitrise", "api_token": "hook-token"},
                "build_params": {
                    "branch": "develop",
                    "workflow_id": "test",
                    "environments": [
                        {"mapped_to": "PLATFORM", "value": "tvOS", "is_expand": true},
                        {"mapped_to": "CONFIG", "value": "Debug", "is_expand": true}
                    ]
                }
            })
        );
    }

    #[test]
    fn request_body_without_environments() {
        let mut draft = ready_draft();
        draft.workflow = Some("release".into());
        draft.git_ref = tag("v1.0");
        let value = serde_json::to_value(draft.build_request(&release()).unwrap()).unwrap();
        assert_eq!(
            value["build_params"],
            serde_json::json!({"tag": "v1.0", "workflow_id": "release"})
        );
    }

    #[test]
    fn env_set_replaces_in_place() {
        let mut envs = EnvironmentOverrides::default();
        envs.set("A", "1");
        envs.set("B", "2");
        envs.set("A", "3");
        let entries: Vec<_> = envs.iter().collect();
        assert_eq!(entries, vec![("A", "3"), ("B", "2")]);

        assert_eq!(envs.remove_at(0), Some(("A".to_string(), "3".to_string())));
        assert_eq!(envs.remove_at(5), None);
        assert_eq!(envs.len(), 1);
    }

    #[test]
    fn parse_env_entry_requires_one_separator() {
        assert_eq!(
            parse_env_entry("PLATFORM:tvOS"),
            Some(("PLATFORM".to_string(), "tvOS".to_string()))
        );
        assert_eq!(parse_env_entry("PLATFORM"), None);
        assert_eq!(parse_env_entry("A:B:C"), None);
        assert_eq!(parse_env_entry(":value"), None);
        assert_eq!(parse_env_entry("KEY:"), None);
    }

    #[test]
    fn catalog_rejects_blank_and_duplicates() {
        let mut catalog = WorkflowCatalog::new(DEFAULT_WORKFLOWS.iter().copied());
        assert_eq!(catalog.len(), 5);
        assert!(!catalog.append("test"));
        assert!(!catalog.append("  "));
        assert!(catalog.append("nightly"));
        assert_eq!(catalog.ids().last().map(WorkflowId::as_str), Some("nightly"));
        assert_eq!(catalog.position(&"nightly".into()), Some(5));
    }

    #[test]
    fn catalog_remove_at() {
        let mut catalog = WorkflowCatalog::new(["a", "b", "c"]);
        assert_eq!(catalog.remove_at(1), Some(WorkflowId::new("b")));
        assert_eq!(catalog.remove_at(9), None);
        let ids: Vec<_> = catalog.ids().iter().map(WorkflowId::as_str).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    fn record(n: u64, branch: Option<&str>, tag: Option<&str>) -> BuildRecord {
        serde_json::from_value(serde_json::json!({
            "slug": format!("slug-{n}"),
            "build_number": n,
            "status": 1,
            "branch": branch,
            "tag": tag,
        }))
        .unwrap()
    }

    #[test]
    fn suggestions_are_distinct_and_ordered() {
        let builds = vec![
            record(5, Some("feature/x"), None),
            record(4, Some("main"), Some("v1.1")),
            record(3, Some("feature/x"), None),
            record(2, Some("develop"), Some("v1.0")),
        ];
        assert_eq!(
            git_ref_suggestions(GitRefKind::Branch, &builds, "main"),
            vec!["feature/x".to_string(), "develop".to_string()]
        );
        assert_eq!(
            git_ref_suggestions(GitRefKind::Tag, &builds, ""),
            vec!["v1.1".to_string(), "v1.0".to_string()]
        );
    }
}
