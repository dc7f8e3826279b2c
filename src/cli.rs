use crate::bitrise::client::{DEFAULT_API_URL, DEFAULT_HOOKS_URL};
use crate::sync::{GapPolicy, SyncConfig, DEFAULT_ABORT_REASON, DEFAULT_MAX_GAP_PAGES};
use crate::trigger::{DEFAULT_RELEASE_WORKFLOWS, DEFAULT_WORKFLOWS};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "brw", version, about = "Bitrise build watcher TUI")]
pub struct Cli {
    /// App slug to watch (defaults to the last app visited)
    #[arg(short, long)]
    pub app: Option<String>,

    /// Bitrise personal access token
    #[arg(long, env = "BITRISE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Build trigger token (defaults to the one saved on the last trigger)
    #[arg(long, env = "BITRISE_TRIGGER_TOKEN", hide_env_values = true)]
    pub trigger_token: Option<String>,

    /// Initial poll interval in seconds
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Builds per page on full refresh and when loading older builds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=50))]
    pub page_size: Option<u64>,

    /// Builds per page when checking for new builds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=50))]
    pub refresh_limit: u64,

    /// Workflow offered by the trigger form (repeatable, replaces the defaults)
    #[arg(short, long = "workflow")]
    pub workflows: Vec<String>,

    /// Workflow that may only run on a tag (repeatable, replaces the defaults)
    #[arg(long = "release-workflow")]
    pub release_workflows: Vec<String>,

    /// What to do when new builds leave a hole in the list: report, fill or reload
    #[arg(long, default_value = "fill")]
    pub gap_policy: GapPolicy,

    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    #[arg(long, default_value = DEFAULT_HOOKS_URL)]
    pub hooks_url: String,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Enable verbose logging to $XDG_STATE_HOME/brw/debug.log
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.page_size.map(|n| n as usize),
            refresh_page_size: self.refresh_limit as usize,
            abort_reason: DEFAULT_ABORT_REASON.to_string(),
            max_gap_pages: DEFAULT_MAX_GAP_PAGES,
        }
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        or_defaults(&self.workflows, DEFAULT_WORKFLOWS)
    }

    pub fn release_workflow_ids(&self) -> Vec<String> {
        or_defaults(&self.release_workflows, DEFAULT_RELEASE_WORKFLOWS)
    }
}

fn or_defaults(given: &[String], defaults: &[&str]) -> Vec<String> {
    if given.is_empty() {
        defaults.iter().map(|s| (*s).to_string()).collect()
    } else {
        given.to_vec()
    }
}

/// Rejects slugs that cannot be placed in a URL path segment.
pub fn validate_app_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty()
        || !slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "Invalid app slug '{slug}'. Expected letters, digits, '-' or '_'."
        ));
    }
    Ok(())
}
