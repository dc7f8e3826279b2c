#![allow(dead_code)]

use async_trait::async_trait;
use brw::bitrise::{
    AbortResponse, ApiError, BuildRecord, BuildsApi, BuildsPage, BuildsQuery, Paging,
    TriggerResponse,
};
use brw::settings::MemorySettings;
use brw::sync::{SyncConfig, SyncController, SyncSignals};
use brw::trigger::TriggerRequest;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub fn build_record(n: u64) -> BuildRecord {
    serde_json::from_value(serde_json::json!({
        "slug": format!("slug-{n}"),
        "build_number": n,
        "status": 1,
        "status_text": "success",
        "triggered_workflow": "test",
        "branch": "main",
        "triggered_at": "2024-06-01T10:00:00Z",
        "started_on_worker_at": "2024-06-01T10:00:05Z",
        "finished_at": "2024-06-01T10:04:05Z",
    }))
    .unwrap()
}

pub fn running(n: u64) -> BuildRecord {
    serde_json::from_value(serde_json::json!({
        "slug": format!("slug-{n}"),
        "build_number": n,
        "status": 0,
        "status_text": "in-progress",
        "triggered_workflow": "test",
        "branch": "main",
        "triggered_at": "2024-06-01T10:00:00Z",
    }))
    .unwrap()
}

pub fn page(numbers: &[u64], next: Option<&str>) -> BuildsPage {
    BuildsPage {
        data: numbers.iter().copied().map(build_record).collect(),
        paging: Paging {
            next: next.map(str::to_string),
            ..Paging::default()
        },
    }
}

pub fn numbers(builds: &[BuildRecord]) -> Vec<u64> {
    builds.iter().map(|b| b.build_number).collect()
}

pub fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

/// In-memory [`BuildsApi`] answering from queued responses and recording
/// every request.
#[derive(Default)]
pub struct ScriptedApi {
    pages: Mutex<VecDeque<Result<BuildsPage, ApiError>>>,
    aborts: Mutex<VecDeque<Result<AbortResponse, ApiError>>>,
    pub fetches: Mutex<Vec<BuildsQuery>>,
    pub aborted: Mutex<Vec<(String, String)>>,
    pub triggers: Mutex<Vec<TriggerRequest>>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, page: BuildsPage) {
        self.pages.lock().push_back(Ok(page));
    }

    pub fn push_fetch_error(&self, err: ApiError) {
        self.pages.lock().push_back(Err(err));
    }

    pub fn push_abort(&self, response: Result<AbortResponse, ApiError>) {
        self.aborts.lock().push_back(response);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn last_fetch(&self) -> Option<BuildsQuery> {
        self.fetches.lock().last().cloned()
    }
}

#[async_trait]
impl BuildsApi for ScriptedApi {
    async fn fetch_builds(
        &self,
        _app_slug: &str,
        query: &BuildsQuery,
    ) -> Result<BuildsPage, ApiError> {
        self.fetches.lock().push(query.clone());
        // An unscripted fetch sees an empty server.
        self.pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(BuildsPage::default()))
    }

    async fn abort_build(
        &self,
        _app_slug: &str,
        build_slug: &str,
        reason: &str,
    ) -> Result<AbortResponse, ApiError> {
        self.aborted
            .lock()
            .push((build_slug.to_string(), reason.to_string()));
        self.aborts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(AbortResponse::default()))
    }

    async fn trigger_build(
        &self,
        _app_slug: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, ApiError> {
        self.triggers.lock().push(request.clone());
        Ok(TriggerResponse::default())
    }
}

pub fn controller(api: &Arc<ScriptedApi>) -> (SyncController, SyncSignals, Arc<MemorySettings>) {
    controller_with(api, SyncConfig::default())
}

pub fn controller_with(
    api: &Arc<ScriptedApi>,
    config: SyncConfig,
) -> (SyncController, SyncSignals, Arc<MemorySettings>) {
    let settings = Arc::new(MemorySettings::new());
    let (controller, signals) =
        SyncController::new(api.clone(), settings.clone(), "app-slug", config);
    (controller, signals, settings)
}
