//! Bitrise API access: wire types and the HTTP client behind [`BuildsApi`].

pub mod client;
pub mod model;

pub use client::{ApiError, BitriseClient, BuildsApi, BuildsQuery};
pub use model::{AbortResponse, BuildRecord, BuildStatus, BuildsPage, Paging, TriggerResponse};
