//! Timeline read endpoint.
//!
//! `GET /v1/sessions/:id/timeline?limit=&pageToken=&types=&includeRelated=`
//! returns one canonically-ordered page: `{items, totalCount,
//! nextPageToken?}`. Clients replay a session by iterating `pageToken`
//! until it comes back absent.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use weft_domain::ItemKind;
use weft_timeline::TimelineQuery;

use crate::api::{api_error, session_not_found};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
    /// Comma-separated subset of
    /// `message,tool_execution,permission_request`.
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub include_related: Option<bool>,
}

/// GET /v1/sessions/:id/timeline
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Response {
    if !state.sessions.exists(&session_id) {
        return session_not_found(&session_id);
    }

    let max = state.config.timeline.max_page_size;
    let query = TimelineQuery {
        limit: params.limit.map(|l| l.clamp(1, max)),
        page_token: params.page_token,
        types: params.types.as_deref().map(parse_types),
        include_related: params.include_related.unwrap_or(true),
    };

    match state.timeline.get_timeline_items(&session_id, &query) {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "timeline read failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_failure",
                e.to_string(),
            )
        }
    }
}

/// Unknown entries are dropped with a warning; an all-unknown filter
/// matches nothing, which the read path reports as an empty page.
fn parse_types(raw: &str) -> Vec<ItemKind> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let kind = ItemKind::parse(s);
            if kind.is_none() {
                tracing::warn!(value = s, "ignoring unknown timeline type filter");
            }
            kind
        })
        .collect()
}
