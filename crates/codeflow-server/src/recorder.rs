//! Execution recording: one audit record plus one atomic usage upsert per
//! dispatch. Both writes are best-effort; their failure is logged and never
//! alters the caller's response.

use crate::app_state::AppState;
use codeflow_core::types::{day_bucket, EXECUTION_TTL_DAYS};
use codeflow_core::{ExecutionRecord, UsageDelta};

pub fn expiry_for(created_at: i64) -> i64 {
    created_at + EXECUTION_TTL_DAYS * 24 * 60 * 60 * 1000
}

/// Write the record and bump the day bucket. Failures do not propagate.
pub async fn record_execution(state: &AppState, record: ExecutionRecord) {
    let delta = UsageDelta {
        action_kind: record.action_kind,
        status: record.status,
        duration_ms: record.duration_ms,
        workflow_id: record.workflow_id.clone(),
    };
    let day = day_bucket(record.created_at);
    let portal_id = record.portal_id;
    let execution_id = record.id.clone();

    if let Err(e) = state.executions.insert_execution(&record).await {
        tracing::warn!(
            execution_id = %execution_id,
            portal_id = %portal_id,
            error = %e,
            "failed to write execution record"
        );
    }
    if let Err(e) = state.usage.upsert_usage(portal_id, &day, &delta).await {
        tracing::warn!(
            portal_id = %portal_id,
            day = %day,
            error = %e,
            "failed to upsert usage counters"
        );
    }
}
