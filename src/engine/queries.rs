use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SharedRequestState};

impl Engine {
    /// Collect every request Arc first, then lock one at a time — never
    /// await while iterating the map.
    async fn collect_requests(&self) -> Vec<SharedRequestState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// Requests this staff member can still act on: AwaitingGm, their own
    /// response Pending, and no peer answer yet (a peer's Available claims
    /// the request, a peer's AllUnavailable drops it from this worklist —
    /// the request itself stays open either way).
    pub async fn list_pending_for_staff(&self, staff_id: Ulid) -> Vec<RequestInfo> {
        let mut out = Vec::new();
        for rs in self.collect_requests().await {
            let guard = rs.read().await;
            if guard.status != RequestStatus::AwaitingGm {
                continue;
            }
            match guard.response(&staff_id) {
                Some(r) if r.status == ResponseStatus::Pending => {}
                _ => continue,
            }
            let peer_answered = guard
                .responses
                .iter()
                .any(|r| r.staff_id != staff_id && r.status != ResponseStatus::Pending);
            if peer_answered {
                continue;
            }
            out.push(RequestInfo::from_state(&guard));
        }
        out.sort_by_key(|r| (r.opened_at, r.id));
        out
    }

    /// Requests the store approver can decide: everything not yet terminal.
    /// AwaitingGm is included — the approver may force a decision before
    /// any GM answers.
    pub async fn list_store_actionable(&self) -> Vec<RequestInfo> {
        let mut out = Vec::new();
        for rs in self.collect_requests().await {
            let guard = rs.read().await;
            if guard.status.is_terminal() {
                continue;
            }
            out.push(RequestInfo::from_state(&guard));
        }
        out.sort_by_key(|r| (r.opened_at, r.id));
        out
    }

    pub async fn request_info(&self, id: Ulid) -> Result<RequestInfo, EngineError> {
        let rs = self.get_request(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(RequestInfo::from_state(&guard))
    }

    pub async fn list_requests(&self, status: Option<RequestStatus>) -> Vec<RequestInfo> {
        let mut out = Vec::new();
        for rs in self.collect_requests().await {
            let guard = rs.read().await;
            if let Some(want) = status
                && guard.status != want {
                    continue;
                }
            out.push(RequestInfo::from_state(&guard));
        }
        out.sort_by_key(|r| (r.opened_at, r.id));
        out
    }

    pub async fn list_responses(&self, request_id: Ulid) -> Result<Vec<ResponseInfo>, EngineError> {
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let guard = rs.read().await;
        Ok(guard
            .responses
            .iter()
            .map(|r| ResponseInfo {
                request_id,
                staff_id: r.staff_id,
                status: r.status,
                selected_orders: r.selected_orders.clone(),
                notes: r.notes.clone(),
                responded_at: r.responded_at,
            })
            .collect())
    }

    /// The occupancy view over a date range — confirmed private bookings
    /// and ordinary schedule events, one row per committed conflict key.
    pub async fn occupancy_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OccupancyInfo>, EngineError> {
        if from > to {
            return Err(EngineError::Validation("query window start after end"));
        }
        if (to - from).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let occ = self.occupancy.read().await;
        Ok(occ.snapshot(from, to))
    }
}
