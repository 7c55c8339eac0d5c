use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::domain::{AllocationAction, CreditId, EntryId, Operator, PendingEntryView};
use super::planner::AllocationError;
use super::repository::{CreditStore, PendingFilter, SurplusLedger};
use super::service::{CommitRequest, PageRequest, PreviewRequest, SurplusAllocationService};

/// Router builder exposing the engine endpoints to the back-office UI.
pub fn surplus_router<L, C>(service: Arc<SurplusAllocationService<L, C>>) -> Router
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    Router::new()
        .route("/api/v1/surplus/pending", get(pending_handler::<L, C>))
        .route(
            "/api/v1/surplus/:entry_id/credits",
            get(credits_handler::<L, C>),
        )
        .route(
            "/api/v1/surplus/:entry_id/preview",
            post(preview_handler::<L, C>),
        )
        .route(
            "/api/v1/surplus/:entry_id/distribution",
            post(distribution_handler::<L, C>),
        )
        .route(
            "/api/v1/surplus/:entry_id/commit",
            post(commit_handler::<L, C>),
        )
        .route(
            "/api/v1/surplus/:entry_id/reintegrate",
            post(reintegrate_handler::<L, C>),
        )
        .with_state(service)
}

impl IntoResponse for AllocationError {
    fn into_response(self) -> Response {
        let status = match &self {
            AllocationError::NotFound { .. } => StatusCode::NOT_FOUND,
            AllocationError::InvalidState { .. } | AllocationError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            AllocationError::InvalidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AllocationError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            AllocationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PendingQuery {
    pub(crate) borrower_cedula: Option<String>,
    pub(crate) deductora_id: Option<String>,
    pub(crate) date_from: Option<NaiveDate>,
    pub(crate) date_to: Option<NaiveDate>,
    pub(crate) page: Option<usize>,
    pub(crate) per_page: Option<usize>,
}

pub(crate) async fn pending_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Query(query): Query<PendingQuery>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    let filter = PendingFilter {
        borrower_cedula: query.borrower_cedula,
        deductora_id: query.deductora_id,
        date_from: query.date_from,
        date_to: query.date_to,
    };
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };

    match service.list_pending(&filter, page) {
        Ok(paged) => {
            let items: Vec<PendingEntryView> = paged.items.iter().map(|e| e.view()).collect();
            let body = json!({
                "items": items,
                "page": paged.page,
                "per_page": paged.per_page,
                "total": paged.total,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Active credits of the entry's borrower, for the allocation dialogs.
pub(crate) async fn credits_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Path(entry_id): Path<String>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    match service.borrower_credits(&EntryId(entry_id)) {
        Ok(credits) => (StatusCode::OK, Json(credits)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewBody {
    pub(crate) credit_id: CreditId,
    #[serde(flatten)]
    pub(crate) action: AllocationAction,
    pub(crate) amount: Option<Decimal>,
}

pub(crate) async fn preview_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Path(entry_id): Path<String>,
    Json(body): Json<PreviewBody>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    let request = PreviewRequest {
        entry_id: EntryId(entry_id),
        credit_id: body.credit_id,
        action: body.action,
        amount: body.amount,
    };
    match service.preview(&request) {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DistributionBody {
    /// Caller-supplied order; the engine applies no tie-break of its own.
    pub(crate) credit_ids: Vec<CreditId>,
}

pub(crate) async fn distribution_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Path(entry_id): Path<String>,
    Json(body): Json<DistributionBody>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    match service.distribution(&EntryId(entry_id), &body.credit_ids) {
        Ok(suggestions) => (StatusCode::OK, Json(suggestions)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitBody {
    pub(crate) credit_id: CreditId,
    #[serde(flatten)]
    pub(crate) action: AllocationAction,
    pub(crate) amount: Option<Decimal>,
    pub(crate) expected_resulting_balance: Option<Decimal>,
    pub(crate) operator: Operator,
}

pub(crate) async fn commit_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Path(entry_id): Path<String>,
    Json(body): Json<CommitBody>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    let request = CommitRequest {
        entry_id: EntryId(entry_id),
        credit_id: body.credit_id,
        action: body.action,
        amount: body.amount,
        expected_resulting_balance: body.expected_resulting_balance,
    };
    match service.commit(&request, &body.operator) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReintegrateBody {
    pub(crate) reason: String,
    pub(crate) operator: Operator,
}

pub(crate) async fn reintegrate_handler<L, C>(
    State(service): State<Arc<SurplusAllocationService<L, C>>>,
    Path(entry_id): Path<String>,
    Json(body): Json<ReintegrateBody>,
) -> Response
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    match service.reintegrate(&EntryId(entry_id), &body.reason, &body.operator) {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(err) => err.into_response(),
    }
}
