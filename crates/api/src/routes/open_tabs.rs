//! Open-tab endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{ParticipantId, ProductId, TabId};
use document_store::DocumentStore;
use domain::{
    AddParticipantProduct, AddProduct, CancelTab, CommandResult, CreateTab, DivideByProducts,
    DivideEqual, NewPayment, NewProduct, OpenTab, OpenTabService, ParticipantInput,
    ProductAssignment, RegisterPayment, RemoveParticipantProduct, RemoveProduct, TransferProduct,
    UpdateProductUnits,
};
use serde::{Deserialize, Serialize};
use settlement::{CloseOutcome, Movement, PaymentRecord, StockMovement, StoreCloseCoordinator};

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::extract::{Company, JsonBody, PathParams, QueryParams, parse_id};

/// Shared application state accessible from all handlers.
pub struct AppState<S: DocumentStore> {
    pub tabs: OpenTabService<S>,
    pub closer: StoreCloseCoordinator<S>,
}

impl<S: DocumentStore + Clone> AppState<S> {
    /// Wires every service to the same store handle.
    pub fn new(store: S) -> Self {
        Self {
            tabs: OpenTabService::new(store.clone()),
            closer: StoreCloseCoordinator::with_store(store),
        }
    }
}

type Reply<T> = Result<Json<Envelope<T>>, ApiError>;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub include_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTabRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub product: NewProduct,
}

#[derive(Debug, Deserialize)]
pub struct UnitsRequest {
    pub units: i64,
}

#[derive(Debug, Deserialize)]
pub struct DivideEqualRequest {
    pub participants: Vec<ParticipantInput>,
}

#[derive(Debug, Deserialize)]
pub struct DivideProductsRequest {
    pub assignments: Vec<ProductAssignment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_participant_id: ParticipantId,
    pub to_participant_id: ParticipantId,
    pub product_index: usize,
    pub units: u32,
}

#[derive(Debug, Deserialize)]
pub struct PaymentsRequest {
    pub payments: Vec<NewPayment>,
}

// -- Response types --

/// A tab plus the version clients can use to detect concurrent edits.
#[derive(Debug, Serialize)]
pub struct TabResponse {
    #[serde(flatten)]
    pub tab: OpenTab,
    pub version: i64,
}

impl From<OpenTab> for TabResponse {
    fn from(tab: OpenTab) -> Self {
        let version = domain::Aggregate::version(&tab).as_i64();
        Self { tab, version }
    }
}

impl From<CommandResult<OpenTab>> for TabResponse {
    fn from(result: CommandResult<OpenTab>) -> Self {
        Self {
            version: result.new_version.as_i64(),
            tab: result.aggregate,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub tab: TabResponse,
    pub movements: Vec<Movement>,
    pub payments: Vec<PaymentRecord>,
    pub stock_movements: Vec<StockMovement>,
    pub skipped_products: Vec<ProductId>,
    pub stock_warnings: Vec<String>,
}

impl From<CloseOutcome> for CloseResponse {
    fn from(outcome: CloseOutcome) -> Self {
        Self {
            tab: outcome.tab.into(),
            movements: outcome.movements,
            payments: outcome.payments,
            stock_movements: outcome.stock.movements,
            skipped_products: outcome.stock.skipped,
            stock_warnings: outcome.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

fn tab_reply(result: CommandResult<OpenTab>, message: &str) -> Reply<TabResponse> {
    Ok(Json(Envelope::ok(result.into()).with_message(message)))
}

// -- Handlers --

/// GET /open-tabs: list the company's tabs, newest first.
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn list<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    QueryParams(query): QueryParams<ListQuery>,
) -> Reply<Vec<TabResponse>> {
    let tabs = state.tabs.list_tabs(&company.0, query.include_all).await?;
    Ok(Json(Envelope::ok(
        tabs.into_iter().map(TabResponse::from).collect(),
    )))
}

/// GET /open-tabs/:id: load a single tab.
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn get<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
) -> Reply<TabResponse> {
    let tab_id: TabId = parse_id(&id, "tab id")?;
    let tab = state.tabs.get_tab(&company.0, tab_id).await?;
    Ok(Json(Envelope::ok(tab.into())))
}

/// POST /open-tabs: create an empty tab.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn create<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    JsonBody(req): JsonBody<CreateTabRequest>,
) -> Result<(StatusCode, Json<Envelope<TabResponse>>), ApiError> {
    let result = state
        .tabs
        .create_tab(&company.0, CreateTab::new(req.name))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(result.into()).with_message("Open tab created")),
    ))
}

/// POST /open-tabs/:id/products: add a product to the shared cart.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn add_product<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
    JsonBody(req): JsonBody<ProductRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let result = state
        .tabs
        .add_product(&company.0, AddProduct::new(tab_id, req.product))
        .await?;
    tab_reply(result, "Product added")
}

/// DELETE /open-tabs/:id/products/:index: remove a shared product line.
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn remove_product<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams((id, index)): PathParams<(String, usize)>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let result = state
        .tabs
        .remove_product(&company.0, RemoveProduct::new(tab_id, index))
        .await?;
    tab_reply(result, "Product removed")
}

/// PUT /open-tabs/:id/products/:index: set the units of a shared line.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn update_product_units<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams((id, index)): PathParams<(String, usize)>,
    JsonBody(req): JsonBody<UnitsRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let result = state
        .tabs
        .update_product_units(
            &company.0,
            UpdateProductUnits::new(tab_id, index, req.units),
        )
        .await?;
    tab_reply(result, "Product updated")
}

/// POST /open-tabs/:id/divide-equal: split the total equally.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn divide_equal<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
    JsonBody(req): JsonBody<DivideEqualRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let result = state
        .tabs
        .divide_equal(&company.0, DivideEqual::new(tab_id, req.participants))
        .await?;
    tab_reply(result, "Tab divided")
}

/// POST /open-tabs/:id/divide-products: assign products to participants.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn divide_by_products<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
    JsonBody(req): JsonBody<DivideProductsRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let result = state
        .tabs
        .divide_by_products(&company.0, DivideByProducts::new(tab_id, req.assignments))
        .await?;
    tab_reply(result, "Tab divided")
}

/// POST /open-tabs/:id/participants/:pid/products
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn add_participant_product<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams((id, pid)): PathParams<(String, String)>,
    JsonBody(req): JsonBody<ProductRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let participant_id = parse_id(&pid, "participant id")?;
    let result = state
        .tabs
        .add_product_to_participant(
            &company.0,
            AddParticipantProduct::new(tab_id, participant_id, req.product),
        )
        .await?;
    tab_reply(result, "Product added")
}

/// DELETE /open-tabs/:id/participants/:pid/products/:index
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn remove_participant_product<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams((id, pid, index)): PathParams<(String, String, usize)>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let participant_id = parse_id(&pid, "participant id")?;
    let result = state
        .tabs
        .remove_product_from_participant(
            &company.0,
            RemoveParticipantProduct::new(tab_id, participant_id, index),
        )
        .await?;
    tab_reply(result, "Product removed")
}

/// POST /open-tabs/:id/transfer: move units between participants.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn transfer<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
    JsonBody(req): JsonBody<TransferRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let cmd = TransferProduct::new(
        tab_id,
        req.from_participant_id,
        req.to_participant_id,
        req.product_index,
        req.units,
    );
    let result = state.tabs.transfer_product(&company.0, cmd).await?;
    tab_reply(result, "Product transferred")
}

/// POST /open-tabs/:id/participants/:pid/payments: settle a participant.
#[tracing::instrument(skip(state, req), fields(company = %company.0))]
pub async fn register_payment<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams((id, pid)): PathParams<(String, String)>,
    JsonBody(req): JsonBody<PaymentsRequest>,
) -> Reply<TabResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let participant_id = parse_id(&pid, "participant id")?;
    let result = state
        .tabs
        .register_payment(
            &company.0,
            RegisterPayment::new(tab_id, participant_id, req.payments),
        )
        .await?;
    tab_reply(result, "Payment registered")
}

/// POST /open-tabs/:id/close: close the tab and generate its documents.
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn close<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
) -> Reply<CloseResponse> {
    let tab_id = parse_id(&id, "tab id")?;
    let outcome = state.closer.close_tab(&company.0, tab_id).await?;
    Ok(Json(Envelope::ok(outcome.into()).with_message("Open tab closed")))
}

/// POST /open-tabs/:id/cancel: delete a tab nobody has paid for.
#[tracing::instrument(skip(state), fields(company = %company.0))]
pub async fn cancel<S: DocumentStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    company: Company,
    PathParams(id): PathParams<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let tab_id = parse_id(&id, "tab id")?;
    state
        .tabs
        .cancel_tab(&company.0, CancelTab::new(tab_id))
        .await?;
    Ok(Json(Envelope::message("Open tab cancelled")))
}
