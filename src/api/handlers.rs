//! API request handlers
//!
//! Every handler validates its input before touching the database and
//! answers with the `{"success": ..., "data" | "error": ...}` envelope.

use crate::db::{
    AccountUpdate, DailySource, DbError, DocumentFilter, ItemUpdate, NewAccount, NewItem, NewParty,
    NewPayment, NewPurchase, NewReceipt, NewSale, PartyKind, PartyUpdate, SettingsUpdate,
    StockAdjustmentRequest,
};
use crate::ledger::LedgerError;
use crate::types::{clamp_page, SaleKind};
use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

// ==========================================
// Response Helpers
// ==========================================

fn envelope_error(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

pub fn error_response(error: &str) -> Response {
    envelope_error(StatusCode::INTERNAL_SERVER_ERROR, error)
}

pub fn bad_request(error: &str) -> Response {
    envelope_error(StatusCode::BAD_REQUEST, error)
}

pub fn not_found(error: &str) -> Response {
    envelope_error(StatusCode::NOT_FOUND, error)
}

pub fn conflict(error: &str) -> Response {
    envelope_error(StatusCode::CONFLICT, error)
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
    .into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": data
        })),
    )
        .into_response()
}

fn deleted(what: String) -> Response {
    Json(serde_json::json!({
        "success": true,
        "message": format!("{} deleted", what)
    }))
    .into_response()
}

fn paginated<T: Serialize>(data: Vec<T>, total: i64, limit: i64, offset: i64) -> Response {
    let has_more = offset + (data.len() as i64) < total;
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "pagination": {
            "total": total,
            "limit": limit,
            "offset": offset,
            "has_more": has_more
        }
    }))
    .into_response()
}

/// Map a database error to its HTTP status
fn db_error(context: &str, err: DbError) -> Response {
    let err = match err {
        DbError::Sqlx(e) => DbError::from_constraint(e, context),
        other => other,
    };
    match &err {
        DbError::NotFound(_) => not_found(&err.to_string()),
        DbError::InvalidData(_) => bad_request(&err.to_string()),
        DbError::InsufficientStock { .. } | DbError::InsufficientBalance { .. } | DbError::Conflict(_) => {
            warn!("{}: {}", context, err);
            conflict(&err.to_string())
        }
        DbError::Sqlx(_) => {
            error!("{}: {}", context, err);
            error_response("Internal database error")
        }
    }
}

fn invalid(err: LedgerError) -> Response {
    bad_request(&err.to_string())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload.map(|Json(value)| value).map_err(|e| bad_request(&e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    params.map(|Query(value)| value).map_err(|e| bad_request(&e.body_text()))
}

fn check_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), Response> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(bad_request(&format!("from {} is after to {}", from, to))),
        _ => Ok(()),
    }
}

/// Unwrap a `Result<T, Response>` or return the response from the handler
macro_rules! try_or_respond {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    pub supplier_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub account_id: Option<i64>,
    pub kind: Option<SaleKind>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DocumentQuery {
    fn filter(&self, party_id: Option<i64>) -> Result<DocumentFilter, Response> {
        check_range(self.from, self.to)?;
        let (limit, offset) = clamp_page(self.limit, self.offset);
        Ok(DocumentFilter {
            party_id,
            account_id: self.account_id,
            kind: self.kind,
            from: self.from,
            to: self.to,
            limit,
            offset,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DailyQuery {
    #[serde(default)]
    pub kind: DailySource,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

// ==========================================
// Health & Settings Handlers
// ==========================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match state.db.ping().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "ledger_backend",
            "version": env!("CARGO_PKG_VERSION"),
            "database": "connected"
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "service": "ledger_backend",
                    "database": e.to_string()
                })),
            )
                .into_response()
        }
    }
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    ok(state.settings.get())
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> Response {
    let updates = try_or_respond!(body(payload));
    if let Err(e) = updates.validate() {
        return invalid(e);
    }

    match state.db.update_settings(updates).await {
        Ok(settings) => {
            state.settings.replace(settings.clone());
            ok(settings)
        }
        Err(e) => db_error("Settings", e),
    }
}

// ==========================================
// Item Handlers
// ==========================================

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let (limit, offset) = clamp_page(params.limit, params.offset);
    let search = params.q.as_deref();

    let total = match state.db.count_items(search).await {
        Ok(total) => total,
        Err(e) => return db_error("Items", e),
    };
    match state.db.list_items(search, limit, offset).await {
        Ok(items) => paginated(items, total, limit, offset),
        Err(e) => db_error("Items", e),
    }
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> Response {
    let item = try_or_respond!(body(payload));
    if let Err(e) = item.validate() {
        return invalid(e);
    }

    match state.db.create_item(&item).await {
        Ok(created_item) => created(created_item),
        Err(e) => db_error("Item code", e),
    }
}

pub async fn get_item(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_item(id).await {
        Ok(item) => ok(item),
        Err(e) => db_error(&format!("Item {}", id), e),
    }
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<ItemUpdate>, JsonRejection>,
) -> Response {
    let updates = try_or_respond!(body(payload));
    if let Err(e) = updates.validate() {
        return invalid(e);
    }

    match state.db.update_item(id, updates).await {
        Ok(item) => ok(item),
        Err(e) => db_error(&format!("Item {}", id), e),
    }
}

pub async fn delete_item(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_item(id).await {
        Ok(()) => deleted(format!("Item {}", id)),
        Err(e) => db_error(&format!("Item {}", id), e),
    }
}

pub async fn adjust_stock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<StockAdjustmentRequest>, JsonRejection>,
) -> Response {
    let req = try_or_respond!(body(payload));
    if let Err(e) = req.validate() {
        return invalid(e);
    }

    match state.db.adjust_stock(id, &req).await {
        Ok(item) => ok(item),
        Err(e) => db_error(&format!("Item {}", id), e),
    }
}

pub async fn item_movements(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    params: Result<Query<PageQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let (limit, offset) = clamp_page(params.limit, params.offset);

    match state.db.item_movements(id, limit, offset).await {
        Ok(movements) => ok(movements),
        Err(e) => db_error(&format!("Item {}", id), e),
    }
}

// ==========================================
// Supplier & Customer Handlers
// ==========================================

async fn list_parties(state: &AppState, kind: PartyKind, params: ListQuery) -> Response {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    let search = params.q.as_deref();

    let total = match state.db.count_parties(kind, search).await {
        Ok(total) => total,
        Err(e) => return db_error(kind.label(), e),
    };
    match state.db.list_parties(kind, search, limit, offset).await {
        Ok(parties) => paginated(parties, total, limit, offset),
        Err(e) => db_error(kind.label(), e),
    }
}

async fn create_party(state: &AppState, kind: PartyKind, party: NewParty) -> Response {
    if let Err(e) = party.validate() {
        return invalid(e);
    }
    match state.db.create_party(kind, &party).await {
        Ok(created_party) => created(created_party),
        Err(e) => db_error(kind.label(), e),
    }
}

async fn get_party(state: &AppState, kind: PartyKind, id: i64) -> Response {
    match state.db.get_party(kind, id).await {
        Ok(party) => ok(party),
        Err(e) => db_error(&format!("{} {}", kind.label(), id), e),
    }
}

async fn update_party(state: &AppState, kind: PartyKind, id: i64, updates: PartyUpdate) -> Response {
    if let Err(e) = updates.validate() {
        return invalid(e);
    }
    match state.db.update_party(kind, id, updates).await {
        Ok(party) => ok(party),
        Err(e) => db_error(&format!("{} {}", kind.label(), id), e),
    }
}

async fn delete_party(state: &AppState, kind: PartyKind, id: i64) -> Response {
    match state.db.delete_party(kind, id).await {
        Ok(()) => deleted(format!("{} {}", kind.label(), id)),
        Err(e) => db_error(&format!("{} {}", kind.label(), id), e),
    }
}

async fn party_statement(state: &AppState, kind: PartyKind, id: i64, range: DateRangeQuery) -> Response {
    try_or_respond!(check_range(range.from, range.to));
    match state.db.party_statement(kind, id, range.from, range.to).await {
        Ok(statement) => ok(statement),
        Err(e) => db_error(&format!("{} {}", kind.label(), id), e),
    }
}

pub async fn list_suppliers(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    list_parties(&state, PartyKind::Supplier, params).await
}

pub async fn create_supplier(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewParty>, JsonRejection>,
) -> Response {
    let party = try_or_respond!(body(payload));
    create_party(&state, PartyKind::Supplier, party).await
}

pub async fn get_supplier(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    get_party(&state, PartyKind::Supplier, id).await
}

pub async fn update_supplier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<PartyUpdate>, JsonRejection>,
) -> Response {
    let updates = try_or_respond!(body(payload));
    update_party(&state, PartyKind::Supplier, id, updates).await
}

pub async fn delete_supplier(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    delete_party(&state, PartyKind::Supplier, id).await
}

pub async fn supplier_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    params: Result<Query<DateRangeQuery>, QueryRejection>,
) -> Response {
    let range = try_or_respond!(query(params));
    party_statement(&state, PartyKind::Supplier, id, range).await
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    list_parties(&state, PartyKind::Customer, params).await
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewParty>, JsonRejection>,
) -> Response {
    let party = try_or_respond!(body(payload));
    create_party(&state, PartyKind::Customer, party).await
}

pub async fn get_customer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    get_party(&state, PartyKind::Customer, id).await
}

pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<PartyUpdate>, JsonRejection>,
) -> Response {
    let updates = try_or_respond!(body(payload));
    update_party(&state, PartyKind::Customer, id, updates).await
}

pub async fn delete_customer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    delete_party(&state, PartyKind::Customer, id).await
}

pub async fn customer_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    params: Result<Query<DateRangeQuery>, QueryRejection>,
) -> Response {
    let range = try_or_respond!(query(params));
    party_statement(&state, PartyKind::Customer, id, range).await
}

// ==========================================
// Account Handlers
// ==========================================

pub async fn list_accounts(State(state): State<Arc<AppState>>) -> Response {
    match state.db.list_accounts().await {
        Ok(accounts) => ok(accounts),
        Err(e) => db_error("Accounts", e),
    }
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewAccount>, JsonRejection>,
) -> Response {
    let account = try_or_respond!(body(payload));
    if let Err(e) = account.validate() {
        return invalid(e);
    }

    match state.db.create_account(&account).await {
        Ok(created_account) => created(created_account),
        Err(e) => db_error("Account", e),
    }
}

pub async fn get_account(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_account(id).await {
        Ok(account) => ok(account),
        Err(e) => db_error(&format!("Account {}", id), e),
    }
}

pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<AccountUpdate>, JsonRejection>,
) -> Response {
    let updates = try_or_respond!(body(payload));
    if let Err(e) = updates.validate() {
        return invalid(e);
    }

    match state.db.update_account(id, updates).await {
        Ok(account) => ok(account),
        Err(e) => db_error(&format!("Account {}", id), e),
    }
}

pub async fn delete_account(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_account(id).await {
        Ok(()) => deleted(format!("Account {}", id)),
        Err(e) => db_error(&format!("Account {}", id), e),
    }
}

pub async fn account_transactions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    params: Result<Query<DateRangeQuery>, QueryRejection>,
) -> Response {
    let range = try_or_respond!(query(params));
    try_or_respond!(check_range(range.from, range.to));

    match state.db.account_statement(id, range.from, range.to).await {
        Ok(statement) => ok(statement),
        Err(e) => db_error(&format!("Account {}", id), e),
    }
}

// ==========================================
// Purchase Handlers
// ==========================================

pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DocumentQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let filter = try_or_respond!(params.filter(params.supplier_id));

    let total = match state.db.count_purchases(&filter).await {
        Ok(total) => total,
        Err(e) => return db_error("Purchases", e),
    };
    match state.db.list_purchases(&filter).await {
        Ok(purchases) => paginated(purchases, total, filter.limit, filter.offset),
        Err(e) => db_error("Purchases", e),
    }
}

pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewPurchase>, JsonRejection>,
) -> Response {
    let purchase = try_or_respond!(body(payload));
    if let Err(e) = purchase.validate() {
        return invalid(e);
    }

    match state.db.create_purchase(&purchase).await {
        Ok(detail) => created(detail),
        Err(e) => db_error("Purchase", e),
    }
}

pub async fn get_purchase(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_purchase(id).await {
        Ok(detail) => ok(detail),
        Err(e) => db_error(&format!("Purchase {}", id), e),
    }
}

pub async fn delete_purchase(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_purchase(id).await {
        Ok(()) => deleted(format!("Purchase {}", id)),
        Err(e) => db_error(&format!("Purchase {}", id), e),
    }
}

// ==========================================
// Sale Handlers
// ==========================================

pub async fn list_sales(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DocumentQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let filter = try_or_respond!(params.filter(params.customer_id));

    let total = match state.db.count_sales(&filter).await {
        Ok(total) => total,
        Err(e) => return db_error("Sales", e),
    };
    match state.db.list_sales(&filter).await {
        Ok(sales) => paginated(sales, total, filter.limit, filter.offset),
        Err(e) => db_error("Sales", e),
    }
}

pub async fn create_sale(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSale>, JsonRejection>,
) -> Response {
    let sale = try_or_respond!(body(payload));
    if let Err(e) = sale.validate() {
        return invalid(e);
    }

    match state.db.create_sale(&sale).await {
        Ok(detail) => created(detail),
        Err(e) => db_error("Sale", e),
    }
}

pub async fn get_sale(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_sale(id).await {
        Ok(detail) => ok(detail),
        Err(e) => db_error(&format!("Sale {}", id), e),
    }
}

pub async fn delete_sale(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_sale(id).await {
        Ok(()) => deleted(format!("Sale {}", id)),
        Err(e) => db_error(&format!("Sale {}", id), e),
    }
}

// ==========================================
// Payment Handlers
// ==========================================

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DocumentQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let filter = try_or_respond!(params.filter(params.supplier_id));

    let total = match state.db.count_payments(&filter).await {
        Ok(total) => total,
        Err(e) => return db_error("Payments", e),
    };
    match state.db.list_payments(&filter).await {
        Ok(payments) => paginated(payments, total, filter.limit, filter.offset),
        Err(e) => db_error("Payments", e),
    }
}

pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewPayment>, JsonRejection>,
) -> Response {
    let payment = try_or_respond!(body(payload));
    if let Err(e) = payment.validate() {
        return invalid(e);
    }

    match state.db.create_payment(&payment).await {
        Ok(recorded) => created(recorded),
        Err(e) => db_error("Payment", e),
    }
}

pub async fn get_payment(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_payment(id).await {
        Ok(payment) => ok(payment),
        Err(e) => db_error(&format!("Payment {}", id), e),
    }
}

pub async fn delete_payment(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_payment(id).await {
        Ok(()) => deleted(format!("Payment {}", id)),
        Err(e) => db_error(&format!("Payment {}", id), e),
    }
}

// ==========================================
// Receipt Handlers
// ==========================================

pub async fn list_receipts(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DocumentQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    let filter = try_or_respond!(params.filter(params.customer_id));

    let total = match state.db.count_receipts(&filter).await {
        Ok(total) => total,
        Err(e) => return db_error("Receipts", e),
    };
    match state.db.list_receipts(&filter).await {
        Ok(receipts) => paginated(receipts, total, filter.limit, filter.offset),
        Err(e) => db_error("Receipts", e),
    }
}

pub async fn create_receipt(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewReceipt>, JsonRejection>,
) -> Response {
    let receipt = try_or_respond!(body(payload));
    if let Err(e) = receipt.validate() {
        return invalid(e);
    }

    match state.db.create_receipt(&receipt).await {
        Ok(recorded) => created(recorded),
        Err(e) => db_error("Receipt", e),
    }
}

pub async fn get_receipt(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.get_receipt(id).await {
        Ok(receipt) => ok(receipt),
        Err(e) => db_error(&format!("Receipt {}", id), e),
    }
}

pub async fn delete_receipt(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.db.delete_receipt(id).await {
        Ok(()) => deleted(format!("Receipt {}", id)),
        Err(e) => db_error(&format!("Receipt {}", id), e),
    }
}

// ==========================================
// Report Handlers
// ==========================================

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DateRangeQuery>, QueryRejection>,
) -> Response {
    let range = try_or_respond!(query(params));
    try_or_respond!(check_range(range.from, range.to));

    let threshold = state.settings.low_stock_threshold();
    match state.db.summary(range.from, range.to, threshold).await {
        Ok(summary) => ok(summary),
        Err(e) => db_error("Summary", e),
    }
}

pub async fn get_stock_report(State(state): State<Arc<AppState>>) -> Response {
    match state.db.stock_report(state.settings.low_stock_threshold()).await {
        Ok(rows) => ok(rows),
        Err(e) => db_error("Stock report", e),
    }
}

pub async fn get_low_stock(State(state): State<Arc<AppState>>) -> Response {
    match state.db.low_stock(state.settings.low_stock_threshold()).await {
        Ok(rows) => Json(serde_json::json!({
            "success": true,
            "count": rows.len(),
            "data": rows
        }))
        .into_response(),
        Err(e) => db_error("Low stock report", e),
    }
}

pub async fn get_daily_totals(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DailyQuery>, QueryRejection>,
) -> Response {
    let params = try_or_respond!(query(params));
    try_or_respond!(check_range(params.from, params.to));

    match state.db.daily_totals(params.kind, params.from, params.to).await {
        Ok(days) => ok(days),
        Err(e) => db_error("Daily report", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal::Decimal;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_db_error_status_mapping() {
        let response = db_error("Item 3", DbError::NotFound("Item 3".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = db_error(
            "Sale",
            DbError::InsufficientStock {
                item_id: 3,
                available: Decimal::from(1),
                requested: Decimal::from(-4),
            },
        );
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("item 3"));

        let response = db_error("Payment", DbError::InvalidData("too much".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = db_error("Items", DbError::Sqlx(sqlx::Error::PoolTimedOut));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal database error");

        let response = db_error(
            "Items",
            DbError::Sqlx(sqlx::Error::Configuration("password=hunter2 host=db.internal".into())),
        );
        let json = body_json(response).await;
        let message = json["error"].as_str().unwrap();
        assert!(!message.contains("hunter2") && !message.contains("db.internal"), "leaked: {}", message);
    }

    #[tokio::test]
    async fn test_pagination_envelope() {
        let json = body_json(paginated(vec![1, 2], 5, 2, 2)).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["pagination"]["total"], 5);
        assert_eq!(json["pagination"]["has_more"], true);

        let json = body_json(paginated(vec![5], 5, 2, 4)).await;
        assert_eq!(json["pagination"]["has_more"], false);
    }

    #[test]
    fn test_document_query_filter() {
        let params = DocumentQuery {
            customer_id: Some(7),
            limit: Some(10_000),
            offset: Some(-3),
            ..DocumentQuery::default()
        };
        let filter = params.filter(params.customer_id).unwrap();
        assert_eq!(filter.party_id, Some(7));
        assert_eq!(filter.limit, 500);
        assert_eq!(filter.offset, 0);

        let params = DocumentQuery {
            from: NaiveDate::from_ymd_opt(2024, 5, 2),
            to: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..DocumentQuery::default()
        };
        let response = params.filter(None).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
