//! Database models matching the PostgreSQL schema

use crate::ledger::{
    ensure_fits, ensure_non_negative, ensure_present, round_money, validate_lines, validate_movement, LedgerError, LineRequest,
    Settlement, Statement,
};
use crate::types::{EntryKind, PaymentMethod, SaleKind, MONEY_SCALE, PRICE_SCALE, QUANTITY_SCALE};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

fn decode_err(what: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {} in database: {}", what, value).into())
}

fn method_from_row(row: &PgRow) -> Result<PaymentMethod, sqlx::Error> {
    let raw: String = row.try_get("method")?;
    PaymentMethod::from_db(&raw).ok_or_else(|| decode_err("payment method", &raw))
}

// ==========================================
// Settings
// ==========================================

/// Business settings (single row, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub id: i32,
    pub business_name: String,
    pub currency: String,
    pub low_stock_threshold: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: 1,
            business_name: "My Business".to_string(),
            currency: "USD".to_string(),
            low_stock_threshold: Decimal::from(5),
            updated_at: None,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for Settings {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            business_name: row.try_get("business_name")?,
            currency: row.try_get("currency")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Settings update request (all fields optional)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub business_name: Option<String>,
    pub currency: Option<String>,
    pub low_stock_threshold: Option<Decimal>,
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.business_name.is_some() {
            ensure_present(self.business_name.as_deref(), "business_name")?;
        }
        if self.currency.is_some() {
            ensure_present(self.currency.as_deref(), "currency")?;
        }
        if let Some(threshold) = self.low_stock_threshold {
            ensure_non_negative(threshold, "low_stock_threshold")?;
            ensure_fits(threshold, QUANTITY_SCALE, "low_stock_threshold")?;
        }
        Ok(())
    }
}

// ==========================================
// Items
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub unit: String,
    pub purchase_price: Decimal,
    pub retail_price: Decimal,
    pub wholesale_price: Decimal,
    pub quantity: Decimal,
    pub reorder_level: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Price a sale line is billed at when the client sends none
    pub fn sale_price(&self, kind: SaleKind) -> Decimal {
        match kind {
            SaleKind::Retail => self.retail_price,
            SaleKind::Wholesale => self.wholesale_price,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for Item {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            unit: row.try_get("unit")?,
            purchase_price: row.try_get("purchase_price")?,
            retail_price: row.try_get("retail_price")?,
            wholesale_price: row.try_get("wholesale_price")?,
            quantity: row.try_get("quantity")?,
            reorder_level: row.try_get("reorder_level")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub code: Option<String>,
    pub name: String,
    pub unit: Option<String>,
    #[serde(default)]
    pub purchase_price: Decimal,
    #[serde(default)]
    pub retail_price: Decimal,
    /// Defaults to the retail price
    pub wholesale_price: Option<Decimal>,
    /// Stock on hand when the item is first registered
    pub opening_quantity: Option<Decimal>,
    pub reorder_level: Option<Decimal>,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), LedgerError> {
        ensure_present(Some(self.name.as_str()), "name")?;
        for (value, field) in [
            (self.purchase_price, "purchase_price"),
            (self.retail_price, "retail_price"),
            (self.wholesale_price.unwrap_or_default(), "wholesale_price"),
        ] {
            ensure_non_negative(value, field)?;
            ensure_fits(value, PRICE_SCALE, field)?;
        }
        for (value, field) in [
            (self.opening_quantity.unwrap_or_default(), "opening_quantity"),
            (self.reorder_level.unwrap_or_default(), "reorder_level"),
        ] {
            ensure_non_negative(value, field)?;
            ensure_fits(value, QUANTITY_SCALE, field)?;
        }
        Ok(())
    }
}

/// Item update request. Quantity is only changed through documents and adjustments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub purchase_price: Option<Decimal>,
    pub retail_price: Option<Decimal>,
    pub wholesale_price: Option<Decimal>,
    pub reorder_level: Option<Decimal>,
}

impl ItemUpdate {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.name.is_some() {
            ensure_present(self.name.as_deref(), "name")?;
        }
        for (value, field, places) in [
            (self.purchase_price, "purchase_price", PRICE_SCALE),
            (self.retail_price, "retail_price", PRICE_SCALE),
            (self.wholesale_price, "wholesale_price", PRICE_SCALE),
            (self.reorder_level, "reorder_level", QUANTITY_SCALE),
        ] {
            let value = value.unwrap_or_default();
            ensure_non_negative(value, field)?;
            ensure_fits(value, places, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustmentRequest {
    pub delta: Decimal,
    pub reason: Option<String>,
}

impl StockAdjustmentRequest {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.delta.is_zero() {
            return Err(LedgerError::ZeroAdjustment);
        }
        ensure_fits(self.delta, QUANTITY_SCALE, "delta")
    }
}

/// One line of an item's stock history (signed quantity)
#[derive(Debug, Clone, Serialize)]
pub struct StockMovement {
    pub occurred_on: NaiveDate,
    pub kind: EntryKind,
    pub reference_id: i64,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub note: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for StockMovement {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            occurred_on: row.try_get("occurred_on")?,
            kind: EntryKind::from_db(&kind).ok_or_else(|| decode_err("movement kind", &kind))?,
            reference_id: row.try_get("reference_id")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            note: row.try_get("note")?,
        })
    }
}

// ==========================================
// Suppliers & Customers
// ==========================================

/// Suppliers and customers share one shape and differ only by table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyKind {
    Supplier,
    Customer,
}

impl PartyKind {
    pub fn table(&self) -> &'static str {
        match self {
            PartyKind::Supplier => "suppliers",
            PartyKind::Customer => "customers",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PartyKind::Supplier => "Supplier",
            PartyKind::Customer => "Customer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Party {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            address: row.try_get("address")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParty {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub note: Option<String>,
}

impl NewParty {
    pub fn validate(&self) -> Result<(), LedgerError> {
        ensure_present(Some(self.name.as_str()), "name")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartyUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub note: Option<String>,
}

impl PartyUpdate {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.name.is_some() {
            ensure_present(self.name.as_deref(), "name")?;
        }
        Ok(())
    }
}

// ==========================================
// Accounts
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub opening_balance: Decimal,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Account {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            bank_name: row.try_get("bank_name")?,
            account_number: row.try_get("account_number")?,
            opening_balance: row.try_get("opening_balance")?,
            balance: row.try_get("balance")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    #[serde(default)]
    pub opening_balance: Decimal,
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), LedgerError> {
        ensure_present(Some(self.name.as_str()), "name")?;
        ensure_non_negative(self.opening_balance, "opening_balance")?;
        ensure_fits(self.opening_balance, MONEY_SCALE, "opening_balance")
    }
}

/// Account update request. Balance only moves through payments and receipts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
}

impl AccountUpdate {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.name.is_some() {
            ensure_present(self.name.as_deref(), "name")?;
        }
        Ok(())
    }
}

// ==========================================
// Documents (purchases & sales)
// ==========================================

/// Line of a purchase or sale joined with its item name
#[derive(Debug, Clone, Serialize)]
pub struct DocumentLine {
    pub id: i64,
    pub item_id: i64,
    pub item_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl<'r> FromRow<'r, PgRow> for DocumentLine {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            item_name: row.try_get("item_name")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            line_total: row.try_get("line_total")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Purchase {
    pub id: i64,
    pub supplier_id: i64,
    pub supplier_name: String,
    pub invoice_no: Option<String>,
    pub purchase_date: NaiveDate,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Sum of payments recorded against this purchase
    pub paid: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Purchase {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            supplier_id: row.try_get("supplier_id")?,
            supplier_name: row.try_get("supplier_name")?,
            invoice_no: row.try_get("invoice_no")?,
            purchase_date: row.try_get("purchase_date")?,
            subtotal: row.try_get("subtotal")?,
            discount: row.try_get("discount")?,
            total: row.try_get("total")?,
            paid: row.try_get("paid")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseDetail {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub lines: Vec<DocumentLine>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchase {
    pub supplier_id: i64,
    pub invoice_no: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub discount: Decimal,
    pub note: Option<String>,
    pub lines: Vec<LineRequest>,
    /// Amount paid to the supplier at the time of purchase
    pub payment: Option<Settlement>,
}

impl NewPurchase {
    /// Checks that need no database access; totals are checked once prices are known
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_lines(&self.lines)?;
        ensure_non_negative(self.discount, "discount")?;
        ensure_fits(round_money(self.discount), MONEY_SCALE, "discount")?;
        if let Some(payment) = &self.payment {
            payment.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sale {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub customer_name: Option<String>,
    pub kind: SaleKind,
    pub invoice_no: Option<String>,
    pub sale_date: NaiveDate,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Sum of receipts recorded against this sale
    pub received: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Sale {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            customer_name: row.try_get("customer_name")?,
            kind: SaleKind::from_db(&kind).ok_or_else(|| decode_err("sale kind", &kind))?,
            invoice_no: row.try_get("invoice_no")?,
            sale_date: row.try_get("sale_date")?,
            subtotal: row.try_get("subtotal")?,
            discount: row.try_get("discount")?,
            total: row.try_get("total")?,
            received: row.try_get("received")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleDetail {
    #[serde(flatten)]
    pub sale: Sale,
    pub lines: Vec<DocumentLine>,
    pub receipts: Vec<Receipt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSale {
    /// `None` records a walk-in sale
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub kind: SaleKind,
    pub invoice_no: Option<String>,
    pub sale_date: Option<NaiveDate>,
    #[serde(default)]
    pub discount: Decimal,
    pub note: Option<String>,
    pub lines: Vec<LineRequest>,
    /// Amount received from the customer at the time of sale
    pub receipt: Option<Settlement>,
}

impl NewSale {
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_lines(&self.lines)?;
        ensure_non_negative(self.discount, "discount")?;
        ensure_fits(round_money(self.discount), MONEY_SCALE, "discount")?;
        if let Some(receipt) = &self.receipt {
            receipt.validate()?;
        }
        Ok(())
    }
}

// ==========================================
// Payments & Receipts
// ==========================================

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i64,
    pub supplier_id: i64,
    pub supplier_name: String,
    pub purchase_id: Option<i64>,
    pub account_id: Option<i64>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Payment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            supplier_id: row.try_get("supplier_id")?,
            supplier_name: row.try_get("supplier_name")?,
            purchase_id: row.try_get("purchase_id")?,
            account_id: row.try_get("account_id")?,
            method: method_from_row(row)?,
            amount: row.try_get("amount")?,
            payment_date: row.try_get("payment_date")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub supplier_id: i64,
    pub purchase_id: Option<i64>,
    pub account_id: Option<i64>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub payment_date: Option<NaiveDate>,
    pub note: Option<String>,
}

impl NewPayment {
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_movement(self.method, self.account_id, self.amount)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub customer_name: Option<String>,
    pub sale_id: Option<i64>,
    pub account_id: Option<i64>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub receipt_date: NaiveDate,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Receipt {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            customer_name: row.try_get("customer_name")?,
            sale_id: row.try_get("sale_id")?,
            account_id: row.try_get("account_id")?,
            method: method_from_row(row)?,
            amount: row.try_get("amount")?,
            receipt_date: row.try_get("receipt_date")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReceipt {
    /// Required unless the receipt is attached to a sale
    pub customer_id: Option<i64>,
    pub sale_id: Option<i64>,
    pub account_id: Option<i64>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub receipt_date: Option<NaiveDate>,
    pub note: Option<String>,
}

impl NewReceipt {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.customer_id.is_none() && self.sale_id.is_none() {
            return Err(LedgerError::Required("customer_id"));
        }
        validate_movement(self.method, self.account_id, self.amount)
    }
}

// ==========================================
// Query Filters
// ==========================================

/// Filters shared by document and movement listings
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Supplier for purchases/payments, customer for sales/receipts
    pub party_id: Option<i64>,
    pub account_id: Option<i64>,
    pub kind: Option<SaleKind>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

// ==========================================
// Reports
// ==========================================

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub purchases_count: i64,
    pub purchases_total: Decimal,
    pub sales_count: i64,
    pub sales_total: Decimal,
    pub payments_total: Decimal,
    pub receipts_total: Decimal,
    pub stock_value: Decimal,
    pub bank_balance: Decimal,
    pub cash_in_hand: Decimal,
    pub receivables: Decimal,
    pub payables: Decimal,
    pub low_stock_items: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockRow {
    pub item_id: i64,
    pub code: Option<String>,
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
    pub purchase_price: Decimal,
    pub stock_value: Decimal,
    pub reorder_level: Option<Decimal>,
    pub low_stock: bool,
}

impl StockRow {
    /// Item-level reorder level wins over the global threshold
    pub fn from_item(item: &Item, default_threshold: Decimal) -> Self {
        let threshold = item.reorder_level.unwrap_or(default_threshold);
        Self {
            item_id: item.id,
            code: item.code.clone(),
            name: item.name.clone(),
            unit: item.unit.clone(),
            quantity: item.quantity,
            purchase_price: item.purchase_price,
            stock_value: crate::ledger::round_money(item.quantity * item.purchase_price),
            reorder_level: item.reorder_level,
            low_stock: item.quantity <= threshold,
        }
    }
}

/// Document table a daily report aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DailySource {
    #[default]
    Sales,
    Purchases,
}

impl DailySource {
    pub fn table(&self) -> &'static str {
        match self {
            DailySource::Sales => "sales",
            DailySource::Purchases => "purchases",
        }
    }

    pub fn date_column(&self) -> &'static str {
        match self {
            DailySource::Sales => "sale_date",
            DailySource::Purchases => "purchase_date",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyStatement {
    pub party: Party,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(flatten)]
    pub statement: Statement,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatement {
    pub account: Account,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(flatten)]
    pub statement: Statement,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub count: i64,
    pub total: Decimal,
}

impl<'r> FromRow<'r, PgRow> for DailyTotal {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            date: row.try_get("date")?,
            count: row.try_get("count")?,
            total: row.try_get("total")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i64, reorder_level: Option<i64>) -> Item {
        Item {
            id: 1,
            code: Some("RICE-5".to_string()),
            name: "Rice 5kg".to_string(),
            unit: "bag".to_string(),
            purchase_price: "7.25".parse().unwrap(),
            retail_price: "9.99".parse().unwrap(),
            wholesale_price: "8.75".parse().unwrap(),
            quantity: Decimal::from(quantity),
            reorder_level: reorder_level.map(Decimal::from),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sale_price_follows_kind() {
        let item = item(10, None);
        assert_eq!(item.sale_price(SaleKind::Retail), "9.99".parse::<Decimal>().unwrap());
        assert_eq!(item.sale_price(SaleKind::Wholesale), "8.75".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_stock_row_low_stock_threshold() {
        // Global threshold applies without an item reorder level
        let row = StockRow::from_item(&item(5, None), Decimal::from(5));
        assert!(row.low_stock);
        assert_eq!(row.stock_value, "36.25".parse::<Decimal>().unwrap());

        // Item reorder level overrides the global threshold
        let row = StockRow::from_item(&item(5, Some(2)), Decimal::from(5));
        assert!(!row.low_stock);
    }

    #[test]
    fn test_new_sale_defaults() {
        let sale: NewSale = serde_json::from_value(serde_json::json!({
            "lines": [{ "item_id": 3, "quantity": 2 }]
        }))
        .unwrap();
        assert_eq!(sale.kind, SaleKind::Retail);
        assert_eq!(sale.discount, Decimal::ZERO);
        assert!(sale.customer_id.is_none());
        assert!(sale.lines[0].unit_price.is_none());
    }

    #[test]
    fn test_request_validation() {
        let item: NewItem = serde_json::from_value(serde_json::json!({
            "name": "   ",
            "retail_price": "2.50"
        }))
        .unwrap();
        assert_eq!(item.validate(), Err(LedgerError::Required("name")));

        let item: NewItem = serde_json::from_value(serde_json::json!({
            "name": "Soap",
            "opening_quantity": -1
        }))
        .unwrap();
        assert_eq!(item.validate(), Err(LedgerError::Negative("opening_quantity")));

        let receipt: NewReceipt = serde_json::from_value(serde_json::json!({
            "method": "cash",
            "amount": 10
        }))
        .unwrap();
        assert_eq!(receipt.validate(), Err(LedgerError::Required("customer_id")));

        let adjust = StockAdjustmentRequest { delta: Decimal::ZERO, reason: None };
        assert_eq!(adjust.validate(), Err(LedgerError::ZeroAdjustment));

        let update = SettingsUpdate {
            low_stock_threshold: Some(Decimal::from(-1)),
            ..SettingsUpdate::default()
        };
        assert_eq!(update.validate(), Err(LedgerError::Negative("low_stock_threshold")));
    }

    #[test]
    fn test_values_must_fit_columns() {
        let item: NewItem = serde_json::from_value(serde_json::json!({
            "name": "Flour",
            "retail_price": "99999999999999"
        }))
        .unwrap();
        assert_eq!(item.validate(), Err(LedgerError::OutOfRange("retail_price")));

        let item: NewItem = serde_json::from_value(serde_json::json!({
            "name": "Flour",
            "opening_quantity": "1.0005"
        }))
        .unwrap();
        assert_eq!(
            item.validate(),
            Err(LedgerError::TooPrecise { field: "opening_quantity", places: 3 })
        );

        let update = ItemUpdate {
            reorder_level: Some("0.0001".parse().unwrap()),
            ..ItemUpdate::default()
        };
        assert_eq!(
            update.validate(),
            Err(LedgerError::TooPrecise { field: "reorder_level", places: 3 })
        );

        let adjust = StockAdjustmentRequest { delta: "-0.0004".parse().unwrap(), reason: None };
        assert_eq!(adjust.validate(), Err(LedgerError::TooPrecise { field: "delta", places: 3 }));

        let account: NewAccount = serde_json::from_value(serde_json::json!({
            "name": "Main",
            "opening_balance": "10.005"
        }))
        .unwrap();
        assert_eq!(
            account.validate(),
            Err(LedgerError::TooPrecise { field: "opening_balance", places: 2 })
        );

        let purchase: NewPurchase = serde_json::from_value(serde_json::json!({
            "supplier_id": 1,
            "lines": [{ "item_id": 1, "quantity": "0.0004", "unit_price": "1" }]
        }))
        .unwrap();
        assert_eq!(
            purchase.validate(),
            Err(LedgerError::TooPrecise { field: "quantity", places: 3 })
        );

        let payment: NewPayment = serde_json::from_value(serde_json::json!({
            "supplier_id": 1,
            "method": "cash",
            "amount": "0.004"
        }))
        .unwrap();
        assert_eq!(
            payment.validate(),
            Err(LedgerError::TooPrecise { field: "amount", places: 2 })
        );
    }

    #[test]
    fn test_purchase_detail_flattens_header() {
        let detail = PurchaseDetail {
            purchase: Purchase {
                id: 9,
                supplier_id: 2,
                supplier_name: "Acme Wholesale".to_string(),
                invoice_no: Some("INV-77".to_string()),
                purchase_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                subtotal: Decimal::from(20),
                discount: Decimal::ZERO,
                total: Decimal::from(20),
                paid: Decimal::ZERO,
                note: None,
                created_at: Utc::now(),
            },
            lines: vec![],
            payments: vec![],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["supplier_name"], "Acme Wholesale");
        assert!(value["lines"].as_array().unwrap().is_empty());
    }
}
