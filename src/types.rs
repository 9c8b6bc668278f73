//! Shared type definitions for the bookkeeping backend

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Bookkeeping Constants
// ============================================================================

/// Default page size for list endpoints
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Upper bound on a single page; larger requests are clamped
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Total digits of every `NUMERIC` column
pub const NUMERIC_PRECISION: u32 = 14;

/// Decimal places kept on every monetary amount
pub const MONEY_SCALE: u32 = 2;

/// Decimal places stored for stock quantities
pub const QUANTITY_SCALE: u32 = 3;

/// Decimal places stored for unit prices
pub const PRICE_SCALE: u32 = 4;

/// How a payment or receipt moved money
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Bank => "bank",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "bank" => Some(PaymentMethod::Bank),
            _ => None,
        }
    }

    /// Bank movements must name an account, cash movements must not
    pub fn requires_account(&self) -> bool {
        matches!(self, PaymentMethod::Bank)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price list a sale is billed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleKind {
    #[default]
    Retail,
    Wholesale,
}

impl SaleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleKind::Retail => "retail",
            SaleKind::Wholesale => "wholesale",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "retail" => Some(SaleKind::Retail),
            "wholesale" => Some(SaleKind::Wholesale),
            _ => None,
        }
    }
}

impl fmt::Display for SaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of a statement or stock movement entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Opening,
    Purchase,
    Sale,
    Payment,
    Receipt,
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Opening => "opening",
            EntryKind::Purchase => "purchase",
            EntryKind::Sale => "sale",
            EntryKind::Payment => "payment",
            EntryKind::Receipt => "receipt",
            EntryKind::Adjustment => "adjustment",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "opening" => Some(EntryKind::Opening),
            "purchase" => Some(EntryKind::Purchase),
            "sale" => Some(EntryKind::Sale),
            "payment" => Some(EntryKind::Payment),
            "receipt" => Some(EntryKind::Receipt),
            "adjustment" => Some(EntryKind::Adjustment),
            _ => None,
        }
    }
}

/// Clamp client-supplied pagination to sane bounds
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}
