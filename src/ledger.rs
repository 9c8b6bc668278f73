//! Bookkeeping rules
//!
//! Pure functions behind every stock and balance movement: line pricing,
//! document totals, settlement checks, the stock/account deltas a document
//! applies (and their reversal), and running-balance statements. Nothing
//! here touches the database; `db::documents` applies the results inside a
//! transaction.

use crate::types::{EntryKind, PaymentMethod, MONEY_SCALE, NUMERIC_PRECISION, PRICE_SCALE, QUANTITY_SCALE};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("At least one line item is required")]
    NoLines,
    #[error("Quantity for item {item_id} must be greater than zero")]
    NonPositiveQuantity { item_id: i64 },
    #[error("Unit price for item {item_id} cannot be negative")]
    NegativePrice { item_id: i64 },
    #[error("Item {0} not found")]
    UnknownItem(i64),
    #[error("Discount cannot be negative")]
    NegativeDiscount,
    #[error("Discount {discount} exceeds subtotal {subtotal}")]
    DiscountExceedsSubtotal { discount: Decimal, subtotal: Decimal },
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,
    #[error("Bank movements require an account_id")]
    AccountRequired,
    #[error("Cash movements cannot reference an account")]
    AccountNotAllowed,
    #[error("Settled amount {amount} exceeds document total {total}")]
    SettlementExceedsTotal { amount: Decimal, total: Decimal },
    #[error("Stock adjustment cannot be zero")]
    ZeroAdjustment,
    #[error("{0} cannot be negative")]
    Negative(&'static str),
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} allows at most {places} decimal places")]
    TooPrecise { field: &'static str, places: u32 },
    #[error("{0} is too large")]
    OutOfRange(&'static str),
}

/// Round a monetary amount to two places, midpoint away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Reject negative values for fields like prices and opening balances
pub fn ensure_non_negative(value: Decimal, field: &'static str) -> Result<(), LedgerError> {
    if value < Decimal::ZERO {
        return Err(LedgerError::Negative(field));
    }
    Ok(())
}

/// Reject values a `NUMERIC(14, places)` column cannot store exactly
pub fn ensure_fits(value: Decimal, places: u32, field: &'static str) -> Result<(), LedgerError> {
    if value.normalize().scale() > places {
        return Err(LedgerError::TooPrecise { field, places });
    }
    let limit = Decimal::from_i128_with_scale(10i128.pow(NUMERIC_PRECISION - places), 0);
    if value.abs() >= limit {
        return Err(LedgerError::OutOfRange(field));
    }
    Ok(())
}

/// Reject missing or whitespace-only text fields
pub fn ensure_present(value: Option<&str>, field: &'static str) -> Result<(), LedgerError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(LedgerError::Required(field)),
    }
}

// ==========================================
// Lines & Totals
// ==========================================

/// Line item as submitted by the client
#[derive(Debug, Clone, Deserialize)]
pub struct LineRequest {
    pub item_id: i64,
    pub quantity: Decimal,
    /// Falls back to the item's price list when omitted
    pub unit_price: Option<Decimal>,
}

/// Line item after pricing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub item_id: i64,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Structural checks that need no database access
pub fn validate_lines(lines: &[LineRequest]) -> Result<(), LedgerError> {
    if lines.is_empty() {
        return Err(LedgerError::NoLines);
    }
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveQuantity { item_id: line.item_id });
        }
        ensure_fits(line.quantity, QUANTITY_SCALE, "quantity")?;
        if let Some(price) = line.unit_price {
            if price < Decimal::ZERO {
                return Err(LedgerError::NegativePrice { item_id: line.item_id });
            }
            ensure_fits(price, PRICE_SCALE, "unit_price")?;
        }
    }
    Ok(())
}

pub fn price_line(item_id: i64, quantity: Decimal, unit_price: Decimal) -> Result<PricedLine, LedgerError> {
    let line_total = quantity
        .checked_mul(unit_price)
        .map(round_money)
        .ok_or(LedgerError::OutOfRange("line_total"))?;
    ensure_fits(line_total, MONEY_SCALE, "line_total")?;
    Ok(PricedLine {
        item_id,
        quantity,
        unit_price,
        line_total,
    })
}

/// Price every line, using `default_price` for lines without an explicit price.
/// `default_price` returns `None` for items that do not exist.
pub fn price_lines<F>(lines: &[LineRequest], default_price: F) -> Result<Vec<PricedLine>, LedgerError>
where
    F: Fn(i64) -> Option<Decimal>,
{
    validate_lines(lines)?;
    lines
        .iter()
        .map(|line| -> Result<PricedLine, LedgerError> {
            let fallback = default_price(line.item_id).ok_or(LedgerError::UnknownItem(line.item_id))?;
            price_line(line.item_id, line.quantity, line.unit_price.unwrap_or(fallback))
        })
        .collect()
}

pub fn compute_totals(lines: &[PricedLine], discount: Decimal) -> Result<Totals, LedgerError> {
    if discount < Decimal::ZERO {
        return Err(LedgerError::NegativeDiscount);
    }
    let subtotal = lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.line_total))
        .ok_or(LedgerError::OutOfRange("subtotal"))?;
    ensure_fits(subtotal, MONEY_SCALE, "subtotal")?;
    let discount = round_money(discount);
    if discount > subtotal {
        return Err(LedgerError::DiscountExceedsSubtotal { discount, subtotal });
    }
    Ok(Totals {
        subtotal,
        discount,
        total: subtotal - discount,
    })
}

// ==========================================
// Settlements
// ==========================================

/// Money paid or received together with a purchase or sale
#[derive(Debug, Clone, Deserialize)]
pub struct Settlement {
    pub method: PaymentMethod,
    pub account_id: Option<i64>,
    pub amount: Decimal,
    pub note: Option<String>,
}

/// Method/account consistency and a positive amount in whole cents
pub fn validate_movement(
    method: PaymentMethod,
    account_id: Option<i64>,
    amount: Decimal,
) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount);
    }
    ensure_fits(amount, MONEY_SCALE, "amount")?;
    match (method.requires_account(), account_id) {
        (true, None) => Err(LedgerError::AccountRequired),
        (false, Some(_)) => Err(LedgerError::AccountNotAllowed),
        _ => Ok(()),
    }
}

impl Settlement {
    /// Checks that hold before the document total is known
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_movement(self.method, self.account_id, self.amount)
    }

    pub fn validate_against(&self, total: Decimal) -> Result<(), LedgerError> {
        self.validate()?;
        let amount = round_money(self.amount);
        if amount > total {
            return Err(LedgerError::SettlementExceedsTotal { amount, total });
        }
        Ok(())
    }
}

// ==========================================
// Stock & Balance Deltas
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    /// Goods arriving (purchase)
    Inbound,
    /// Goods leaving (sale)
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StockDelta {
    pub item_id: i64,
    pub delta: Decimal,
}

/// Aggregate per-item stock changes for a document.
/// Output is ordered by item id so row locks are always taken in the same order.
pub fn stock_deltas<I>(lines: I, direction: StockDirection) -> Vec<StockDelta>
where
    I: IntoIterator<Item = (i64, Decimal)>,
{
    let mut per_item: BTreeMap<i64, Decimal> = BTreeMap::new();
    for (item_id, quantity) in lines {
        *per_item.entry(item_id).or_insert(Decimal::ZERO) += quantity;
    }
    per_item
        .into_iter()
        .map(|(item_id, quantity)| StockDelta {
            item_id,
            delta: match direction {
                StockDirection::Inbound => quantity,
                StockDirection::Outbound => -quantity,
            },
        })
        .collect()
}

/// Deltas that undo `deltas`
pub fn reverse(deltas: &[StockDelta]) -> Vec<StockDelta> {
    deltas
        .iter()
        .map(|d| StockDelta { item_id: d.item_id, delta: -d.delta })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyFlow {
    /// Payment to a supplier
    Out,
    /// Receipt from a customer
    In,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceDelta {
    pub account_id: i64,
    pub delta: Decimal,
}

/// Account change caused by recording a movement; cash never touches an account
pub fn account_delta(
    method: PaymentMethod,
    account_id: Option<i64>,
    amount: Decimal,
    flow: MoneyFlow,
) -> Option<BalanceDelta> {
    match (method, account_id) {
        (PaymentMethod::Bank, Some(account_id)) => Some(BalanceDelta {
            account_id,
            delta: match flow {
                MoneyFlow::Out => -amount,
                MoneyFlow::In => amount,
            },
        }),
        _ => None,
    }
}

/// Account change that undoes a recorded movement
pub fn reverse_account_delta(
    method: PaymentMethod,
    account_id: Option<i64>,
    amount: Decimal,
    flow: MoneyFlow,
) -> Option<BalanceDelta> {
    account_delta(method, account_id, amount, flow).map(|d| BalanceDelta {
        account_id: d.account_id,
        delta: -d.delta,
    })
}

// ==========================================
// Statements
// ==========================================

/// Which side grows the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalBalance {
    /// Receivables and bank accounts
    Debit,
    /// Payables
    Credit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub kind: EntryKind,
    pub reference_id: i64,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub kind: EntryKind,
    pub reference_id: i64,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub opening_balance: Decimal,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub closing_balance: Decimal,
    pub entries: Vec<StatementLine>,
}

fn signed(normal: NormalBalance, debit: Decimal, credit: Decimal) -> Decimal {
    match normal {
        NormalBalance::Debit => debit - credit,
        NormalBalance::Credit => credit - debit,
    }
}

/// Net effect of entries on a balance of the given orientation
pub fn net_balance(normal: NormalBalance, entries: &[LedgerEntry]) -> Decimal {
    entries.iter().map(|e| signed(normal, e.debit, e.credit)).sum()
}

/// Running-balance statement. Entries are ordered by date; same-day
/// entries keep their input order.
pub fn build_statement(
    normal: NormalBalance,
    opening_balance: Decimal,
    mut entries: Vec<LedgerEntry>,
) -> Statement {
    entries.sort_by_key(|e| e.date);

    let mut balance = opening_balance;
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;
    let lines = entries
        .into_iter()
        .map(|e| {
            balance += signed(normal, e.debit, e.credit);
            total_debit += e.debit;
            total_credit += e.credit;
            StatementLine {
                date: e.date,
                kind: e.kind,
                reference_id: e.reference_id,
                description: e.description,
                debit: e.debit,
                credit: e.credit,
                balance,
            }
        })
        .collect();

    Statement {
        opening_balance,
        total_debit,
        total_credit,
        closing_balance: balance,
        entries: lines,
    }
}

/// Split entries at `from`: earlier entries fold into the opening balance
pub fn split_opening(
    normal: NormalBalance,
    opening_balance: Decimal,
    entries: Vec<LedgerEntry>,
    from: Option<NaiveDate>,
) -> (Decimal, Vec<LedgerEntry>) {
    match from {
        None => (opening_balance, entries),
        Some(from) => {
            let (before, within): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.date < from);
            (opening_balance + net_balance(normal, &before), within)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn line(item_id: i64, quantity: &str, unit_price: Option<&str>) -> LineRequest {
        LineRequest {
            item_id,
            quantity: d(quantity),
            unit_price: unit_price.map(d),
        }
    }

    fn entry(day: u32, kind: EntryKind, debit: &str, credit: &str) -> LedgerEntry {
        LedgerEntry {
            date: date(day),
            kind,
            reference_id: day as i64,
            description: String::new(),
            debit: d(debit),
            credit: d(credit),
        }
    }

    #[test]
    fn test_validate_lines_rejects_bad_input() {
        assert_eq!(validate_lines(&[]), Err(LedgerError::NoLines));
        assert_eq!(
            validate_lines(&[line(1, "0", None)]),
            Err(LedgerError::NonPositiveQuantity { item_id: 1 })
        );
        assert_eq!(
            validate_lines(&[line(2, "1", Some("-0.01"))]),
            Err(LedgerError::NegativePrice { item_id: 2 })
        );
        assert!(validate_lines(&[line(3, "2.5", Some("0"))]).is_ok());
    }

    #[test]
    fn test_price_lines_uses_default_price_when_missing() {
        let lines = vec![line(1, "3", None), line(2, "2", Some("4.50"))];
        let priced = price_lines(&lines, |id| if id == 1 { Some(d("1.99")) } else { Some(d("9")) }).unwrap();

        assert_eq!(priced[0].unit_price, d("1.99"));
        assert_eq!(priced[0].line_total, d("5.97"));
        // Explicit price wins over the price list
        assert_eq!(priced[1].unit_price, d("4.50"));
        assert_eq!(priced[1].line_total, d("9.00"));
    }

    #[test]
    fn test_price_lines_unknown_item() {
        let lines = vec![line(7, "1", None)];
        assert_eq!(price_lines(&lines, |_| None), Err(LedgerError::UnknownItem(7)));
    }

    #[test]
    fn test_line_total_rounds_half_away_from_zero() {
        // 0.333 * 1.5 = 0.4995 -> 0.50
        assert_eq!(price_line(1, d("0.333"), d("1.5")).unwrap().line_total, d("0.50"));
        // 2.5 * 0.005 = 0.0125 -> 0.01
        assert_eq!(price_line(1, d("2.5"), d("0.005")).unwrap().line_total, d("0.01"));
    }

    #[test]
    fn test_line_total_overflow_is_an_error() {
        let huge = Decimal::MAX;
        assert_eq!(price_line(1, huge, huge), Err(LedgerError::OutOfRange("line_total")));
        // Representable, but wider than a NUMERIC(14,2) column
        assert_eq!(
            price_line(1, d("99999999999"), d("9999999999")),
            Err(LedgerError::OutOfRange("line_total"))
        );
    }

    #[test]
    fn test_lines_must_fit_columns() {
        assert_eq!(
            validate_lines(&[line(1, "0.0004", None)]),
            Err(LedgerError::TooPrecise { field: "quantity", places: 3 })
        );
        assert_eq!(
            validate_lines(&[line(1, "1", Some("0.00001"))]),
            Err(LedgerError::TooPrecise { field: "unit_price", places: 4 })
        );
        assert_eq!(
            validate_lines(&[line(1, "79228162514264337593543950335", Some("1"))]),
            Err(LedgerError::OutOfRange("quantity"))
        );
        // Trailing zeros do not count as precision
        assert!(validate_lines(&[line(1, "1.500000", Some("2.25000"))]).is_ok());
    }

    #[test]
    fn test_subtotal_overflow_is_an_error() {
        let big = PricedLine {
            item_id: 1,
            quantity: d("1"),
            unit_price: d("999999999999.99"),
            line_total: d("999999999999.99"),
        };
        assert_eq!(
            compute_totals(&[big.clone(), big], Decimal::ZERO),
            Err(LedgerError::OutOfRange("subtotal"))
        );
    }

    #[test]
    fn test_compute_totals() {
        let lines = vec![
            price_line(1, d("2"), d("10")).unwrap(),
            price_line(2, d("1"), d("5.25")).unwrap(),
        ];
        let totals = compute_totals(&lines, d("1.25")).unwrap();
        assert_eq!(totals.subtotal, d("25.25"));
        assert_eq!(totals.discount, d("1.25"));
        assert_eq!(totals.total, d("24.00"));

        assert_eq!(compute_totals(&lines, d("-1")), Err(LedgerError::NegativeDiscount));
        assert!(matches!(
            compute_totals(&lines, d("30")),
            Err(LedgerError::DiscountExceedsSubtotal { .. })
        ));
        // Full discount is allowed
        assert_eq!(compute_totals(&lines, d("25.25")).unwrap().total, Decimal::ZERO);
    }

    #[test]
    fn test_settlement_validation() {
        let bank = Settlement { method: PaymentMethod::Bank, account_id: Some(1), amount: d("50"), note: None };
        assert!(bank.validate_against(d("50")).is_ok());
        assert!(matches!(
            bank.validate_against(d("49.99")),
            Err(LedgerError::SettlementExceedsTotal { .. })
        ));

        let no_account = Settlement { account_id: None, ..bank.clone() };
        assert_eq!(no_account.validate(), Err(LedgerError::AccountRequired));

        let cash_with_account = Settlement { method: PaymentMethod::Cash, ..bank.clone() };
        assert_eq!(cash_with_account.validate(), Err(LedgerError::AccountNotAllowed));

        let zero = Settlement { amount: Decimal::ZERO, ..bank.clone() };
        assert_eq!(zero.validate(), Err(LedgerError::NonPositiveAmount));

        let sub_cent = Settlement { amount: d("0.004"), ..bank.clone() };
        assert_eq!(
            sub_cent.validate_against(d("50")),
            Err(LedgerError::TooPrecise { field: "amount", places: 2 })
        );

        let huge = Settlement { amount: d("1000000000000"), ..bank };
        assert_eq!(huge.validate(), Err(LedgerError::OutOfRange("amount")));
    }

    #[test]
    fn test_movement_amount_in_whole_cents() {
        assert!(validate_movement(PaymentMethod::Cash, None, d("0.01")).is_ok());
        assert!(validate_movement(PaymentMethod::Cash, None, d("12.500")).is_ok());
        assert_eq!(
            validate_movement(PaymentMethod::Cash, None, d("0.004")),
            Err(LedgerError::TooPrecise { field: "amount", places: 2 })
        );
    }

    #[test]
    fn test_ensure_fits_column_limits() {
        assert!(ensure_fits(d("9999999999.9999"), PRICE_SCALE, "price").is_ok());
        assert_eq!(ensure_fits(d("10000000000"), PRICE_SCALE, "price"), Err(LedgerError::OutOfRange("price")));
        assert!(ensure_fits(d("-99999999999.999"), QUANTITY_SCALE, "delta").is_ok());
        assert_eq!(
            ensure_fits(d("-100000000000"), QUANTITY_SCALE, "delta"),
            Err(LedgerError::OutOfRange("delta"))
        );
    }

    #[test]
    fn test_stock_deltas_aggregate_and_sort() {
        let lines = vec![(5, d("2")), (1, d("1")), (5, d("3"))];

        let inbound = stock_deltas(lines.clone(), StockDirection::Inbound);
        assert_eq!(
            inbound,
            vec![
                StockDelta { item_id: 1, delta: d("1") },
                StockDelta { item_id: 5, delta: d("5") },
            ]
        );

        let outbound = stock_deltas(lines, StockDirection::Outbound);
        assert_eq!(outbound[1].delta, d("-5"));
        assert_eq!(reverse(&outbound), inbound);
    }

    #[test]
    fn test_account_delta_only_for_bank() {
        assert_eq!(account_delta(PaymentMethod::Cash, None, d("10"), MoneyFlow::Out), None);
        assert_eq!(
            account_delta(PaymentMethod::Bank, Some(3), d("10"), MoneyFlow::Out),
            Some(BalanceDelta { account_id: 3, delta: d("-10") })
        );
        assert_eq!(
            reverse_account_delta(PaymentMethod::Bank, Some(3), d("10"), MoneyFlow::In),
            Some(BalanceDelta { account_id: 3, delta: d("-10") })
        );
    }

    #[test]
    fn test_build_statement_running_balance_for_payable() {
        // Supplier: purchases are credits, payments are debits
        let entries = vec![
            entry(5, EntryKind::Payment, "40", "0"),
            entry(1, EntryKind::Purchase, "0", "100"),
            entry(9, EntryKind::Purchase, "0", "15.50"),
        ];
        let statement = build_statement(NormalBalance::Credit, Decimal::ZERO, entries);

        let balances: Vec<Decimal> = statement.entries.iter().map(|l| l.balance).collect();
        assert_eq!(balances, vec![d("100"), d("60"), d("75.50")]);
        assert_eq!(statement.total_credit, d("115.50"));
        assert_eq!(statement.total_debit, d("40"));
        assert_eq!(statement.closing_balance, d("75.50"));
    }

    #[test]
    fn test_split_opening_folds_earlier_entries() {
        let entries = vec![
            entry(1, EntryKind::Sale, "80", "0"),
            entry(2, EntryKind::Receipt, "0", "30"),
            entry(10, EntryKind::Sale, "20", "0"),
        ];
        let (opening, within) = split_opening(NormalBalance::Debit, d("5"), entries, Some(date(3)));
        assert_eq!(opening, d("55"));
        assert_eq!(within.len(), 1);

        let statement = build_statement(NormalBalance::Debit, opening, within);
        assert_eq!(statement.closing_balance, d("75"));
    }
}
