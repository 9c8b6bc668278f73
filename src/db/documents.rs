//! Purchases, sales, payments and receipts
//!
//! Every create and delete runs in one transaction: the document rows, the
//! stock changes of its lines and the balance changes of any bank movement
//! either all land or none do. Item rows are locked before account rows.

use super::{from_rows, Database, DbError};
use super::models::*;
use crate::ledger::{
    self, account_delta, compute_totals, price_lines, reverse, reverse_account_delta, round_money,
    stock_deltas, BalanceDelta, MoneyFlow, StockDelta, StockDirection,
};
use crate::types::PaymentMethod;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::{FromRow, Row};
use std::collections::HashMap;
use tracing::{debug, info};

const PURCHASE_SELECT: &str = r#"
    SELECT p.id, p.supplier_id, s.name AS supplier_name, p.invoice_no, p.purchase_date,
           p.subtotal, p.discount, p.total, p.note, p.created_at,
           COALESCE((SELECT SUM(amount) FROM payments WHERE purchase_id = p.id), 0) AS paid
    FROM purchases p
    JOIN suppliers s ON s.id = p.supplier_id
"#;

const SALE_SELECT: &str = r#"
    SELECT s.id, s.customer_id, c.name AS customer_name, s.kind, s.invoice_no, s.sale_date,
           s.subtotal, s.discount, s.total, s.note, s.created_at,
           COALESCE((SELECT SUM(amount) FROM receipts WHERE sale_id = s.id), 0) AS received
    FROM sales s
    LEFT JOIN customers c ON c.id = s.customer_id
"#;

const PAYMENT_SELECT: &str = r#"
    SELECT p.id, p.supplier_id, s.name AS supplier_name, p.purchase_id, p.account_id,
           p.method, p.amount, p.payment_date, p.note, p.created_at
    FROM payments p
    JOIN suppliers s ON s.id = p.supplier_id
"#;

const RECEIPT_SELECT: &str = r#"
    SELECT r.id, r.customer_id, c.name AS customer_name, r.sale_id, r.account_id,
           r.method, r.amount, r.receipt_date, r.note, r.created_at
    FROM receipts r
    LEFT JOIN customers c ON c.id = r.customer_id
"#;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ==========================================
// Stock & Balance Primitives
// ==========================================

/// Apply a stock change; on-hand quantity never drops below zero
pub(super) async fn apply_stock_delta(conn: &mut PgConnection, delta: StockDelta) -> Result<Decimal, DbError> {
    let updated = sqlx::query(
        r#"
        UPDATE items
        SET quantity = quantity + $2, updated_at = NOW()
        WHERE id = $1 AND quantity + $2 >= 0
        RETURNING quantity
        "#,
    )
    .bind(delta.item_id)
    .bind(delta.delta)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = updated {
        let on_hand: Decimal = row.try_get("quantity")?;
        debug!("Stock item={} delta={} on_hand={}", delta.item_id, delta.delta, on_hand);
        return Ok(on_hand);
    }

    let current: Option<(Decimal,)> = sqlx::query_as("SELECT quantity FROM items WHERE id = $1")
        .bind(delta.item_id)
        .fetch_optional(&mut *conn)
        .await?;
    match current {
        Some((available,)) => Err(DbError::InsufficientStock {
            item_id: delta.item_id,
            available,
            requested: delta.delta,
        }),
        None => Err(DbError::NotFound(format!("Item {}", delta.item_id))),
    }
}

/// Apply a balance change; account balances never go negative
pub(super) async fn apply_balance_delta(conn: &mut PgConnection, delta: BalanceDelta) -> Result<Decimal, DbError> {
    let updated = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = balance + $2, updated_at = NOW()
        WHERE id = $1 AND balance + $2 >= 0
        RETURNING balance
        "#,
    )
    .bind(delta.account_id)
    .bind(delta.delta)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = updated {
        let balance: Decimal = row.try_get("balance")?;
        debug!("Account={} delta={} balance={}", delta.account_id, delta.delta, balance);
        return Ok(balance);
    }

    let current: Option<(Decimal,)> = sqlx::query_as("SELECT balance FROM accounts WHERE id = $1")
        .bind(delta.account_id)
        .fetch_optional(&mut *conn)
        .await?;
    match current {
        Some((balance,)) => Err(DbError::InsufficientBalance {
            account_id: delta.account_id,
            balance,
            requested: delta.delta,
        }),
        None => Err(DbError::NotFound(format!("Account {}", delta.account_id))),
    }
}

/// Lock the referenced rows of a parent table so they cannot be deleted mid-transaction
async fn ensure_exists(conn: &mut PgConnection, table: &str, label: &str, id: i64) -> Result<(), DbError> {
    let sql = format!("SELECT id FROM {} WHERE id = $1 FOR SHARE", table);
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| DbError::NotFound(format!("{} {}", label, id)))
}

/// Lock every item on a document in id order
async fn lock_items(conn: &mut PgConnection, item_ids: &[i64]) -> Result<HashMap<i64, Item>, DbError> {
    let mut ids = item_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let rows = sqlx::query("SELECT * FROM items WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids.as_slice())
        .fetch_all(&mut *conn)
        .await?;
    let items: Vec<Item> = from_rows(rows)?;
    Ok(items.into_iter().map(|item| (item.id, item)).collect())
}

async fn insert_lines(
    conn: &mut PgConnection,
    table: &str,
    parent_column: &str,
    parent_id: i64,
    lines: &[ledger::PricedLine],
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO {} ({}, item_id, quantity, unit_price, line_total) VALUES ($1, $2, $3, $4, $5)",
        table, parent_column
    );
    for line in lines {
        sqlx::query(&sql)
            .bind(parent_id)
            .bind(line.item_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn load_lines(conn: &mut PgConnection, table: &str, parent_column: &str, parent_id: i64) -> Result<Vec<DocumentLine>, DbError> {
    let sql = format!(
        r#"
        SELECT l.id, l.item_id, i.name AS item_name, l.quantity, l.unit_price, l.line_total
        FROM {} l
        JOIN items i ON i.id = l.item_id
        WHERE l.{} = $1
        ORDER BY l.id
        "#,
        table, parent_column
    );
    let rows = sqlx::query(&sql).bind(parent_id).fetch_all(&mut *conn).await?;
    from_rows(rows)
}

/// Quantities per item on a stored document
async fn stored_quantities(conn: &mut PgConnection, table: &str, parent_column: &str, parent_id: i64) -> Result<Vec<(i64, Decimal)>, DbError> {
    let sql = format!("SELECT item_id, quantity FROM {} WHERE {} = $1", table, parent_column);
    let rows: Vec<(i64, Decimal)> = sqlx::query_as(&sql).bind(parent_id).fetch_all(&mut *conn).await?;
    Ok(rows)
}

/// Record a payment row and debit the bank account it came from
#[allow(clippy::too_many_arguments)]
async fn insert_payment(
    conn: &mut PgConnection,
    supplier_id: i64,
    purchase_id: Option<i64>,
    method: PaymentMethod,
    account_id: Option<i64>,
    amount: Decimal,
    payment_date: NaiveDate,
    note: Option<&str>,
) -> Result<i64, DbError> {
    if let Some(delta) = account_delta(method, account_id, amount, MoneyFlow::Out) {
        apply_balance_delta(conn, delta).await?;
    }
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO payments (supplier_id, purchase_id, account_id, method, amount, payment_date, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(supplier_id)
    .bind(purchase_id)
    .bind(account_id)
    .bind(method.as_str())
    .bind(amount)
    .bind(payment_date)
    .bind(note)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Record a receipt row and credit the bank account it went into
#[allow(clippy::too_many_arguments)]
async fn insert_receipt(
    conn: &mut PgConnection,
    customer_id: Option<i64>,
    sale_id: Option<i64>,
    method: PaymentMethod,
    account_id: Option<i64>,
    amount: Decimal,
    receipt_date: NaiveDate,
    note: Option<&str>,
) -> Result<i64, DbError> {
    if let Some(delta) = account_delta(method, account_id, amount, MoneyFlow::In) {
        apply_balance_delta(conn, delta).await?;
    }
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO receipts (customer_id, sale_id, account_id, method, amount, receipt_date, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(customer_id)
    .bind(sale_id)
    .bind(account_id)
    .bind(method.as_str())
    .bind(amount)
    .bind(receipt_date)
    .bind(note)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Undo the account effect of payments or receipts and delete them
async fn reverse_movements(
    conn: &mut PgConnection,
    table: &str,
    key_column: &str,
    key: i64,
    flow: MoneyFlow,
) -> Result<usize, DbError> {
    let sql = format!(
        "SELECT method, account_id, amount FROM {} WHERE {} = $1 ORDER BY account_id NULLS LAST, id FOR UPDATE",
        table, key_column
    );
    let rows = sqlx::query(&sql).bind(key).fetch_all(&mut *conn).await?;
    for row in &rows {
        let raw: String = row.try_get("method")?;
        let method = PaymentMethod::from_db(&raw)
            .ok_or_else(|| DbError::InvalidData(format!("unknown payment method {}", raw)))?;
        let account_id: Option<i64> = row.try_get("account_id")?;
        let amount: Decimal = row.try_get("amount")?;
        if let Some(delta) = reverse_account_delta(method, account_id, amount, flow) {
            apply_balance_delta(conn, delta).await?;
        }
    }

    let delete = format!("DELETE FROM {} WHERE {} = $1", table, key_column);
    sqlx::query(&delete).bind(key).execute(&mut *conn).await?;
    Ok(rows.len())
}

async fn load_purchase(conn: &mut PgConnection, id: i64) -> Result<PurchaseDetail, DbError> {
    let sql = format!("{} WHERE p.id = $1", PURCHASE_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Purchase {}", id)))?;
    let purchase = Purchase::from_row(&row)?;
    let lines = load_lines(conn, "purchase_lines", "purchase_id", id).await?;

    let sql = format!("{} WHERE p.purchase_id = $1 ORDER BY p.id", PAYMENT_SELECT);
    let rows = sqlx::query(&sql).bind(id).fetch_all(&mut *conn).await?;
    let payments = from_rows(rows)?;

    Ok(PurchaseDetail { purchase, lines, payments })
}

async fn load_sale(conn: &mut PgConnection, id: i64) -> Result<SaleDetail, DbError> {
    let sql = format!("{} WHERE s.id = $1", SALE_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Sale {}", id)))?;
    let sale = Sale::from_row(&row)?;
    let lines = load_lines(conn, "sale_lines", "sale_id", id).await?;

    let sql = format!("{} WHERE r.sale_id = $1 ORDER BY r.id", RECEIPT_SELECT);
    let rows = sqlx::query(&sql).bind(id).fetch_all(&mut *conn).await?;
    let receipts = from_rows(rows)?;

    Ok(SaleDetail { sale, lines, receipts })
}

async fn load_payment(conn: &mut PgConnection, id: i64) -> Result<Payment, DbError> {
    let sql = format!("{} WHERE p.id = $1", PAYMENT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Payment {}", id)))?;
    Ok(Payment::from_row(&row)?)
}

async fn load_receipt(conn: &mut PgConnection, id: i64) -> Result<Receipt, DbError> {
    let sql = format!("{} WHERE r.id = $1", RECEIPT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Receipt {}", id)))?;
    Ok(Receipt::from_row(&row)?)
}

/// Documents that payments or receipts settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettledTable {
    Purchases,
    Sales,
}

impl SettledTable {
    fn label(self) -> &'static str {
        match self {
            SettledTable::Purchases => "Purchase",
            SettledTable::Sales => "Sale",
        }
    }

    fn header_sql(self) -> &'static str {
        match self {
            SettledTable::Purchases => "SELECT supplier_id AS party_id, total FROM purchases WHERE id = $1 FOR UPDATE",
            SettledTable::Sales => "SELECT customer_id AS party_id, total FROM sales WHERE id = $1 FOR UPDATE",
        }
    }

    fn settled_sql(self) -> &'static str {
        match self {
            SettledTable::Purchases => "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE purchase_id = $1",
            SettledTable::Sales => "SELECT COALESCE(SUM(amount), 0) FROM receipts WHERE sale_id = $1",
        }
    }
}

#[derive(Debug)]
struct SettledDocument {
    party_id: Option<i64>,
    total: Decimal,
    settled: Decimal,
}

/// Lock a purchase or sale, then sum its settlements.
///
/// The sum runs as its own statement so it sees every movement committed by
/// whoever held the lock before us.
async fn lock_settled_document(
    conn: &mut PgConnection,
    table: SettledTable,
    id: i64,
) -> Result<SettledDocument, DbError> {
    let row = sqlx::query(table.header_sql())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("{} {}", table.label(), id)))?;
    let party_id: Option<i64> = row.try_get("party_id")?;
    let total: Decimal = row.try_get("total")?;

    let (settled,): (Decimal,) = sqlx::query_as(table.settled_sql())
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    debug!("{} {} locked: total={} settled={}", table.label(), id, total, settled);
    Ok(SettledDocument { party_id, total, settled })
}

/// Reject a movement larger than what is still open on a document
fn ensure_within_outstanding(label: &str, total: Decimal, settled: Decimal, amount: Decimal) -> Result<(), DbError> {
    let outstanding = total - settled;
    if amount > outstanding {
        return Err(DbError::InvalidData(format!(
            "Amount {} exceeds outstanding {} on {}",
            amount, outstanding, label
        )));
    }
    Ok(())
}

impl Database {
    // ==========================================
    // Purchase Operations
    // ==========================================

    /// Record a purchase: lines in, stock up, optional payment out
    pub async fn create_purchase(&self, req: &NewPurchase) -> Result<PurchaseDetail, DbError> {
        req.validate()?;
        let mut tx = self.pool().begin().await?;

        ensure_exists(&mut tx, "suppliers", "Supplier", req.supplier_id).await?;

        let item_ids: Vec<i64> = req.lines.iter().map(|l| l.item_id).collect();
        let items = lock_items(&mut tx, &item_ids).await?;
        let priced = price_lines(&req.lines, |id| items.get(&id).map(|i| i.purchase_price))?;
        let totals = compute_totals(&priced, req.discount)?;
        if let Some(payment) = &req.payment {
            payment.validate_against(totals.total)?;
        }

        let purchase_date = req.purchase_date.unwrap_or_else(today);
        let (purchase_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO purchases (supplier_id, invoice_no, purchase_date, subtotal, discount, total, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(req.supplier_id)
        .bind(req.invoice_no.as_deref())
        .bind(purchase_date)
        .bind(totals.subtotal)
        .bind(totals.discount)
        .bind(totals.total)
        .bind(req.note.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        insert_lines(&mut tx, "purchase_lines", "purchase_id", purchase_id, &priced).await?;

        let deltas = stock_deltas(priced.iter().map(|l| (l.item_id, l.quantity)), StockDirection::Inbound);
        for delta in &deltas {
            apply_stock_delta(&mut tx, *delta).await?;
        }

        if let Some(payment) = &req.payment {
            insert_payment(
                &mut tx,
                req.supplier_id,
                Some(purchase_id),
                payment.method,
                payment.account_id,
                round_money(payment.amount),
                purchase_date,
                payment.note.as_deref(),
            )
            .await?;
        }

        let detail = load_purchase(&mut tx, purchase_id).await?;
        tx.commit().await?;

        info!(
            "Purchase created: id={} supplier={} lines={} total={} paid={}",
            purchase_id,
            req.supplier_id,
            detail.lines.len(),
            detail.purchase.total,
            detail.purchase.paid
        );
        Ok(detail)
    }

    pub async fn get_purchase(&self, id: i64) -> Result<PurchaseDetail, DbError> {
        let mut conn = self.pool().acquire().await?;
        load_purchase(&mut conn, id).await
    }

    pub async fn list_purchases(&self, filter: &DocumentFilter) -> Result<Vec<Purchase>, DbError> {
        let sql = format!(
            r#"{}
            WHERE ($1::bigint IS NULL OR p.supplier_id = $1)
              AND ($2::date IS NULL OR p.purchase_date >= $2)
              AND ($3::date IS NULL OR p.purchase_date <= $3)
            ORDER BY p.purchase_date DESC, p.id DESC
            LIMIT $4 OFFSET $5
            "#,
            PURCHASE_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(filter.party_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn count_purchases(&self, filter: &DocumentFilter) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM purchases p
            WHERE ($1::bigint IS NULL OR p.supplier_id = $1)
              AND ($2::date IS NULL OR p.purchase_date >= $2)
              AND ($3::date IS NULL OR p.purchase_date <= $3)
            "#,
        )
        .bind(filter.party_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Delete a purchase, taking its goods back out of stock and refunding
    /// its bank payments. Fails if the goods were already sold on.
    pub async fn delete_purchase(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("SELECT id FROM purchases WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Purchase {}", id)))?;

        let quantities = stored_quantities(&mut tx, "purchase_lines", "purchase_id", id).await?;
        let applied = stock_deltas(quantities, StockDirection::Inbound);
        for delta in reverse(&applied) {
            apply_stock_delta(&mut tx, delta).await?;
        }

        let refunded = reverse_movements(&mut tx, "payments", "purchase_id", id, MoneyFlow::Out).await?;
        sqlx::query("DELETE FROM purchases WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Purchase deleted: id={} items_reversed={} payments_reversed={}", id, applied.len(), refunded);
        Ok(())
    }

    // ==========================================
    // Sale Operations
    // ==========================================

    /// Record a sale: lines out, stock down, optional receipt in
    pub async fn create_sale(&self, req: &NewSale) -> Result<SaleDetail, DbError> {
        req.validate()?;
        let mut tx = self.pool().begin().await?;

        if let Some(customer_id) = req.customer_id {
            ensure_exists(&mut tx, "customers", "Customer", customer_id).await?;
        }

        let item_ids: Vec<i64> = req.lines.iter().map(|l| l.item_id).collect();
        let items = lock_items(&mut tx, &item_ids).await?;
        let priced = price_lines(&req.lines, |id| items.get(&id).map(|i| i.sale_price(req.kind)))?;
        let totals = compute_totals(&priced, req.discount)?;
        if let Some(receipt) = &req.receipt {
            receipt.validate_against(totals.total)?;
        }

        let sale_date = req.sale_date.unwrap_or_else(today);
        let (sale_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sales (customer_id, kind, invoice_no, sale_date, subtotal, discount, total, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(req.customer_id)
        .bind(req.kind.as_str())
        .bind(req.invoice_no.as_deref())
        .bind(sale_date)
        .bind(totals.subtotal)
        .bind(totals.discount)
        .bind(totals.total)
        .bind(req.note.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        insert_lines(&mut tx, "sale_lines", "sale_id", sale_id, &priced).await?;

        let deltas = stock_deltas(priced.iter().map(|l| (l.item_id, l.quantity)), StockDirection::Outbound);
        for delta in &deltas {
            apply_stock_delta(&mut tx, *delta).await?;
        }

        if let Some(receipt) = &req.receipt {
            insert_receipt(
                &mut tx,
                req.customer_id,
                Some(sale_id),
                receipt.method,
                receipt.account_id,
                round_money(receipt.amount),
                sale_date,
                receipt.note.as_deref(),
            )
            .await?;
        }

        let detail = load_sale(&mut tx, sale_id).await?;
        tx.commit().await?;

        info!(
            "Sale created: id={} customer={:?} kind={} lines={} total={} received={}",
            sale_id,
            req.customer_id,
            req.kind,
            detail.lines.len(),
            detail.sale.total,
            detail.sale.received
        );
        Ok(detail)
    }

    pub async fn get_sale(&self, id: i64) -> Result<SaleDetail, DbError> {
        let mut conn = self.pool().acquire().await?;
        load_sale(&mut conn, id).await
    }

    pub async fn list_sales(&self, filter: &DocumentFilter) -> Result<Vec<Sale>, DbError> {
        let sql = format!(
            r#"{}
            WHERE ($1::bigint IS NULL OR s.customer_id = $1)
              AND ($2::text IS NULL OR s.kind = $2)
              AND ($3::date IS NULL OR s.sale_date >= $3)
              AND ($4::date IS NULL OR s.sale_date <= $4)
            ORDER BY s.sale_date DESC, s.id DESC
            LIMIT $5 OFFSET $6
            "#,
            SALE_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(filter.party_id)
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn count_sales(&self, filter: &DocumentFilter) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sales s
            WHERE ($1::bigint IS NULL OR s.customer_id = $1)
              AND ($2::text IS NULL OR s.kind = $2)
              AND ($3::date IS NULL OR s.sale_date >= $3)
              AND ($4::date IS NULL OR s.sale_date <= $4)
            "#,
        )
        .bind(filter.party_id)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Delete a sale, returning its goods to stock and taking its bank
    /// receipts back out of their accounts.
    pub async fn delete_sale(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("SELECT id FROM sales WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Sale {}", id)))?;

        let quantities = stored_quantities(&mut tx, "sale_lines", "sale_id", id).await?;
        let applied = stock_deltas(quantities, StockDirection::Outbound);
        for delta in reverse(&applied) {
            apply_stock_delta(&mut tx, delta).await?;
        }

        let reversed = reverse_movements(&mut tx, "receipts", "sale_id", id, MoneyFlow::In).await?;
        sqlx::query("DELETE FROM sales WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Sale deleted: id={} items_restored={} receipts_reversed={}", id, applied.len(), reversed);
        Ok(())
    }

    // ==========================================
    // Payment Operations
    // ==========================================

    pub async fn create_payment(&self, req: &NewPayment) -> Result<Payment, DbError> {
        req.validate()?;
        let amount = round_money(req.amount);
        let mut tx = self.pool().begin().await?;

        ensure_exists(&mut tx, "suppliers", "Supplier", req.supplier_id).await?;

        if let Some(purchase_id) = req.purchase_id {
            let purchase = lock_settled_document(&mut tx, SettledTable::Purchases, purchase_id).await?;
            if purchase.party_id != Some(req.supplier_id) {
                return Err(DbError::InvalidData(format!(
                    "Purchase {} belongs to supplier {}",
                    purchase_id,
                    purchase.party_id.unwrap_or_default()
                )));
            }
            ensure_within_outstanding(&format!("purchase {}", purchase_id), purchase.total, purchase.settled, amount)?;
        }

        let payment_id = insert_payment(
            &mut tx,
            req.supplier_id,
            req.purchase_id,
            req.method,
            req.account_id,
            amount,
            req.payment_date.unwrap_or_else(today),
            req.note.as_deref(),
        )
        .await?;

        let payment = load_payment(&mut tx, payment_id).await?;
        tx.commit().await?;

        info!(
            "Payment created: id={} supplier={} method={} account={:?} amount={}",
            payment.id, payment.supplier_id, payment.method, payment.account_id, payment.amount
        );
        Ok(payment)
    }

    pub async fn get_payment(&self, id: i64) -> Result<Payment, DbError> {
        let mut conn = self.pool().acquire().await?;
        load_payment(&mut conn, id).await
    }

    pub async fn list_payments(&self, filter: &DocumentFilter) -> Result<Vec<Payment>, DbError> {
        let sql = format!(
            r#"{}
            WHERE ($1::bigint IS NULL OR p.supplier_id = $1)
              AND ($2::bigint IS NULL OR p.account_id = $2)
              AND ($3::date IS NULL OR p.payment_date >= $3)
              AND ($4::date IS NULL OR p.payment_date <= $4)
            ORDER BY p.payment_date DESC, p.id DESC
            LIMIT $5 OFFSET $6
            "#,
            PAYMENT_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(filter.party_id)
            .bind(filter.account_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn count_payments(&self, filter: &DocumentFilter) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM payments p
            WHERE ($1::bigint IS NULL OR p.supplier_id = $1)
              AND ($2::bigint IS NULL OR p.account_id = $2)
              AND ($3::date IS NULL OR p.payment_date >= $3)
              AND ($4::date IS NULL OR p.payment_date <= $4)
            "#,
        )
        .bind(filter.party_id)
        .bind(filter.account_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Delete a payment and credit its bank account back
    pub async fn delete_payment(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        let reversed = reverse_movements(&mut tx, "payments", "id", id, MoneyFlow::Out).await?;
        if reversed == 0 {
            return Err(DbError::NotFound(format!("Payment {}", id)));
        }
        tx.commit().await?;

        info!("Payment deleted: id={}", id);
        Ok(())
    }

    // ==========================================
    // Receipt Operations
    // ==========================================

    pub async fn create_receipt(&self, req: &NewReceipt) -> Result<Receipt, DbError> {
        req.validate()?;
        let amount = round_money(req.amount);
        let mut tx = self.pool().begin().await?;

        let customer_id = match req.sale_id {
            Some(sale_id) => {
                let sale = lock_settled_document(&mut tx, SettledTable::Sales, sale_id).await?;
                if req.customer_id.is_some() && req.customer_id != sale.party_id {
                    return Err(DbError::InvalidData(format!(
                        "Sale {} does not belong to customer {}",
                        sale_id,
                        req.customer_id.unwrap_or_default()
                    )));
                }
                ensure_within_outstanding(&format!("sale {}", sale_id), sale.total, sale.settled, amount)?;
                sale.party_id
            }
            None => req.customer_id,
        };
        if let Some(customer_id) = customer_id {
            ensure_exists(&mut tx, "customers", "Customer", customer_id).await?;
        }

        let receipt_id = insert_receipt(
            &mut tx,
            customer_id,
            req.sale_id,
            req.method,
            req.account_id,
            amount,
            req.receipt_date.unwrap_or_else(today),
            req.note.as_deref(),
        )
        .await?;

        let receipt = load_receipt(&mut tx, receipt_id).await?;
        tx.commit().await?;

        info!(
            "Receipt created: id={} customer={:?} method={} account={:?} amount={}",
            receipt.id, receipt.customer_id, receipt.method, receipt.account_id, receipt.amount
        );
        Ok(receipt)
    }

    pub async fn get_receipt(&self, id: i64) -> Result<Receipt, DbError> {
        let mut conn = self.pool().acquire().await?;
        load_receipt(&mut conn, id).await
    }

    pub async fn list_receipts(&self, filter: &DocumentFilter) -> Result<Vec<Receipt>, DbError> {
        let sql = format!(
            r#"{}
            WHERE ($1::bigint IS NULL OR r.customer_id = $1)
              AND ($2::bigint IS NULL OR r.account_id = $2)
              AND ($3::date IS NULL OR r.receipt_date >= $3)
              AND ($4::date IS NULL OR r.receipt_date <= $4)
            ORDER BY r.receipt_date DESC, r.id DESC
            LIMIT $5 OFFSET $6
            "#,
            RECEIPT_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(filter.party_id)
            .bind(filter.account_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn count_receipts(&self, filter: &DocumentFilter) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM receipts r
            WHERE ($1::bigint IS NULL OR r.customer_id = $1)
              AND ($2::bigint IS NULL OR r.account_id = $2)
              AND ($3::date IS NULL OR r.receipt_date >= $3)
              AND ($4::date IS NULL OR r.receipt_date <= $4)
            "#,
        )
        .bind(filter.party_id)
        .bind(filter.account_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Delete a receipt and take the money back out of its bank account
    pub async fn delete_receipt(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        let reversed = reverse_movements(&mut tx, "receipts", "id", id, MoneyFlow::In).await?;
        if reversed == 0 {
            return Err(DbError::NotFound(format!("Receipt {}", id)));
        }
        tx.commit().await?;

        info!("Receipt deleted: id={}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use std::time::Duration;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    /// Live database from `DATABASE_URL`; tests that need one return early without it
    async fn test_db() -> Option<Database> {
        if std::env::var("DATABASE_URL").is_err() {
            return None;
        }
        Some(Database::new(&AppConfig::from_env()).await.unwrap())
    }

    async fn new_item(db: &Database, opening: &str) -> Item {
        let req: NewItem = serde_json::from_value(json!({
            "name": "Test item",
            "purchase_price": "4.00",
            "retail_price": "10.00",
            "opening_quantity": opening
        }))
        .unwrap();
        db.create_item(&req).await.unwrap()
    }

    async fn new_party(db: &Database, kind: PartyKind) -> i64 {
        let req: NewParty = serde_json::from_value(json!({ "name": "Test party" })).unwrap();
        db.create_party(kind, &req).await.unwrap().id
    }

    async fn new_account(db: &Database, opening: &str) -> i64 {
        let req: NewAccount = serde_json::from_value(json!({
            "name": "Test account",
            "opening_balance": opening
        }))
        .unwrap();
        db.create_account(&req).await.unwrap().id
    }

    async fn on_hand(db: &Database, item_id: i64) -> Decimal {
        db.get_item(item_id).await.unwrap().quantity
    }

    async fn balance(db: &Database, account_id: i64) -> Decimal {
        db.get_account(account_id).await.unwrap().balance
    }

    fn purchase(supplier_id: i64, item_id: i64, quantity: &str, price: &str, payment: Option<serde_json::Value>) -> NewPurchase {
        serde_json::from_value(json!({
            "supplier_id": supplier_id,
            "lines": [{ "item_id": item_id, "quantity": quantity, "unit_price": price }],
            "payment": payment
        }))
        .unwrap()
    }

    fn sale(customer_id: Option<i64>, item_id: i64, quantity: &str, receipt: Option<serde_json::Value>) -> NewSale {
        serde_json::from_value(json!({
            "customer_id": customer_id,
            "lines": [{ "item_id": item_id, "quantity": quantity }],
            "receipt": receipt
        }))
        .unwrap()
    }

    fn payment(supplier_id: i64, purchase_id: Option<i64>, amount: &str) -> NewPayment {
        serde_json::from_value(json!({
            "supplier_id": supplier_id,
            "purchase_id": purchase_id,
            "method": "cash",
            "amount": amount
        }))
        .unwrap()
    }

    #[test]
    fn test_outstanding_guard() {
        let total = Decimal::from(100);
        assert!(ensure_within_outstanding("purchase 1", total, Decimal::from(60), Decimal::from(40)).is_ok());
        let err = ensure_within_outstanding("purchase 1", total, Decimal::from(60), Decimal::from(41)).unwrap_err();
        assert!(matches!(err, DbError::InvalidData(msg) if msg.contains("outstanding 40")));
    }

    #[test]
    fn test_document_selects_expose_model_columns() {
        for column in ["supplier_name", "paid", "purchase_date"] {
            assert!(PURCHASE_SELECT.contains(column));
        }
        for column in ["customer_name", "received", "kind"] {
            assert!(SALE_SELECT.contains(column));
        }
        assert!(RECEIPT_SELECT.contains("LEFT JOIN customers"));
    }

    #[tokio::test]
    async fn test_documents_move_stock_and_deletes_restore_it() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "10").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;
        let customer = new_party(&db, PartyKind::Customer).await;

        let bought = db.create_purchase(&purchase(supplier, item.id, "2.5", "4", None)).await.unwrap();
        assert_eq!(bought.purchase.total, d("10.00"));
        assert_eq!(on_hand(&db, item.id).await, d("12.5"));

        let sold = db.create_sale(&sale(Some(customer), item.id, "0.125", None)).await.unwrap();
        assert_eq!(sold.sale.total, d("1.25"));
        assert_eq!(on_hand(&db, item.id).await, d("12.375"));

        db.delete_sale(sold.sale.id).await.unwrap();
        assert_eq!(on_hand(&db, item.id).await, d("12.5"));
        db.delete_purchase(bought.purchase.id).await.unwrap();
        assert_eq!(on_hand(&db, item.id).await, d("10"));

        assert!(matches!(db.get_sale(sold.sale.id).await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sale_cannot_oversell() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "3").await;

        let err = db.create_sale(&sale(None, item.id, "3.001", None)).await.unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { item_id, .. } if item_id == item.id));
        assert_eq!(on_hand(&db, item.id).await, d("3"));

        // Selling exactly what is on hand empties the shelf
        db.create_sale(&sale(None, item.id, "3", None)).await.unwrap();
        assert_eq!(on_hand(&db, item.id).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_purchase_delete_blocked_once_goods_are_sold() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "0").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;

        let bought = db.create_purchase(&purchase(supplier, item.id, "5", "4", None)).await.unwrap();
        db.create_sale(&sale(None, item.id, "2", None)).await.unwrap();

        let err = db.delete_purchase(bought.purchase.id).await.unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { .. }));
        assert_eq!(on_hand(&db, item.id).await, d("3"));
        assert!(db.get_purchase(bought.purchase.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_purchase_delete_refunds_linked_payments() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "0").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;
        let account = new_account(&db, "100").await;

        let settle = json!({ "method": "bank", "account_id": account, "amount": "10" });
        let bought = db
            .create_purchase(&purchase(supplier, item.id, "3", "10", Some(settle)))
            .await
            .unwrap();
        assert_eq!(bought.purchase.paid, d("10"));
        assert_eq!(balance(&db, account).await, d("90"));

        let later: NewPayment = serde_json::from_value(json!({
            "supplier_id": supplier,
            "purchase_id": bought.purchase.id,
            "method": "bank",
            "account_id": account,
            "amount": "5"
        }))
        .unwrap();
        let later = db.create_payment(&later).await.unwrap();
        assert_eq!(balance(&db, account).await, d("85"));

        db.delete_purchase(bought.purchase.id).await.unwrap();
        assert_eq!(balance(&db, account).await, d("100"));
        assert_eq!(on_hand(&db, item.id).await, Decimal::ZERO);
        assert!(matches!(db.get_payment(later.id).await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sale_delete_reverses_receipts() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "4").await;
        let customer = new_party(&db, PartyKind::Customer).await;
        let account = new_account(&db, "0").await;

        let settle = json!({ "method": "bank", "account_id": account, "amount": "20" });
        let sold = db.create_sale(&sale(Some(customer), item.id, "2", Some(settle))).await.unwrap();
        assert_eq!(sold.sale.received, d("20"));
        assert_eq!(balance(&db, account).await, d("20"));

        db.delete_sale(sold.sale.id).await.unwrap();
        assert_eq!(balance(&db, account).await, Decimal::ZERO);
        assert_eq!(on_hand(&db, item.id).await, d("4"));
    }

    #[tokio::test]
    async fn test_receipt_delete_cannot_overdraw() {
        let Some(db) = test_db().await else { return };
        let customer = new_party(&db, PartyKind::Customer).await;
        let supplier = new_party(&db, PartyKind::Supplier).await;
        let account = new_account(&db, "0").await;

        let receipt: NewReceipt = serde_json::from_value(json!({
            "customer_id": customer,
            "method": "bank",
            "account_id": account,
            "amount": "50"
        }))
        .unwrap();
        let receipt = db.create_receipt(&receipt).await.unwrap();

        let spend: NewPayment = serde_json::from_value(json!({
            "supplier_id": supplier,
            "method": "bank",
            "account_id": account,
            "amount": "40"
        }))
        .unwrap();
        db.create_payment(&spend).await.unwrap();
        assert_eq!(balance(&db, account).await, d("10"));

        let err = db.delete_receipt(receipt.id).await.unwrap_err();
        assert!(matches!(err, DbError::InsufficientBalance { account_id, .. } if account_id == account));
        assert_eq!(balance(&db, account).await, d("10"));
        assert!(db.get_receipt(receipt.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_payment_capped_at_outstanding() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "0").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;
        let bought = db.create_purchase(&purchase(supplier, item.id, "1", "100", None)).await.unwrap();
        let id = bought.purchase.id;

        db.create_payment(&payment(supplier, Some(id), "60")).await.unwrap();
        let err = db.create_payment(&payment(supplier, Some(id), "40.01")).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidData(msg) if msg.contains("outstanding 40")));
        db.create_payment(&payment(supplier, Some(id), "40")).await.unwrap();

        assert_eq!(db.get_purchase(id).await.unwrap().purchase.paid, d("100"));
    }

    #[tokio::test]
    async fn test_concurrent_payments_respect_outstanding() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "0").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;
        let bought = db.create_purchase(&purchase(supplier, item.id, "1", "100", None)).await.unwrap();
        let id = bought.purchase.id;

        // Hold the purchase lock while a second payment queues behind it
        let mut tx = db.pool().begin().await.unwrap();
        lock_settled_document(&mut tx, SettledTable::Purchases, id).await.unwrap();

        let contender = tokio::spawn({
            let db = db.clone();
            async move { db.create_payment(&payment(supplier, Some(id), "60")).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        insert_payment(&mut tx, supplier, Some(id), PaymentMethod::Cash, None, d("60"), today(), None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let result = contender.await.unwrap();
        assert!(matches!(result, Err(DbError::InvalidData(_))), "got {:?}", result);
        assert_eq!(db.get_purchase(id).await.unwrap().purchase.paid, d("60"));
    }

    #[tokio::test]
    async fn test_stored_precision_round_trips() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "1").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;

        let err = db
            .create_purchase(&purchase(supplier, item.id, "0.0004", "1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));

        let err = db
            .create_purchase(&purchase(supplier, item.id, "79228162514264337593543950335", "1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));

        let err = db.create_payment(&payment(supplier, None, "0.004")).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));

        let bought = db.create_purchase(&purchase(supplier, item.id, "0.001", "0.0001", None)).await.unwrap();
        assert_eq!(on_hand(&db, item.id).await, d("1.001"));
        db.delete_purchase(bought.purchase.id).await.unwrap();
        assert_eq!(on_hand(&db, item.id).await, d("1"));
    }

    #[tokio::test]
    async fn test_stock_past_column_width_is_invalid() {
        let Some(db) = test_db().await else { return };
        let item = new_item(&db, "99999999999.999").await;
        let supplier = new_party(&db, PartyKind::Supplier).await;

        let err = db
            .create_purchase(&purchase(supplier, item.id, "0.001", "0", None))
            .await
            .unwrap_err();
        let err = match err {
            DbError::Sqlx(e) => DbError::from_constraint(e, "Purchase"),
            other => other,
        };
        assert!(matches!(err, DbError::InvalidData(msg) if msg.contains("out of range")));
        assert_eq!(on_hand(&db, item.id).await, d("99999999999.999"));
    }
}
