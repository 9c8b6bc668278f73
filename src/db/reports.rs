//! Reports and statements

use super::models::*;
use super::{from_rows, Database, DbError};
use crate::ledger::{build_statement, round_money, split_opening, LedgerEntry, NormalBalance};
use crate::types::EntryKind;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

const SUPPLIER_ENTRIES: &str = r#"
    SELECT purchase_date AS date, 'purchase' AS kind, id AS reference_id, invoice_no AS detail,
           0::numeric AS debit, total AS credit, created_at
    FROM purchases
    WHERE supplier_id = $1 AND ($2::date IS NULL OR purchase_date <= $2)
    UNION ALL
    SELECT payment_date, 'payment', id, method, amount, 0::numeric, created_at
    FROM payments
    WHERE supplier_id = $1 AND ($2::date IS NULL OR payment_date <= $2)
    ORDER BY date, created_at
"#;

const CUSTOMER_ENTRIES: &str = r#"
    SELECT sale_date AS date, 'sale' AS kind, id AS reference_id, invoice_no AS detail,
           total AS debit, 0::numeric AS credit, created_at
    FROM sales
    WHERE customer_id = $1 AND ($2::date IS NULL OR sale_date <= $2)
    UNION ALL
    SELECT receipt_date, 'receipt', id, method, 0::numeric, amount, created_at
    FROM receipts
    WHERE customer_id = $1 AND ($2::date IS NULL OR receipt_date <= $2)
    ORDER BY date, created_at
"#;

const ACCOUNT_ENTRIES: &str = r#"
    SELECT r.receipt_date AS date, 'receipt' AS kind, r.id AS reference_id, c.name AS detail,
           r.amount AS debit, 0::numeric AS credit, r.created_at
    FROM receipts r
    LEFT JOIN customers c ON c.id = r.customer_id
    WHERE r.account_id = $1 AND ($2::date IS NULL OR r.receipt_date <= $2)
    UNION ALL
    SELECT p.payment_date, 'payment', p.id, s.name, 0::numeric, p.amount, p.created_at
    FROM payments p
    JOIN suppliers s ON s.id = p.supplier_id
    WHERE p.account_id = $1 AND ($2::date IS NULL OR p.payment_date <= $2)
    ORDER BY date, created_at
"#;

fn describe(kind: EntryKind, reference_id: i64, detail: Option<&str>) -> String {
    let label = match kind {
        EntryKind::Opening => "Opening",
        EntryKind::Purchase => "Purchase",
        EntryKind::Sale => "Sale",
        EntryKind::Payment => "Payment",
        EntryKind::Receipt => "Receipt",
        EntryKind::Adjustment => "Adjustment",
    };
    match detail.filter(|d| !d.is_empty()) {
        Some(detail) => format!("{} #{} ({})", label, reference_id, detail),
        None => format!("{} #{}", label, reference_id),
    }
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, DbError> {
    let raw: String = row.try_get("kind")?;
    let kind = EntryKind::from_db(&raw)
        .ok_or_else(|| DbError::InvalidData(format!("unknown entry kind {}", raw)))?;
    let reference_id: i64 = row.try_get("reference_id")?;
    let detail: Option<String> = row.try_get("detail")?;
    Ok(LedgerEntry {
        date: row.try_get("date")?,
        kind,
        reference_id,
        description: describe(kind, reference_id, detail.as_deref()),
        debit: row.try_get("debit")?,
        credit: row.try_get("credit")?,
    })
}

/// Reject windows that end before they start
fn check_window(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), DbError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(DbError::InvalidData(format!(
            "from {} is after to {}",
            from, to
        ))),
        _ => Ok(()),
    }
}

impl Database {
    /// Business overview. Counts and flows respect the window; balances,
    /// stock and outstanding amounts are as of now.
    pub async fn summary(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        low_stock_threshold: Decimal,
    ) -> Result<Summary, DbError> {
        check_window(from, to)?;

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM purchases
                 WHERE ($1::date IS NULL OR purchase_date >= $1)
                   AND ($2::date IS NULL OR purchase_date <= $2)) AS purchases_count,
                (SELECT COALESCE(SUM(total), 0) FROM purchases
                 WHERE ($1::date IS NULL OR purchase_date >= $1)
                   AND ($2::date IS NULL OR purchase_date <= $2)) AS purchases_total,
                (SELECT COUNT(*) FROM sales
                 WHERE ($1::date IS NULL OR sale_date >= $1)
                   AND ($2::date IS NULL OR sale_date <= $2)) AS sales_count,
                (SELECT COALESCE(SUM(total), 0) FROM sales
                 WHERE ($1::date IS NULL OR sale_date >= $1)
                   AND ($2::date IS NULL OR sale_date <= $2)) AS sales_total,
                (SELECT COALESCE(SUM(amount), 0) FROM payments
                 WHERE ($1::date IS NULL OR payment_date >= $1)
                   AND ($2::date IS NULL OR payment_date <= $2)) AS payments_total,
                (SELECT COALESCE(SUM(amount), 0) FROM receipts
                 WHERE ($1::date IS NULL OR receipt_date >= $1)
                   AND ($2::date IS NULL OR receipt_date <= $2)) AS receipts_total,
                (SELECT COALESCE(SUM(quantity * purchase_price), 0) FROM items) AS stock_value,
                (SELECT COALESCE(SUM(balance), 0) FROM accounts) AS bank_balance,
                (SELECT COALESCE(SUM(amount), 0) FROM receipts WHERE method = 'cash')
                  - (SELECT COALESCE(SUM(amount), 0) FROM payments WHERE method = 'cash') AS cash_in_hand,
                (SELECT COALESCE(SUM(total), 0) FROM sales WHERE customer_id IS NOT NULL)
                  - (SELECT COALESCE(SUM(amount), 0) FROM receipts WHERE customer_id IS NOT NULL) AS receivables,
                (SELECT COALESCE(SUM(total), 0) FROM purchases)
                  - (SELECT COALESCE(SUM(amount), 0) FROM payments) AS payables,
                (SELECT COUNT(*) FROM items
                 WHERE quantity <= COALESCE(reorder_level, $3)) AS low_stock_items
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(low_stock_threshold)
        .fetch_one(self.pool())
        .await?;

        Ok(Summary {
            from,
            to,
            purchases_count: row.try_get("purchases_count")?,
            purchases_total: row.try_get("purchases_total")?,
            sales_count: row.try_get("sales_count")?,
            sales_total: row.try_get("sales_total")?,
            payments_total: row.try_get("payments_total")?,
            receipts_total: row.try_get("receipts_total")?,
            stock_value: round_money(row.try_get("stock_value")?),
            bank_balance: row.try_get("bank_balance")?,
            cash_in_hand: row.try_get("cash_in_hand")?,
            receivables: row.try_get("receivables")?,
            payables: row.try_get("payables")?,
            low_stock_items: row.try_get("low_stock_items")?,
        })
    }

    pub async fn stock_report(&self, low_stock_threshold: Decimal) -> Result<Vec<StockRow>, DbError> {
        let items = self.all_items().await?;
        Ok(items
            .iter()
            .map(|item| StockRow::from_item(item, low_stock_threshold))
            .collect())
    }

    pub async fn low_stock(&self, low_stock_threshold: Decimal) -> Result<Vec<StockRow>, DbError> {
        let rows = self.stock_report(low_stock_threshold).await?;
        Ok(rows.into_iter().filter(|row| row.low_stock).collect())
    }

    /// Per-day document count and total, oldest day first
    pub async fn daily_totals(
        &self,
        source: DailySource,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<DailyTotal>, DbError> {
        check_window(from, to)?;

        let sql = format!(
            r#"
            SELECT {date} AS date, COUNT(*) AS count, COALESCE(SUM(total), 0) AS total
            FROM {table}
            WHERE ($1::date IS NULL OR {date} >= $1)
              AND ($2::date IS NULL OR {date} <= $2)
            GROUP BY {date}
            ORDER BY {date}
            "#,
            date = source.date_column(),
            table = source.table()
        );
        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    /// Supplier statement: purchases raise what is owed, payments lower it.
    /// Customer statement: sales raise what is owed to us, receipts lower it.
    pub async fn party_statement(
        &self,
        kind: PartyKind,
        id: i64,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<PartyStatement, DbError> {
        check_window(from, to)?;
        let party = self.get_party(kind, id).await?;

        let (sql, normal) = match kind {
            PartyKind::Supplier => (SUPPLIER_ENTRIES, NormalBalance::Credit),
            PartyKind::Customer => (CUSTOMER_ENTRIES, NormalBalance::Debit),
        };
        let rows = sqlx::query(sql).bind(id).bind(to).fetch_all(self.pool()).await?;
        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;

        let (opening, entries) = split_opening(normal, Decimal::ZERO, entries, from);
        let statement = build_statement(normal, opening, entries);
        debug!(
            "{} statement id={} entries={} closing={}",
            kind.label(),
            id,
            statement.entries.len(),
            statement.closing_balance
        );

        Ok(PartyStatement { party, from, to, statement })
    }

    /// Bank account transactions with a running balance from the opening balance
    pub async fn account_statement(
        &self,
        id: i64,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<AccountStatement, DbError> {
        check_window(from, to)?;
        let account = self.get_account(id).await?;

        let rows = sqlx::query(ACCOUNT_ENTRIES).bind(id).bind(to).fetch_all(self.pool()).await?;
        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;

        let (opening, entries) = split_opening(NormalBalance::Debit, account.opening_balance, entries, from);
        let statement = build_statement(NormalBalance::Debit, opening, entries);

        Ok(AccountStatement { account, from, to, statement })
    }
}
