//! Database module for PostgreSQL operations using SQLx
//! Uses runtime query checking (no compile-time DATABASE_URL needed)

mod documents;
mod models;
mod reports;
mod schema;

pub use models::*;

use crate::config::AppConfig;
use crate::ledger::LedgerError;
use crate::types::EntryKind;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::FromRow;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NUMERIC_OUT_OF_RANGE: &str = "22003";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Insufficient stock for item {item_id}: on hand {available}, change {requested}")]
    InsufficientStock {
        item_id: i64,
        available: Decimal,
        requested: Decimal,
    },
    #[error("Insufficient balance in account {account_id}: balance {balance}, change {requested}")]
    InsufficientBalance {
        account_id: i64,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<LedgerError> for DbError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownItem(id) => DbError::NotFound(format!("Item {}", id)),
            other => DbError::InvalidData(other.to_string()),
        }
    }
}

impl DbError {
    /// Translate constraint and range violations into errors naming the record involved
    pub fn from_constraint(err: sqlx::Error, what: &str) -> Self {
        let code = err
            .as_database_error()
            .and_then(|e| e.code())
            .map(|c| c.into_owned());
        match code.as_deref() {
            Some(UNIQUE_VIOLATION) => DbError::Conflict(format!("{} already exists", what)),
            Some(FOREIGN_KEY_VIOLATION) => {
                DbError::Conflict(format!("{} is referenced by other records", what))
            }
            Some(NUMERIC_OUT_OF_RANGE) => DbError::InvalidData(format!("{} value out of range", what)),
            _ => DbError::Sqlx(err),
        }
    }
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection pool and bring the schema up to date
    pub async fn new(config: &AppConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.db_acquire_timeout)
            .connect(&config.database_url)
            .await?;

        info!(
            "Database pool created with max {} connections",
            config.db_max_connections
        );

        let db = Self {
            pool: Arc::new(pool),
        };
        schema::run_migrations(db.pool()).await?;
        Ok(db)
    }

    /// Pool that connects on first use; nothing is contacted until a query runs
    #[cfg(test)]
    pub fn connect_lazy(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new().connect_lazy(database_url)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }

    // ==========================================
    // Settings Operations
    // ==========================================

    pub async fn get_settings(&self) -> Result<Settings, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, business_name, currency, low_stock_threshold, updated_at
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Settings::from_row(&row)?),
            None => Ok(Settings::default()),
        }
    }

    pub async fn update_settings(&self, updates: SettingsUpdate) -> Result<Settings, DbError> {
        let row = sqlx::query(
            r#"
            UPDATE settings
            SET
                business_name = COALESCE($1, business_name),
                currency = COALESCE($2, currency),
                low_stock_threshold = COALESCE($3, low_stock_threshold),
                updated_at = NOW()
            WHERE id = 1
            RETURNING id, business_name, currency, low_stock_threshold, updated_at
            "#,
        )
        .bind(updates.business_name.map(|v| v.trim().to_string()))
        .bind(updates.currency.map(|v| v.trim().to_uppercase()))
        .bind(updates.low_stock_threshold)
        .fetch_one(self.pool())
        .await?;

        Ok(Settings::from_row(&row)?)
    }

    // ==========================================
    // Item Operations
    // ==========================================

    /// Register an item; an opening quantity is logged as an opening adjustment
    pub async fn create_item(&self, item: &NewItem) -> Result<Item, DbError> {
        let mut tx = self.pool().begin().await?;
        let opening = item.opening_quantity.unwrap_or(Decimal::ZERO);

        let row = sqlx::query(
            r#"
            INSERT INTO items (
                code, name, unit, purchase_price, retail_price, wholesale_price,
                quantity, reorder_level
            )
            VALUES ($1, $2, COALESCE($3, 'pcs'), $4, $5, COALESCE($6, $5), $7, $8)
            RETURNING *
            "#,
        )
        .bind(normalize(item.code.as_deref()))
        .bind(item.name.trim())
        .bind(normalize(item.unit.as_deref()))
        .bind(item.purchase_price)
        .bind(item.retail_price)
        .bind(item.wholesale_price)
        .bind(opening)
        .bind(item.reorder_level)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::from_constraint(e, "Item code"))?;
        let created = Item::from_row(&row)?;

        if opening > Decimal::ZERO {
            record_adjustment(&mut tx, created.id, EntryKind::Opening, opening, Some("Opening stock")).await?;
        }
        tx.commit().await?;

        info!("Item created: id={} name={} opening_qty={}", created.id, created.name, opening);
        Ok(created)
    }

    pub async fn get_item(&self, id: i64) -> Result<Item, DbError> {
        let row = sqlx::query("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Item {}", id)))?;
        Ok(Item::from_row(&row)?)
    }

    pub async fn list_items(&self, search: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Item>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM items
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR code ILIKE '%' || $1 || '%')
            ORDER BY name, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(normalize(search))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        from_rows(rows)
    }

    pub async fn count_items(&self, search: Option<&str>) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM items
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR code ILIKE '%' || $1 || '%')
            "#,
        )
        .bind(normalize(search))
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Every item, used by stock reports
    pub async fn all_items(&self) -> Result<Vec<Item>, DbError> {
        let rows = sqlx::query("SELECT * FROM items ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn update_item(&self, id: i64, updates: ItemUpdate) -> Result<Item, DbError> {
        let row = sqlx::query(
            r#"
            UPDATE items
            SET
                code = COALESCE($2, code),
                name = COALESCE($3, name),
                unit = COALESCE($4, unit),
                purchase_price = COALESCE($5, purchase_price),
                retail_price = COALESCE($6, retail_price),
                wholesale_price = COALESCE($7, wholesale_price),
                reorder_level = COALESCE($8, reorder_level),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(normalize(updates.code.as_deref()))
        .bind(normalize(updates.name.as_deref()))
        .bind(normalize(updates.unit.as_deref()))
        .bind(updates.purchase_price)
        .bind(updates.retail_price)
        .bind(updates.wholesale_price)
        .bind(updates.reorder_level)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| DbError::from_constraint(e, "Item code"))?
        .ok_or_else(|| DbError::NotFound(format!("Item {}", id)))?;

        Ok(Item::from_row(&row)?)
    }

    /// Delete an item that no purchase or sale references
    pub async fn delete_item(&self, id: i64) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| DbError::from_constraint(e, &format!("Item {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("Item {}", id)));
        }
        info!("Item deleted: id={}", id);
        Ok(())
    }

    /// Manual stock correction (damage, count differences)
    pub async fn adjust_stock(&self, id: i64, req: &StockAdjustmentRequest) -> Result<Item, DbError> {
        let mut tx = self.pool().begin().await?;

        documents::apply_stock_delta(
            &mut tx,
            crate::ledger::StockDelta {
                item_id: id,
                delta: req.delta,
            },
        )
        .await?;
        record_adjustment(&mut tx, id, EntryKind::Adjustment, req.delta, req.reason.as_deref()).await?;

        let row = sqlx::query("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let item = Item::from_row(&row)?;
        tx.commit().await?;

        info!("Stock adjusted: item={} delta={} on_hand={}", id, req.delta, item.quantity);
        Ok(item)
    }

    /// Stock history of an item, newest first
    pub async fn item_movements(&self, id: i64, limit: i64, offset: i64) -> Result<Vec<StockMovement>, DbError> {
        self.get_item(id).await?;

        let rows = sqlx::query(
            r#"
            SELECT occurred_on, kind, reference_id, quantity, unit_price, note, created_at
            FROM (
                SELECT p.purchase_date AS occurred_on, 'purchase' AS kind, p.id AS reference_id,
                       l.quantity, l.unit_price, p.note, p.created_at
                FROM purchase_lines l JOIN purchases p ON p.id = l.purchase_id
                WHERE l.item_id = $1
                UNION ALL
                SELECT s.sale_date, 'sale', s.id, -l.quantity, l.unit_price, s.note, s.created_at
                FROM sale_lines l JOIN sales s ON s.id = l.sale_id
                WHERE l.item_id = $1
                UNION ALL
                SELECT a.adjusted_on, a.kind, a.id, a.delta, NULL::numeric, a.reason, a.created_at
                FROM stock_adjustments a
                WHERE a.item_id = $1
            ) movements
            ORDER BY occurred_on DESC, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        from_rows(rows)
    }

    // ==========================================
    // Supplier & Customer Operations
    // ==========================================

    pub async fn create_party(&self, kind: PartyKind, party: &NewParty) -> Result<Party, DbError> {
        let sql = format!(
            r#"
            INSERT INTO {} (name, phone, email, address, note)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(party.name.trim())
            .bind(normalize(party.phone.as_deref()))
            .bind(normalize(party.email.as_deref()))
            .bind(normalize(party.address.as_deref()))
            .bind(normalize(party.note.as_deref()))
            .fetch_one(self.pool())
            .await?;
        let created = Party::from_row(&row)?;

        info!("{} created: id={} name={}", kind.label(), created.id, created.name);
        Ok(created)
    }

    pub async fn get_party(&self, kind: PartyKind, id: i64) -> Result<Party, DbError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", kind.table());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} {}", kind.label(), id)))?;
        Ok(Party::from_row(&row)?)
    }

    pub async fn list_parties(
        &self,
        kind: PartyKind,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Party>, DbError> {
        let sql = format!(
            r#"
            SELECT * FROM {}
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR phone ILIKE '%' || $1 || '%')
            ORDER BY name, id
            LIMIT $2 OFFSET $3
            "#,
            kind.table()
        );
        let rows = sqlx::query(&sql)
            .bind(normalize(search))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;

        from_rows(rows)
    }

    pub async fn count_parties(&self, kind: PartyKind, search: Option<&str>) -> Result<i64, DbError> {
        let sql = format!(
            r#"
            SELECT COUNT(*) FROM {}
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR phone ILIKE '%' || $1 || '%')
            "#,
            kind.table()
        );
        let row: (i64,) = sqlx::query_as(&sql)
            .bind(normalize(search))
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    pub async fn update_party(&self, kind: PartyKind, id: i64, updates: PartyUpdate) -> Result<Party, DbError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET
                name = COALESCE($2, name),
                phone = COALESCE($3, phone),
                email = COALESCE($4, email),
                address = COALESCE($5, address),
                note = COALESCE($6, note),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(normalize(updates.name.as_deref()))
            .bind(normalize(updates.phone.as_deref()))
            .bind(normalize(updates.email.as_deref()))
            .bind(normalize(updates.address.as_deref()))
            .bind(normalize(updates.note.as_deref()))
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{} {}", kind.label(), id)))?;

        Ok(Party::from_row(&row)?)
    }

    /// Delete a supplier/customer with no documents or movements
    pub async fn delete_party(&self, kind: PartyKind, id: i64) -> Result<(), DbError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| DbError::from_constraint(e, &format!("{} {}", kind.label(), id)))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("{} {}", kind.label(), id)));
        }
        info!("{} deleted: id={}", kind.label(), id);
        Ok(())
    }

    // ==========================================
    // Account Operations
    // ==========================================

    pub async fn create_account(&self, account: &NewAccount) -> Result<Account, DbError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (name, bank_name, account_number, opening_balance, balance)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING *
            "#,
        )
        .bind(account.name.trim())
        .bind(normalize(account.bank_name.as_deref()))
        .bind(normalize(account.account_number.as_deref()))
        .bind(crate::ledger::round_money(account.opening_balance))
        .fetch_one(self.pool())
        .await?;
        let created = Account::from_row(&row)?;

        info!("Account created: id={} name={} opening={}", created.id, created.name, created.balance);
        Ok(created)
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, DbError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Account {}", id)))?;
        Ok(Account::from_row(&row)?)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, DbError> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;
        from_rows(rows)
    }

    pub async fn update_account(&self, id: i64, updates: AccountUpdate) -> Result<Account, DbError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET
                name = COALESCE($2, name),
                bank_name = COALESCE($3, bank_name),
                account_number = COALESCE($4, account_number),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(normalize(updates.name.as_deref()))
        .bind(normalize(updates.bank_name.as_deref()))
        .bind(normalize(updates.account_number.as_deref()))
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Account {}", id)))?;

        Ok(Account::from_row(&row)?)
    }

    /// Delete an account no payment or receipt went through
    pub async fn delete_account(&self, id: i64) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| DbError::from_constraint(e, &format!("Account {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("Account {}", id)));
        }
        info!("Account deleted: id={}", id);
        Ok(())
    }
}

/// Decode every row of a result set
fn from_rows<T>(rows: Vec<PgRow>) -> Result<Vec<T>, DbError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    rows.iter()
        .map(|row| T::from_row(row).map_err(DbError::from))
        .collect()
}

/// Trim optional text, mapping blanks to NULL
fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn record_adjustment(
    conn: &mut PgConnection,
    item_id: i64,
    kind: EntryKind,
    delta: Decimal,
    reason: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO stock_adjustments (item_id, kind, delta, reason)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(item_id)
    .bind(kind.as_str())
    .bind(delta)
    .bind(normalize(reason))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
