//! Schema bootstrap
//!
//! Every statement is idempotent so the migrations run on each startup.

use sqlx::postgres::PgPool;
use tracing::info;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        business_name TEXT NOT NULL DEFAULT 'My Business',
        currency TEXT NOT NULL DEFAULT 'USD',
        low_stock_threshold NUMERIC(14, 3) NOT NULL DEFAULT 5 CHECK (low_stock_threshold >= 0),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "INSERT INTO settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING",
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id BIGSERIAL PRIMARY KEY,
        code TEXT UNIQUE,
        name TEXT NOT NULL,
        unit TEXT NOT NULL DEFAULT 'pcs',
        purchase_price NUMERIC(14, 4) NOT NULL DEFAULT 0 CHECK (purchase_price >= 0),
        retail_price NUMERIC(14, 4) NOT NULL DEFAULT 0 CHECK (retail_price >= 0),
        wholesale_price NUMERIC(14, 4) NOT NULL DEFAULT 0 CHECK (wholesale_price >= 0),
        quantity NUMERIC(14, 3) NOT NULL DEFAULT 0 CHECK (quantity >= 0),
        reorder_level NUMERIC(14, 3) CHECK (reorder_level >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_adjustments (
        id BIGSERIAL PRIMARY KEY,
        item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        kind TEXT NOT NULL CHECK (kind IN ('opening', 'adjustment')),
        delta NUMERIC(14, 3) NOT NULL,
        reason TEXT,
        adjusted_on DATE NOT NULL DEFAULT CURRENT_DATE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS suppliers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT,
        email TEXT,
        address TEXT,
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT,
        email TEXT,
        address TEXT,
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        bank_name TEXT,
        account_number TEXT,
        opening_balance NUMERIC(14, 2) NOT NULL DEFAULT 0 CHECK (opening_balance >= 0),
        balance NUMERIC(14, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchases (
        id BIGSERIAL PRIMARY KEY,
        supplier_id BIGINT NOT NULL REFERENCES suppliers(id) ON DELETE RESTRICT,
        invoice_no TEXT,
        purchase_date DATE NOT NULL DEFAULT CURRENT_DATE,
        subtotal NUMERIC(14, 2) NOT NULL,
        discount NUMERIC(14, 2) NOT NULL DEFAULT 0,
        total NUMERIC(14, 2) NOT NULL CHECK (total >= 0),
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_lines (
        id BIGSERIAL PRIMARY KEY,
        purchase_id BIGINT NOT NULL REFERENCES purchases(id) ON DELETE CASCADE,
        item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE RESTRICT,
        quantity NUMERIC(14, 3) NOT NULL CHECK (quantity > 0),
        unit_price NUMERIC(14, 4) NOT NULL CHECK (unit_price >= 0),
        line_total NUMERIC(14, 2) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales (
        id BIGSERIAL PRIMARY KEY,
        customer_id BIGINT REFERENCES customers(id) ON DELETE RESTRICT,
        kind TEXT NOT NULL DEFAULT 'retail' CHECK (kind IN ('retail', 'wholesale')),
        invoice_no TEXT,
        sale_date DATE NOT NULL DEFAULT CURRENT_DATE,
        subtotal NUMERIC(14, 2) NOT NULL,
        discount NUMERIC(14, 2) NOT NULL DEFAULT 0,
        total NUMERIC(14, 2) NOT NULL CHECK (total >= 0),
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sale_lines (
        id BIGSERIAL PRIMARY KEY,
        sale_id BIGINT NOT NULL REFERENCES sales(id) ON DELETE CASCADE,
        item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE RESTRICT,
        quantity NUMERIC(14, 3) NOT NULL CHECK (quantity > 0),
        unit_price NUMERIC(14, 4) NOT NULL CHECK (unit_price >= 0),
        line_total NUMERIC(14, 2) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id BIGSERIAL PRIMARY KEY,
        supplier_id BIGINT NOT NULL REFERENCES suppliers(id) ON DELETE RESTRICT,
        purchase_id BIGINT REFERENCES purchases(id) ON DELETE RESTRICT,
        account_id BIGINT REFERENCES accounts(id) ON DELETE RESTRICT,
        method TEXT NOT NULL CHECK (method IN ('cash', 'bank')),
        amount NUMERIC(14, 2) NOT NULL CHECK (amount > 0),
        payment_date DATE NOT NULL DEFAULT CURRENT_DATE,
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK ((method = 'bank') = (account_id IS NOT NULL))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS receipts (
        id BIGSERIAL PRIMARY KEY,
        customer_id BIGINT REFERENCES customers(id) ON DELETE RESTRICT,
        sale_id BIGINT REFERENCES sales(id) ON DELETE RESTRICT,
        account_id BIGINT REFERENCES accounts(id) ON DELETE RESTRICT,
        method TEXT NOT NULL CHECK (method IN ('cash', 'bank')),
        amount NUMERIC(14, 2) NOT NULL CHECK (amount > 0),
        receipt_date DATE NOT NULL DEFAULT CURRENT_DATE,
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK ((method = 'bank') = (account_id IS NOT NULL)),
        CHECK (customer_id IS NOT NULL OR sale_id IS NOT NULL)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_name ON items(name)",
    "CREATE INDEX IF NOT EXISTS idx_stock_adjustments_item ON stock_adjustments(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_purchases_supplier ON purchases(supplier_id)",
    "CREATE INDEX IF NOT EXISTS idx_purchases_date ON purchases(purchase_date)",
    "CREATE INDEX IF NOT EXISTS idx_purchase_lines_purchase ON purchase_lines(purchase_id)",
    "CREATE INDEX IF NOT EXISTS idx_purchase_lines_item ON purchase_lines(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_sales_customer ON sales(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(sale_date)",
    "CREATE INDEX IF NOT EXISTS idx_sale_lines_sale ON sale_lines(sale_id)",
    "CREATE INDEX IF NOT EXISTS idx_sale_lines_item ON sale_lines(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_supplier ON payments(supplier_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_purchase ON payments(purchase_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_account ON payments(account_id)",
    "CREATE INDEX IF NOT EXISTS idx_receipts_customer ON receipts(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_receipts_sale ON receipts(sale_id)",
    "CREATE INDEX IF NOT EXISTS idx_receipts_account ON receipts(account_id)",
];

/// Advisory lock key held while migrations run
const MIGRATION_LOCK_KEY: i64 = 0x4c45_4447_4552;

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    let mut tx = pool.begin().await?;
    // Concurrent starters wait here instead of racing on the catalog
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!("Database schema ready ({} statements)", MIGRATIONS.len());
    Ok(())
}
