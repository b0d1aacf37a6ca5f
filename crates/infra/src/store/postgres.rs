//! Postgres-backed order cycle store.
//!
//! Order cycles, exchanges and their join tables live in the schema shipped in
//! `migrations/0001_order_cycles.sql`. The reference catalog (enterprises,
//! products, variants, enterprise fees) is read from the tables owned by the
//! rest of the platform.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Constraint` | Duplicate fee or variant link |
//! | Database (foreign key violation) | `23503` | `Constraint` | Unknown enterprise, fee or variant |
//! | Database (check constraint violation) | `23514` | `Constraint` | Blank name, unknown direction |
//! | Database (serialization failure, deadlock) | `40001`, `40P01` | `Domain(Conflict)` | Lost a race with a concurrent writer; retry |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | RowNotFound | N/A | `Storage` | Unexpected row not found |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Atomicity
//!
//! Every write runs in one transaction. Dropping an uncommitted transaction
//! rolls it back, so an early `?` return never leaves a partial clone or a
//! half-deleted cycle behind.
//!
//! ## Consistency
//!
//! Reads run in a `REPEATABLE READ, READ ONLY` transaction, so every query of a
//! snapshot sees the same committed state. Writes that touch a cycle's
//! exchanges first lock the cycle row `FOR UPDATE`; writers of the same cycle
//! therefore serialize.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, field, instrument, warn, Span};
use uuid::Uuid;

use cyclekit_core::{
    DomainError, EnterpriseFeeId, EnterpriseId, ExchangeId, OrderCycleId, ProductId, VariantId,
};
use cyclekit_order_cycles::{
    Catalog, Enterprise, EnterpriseFee, Exchange, ExchangeDirection, NewExchange, OrderCycle, OrderCycleDraft,
    OrderCycleRecord, Product, Snapshot, Variant,
};

use super::r#trait::{OrderCycleStore, StoreError};

/// First statement of every read transaction.
const READ_SNAPSHOT: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

/// Postgres-backed order cycle store.
///
/// The async inherent methods are the primary API. The synchronous
/// `OrderCycleStore` impl bridges onto them and must be called from within a
/// multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresOrderCycleStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderCycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Load the catalog and every order cycle into one snapshot.
    #[instrument(skip(self), fields(order_cycles = field::Empty), err)]
    pub async fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut tx = self.begin_read().await?;
        let catalog = load_catalog(&mut *tx).await?;
        let records = load_records(&mut *tx, None).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let mut snapshot = Snapshot::new(catalog);
        for record in records {
            snapshot.put_order_cycle(record.order_cycle);
            for exchange in record.exchanges {
                snapshot.push_exchange(exchange);
            }
        }

        Span::current().record("order_cycles", snapshot.len());
        Ok(snapshot)
    }

    /// Load one order cycle with its exchanges, without the catalog.
    #[instrument(skip(self), fields(order_cycle_id = %id), err)]
    pub async fn load_record(&self, id: OrderCycleId) -> Result<Option<OrderCycleRecord>, StoreError> {
        let mut tx = self.begin_read().await?;
        let record = load_records(&mut *tx, Some(id)).await?.pop();
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    async fn begin_read(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query(READ_SNAPSHOT)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_transaction_isolation", e))?;
        Ok(tx)
    }

    #[instrument(skip(self, draft), fields(name = %draft.name), err)]
    pub async fn create_order_cycle(&self, draft: OrderCycleDraft) -> Result<OrderCycle, StoreError> {
        let order_cycle = draft.into_order_cycle(OrderCycleId::new())?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_order_cycle(&mut *tx, &order_cycle).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(order_cycle)
    }

    #[instrument(skip(self, order_cycle), fields(order_cycle_id = %order_cycle.id), err)]
    pub async fn update_order_cycle(&self, order_cycle: OrderCycle) -> Result<OrderCycle, StoreError> {
        order_cycle.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE order_cycles
            SET name = $2, coordinator_id = $3, orders_open_at = $4, orders_close_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order_cycle.id.as_uuid())
        .bind(&order_cycle.name)
        .bind(order_cycle.coordinator_id.as_uuid())
        .bind(order_cycle.orders_open_at)
        .bind(order_cycle.orders_close_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_cycle", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found_cycle(order_cycle.id));
        }

        sqlx::query("DELETE FROM coordinator_fees WHERE order_cycle_id = $1")
            .bind(order_cycle.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_coordinator_fees", e))?;
        insert_coordinator_fees(&mut *tx, &order_cycle).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(order_cycle)
    }

    /// Delete a cycle, its exchanges, their variant links and its fee links.
    #[instrument(skip(self), fields(order_cycle_id = %id, exchanges = field::Empty), err)]
    pub async fn delete_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_order_cycle(&mut *tx, id).await?;
        let record = load_records(&mut *tx, Some(id))
            .await?
            .pop()
            .ok_or_else(|| StoreError::not_found_cycle(id))?;

        for (operation, statement) in [
            (
                "delete_exchange_variants",
                "DELETE FROM exchange_variants WHERE exchange_id IN (SELECT id FROM exchanges WHERE order_cycle_id = $1)",
            ),
            ("delete_exchanges", "DELETE FROM exchanges WHERE order_cycle_id = $1"),
            ("delete_coordinator_fees", "DELETE FROM coordinator_fees WHERE order_cycle_id = $1"),
            ("delete_order_cycle", "DELETE FROM order_cycles WHERE id = $1"),
        ] {
            sqlx::query(statement)
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("exchanges", record.exchanges.len());
        Ok(record)
    }

    #[instrument(skip(self, exchange), fields(order_cycle_id = %order_cycle_id, direction = ?exchange.direction), err)]
    pub async fn add_exchange(&self, order_cycle_id: OrderCycleId, exchange: NewExchange) -> Result<Exchange, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_order_cycle(&mut *tx, order_cycle_id).await?;
        let exchange = Exchange::from_new(ExchangeId::new(), order_cycle_id, exchange);
        insert_exchange(&mut *tx, &exchange).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(exchange)
    }

    #[instrument(skip(self), fields(exchange_id = %id), err)]
    pub async fn remove_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let owner = sqlx::query(
            r#"
            SELECT oc.id FROM exchanges e
            JOIN order_cycles oc ON oc.id = e.order_cycle_id
            WHERE e.id = $1
            FOR UPDATE OF oc
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_order_cycle", e))?;
        if owner.is_none() {
            return Err(StoreError::Domain(DomainError::not_found("exchange", id)));
        }

        let variant_rows = sqlx::query("DELETE FROM exchange_variants WHERE exchange_id = $1 RETURNING exchange_id, variant_id")
            .bind(id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_exchange_variants", e))?;

        let row = sqlx::query(
            r#"
            DELETE FROM exchanges WHERE id = $1
            RETURNING id, order_cycle_id, sender_id, receiver_id, direction, pickup_time, pickup_instructions
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_exchange", e))?
        .ok_or_else(|| StoreError::Domain(DomainError::not_found("exchange", id)))?;

        let mut exchange = ExchangeRow::from_row(&row)
            .map_err(|e| map_row_error("exchange", e))?
            .into_exchange()?;
        for row in &variant_rows {
            let link = VariantLinkRow::from_row(row).map_err(|e| map_row_error("exchange variant", e))?;
            exchange.variant_ids.insert(VariantId::from_uuid(link.variant_id));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(exchange)
    }

    /// Copy a cycle and its exchanges in one transaction.
    #[instrument(skip(self), fields(order_cycle_id = %id, copy_id = field::Empty), err)]
    pub async fn clone_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_order_cycle(&mut *tx, id).await?;
        let source = load_records(&mut *tx, Some(id))
            .await?
            .pop()
            .ok_or_else(|| StoreError::not_found_cycle(id))?;

        let copy = source.order_cycle.duplicate().into_order_cycle(OrderCycleId::new())?;
        Span::current().record("copy_id", field::display(copy.id));
        insert_order_cycle(&mut *tx, &copy).await?;

        let mut exchanges = Vec::with_capacity(source.exchanges.len());
        for exchange in &source.exchanges {
            let cloned = Exchange::from_new(ExchangeId::new(), copy.id, exchange.to_new());
            insert_exchange(&mut *tx, &cloned).await?;
            exchanges.push(cloned);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        debug!(exchanges = exchanges.len(), "order cycle cloned");
        Ok(OrderCycleRecord {
            order_cycle: copy,
            exchanges,
        })
    }

    fn block_on<F: Future>(&self, operation: &str, fut: F) -> Result<F::Output, StoreError> {
        block_on_runtime(operation, fut)
    }
}

/// Drive `fut` to completion from synchronous code.
///
/// `block_in_place` is only available on the multi-threaded runtime, so any
/// other context is reported as a storage failure.
fn block_on_runtime<F: Future>(operation: &str, fut: F) -> Result<F::Output, StoreError> {
    let handle = Handle::try_current().map_err(|_| {
        StoreError::Storage(format!(
            "{operation} requires a tokio runtime; call PostgresOrderCycleStore from within one"
        ))
    })?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(StoreError::Storage(format!(
            "{operation} requires a multi-threaded tokio runtime"
        )));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
}

impl OrderCycleStore for PostgresOrderCycleStore {
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        self.block_on("snapshot", self.load_snapshot())?.map(Arc::new)
    }

    fn record(&self, id: OrderCycleId) -> Result<Option<OrderCycleRecord>, StoreError> {
        self.block_on("record", self.load_record(id))?
    }

    fn create_order_cycle(&self, draft: OrderCycleDraft) -> Result<OrderCycle, StoreError> {
        self.block_on("create_order_cycle", PostgresOrderCycleStore::create_order_cycle(self, draft))?
    }

    fn update_order_cycle(&self, order_cycle: OrderCycle) -> Result<OrderCycle, StoreError> {
        self.block_on("update_order_cycle", PostgresOrderCycleStore::update_order_cycle(self, order_cycle))?
    }

    fn delete_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        self.block_on("delete_order_cycle", PostgresOrderCycleStore::delete_order_cycle(self, id))?
    }

    fn add_exchange(&self, order_cycle_id: OrderCycleId, exchange: NewExchange) -> Result<Exchange, StoreError> {
        self.block_on("add_exchange", PostgresOrderCycleStore::add_exchange(self, order_cycle_id, exchange))?
    }

    fn remove_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        self.block_on("remove_exchange", PostgresOrderCycleStore::remove_exchange(self, id))?
    }

    fn clone_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        self.block_on("clone_order_cycle", PostgresOrderCycleStore::clone_order_cycle(self, id))?
    }
}

/// Take the row lock every exchange writer of `id` contends on.
async fn lock_order_cycle(conn: &mut PgConnection, id: OrderCycleId) -> Result<(), StoreError> {
    sqlx::query("SELECT id FROM order_cycles WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_order_cycle", e))?
        .map(|_| ())
        .ok_or_else(|| StoreError::not_found_cycle(id))
}

async fn insert_order_cycle(conn: &mut PgConnection, order_cycle: &OrderCycle) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO order_cycles (id, name, coordinator_id, orders_open_at, orders_close_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(order_cycle.id.as_uuid())
    .bind(&order_cycle.name)
    .bind(order_cycle.coordinator_id.as_uuid())
    .bind(order_cycle.orders_open_at)
    .bind(order_cycle.orders_close_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_order_cycle", e))?;

    insert_coordinator_fees(conn, order_cycle).await
}

async fn insert_coordinator_fees(conn: &mut PgConnection, order_cycle: &OrderCycle) -> Result<(), StoreError> {
    for fee in &order_cycle.coordinator_fee_ids {
        sqlx::query("INSERT INTO coordinator_fees (order_cycle_id, enterprise_fee_id) VALUES ($1, $2)")
            .bind(order_cycle.id.as_uuid())
            .bind(fee.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_coordinator_fee", e))?;
    }
    Ok(())
}

async fn insert_exchange(conn: &mut PgConnection, exchange: &Exchange) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO exchanges (id, order_cycle_id, sender_id, receiver_id, direction, pickup_time, pickup_instructions)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(exchange.id.as_uuid())
    .bind(exchange.order_cycle_id.as_uuid())
    .bind(exchange.sender_id.as_uuid())
    .bind(exchange.receiver_id.as_uuid())
    .bind(exchange.direction.as_str())
    .bind(exchange.pickup_time.as_deref())
    .bind(exchange.pickup_instructions.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_exchange", e))?;

    for variant in &exchange.variant_ids {
        sqlx::query("INSERT INTO exchange_variants (exchange_id, variant_id) VALUES ($1, $2)")
            .bind(exchange.id.as_uuid())
            .bind(variant.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_exchange_variant", e))?;
    }
    Ok(())
}

/// Load one order cycle (`only = Some`) or all of them, with their exchanges.
async fn load_records(conn: &mut PgConnection, only: Option<OrderCycleId>) -> Result<Vec<OrderCycleRecord>, StoreError> {
    let only: Option<Uuid> = only.map(|id| *id.as_uuid());

    let cycles = sqlx::query(
        r#"
        SELECT id, name, coordinator_id, orders_open_at, orders_close_at
        FROM order_cycles
        WHERE ($1::uuid IS NULL OR id = $1)
        ORDER BY id
        "#,
    )
    .bind(only)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_order_cycles", e))?;

    let fees = sqlx::query(
        r#"
        SELECT order_cycle_id, enterprise_fee_id
        FROM coordinator_fees
        WHERE ($1::uuid IS NULL OR order_cycle_id = $1)
        "#,
    )
    .bind(only)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_coordinator_fees", e))?;

    let exchanges = sqlx::query(
        r#"
        SELECT id, order_cycle_id, sender_id, receiver_id, direction, pickup_time, pickup_instructions
        FROM exchanges
        WHERE ($1::uuid IS NULL OR order_cycle_id = $1)
        ORDER BY position
        "#,
    )
    .bind(only)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_exchanges", e))?;

    let variants = sqlx::query(
        r#"
        SELECT ev.exchange_id, ev.variant_id
        FROM exchange_variants ev
        JOIN exchanges e ON e.id = ev.exchange_id
        WHERE ($1::uuid IS NULL OR e.order_cycle_id = $1)
        "#,
    )
    .bind(only)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_exchange_variants", e))?;

    assemble_records(
        decode_rows::<OrderCycleRow>(&cycles, "order cycle")?,
        decode_rows::<FeeLinkRow>(&fees, "coordinator fee")?,
        decode_rows::<ExchangeRow>(&exchanges, "exchange")?,
        decode_rows::<VariantLinkRow>(&variants, "exchange variant")?,
    )
}

async fn load_catalog(conn: &mut PgConnection) -> Result<Catalog, StoreError> {
    let enterprises = sqlx::query("SELECT id, name, next_collection_at FROM enterprises")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_enterprises", e))?;
    let products = sqlx::query("SELECT id, name FROM products")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_products", e))?;
    let variants = sqlx::query("SELECT id, product_id, is_master, deleted_at FROM variants ORDER BY id")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_variants", e))?;
    let fees = sqlx::query("SELECT id, enterprise_id, name FROM enterprise_fees")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_enterprise_fees", e))?;

    Ok(assemble_catalog(
        decode_rows::<EnterpriseRow>(&enterprises, "enterprise")?,
        decode_rows::<ProductRow>(&products, "product")?,
        decode_rows::<VariantRow>(&variants, "variant")?,
        decode_rows::<EnterpriseFeeRow>(&fees, "enterprise fee")?,
    ))
}

fn assemble_records(
    cycles: Vec<OrderCycleRow>,
    fees: Vec<FeeLinkRow>,
    exchanges: Vec<ExchangeRow>,
    variants: Vec<VariantLinkRow>,
) -> Result<Vec<OrderCycleRecord>, StoreError> {
    let mut records: BTreeMap<Uuid, OrderCycleRecord> = cycles
        .into_iter()
        .map(|row| (row.id, OrderCycleRecord { order_cycle: row.into(), exchanges: Vec::new() }))
        .collect();

    for link in fees {
        if let Some(record) = records.get_mut(&link.order_cycle_id) {
            record
                .order_cycle
                .coordinator_fee_ids
                .insert(EnterpriseFeeId::from_uuid(link.enterprise_fee_id));
        }
    }

    let mut variants_by_exchange: BTreeMap<Uuid, Vec<VariantId>> = BTreeMap::new();
    for link in variants {
        variants_by_exchange
            .entry(link.exchange_id)
            .or_default()
            .push(VariantId::from_uuid(link.variant_id));
    }

    for row in exchanges {
        let linked = variants_by_exchange.remove(&row.id).unwrap_or_default();
        let Some(record) = records.get_mut(&row.order_cycle_id) else {
            continue;
        };
        let mut exchange = row.into_exchange()?;
        exchange.variant_ids.extend(linked);
        record.exchanges.push(exchange);
    }

    Ok(records.into_values().collect())
}

fn assemble_catalog(
    enterprises: Vec<EnterpriseRow>,
    products: Vec<ProductRow>,
    variants: Vec<VariantRow>,
    fees: Vec<EnterpriseFeeRow>,
) -> Catalog {
    let mut catalog = Catalog::new();

    for row in enterprises {
        catalog.insert_enterprise(Enterprise {
            id: EnterpriseId::from_uuid(row.id),
            name: row.name,
            next_collection_at: row.next_collection_at,
        });
    }
    for row in fees {
        catalog.insert_fee(EnterpriseFee {
            id: EnterpriseFeeId::from_uuid(row.id),
            enterprise_id: EnterpriseId::from_uuid(row.enterprise_id),
            name: row.name,
        });
    }

    let mut masters: BTreeMap<Uuid, VariantId> = BTreeMap::new();
    let mut children: BTreeMap<Uuid, Vec<VariantId>> = BTreeMap::new();
    for row in &variants {
        let id = VariantId::from_uuid(row.id);
        if row.is_master {
            masters.insert(row.product_id, id);
        } else {
            children.entry(row.product_id).or_default().push(id);
        }
    }

    for row in products {
        let Some(master_id) = masters.get(&row.id).copied() else {
            warn!(product_id = %row.id, "product has no master variant; skipped");
            continue;
        };
        catalog.upsert_product(Product {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            master_id,
            variant_ids: children.remove(&row.id).unwrap_or_default(),
        });
    }

    for row in variants {
        catalog.upsert_variant(Variant {
            id: VariantId::from_uuid(row.id),
            product_id: ProductId::from_uuid(row.product_id),
            is_master: row.is_master,
            deleted_at: row.deleted_at,
        });
    }

    catalog
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => map_database_error(operation, db_err.code().as_deref(), db_err.message()),
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::Storage(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn map_database_error(operation: &str, code: Option<&str>, message: &str) -> StoreError {
    let msg = format!("database error in {}: {}", operation, message);
    match code {
        Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
        Some("40001") | Some("40P01") => StoreError::Domain(DomainError::conflict(msg)),
        _ => StoreError::Storage(msg),
    }
}

fn map_row_error(kind: &str, err: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("failed to deserialize {kind} row: {err}"))
}

fn decode_rows<T>(rows: &[PgRow], kind: &str) -> Result<Vec<T>, StoreError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    rows.iter()
        .map(|row| T::from_row(row).map_err(|e| map_row_error(kind, e)))
        .collect()
}

// SQLx row types

#[derive(Debug)]
struct OrderCycleRow {
    id: Uuid,
    name: String,
    coordinator_id: Uuid,
    orders_open_at: Option<DateTime<Utc>>,
    orders_close_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for OrderCycleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderCycleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            coordinator_id: row.try_get("coordinator_id")?,
            orders_open_at: row.try_get("orders_open_at")?,
            orders_close_at: row.try_get("orders_close_at")?,
        })
    }
}

impl From<OrderCycleRow> for OrderCycle {
    fn from(row: OrderCycleRow) -> Self {
        OrderCycle {
            id: OrderCycleId::from_uuid(row.id),
            name: row.name,
            coordinator_id: EnterpriseId::from_uuid(row.coordinator_id),
            orders_open_at: row.orders_open_at,
            orders_close_at: row.orders_close_at,
            coordinator_fee_ids: Default::default(),
        }
    }
}

#[derive(Debug)]
struct ExchangeRow {
    id: Uuid,
    order_cycle_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    direction: String,
    pickup_time: Option<String>,
    pickup_instructions: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ExchangeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ExchangeRow {
            id: row.try_get("id")?,
            order_cycle_id: row.try_get("order_cycle_id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            direction: row.try_get("direction")?,
            pickup_time: row.try_get("pickup_time")?,
            pickup_instructions: row.try_get("pickup_instructions")?,
        })
    }
}

impl ExchangeRow {
    fn into_exchange(self) -> Result<Exchange, StoreError> {
        let direction = ExchangeDirection::parse(&self.direction)
            .ok_or_else(|| StoreError::Storage(format!("unknown exchange direction '{}'", self.direction)))?;
        Ok(Exchange {
            id: ExchangeId::from_uuid(self.id),
            order_cycle_id: OrderCycleId::from_uuid(self.order_cycle_id),
            sender_id: EnterpriseId::from_uuid(self.sender_id),
            receiver_id: EnterpriseId::from_uuid(self.receiver_id),
            direction,
            variant_ids: Default::default(),
            pickup_time: self.pickup_time,
            pickup_instructions: self.pickup_instructions,
        })
    }
}

#[derive(Debug)]
struct FeeLinkRow {
    order_cycle_id: Uuid,
    enterprise_fee_id: Uuid,
}

impl<'r> sqlx::FromRow<'r, PgRow> for FeeLinkRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FeeLinkRow {
            order_cycle_id: row.try_get("order_cycle_id")?,
            enterprise_fee_id: row.try_get("enterprise_fee_id")?,
        })
    }
}

#[derive(Debug)]
struct VariantLinkRow {
    exchange_id: Uuid,
    variant_id: Uuid,
}

impl<'r> sqlx::FromRow<'r, PgRow> for VariantLinkRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(VariantLinkRow {
            exchange_id: row.try_get("exchange_id")?,
            variant_id: row.try_get("variant_id")?,
        })
    }
}

#[derive(Debug)]
struct EnterpriseRow {
    id: Uuid,
    name: String,
    next_collection_at: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EnterpriseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EnterpriseRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            next_collection_at: row.try_get("next_collection_at")?,
        })
    }
}

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

#[derive(Debug)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    is_master: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for VariantRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(VariantRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            is_master: row.try_get("is_master")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[derive(Debug)]
struct EnterpriseFeeRow {
    id: Uuid,
    enterprise_id: Uuid,
    name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EnterpriseFeeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EnterpriseFeeRow {
            id: row.try_get("id")?,
            enterprise_id: row.try_get("enterprise_id")?,
            name: row.try_get("name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_row(id: Uuid) -> OrderCycleRow {
        OrderCycleRow {
            id,
            name: "Week 1".to_string(),
            coordinator_id: Uuid::now_v7(),
            orders_open_at: None,
            orders_close_at: None,
        }
    }

    fn exchange_row(order_cycle_id: Uuid, direction: &str) -> ExchangeRow {
        ExchangeRow {
            id: Uuid::now_v7(),
            order_cycle_id,
            sender_id: Uuid::now_v7(),
            receiver_id: Uuid::now_v7(),
            direction: direction.to_string(),
            pickup_time: Some("Friday 5pm".to_string()),
            pickup_instructions: None,
        }
    }

    #[test]
    fn assemble_records_groups_children_under_their_cycle() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let fee = Uuid::now_v7();
        let first = exchange_row(a, "incoming");
        let second = exchange_row(a, "outgoing");
        let variant = Uuid::now_v7();
        let (first_id, second_id) = (first.id, second.id);

        let records = assemble_records(
            vec![cycle_row(a), cycle_row(b)],
            vec![FeeLinkRow { order_cycle_id: a, enterprise_fee_id: fee }],
            vec![first, second],
            vec![VariantLinkRow { exchange_id: second_id, variant_id: variant }],
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        let record_a = records.iter().find(|r| *r.order_cycle.id.as_uuid() == a).unwrap();
        assert!(record_a.order_cycle.coordinator_fee_ids.contains(&EnterpriseFeeId::from_uuid(fee)));
        let ids: Vec<Uuid> = record_a.exchanges.iter().map(|e| *e.id.as_uuid()).collect();
        assert_eq!(ids, vec![first_id, second_id]);
        assert!(record_a.exchanges[1].carries(VariantId::from_uuid(variant)));
        assert!(record_a.exchanges[0].variant_ids.is_empty());

        let record_b = records.iter().find(|r| *r.order_cycle.id.as_uuid() == b).unwrap();
        assert!(record_b.exchanges.is_empty());
    }

    #[test]
    fn unknown_direction_is_a_storage_error() {
        let a = Uuid::now_v7();
        let err = assemble_records(vec![cycle_row(a)], vec![], vec![exchange_row(a, "sideways")], vec![]).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[test]
    fn assemble_catalog_splits_master_and_children() {
        let product = Uuid::now_v7();
        let master = Uuid::now_v7();
        let child = Uuid::now_v7();
        let orphan = Uuid::now_v7();

        let catalog = assemble_catalog(
            vec![],
            vec![
                ProductRow { id: product, name: "Apples".to_string() },
                ProductRow { id: orphan, name: "No master".to_string() },
            ],
            vec![
                VariantRow { id: master, product_id: product, is_master: true, deleted_at: None },
                VariantRow { id: child, product_id: product, is_master: false, deleted_at: None },
            ],
            vec![],
        );

        let loaded = catalog.product(ProductId::from_uuid(product)).unwrap();
        assert_eq!(loaded.master_id, VariantId::from_uuid(master));
        assert_eq!(loaded.variant_ids, vec![VariantId::from_uuid(child)]);
        assert!(catalog.has_variants(loaded));
        assert!(catalog.product(ProductId::from_uuid(orphan)).is_none());
    }

    #[test]
    fn pool_closed_maps_to_storage() {
        let err = map_sqlx_error("load_exchanges", sqlx::Error::PoolClosed);
        match err {
            StoreError::Storage(msg) => assert!(msg.contains("load_exchanges")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lost_races_map_to_conflict() {
        for code in ["40001", "40P01"] {
            let err = map_database_error("delete_order_cycle", Some(code), "could not serialize access");
            assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))), "{code}: {err:?}");
        }
        assert!(matches!(
            map_database_error("delete_order_cycle", Some("23503"), "violates foreign key constraint"),
            StoreError::Constraint(_)
        ));
        assert!(matches!(
            map_database_error("load_exchanges", None, "connection reset"),
            StoreError::Storage(_)
        ));
    }

    #[test]
    fn reads_use_one_read_only_snapshot() {
        assert!(READ_SNAPSHOT.starts_with("SET TRANSACTION"));
        assert!(READ_SNAPSHOT.contains("REPEATABLE READ"));
        assert!(READ_SNAPSHOT.contains("READ ONLY"));
    }

    #[test]
    fn blocking_outside_a_runtime_is_a_storage_error() {
        let err = block_on_runtime("snapshot", async {}).unwrap_err();
        match err {
            StoreError::Storage(msg) => assert!(msg.contains("requires a tokio runtime")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn current_thread_runtime_is_a_storage_error() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/cyclekit")
            .unwrap();
        let store = PostgresOrderCycleStore::new(pool);

        match OrderCycleStore::snapshot(&store) {
            Err(StoreError::Storage(msg)) => assert!(msg.contains("multi-threaded")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            OrderCycleStore::delete_order_cycle(&store, OrderCycleId::new()),
            Err(StoreError::Storage(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn multi_thread_runtime_drives_the_future() {
        assert_eq!(block_on_runtime("snapshot", async { 7 }).unwrap(), 7);
    }

    #[test]
    fn row_not_found_maps_to_storage() {
        assert!(matches!(
            map_sqlx_error("lock_order_cycle", sqlx::Error::RowNotFound),
            StoreError::Storage(_)
        ));
    }
}
