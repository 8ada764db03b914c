use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, UserId, VoucherId, VoucherReservation};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SeckillError};
use crate::store::{OrderRecord, OrderStore, SeckillVoucher, VoucherStore};

/// PostgreSQL-backed durable store for vouchers and orders.
#[derive(Clone)]
pub struct PostgresSeckillStore {
    pool: PgPool,
}

impl PostgresSeckillStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `database_url` over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_voucher(row: PgRow) -> Result<SeckillVoucher> {
        Ok(SeckillVoucher {
            voucher_id: VoucherId::new(row.try_get("voucher_id")?),
            stock: row.try_get("stock")?,
            begin_time: row.try_get("begin_time")?,
            end_time: row.try_get("end_time")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        Ok(OrderRecord {
            order_id: OrderId::new(row.try_get("order_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            voucher_id: VoucherId::new(row.try_get("voucher_id")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl VoucherStore for PostgresSeckillStore {
    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seckill_vouchers (voucher_id, stock, begin_time, end_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (voucher_id)
            DO UPDATE SET stock = $2, begin_time = $3, end_time = $4
            "#,
        )
        .bind(voucher.voucher_id.as_i64())
        .bind(voucher.stock)
        .bind(voucher.begin_time)
        .bind(voucher.end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_seckill_voucher(&self, voucher_id: VoucherId) -> Result<Option<SeckillVoucher>> {
        let row = sqlx::query(
            r#"
            SELECT voucher_id, stock, begin_time, end_time
            FROM seckill_vouchers
            WHERE voucher_id = $1
            "#,
        )
        .bind(voucher_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_voucher).transpose()
    }
}

#[async_trait]
impl OrderStore for PostgresSeckillStore {
    async fn fulfill(&self, reservation: &VoucherReservation) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Dropping the transaction on any early return rolls it back.
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT order_id FROM voucher_orders WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(reservation.user_id.as_uuid())
        .bind(reservation.voucher_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(SeckillError::DuplicateOrder {
                user_id: reservation.user_id,
                voucher_id: reservation.voucher_id,
            });
        }

        let updated = sqlx::query(
            "UPDATE seckill_vouchers SET stock = stock - 1 WHERE voucher_id = $1 AND stock > 0",
        )
        .bind(reservation.voucher_id.as_i64())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(SeckillError::StockDepleted(reservation.voucher_id));
        }

        sqlx::query(
            r#"
            INSERT INTO voucher_orders (order_id, user_id, voucher_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reservation.order_id.as_i64())
        .bind(reservation.user_id.as_uuid())
        .bind(reservation.voucher_id.as_i64())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // Concurrent fulfillment attempts race to this insert; the
            // unique constraint is the transactional dedupe of record.
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_user_voucher")
            {
                return SeckillError::DuplicateOrder {
                    user_id: reservation.user_id,
                    voucher_id: reservation.voucher_id,
                };
            }
            SeckillError::Database(e)
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, user_id, voucher_id, created_at
            FROM voucher_orders
            WHERE user_id = $1 AND voucher_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(voucher_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, user_id, voucher_id, created_at
            FROM voucher_orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }
}
