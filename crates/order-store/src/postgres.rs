use async_trait::async_trait;
use domain::{Delivery, Item, Order, Payment};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    OrderUid, Result,
    store::{OrderStore, PersistOutcome, RowCounts},
};

/// Primary key constraint of the `orders` table.
const ORDERS_PKEY: &str = "orders_pkey";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts the `orders` row unless one with the same uid exists.
    ///
    /// Returns false if the row already existed. A concurrent writer holding
    /// the same key makes this wait until it commits or rolls back.
    async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature, customer_id,
                                delivery_service, shardkey, sm_id, date_created, oof_shard)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_uid) DO NOTHING
            "#,
        )
        .bind(order.order_uid.as_str())
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(conn)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(sqlx::Error::Database(ref db_err))
                if db_err.is_unique_violation() && db_err.constraint() == Some(ORDERS_PKEY) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_delivery(
        conn: &mut PgConnection,
        order_uid: &OrderUid,
        delivery: &Delivery,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order_uid.as_str())
        .bind(&delivery.name)
        .bind(&delivery.phone)
        .bind(&delivery.zip)
        .bind(&delivery.city)
        .bind(&delivery.address)
        .bind(&delivery.region)
        .bind(&delivery.email)
        .execute(conn)
        .await?;

        Ok(())
    }

    async fn insert_payment(
        conn: &mut PgConnection,
        order_uid: &OrderUid,
        payment: &Payment,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment (order_uid, transaction, request_id, currency, provider, amount,
                                 payment_dt, bank, delivery_cost, goods_total, custom_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order_uid.as_str())
        .bind(&payment.transaction)
        .bind(&payment.request_id)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(&payment.bank)
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .execute(conn)
        .await?;

        Ok(())
    }

    async fn insert_item(conn: &mut PgConnection, order_uid: &OrderUid, item: &Item) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item (order_uid, chrt_id, track_number, price, rid, name, sale, size,
                              total_price, nm_id, brand, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order_uid.as_str())
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(conn)
        .await?;

        Ok(())
    }

    fn row_to_delivery(row: &PgRow) -> Result<Delivery> {
        Ok(Delivery {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            zip: row.try_get("zip")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            region: row.try_get("region")?,
            email: row.try_get("email")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        Ok(Payment {
            transaction: row.try_get("transaction")?,
            request_id: row.try_get("request_id")?,
            currency: row.try_get("currency")?,
            provider: row.try_get("provider")?,
            amount: row.try_get("amount")?,
            payment_dt: row.try_get("payment_dt")?,
            bank: row.try_get("bank")?,
            delivery_cost: row.try_get("delivery_cost")?,
            goods_total: row.try_get("goods_total")?,
            custom_fee: row.try_get("custom_fee")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<Item> {
        Ok(Item {
            chrt_id: row.try_get("chrt_id")?,
            track_number: row.try_get("track_number")?,
            price: row.try_get("price")?,
            rid: row.try_get("rid")?,
            name: row.try_get("name")?,
            sale: row.try_get("sale")?,
            size: row.try_get("size")?,
            total_price: row.try_get("total_price")?,
            nm_id: row.try_get("nm_id")?,
            brand: row.try_get("brand")?,
            status: row.try_get("status")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_uid = %order.order_uid, items = order.items.len()))]
    async fn persist(&self, order: &Order) -> Result<PersistOutcome> {
        let order_uid = &order.order_uid;

        // Start a transaction; dropping it on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        if !Self::insert_order(&mut *tx, order).await? {
            tx.rollback().await?;
            tracing::debug!("order already stored");
            metrics::counter!("order_store_persist_total", "outcome" => "duplicate").increment(1);
            return Ok(PersistOutcome::Duplicate);
        }

        Self::insert_delivery(&mut *tx, order_uid, &order.delivery).await?;
        Self::insert_payment(&mut *tx, order_uid, &order.payment).await?;
        for item in &order.items {
            Self::insert_item(&mut *tx, order_uid, item).await?;
        }

        tx.commit().await?;

        metrics::counter!("order_store_persist_total", "outcome" => "persisted").increment(1);
        Ok(PersistOutcome::Persisted)
    }

    async fn load(&self, order_uid: &OrderUid) -> Result<Option<Order>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT order_uid, track_number, entry, locale, internal_signature, customer_id,
                   delivery_service, shardkey, sm_id, date_created, oof_shard
            FROM orders
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let delivery_row = sqlx::query(
            "SELECT name, phone, zip, city, address, region, email FROM delivery WHERE order_uid = $1",
        )
        .bind(order_uid.as_str())
        .fetch_one(&self.pool)
        .await?;

        let payment_row = sqlx::query(
            r#"
            SELECT transaction, request_id, currency, provider, amount, payment_dt, bank,
                   delivery_cost, goods_total, custom_fee
            FROM payment
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid.as_str())
        .fetch_one(&self.pool)
        .await?;

        let item_rows = sqlx::query(
            r#"
            SELECT chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status
            FROM item
            WHERE order_uid = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_uid.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Order {
            order_uid: OrderUid::new(row.try_get::<String, _>("order_uid")?),
            track_number: row.try_get("track_number")?,
            entry: row.try_get("entry")?,
            delivery: Self::row_to_delivery(&delivery_row)?,
            payment: Self::row_to_payment(&payment_row)?,
            items: item_rows
                .into_iter()
                .map(Self::row_to_item)
                .collect::<Result<Vec<_>>>()?,
            locale: row.try_get("locale")?,
            internal_signature: row.try_get("internal_signature")?,
            customer_id: row.try_get("customer_id")?,
            delivery_service: row.try_get("delivery_service")?,
            shardkey: row.try_get("shardkey")?,
            sm_id: row.try_get("sm_id")?,
            date_created: row.try_get("date_created")?,
            oof_shard: row.try_get("oof_shard")?,
        }))
    }

    async fn row_counts(&self, order_uid: &OrderUid) -> Result<RowCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders   WHERE order_uid = $1) AS orders,
                (SELECT COUNT(*) FROM delivery WHERE order_uid = $1) AS delivery,
                (SELECT COUNT(*) FROM payment  WHERE order_uid = $1) AS payment,
                (SELECT COUNT(*) FROM item     WHERE order_uid = $1) AS items
            "#,
        )
        .bind(order_uid.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(RowCounts {
            orders: row.try_get::<i64, _>("orders")? as u64,
            delivery: row.try_get::<i64, _>("delivery")? as u64,
            payment: row.try_get::<i64, _>("payment")? as u64,
            items: row.try_get::<i64, _>("items")? as u64,
        })
    }
}
