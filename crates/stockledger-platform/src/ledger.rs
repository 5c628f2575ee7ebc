use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};
use stockledger_core::{
    CalcFlag, DerivedCost, ItemBalance, ItemKey, LedgerGateway, Movement, TransFlag,
};
use tracing::warn;

const FETCH_MOVEMENTS_SQL: &str = r#"
    SELECT
        d.id::bigint AS id,
        d.shopid,
        d.barcode,
        d.docno,
        h.docdate::timestamptz AS docdate,
        h.transflag::smallint AS transflag,
        d.calcflag::smallint AS calcflag,
        NULLIF(TRIM(d.docref), '') AS docref,
        (CASE
            WHEN d.dividevalue = 0 THEN d.qty
            ELSE d.qty * d.standvalue / d.dividevalue
        END)::numeric AS qty,
        COALESCE(d.sumamountexcludevat, 0)::numeric AS amount,
        COALESCE(d.costperunit, 0)::numeric AS costperunit,
        COALESCE(d.totalcost, 0)::numeric AS totalcost,
        COALESCE(d.balanceqty, 0)::numeric AS balanceqty,
        COALESCE(d.balanceamount, 0)::numeric AS balanceamount,
        COALESCE(d.balanceaverage, 0)::numeric AS balanceaverage
    FROM stock_transaction_detail d
    JOIN stock_transaction h ON h.shopid = d.shopid AND h.docno = d.docno
    WHERE d.shopid = $1 AND d.barcode = $2 AND h.iscancel = false
    ORDER BY h.docdate, d.docno, d.id
"#;

/// Only existing item-master rows are updated; the ledger never creates items.
const UPDATE_BALANCE_SQL: &str = r#"
    UPDATE productbarcode
    SET balanceqty = $3::numeric,
        balanceamount = $4::numeric,
        averagecost = $5::numeric,
        updatedat = $6
    WHERE shopid = $1 AND barcode = $2
"#;

/// Stock ledger stored in Postgres, item balances on `productbarcode`.
#[derive(Clone)]
pub struct PgLedgerGateway {
    pool: PgPool,
}

impl PgLedgerGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerGateway for PgLedgerGateway {
    async fn fetch_ordered_movements(&self, key: &ItemKey) -> Result<Vec<Movement>> {
        let rows = sqlx::query(FETCH_MOVEMENTS_SQL)
            .bind(&key.shop_id)
            .bind(&key.barcode)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to load stock ledger for {key}"))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn commit_changes(&self, key: &ItemKey, changes: &[Movement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for change in changes {
            let result = sqlx::query(
                r#"
                UPDATE stock_transaction_detail
                SET costperunit = $3::numeric,
                    totalcost = $4::numeric,
                    balanceqty = $5::numeric,
                    balanceamount = $6::numeric,
                    balanceaverage = $7::numeric
                WHERE id = $1 AND shopid = $2
                "#,
            )
            .bind(change.row_id)
            .bind(&key.shop_id)
            .bind(change.derived.cost_per_unit)
            .bind(change.derived.total_cost)
            .bind(change.derived.balance_qty)
            .bind(change.derived.balance_amount)
            .bind(change.derived.balance_average)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                anyhow::bail!("ledger row {} of {key} disappeared during recompute", change.row_id);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_balance(&self, key: &ItemKey) -> Result<Option<ItemBalance>> {
        let maybe_row = sqlx::query(
            r#"
            SELECT
                COALESCE(balanceqty, 0)::numeric AS balanceqty,
                COALESCE(balanceamount, 0)::numeric AS balanceamount,
                COALESCE(averagecost, 0)::numeric AS averagecost
            FROM productbarcode
            WHERE shopid = $1 AND barcode = $2
            "#,
        )
        .bind(&key.shop_id)
        .bind(&key.barcode)
        .fetch_optional(&self.pool)
        .await?;

        maybe_row
            .map(|row| {
                Ok(ItemBalance {
                    qty: row.try_get("balanceqty")?,
                    amount: row.try_get("balanceamount")?,
                    average_cost: row.try_get("averagecost")?,
                })
            })
            .transpose()
    }

    async fn update_balance(&self, key: &ItemKey, balance: &ItemBalance) -> Result<()> {
        let result = sqlx::query(UPDATE_BALANCE_SQL)
            .bind(&key.shop_id)
            .bind(&key.barcode)
            .bind(balance.qty)
            .bind(balance.amount)
            .bind(balance.average_cost)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                "no productbarcode row for item, cached balance not written"
            );
        }
        Ok(())
    }
}

fn movement_from_row(row: &PgRow) -> Result<Movement> {
    let doc_date: DateTime<Utc> = row.try_get("docdate")?;
    let trans_flag: i16 = row.try_get("transflag")?;
    let calc_flag: i16 = row.try_get("calcflag")?;

    Ok(Movement {
        row_id: row.try_get("id")?,
        shop_id: row.try_get("shopid")?,
        barcode: row.try_get("barcode")?,
        doc_no: row.try_get("docno")?,
        doc_date,
        trans_flag: TransFlag(trans_flag),
        calc_flag: CalcFlag::from(calc_flag),
        doc_ref: row.try_get("docref")?,
        qty: row.try_get::<Decimal, _>("qty")?,
        amount: row.try_get::<Decimal, _>("amount")?,
        derived: DerivedCost {
            cost_per_unit: row.try_get("costperunit")?,
            total_cost: row.try_get("totalcost")?,
            balance_qty: row.try_get("balanceqty")?,
            balance_amount: row.try_get("balanceamount")?,
            balance_average: row.try_get("balanceaverage")?,
        },
    })
}
