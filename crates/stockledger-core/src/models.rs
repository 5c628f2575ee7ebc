use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::flags::{CalcFlag, TransFlag};

/// Identifies one item ledger within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub shop_id: String,
    pub barcode: String,
}

impl ItemKey {
    pub fn new(shop_id: impl Into<String>, barcode: impl Into<String>) -> Self {
        Self {
            shop_id: shop_id.into(),
            barcode: barcode.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.shop_id, self.barcode)
    }
}

/// Cost figures a replay derives for a single ledger line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCost {
    pub cost_per_unit: Decimal,
    pub total_cost: Decimal,
    pub balance_qty: Decimal,
    pub balance_amount: Decimal,
    pub balance_average: Decimal,
}

impl DerivedCost {
    /// Returns the running balance this line leaves behind.
    pub fn balance(&self) -> ItemBalance {
        ItemBalance {
            qty: self.balance_qty,
            amount: self.balance_amount,
            average_cost: self.balance_average,
        }
    }
}

/// One stock ledger line for an item.
///
/// `qty` is already normalized to the item's standard unit and `amount`
/// excludes tax. `derived` holds the values last written by a recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub row_id: i64,
    pub shop_id: String,
    pub barcode: String,
    pub doc_no: String,
    pub doc_date: DateTime<Utc>,
    pub trans_flag: TransFlag,
    pub calc_flag: CalcFlag,
    pub doc_ref: Option<String>,
    pub qty: Decimal,
    pub amount: Decimal,
    pub derived: DerivedCost,
}

impl Movement {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.shop_id, &self.barcode)
    }

    /// Reference document number, if one is set and non-blank.
    pub fn reference(&self) -> Option<&str> {
        self.doc_ref
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Orders movements by document date, then document number, then row id.
    pub fn replay_order(a: &Movement, b: &Movement) -> std::cmp::Ordering {
        a.doc_date
            .cmp(&b.doc_date)
            .then_with(|| a.doc_no.cmp(&b.doc_no))
            .then_with(|| a.row_id.cmp(&b.row_id))
    }

    pub fn snapshot(&self) -> MovementSnapshot {
        MovementSnapshot::from(self)
    }
}

/// Cached on-hand position kept on the item master.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBalance {
    pub qty: Decimal,
    pub amount: Decimal,
    pub average_cost: Decimal,
}

/// Serialized form of a movement as recorded by the position tracker.
///
/// Decimals are normalized so that `10.00` read back from the database and
/// `10` produced by a replay encode identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSnapshot {
    pub row_id: i64,
    pub doc_no: String,
    pub doc_date: DateTime<Utc>,
    pub trans_flag: i16,
    pub calc_flag: i16,
    pub doc_ref: Option<String>,
    pub qty: Decimal,
    pub amount: Decimal,
    pub cost_per_unit: Decimal,
    pub total_cost: Decimal,
    pub balance_qty: Decimal,
    pub balance_amount: Decimal,
    pub balance_average: Decimal,
}

impl MovementSnapshot {
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl From<&Movement> for MovementSnapshot {
    fn from(movement: &Movement) -> Self {
        Self {
            row_id: movement.row_id,
            doc_no: movement.doc_no.clone(),
            doc_date: movement.doc_date,
            trans_flag: movement.trans_flag.code(),
            calc_flag: movement.calc_flag.code(),
            doc_ref: movement.reference().map(str::to_string),
            qty: movement.qty.normalize(),
            amount: movement.amount.normalize(),
            cost_per_unit: movement.derived.cost_per_unit.normalize(),
            total_cost: movement.derived.total_cost.normalize(),
            balance_qty: movement.derived.balance_qty.normalize(),
            balance_amount: movement.derived.balance_amount.normalize(),
            balance_average: movement.derived.balance_average.normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn movement(doc_no: &str, row_id: i64, day: u32) -> Movement {
        Movement {
            row_id,
            shop_id: "shop-1".to_string(),
            barcode: "BC-1".to_string(),
            doc_no: doc_no.to_string(),
            doc_date: Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
            trans_flag: TransFlag::PURCHASE,
            calc_flag: CalcFlag::Inbound,
            doc_ref: None,
            qty: dec!(1),
            amount: dec!(10),
            derived: DerivedCost::default(),
        }
    }

    #[test]
    fn replay_order_uses_date_then_doc_no_then_row() {
        let mut rows = vec![
            movement("PO-2", 1, 2),
            movement("PO-1", 3, 2),
            movement("PO-1", 2, 2),
            movement("PO-9", 4, 1),
        ];
        rows.sort_by(Movement::replay_order);
        let order: Vec<i64> = rows.iter().map(|row| row.row_id).collect();
        assert_eq!(order, vec![4, 2, 3, 1]);
    }

    #[test]
    fn snapshot_normalizes_scale() {
        let mut stored = movement("PO-1", 1, 1);
        stored.derived.balance_average = dec!(10.00);
        let mut replayed = stored.clone();
        replayed.derived.balance_average = dec!(10);

        assert_eq!(
            stored.snapshot().encode().unwrap(),
            replayed.snapshot().encode().unwrap()
        );
    }

    #[test]
    fn blank_reference_is_none() {
        let mut row = movement("PO-1", 1, 1);
        row.doc_ref = Some("  ".to_string());
        assert_eq!(row.reference(), None);
        row.doc_ref = Some("TR-7".to_string());
        assert_eq!(row.reference(), Some("TR-7"));
    }
}
