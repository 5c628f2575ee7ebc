use rust_decimal::{Decimal, RoundingStrategy};
use stockledger_core::{ItemBalance, ItemKey};

pub const DEFAULT_PRECISION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundApplied {
    /// Rounded amount added to the running value.
    pub amount: Decimal,
    /// Cost per unit of this line alone.
    pub line_average: Decimal,
    pub running_average: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundApplied {
    pub cost_removed: Decimal,
    pub average_cost_used: Decimal,
}

/// Running weighted-average cost of one item during a single replay.
///
/// Every monetary figure is rounded half away from zero to `precision`
/// decimal places. The average is zero whenever the quantity is zero.
#[derive(Debug, Clone)]
pub struct CostAccumulator {
    key: ItemKey,
    precision: u32,
    qty: Decimal,
    amount: Decimal,
    average_cost: Decimal,
}

impl CostAccumulator {
    pub fn new(key: ItemKey, precision: u32) -> Self {
        Self {
            key,
            precision,
            qty: Decimal::ZERO,
            amount: Decimal::ZERO,
            average_cost: Decimal::ZERO,
        }
    }

    pub fn with_opening(key: ItemKey, precision: u32, qty: Decimal, amount: Decimal) -> Self {
        let mut accumulator = Self::new(key, precision);
        accumulator.qty = qty;
        accumulator.amount = accumulator.round(amount);
        accumulator.refresh_average();
        accumulator
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn balance_qty(&self) -> Decimal {
        self.qty
    }

    pub fn balance_amount(&self) -> Decimal {
        self.amount
    }

    pub fn average_cost(&self) -> Decimal {
        self.average_cost
    }

    pub fn balance(&self) -> ItemBalance {
        ItemBalance {
            qty: self.qty,
            amount: self.amount,
            average_cost: self.average_cost,
        }
    }

    pub fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.precision, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn apply_inbound(&mut self, qty: Decimal, amount: Decimal) -> InboundApplied {
        let amount = self.round(amount);
        self.qty += qty;
        self.amount += amount;
        let line_average = self.divide(amount, qty);
        self.refresh_average();

        InboundApplied {
            amount,
            line_average,
            running_average: self.average_cost,
        }
    }

    /// Receives `qty` valued at the current running average.
    pub fn apply_inbound_at_average(&mut self, qty: Decimal) -> InboundApplied {
        let amount = self.average_cost * qty;
        self.apply_inbound(qty, amount)
    }

    pub fn apply_outbound(&mut self, qty: Decimal) -> OutboundApplied {
        let rate = self.average_cost;
        self.remove(qty, rate)
    }

    /// Issues `qty` at a rate taken from another document.
    pub fn apply_outbound_with_external_cost(
        &mut self,
        qty: Decimal,
        external_cost: Decimal,
    ) -> OutboundApplied {
        self.remove(qty, external_cost)
    }

    fn remove(&mut self, qty: Decimal, rate: Decimal) -> OutboundApplied {
        let cost_removed = self.round(rate * qty);
        self.qty -= qty;
        self.amount -= cost_removed;
        self.refresh_average();

        OutboundApplied {
            cost_removed,
            average_cost_used: rate,
        }
    }

    fn refresh_average(&mut self) {
        self.average_cost = self.divide(self.amount, self.qty);
    }

    fn divide(&self, numerator: Decimal, denominator: Decimal) -> Decimal {
        if denominator.is_zero() {
            return Decimal::ZERO;
        }
        numerator
            .checked_div(denominator)
            .map(|value| self.round(value))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;

    fn key() -> ItemKey {
        ItemKey::new("shop-1", "BC-1")
    }

    #[test]
    fn inbound_lines_accumulate_with_rounding() {
        let mut acc = CostAccumulator::new(key(), DEFAULT_PRECISION);
        let first = acc.apply_inbound(dec!(100), dec!(1000));
        assert_eq!(first.line_average, dec!(10));
        assert_eq!(first.running_average, dec!(10));

        let second = acc.apply_inbound(dec!(2), dec!(22));
        assert_eq!(second.line_average, dec!(11));
        assert_eq!(acc.balance_qty(), dec!(102));
        assert_eq!(acc.balance_amount(), dec!(1022.00));
        assert_eq!(acc.average_cost(), dec!(10.02));
    }

    #[test]
    fn inbound_amount_is_rounded_before_accumulating() {
        let mut acc = CostAccumulator::new(key(), DEFAULT_PRECISION);
        acc.apply_inbound(dec!(3), dec!(10.005));
        assert_eq!(acc.balance_amount(), dec!(10.01));
        assert_eq!(acc.average_cost(), dec!(3.34));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let acc = CostAccumulator::new(key(), DEFAULT_PRECISION);
        assert_eq!(acc.round(dec!(2.345)), dec!(2.35));
        assert_eq!(acc.round(dec!(2.355)), dec!(2.36));
        assert_eq!(acc.round(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn outbound_uses_running_average() {
        let mut acc = CostAccumulator::with_opening(key(), DEFAULT_PRECISION, dec!(100), dec!(1000));
        assert_eq!(acc.average_cost(), dec!(10.00));

        let issued = acc.apply_outbound(dec!(3));
        assert_eq!(issued.cost_removed, dec!(30.00));
        assert_eq!(issued.average_cost_used, dec!(10.00));
        assert_eq!(acc.balance_qty(), dec!(97));
        assert_eq!(acc.balance_amount(), dec!(970.00));
        assert_eq!(acc.average_cost(), dec!(10.00));
    }

    #[test]
    fn external_cost_ignores_running_average() {
        let mut acc = CostAccumulator::with_opening(key(), DEFAULT_PRECISION, dec!(20), dec!(400));
        let issued = acc.apply_outbound_with_external_cost(dec!(5), dec!(7.50));
        assert_eq!(issued.cost_removed, dec!(37.50));
        assert_eq!(issued.average_cost_used, dec!(7.50));
        assert_eq!(acc.balance_amount(), dec!(362.50));
        assert_eq!(acc.balance_qty(), dec!(15));
    }

    #[test]
    fn emptying_stock_resets_average_then_reseeds() {
        let mut acc = CostAccumulator::new(key(), DEFAULT_PRECISION);
        acc.apply_inbound(dec!(4), dec!(10));
        let issued = acc.apply_outbound(dec!(4));
        assert_eq!(issued.cost_removed, dec!(10.00));
        assert_eq!(acc.balance_qty(), Decimal::ZERO);
        assert_eq!(acc.average_cost(), Decimal::ZERO);

        acc.apply_inbound(dec!(2), dec!(9));
        assert_eq!(acc.average_cost(), dec!(4.50));
    }

    #[test]
    fn return_at_average_keeps_valuation() {
        let mut acc = CostAccumulator::with_opening(key(), DEFAULT_PRECISION, dec!(10), dec!(125));
        let applied = acc.apply_inbound_at_average(dec!(2));
        assert_eq!(applied.amount, dec!(25.00));
        assert_eq!(applied.line_average, dec!(12.50));
        assert_eq!(acc.average_cost(), dec!(12.50));
        assert_eq!(acc.balance_amount(), dec!(150.00));
    }

    proptest! {
        #[test]
        fn average_is_always_amount_over_qty(
            lines in prop::collection::vec((1i64..500, 0i64..100_000, any::<bool>()), 1..40)
        ) {
            let mut acc = CostAccumulator::new(key(), DEFAULT_PRECISION);
            for (qty, cents, inbound) in lines {
                let qty = Decimal::from(qty);
                if inbound {
                    acc.apply_inbound(qty, Decimal::new(cents, 2));
                } else {
                    acc.apply_outbound(qty);
                }
                if acc.balance_qty().is_zero() {
                    prop_assert_eq!(acc.average_cost(), Decimal::ZERO);
                } else {
                    prop_assert_eq!(acc.average_cost(), acc.round(acc.balance_amount() / acc.balance_qty()));
                }
                prop_assert_eq!(acc.balance_amount(), acc.round(acc.balance_amount()));
            }
        }
    }
}
