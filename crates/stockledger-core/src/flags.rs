use std::fmt;

use serde::{Deserialize, Serialize};

/// Document transaction type carried on every ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransFlag(pub i16);

impl TransFlag {
    pub const PURCHASE: TransFlag = TransFlag(12);
    pub const PURCHASE_RETURN: TransFlag = TransFlag(16);
    pub const SALE_INVOICE: TransFlag = TransFlag(44);
    pub const SALE_INVOICE_RETURN: TransFlag = TransFlag(48);
    pub const STOCK_PICKUP: TransFlag = TransFlag(56);
    pub const STOCK_RETURN_PRODUCT: TransFlag = TransFlag(58);
    pub const STOCK_RECEIVE_PRODUCT: TransFlag = TransFlag(60);
    pub const STOCK_ADJUSTMENT: TransFlag = TransFlag(66);
    pub const STOCK_TRANSFER: TransFlag = TransFlag(72);

    pub fn code(self) -> i16 {
        self.0
    }

    pub fn cost_sourcing(self) -> CostSourcing {
        match self {
            Self::STOCK_PICKUP
            | Self::STOCK_RETURN_PRODUCT
            | Self::STOCK_ADJUSTMENT
            | Self::STOCK_TRANSFER => CostSourcing::ReferencedDocument,
            Self::SALE_INVOICE_RETURN => CostSourcing::RunningAverage,
            _ => CostSourcing::Line,
        }
    }
}

impl fmt::Display for TransFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a movement's cost rate comes from during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostSourcing {
    /// Inbound lines use their own amount, outbound lines the running average.
    Line,
    /// Inbound lines are valued at the running average, leaving it unchanged.
    RunningAverage,
    /// The rate is borrowed from an earlier document named by `doc_ref`.
    ReferencedDocument,
}

/// Stock direction of a ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i16", into = "i16")]
pub enum CalcFlag {
    Inbound,
    Outbound,
}

impl CalcFlag {
    pub fn code(self) -> i16 {
        match self {
            Self::Inbound => 1,
            Self::Outbound => -1,
        }
    }
}

impl From<i16> for CalcFlag {
    fn from(value: i16) -> Self {
        if value > 0 {
            Self::Inbound
        } else {
            Self::Outbound
        }
    }
}

impl From<CalcFlag> for i16 {
    fn from(value: CalcFlag) -> Self {
        value.code()
    }
}
