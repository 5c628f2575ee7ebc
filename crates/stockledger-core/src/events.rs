use serde::{Deserialize, Serialize};

use crate::models::ItemKey;

pub const STOCK_PROCESS_CREATED: &str = "stock.process.created";
pub const STOCK_PROCESS_UPDATED: &str = "stock.process.updated";
pub const STOCK_PROCESS_DELETED: &str = "stock.process.deleted";
pub const STOCK_PROCESS_BULK_CREATED: &str = "stock.process.bulk.created";
pub const STOCK_PROCESS_BULK_UPDATED: &str = "stock.process.bulk.updated";
pub const STOCK_PROCESS_BULK_DELETED: &str = "stock.process.bulk.deleted";

/// Every channel that triggers a recompute. All of them are handled the same way.
pub const RECOMPUTE_CHANNELS: [&str; 6] = [
    STOCK_PROCESS_CREATED,
    STOCK_PROCESS_UPDATED,
    STOCK_PROCESS_DELETED,
    STOCK_PROCESS_BULK_CREATED,
    STOCK_PROCESS_BULK_UPDATED,
    STOCK_PROCESS_BULK_DELETED,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockProcessEvent {
    #[serde(rename = "shopid", alias = "shopID", alias = "tenant")]
    pub shop_id: String,
    #[serde(alias = "item")]
    pub barcode: String,
}

impl From<StockProcessEvent> for ItemKey {
    fn from(event: StockProcessEvent) -> Self {
        ItemKey::new(event.shop_id, event.barcode)
    }
}

/// Recompute trigger as it arrives on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecomputeRequest {
    Single(StockProcessEvent),
    Bulk(Vec<StockProcessEvent>),
}

impl RecomputeRequest {
    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    pub fn into_keys(self) -> Vec<ItemKey> {
        match self {
            Self::Single(event) => vec![event.into()],
            Self::Bulk(events) => events.into_iter().map(ItemKey::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_with_aliases() {
        let request = RecomputeRequest::decode(r#"{"shopID":"S1","barcode":"B1"}"#).unwrap();
        assert_eq!(request.into_keys(), vec![ItemKey::new("S1", "B1")]);

        let request = RecomputeRequest::decode(r#"{"tenant":"S2","item":"B2"}"#).unwrap();
        assert_eq!(request.into_keys(), vec![ItemKey::new("S2", "B2")]);
    }

    #[test]
    fn decodes_bulk_array() {
        let request = RecomputeRequest::decode(
            r#"[{"shopid":"S1","barcode":"B1"},{"shopid":"S1","barcode":"B2"}]"#,
        )
        .unwrap();
        assert!(matches!(request, RecomputeRequest::Bulk(_)));
        assert_eq!(request.into_keys().len(), 2);
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(RecomputeRequest::decode(r#"{"shopid":"S1"}"#).is_err());
        assert!(RecomputeRequest::decode("not json").is_err());
    }
}
