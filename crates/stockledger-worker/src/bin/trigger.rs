//! Publishes a recompute trigger by hand.
//!
//! ```bash
//! REDIS_URL=redis://localhost stockledger-trigger SHOP_ID BARCODE [BARCODE...]
//! ```

use anyhow::{Context, Result};
use stockledger_core::{
    StockProcessEvent,
    events::{STOCK_PROCESS_BULK_UPDATED, STOCK_PROCESS_UPDATED},
};
use stockledger_platform::RedisBus;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let shop_id = args
        .next()
        .context("usage: stockledger-trigger SHOP_ID BARCODE [BARCODE...]")?;
    let events: Vec<StockProcessEvent> = args
        .map(|barcode| StockProcessEvent {
            shop_id: shop_id.clone(),
            barcode,
        })
        .collect();
    if events.is_empty() {
        anyhow::bail!("at least one BARCODE is required");
    }

    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
    let redis = RedisBus::connect(&redis_url)?;

    let receivers = if let [event] = events.as_slice() {
        let receivers = redis.publish_json(STOCK_PROCESS_UPDATED, event).await?;
        println!("queued recompute for {}::{}", event.shop_id, event.barcode);
        receivers
    } else {
        let receivers = redis
            .publish_json(STOCK_PROCESS_BULK_UPDATED, &events)
            .await?;
        println!("queued recompute for {} items of {shop_id}", events.len());
        receivers
    };
    if receivers == 0 {
        eprintln!("warning: no stockledger-worker is subscribed, the trigger was lost");
    }

    Ok(())
}
