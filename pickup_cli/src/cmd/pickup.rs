use anyhow::{Result, anyhow};
use pickup_core::Destination;
use pickup_node::PickupNode;
use pickup_worker::PickupOutcome;
use tracing::info;

pub async fn run_pickup(
    node: &PickupNode,
    cid: &str,
    origins: &[String],
    bucket: Option<String>,
) -> Result<()> {
    // Same canonical form the API stores, so both resolve to one object.
    let cid = pickup_core::Pin::new(cid).validate()?.to_string();
    let bucket = bucket.unwrap_or_else(|| node.config.api.bucket.clone());
    let destination = Destination::for_cid(&bucket, &cid);

    match node.pickup().run(&cid, origins, &destination).await {
        Ok(PickupOutcome::Stored { bytes }) => {
            info!(bytes, "stored {}/{}", destination.bucket, destination.key);
        }
        Ok(PickupOutcome::AlreadyPresent) => {
            info!("already stored at {}/{}", destination.bucket, destination.key);
        }
        Err(reason) => return Err(anyhow!("pickup of {cid} failed: {}", reason.as_str())),
    }
    Ok(())
}
