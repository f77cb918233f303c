use anyhow::{Context, Result};
use pickup_core::{PinQuery, Status};
use pickup_node::PickupNode;
use pickup_node::config::NodeConfigStatus;
use tracing::warn;

use crate::PinsCmd;

pub async fn run_pins(node: &PickupNode, cmd: PinsCmd) -> Result<()> {
    if node.config.status == NodeConfigStatus::Memory {
        warn!("status store is in-memory, records of a running node are not visible here");
    }
    match cmd {
        PinsCmd::List {
            user,
            status,
            limit,
        } => {
            let mut query = PinQuery::default().with_limit(limit);
            if let Some(statuses) = status {
                for s in statuses.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    query = query.with_status(s.parse::<Status>()?);
                }
            }
            let results = node.pin_service().list(&user, &query).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        PinsCmd::Get { user, request_id } => {
            let record = node
                .pin_service()
                .get(&user, &request_id)
                .await
                .with_context(|| format!("pin {request_id} of user {user}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}
