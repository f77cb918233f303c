//! A pickup node: the pinning API and the worker pool wired to configured
//! backends.

use crate::config::{NodeConfigQueue, NodeConfigStatus, NodeConfigStore, PickupNodeConfig};
use anyhow::Context;
use pickup_api::{ApiState, Authenticator, PinService};
use pickup_core::{DispatchQueue, Retriever, StatusStore, Store, store::StoreResult};
use pickup_ipfs::{IpfsClient, NodeId};
use pickup_queue_memory::MemoryQueue;
use pickup_queue_redb::RedbQueue;
use pickup_status_memory::MemoryStatusStore;
use pickup_status_redb::RedbStatusStore;
use pickup_store_local::LocalStore;
use pickup_store_memory::MemoryStore;
use pickup_store_s3::S3Store;
use pickup_worker::{Buckets, Pickup, Worker};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod config;

pub fn create_store(config: NodeConfigStore) -> StoreResult<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config {
        NodeConfigStore::Memory(_) => Arc::new(MemoryStore::new()),
        NodeConfigStore::Local(config) => Arc::new(LocalStore::create(config)),
        NodeConfigStore::S3(config) => Arc::new(S3Store::create(config)?),
    };
    Ok(store)
}

pub fn create_buckets(stores: &BTreeMap<String, NodeConfigStore>) -> StoreResult<Buckets> {
    let mut buckets = Buckets::new();
    for (name, config) in stores {
        let store = create_store(config.clone())
            .with_context(|| format!("failed to open store for bucket '{name}'"))?;
        buckets.insert(name.clone(), store);
    }
    Ok(buckets)
}

pub fn create_status_store(config: &NodeConfigStatus) -> anyhow::Result<Arc<dyn StatusStore>> {
    let status: Arc<dyn StatusStore> = match config {
        NodeConfigStatus::Memory => Arc::new(MemoryStatusStore::new()),
        NodeConfigStatus::Redb { path } => Arc::new(
            RedbStatusStore::open(path)
                .with_context(|| format!("failed to open status store at {}", path.display()))?,
        ),
    };
    Ok(status)
}

pub fn create_queue(config: &NodeConfigQueue) -> anyhow::Result<Arc<dyn DispatchQueue>> {
    let visibility_timeout = config.visibility_timeout();
    let max_receives = config.max_receives();
    let queue: Arc<dyn DispatchQueue> = match config {
        NodeConfigQueue::Memory { .. } => {
            Arc::new(MemoryQueue::new(visibility_timeout, max_receives))
        }
        NodeConfigQueue::Redb { path, .. } => Arc::new(
            RedbQueue::open(path, visibility_timeout, max_receives)
                .with_context(|| format!("failed to open queue at {}", path.display()))?,
        ),
    };
    Ok(queue)
}

/// Which halves of the node to run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub api: bool,
    pub worker: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            api: true,
            worker: true,
        }
    }
}

/// Constructed collaborators of a node.
#[derive(Debug, Clone)]
pub struct PickupNode {
    pub config: PickupNodeConfig,
    pub status: Arc<dyn StatusStore>,
    pub queue: Arc<dyn DispatchQueue>,
    pub buckets: Buckets,
    pub retriever: Arc<dyn Retriever>,
}

impl PickupNode {
    /// Opens every backend named in `config`, using the Kubo node from
    /// `[ipfs]` as retriever.
    pub fn open(config: PickupNodeConfig) -> anyhow::Result<Self> {
        let retriever = Arc::new(IpfsClient::new(&config.ipfs)?);
        Self::with_retriever(config, retriever)
    }

    pub fn with_retriever(
        config: PickupNodeConfig,
        retriever: Arc<dyn Retriever>,
    ) -> anyhow::Result<Self> {
        let status = create_status_store(&config.status)?;
        let queue = create_queue(&config.queue)?;
        let buckets = create_buckets(&config.store)?;
        if !buckets.contains_key(&config.api.bucket) {
            warn!(
                bucket = %config.api.bucket,
                "API bucket has no configured store, pickups will fail"
            );
        }
        Ok(Self {
            config,
            status,
            queue,
            buckets,
            retriever,
        })
    }

    pub fn pin_service(&self) -> PinService {
        PinService::new(
            self.status.clone(),
            self.queue.clone(),
            &self.config.api,
            self.config.ipfs.delegates.clone(),
        )
    }

    pub fn pickup(&self) -> Pickup {
        Pickup::new(
            self.retriever.clone(),
            self.buckets.clone(),
            self.config.worker.clone(),
        )
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.queue.clone(), self.status.clone(), self.pickup())
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            service: self.pin_service(),
            auth: Arc::new(Authenticator::new(&self.config.api.tokens)),
        }
    }

    /// Runs the selected halves until `cancel` fires.
    pub async fn run(&self, options: RunOptions, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut tasks = tokio::task::JoinSet::new();

        if options.api {
            let listener = tokio::net::TcpListener::bind(&self.config.api.listen)
                .await
                .with_context(|| format!("failed to bind {}", self.config.api.listen))?;
            let state = self.api_state();
            let cancel = cancel.clone();
            tasks.spawn(async move { pickup_api::serve(listener, state, cancel).await });
        }
        if options.worker {
            let worker = self.worker();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                worker.run(cancel).await;
                Ok::<_, anyhow::Error>(())
            });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .context("node task panicked")
                .and_then(|inner| inner);
            if let Err(e) = outcome {
                // One half failing takes the other down with it.
                cancel.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Asks the Kubo node for its identity. A node that does not answer is
/// logged but not fatal: pickups fail as `retrieval_failed` until it is up.
pub async fn check_retrieval_node(client: &IpfsClient) -> Option<NodeId> {
    match client.id().await {
        Ok(id) => {
            info!(peer_id = %id.id, addresses = ?id.addresses, "retrieval node reachable");
            Some(id)
        }
        Err(e) => {
            warn!(error = %e, "retrieval node not reachable");
            None
        }
    }
}

pub async fn run_node(config: PickupNodeConfig, options: RunOptions) -> anyhow::Result<()> {
    let client = IpfsClient::new(&config.ipfs)?;
    if options.worker {
        check_retrieval_node(&client).await;
    }
    let node = PickupNode::with_retriever(config, Arc::new(client))?;
    let cancel = CancellationToken::new();

    let mut run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { node.run(options, cancel).await })
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            cancel.cancel();
            run.await?
        }
        finished = &mut run => finished?,
    }
}
