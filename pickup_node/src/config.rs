use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use pickup_api::ApiConfig;
use pickup_ipfs::IpfsConfig;
use pickup_worker::WorkerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickupNodeConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ipfs: IpfsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub status: NodeConfigStatus,
    #[serde(default)]
    pub queue: NodeConfigQueue,
    /// Destination stores by bucket name.
    #[serde(default)]
    pub store: BTreeMap<String, NodeConfigStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum NodeConfigStore {
    Memory(pickup_store_memory::MemoryStoreConfig),
    Local(pickup_store_local::LocalStoreConfig),
    S3(pickup_store_s3::S3StoreConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum NodeConfigStatus {
    #[default]
    Memory,
    Redb {
        path: PathBuf,
    },
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_receives() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum NodeConfigQueue {
    Memory {
        #[serde(default = "default_visibility_timeout_secs")]
        visibility_timeout_secs: u64,
        #[serde(default = "default_max_receives")]
        max_receives: u32,
    },
    Redb {
        path: PathBuf,
        #[serde(default = "default_visibility_timeout_secs")]
        visibility_timeout_secs: u64,
        #[serde(default = "default_max_receives")]
        max_receives: u32,
    },
}

impl Default for NodeConfigQueue {
    fn default() -> Self {
        NodeConfigQueue::Memory {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receives: default_max_receives(),
        }
    }
}

impl NodeConfigQueue {
    pub fn visibility_timeout(&self) -> Duration {
        match self {
            NodeConfigQueue::Memory {
                visibility_timeout_secs,
                ..
            }
            | NodeConfigQueue::Redb {
                visibility_timeout_secs,
                ..
            } => Duration::from_secs(*visibility_timeout_secs),
        }
    }

    pub fn max_receives(&self) -> u32 {
        match self {
            NodeConfigQueue::Memory { max_receives, .. }
            | NodeConfigQueue::Redb { max_receives, .. } => *max_receives,
        }
    }
}
