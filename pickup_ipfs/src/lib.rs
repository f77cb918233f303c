//! Client for the HTTP RPC API of a Kubo (go-ipfs) node.
//!
//! The node does the actual peer-to-peer work; pickup only asks it to dial
//! origin peers and to export a CAR archive for a CID.

use async_trait::async_trait;
use futures::StreamExt;
use pickup_core::{ByteStream, Retriever};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

fn default_api_url() -> String {
    "http://127.0.0.1:5001".to_owned()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Upper bound for one `swarm/connect` call.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Multiaddrs of the retrieval node, advertised as `delegates`.
    #[serde(default)]
    pub delegates: Vec<String>,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            delegates: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IpfsError {
    #[error("kubo rejected {command}: {message}")]
    Api { command: String, message: String },

    #[error("kubo returned HTTP {status} for {command}")]
    Status {
        command: String,
        status: reqwest::StatusCode,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Error body Kubo sends with non-2xx RPC responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KuboError {
    message: String,
}

/// Subset of `/api/v0/id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeId {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IpfsClient {
    http_client: reqwest::Client,
    api_url: Url,
    connect_timeout: Duration,
}

impl IpfsClient {
    pub fn new(config: &IpfsConfig) -> Result<Self, IpfsError> {
        Ok(Self {
            http_client: reqwest::Client::new(),
            api_url: Url::parse(&config.api_url)?,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn command_url(&self, command: &str, arg: Option<&str>) -> Result<Url, IpfsError> {
        let mut url = self.api_url.join(&format!("api/v0/{command}"))?;
        if let Some(arg) = arg {
            url.query_pairs_mut().append_pair("arg", arg);
        }
        Ok(url)
    }

    /// Issues an RPC call and turns Kubo's error envelope into an `IpfsError`.
    async fn call(
        &self,
        command: &str,
        arg: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, IpfsError> {
        let url = self.command_url(command, arg)?;
        let mut req = self.http_client.post(url);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        match res.json::<KuboError>().await {
            Ok(err) => Err(IpfsError::Api {
                command: command.to_owned(),
                message: err.message,
            }),
            Err(_) => Err(IpfsError::Status {
                command: command.to_owned(),
                status,
            }),
        }
    }

    pub async fn id(&self) -> Result<NodeId, IpfsError> {
        let res = self.call("id", None, Some(self.connect_timeout)).await?;
        Ok(res.json().await?)
    }
}

#[async_trait]
impl Retriever for IpfsClient {
    async fn connect(&self, origin: &str) -> anyhow::Result<()> {
        self.call("swarm/connect", Some(origin), Some(self.connect_timeout))
            .await?;
        debug!(origin, "connected to origin");
        Ok(())
    }

    async fn export_archive(&self, cid: &str) -> anyhow::Result<ByteStream> {
        // No overall timeout: large DAGs stream for a long time. The worker
        // bounds idle time between chunks instead.
        let res = self.call("dag/export", Some(cid), None).await?;
        Ok(Box::new(
            res.bytes_stream().map(|c| c.map_err(std::io::Error::other)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use pickup_core::testutil::CID_HELLO;
    use std::collections::HashMap;

    const GOOD_PEER: &str = "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWGood";

    async fn swarm_connect(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
        if q.get("arg").map(String::as_str) == Some(GOOD_PEER) {
            (StatusCode::OK, r#"{"Strings":["connect success"]}"#)
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"Message":"invalid multiaddr","Code":0,"Type":"error"}"#,
            )
        }
    }

    async fn dag_export(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
        match q.get("arg") {
            Some(cid) if cid == CID_HELLO => (StatusCode::OK, b"car-bytes".to_vec()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, b"boom".to_vec()),
        }
    }

    async fn mock_kubo() -> IpfsClient {
        let app = Router::new()
            .route("/api/v0/swarm/connect", post(swarm_connect))
            .route("/api/v0/dag/export", post(dag_export))
            .route(
                "/api/v0/id",
                post(|| async { r#"{"ID":"12D3KooWNode","Addresses":["/ip4/127.0.0.1/tcp/4001"]}"# }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        IpfsClient::new(&IpfsConfig {
            api_url: format!("http://{addr}"),
            connect_timeout_secs: 2,
            delegates: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn command_url_encodes_arg() {
        let client = IpfsClient::new(&IpfsConfig::default()).unwrap();
        let url = client.command_url("swarm/connect", Some("/ip4/1.2.3.4/tcp/1")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:5001/api/v0/swarm/connect?arg=%2Fip4%2F1.2.3.4%2Ftcp%2F1"
        );
    }

    #[tokio::test]
    async fn connect_reports_kubo_error_message() {
        let client = mock_kubo().await;
        client.connect(GOOD_PEER).await.unwrap();

        let err = client.connect("derp").await.unwrap_err();
        assert!(err.to_string().contains("invalid multiaddr"), "{err}");
    }

    #[tokio::test]
    async fn export_streams_body() {
        let client = mock_kubo().await;
        let mut stream = client.export_archive(CID_HELLO).await.unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"car-bytes");
    }

    #[tokio::test]
    async fn export_failure_without_envelope_reports_status() {
        let client = mock_kubo().await;
        let Err(err) = client.export_archive("bafyother").await else {
            panic!("called `Result::unwrap_err()` on an `Ok` value");
        };
        let err = err.downcast::<IpfsError>().unwrap();
        assert!(matches!(
            err,
            IpfsError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn id_parses_addresses() {
        let client = mock_kubo().await;
        let id = client.id().await.unwrap();
        assert_eq!(id.id, "12D3KooWNode");
        assert_eq!(id.addresses.len(), 1);
    }
}
