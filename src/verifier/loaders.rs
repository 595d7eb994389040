use std::{fmt::Debug, path::PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use url::Url;

use crate::{
    config::BaseUrl,
    core::{
        circuits::CircuitId,
        util::{base_request, fetch, AsyncHttpClient},
    },
};

const IPFS_SCHEME: &str = "ipfs";

/// Source of circuit verification keys.
#[async_trait]
pub trait KeyLoader: Debug {
    async fn load(&self, circuit_id: CircuitId) -> Result<Vec<u8>>;
}

/// Source of claim schema documents.
#[async_trait]
pub trait SchemaLoader: Debug {
    async fn load(&self, url: &str) -> Result<Vec<u8>>;
}

/// Reads `<directory>/<circuitId>.json`.
#[derive(Debug, Clone)]
pub struct FsKeyLoader {
    directory: PathBuf,
}

impl FsKeyLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl KeyLoader for FsKeyLoader {
    async fn load(&self, circuit_id: CircuitId) -> Result<Vec<u8>> {
        let path = self.directory.join(format!("{circuit_id}.json"));
        tokio::fs::read(&path)
            .await
            .context(format!("failed to read verification key {}", path.display()))
    }
}

/// Fetches schemas over HTTP(S), and `ipfs://` schemas through a gateway.
#[derive(Debug)]
pub struct HttpSchemaLoader<C> {
    client: C,
    ipfs_gateway: BaseUrl,
}

impl<C> HttpSchemaLoader<C> {
    pub fn new(client: C, ipfs_gateway: BaseUrl) -> Self {
        Self {
            client,
            ipfs_gateway,
        }
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        let parsed: Url = url.parse().context(format!("invalid schema url '{url}'"))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            IPFS_SCHEME => {
                let cid = url
                    .strip_prefix("ipfs://")
                    .filter(|cid| !cid.is_empty())
                    .context(format!("ipfs url '{url}' has no content identifier"))?;
                self.ipfs_gateway
                    .join(&format!("ipfs/{cid}"))
                    .context(format!("unable to build gateway url for '{url}'"))
            }
            other => bail!("unsupported schema url scheme '{other}'"),
        }
    }
}

#[async_trait]
impl<C: AsyncHttpClient + Debug> SchemaLoader for HttpSchemaLoader<C> {
    async fn load(&self, url: &str) -> Result<Vec<u8>> {
        let location = self.resolve(url)?;
        let request = base_request()
            .method("GET")
            .uri(location.as_str())
            .body(vec![])
            .context("failed to build schema request")?;
        fetch(&self.client, request)
            .await
            .context(format!("failed to fetch schema {url}"))
    }
}
