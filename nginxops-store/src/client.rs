//! Typed wrapper over the etcd v3 client.

use std::time::Duration;

use etcd_client::{Client, ConnectOptions, GetOptions};

use nginxops_core::config::StoreConfig;

use crate::error::StoreError;

/// Cheap-to-clone handle to the coordination store. Every reconciler takes
/// one by value at construction.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
}

impl StoreClient {
    /// Dial the configured endpoints with a 5-second connect timeout.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(Duration::from_secs(5));
        let client = Client::connect(cfg.endpoints.clone(), Some(options)).await?;
        Ok(Self { client })
    }

    /// Read a single key. A missing key is `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self.client.clone().get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    /// Range-read every key under `prefix`, in lexicographic key order.
    pub async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let resp = self
            .client
            .clone()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    /// Store a key-value pair, overwriting any previous value.
    pub async fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        self.client.clone().put(key, value.into(), None).await?;
        Ok(())
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client.clone().delete(key, None).await?;
        Ok(())
    }
}
