//! Redis online store
//!
//! ## Layout
//!
//! - `{prefix}__tables__`: hash of `{feature}__{variant}` → value type (JSON),
//!   the table catalog. `HSETNX` makes creation race-safe across workers.
//! - `{prefix}{feature}__{variant}`: hash of entity → value (tagged JSON).
//!
//! A created table starts empty, and deletion drops the catalog entry and the
//! data hash in one `MULTI`/`EXEC`.
//!
//! All handles share one multiplexed [`ConnectionManager`]; batch writes are
//! pipelined so a chunk costs one round-trip.

use async_trait::async_trait;
use featureforge_core::{
    online_table_key, ConfigCodec, Error, FeatureValue, OnlineStore, OnlineStoreTable, Provider,
    ProviderInfo, ProviderType, Result, SerializedConfig, ValueType,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Redis online store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port`
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    /// Prepended to every key this store writes
    #[serde(default)]
    pub prefix: String,
    /// Pipeline batch size for `set_batch`
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
}

fn default_write_batch_size() -> usize {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: String::new(),
            db: 0,
            prefix: String::new(),
            write_batch_size: default_write_batch_size(),
        }
    }
}

impl ConfigCodec for RedisConfig {
    const KIND: &'static str = "redis";
}

impl RedisConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Connection URL understood by the redis client
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }

    fn catalog_key(&self) -> String {
        format!("{}__tables__", self.prefix)
    }
}

fn encode_value(value: &FeatureValue) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode_value(raw: &str) -> Result<FeatureValue> {
    serde_json::from_str(raw).map_err(|e| Error::deserialization("online value", e))
}

/// Clears whatever a stale handle left under a freshly claimed table
fn reset_table_pipeline(data_key: &str) -> Pipeline {
    let mut pipe = Pipeline::new();
    pipe.del(data_key).ignore();
    pipe
}

/// Drops the catalog entry and the data hash together
fn delete_table_pipeline(catalog_key: &str, name: &str, data_key: &str) -> Pipeline {
    let mut pipe = Pipeline::new();
    pipe.atomic().hdel(catalog_key, name).del(data_key).ignore();
    pipe
}

/// Decodes the config and connects
pub async fn redis_online_factory(config: SerializedConfig) -> Result<Arc<dyn Provider>> {
    let redis_config = RedisConfig::from_serialized(&config)?;
    let store = RedisOnlineStore::connect(redis_config, config).await?;
    Ok(Arc::new(store))
}

pub struct RedisOnlineStore {
    info: ProviderInfo,
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisOnlineStore {
    pub async fn connect(config: RedisConfig, serialized: SerializedConfig) -> Result<Self> {
        let client = Client::open(config.url())
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Redis connection manager error: {}", e))
        })?;

        tracing::info!(addr = %config.addr, db = config.db, prefix = %config.prefix, "Connected to Redis");
        Ok(Self {
            info: ProviderInfo::new(ProviderType::RedisOnline, serialized),
            conn,
            config,
        })
    }

    fn table(&self, feature: &str, variant: &str) -> RedisOnlineTable {
        RedisOnlineTable {
            conn: self.conn.clone(),
            key: online_table_key(&self.config.prefix, feature, variant),
            write_batch_size: self.config.write_batch_size.max(1),
        }
    }
}

impl Provider for RedisOnlineStore {
    fn provider_type(&self) -> &ProviderType {
        &self.info.provider_type
    }

    fn config(&self) -> &SerializedConfig {
        &self.info.config
    }

    fn as_online_store(self: Arc<Self>) -> Result<Arc<dyn OnlineStore>> {
        Ok(self)
    }
}

#[async_trait]
impl OnlineStore for RedisOnlineStore {
    async fn create_table(
        &self,
        feature: &str,
        variant: &str,
        value_type: ValueType,
    ) -> Result<Arc<dyn OnlineStoreTable>> {
        let mut conn = self.conn.clone();
        let name = online_table_key("", feature, variant);
        let created: bool = conn
            .hset_nx(self.config.catalog_key(), &name, serde_json::to_string(&value_type)?)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis HSETNX error: {}", e)))?;
        if !created {
            return Err(Error::already_exists("online table", name));
        }

        reset_table_pipeline(&online_table_key(&self.config.prefix, feature, variant))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis DEL error: {}", e)))?;

        tracing::debug!(table = %name, ?value_type, "Created Redis online table");
        Ok(Arc::new(self.table(feature, variant)))
    }

    async fn get_table(&self, feature: &str, variant: &str) -> Result<Arc<dyn OnlineStoreTable>> {
        let mut conn = self.conn.clone();
        let name = online_table_key("", feature, variant);
        let exists: bool = conn
            .hexists(self.config.catalog_key(), &name)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis HEXISTS error: {}", e)))?;
        if !exists {
            return Err(Error::not_found("online table", name));
        }
        Ok(Arc::new(self.table(feature, variant)))
    }

    async fn delete_table(&self, feature: &str, variant: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let name = online_table_key("", feature, variant);
        let data_key = online_table_key(&self.config.prefix, feature, variant);
        let (removed,): (i64,) =
            delete_table_pipeline(&self.config.catalog_key(), &name, &data_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis MULTI error: {}", e)))?;
        if removed == 0 {
            return Err(Error::not_found("online table", name));
        }

        tracing::debug!(table = %name, "Deleted Redis online table");
        Ok(())
    }
}

/// Entity → value hash for one feature variant
pub struct RedisOnlineTable {
    conn: ConnectionManager,
    key: String,
    write_batch_size: usize,
}

#[async_trait]
impl OnlineStoreTable for RedisOnlineTable {
    async fn set(&self, entity: &str, value: FeatureValue) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&self.key, entity, encode_value(&value)?)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis HSET error: {}", e)))?;
        Ok(())
    }

    async fn get(&self, entity: &str) -> Result<FeatureValue> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(&self.key, entity)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis HGET error: {}", e)))?;
        let raw = raw.ok_or_else(|| Error::not_found("entity", entity))?;
        decode_value(&raw)
    }

    async fn set_batch(&self, records: Vec<(String, FeatureValue)>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        for chunk in records.chunks(self.write_batch_size) {
            let mut pipe = Pipeline::new();
            for (entity, value) in chunk {
                pipe.hset(&self.key, entity, encode_value(value)?);
            }
            pipe.query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis pipeline error: {}", e)))?;
        }

        tracing::debug!(table = %self.key, rows_written = records.len(), "Redis batch write complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.addr, "localhost:6379");
        assert_eq!(config.write_batch_size, 1000);
        assert_eq!(config.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_url_with_password() {
        let config = RedisConfig {
            password: "secret".to_string(),
            db: 3,
            ..RedisConfig::new("cache:6380")
        };
        assert_eq!(config.url(), "redis://:secret@cache:6380/3");
    }

    #[test]
    fn test_config_codec_defaults_optional_fields() {
        let config =
            RedisConfig::from_serialized(&SerializedConfig::from(r#"{"addr":"r:6379"}"#)).unwrap();
        assert_eq!(config.db, 0);
        assert_eq!(config.write_batch_size, 1000);
        assert_eq!(config.catalog_key(), "__tables__");

        assert!(RedisConfig::from_serialized(&SerializedConfig::empty()).is_err());
    }

    #[tokio::test]
    async fn test_factory_rejects_bad_config_before_connecting() {
        let err = redis_online_factory(SerializedConfig::from("not json"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Deserialization { kind: "redis", .. }));
    }

    #[test]
    fn test_stored_values_keep_their_variant() {
        for value in [
            FeatureValue::Json(serde_json::json!(5)),
            FeatureValue::Json(serde_json::Value::Null),
            FeatureValue::ArrayFloat(vec![]),
            FeatureValue::ArrayString(vec![]),
            FeatureValue::Float(3.0),
        ] {
            let raw = encode_value(&value).unwrap();
            assert_eq!(decode_value(&raw).unwrap(), value);
        }
        assert!(matches!(
            decode_value("42"),
            Err(Error::Deserialization { kind: "online value", .. })
        ));
    }

    fn packed(pipe: &Pipeline) -> String {
        String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned()
    }

    #[test]
    fn test_delete_drops_catalog_and_data_in_one_transaction() {
        let commands = packed(&delete_table_pipeline("p__tables__", "f__v1", "pf__v1"));
        let multi = commands.find("MULTI").unwrap();
        let hdel = commands.find("HDEL").unwrap();
        let del = commands.rfind("\r\nDEL\r\n").unwrap();
        let exec = commands.find("EXEC").unwrap();
        assert!(multi < hdel && hdel < del && del < exec);
        assert!(commands.contains("pf__v1"));
    }

    #[test]
    fn test_create_clears_leftover_data() {
        let commands = packed(&reset_table_pipeline("pf__v1"));
        assert!(commands.contains("DEL"));
        assert!(commands.contains("pf__v1"));
        assert!(!commands.contains("MULTI"));
    }
}
