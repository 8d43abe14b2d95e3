//! Publishing the latest capture to the shared store.
//!
//! The store holds a single hash with the newest [`CaptureRecord`] and a
//! pub/sub channel that carries a `"<timestamp> <path>"` line per capture.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::capture::CaptureRecord;
use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Hash field holding the record timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Hash field holding the record path.
pub const PATH_FIELD: &str = "path";

/// Destination for capture records.
#[async_trait::async_trait]
pub trait StatePublisher: Send {
    /// Replace the stored record and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn publish(&mut self, record: &CaptureRecord) -> Result<()>;
}

/// Publishes capture records to Redis.
///
/// The connection is opened on first use and kept for the life of the
/// publisher. A failed command drops it, so the next call connects afresh.
pub struct RedisPublisher {
    client: redis::Client,
    conn: Option<MultiplexedConnection>,
    key: String,
    channel: String,
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher")
            .field("connection", self.client.get_connection_info())
            .field("connected", &self.conn.is_some())
            .field("key", &self.key)
            .field("channel", &self.channel)
            .finish()
    }
}

impl RedisPublisher {
    /// Create a publisher for the configured store.
    ///
    /// No connection is made until the first command.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection parameters are invalid.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        Ok(Self {
            client,
            conn: None,
            key: config.key.clone(),
            channel: config.channel.clone(),
        })
    }

    /// The hash key records are written to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The channel notifications are sent on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn connection(&mut self) -> Result<MultiplexedConnection> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        debug!("Connecting to {:?}", self.client.get_connection_info().addr);
        let conn = self.client.get_multiplexed_async_connection().await?;
        self.conn = Some(conn.clone());
        Ok(conn)
    }

    /// Read the latest record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a malformed
    /// record.
    pub async fn latest(&mut self) -> Result<Option<CaptureRecord>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = match conn.hgetall(&self.key).await {
            Ok(fields) => fields,
            Err(e) => {
                self.conn = None;
                return Err(e.into());
            }
        };
        record_from_fields(&self.key, &fields)
    }
}

#[async_trait::async_trait]
impl StatePublisher for RedisPublisher {
    async fn publish(&mut self, record: &CaptureRecord) -> Result<()> {
        let mut conn = self.connection().await?;
        let timestamp = record.timestamp_string();
        let path = record.path_string();

        let written = write_record(
            &mut conn,
            &self.key,
            &self.channel,
            &[(TIMESTAMP_FIELD, timestamp.as_str()), (PATH_FIELD, path.as_str())],
            &record.message(),
        )
        .await;

        if let Err(e) = written {
            self.conn = None;
            return Err(e.into());
        }
        info!(
            "Updated redis key {}: timestamp={} path={}",
            self.key, timestamp, path
        );
        Ok(())
    }
}

async fn write_record(
    conn: &mut MultiplexedConnection,
    key: &str,
    channel: &str,
    fields: &[(&str, &str)],
    message: &str,
) -> redis::RedisResult<()> {
    let () = conn.hset_multiple(key, fields).await?;
    let _receivers: i64 = conn.publish(channel, message).await?;
    Ok(())
}

/// Rebuild a record from the fields of the stored hash.
///
/// An empty hash means nothing has been captured yet.
///
/// # Errors
///
/// Returns an error if a field is missing or the timestamp is malformed.
pub fn record_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<CaptureRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let timestamp = fields
        .get(TIMESTAMP_FIELD)
        .ok_or_else(|| Error::invalid_record(key, "missing field 'timestamp'"))?;
    let path = fields
        .get(PATH_FIELD)
        .ok_or_else(|| Error::invalid_record(key, "missing field 'path'"))?;
    let timestamp = CaptureRecord::parse_timestamp(timestamp)
        .ok_or_else(|| Error::invalid_record(key, format!("bad timestamp '{timestamp}'")))?;
    Ok(Some(CaptureRecord::new(timestamp, path.into())))
}
