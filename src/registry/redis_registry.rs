//! Redis-backed connection registry.
//!
//! One hash per connection at `{prefix}:conn:{connection_id}` plus the set
//! `{prefix}:connections` of live ids for counting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::redis::RedisPool;
use crate::room::{StoreBackend, StoreError};

use super::{ConnectionRecord, ConnectionRegistry};

const FIELD_SERVER_ID: &str = "server_id";
const FIELD_ROOM_ID: &str = "room_id";
const FIELD_DISPLAY_NAME: &str = "display_name";
const FIELD_CONNECTED_AT: &str = "connected_at";

pub struct RedisConnectionRegistry {
    pool: Arc<RedisPool>,
    prefix: String,
    server_id: String,
}

impl RedisConnectionRegistry {
    pub fn new(pool: Arc<RedisPool>, prefix: String, server_id: String) -> Self {
        Self {
            pool,
            prefix,
            server_id,
        }
    }

    fn connection_key(&self, connection_id: &str) -> String {
        format!("{}:conn:{}", self.prefix, connection_id)
    }

    fn index_key(&self) -> String {
        format!("{}:connections", self.prefix)
    }

    async fn run_pipeline(&self, pipe: redis::Pipeline) -> Result<(), StoreError> {
        self.pool
            .execute(|mut conn| async move {
                let result: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
                result
            })
            .await?;
        Ok(())
    }
}

/// Rebuild a record from its hash fields; an empty hash means no entry
fn record_from_fields(
    connection_id: &str,
    mut fields: HashMap<String, String>,
) -> Result<Option<ConnectionRecord>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let server_id = fields.remove(FIELD_SERVER_ID).ok_or_else(|| {
        StoreError::UnexpectedReply(format!("connection {} has no server id", connection_id))
    })?;
    let connected_at = fields
        .get(FIELD_CONNECTED_AT)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    Ok(Some(ConnectionRecord {
        connection_id: connection_id.to_string(),
        server_id,
        room_id: fields.remove(FIELD_ROOM_ID),
        display_name: fields.remove(FIELD_DISPLAY_NAME),
        connected_at,
    }))
}

#[async_trait]
impl ConnectionRegistry for RedisConnectionRegistry {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    #[tracing::instrument(skip(self, record), fields(connection_id = %record.connection_id))]
    async fn put(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        let key = self.connection_key(&record.connection_id);

        let mut fields = vec![
            (FIELD_SERVER_ID, record.server_id.clone()),
            (FIELD_CONNECTED_AT, record.connected_at.to_string()),
        ];
        if let Some(room_id) = &record.room_id {
            fields.push((FIELD_ROOM_ID, room_id.clone()));
        }
        if let Some(name) = &record.display_name {
            fields.push((FIELD_DISPLAY_NAME, name.clone()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .sadd(self.index_key(), &record.connection_id)
            .ignore();

        self.run_pipeline(pipe).await
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let key = self.connection_key(connection_id);
        let fields: HashMap<String, String> = self
            .pool
            .execute(|mut conn| async move {
                let fields: redis::RedisResult<HashMap<String, String>> =
                    redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await;
                fields
            })
            .await?;

        record_from_fields(connection_id, fields)
    }

    #[tracing::instrument(skip(self, display_name))]
    async fn assign_room(
        &self,
        connection_id: &str,
        room_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        let key = self.connection_key(connection_id);
        let now = chrono::Utc::now().timestamp().to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_nx(&key, FIELD_SERVER_ID, &self.server_id)
            .ignore()
            .hset_nx(&key, FIELD_CONNECTED_AT, now)
            .ignore()
            .hset_multiple(
                &key,
                &[(FIELD_ROOM_ID, room_id), (FIELD_DISPLAY_NAME, display_name)],
            )
            .ignore()
            .sadd(self.index_key(), connection_id)
            .ignore();

        self.run_pipeline(pipe).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError> {
        let key = self.connection_key(connection_id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .srem(self.index_key(), connection_id)
            .ignore();

        let replies: Vec<i64> = self
            .pool
            .execute(|mut conn| async move {
                let result: redis::RedisResult<Vec<i64>> = pipe.query_async(&mut conn).await;
                result
            })
            .await?;

        Ok(replies.first().copied().unwrap_or_default() > 0)
    }

    async fn connection_count(&self) -> Result<usize, StoreError> {
        let key = self.index_key();
        let count = self
            .pool
            .execute(|mut conn| async move {
                let count: redis::RedisResult<usize> =
                    redis::cmd("SCARD").arg(&key).query_async(&mut conn).await;
                count
            })
            .await?;
        Ok(count)
    }
}
