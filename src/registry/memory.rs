//! In-memory connection registry for single-instance deployments

use async_trait::async_trait;
use dashmap::DashMap;

use crate::room::{StoreBackend, StoreError};

use super::{ConnectionRecord, ConnectionRegistry};

pub struct MemoryConnectionRegistry {
    server_id: String,
    records: DashMap<String, ConnectionRecord>,
}

impl MemoryConnectionRegistry {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        self.records
            .insert(record.connection_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        Ok(self.records.get(connection_id).map(|r| r.value().clone()))
    }

    async fn assign_room(
        &self,
        connection_id: &str,
        room_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        let mut record = self
            .records
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionRecord::new(connection_id, self.server_id.as_str()));
        record.room_id = Some(room_id.to_string());
        record.display_name = Some(display_name.to_string());
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(connection_id).is_some())
    }

    async fn connection_count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}
