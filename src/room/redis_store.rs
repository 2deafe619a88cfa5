//! Redis-backed room store.
//!
//! Each room is a JSON document at `{prefix}:room:{room_id}`; live room ids
//! are also kept in the set `{prefix}:rooms` for counting. Every mutation
//! runs as a Lua script so the read, the condition check and the write
//! happen in one atomic step on the server.

use std::sync::Arc;

use async_trait::async_trait;
use redis::Script;
use serde::Deserialize;

use crate::redis::RedisPool;

use super::store::{
    AppendOutcome, DeleteOutcome, PutOutcome, RemoveOutcome, RoomStore, StoreBackend, StoreError,
};
use super::{Member, Room};

const PUT_IF_ABSENT_LUA: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('SADD', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

const APPEND_MEMBER_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return cjson.encode({status = 'not_found'})
end
local room = cjson.decode(raw)
local member = cjson.decode(ARGV[1])
for _, m in ipairs(room.members) do
    if m.connectionId == member.connectionId then
        return cjson.encode({status = 'already_member'})
    end
end
local previous = cjson.decode(raw).members
table.insert(room.members, member)
room.version = room.version + 1
redis.call('SET', KEYS[1], cjson.encode(room))
return cjson.encode({status = 'appended', members = previous, version = room.version})
"#;

const REMOVE_MEMBER_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return cjson.encode({status = 'not_found'})
end
local room = cjson.decode(raw)
local index = nil
for i, m in ipairs(room.members) do
    if m.connectionId == ARGV[1] then
        index = i
        break
    end
end
if not index then
    return cjson.encode({status = 'not_member'})
end
local removed = table.remove(room.members, index)
room.version = room.version + 1
if #room.members == 0 then
    redis.call('DEL', KEYS[1])
    redis.call('SREM', KEYS[2], room.roomId)
    return cjson.encode({status = 'emptied', removed = removed, version = room.version})
end
redis.call('SET', KEYS[1], cjson.encode(room))
return cjson.encode({status = 'removed', removed = removed, members = room.members, version = room.version})
"#;

const DELETE_IF_VERSION_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return cjson.encode({status = 'not_found'})
end
local room = cjson.decode(raw)
if room.version ~= tonumber(ARGV[1]) then
    return cjson.encode({status = 'condition_failed', version = room.version})
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], room.roomId)
return cjson.encode({status = 'deleted'})
"#;

/// Decoded reply of the mutation scripts.
///
/// cjson encodes an empty Lua table as `{}`, so scripts omit `members`
/// rather than send an empty list; `default` restores it.
#[derive(Debug, Deserialize)]
struct ScriptReply {
    status: String,
    #[serde(default)]
    members: Vec<Member>,
    removed: Option<Member>,
    version: Option<u64>,
}

impl ScriptReply {
    fn parse(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn version(&self) -> Result<u64, StoreError> {
        self.version
            .ok_or_else(|| StoreError::UnexpectedReply(format!("{} without version", self.status)))
    }

    fn unexpected(self) -> StoreError {
        StoreError::UnexpectedReply(self.status)
    }
}

pub struct RedisRoomStore {
    pool: Arc<RedisPool>,
    prefix: String,
    put_if_absent: Script,
    append_member: Script,
    remove_member: Script,
    delete_if_version: Script,
}

impl RedisRoomStore {
    pub fn new(pool: Arc<RedisPool>, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            put_if_absent: Script::new(PUT_IF_ABSENT_LUA),
            append_member: Script::new(APPEND_MEMBER_LUA),
            remove_member: Script::new(REMOVE_MEMBER_LUA),
            delete_if_version: Script::new(DELETE_IF_VERSION_LUA),
        }
    }

    fn room_key(&self, room_id: &str) -> String {
        format!("{}:room:{}", self.prefix, room_id)
    }

    fn index_key(&self) -> String {
        format!("{}:rooms", self.prefix)
    }

    async fn run(
        &self,
        script: &Script,
        room_id: &str,
        args: &[String],
    ) -> Result<ScriptReply, StoreError> {
        let room_key = self.room_key(room_id);
        let index_key = self.index_key();
        let raw: String = self
            .pool
            .invoke_script(script, &[room_key.as_str(), index_key.as_str()], args)
            .await?;
        ScriptReply::parse(&raw)
    }
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    #[tracing::instrument(skip(self), fields(backend = "redis"))]
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let key = self.room_key(room_id);
        let raw: Option<String> = self
            .pool
            .execute(|mut conn| async move {
                let value: redis::RedisResult<Option<String>> =
                    redis::cmd("GET").arg(&key).query_async(&mut conn).await;
                value
            })
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, room), fields(backend = "redis", room_id = %room.room_id))]
    async fn put_if_absent(&self, room: &Room) -> Result<PutOutcome, StoreError> {
        let room_key = self.room_key(&room.room_id);
        let index_key = self.index_key();
        let args = [serde_json::to_string(room)?, room.room_id.clone()];

        let created: i64 = self
            .pool
            .invoke_script(
                &self.put_if_absent,
                &[room_key.as_str(), index_key.as_str()],
                &args,
            )
            .await?;

        Ok(if created == 1 {
            PutOutcome::Created
        } else {
            PutOutcome::AlreadyExists
        })
    }

    #[tracing::instrument(skip(self, member), fields(backend = "redis"))]
    async fn append_member(
        &self,
        room_id: &str,
        member: &Member,
    ) -> Result<AppendOutcome, StoreError> {
        let args = [serde_json::to_string(member)?];
        let reply = self.run(&self.append_member, room_id, &args).await?;

        match reply.status.as_str() {
            "appended" => Ok(AppendOutcome::Appended {
                version: reply.version()?,
                previous: reply.members,
            }),
            "already_member" => Ok(AppendOutcome::AlreadyMember),
            "not_found" => Ok(AppendOutcome::NotFound),
            _ => Err(reply.unexpected()),
        }
    }

    #[tracing::instrument(skip(self), fields(backend = "redis"))]
    async fn remove_member(
        &self,
        room_id: &str,
        connection_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let args = [connection_id.to_string()];
        let reply = self.run(&self.remove_member, room_id, &args).await?;

        match reply.status.as_str() {
            "removed" | "emptied" => {
                let version = reply.version()?;
                let removed = reply
                    .removed
                    .ok_or_else(|| StoreError::UnexpectedReply("removal without member".into()))?;
                Ok(RemoveOutcome::Removed {
                    removed,
                    remaining: reply.members,
                    version,
                })
            }
            "not_member" => Ok(RemoveOutcome::NotMember),
            "not_found" => Ok(RemoveOutcome::NotFound),
            _ => Err(reply.unexpected()),
        }
    }

    #[tracing::instrument(skip(self), fields(backend = "redis"))]
    async fn delete_if_version(
        &self,
        room_id: &str,
        expected_version: u64,
    ) -> Result<DeleteOutcome, StoreError> {
        let args = [expected_version.to_string()];
        let reply = self.run(&self.delete_if_version, room_id, &args).await?;

        match reply.status.as_str() {
            "deleted" => Ok(DeleteOutcome::Deleted),
            "condition_failed" => Ok(DeleteOutcome::ConditionFailed {
                current_version: reply.version()?,
            }),
            "not_found" => Ok(DeleteOutcome::NotFound),
            _ => Err(reply.unexpected()),
        }
    }

    async fn room_count(&self) -> Result<usize, StoreError> {
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
