use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %url, "connected to Redis");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs).await
    }

    pub async fn del(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.del(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await
    }

    pub async fn incr(&self, key: &str) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_secs).await
    }

    pub async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .unwrap_or(false);
        Ok(set)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.zadd(key, member, score).await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.zrem(key, member).await
    }

    pub async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.zrange(key, start, stop).await
    }

    pub async fn zcard(&self, key: &str) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await
    }

    /// Atomically reads and removes the lowest-scored members of a sorted
    /// set (equivalent to `ZRANGE key 0 limit-1` immediately followed by
    /// `ZREM` of whatever came back), so two concurrent pollers draining the
    /// same queue never both walk away with the same member.
    pub async fn zpop_range(&self, key: &str, limit: isize) -> Result<Vec<String>, redis::RedisError> {
        const SCRIPT: &str = r#"
            local members = redis.call('ZRANGE', KEYS[1], 0, ARGV[1])
            if #members > 0 then
                redis.call('ZREM', KEYS[1], unpack(members))
            end
            return members
        "#;
        let mut conn = self.conn.clone();
        redis::Script::new(SCRIPT).key(key).arg(limit - 1).invoke_async(&mut conn).await
    }

    /// Atomically reads and removes up to `limit` members scored at or below
    /// `max_score`, for time-gated queues like the webhook retry set.
    pub async fn zpop_range_by_score(&self, key: &str, max_score: f64, limit: isize) -> Result<Vec<String>, redis::RedisError> {
        const SCRIPT: &str = r#"
            local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
            if #members > 0 then
                redis.call('ZREM', KEYS[1], unpack(members))
            end
            return members
        "#;
        let mut conn = self.conn.clone();
        redis::Script::new(SCRIPT).key(key).arg(max_score).arg(limit).invoke_async(&mut conn).await
    }

    pub async fn rate_limit_check(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, window_secs as i64).await?;
        }
        Ok(count <= limit)
    }

    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, redis::RedisError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn.clone();
        redis::cmd("MGET").arg(keys).query_async(&mut conn).await
    }

    pub async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>, redis::RedisError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.exists(key.as_str());
        }
        pipe.query_async(&mut conn).await
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // -- Streams (component H: consumer-group draining) --

    /// Create the stream and its consumer group if either doesn't exist yet.
    /// `MKSTREAM` makes this idempotent against a fresh stream name.
    pub async fn xgroup_create(&self, stream: &str, group: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, redis::RedisError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        cmd.query_async(&mut conn).await
    }

    pub async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: usize,
        count: usize,
    ) -> Result<Option<StreamReadReply>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .block(block_ms)
            .count(count);
        conn.xread_options(&[stream], &[">"], &opts).await
    }

    pub async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.xack(stream, group, &[id]).await
    }

    /// Reclaim entries idle longer than `min_idle_ms` from dead consumers, starting at `cursor`.
    /// Returns (next_cursor, claimed_ids).
    pub async fn xautoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: usize,
        cursor: &str,
        count: usize,
    ) -> Result<(String, Vec<String>), redis::RedisError> {
        let mut conn = self.conn.clone();
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        parse_xautoclaim_reply(reply)
    }

    /// Delete every key matching `pattern` via cursor-based SCAN, avoiding a
    /// blocking KEYS call. Used by secret rotation to clear the replay set.
    pub async fn scan_delete(&self, pattern: &str) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                deleted += keys.len() as u64;
                conn.del::<_, ()>(keys).await?;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    /// Count of pending (delivered, unacked) entries for a stream/group, used as the lag metric.
    pub async fn xpending_count(&self, stream: &str, group: &str) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let reply: Vec<redis::Value> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;
        match reply.first() {
            Some(redis::Value::Int(n)) => Ok((*n).max(0) as u64),
            _ => Ok(0),
        }
    }
}

fn parse_xautoclaim_reply(reply: redis::Value) -> Result<(String, Vec<String>), redis::RedisError> {
    use redis::{FromRedisValue, Value};

    let items = match reply {
        Value::Bulk(items) => items,
        other => {
            return Err(redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "unexpected XAUTOCLAIM reply",
                format!("{other:?}"),
            )));
        }
    };

    let mut iter = items.into_iter();
    let cursor = match iter.next() {
        Some(v) => String::from_redis_value(&v)?,
        None => "0".to_string(),
    };

    let mut ids = Vec::new();
    if let Some(Value::Bulk(entries)) = iter.next() {
        for entry in entries {
            if let Value::Bulk(pair) = entry {
                if let Some(id_value) = pair.into_iter().next() {
                    ids.push(String::from_redis_value(&id_value)?);
                }
            }
        }
    }

    Ok((cursor, ids))
}
