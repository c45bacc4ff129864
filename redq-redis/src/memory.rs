//! In-process Redis backend.
//!
//! Emulates the list, sorted set, string and hash commands used across the
//! redq crates so queues, buckets and caches can run without a server.
//! Every connection opened by one [`MemoryConnector`] (and its clones)
//! shares the same data, so reconnecting keeps state, just like a real
//! server would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::{Command, Connection, ConnectionConfig, Connector, RedisError, Reply, Result};

#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    ZSet(HashMap<Vec<u8>, f64>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
}

#[derive(Debug, Default)]
struct Database {
    entries: HashMap<Vec<u8>, Entry>,
    expires: HashMap<Vec<u8>, Instant>,
}

impl Database {
    fn purge_expired(&mut self, key: &[u8]) {
        let expired = self
            .expires
            .get(key)
            .is_some_and(|at| Instant::now() >= *at);
        if expired {
            self.expires.remove(key);
            self.entries.remove(key);
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.purge_expired(key);
        self.expires.remove(key);
        self.entries.remove(key).is_some()
    }

    fn drop_if_empty(&mut self, key: &[u8]) {
        let empty = match self.entries.get(key) {
            Some(Entry::List(list)) => list.is_empty(),
            Some(Entry::ZSet(set)) => set.is_empty(),
            Some(Entry::Hash(hash)) => hash.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
            self.expires.remove(key);
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    databases: HashMap<i64, Database>,
}

#[derive(Debug, Default)]
struct Faults {
    commands: VecDeque<String>,
    connects: usize,
}

#[derive(Debug, Default)]
struct Shared {
    store: Mutex<Store>,
    faults: Mutex<Faults>,
    password: Mutex<Option<String>>,
    connects: AtomicUsize,
    seen: Mutex<HashMap<String, usize>>,
}

/// Connector for the in-process backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require this password on connect.
    pub fn with_password(self, password: impl Into<String>) -> Self {
        *self.shared.password.lock() = Some(password.into());
        self
    }

    /// Make the next `count` commands fail with `message`.
    ///
    /// Lost-connection messages surface as connection errors, anything else
    /// as a command error.
    pub fn fail_next(&self, count: usize, message: &str) {
        let mut faults = self.shared.faults.lock();
        for _ in 0..count {
            faults.commands.push_back(message.to_string());
        }
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.shared.faults.lock().connects += count;
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// How many times a command name was executed.
    pub fn commands_seen(&self, name: &str) -> usize {
        self.shared
            .seen
            .lock()
            .get(&name.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    /// Remove all data.
    pub fn flush_all(&self) {
        self.shared.store.lock().databases.clear();
    }
}

/// A connection to the in-process backend.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    database: i64,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MemoryConnection> {
        let (host, port) = config.endpoint()?;

        {
            let mut faults = self.shared.faults.lock();
            if faults.connects > 0 {
                faults.connects -= 1;
                return Err(RedisError::Connection(format!(
                    "Redis connect {}:{} fail.",
                    host, port
                )));
            }
        }

        let required = self.shared.password.lock().clone();
        if let Some(required) = required {
            match config.auth.as_deref() {
                Some(given) if given == required => {}
                _ => {
                    return Err(RedisError::Auth(
                        "WRONGPASS invalid username-password pair".to_string(),
                    ));
                }
            }
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryConnection {
            shared: self.shared.clone(),
            database: config.database,
        })
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply> {
        *self
            .shared
            .seen
            .lock()
            .entry(command.name().to_string())
            .or_insert(0) += 1;

        let fault = self.shared.faults.lock().commands.pop_front();
        if let Some(message) = fault {
            let err = RedisError::Connection(message.clone());
            return Err(if err.is_connection_lost() {
                err
            } else {
                RedisError::Command(message)
            });
        }

        if command.name() == "SELECT" {
            self.database = int_arg(command, 0)?;
            return Ok(ok());
        }

        let mut store = self.shared.store.lock();
        let db = store.databases.entry(self.database).or_default();
        apply(db, command)
    }
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

fn wrong_type() -> RedisError {
    RedisError::Command(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn arity(command: &Command) -> RedisError {
    RedisError::Command(format!(
        "ERR wrong number of arguments for '{}' command",
        command.name().to_lowercase()
    ))
}

fn bytes_arg(command: &Command, index: usize) -> Result<Vec<u8>> {
    command
        .args()
        .get(index)
        .map(|a| a.as_bytes().to_vec())
        .ok_or_else(|| arity(command))
}

fn int_arg(command: &Command, index: usize) -> Result<i64> {
    command
        .arg_str(index)
        .ok_or_else(|| arity(command))?
        .parse()
        .map_err(|_| RedisError::Command("ERR value is not an integer or out of range".to_string()))
}

fn float_arg(command: &Command, index: usize) -> Result<f64> {
    command
        .arg_str(index)
        .ok_or_else(|| arity(command))?
        .parse()
        .map_err(|_| RedisError::Command("ERR value is not a valid float".to_string()))
}

/// Parse a `ZRANGEBYSCORE` bound into (value, exclusive).
fn score_bound(raw: &str) -> Result<(f64, bool)> {
    let (raw, exclusive) = match raw.strip_prefix('(') {
        Some(rest) => (rest, true),
        None => (raw, false),
    };
    let value = match raw {
        "-inf" => f64::NEG_INFINITY,
        "+inf" | "inf" => f64::INFINITY,
        other => other
            .parse()
            .map_err(|_| RedisError::Command("ERR min or max is not a float".to_string()))?,
    };
    Ok((value, exclusive))
}

fn list_mut<'a>(db: &'a mut Database, key: &[u8]) -> Result<&'a mut VecDeque<Vec<u8>>> {
    db.purge_expired(key);
    match db
        .entries
        .entry(key.to_vec())
        .or_insert_with(|| Entry::List(VecDeque::new()))
    {
        Entry::List(list) => Ok(list),
        _ => Err(wrong_type()),
    }
}

fn zset_mut<'a>(db: &'a mut Database, key: &[u8]) -> Result<&'a mut HashMap<Vec<u8>, f64>> {
    db.purge_expired(key);
    match db
        .entries
        .entry(key.to_vec())
        .or_insert_with(|| Entry::ZSet(HashMap::new()))
    {
        Entry::ZSet(set) => Ok(set),
        _ => Err(wrong_type()),
    }
}

fn hash_mut<'a>(db: &'a mut Database, key: &[u8]) -> Result<&'a mut HashMap<Vec<u8>, Vec<u8>>> {
    db.purge_expired(key);
    match db
        .entries
        .entry(key.to_vec())
        .or_insert_with(|| Entry::Hash(HashMap::new()))
    {
        Entry::Hash(hash) => Ok(hash),
        _ => Err(wrong_type()),
    }
}

fn apply(db: &mut Database, command: &Command) -> Result<Reply> {
    let argc = command.args().len();

    let reply = match command.name() {
        "PING" => Reply::Status("PONG".to_string()),
        "AUTH" => ok(),

        "RPUSH" | "LPUSH" => {
            if argc < 2 {
                return Err(arity(command));
            }
            let key = bytes_arg(command, 0)?;
            let values = (1..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?;
            let list = list_mut(db, &key)?;
            for value in values {
                if command.name() == "RPUSH" {
                    list.push_back(value);
                } else {
                    list.push_front(value);
                }
            }
            Reply::Int(list.len() as i64)
        }
        "LPOP" | "RPOP" => {
            let key = bytes_arg(command, 0)?;
            let popped = match db.get(&key) {
                None => None,
                Some(Entry::List(list)) => {
                    if command.name() == "LPOP" {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    }
                }
                Some(_) => return Err(wrong_type()),
            };
            db.drop_if_empty(&key);
            popped.map(Reply::Bulk).unwrap_or(Reply::Nil)
        }
        "LLEN" => {
            let key = bytes_arg(command, 0)?;
            match db.get(&key) {
                None => Reply::Int(0),
                Some(Entry::List(list)) => Reply::Int(list.len() as i64),
                Some(_) => return Err(wrong_type()),
            }
        }
        "LRANGE" => {
            let key = bytes_arg(command, 0)?;
            let start = int_arg(command, 1)?;
            let stop = int_arg(command, 2)?;
            match db.get(&key) {
                None => Reply::Array(Vec::new()),
                Some(Entry::List(list)) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    // A stop still negative after offsetting selects nothing.
                    let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);
                    if start > stop {
                        Reply::Array(Vec::new())
                    } else {
                        Reply::Array(
                            list.iter()
                                .skip(start as usize)
                                .take((stop - start + 1) as usize)
                                .cloned()
                                .map(Reply::Bulk)
                                .collect(),
                        )
                    }
                }
                Some(_) => return Err(wrong_type()),
            }
        }

        "ZADD" => {
            if argc < 3 || argc % 2 == 0 {
                return Err(arity(command));
            }
            let key = bytes_arg(command, 0)?;
            let mut pairs = Vec::new();
            let mut i = 1;
            while i < argc {
                pairs.push((float_arg(command, i)?, bytes_arg(command, i + 1)?));
                i += 2;
            }
            let set = zset_mut(db, &key)?;
            let added = pairs
                .into_iter()
                .filter(|(score, member)| set.insert(member.clone(), *score).is_none())
                .count();
            Reply::Int(added as i64)
        }
        "ZREM" => {
            let key = bytes_arg(command, 0)?;
            let members = (1..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?;
            let removed = match db.get(&key) {
                None => 0,
                Some(Entry::ZSet(set)) => members
                    .iter()
                    .filter(|m| set.remove(m.as_slice()).is_some())
                    .count(),
                Some(_) => return Err(wrong_type()),
            };
            db.drop_if_empty(&key);
            Reply::Int(removed as i64)
        }
        "ZCARD" => {
            let key = bytes_arg(command, 0)?;
            match db.get(&key) {
                None => Reply::Int(0),
                Some(Entry::ZSet(set)) => Reply::Int(set.len() as i64),
                Some(_) => return Err(wrong_type()),
            }
        }
        "ZSCORE" => {
            let key = bytes_arg(command, 0)?;
            let member = bytes_arg(command, 1)?;
            match db.get(&key) {
                None => Reply::Nil,
                Some(Entry::ZSet(set)) => set
                    .get(&member)
                    .map(|s| Reply::Bulk(s.to_string().into_bytes()))
                    .unwrap_or(Reply::Nil),
                Some(_) => return Err(wrong_type()),
            }
        }
        "ZRANGEBYSCORE" => {
            let key = bytes_arg(command, 0)?;
            let (min, min_ex) = score_bound(command.arg_str(1).ok_or_else(|| arity(command))?)?;
            let (max, max_ex) = score_bound(command.arg_str(2).ok_or_else(|| arity(command))?)?;
            match db.get(&key) {
                None => Reply::Array(Vec::new()),
                Some(Entry::ZSet(set)) => {
                    let mut members: Vec<(&Vec<u8>, f64)> = set
                        .iter()
                        .map(|(m, s)| (m, *s))
                        .filter(|(_, s)| {
                            (if min_ex { *s > min } else { *s >= min })
                                && (if max_ex { *s < max } else { *s <= max })
                        })
                        .collect();
                    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                    Reply::Array(
                        members
                            .into_iter()
                            .map(|(m, _)| Reply::Bulk(m.clone()))
                            .collect(),
                    )
                }
                Some(_) => return Err(wrong_type()),
            }
        }

        "GET" => {
            let key = bytes_arg(command, 0)?;
            match db.get(&key) {
                None => Reply::Nil,
                Some(Entry::Str(value)) => Reply::Bulk(value.clone()),
                Some(_) => return Err(wrong_type()),
            }
        }
        "SET" => {
            let key = bytes_arg(command, 0)?;
            let value = bytes_arg(command, 1)?;
            let ttl = match command.arg_str(2).map(|s| s.to_uppercase()) {
                Some(opt) if opt == "EX" => Some(Duration::from_secs(int_arg(command, 3)?.max(0) as u64)),
                Some(_) => return Err(RedisError::Command("ERR syntax error".to_string())),
                None => None,
            };
            set_string(db, key, value, ttl);
            ok()
        }
        "SETEX" => {
            let key = bytes_arg(command, 0)?;
            let ttl = int_arg(command, 1)?;
            if ttl <= 0 {
                return Err(RedisError::Command(
                    "ERR invalid expire time in 'setex' command".to_string(),
                ));
            }
            let value = bytes_arg(command, 2)?;
            set_string(db, key, value, Some(Duration::from_secs(ttl as u64)));
            ok()
        }
        "DEL" => {
            let removed = (0..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?
                .iter()
                .filter(|key| db.remove(key))
                .count();
            Reply::Int(removed as i64)
        }
        "EXISTS" => {
            let keys = (0..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?;
            let count = keys.iter().filter(|key| db.get(key).is_some()).count();
            Reply::Int(count as i64)
        }

        "HGET" => {
            let key = bytes_arg(command, 0)?;
            let field = bytes_arg(command, 1)?;
            match db.get(&key) {
                None => Reply::Nil,
                Some(Entry::Hash(hash)) => hash.get(&field).cloned().map(Reply::Bulk).unwrap_or(Reply::Nil),
                Some(_) => return Err(wrong_type()),
            }
        }
        "HMGET" => {
            let key = bytes_arg(command, 0)?;
            let fields = (1..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?;
            match db.get(&key) {
                None => Reply::Array(fields.iter().map(|_| Reply::Nil).collect()),
                Some(Entry::Hash(hash)) => Reply::Array(
                    fields
                        .iter()
                        .map(|f| hash.get(f).cloned().map(Reply::Bulk).unwrap_or(Reply::Nil))
                        .collect(),
                ),
                Some(_) => return Err(wrong_type()),
            }
        }
        "HSET" => {
            if argc < 3 || argc % 2 == 0 {
                return Err(arity(command));
            }
            let key = bytes_arg(command, 0)?;
            let mut pairs = Vec::new();
            let mut i = 1;
            while i < argc {
                pairs.push((bytes_arg(command, i)?, bytes_arg(command, i + 1)?));
                i += 2;
            }
            let hash = hash_mut(db, &key)?;
            let added = pairs
                .into_iter()
                .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
                .count();
            Reply::Int(added as i64)
        }
        "HDEL" => {
            let key = bytes_arg(command, 0)?;
            let fields = (1..argc)
                .map(|i| bytes_arg(command, i))
                .collect::<Result<Vec<_>>>()?;
            let removed = match db.get(&key) {
                None => 0,
                Some(Entry::Hash(hash)) => fields.iter().filter(|f| hash.remove(f.as_slice()).is_some()).count(),
                Some(_) => return Err(wrong_type()),
            };
            db.drop_if_empty(&key);
            Reply::Int(removed as i64)
        }
        "HEXISTS" => {
            let key = bytes_arg(command, 0)?;
            let field = bytes_arg(command, 1)?;
            match db.get(&key) {
                None => Reply::Int(0),
                Some(Entry::Hash(hash)) => Reply::Int(i64::from(hash.contains_key(&field))),
                Some(_) => return Err(wrong_type()),
            }
        }

        other => {
            return Err(RedisError::Command(format!(
                "ERR unknown command '{}'",
                other.to_lowercase()
            )));
        }
    };

    Ok(reply)
}

fn set_string(db: &mut Database, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) {
    match ttl {
        Some(ttl) => {
            db.expires.insert(key.clone(), Instant::now() + ttl);
        }
        None => {
            db.expires.remove(&key);
        }
    }
    db.entries.insert(key, Entry::Str(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn conn() -> (MemoryConnection, MemoryConnector) {
        let connector = MemoryConnector::new();
        let conn = connector.connect(&ConnectionConfig::default()).await.unwrap();
        (conn, connector)
    }

    #[tokio::test]
    async fn test_list_fifo() {
        let (mut conn, _) = conn().await;
        conn.execute(&Command::new("RPUSH").key("l").arg("1").arg("2"))
            .await
            .unwrap();
        let first = conn.execute(&Command::new("LPOP").key("l")).await.unwrap();
        assert_eq!(first, Reply::Bulk(b"1".to_vec()));
        let len = conn.execute(&Command::new("LLEN").key("l")).await.unwrap();
        assert_eq!(len, Reply::Int(1));
    }

    #[tokio::test]
    async fn test_lpop_empty_is_nil() {
        let (mut conn, _) = conn().await;
        let reply = conn.execute(&Command::new("LPOP").key("none")).await.unwrap();
        assert!(reply.is_nil());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (mut conn, _) = conn().await;
        conn.execute(&Command::new("SET").key("s").arg("v")).await.unwrap();
        let err = conn
            .execute(&Command::new("RPUSH").key("s").arg("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_zrangebyscore_bounds() {
        let (mut conn, _) = conn().await;
        for (score, member) in [(5, "e"), (1, "a"), (3, "c")] {
            conn.execute(&Command::new("ZADD").key("z").arg(score).arg(member))
                .await
                .unwrap();
        }
        let all = conn
            .execute(&Command::new("ZRANGEBYSCORE").key("z").arg("-inf").arg("+inf"))
            .await
            .unwrap()
            .into_strings()
            .unwrap();
        assert_eq!(all, vec!["a", "c", "e"]);

        let some = conn
            .execute(&Command::new("ZRANGEBYSCORE").key("z").arg("(1").arg("3"))
            .await
            .unwrap()
            .into_strings()
            .unwrap();
        assert_eq!(some, vec!["c"]);
    }

    #[tokio::test]
    async fn test_lrange() {
        let (mut conn, _) = conn().await;
        conn.execute(&Command::new("RPUSH").key("l").arg("a").arg("b").arg("c"))
            .await
            .unwrap();
        let items = conn
            .execute(&Command::new("LRANGE").key("l").arg(0).arg(-1))
            .await
            .unwrap()
            .into_strings()
            .unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);

        let tail = conn
            .execute(&Command::new("LRANGE").key("l").arg(-2).arg(-1))
            .await
            .unwrap()
            .into_strings()
            .unwrap();
        assert_eq!(tail, vec!["b", "c"]);

        let none = conn
            .execute(&Command::new("LRANGE").key("l").arg(0).arg(-10))
            .await
            .unwrap()
            .into_strings()
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_hash_commands() {
        let (mut conn, _) = conn().await;
        let added = conn
            .execute(&Command::new("HSET").key("h").arg("f").arg("v"))
            .await
            .unwrap();
        assert_eq!(added, Reply::Int(1));
        let values = conn
            .execute(&Command::new("HMGET").key("h").arg("f").arg("g"))
            .await
            .unwrap()
            .into_optional_strings()
            .unwrap();
        assert_eq!(values, vec![Some("v".to_string()), None]);
        let removed = conn
            .execute(&Command::new("HDEL").key("h").arg("f"))
            .await
            .unwrap();
        assert_eq!(removed, Reply::Int(1));
        let exists = conn.execute(&Command::new("EXISTS").key("h")).await.unwrap();
        assert_eq!(exists, Reply::Int(0));
    }

    #[tokio::test]
    async fn test_databases_are_isolated() {
        let connector = MemoryConnector::new();
        let mut zero = connector.connect(&ConnectionConfig::default()).await.unwrap();
        let config = ConnectionConfig::builder().database(2).build();
        let mut two = connector.connect(&config).await.unwrap();

        zero.execute(&Command::new("SET").key("k").arg("0")).await.unwrap();
        let reply = two.execute(&Command::new("GET").key("k")).await.unwrap();
        assert!(reply.is_nil());
    }

    #[tokio::test]
    async fn test_password_required() {
        let connector = MemoryConnector::new().with_password("secret");
        let err = connector
            .connect(&ConnectionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RedisError::Auth(_)));

        let config = ConnectionConfig::builder().auth("secret").build();
        assert!(connector.connect(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let (mut conn, connector) = conn().await;
        connector.fail_next(1, "Connection lost");
        connector.fail_next(1, "ERR boom");

        let lost = conn.execute(&Command::new("PING")).await.unwrap_err();
        assert!(lost.is_connection_lost());
        let boom = conn.execute(&Command::new("PING")).await.unwrap_err();
        assert!(matches!(boom, RedisError::Command(_)));
        assert!(conn.execute(&Command::new("PING")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (mut conn, _) = conn().await;
        assert!(conn.execute(&Command::new("FLUSHALL")).await.is_err());
    }
}
