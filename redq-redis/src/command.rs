//! Command and reply model.
//!
//! Commands keep their key arguments tagged so that a connection-level key
//! prefix can be applied to keys without touching values.

use crate::{RedisError, Result};

/// One command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// A key; receives the connection's key prefix.
    Key(String),
    /// Any other argument, passed through untouched.
    Value(Vec<u8>),
}

impl CommandArg {
    /// Raw bytes of the argument.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Key(key) => key.as_bytes(),
            Self::Value(value) => value,
        }
    }
}

/// A Redis command ready to be executed by a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<CommandArg>,
}

impl Command {
    /// Start a command, e.g. `Command::new("RPUSH")`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            args: Vec::new(),
        }
    }

    /// Append a key argument.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.args.push(CommandArg::Key(key.into()));
        self
    }

    /// Append a value argument.
    pub fn arg(mut self, value: impl ToArg) -> Self {
        self.args.push(CommandArg::Value(value.to_arg()));
        self
    }

    /// Command name, upper-cased.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in order.
    pub fn args(&self) -> &[CommandArg] {
        &self.args
    }

    /// Argument at `index` as UTF-8, if present and valid.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|a| std::str::from_utf8(a.as_bytes()).ok())
    }

    /// Copy of this command with `prefix` prepended to every key argument.
    pub fn prefixed(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self.clone();
        }
        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                CommandArg::Key(key) => CommandArg::Key(format!("{}{}", prefix, key)),
                other => other.clone(),
            })
            .collect();
        Self {
            name: self.name.clone(),
            args,
        }
    }

    /// Convert into a `redis` crate command.
    pub fn to_redis_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(&self.name);
        for arg in &self.args {
            cmd.arg(arg.as_bytes());
        }
        cmd
    }
}

/// Conversion into a raw command argument.
pub trait ToArg {
    /// Encode as bytes.
    fn to_arg(&self) -> Vec<u8>;
}

impl ToArg for &str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for &String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

macro_rules! to_arg_display {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
            }
        )*
    };
}

to_arg_display!(i32, i64, u32, u64, usize, f64);

/// A decoded Redis reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Null bulk / missing value.
    Nil,
    /// Integer reply.
    Int(i64),
    /// Bulk string reply.
    Bulk(Vec<u8>),
    /// Status reply such as `OK` or `PONG`.
    Status(String),
    /// Array reply.
    Array(Vec<Reply>),
}

impl Reply {
    /// `true` for [`Reply::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// `true` for an `OK` status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Status(s) if s.eq_ignore_ascii_case("OK"))
    }

    /// Interpret as an integer.
    ///
    /// Bulk strings holding digits are accepted, `Nil` reads as 0.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Nil => Ok(0),
            Self::Bulk(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RedisError::Command("reply is not an integer".to_string())),
            Self::Status(s) => s
                .parse()
                .map_err(|_| RedisError::Command(format!("reply '{}' is not an integer", s))),
            Self::Array(_) => Err(RedisError::Command(
                "expected integer, got array".to_string(),
            )),
        }
    }

    /// Interpret as an optional string.
    pub fn into_string(self) -> Result<Option<String>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| RedisError::Command(format!("reply is not UTF-8: {}", e))),
            Self::Status(s) => Ok(Some(s)),
            Self::Int(n) => Ok(Some(n.to_string())),
            Self::Array(_) => Err(RedisError::Command(
                "expected string, got array".to_string(),
            )),
        }
    }

    /// Interpret as a list of optional strings (e.g. `HMGET`).
    pub fn into_optional_strings(self) -> Result<Vec<Option<String>>> {
        match self {
            Self::Array(items) => items.into_iter().map(Reply::into_string).collect(),
            Self::Nil => Ok(Vec::new()),
            other => Ok(vec![other.into_string()?]),
        }
    }

    /// Interpret as a list of strings, skipping nils (e.g. `ZRANGEBYSCORE`).
    pub fn into_strings(self) -> Result<Vec<String>> {
        Ok(self
            .into_optional_strings()?
            .into_iter()
            .flatten()
            .collect())
    }
}
