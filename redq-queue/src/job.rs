//! Job descriptors and argument shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueueError, QueueResult};

/// Method invoked when a descriptor names only a target.
pub const DEFAULT_METHOD: &str = "execute";

/// Separator between target and method in a descriptor string.
pub const SEPARATOR: char = '@';

/// What to run for a dequeued job.
///
/// ```
/// use redq_queue::JobDescriptor;
/// use serde_json::json;
///
/// let job = JobDescriptor::new("Mailer", "send").with_args(json!(["a@b.c"]));
/// assert_eq!(job.job, "Mailer@send");
/// assert_eq!(job.target_and_method(), ("Mailer".to_string(), "send".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// `target@method`, or just `target`.
    #[serde(default)]
    pub job: String,

    /// Call arguments.
    #[serde(default)]
    pub args: Value,

    /// Constructor arguments; empty means "use the shared instance".
    #[serde(default, deserialize_with = "null_as_empty")]
    pub constructor: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl JobDescriptor {
    /// Descriptor for `target@method`.
    pub fn new(target: &str, method: &str) -> Self {
        Self {
            job: format!("{}{}{}", target, SEPARATOR, method),
            args: Value::Null,
            constructor: Vec::new(),
        }
    }

    /// Descriptor for the target's default method.
    pub fn for_target(target: &str) -> Self {
        Self::new(target, DEFAULT_METHOD)
    }

    /// Set call arguments.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Set constructor arguments.
    pub fn with_constructor(mut self, constructor: Vec<Value>) -> Self {
        self.constructor = constructor;
        self
    }

    /// Split `job` into target and method.
    pub fn target_and_method(&self) -> (String, String) {
        let (target, method) = parse_job(&self.job);
        (target.to_string(), method.to_string())
    }

    /// Call arguments by shape.
    pub fn arguments(&self) -> Arguments {
        Arguments::from_value(self.args.clone())
    }

    /// Encode as a queue payload.
    pub fn to_value(&self) -> QueueResult<Value> {
        serde_json::to_value(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Decode from a queue payload.
    pub fn from_value(value: Value) -> QueueResult<Self> {
        serde_json::from_value(value).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// Split a descriptor string into `(target, method)`.
///
/// Exactly one separator yields both parts; anything else means the whole
/// string is the target and the method is [`DEFAULT_METHOD`].
pub fn parse_job(job: &str) -> (&str, &str) {
    let mut segments = job.split(SEPARATOR);
    match (segments.next(), segments.next(), segments.next()) {
        (Some(target), Some(method), None) => (target, method),
        _ => (job, DEFAULT_METHOD),
    }
}

/// The shape a method is called with.
#[derive(Debug, Clone, PartialEq)]
pub enum Arguments {
    /// Empty array or object: no arguments.
    None,
    /// Non-empty array, spread positionally.
    Positional(Vec<Value>),
    /// Non-empty object, bound by name.
    Named(Map<String, Value>),
    /// Null, boolean, number or string, passed as the only argument.
    Single(Value),
}

impl Arguments {
    /// Classify a JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) if items.is_empty() => Self::None,
            Value::Array(items) => Self::Positional(items),
            Value::Object(map) if map.is_empty() => Self::None,
            Value::Object(map) => Self::Named(map),
            other => Self::Single(other),
        }
    }

    /// Number of arguments the method receives.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(items) => items.len(),
            Self::Named(map) => map.len(),
            Self::Single(_) => 1,
        }
    }

    /// `true` when the method is called with no arguments.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Positional argument `index`. A single argument is index 0.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Self::Positional(items) => items.get(index),
            Self::Single(value) if index == 0 => Some(value),
            _ => None,
        }
    }

    /// Named argument.
    pub fn named(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Named(map) => map.get(name),
            _ => None,
        }
    }

    /// Back to a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::None => Value::Array(Vec::new()),
            Self::Positional(items) => Value::Array(items),
            Self::Named(map) => Value::Object(map),
            Self::Single(value) => value,
        }
    }

    /// Deserialize the arguments into a typed value.
    ///
    /// Positional arguments decode as a tuple or sequence, named arguments
    /// as a struct, and a single argument as itself.
    pub fn decode<T: DeserializeOwned>(self) -> QueueResult<T> {
        serde_json::from_value(self.into_value())
            .map_err(|e| QueueError::MalformedJob(format!("invalid arguments: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_job() {
        assert_eq!(parse_job("Foo@bar"), ("Foo", "bar"));
        assert_eq!(parse_job("Foo"), ("Foo", DEFAULT_METHOD));
        assert_eq!(parse_job("Foo@bar@baz"), ("Foo@bar@baz", DEFAULT_METHOD));
        assert_eq!(parse_job("Foo@"), ("Foo", ""));
    }

    #[test]
    fn test_descriptor_default_method() {
        let job = JobDescriptor::for_target("Cleanup");
        assert_eq!(job.job, "Cleanup@execute");
    }

    #[test]
    fn test_argument_shapes() {
        assert_eq!(Arguments::from_value(json!([])), Arguments::None);
        assert_eq!(Arguments::from_value(json!({})), Arguments::None);
        assert_eq!(Arguments::from_value(json!([1, 2, 3])).len(), 3);
        assert_eq!(Arguments::from_value(json!(5)), Arguments::Single(json!(5)));
        assert_eq!(Arguments::from_value(Value::Null), Arguments::Single(Value::Null));
        assert_eq!(Arguments::from_value(Value::Null).len(), 1);

        let named = Arguments::from_value(json!({"to": "x", "retry": true}));
        assert_eq!(named.named("to"), Some(&json!("x")));
        assert_eq!(named.len(), 2);
    }

    #[test]
    fn test_decode_arguments() {
        let (a, b): (i64, String) = Arguments::from_value(json!([1, "two"])).decode().unwrap();
        assert_eq!((a, b), (1, "two".to_string()));

        #[derive(Deserialize)]
        struct Welcome {
            to: String,
        }
        let welcome: Welcome = Arguments::from_value(json!({"to": "x"})).decode().unwrap();
        assert_eq!(welcome.to, "x");

        let err = Arguments::from_value(json!("nope")).decode::<i64>().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_descriptor_decoding_is_lenient() {
        let job = JobDescriptor::from_value(json!({"job": "A@b", "constructor": null, "extra": 1}))
            .unwrap();
        assert!(job.constructor.is_empty());
        assert_eq!(job.args, Value::Null);

        let empty = JobDescriptor::from_value(json!({})).unwrap();
        assert!(empty.job.is_empty());

        assert!(JobDescriptor::from_value(json!("Foo@bar")).is_err());
    }
}
