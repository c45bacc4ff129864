//! Job targets, dispatch and the jobs consumer.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use redq_redis::{Connector, TcpConnector};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{Arguments, JobDescriptor};
use crate::queue::{Queue, QueueBinding};
use crate::worker::Consumer;

/// Boxed future returned by job methods.
pub type JobFuture = Pin<Box<dyn Future<Output = QueueResult<()>> + Send>>;

type Method<T> = Arc<dyn Fn(Arc<T>, Arguments) -> JobFuture + Send + Sync>;
type Constructor<T> = Arc<dyn Fn(&[Value]) -> QueueResult<T> + Send + Sync>;
type Factory<T> = Arc<dyn Fn() -> QueueResult<T> + Send + Sync>;

/// A named job target with its callable methods.
///
/// ```
/// use redq_queue::{Arguments, Target};
///
/// #[derive(Default)]
/// struct Cleanup;
///
/// let target = Target::<Cleanup>::new("Cleanup")
///     .shared(|| Ok(Cleanup))
///     .method("execute", |_cleanup, _args: Arguments| async { Ok(()) });
///
/// assert!(target.has_method("execute"));
/// ```
pub struct Target<T> {
    name: String,
    constructor: Option<Constructor<T>>,
    factory: Option<Factory<T>>,
    instance: OnceCell<Arc<T>>,
    methods: HashMap<String, Method<T>>,
}

impl<T: Send + Sync + 'static> Target<T> {
    /// Start describing a target.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: None,
            factory: None,
            instance: OnceCell::new(),
            methods: HashMap::new(),
        }
    }

    /// Build fresh instances from positional constructor arguments.
    ///
    /// Without a [`shared`](Target::shared) factory, the shared instance
    /// is built by calling this with no arguments.
    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&[Value]) -> QueueResult<T> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    /// Build the shared instance, created once on first use.
    pub fn shared<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> QueueResult<T> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Register a callable method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Arc<T>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let wrapped: Method<T> =
            Arc::new(move |instance: Arc<T>, args: Arguments| -> JobFuture {
                Box::pin(method(instance, args))
            });
        self.methods.insert(name.into(), wrapped);
        self
    }

    /// Target name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `method` is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn instance(&self, constructor_args: &[Value]) -> QueueResult<Arc<T>> {
        if !constructor_args.is_empty() {
            let constructor = self.constructor.as_ref().ok_or_else(|| {
                QueueError::MalformedJob(format!("{} has no constructor", self.name))
            })?;
            return constructor(constructor_args).map(Arc::new);
        }

        self.instance
            .get_or_try_init(|| match (&self.factory, &self.constructor) {
                (Some(factory), _) => factory().map(Arc::new),
                (None, Some(constructor)) => constructor(&[]).map(Arc::new),
                (None, None) => Err(QueueError::MalformedJob(format!(
                    "{} cannot be instantiated",
                    self.name
                ))),
            })
            .cloned()
    }
}

trait TargetHandle: Send + Sync {
    fn has_method(&self, method: &str) -> bool;
    fn has_constructor(&self) -> bool;
    fn call(&self, method: &str, constructor: &[Value], args: Arguments) -> QueueResult<Option<JobFuture>>;
}

impl<T: Send + Sync + 'static> TargetHandle for Target<T> {
    fn has_method(&self, method: &str) -> bool {
        Target::has_method(self, method)
    }

    fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    fn call(&self, method: &str, constructor: &[Value], args: Arguments) -> QueueResult<Option<JobFuture>> {
        let Some(method) = self.methods.get(method) else {
            return Ok(None);
        };
        let instance = self.instance(constructor)?;
        Ok(Some(method(instance, args)))
    }
}

/// Registered job targets, looked up by name.
#[derive(Default)]
pub struct JobRegistry {
    targets: HashMap<String, Arc<dyn TargetHandle>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target, replacing any previous target of the same name.
    pub fn register<T: Send + Sync + 'static>(&mut self, target: Target<T>) -> &mut Self {
        debug!(job_target = %target.name(), methods = target.methods.len(), "Registering job target");
        self.targets.insert(target.name.clone(), Arc::new(target));
        self
    }

    /// Whether `target@method` can be called.
    pub fn contains(&self, target: &str, method: &str) -> bool {
        self.targets
            .get(target)
            .is_some_and(|t| t.has_method(method))
    }

    /// Build a descriptor after checking the target and method exist.
    pub fn emit(
        &self,
        target: &str,
        method: &str,
        args: Value,
        constructor: Vec<Value>,
    ) -> QueueResult<JobDescriptor> {
        let handle = self
            .targets
            .get(target)
            .ok_or_else(|| QueueError::Validation(format!("job target {} is not registered", target)))?;

        if !handle.has_method(method) {
            return Err(QueueError::Validation(format!(
                "{} has no method {}",
                target, method
            )));
        }

        if !constructor.is_empty() && !handle.has_constructor() {
            return Err(QueueError::Validation(format!(
                "{} does not accept constructor arguments",
                target
            )));
        }

        Ok(JobDescriptor::new(target, method)
            .with_args(args)
            .with_constructor(constructor))
    }

    /// Run the method a descriptor names.
    ///
    /// Unknown targets and methods are a no-op. Errors raised by the
    /// method are returned to the caller.
    pub async fn invoke(&self, descriptor: &JobDescriptor) -> QueueResult<()> {
        let (target, method) = descriptor.target_and_method();

        let Some(handle) = self.targets.get(&target) else {
            debug!(job_target = %target, method = %method, "Skipping job for unknown target");
            return Ok(());
        };

        match handle.call(&method, &descriptor.constructor, descriptor.arguments())? {
            Some(future) => future.await,
            None => {
                debug!(job_target = %target, method = %method, "Skipping job for unknown method");
                Ok(())
            }
        }
    }
}

/// Enqueues job descriptors on a bound queue.
pub struct JobDispatcher<C: Connector = TcpConnector> {
    registry: Arc<JobRegistry>,
    queue: Queue<C>,
    binding: QueueBinding,
}

impl<C: Connector> JobDispatcher<C> {
    /// Create a dispatcher.
    pub fn new(registry: Arc<JobRegistry>, queue: Queue<C>, binding: QueueBinding) -> Self {
        Self {
            registry,
            queue,
            binding,
        }
    }

    /// The binding jobs are sent to.
    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    /// Enqueue the target's default method.
    pub async fn dispatch(
        &self,
        target: &str,
        args: Value,
        delay: i64,
        constructor: Vec<Value>,
    ) -> QueueResult<bool> {
        self.emit(target, crate::job::DEFAULT_METHOD, args, delay, constructor)
            .await
    }

    /// Validate and enqueue `target@method`.
    pub async fn emit(
        &self,
        target: &str,
        method: &str,
        args: Value,
        delay: i64,
        constructor: Vec<Value>,
    ) -> QueueResult<bool> {
        let descriptor = self.registry.emit(target, method, args, constructor)?;
        self.send(&descriptor, delay).await
    }

    /// Enqueue a descriptor without validation.
    pub async fn send(&self, descriptor: &JobDescriptor, delay: i64) -> QueueResult<bool> {
        self.queue
            .enqueue(self.binding.queue(), descriptor.to_value()?, delay)
            .await
    }
}

/// [`Consumer`] that runs job descriptors through a [`JobRegistry`].
///
/// Payloads that are not descriptors, or name a job that cannot be built,
/// are dropped with a warning.
pub struct JobsConsumer {
    registry: Arc<JobRegistry>,
}

impl JobsConsumer {
    /// Create a consumer.
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Consumer for JobsConsumer {
    async fn consume(&self, data: Value) -> QueueResult<()> {
        let descriptor = match JobDescriptor::from_value(data) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(error = %e, "Dropping malformed job descriptor");
                return Ok(());
            }
        };

        if descriptor.job.is_empty() {
            return Ok(());
        }

        match self.registry.invoke(&descriptor).await {
            Err(e) if e.is_malformed() => {
                warn!(job = %descriptor.job, error = %e, "Dropping job that cannot be invoked");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Arguments)>>,
    }

    fn registry(recorder: Arc<Recorder>) -> JobRegistry {
        let mut registry = JobRegistry::new();
        let shared = recorder.clone();
        registry.register(
            Target::<Arc<Recorder>>::new("Recorder")
                .shared(move || Ok(shared.clone()))
                .method("execute", |r: Arc<Arc<Recorder>>, args| async move {
                    r.calls.lock().push(("execute".to_string(), args));
                    Ok(())
                })
                .method("fail", |_, _| async { Err(QueueError::failed("boom")) }),
        );
        registry
    }

    #[tokio::test]
    async fn test_argument_shapes_reach_method() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry(recorder.clone());

        for args in [json!([]), json!([1, 2, 3]), json!(5), Value::Null] {
            let job = JobDescriptor::for_target("Recorder").with_args(args);
            registry.invoke(&job).await.unwrap();
        }

        let calls = recorder.calls.lock();
        let lens: Vec<usize> = calls.iter().map(|(_, a)| a.len()).collect();
        assert_eq!(lens, vec![0, 3, 1, 1]);
        assert_eq!(calls[2].1, Arguments::Single(json!(5)));
        assert_eq!(calls[3].1, Arguments::Single(Value::Null));
    }

    #[tokio::test]
    async fn test_unknown_jobs_are_noops() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry(recorder.clone());

        registry
            .invoke(&JobDescriptor::new("Recorder", "missing"))
            .await
            .unwrap();
        registry
            .invoke(&JobDescriptor::for_target("Nobody"))
            .await
            .unwrap();

        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_method_errors_propagate() {
        let registry = registry(Arc::new(Recorder::default()));
        let err = registry
            .invoke(&JobDescriptor::new("Recorder", "fail"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::ExecutionFailed(_)));
    }

    #[test]
    fn test_emit_validation() {
        let registry = registry(Arc::new(Recorder::default()));

        let job = registry
            .emit("Recorder", "execute", json!({"a": 1}), vec![])
            .unwrap();
        assert_eq!(job.job, "Recorder@execute");

        assert!(matches!(
            registry.emit("Nobody", "execute", Value::Null, vec![]),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            registry.emit("Recorder", "missing", Value::Null, vec![]),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            registry.emit("Recorder", "execute", Value::Null, vec![json!(1)]),
            Err(QueueError::Validation(_))
        ));
    }

    struct Greeter {
        greeting: String,
    }

    #[tokio::test]
    async fn test_constructor_builds_fresh_instances() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut registry = JobRegistry::new();
        registry.register(
            Target::<Greeter>::new("Greeter")
                .constructor(|args| {
                    let greeting = args
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or("hello")
                        .to_string();
                    Ok(Greeter { greeting })
                })
                .method("greet", move |greeter: Arc<Greeter>, args| {
                    let sink = sink.clone();
                    async move {
                        let name = args.get(0).and_then(Value::as_str).unwrap_or("?").to_string();
                        sink.lock().push(format!("{} {}", greeter.greeting, name));
                        Ok(())
                    }
                }),
        );

        let shared = JobDescriptor::new("Greeter", "greet").with_args(json!("ann"));
        let custom = shared.clone().with_constructor(vec![json!("hi")]);

        registry.invoke(&shared).await.unwrap();
        registry.invoke(&custom).await.unwrap();

        assert_eq!(*seen.lock(), vec!["hello ann", "hi ann"]);
    }

    #[tokio::test]
    async fn test_shared_instance_built_once() {
        let builds = Arc::new(Mutex::new(0));
        let counter = builds.clone();

        let mut registry = JobRegistry::new();
        registry.register(
            Target::<()>::new("Tick")
                .shared(move || {
                    *counter.lock() += 1;
                    Ok(())
                })
                .method("execute", |_, _| async { Ok(()) }),
        );

        for _ in 0..3 {
            registry.invoke(&JobDescriptor::for_target("Tick")).await.unwrap();
        }
        assert_eq!(*builds.lock(), 1);
    }

    #[tokio::test]
    async fn test_jobs_consumer_fails_closed() {
        let recorder = Arc::new(Recorder::default());
        let consumer = JobsConsumer::new(Arc::new(registry(recorder.clone())));

        consumer.consume(json!("not a descriptor")).await.unwrap();
        consumer.consume(json!({"job": ""})).await.unwrap();
        consumer
            .consume(json!({"job": "Recorder", "constructor": [1]}))
            .await
            .unwrap();
        assert!(recorder.calls.lock().is_empty());

        consumer
            .consume(json!({"job": "Recorder@execute", "args": ["x"]}))
            .await
            .unwrap();
        assert_eq!(recorder.calls.lock().len(), 1);

        assert!(consumer.consume(json!({"job": "Recorder@fail"})).await.is_err());
    }
}
