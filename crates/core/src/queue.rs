//! Queue interface and the queue resolver.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{QueueError, QueueResult};
use crate::worker::Worker;

pub const DEFAULT_QUEUE: &str = "jobhouse.default";
pub const PRIORITY_QUEUE: &str = "jobhouse.priority";

/// A pluggable queue implementation.
///
/// Hooks are run by the worker loop, never by the manager. Both are
/// best-effort: an `Err` is logged and the worker keeps serving.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Stable identifier stored in `Job::queue`.
    fn id(&self) -> &str;

    /// Runs once before the worker starts leasing.
    async fn setup(&self, _worker: &Worker) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs periodically while the worker is alive.
    async fn refresh(&self, _worker: &Worker) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Queue with no-op hooks, identified by a fixed id.
#[derive(Debug, Clone)]
pub struct BasicQueue {
    id: String,
}

impl BasicQueue {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn default_queue() -> Self {
        Self::new(DEFAULT_QUEUE)
    }

    pub fn priority_queue() -> Self {
        Self::new(PRIORITY_QUEUE)
    }
}

#[async_trait]
impl Queue for BasicQueue {
    fn id(&self) -> &str {
        &self.id
    }
}

/// What a caller may pass wherever a queue is expected.
#[derive(Clone)]
pub enum QueueRef {
    /// Alias or implementation identifier
    Name(String),
    /// Already constructed queue
    Instance(Arc<dyn Queue>),
}

impl core::fmt::Debug for QueueRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QueueRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            QueueRef::Instance(q) => f.debug_tuple("Instance").field(&q.id()).finish(),
        }
    }
}

impl From<&str> for QueueRef {
    fn from(value: &str) -> Self {
        QueueRef::Name(value.to_string())
    }
}

impl From<String> for QueueRef {
    fn from(value: String) -> Self {
        QueueRef::Name(value)
    }
}

impl From<&String> for QueueRef {
    fn from(value: &String) -> Self {
        QueueRef::Name(value.clone())
    }
}

impl From<Arc<dyn Queue>> for QueueRef {
    fn from(value: Arc<dyn Queue>) -> Self {
        QueueRef::Instance(value)
    }
}

type QueueFactory = Arc<dyn Fn() -> Arc<dyn Queue> + Send + Sync>;

/// Resolves aliases and implementation identifiers to queue instances.
///
/// Each manager owns its own resolver; there is no process-wide alias table.
#[derive(Clone)]
pub struct QueueResolver {
    aliases: BTreeMap<String, String>,
    factories: BTreeMap<String, QueueFactory>,
}

impl Default for QueueResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueResolver {
    /// Resolver with the `default` and `priority` built-ins.
    pub fn new() -> Self {
        let mut resolver = Self {
            aliases: BTreeMap::new(),
            factories: BTreeMap::new(),
        };
        resolver
            .register(DEFAULT_QUEUE, || {
                Arc::new(BasicQueue::default_queue()) as Arc<dyn Queue>
            })
            .register(PRIORITY_QUEUE, || {
                Arc::new(BasicQueue::priority_queue()) as Arc<dyn Queue>
            })
            .add_alias("default", DEFAULT_QUEUE)
            .add_alias("priority", PRIORITY_QUEUE);
        resolver
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Queue> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    /// Aliases match case-insensitively.
    pub fn add_alias(&mut self, alias: impl AsRef<str>, queue: impl Into<String>) -> &mut Self {
        self.aliases
            .insert(alias.as_ref().to_lowercase(), queue.into());
        self
    }

    pub fn resolve(&self, queue: impl Into<QueueRef>) -> QueueResult<Arc<dyn Queue>> {
        match queue.into() {
            QueueRef::Instance(q) => Ok(q),
            QueueRef::Name(name) => {
                let id = self
                    .aliases
                    .get(&name.to_lowercase())
                    .map(String::as_str)
                    .unwrap_or(name.as_str());
                self.factories
                    .get(id)
                    .map(|factory| factory())
                    .ok_or_else(|| QueueError::invalid_queue(name.clone()))
            }
        }
    }

    /// Registered implementation identifiers.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolve and return only the stored identifier.
    pub fn resolve_id(&self, queue: impl Into<QueueRef>) -> QueueResult<String> {
        self.resolve(queue).map(|q| q.id().to_string())
    }
}

impl core::fmt::Debug for QueueResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueResolver")
            .field("aliases", &self.aliases)
            .field("queues", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mailer;

    #[async_trait]
    impl Queue for Mailer {
        fn id(&self) -> &str {
            "app.mailer"
        }
    }

    #[test]
    fn builtin_aliases_resolve_case_insensitively() {
        let r = QueueResolver::new();
        assert_eq!(r.resolve_id("default").unwrap(), DEFAULT_QUEUE);
        assert_eq!(r.resolve_id("PRIORITY").unwrap(), PRIORITY_QUEUE);
        assert_eq!(r.resolve_id(DEFAULT_QUEUE).unwrap(), DEFAULT_QUEUE);
    }

    #[test]
    fn unknown_identifier_is_invalid_queue() {
        let r = QueueResolver::new();
        assert_eq!(
            r.resolve_id("nope").err(),
            Some(QueueError::InvalidQueue("nope".into()))
        );
    }

    #[test]
    fn registered_queues_and_extra_aliases() {
        let mut r = QueueResolver::new();
        r.register("app.mailer", || Arc::new(Mailer) as Arc<dyn Queue>)
            .add_alias("Mail", "app.mailer");

        assert_eq!(r.resolve_id("app.mailer").unwrap(), "app.mailer");
        assert_eq!(r.resolve_id("mail").unwrap(), "app.mailer");

        let instance: Arc<dyn Queue> = Arc::new(BasicQueue::new("ad.hoc"));
        assert_eq!(r.resolve_id(instance).unwrap(), "ad.hoc");
    }

    #[test]
    fn resolvers_do_not_share_aliases() {
        let mut a = QueueResolver::new();
        let b = QueueResolver::new();
        a.add_alias("bulk", DEFAULT_QUEUE);
        assert!(a.resolve("bulk").is_ok());
        assert!(b.resolve("bulk").is_err());
    }
}
