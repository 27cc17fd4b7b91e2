//! In-memory storage host.
//!
//! [`MemoryHost`] implements the full host contract over plain data
//! structures. It is used by the test suites and works as a native
//! ephemeral store.

mod collection;
mod transaction;
mod upgrade;

pub use transaction::{MemoryConnection, MemoryTransaction};

use crate::backend::{Callback, StorageHost, UpgradeHandler};
use crate::error::{HostError, HostErrorKind, HostResult};
use collection::CollectionData;
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, warn};
use upgrade::MemoryUpgrade;

/// When completion notifications reach their callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Callbacks run before the issuing call returns.
    #[default]
    Immediate,
    /// Callbacks are queued and run by [`MemoryHost::pump`], in issue order.
    ///
    /// This mimics an engine that answers from its own event loop and lets
    /// tests interleave several logical operations deterministically.
    Queued,
}

/// Configuration for [`MemoryHost`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHostConfig {
    /// Notification delivery mode.
    pub delivery: Delivery,
    /// Refuse every open request with a `Security` error.
    pub deny_access: bool,
}

impl MemoryHostConfig {
    /// Creates a configuration with immediate delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delivery mode.
    #[must_use]
    pub const fn delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Makes every open request fail as if storage access were blocked.
    #[must_use]
    pub const fn deny_access(mut self, deny: bool) -> Self {
        self.deny_access = deny;
        self
    }
}

type Notification = Box<dyn FnOnce()>;

/// Routes request outcomes to callbacks according to the delivery mode.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    delivery: Delivery,
    queue: Rc<RefCell<VecDeque<Notification>>>,
}

impl Dispatcher {
    fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub(crate) fn deliver<T: 'static>(&self, callback: Callback<T>, result: HostResult<T>) {
        match self.delivery {
            Delivery::Immediate => callback(result),
            Delivery::Queued => self
                .queue
                .borrow_mut()
                .push_back(Box::new(move || callback(result))),
        }
    }

    fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn pump(&self) -> usize {
        let mut delivered = 0;
        // Pop outside the borrow: callbacks may issue requests that enqueue.
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(notify) => {
                    notify();
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }
}

/// Committed state of one database.
#[derive(Debug, Clone, Default)]
pub(crate) struct DbState {
    pub(crate) version: u32,
    pub(crate) collections: BTreeMap<String, CollectionData>,
}

/// In-memory storage host.
///
/// Clones share databases and the notification queue.
///
/// # Example
///
/// ```
/// use stowage_host::{CollectionSpec, HostConnection, MemoryHost, StorageHost};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let host = MemoryHost::new();
/// let opened = Rc::new(RefCell::new(None));
/// let slot = Rc::clone(&opened);
///
/// host.open(
///     "app",
///     Some(1),
///     Box::new(|scope| scope.create_collection(&CollectionSpec::new("notes", "id"))),
///     Box::new(move |result| *slot.borrow_mut() = Some(result)),
/// );
///
/// let conn = opened.borrow_mut().take().unwrap().unwrap();
/// assert_eq!(conn.version(), 1);
/// assert_eq!(conn.collection_names(), vec!["notes".to_string()]);
/// ```
#[derive(Clone)]
pub struct MemoryHost {
    databases: Arc<Mutex<HashMap<String, Arc<RwLock<DbState>>>>>,
    config: MemoryHostConfig,
    dispatcher: Dispatcher,
    injected_failure: Rc<RefCell<Option<HostError>>>,
    next_transaction_id: Arc<AtomicU64>,
}

impl MemoryHost {
    /// Creates a host with immediate delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryHostConfig::default())
    }

    /// Creates a host with the given configuration.
    #[must_use]
    pub fn with_config(config: MemoryHostConfig) -> Self {
        Self {
            databases: Arc::new(Mutex::new(HashMap::new())),
            dispatcher: Dispatcher::new(config.delivery),
            config,
            injected_failure: Rc::new(RefCell::new(None)),
            next_transaction_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryHostConfig {
        &self.config
    }

    /// Makes the next open request fail with `error`.
    pub fn fail_next_open(&self, error: HostError) {
        *self.injected_failure.borrow_mut() = Some(error);
    }

    /// Delivers queued notifications, including any queued while pumping.
    ///
    /// Returns how many were delivered. Always 0 with immediate delivery.
    pub fn pump(&self) -> usize {
        self.dispatcher.pump()
    }

    /// Number of notifications waiting for [`MemoryHost::pump`].
    #[must_use]
    pub fn pending_notifications(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Stored version of a database, if it exists.
    #[must_use]
    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.databases.lock().get(name).map(|db| db.read().version)
    }

    /// Names of all databases, in ascending order.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn open_now(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: UpgradeHandler,
    ) -> HostResult<MemoryConnection> {
        if self.config.deny_access {
            return Err(HostError::new(
                HostErrorKind::Security,
                "storage access is not permitted",
            ));
        }
        if let Some(err) = self.injected_failure.borrow_mut().take() {
            return Err(err);
        }
        if version == Some(0) {
            return Err(HostError::data("version must be at least 1"));
        }

        let existing = self.databases.lock().get(name).cloned();
        let current = existing.as_ref().map_or(0, |db| db.read().version);
        let target = version.unwrap_or_else(|| current.max(1));

        if target < current {
            return Err(HostError::new(
                HostErrorKind::Version,
                format!("requested version {target} is lower than stored version {current}"),
            ));
        }

        let db = if target > current {
            let mut staging = existing
                .as_ref()
                .map(|db| db.read().clone())
                .unwrap_or_default();

            debug!(name, from = current, to = target, "upgrading database");
            let mut scope = MemoryUpgrade::new(current, target, &mut staging.collections);
            if let Err(err) = on_upgrade(&mut scope) {
                warn!(name, version = target, error = %err, "upgrade aborted");
                return Err(HostError::abort(format!(
                    "version change transaction was aborted: {}",
                    err.message
                )));
            }
            staging.version = target;

            match existing {
                Some(db) => {
                    *db.write() = staging;
                    db
                }
                None => {
                    let db = Arc::new(RwLock::new(staging));
                    self.databases
                        .lock()
                        .insert(name.to_string(), Arc::clone(&db));
                    db
                }
            }
        } else {
            match existing {
                Some(db) => db,
                None => return Err(HostError::invalid_state("database vanished during open")),
            }
        };

        Ok(MemoryConnection::new(
            name,
            target,
            db,
            self.dispatcher.clone(),
            Arc::clone(&self.next_transaction_id),
        ))
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHost")
            .field("databases", &self.database_names())
            .field("config", &self.config)
            .field("pending_notifications", &self.pending_notifications())
            .finish()
    }
}

impl StorageHost for MemoryHost {
    type Connection = MemoryConnection;

    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: UpgradeHandler,
        callback: Callback<MemoryConnection>,
    ) {
        let result = self.open_now(name, version, on_upgrade);
        self.dispatcher.deliver(callback, result);
    }

    fn delete_database(&self, name: &str, callback: Callback<()>) {
        if self.databases.lock().remove(name).is_some() {
            debug!(name, "deleted database");
        }
        self.dispatcher.deliver(callback, Ok(()));
    }
}
