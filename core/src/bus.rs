use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Why a dashboard refresh was requested. Carried to every subscriber so
/// they can decide how (or whether) to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    Login,
    Signup,
    ProfileUpdate,
    DonationAdded,
    UserAction,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::Login => "login",
            RefreshReason::Signup => "signup",
            RefreshReason::ProfileUpdate => "profile_update",
            RefreshReason::DonationAdded => "donation_added",
            RefreshReason::UserAction => "user_action",
        }
    }
}

type RefreshCallback = Arc<dyn Fn(RefreshReason) + Send + Sync>;

struct BusInner {
    subscribers: RwLock<HashMap<u64, RefreshCallback>>,
    next_id: AtomicU64,
}

/// Publish/subscribe registry decoupling "something changed, refresh the
/// dashboard" from whoever happens to be listening. Fan-out is synchronous
/// and failure-isolated: a panicking subscriber never stops the rest.
///
/// Explicitly constructed and injected, never a module-level global;
/// clones share the subscriber set.
#[derive(Clone)]
pub struct RefreshBus {
    inner: Arc<BusInner>,
}

/// Removes its callback when dropped, or earlier via [`unsubscribe`].
///
/// [`unsubscribe`]: RefreshSubscription::unsubscribe
pub struct RefreshSubscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl RefreshSubscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for RefreshSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if let Ok(mut subscribers) = inner.subscribers.write() {
                subscribers.remove(&self.id);
            }
        }
    }
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> RefreshSubscription
    where
        F: Fn(RefreshReason) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.inner.subscribers.write() {
            subscribers.insert(id, Arc::new(callback));
        }
        RefreshSubscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invokes every currently-registered callback with `reason`,
    /// synchronously, in unspecified order.
    pub fn publish(&self, reason: RefreshReason) {
        tracing::debug!(reason = reason.as_str(), "dashboard refresh requested");
        let callbacks: Vec<RefreshCallback> = match self.inner.subscribers.read() {
            Ok(subscribers) => subscribers.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(reason))).is_err() {
                tracing::warn!(
                    reason = reason.as_str(),
                    "refresh subscriber panicked; continuing fan-out"
                );
            }
        }
    }

    pub fn after_login(&self) {
        self.publish(RefreshReason::Login);
    }

    pub fn after_signup(&self) {
        self.publish(RefreshReason::Signup);
    }

    pub fn after_profile_update(&self) {
        self.publish(RefreshReason::ProfileUpdate);
    }

    pub fn after_donation(&self) {
        self.publish(RefreshReason::DonationAdded);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}
