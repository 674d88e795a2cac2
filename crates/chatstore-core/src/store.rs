//! The shared chat state container
//!
//! [`ChatStore`] is a handle to one logical [`ChatState`]. Cloning the handle
//! shares the instance. Every write is applied under a short exclusive lock
//! and then published to subscribers as a [`StoreEvent`], so "a write becomes
//! visible to readers" is an explicit contract instead of implicit reactivity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::registry::Store;
use crate::state::{ChatMessage, ChatState, Field};

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Published after every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEvent {
    pub field: Field,
    /// Store-wide write counter after this write was applied
    pub version: u64,
}

/// What a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Changed(StoreEvent),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
}

struct Inner {
    state: RwLock<ChatState>,
    version: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Inner>,
}

impl Store for ChatStore {
    const ID: &'static str = "chat";

    fn create() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Create a fresh, unshared store. Applications normally go through
    /// [`StoreRegistry::use_store`](crate::StoreRegistry::use_store) instead.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(ChatState::default()),
                version: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// True when both handles refer to the same instance
    pub fn same_instance(a: &ChatStore, b: &ChatStore) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn subscribe(&self) -> StoreSubscription {
        StoreSubscription {
            rx: self.inner.events.subscribe(),
        }
    }

    /// Number of writes applied since creation
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ChatState {
        self.read().clone()
    }

    // Reads

    pub fn data(&self) -> Vec<ChatMessage> {
        self.read().data.clone()
    }

    /// Borrow `data` for the duration of `f` without cloning it.
    ///
    /// `f` runs under the read lock and must not write to this store.
    pub fn with_data<R>(&self, f: impl FnOnce(&[ChatMessage]) -> R) -> R {
        f(&self.read().data)
    }

    pub fn answer(&self) -> String {
        self.read().answer.clone()
    }

    pub fn streamdiv(&self) -> bool {
        self.read().streamdiv
    }

    pub fn toggled(&self) -> bool {
        self.read().toggled
    }

    pub fn waiting(&self) -> bool {
        self.read().waiting
    }

    // Writes

    pub fn set_data(&self, data: Vec<ChatMessage>) {
        self.write(Field::Data, |state| state.data = data);
    }

    pub fn push_data(&self, message: ChatMessage) {
        self.write(Field::Data, |state| state.data.push(message));
    }

    pub fn clear_data(&self) {
        self.write(Field::Data, |state| state.data.clear());
    }

    pub fn set_answer(&self, answer: impl Into<String>) {
        let answer = answer.into();
        self.write(Field::Answer, |state| state.answer = answer);
    }

    /// Append to the current answer
    pub fn push_answer(&self, chunk: &str) {
        self.write(Field::Answer, |state| state.answer.push_str(chunk));
    }

    pub fn set_streamdiv(&self, streamdiv: bool) {
        self.write(Field::Streamdiv, |state| state.streamdiv = streamdiv);
    }

    pub fn set_toggled(&self, toggled: bool) {
        self.write(Field::Toggled, |state| state.toggled = toggled);
    }

    /// Flip `toggled` and return the new value
    pub fn toggle(&self) -> bool {
        self.write(Field::Toggled, |state| {
            state.toggled = !state.toggled;
            state.toggled
        })
    }

    pub fn set_waiting(&self, waiting: bool) {
        self.write(Field::Waiting, |state| state.waiting = waiting);
    }

    /// Apply several field changes as one step under the write lock.
    ///
    /// Publishes one event per field whose value changed, in [`Field::all`]
    /// order. Nothing is published when `f` leaves the state as it was.
    pub fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.lock();
        let before = state.clone();
        let out = f(&mut *state);

        let changed: Vec<Field> = Field::all()
            .into_iter()
            .filter(|field| match field {
                Field::Data => state.data != before.data,
                Field::Answer => state.answer != before.answer,
                Field::Streamdiv => state.streamdiv != before.streamdiv,
                Field::Toggled => state.toggled != before.toggled,
                Field::Waiting => state.waiting != before.waiting,
            })
            .collect();
        for &field in &changed {
            self.publish(field);
        }
        drop(state);

        tracing::trace!(fields = ?changed, "chat store update");
        out
    }

    /// Restore every field to its initial value, one write per field.
    pub fn reset(&self) {
        self.set_data(Vec::new());
        self.set_answer(String::new());
        self.set_streamdiv(false);
        self.set_toggled(false);
        self.set_waiting(false);
    }

    fn read(&self) -> RwLockReadGuard<'_, ChatState> {
        // Poison is ignored: no cross-field invariant to protect
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> RwLockWriteGuard<'_, ChatState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<R>(&self, field: Field, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.lock();
        let out = f(&mut *state);
        let version = self.publish(field);
        drop(state);

        tracing::trace!(field = field.name(), version, "chat store write");
        out
    }

    /// Callers hold the write lock so events arrive in version order.
    fn publish(&self, field: Field) -> u64 {
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        // An error only means nobody is subscribed.
        let _ = self.inner.events.send(StoreEvent { field, version });
        version
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("version", &self.version())
            .field("state", &*self.read())
            .finish()
    }
}

/// Receives one [`Notification`] per write made after it was created.
pub struct StoreSubscription {
    rx: broadcast::Receiver<StoreEvent>,
}

impl StoreSubscription {
    /// Wait for the next change. Returns `None` once every store handle is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.rx.recv().await {
            Ok(event) => Some(Notification::Changed(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Notification::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(event) => Some(Notification::Changed(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Notification::Lagged(n)),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;

    fn drain(sub: &mut StoreSubscription) -> Vec<Notification> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn test_initial_state() {
        let store = ChatStore::new();
        assert_eq!(store.snapshot(), ChatState::default());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let store = ChatStore::new();

        let data = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        store.set_data(data.clone());
        assert_eq!(store.data(), data);

        store.set_answer("forty-two");
        assert_eq!(store.answer(), "forty-two");

        store.set_streamdiv(true);
        assert!(store.streamdiv());

        store.set_toggled(true);
        assert!(store.toggled());

        store.set_waiting(true);
        assert!(store.waiting());

        store.set_waiting(false);
        assert!(!store.waiting());
    }

    /// Copy `field` from `from` into `into`, leaving the other four alone
    fn copy_field(into: &mut ChatState, from: &ChatState, field: Field) {
        match field {
            Field::Data => into.data = from.data.clone(),
            Field::Answer => into.answer = from.answer.clone(),
            Field::Streamdiv => into.streamdiv = from.streamdiv,
            Field::Toggled => into.toggled = from.toggled,
            Field::Waiting => into.waiting = from.waiting,
        }
    }

    #[test]
    fn test_writes_leave_other_fields_alone() {
        let writes: [(Field, fn(&ChatStore)); 9] = [
            (Field::Data, |s| s.set_data(vec![ChatMessage::assistant("new")])),
            (Field::Data, |s| s.push_data(ChatMessage::user("more"))),
            (Field::Data, |s| s.clear_data()),
            (Field::Answer, |s| s.set_answer("replaced")),
            (Field::Answer, |s| s.push_answer(" and appended")),
            (Field::Streamdiv, |s| s.set_streamdiv(false)),
            (Field::Toggled, |s| s.set_toggled(true)),
            (Field::Toggled, |s| {
                s.toggle();
            }),
            (Field::Waiting, |s| s.set_waiting(false)),
        ];

        for (field, write) in writes {
            let store = ChatStore::new();
            store.set_data(vec![ChatMessage::user("q"), ChatMessage::assistant("a")]);
            store.set_answer("partial");
            store.set_streamdiv(true);
            store.set_toggled(false);
            store.set_waiting(true);

            let before = store.snapshot();
            write(&store);
            let after = store.snapshot();

            // Undo the written field; what remains must be untouched
            let mut rest = after.clone();
            copy_field(&mut rest, &before, field);
            assert_eq!(rest, before, "writing {} changed another field", field.name());
            assert_ne!(after, before, "writing {} had no effect", field.name());
        }
    }

    #[test]
    fn test_update_publishes_changed_fields_only() {
        let store = ChatStore::new();
        store.set_toggled(true);
        let mut sub = store.subscribe();

        let applied = store.update(|state| {
            state.waiting = true;
            state.data.push(ChatMessage::user("q"));
            state.toggled = true;
            state.answer.clear();
            7
        });
        assert_eq!(applied, 7);

        assert_eq!(
            drain(&mut sub),
            [
                Notification::Changed(StoreEvent { field: Field::Data, version: 2 }),
                Notification::Changed(StoreEvent { field: Field::Waiting, version: 3 }),
            ]
        );

        store.update(|_| ());
        assert!(sub.try_recv().is_none());
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_clones_share_one_instance() {
        let a = ChatStore::new();
        let b = a.clone();
        assert!(ChatStore::same_instance(&a, &b));
        assert!(!ChatStore::same_instance(&a, &ChatStore::new()));

        a.set_waiting(true);
        assert!(b.waiting());

        a.push_data(ChatMessage::user("hello"));
        assert_eq!(b.data(), vec![ChatMessage::user("hello")]);
    }

    #[test]
    fn test_push_answer_appends() {
        let store = ChatStore::new();
        store.push_answer("Hel");
        store.push_answer("lo");
        assert_eq!(store.answer(), "Hello");
    }

    #[test]
    fn test_toggle_returns_new_value() {
        let store = ChatStore::new();
        assert!(store.toggle());
        assert!(!store.toggle());
        assert!(!store.toggled());
    }

    #[test]
    fn test_with_data_borrows() {
        let store = ChatStore::new();
        store.push_data(ChatMessage::user("one"));
        store.push_data(ChatMessage::assistant("two"));
        let roles: Vec<ChatRole> = store.with_data(|data| data.iter().map(|m| m.role).collect());
        assert_eq!(roles, [ChatRole::User, ChatRole::Assistant]);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let store = ChatStore::new();
        store.push_data(ChatMessage::user("x"));
        store.set_answer("y");
        store.set_streamdiv(true);
        store.set_toggled(true);
        store.set_waiting(true);

        store.reset();
        assert_eq!(store.snapshot(), ChatState::default());
        assert_eq!(store.version(), 10);
    }

    #[test]
    fn test_subscriber_sees_each_write_in_order() {
        let store = ChatStore::new();
        let mut sub = store.subscribe();

        store.set_waiting(true);
        store.push_answer("a");
        store.set_waiting(true);

        assert_eq!(
            drain(&mut sub),
            [
                Notification::Changed(StoreEvent { field: Field::Waiting, version: 1 }),
                Notification::Changed(StoreEvent { field: Field::Answer, version: 2 }),
                Notification::Changed(StoreEvent { field: Field::Waiting, version: 3 }),
            ]
        );
    }

    #[test]
    fn test_late_subscriber_misses_earlier_writes() {
        let store = ChatStore::new();
        store.set_toggled(true);

        let mut sub = store.subscribe();
        assert!(sub.try_recv().is_none());

        store.set_answer("later");
        assert_eq!(
            drain(&mut sub),
            [Notification::Changed(StoreEvent { field: Field::Answer, version: 2 })]
        );
    }

    #[test]
    fn test_slow_subscriber_lags_without_blocking_writer() {
        let store = ChatStore::new();
        let mut sub = store.subscribe();

        for _ in 0..EVENT_CAPACITY + 10 {
            store.push_answer(".");
        }

        assert_eq!(sub.try_recv(), Some(Notification::Lagged(10)));
        assert!(matches!(sub.try_recv(), Some(Notification::Changed(_))));
        assert_eq!(store.answer().len(), EVENT_CAPACITY + 10);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_write_from_other_task() {
        let store = ChatStore::new();
        let mut sub = store.subscribe();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.set_streamdiv(true);
        });

        let note = sub.recv().await;
        assert_eq!(
            note,
            Some(Notification::Changed(StoreEvent { field: Field::Streamdiv, version: 1 }))
        );
        assert!(store.streamdiv());
    }

    #[tokio::test]
    async fn test_recv_ends_when_store_dropped() {
        let store = ChatStore::new();
        let mut sub = store.subscribe();
        drop(store);
        assert_eq!(sub.recv().await, None);
    }
}
