//! Message Bus for Decoupled Communication
//!
//! This module provides a type-keyed publish/subscribe bus that lets game
//! systems talk without knowing about each other. A message is any `'static`
//! type; listeners subscribe to one message type and receive `&M`.
//!
//! # Design Principles
//!
//! - **Type Safety**: Listeners are keyed by `TypeId` and receive the
//!   concrete message type
//! - **Immediate or Deferred**: `emit` delivers right away, `enqueue` defers
//!   delivery to the next `update`
//! - **Frame Budget**: `update` stops draining once its time budget is spent;
//!   leftover messages carry over to the next frame
//!
//! # Example
//!
//! ```ignore
//! struct RingLanded { slot: u32 }
//!
//! let mut bus = MessageBus::new();
//! let id = bus.add_listener(|msg: &RingLanded| score(msg.slot));
//!
//! bus.enqueue(RingLanded { slot: 3 });
//! bus.update(); // listener runs here
//!
//! bus.remove_listener::<RingLanded>(id);
//! ```

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::config::EventBusConfig;

// ============================================================================
// Listeners
// ============================================================================

/// Identifies a registered listener, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ErasedListener = Box<dyn FnMut(&dyn Any)>;

/// A message waiting in the queue
struct Queued {
    type_id: TypeId,
    type_name: &'static str,
    payload: Box<dyn Any>,
}

// ============================================================================
// Message Bus
// ============================================================================

/// Type-keyed publish/subscribe bus with a deferred queue.
pub struct MessageBus {
    /// Listeners per message type, in registration order
    listeners: FxHashMap<TypeId, Vec<(ListenerId, ErasedListener)>>,
    /// Messages waiting for the next `update`
    queue: VecDeque<Queued>,
    /// Time budget per `update`, `None` for unlimited
    budget: Option<Duration>,
    /// Next listener id
    next_listener: u64,
}

impl MessageBus {
    /// Create a bus with the default frame budget
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&EventBusConfig::default())
    }

    /// Create a bus from configuration
    #[must_use]
    pub fn with_config(config: &EventBusConfig) -> Self {
        Self {
            listeners: FxHashMap::default(),
            queue: VecDeque::new(),
            budget: config.budget(),
            next_listener: 1,
        }
    }

    /// Subscribe to messages of type `M`.
    pub fn add_listener<M: 'static>(&mut self, mut listener: impl FnMut(&M) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;

        let erased: ErasedListener = Box::new(move |message: &dyn Any| {
            if let Some(message) = message.downcast_ref::<M>() {
                listener(message);
            }
        });

        self.listeners
            .entry(TypeId::of::<M>())
            .or_default()
            .push((id, erased));
        id
    }

    /// Unsubscribe a listener of type `M`.
    ///
    /// Returns `false` if no such listener is registered for `M`.
    pub fn remove_listener<M: 'static>(&mut self, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&TypeId::of::<M>()) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        if list.len() == before {
            return false;
        }

        if list.is_empty() {
            self.listeners.remove(&TypeId::of::<M>());
        }
        true
    }

    /// Check if anything listens to `M`
    #[must_use]
    pub fn has_listeners<M: 'static>(&self) -> bool {
        self.listeners.contains_key(&TypeId::of::<M>())
    }

    /// Deliver a message to its listeners right away.
    ///
    /// Returns `false` if nothing listens to `M`.
    pub fn emit<M: 'static>(&mut self, message: &M) -> bool {
        self.dispatch(TypeId::of::<M>(), std::any::type_name::<M>(), message)
    }

    fn dispatch(&mut self, type_id: TypeId, type_name: &'static str, message: &dyn Any) -> bool {
        let Some(list) = self.listeners.get_mut(&type_id) else {
            log::debug!("Message `{type_name}` has no listeners");
            return false;
        };

        for (_, listener) in list.iter_mut() {
            listener(message);
        }
        true
    }

    /// Queue a message for the next `update`.
    ///
    /// Messages nobody listens to are dropped and `false` is returned.
    pub fn enqueue<M: 'static>(&mut self, message: M) -> bool {
        if !self.has_listeners::<M>() {
            return false;
        }

        self.queue.push_back(Queued {
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            payload: Box::new(message),
        });
        true
    }

    /// Deliver queued messages in order until the queue is empty or the
    /// frame budget is spent.
    ///
    /// Returns the number of messages processed. At least one message is
    /// processed per call so a tiny budget cannot stall the queue.
    pub fn update(&mut self) -> usize {
        let start = Instant::now();
        let mut processed = 0;

        while let Some(queued) = self.queue.pop_front() {
            if !self.dispatch(queued.type_id, queued.type_name, queued.payload.as_ref()) {
                log::warn!("Dropped queued message `{}`", queued.type_name);
            }
            processed += 1;

            if self.budget.is_some_and(|budget| start.elapsed() > budget) {
                log::debug!(
                    "Message budget spent, {} message(s) carried over",
                    self.queue.len()
                );
                break;
            }
        }

        processed
    }

    /// Get the number of queued messages
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued message. Listeners stay registered.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("message_types", &self.listeners.len())
            .field("pending", &self.queue.len())
            .field("budget", &self.budget)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    struct ScoreChanged {
        score: u32,
    }

    #[derive(Debug)]
    struct GameOver;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl FnMut(&ScoreChanged) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |msg: &ScoreChanged| sink.borrow_mut().push(msg.score))
    }

    #[test]
    fn test_emit_without_listeners() {
        let mut bus = MessageBus::new();
        assert!(!bus.emit(&GameOver));
    }

    #[test]
    fn test_emit_reaches_listeners_of_type_only() {
        let mut bus = MessageBus::new();
        let (seen, listener) = recorder();
        bus.add_listener::<ScoreChanged>(listener);

        assert!(bus.emit(&ScoreChanged { score: 10 }));
        assert!(!bus.emit(&GameOver));
        assert_eq!(*seen.borrow(), vec![10]);
    }

    #[test]
    fn test_enqueue_is_deferred() {
        let mut bus = MessageBus::new();
        let (seen, listener) = recorder();
        bus.add_listener::<ScoreChanged>(listener);

        assert!(bus.enqueue(ScoreChanged { score: 1 }));
        assert!(bus.enqueue(ScoreChanged { score: 2 }));
        assert!(seen.borrow().is_empty());
        assert_eq!(bus.pending_count(), 2);

        assert_eq!(bus.update(), 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_enqueue_without_listeners_is_rejected() {
        let mut bus = MessageBus::new();
        assert!(!bus.enqueue(GameOver));
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_remove_listener() {
        let mut bus = MessageBus::new();
        let (seen, listener) = recorder();
        let id = bus.add_listener::<ScoreChanged>(listener);

        assert!(!bus.remove_listener::<GameOver>(id));
        assert!(bus.remove_listener::<ScoreChanged>(id));
        assert!(!bus.remove_listener::<ScoreChanged>(id));
        assert!(!bus.has_listeners::<ScoreChanged>());

        assert!(!bus.emit(&ScoreChanged { score: 5 }));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_remove_one_of_two_listeners() {
        let mut bus = MessageBus::new();
        let (seen, listener) = recorder();
        let (other_seen, other) = recorder();
        let id = bus.add_listener::<ScoreChanged>(listener);
        bus.add_listener::<ScoreChanged>(other);

        assert!(bus.remove_listener::<ScoreChanged>(id));
        assert!(bus.has_listeners::<ScoreChanged>());

        assert!(bus.emit(&ScoreChanged { score: 7 }));
        assert!(seen.borrow().is_empty());
        assert_eq!(*other_seen.borrow(), vec![7]);
    }

    #[test]
    fn test_message_removed_listener_is_dropped_from_queue() {
        let mut bus = MessageBus::new();
        let (_, listener) = recorder();
        let id = bus.add_listener::<ScoreChanged>(listener);

        bus.enqueue(ScoreChanged { score: 1 });
        bus.remove_listener::<ScoreChanged>(id);
        assert_eq!(bus.update(), 1);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_budget_carries_over() {
        let config = EventBusConfig::default().with_max_processing_time_us(1);
        let mut bus = MessageBus::with_config(&config);
        bus.add_listener::<ScoreChanged>(|_: &ScoreChanged| std::thread::sleep(Duration::from_millis(1)));

        for score in 0..3 {
            bus.enqueue(ScoreChanged { score });
        }

        assert_eq!(bus.update(), 1);
        assert_eq!(bus.pending_count(), 2);
        assert_eq!(bus.update(), 1);
        assert_eq!(bus.update(), 1);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_clear_drops_queue() {
        let mut bus = MessageBus::new();
        let (seen, listener) = recorder();
        bus.add_listener::<ScoreChanged>(listener);

        bus.enqueue(ScoreChanged { score: 1 });
        bus.clear();
        assert_eq!(bus.update(), 0);
        assert!(seen.borrow().is_empty());
    }
}
