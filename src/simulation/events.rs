//! Ordered listener lists with short-circuiting.

use glam::DVec3;

use crate::world::MapRegionKey;

/// What a listener wants to happen after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    PassThrough,
    /// Keep calling listeners but skip the default action.
    PreventDefault,
    /// Stop calling listeners; the default action still runs unless an
    /// earlier listener prevented it.
    PreventSubsequent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub default_prevented: bool,
    pub listeners_run: usize,
}

pub type ListenerId = u64;

type Listener<E> = Box<dyn FnMut(&mut E) -> Handling + Send>;

pub struct EventBus<E> {
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: ListenerId,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        EventBus {
            listeners: Vec::new(),
            next_id: 1,
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners run in subscription order.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&mut E) -> Handling + Send + 'static,
    ) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn dispatch(&mut self, event: &mut E) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for (_, listener) in &mut self.listeners {
            outcome.listeners_run += 1;
            match listener(event) {
                Handling::PassThrough => {}
                Handling::PreventDefault => outcome.default_prevented = true,
                Handling::PreventSubsequent => break,
            }
        }
        outcome
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A lightning strike rolled by the server for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightningStrike {
    pub region: MapRegionKey,
    pub position: DVec3,
    /// Seed for bolt shape, so every client draws the same bolt.
    pub seed: u64,
}
