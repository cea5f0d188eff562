//! Typed broadcast signals.
//!
//! Emitting never runs subscriber code: each subscriber owns a channel
//! receiver and drains it when it is ready to react. Subscriptions are keyed
//! by a handle and removed when that handle is dropped.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, Sender};

struct Slots<E> {
    next_id: u64,
    senders: Vec<(u64, Sender<E>)>,
}

pub struct Signal<E> {
    slots: Rc<RefCell<Slots<E>>>,
}

impl<E: Clone> Signal<E> {
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel();
        let mut slots = self.slots.borrow_mut();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.senders.push((id, tx));
        Subscription {
            id,
            slots: Rc::downgrade(&self.slots),
            receiver: rx,
        }
    }

    pub fn emit(&self, event: E) {
        let mut slots = self.slots.borrow_mut();
        let Some((last, rest)) = slots.senders.split_last() else {
            return;
        };
        let mut dead = Vec::new();
        for (id, tx) in rest {
            if tx.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        if last.1.send(event).is_err() {
            dead.push(last.0);
        }
        if !dead.is_empty() {
            slots.senders.retain(|(id, _)| !dead.contains(id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.borrow().senders.len()
    }
}

impl<E: Clone> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a [`Signal`]. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: u64,
    slots: Weak<RefCell<Slots<E>>>,
    receiver: Receiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_next(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Takes every event queued so far, oldest first.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                slots.senders.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
