//! Coalesces sparse "I need offset N" touches into bounded range loads.
//!
//! One window is in flight at a time. Everything else waits on a stack of
//! pending windows; the most recently touched region is served first and no
//! window ever exceeds the configured granularity.

use tracing::trace;

use crate::signal::{Signal, Subscription};
use crate::window::RequestWindow;

pub struct RequestScheduler {
    granularity: usize,
    current: Option<RequestWindow>,
    /// Bottom to top; the top is served next.
    pending: Vec<RequestWindow>,
    last_enqueued: Option<usize>,
    ready: Signal<RequestWindow>,
}

impl RequestScheduler {
    pub fn new(granularity: usize) -> Self {
        Self {
            granularity: granularity.max(1),
            current: None,
            pending: Vec::new(),
            last_enqueued: None,
            ready: Signal::new(),
        }
    }

    /// Receives every window that becomes ready to execute.
    pub fn subscribe(&self) -> Subscription<RequestWindow> {
        self.ready.subscribe()
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn current(&self) -> Option<RequestWindow> {
        self.current
    }

    /// Pending windows, bottom of the stack first.
    pub fn pending(&self) -> &[RequestWindow] {
        &self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn add(&mut self, offset: usize) {
        let Some(current) = self.current else {
            let window = RequestWindow::single(offset);
            self.current = Some(window);
            self.last_enqueued = Some(offset);
            self.ready.emit(window);
            return;
        };
        if current.contains(offset) {
            return;
        }

        let sequential = offset > 0
            && self.last_enqueued == Some(offset - 1)
            && self.pending.last().and_then(|top| top.upper()) == Some(offset - 1);
        if sequential {
            self.cut_out(offset, true);
            if let Some(top) = self.pending.last_mut() {
                top.extend(offset);
            }
        } else {
            self.cut_out(offset, false);
            self.pending.push(RequestWindow::single(offset));
        }
        self.last_enqueued = Some(offset);
        self.rechop();
        trace!(offset, pending = self.pending.len(), "scheduled offset");
    }

    /// Retires the in-flight window and promotes the most recent pending one.
    /// Returns the retired window (empty when nothing was in flight).
    pub fn set_finished(&mut self) -> RequestWindow {
        let finished = self.current.take().unwrap_or_default();
        if let Some(next) = self.pending.pop() {
            self.current = Some(next);
            self.ready.emit(next);
        }
        finished
    }

    /// Forgets all pending work without signalling.
    pub fn clear(&mut self) {
        self.current = None;
        self.pending.clear();
        self.last_enqueued = None;
    }

    /// Removes `offset` from every pending window, optionally leaving the
    /// top of the stack untouched.
    fn cut_out(&mut self, offset: usize, keep_top: bool) {
        let top = self.pending.len().checked_sub(1);
        let mut kept = Vec::with_capacity(self.pending.len() + 1);
        for (index, window) in self.pending.drain(..).enumerate() {
            if window.contains(offset) && !(keep_top && Some(index) == top) {
                let (below, above) = window.split_at(offset);
                kept.extend([below, above].into_iter().filter(|w| !w.is_empty()));
            } else {
                kept.push(window);
            }
        }
        self.pending = kept;
    }

    fn rechop(&mut self) {
        let mut merged: Vec<RequestWindow> = Vec::with_capacity(self.pending.len());
        for window in self.pending.drain(..) {
            match merged.last_mut() {
                Some(below) if below.intersects(&window) || below.is_adjacent(&window) => {
                    *below = below.hull(&window);
                }
                _ => merged.push(window),
            }
        }

        let mut chopped = Vec::with_capacity(merged.len());
        for mut window in merged {
            let mut shed = Vec::new();
            while window.len() > self.granularity {
                shed.push(window.take_high(self.granularity));
            }
            if !window.is_empty() {
                chopped.push(window);
            }
            // Highest chunk ends up on top of the stack.
            chopped.extend(shed.into_iter().rev());
        }
        self.pending = chopped;
    }
}

#[cfg(test)]
mod tests {
    use super::RequestScheduler;
    use crate::window::RequestWindow;

    #[test]
    fn first_touch_is_ready_immediately_and_repeat_is_silent() {
        let mut scheduler = RequestScheduler::new(10);
        let ready = scheduler.subscribe();
        scheduler.add(3);
        assert_eq!(ready.drain(), vec![RequestWindow::single(3)]);
        scheduler.add(3);
        assert!(ready.drain().is_empty());
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn sequential_touches_coalesce_into_one_window() {
        let mut scheduler = RequestScheduler::new(3);
        scheduler.add(0);
        scheduler.add(5);
        scheduler.add(6);
        scheduler.add(7);
        assert_eq!(scheduler.current(), Some(RequestWindow::single(0)));
        assert_eq!(scheduler.pending(), &[RequestWindow::new(5, 7)]);
    }

    #[test]
    fn sequential_touches_from_idle_start_in_flight_then_coalesce() {
        let mut scheduler = RequestScheduler::new(3);
        scheduler.add(5);
        scheduler.add(6);
        scheduler.add(7);
        assert_eq!(scheduler.current(), Some(RequestWindow::single(5)));
        assert_eq!(scheduler.pending(), &[RequestWindow::new(6, 7)]);
    }

    #[test]
    fn newest_distant_touch_is_served_first() {
        let mut scheduler = RequestScheduler::new(10);
        let ready = scheduler.subscribe();
        scheduler.add(100);
        for offset in 0..10 {
            scheduler.add(offset);
        }
        assert_eq!(scheduler.pending(), &[RequestWindow::new(0, 9)]);
        scheduler.add(50);
        ready.drain();

        let finished = scheduler.set_finished();
        assert_eq!(finished, RequestWindow::single(100));
        assert_eq!(ready.drain(), vec![RequestWindow::single(50)]);

        scheduler.set_finished();
        assert_eq!(ready.drain(), vec![RequestWindow::new(0, 9)]);
        assert_eq!(scheduler.set_finished(), RequestWindow::new(0, 9));
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.set_finished(), RequestWindow::empty());
    }

    #[test]
    fn touching_a_pending_offset_cuts_it_out_and_prioritizes_it() {
        let mut scheduler = RequestScheduler::new(20);
        scheduler.add(100);
        for offset in 0..10 {
            scheduler.add(offset);
        }
        scheduler.add(200);
        scheduler.add(4);
        assert_eq!(
            scheduler.pending(),
            &[
                RequestWindow::new(0, 3),
                RequestWindow::new(5, 9),
                RequestWindow::single(200),
                RequestWindow::single(4),
            ]
        );
    }

    #[test]
    fn no_window_exceeds_granularity() {
        let granularity = 4;
        let mut scheduler = RequestScheduler::new(granularity);
        let ready = scheduler.subscribe();
        let touches = [0usize, 1, 2, 3, 4, 5, 6, 7, 8, 9, 30, 31, 32, 33, 34, 35, 12, 13, 14];
        for offset in touches {
            scheduler.add(offset);
            assert!(scheduler.pending().iter().all(|w| w.len() <= granularity));
        }

        let mut served = Vec::new();
        while !scheduler.is_idle() {
            served.push(scheduler.set_finished());
        }
        let emitted = ready.drain();
        assert!(emitted.iter().all(|w| w.len() <= granularity));
        assert!(served.iter().all(|w| w.len() <= granularity));

        let mut covered: Vec<usize> = served.iter().flat_map(|w| w.offsets()).collect();
        covered.sort_unstable();
        covered.dedup();
        let mut expected = touches.to_vec();
        expected.sort_unstable();
        assert_eq!(covered, expected);
    }

    #[test]
    fn chopping_sheds_the_high_end_first() {
        let mut scheduler = RequestScheduler::new(3);
        scheduler.add(100);
        for offset in 1..=4 {
            scheduler.add(offset);
        }
        assert_eq!(
            scheduler.pending(),
            &[RequestWindow::single(1), RequestWindow::new(2, 4)]
        );
    }

    #[test]
    fn clear_drops_in_flight_and_pending_state() {
        let mut scheduler = RequestScheduler::new(5);
        scheduler.add(1);
        scheduler.add(9);
        scheduler.clear();
        assert!(scheduler.is_idle());
        assert!(scheduler.pending().is_empty());
    }
}
