use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashSet},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry {
    deadline: Instant,
    id: TimerId,
    period: Option<Duration>,
    callback: Box<dyn FnMut()>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline).then(self.id.0.cmp(&other.id.0))
    }
}

/// Min-heap of (deadline, callback). One-shot timers fire once;
/// periodic timers re-arm after their callback has run.
pub struct Timers {
    heap: BinaryHeap<Reverse<Entry>>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Timers {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    pub fn one_shot<F>(&mut self, after: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.arm(after, None, Box::new(callback))
    }

    pub fn periodic<F>(&mut self, period: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.arm(period, Some(period), Box::new(callback))
    }

    fn arm(
        &mut self,
        after: Duration,
        period: Option<Duration>,
        callback: Box<dyn FnMut()>,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse(Entry {
            deadline: Instant::now() + after,
            id,
            period,
            callback,
        }));
        id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Deadline of the nearest armed timer, for the reactor wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.0.deadline)
    }

    /// Runs every expired timer. Returns the number fired.
    pub fn run_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(mut entry) = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            (entry.callback)();
            fired += 1;
            if let Some(period) = entry.period {
                entry.deadline = now + period;
                self.heap.push(Reverse(entry));
            }
        }
        fired
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn one_shot_fires_once() {
        let mut timers = Timers::new();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        timers.one_shot(Duration::from_millis(0), move || *h.borrow_mut() += 1);
        let now = Instant::now() + Duration::from_millis(1);
        assert_eq!(timers.run_expired(now), 1);
        assert_eq!(timers.run_expired(now + Duration::from_secs(1)), 0);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn periodic_rearms() {
        let mut timers = Timers::new();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        timers.periodic(Duration::from_millis(10), move || *h.borrow_mut() += 1);
        let mut now = Instant::now();
        for _ in 0..3 {
            now += Duration::from_millis(11);
            timers.run_expired(now);
        }
        assert_eq!(*hits.borrow(), 3);
    }

    #[test]
    fn cancel_suppresses_callback() {
        let mut timers = Timers::new();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        let id = timers.one_shot(Duration::from_millis(0), move || *h.borrow_mut() += 1);
        timers.cancel(id);
        timers.run_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(*hits.borrow(), 0);
    }
}
