use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Reschedule token. Only the most recently issued token is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameToken(pub(crate) u64);

impl FrameToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Decides when the next loop iteration runs.
pub trait Scheduler {
    /// Request an iteration for `token`.
    fn schedule(&mut self, token: FrameToken);

    /// Wait until the next requested iteration is due. `None` when nothing is pending.
    fn next(&mut self) -> Option<FrameToken>;

    /// Drop pending requests.
    fn cancel(&mut self);
}

/// Paces iterations to a target frame rate.
///
/// An iteration that overruns its slot is followed immediately by the next
/// one; late frames are never queued up.
pub struct FramePacer {
    interval: Duration,
    pending: Option<FrameToken>,
    last_fired: Option<Instant>,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        let interval = Duration::from_secs(1) / target_fps.max(1);
        Self {
            interval,
            pending: None,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Scheduler for FramePacer {
    fn schedule(&mut self, token: FrameToken) {
        self.pending = Some(token);
    }

    fn next(&mut self) -> Option<FrameToken> {
        let token = self.pending.take()?;
        if let Some(last) = self.last_fired {
            let due = last + self.interval;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.last_fired = Some(Instant::now());
        Some(token)
    }

    fn cancel(&mut self) {
        self.pending = None;
    }
}

#[derive(Default)]
struct ManualQueue {
    pending: VecDeque<FrameToken>,
    scheduled: u64,
}

/// Scheduler driven by hand. Clones share one queue, so a test can keep a
/// handle while the loop owns another.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Rc<RefCell<ManualQueue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().pending.len()
    }

    /// Total number of `schedule` calls so far.
    pub fn scheduled(&self) -> u64 {
        self.queue.borrow().scheduled
    }

    /// Pop the next pending token without going through a loop.
    pub fn pop(&self) -> Option<FrameToken> {
        self.queue.borrow_mut().pending.pop_front()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, token: FrameToken) {
        let mut queue = self.queue.borrow_mut();
        queue.pending.push_back(token);
        queue.scheduled += 1;
    }

    fn next(&mut self) -> Option<FrameToken> {
        self.pop()
    }

    fn cancel(&mut self) {
        self.queue.borrow_mut().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_spaces_iterations() {
        let mut pacer = FramePacer::new(100);
        assert_eq!(pacer.interval(), Duration::from_millis(10));

        let start = Instant::now();
        for id in 0..3 {
            pacer.schedule(FrameToken(id));
            assert_eq!(pacer.next(), Some(FrameToken(id)));
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pacer_is_empty_after_cancel() {
        let mut pacer = FramePacer::new(30);
        pacer.schedule(FrameToken(1));
        pacer.cancel();
        assert_eq!(pacer.next(), None);
    }

    #[test]
    fn manual_scheduler_shares_queue_between_clones() {
        let handle = ManualScheduler::new();
        let mut owned = handle.clone();
        owned.schedule(FrameToken(4));
        owned.schedule(FrameToken(5));
        assert_eq!(handle.pending(), 2);
        assert_eq!(handle.pop(), Some(FrameToken(4)));
        owned.cancel();
        assert_eq!(handle.pending(), 0);
        assert_eq!(handle.scheduled(), 2);
    }
}
