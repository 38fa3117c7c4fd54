//! Event loop adapter: timers, immediates, and I/O task completion delivery.
//!
//! The loop owns a current-thread tokio reactor for sockets and DNS. Timer
//! and immediate queues live on the host side so that callback invocation
//! stays under the runtime's control; the adapter itself never enters the
//! engine.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rquickjs::{Function, Persistent, Value};
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::LocalSet;

use crate::error::{Result, RuntimeError};
use crate::web::http_client::HttpResponseData;

/// Completion events posted by I/O tasks back to the loop.
#[derive(Debug)]
pub enum IoEvent {
    /// An HTTP client task finished; `result` carries response data or a
    /// phase-labelled error message.
    FetchDone {
        id: u64,
        result: std::result::Result<HttpResponseData, String>,
    },
}

/// A scheduled callback. `interval` marks a repeating timer; `seq` breaks
/// ties between timers sharing a deadline (registration order wins).
pub struct TimerEntry {
    pub id: u64,
    pub callback: Persistent<Function<'static>>,
    pub args: Vec<Persistent<Value<'static>>>,
    pub when: Instant,
    pub interval: Option<Duration>,
    pub seq: u64,
}

/// A `setImmediate` callback, run once in the check phase.
pub struct ImmediateEntry {
    pub id: u64,
    pub callback: Persistent<Function<'static>>,
    pub args: Vec<Persistent<Value<'static>>>,
}

/// Queue state shared with host functions and spawned tasks.
pub struct LoopShared {
    timers: RefCell<Vec<TimerEntry>>,
    cancelled: RefCell<HashSet<u64>>,
    immediates: RefCell<VecDeque<ImmediateEntry>>,
    next_id: Cell<u64>,
    seq: Cell<u64>,
    live_tasks: Cell<usize>,
    events_tx: UnboundedSender<IoEvent>,
    wake: Notify,
    /// Spawn target. Cleared at shutdown so queued tasks cannot outlive the
    /// loop; tasks hold `Rc<LoopShared>`, so the strong reference must not
    /// point back at them.
    local: RefCell<Option<Rc<LocalSet>>>,
}

impl LoopShared {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    pub fn schedule_timer(
        &self,
        callback: Persistent<Function<'static>>,
        args: Vec<Persistent<Value<'static>>>,
        delay: Duration,
        interval: Option<Duration>,
    ) -> u64 {
        let id = self.next_id();
        self.timers.borrow_mut().push(TimerEntry {
            id,
            callback,
            args,
            when: Instant::now() + delay,
            interval,
            seq: self.next_seq(),
        });
        tracing::trace!(id, ?delay, repeating = interval.is_some(), "timer armed");
        id
    }

    /// Cancel a timer. Returns false when no such timer is live. A timer
    /// already pulled into the current due batch is suppressed through the
    /// cancellation set instead.
    pub fn clear_timer(&self, id: u64) -> bool {
        let mut timers = self.timers.borrow_mut();
        if let Some(index) = timers.iter().position(|timer| timer.id == id) {
            timers.remove(index);
            true
        } else {
            self.cancelled.borrow_mut().insert(id);
            false
        }
    }

    pub fn schedule_immediate(
        &self,
        callback: Persistent<Function<'static>>,
        args: Vec<Persistent<Value<'static>>>,
    ) -> u64 {
        let id = self.next_id();
        self.immediates
            .borrow_mut()
            .push_back(ImmediateEntry { id, callback, args });
        id
    }

    pub fn clear_immediate(&self, id: u64) -> bool {
        let mut immediates = self.immediates.borrow_mut();
        let before = immediates.len();
        immediates.retain(|entry| entry.id != id);
        immediates.len() != before
    }

    /// True when the id was cancelled while its entry was in flight.
    /// Consumes the cancellation mark.
    pub fn was_cancelled(&self, id: u64) -> bool {
        self.cancelled.borrow_mut().remove(&id)
    }

    /// Remove and return every timer due at `now`, ordered by deadline then
    /// registration sequence.
    pub fn take_due_timers(&self, now: Instant) -> Vec<TimerEntry> {
        let mut timers = self.timers.borrow_mut();
        let mut due = Vec::new();
        let mut index = 0;
        while index < timers.len() {
            if timers[index].when <= now {
                due.push(timers.remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|timer| (timer.when, timer.seq));
        due
    }

    /// Re-arm a repeating timer after its callback returned.
    pub fn rearm(&self, mut timer: TimerEntry, interval: Duration) {
        timer.when = Instant::now() + interval;
        timer.seq = self.next_seq();
        self.timers.borrow_mut().push(timer);
    }

    /// Swap out the current immediate queue. Immediates scheduled by the
    /// callbacks themselves land in the next turn.
    pub fn take_immediates(&self) -> VecDeque<ImmediateEntry> {
        std::mem::take(&mut self.immediates.borrow_mut())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|timer| timer.when).min()
    }

    /// Spawn an I/O task on the loop's local set, tracking it as a live
    /// handle until it completes. After shutdown the future is dropped
    /// unpolled.
    pub fn spawn<F>(self: &Rc<Self>, future: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        let Some(local) = self.local.borrow().clone() else {
            return;
        };
        self.live_tasks.set(self.live_tasks.get() + 1);
        let shared = Rc::clone(self);
        local.spawn_local(async move {
            let _guard = TaskGuard { shared };
            future.await;
        });
    }

    /// Deliver a completion event and wake a parked loop.
    pub fn post_event(&self, event: IoEvent) {
        // The receiver only disappears during teardown; a lost event is fine
        // at that point.
        let _ = self.events_tx.send(event);
        self.wake.notify_one();
    }

    pub fn alive(&self) -> bool {
        !self.timers.borrow().is_empty()
            || !self.immediates.borrow().is_empty()
            || self.live_tasks.get() > 0
    }

    /// Drop every queued callback. Saved engine values are released here,
    /// while the engine is still alive.
    pub fn close_all(&self) {
        self.timers.borrow_mut().clear();
        self.immediates.borrow_mut().clear();
        self.cancelled.borrow_mut().clear();
    }
}

struct TaskGuard {
    shared: Rc<LoopShared>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.shared.live_tasks.set(self.shared.live_tasks.get() - 1);
        self.shared.wake.notify_one();
    }
}

/// The reactor half: owns the tokio runtime, the local task set, and the
/// receiving end of the completion channel.
pub struct EventLoop {
    tokio: tokio::runtime::Runtime,
    local: Rc<LocalSet>,
    events_rx: UnboundedReceiver<IoEvent>,
    shared: Rc<LoopShared>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let tokio = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| RuntimeError::fatal(format!("reactor init failed: {err}")))?;
        let local = Rc::new(LocalSet::new());
        let (events_tx, events_rx) = unbounded_channel();
        let shared = Rc::new(LoopShared {
            timers: RefCell::new(Vec::new()),
            cancelled: RefCell::new(HashSet::new()),
            immediates: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            seq: Cell::new(0),
            live_tasks: Cell::new(0),
            events_tx,
            wake: Notify::new(),
            local: RefCell::new(Some(Rc::clone(&local))),
        });
        Ok(Self {
            tokio,
            local,
            events_rx,
            shared,
        })
    }

    pub fn shared(&self) -> Rc<LoopShared> {
        Rc::clone(&self.shared)
    }

    /// Anything left to do: queued callbacks, live I/O tasks, or undelivered
    /// completion events.
    pub fn alive(&self) -> bool {
        self.shared.alive() || !self.events_rx.is_empty()
    }

    /// One non-blocking reactor pass: let ready I/O tasks progress, then
    /// collect whatever completions they posted.
    pub fn pump_events(&mut self) -> Vec<IoEvent> {
        self.tokio
            .block_on(self.local.run_until(tokio::task::yield_now()));
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Park until the next timer deadline, a task completion, or a posted
    /// event. Must only be called while `alive()`; a loop with neither
    /// timers nor tasks would otherwise sleep forever.
    pub fn park(&mut self) {
        let deadline = self.shared.next_deadline();
        let shared = Rc::clone(&self.shared);
        let local = Rc::clone(&self.local);
        self.tokio.block_on(local.run_until(async {
            let notified = shared.wake.notified();
            match deadline {
                Some(when) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(when.into()) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }));
    }

    /// Two-phase shutdown: drop queued callbacks, cancel outstanding tasks,
    /// and drain the completion channel so no event survives the loop.
    pub fn close_all_and_drain(&mut self) {
        self.shared.close_all();
        self.shared.local.borrow_mut().take();
        // The last strong reference goes away here; dropping the local set
        // aborts every task still in flight.
        self.local = Rc::new(LocalSet::new());
        while self.events_rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_loop() -> EventLoop {
        EventLoop::new().expect("reactor init")
    }

    #[test]
    fn fresh_loop_is_idle() {
        let event_loop = empty_loop();
        assert!(!event_loop.alive());
        assert!(event_loop.shared().next_deadline().is_none());
    }

    #[test]
    fn cancelling_unknown_timer_marks_it_for_suppression() {
        let event_loop = empty_loop();
        let shared = event_loop.shared();
        assert!(!shared.clear_timer(42));
        assert!(shared.was_cancelled(42));
        // The mark is consumed.
        assert!(!shared.was_cancelled(42));
    }

}
