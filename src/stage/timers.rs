use super::Event;
use std::time::Duration;
use tokio::sync::mpsc::WeakSender;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Closes voting on the active round
    Lock,
    /// Ends the reveal window
    Unlock,
    /// Auto-run countdown before the next round
    AutoStart,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [TimerKind::Lock, TimerKind::Unlock, TimerKind::AutoStart];

    fn slot(self) -> usize {
        match self {
            TimerKind::Lock => 0,
            TimerKind::Unlock => 1,
            TimerKind::AutoStart => 2,
        }
    }
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

/// Local timers of one stage operator.
///
/// A timer only delivers `TimerFired` into the operator's event loop; the loop checks
/// the epoch before acting, so a timer cancelled or re-armed after it already woke up
/// is still ignored.
pub(crate) struct Timers {
    events: WeakSender<Event>,
    slots: [Slot; 3],
}

impl Timers {
    pub fn new(events: WeakSender<Event>) -> Self {
        Self {
            events,
            slots: Default::default(),
        }
    }

    /// Replace any pending timer of this kind with one firing after `delay`
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        let slot = &mut self.slots[kind.slot()];
        slot.epoch += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }

        let epoch = slot.epoch;
        let events = self.events.clone();
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::TimerFired { kind, epoch }).await;
            }
        }));
        tracing::debug!(?kind, delay_ms = delay.as_millis() as u64, "Timer armed");
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        let slot = &mut self.slots[kind.slot()];
        slot.epoch += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
            tracing::debug!(?kind, "Timer cancelled");
        }
    }

    pub fn cancel_all(&mut self) {
        for kind in TimerKind::ALL {
            self.cancel(kind);
        }
    }

    /// Consume a fired timer; `false` if it was cancelled or re-armed since
    pub fn take_fired(&mut self, kind: TimerKind, epoch: u64) -> bool {
        let slot = &mut self.slots[kind.slot()];
        if slot.epoch != epoch || slot.handle.is_none() {
            return false;
        }
        slot.handle = None;
        true
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].handle.is_some()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_delivers_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = Timers::new(tx.downgrade());

        timers.arm(TimerKind::Lock, Duration::from_secs(20));
        assert!(timers.is_armed(TimerKind::Lock));

        match rx.recv().await {
            Some(Event::TimerFired { kind, epoch }) => {
                assert_eq!(kind, TimerKind::Lock);
                assert!(timers.take_fired(kind, epoch));
                assert!(!timers.is_armed(TimerKind::Lock));
            }
            _ => panic!("Expected TimerFired"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_previous_epoch() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = Timers::new(tx.downgrade());

        timers.arm(TimerKind::AutoStart, Duration::from_secs(1));
        timers.arm(TimerKind::AutoStart, Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        match rx.recv().await {
            Some(Event::TimerFired { kind, epoch }) => {
                assert_eq!(started.elapsed(), Duration::from_secs(2));
                assert!(timers.take_fired(kind, epoch));
                // The same event delivered twice is ignored
                assert!(!timers.take_fired(kind, epoch));
            }
            _ => panic!("Expected TimerFired"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_delivery() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = Timers::new(tx.downgrade());

        timers.arm(TimerKind::Lock, Duration::from_secs(1));
        timers.arm(TimerKind::Unlock, Duration::from_secs(1));
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timers.is_armed(TimerKind::Lock));
        assert!(!timers.is_armed(TimerKind::Unlock));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_epoch_is_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let mut timers = Timers::new(tx.downgrade());

        timers.arm(TimerKind::Lock, Duration::from_secs(1));
        // Epoch 1 woke up, then freeze cancelled it before the loop handled it
        timers.cancel(TimerKind::Lock);
        assert!(!timers.take_fired(TimerKind::Lock, 1));
    }
}
