//! Progress and speed reporting for transfers.
//!
//! Speed samples are throttled to at most one per interval so event
//! consumers (UIs, logs) are not flooded on fast links. Events are typed and
//! fan out to every subscriber; a transfer emits exactly one terminal event.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Minimum interval between emitted speed samples.
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Sliding speed sampler over cumulative byte counts.
#[derive(Debug)]
pub struct SpeedMeter {
    min_interval: Duration,
    last: Option<(u64, Instant)>,
}

impl SpeedMeter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Record the cumulative transferred byte count.
    ///
    /// Returns `Some(bytes_per_second)` when at least the minimum interval
    /// has passed since the previous emitted sample, `None` otherwise. The
    /// first call establishes the baseline and emits nothing.
    pub fn sample(&mut self, total_bytes: u64) -> Option<f64> {
        let now = Instant::now();
        match self.last {
            None => {
                self.last = Some((total_bytes, now));
                None
            }
            Some((prev_bytes, prev_at)) => {
                let elapsed = now.duration_since(prev_at);
                if elapsed < self.min_interval {
                    return None;
                }
                let delta = total_bytes.saturating_sub(prev_bytes);
                self.last = Some((total_bytes, now));
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    Some(delta as f64 / secs)
                } else {
                    None
                }
            }
        }
    }

    /// Forget the baseline, e.g. after a pause.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new(SPEED_SAMPLE_INTERVAL)
    }
}

/// Estimated time remaining at the given speed, `None` when speed is zero
/// or the total already transferred.
pub fn time_remaining(total: u64, transferred: u64, bytes_per_second: f64) -> Option<Duration> {
    if bytes_per_second <= 0.0 || transferred >= total {
        return None;
    }
    let remaining = (total - transferred) as f64 / bytes_per_second;
    Some(Duration::from_secs_f64(remaining))
}

/// Typed lifecycle events emitted by transfers.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started {
        id: Uuid,
        name: String,
        total_bytes: Option<u64>,
    },
    Progress {
        id: Uuid,
        transferred: u64,
        total_bytes: Option<u64>,
        speed_bps: Option<f64>,
        eta: Option<Duration>,
    },
    Completed {
        id: Uuid,
        transferred: u64,
    },
    Failed {
        id: Uuid,
        message: String,
    },
    Cancelled {
        id: Uuid,
    },
}

impl TransferEvent {
    /// The transfer this event belongs to.
    pub fn id(&self) -> Uuid {
        match self {
            TransferEvent::Started { id, .. }
            | TransferEvent::Progress { id, .. }
            | TransferEvent::Completed { id, .. }
            | TransferEvent::Failed { id, .. }
            | TransferEvent::Cancelled { id } => *id,
        }
    }

    /// Whether this event ends the transfer's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. }
                | TransferEvent::Failed { .. }
                | TransferEvent::Cancelled { .. }
        )
    }
}

/// Fan-out bus for transfer events.
///
/// Subscribers that drop their receiver are pruned on the next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<TransferEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: TransferEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (as of the last emit).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_meter_first_sample_is_baseline() {
        let mut meter = SpeedMeter::new(Duration::ZERO);
        assert!(meter.sample(0).is_none());
    }

    #[test]
    fn test_speed_meter_emits_after_interval() {
        let mut meter = SpeedMeter::new(Duration::ZERO);
        meter.sample(0);
        std::thread::sleep(Duration::from_millis(5));
        let speed = meter.sample(1000).unwrap();
        assert!(speed > 0.0);
    }

    #[test]
    fn test_speed_meter_throttles() {
        let mut meter = SpeedMeter::new(Duration::from_secs(60));
        meter.sample(0);
        assert!(meter.sample(1000).is_none());
    }

    #[test]
    fn test_speed_meter_reset() {
        let mut meter = SpeedMeter::new(Duration::ZERO);
        meter.sample(500);
        meter.reset();
        assert!(meter.sample(1000).is_none());
    }

    #[test]
    fn test_time_remaining() {
        let eta = time_remaining(1000, 500, 100.0).unwrap();
        assert_eq!(eta, Duration::from_secs(5));
        assert!(time_remaining(1000, 500, 0.0).is_none());
        assert!(time_remaining(1000, 1000, 100.0).is_none());
    }

    #[test]
    fn test_event_terminality() {
        let id = Uuid::new_v4();
        assert!(!TransferEvent::Started {
            id,
            name: "f".into(),
            total_bytes: Some(1)
        }
        .is_terminal());
        assert!(TransferEvent::Completed {
            id,
            transferred: 1
        }
        .is_terminal());
        assert!(TransferEvent::Cancelled { id }.is_terminal());
        assert_eq!(TransferEvent::Cancelled { id }.id(), id);
    }

    #[tokio::test]
    async fn test_event_bus_fan_out_and_prune() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx2);
        let id = Uuid::new_v4();
        bus.emit(TransferEvent::Cancelled { id });

        assert!(matches!(
            rx1.recv().await,
            Some(TransferEvent::Cancelled { .. })
        ));
        // Dropped receiver was pruned on emit
        assert_eq!(bus.subscriber_count(), 1);
    }
}
