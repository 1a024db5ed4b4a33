//! Shared helpers for integration tests: a scriptable in-memory transport
//! and event-stream utilities.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use pulselink::{
    Algorithm, AlgorithmMode, AlgorithmParameters, DeviceEvent, Error, SessionState, Transport,
};

/// Install a tracing subscriber honoring `RUST_LOG`, once per test binary.
/// Makes failing state-machine tests debuggable with `RUST_LOG=debug`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test-side controller for a [`MockTransport`]. Records every frame the
/// session transmits and injects synthetic failures on demand.
#[derive(Clone, Default)]
pub struct MockLink {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    sent: Mutex<Vec<Bytes>>,
    connects: AtomicU32,
    fail_connects: AtomicU32,
    fail_sends: AtomicU32,
    battery: AtomicU8,
}

impl MockLink {
    pub fn new() -> Self {
        let link = MockLink::default();
        link.inner.battery.store(90, Ordering::SeqCst);
        link
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Frames transmitted so far, draining the record.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.inner.sent.lock().unwrap())
    }

    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: u32) {
        self.inner.fail_sends.store(count, Ordering::SeqCst);
    }

    pub fn set_battery(&self, percent: u8) {
        self.inner.battery.store(percent, Ordering::SeqCst);
    }
}

/// The session-side half of a [`MockLink`].
pub struct MockTransport {
    inner: Arc<MockInner>,
}

fn consume_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            count.checked_sub(1)
        })
        .is_ok()
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        if consume_failure(&self.inner.fail_connects) {
            return Err(Error::NotConnected);
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), Error> {
        if consume_failure(&self.inner.fail_sends) {
            return Err(Error::NotConnected);
        }
        self.inner.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn read_battery(&mut self) -> Result<u8, Error> {
        Ok(self.inner.battery.load(Ordering::SeqCst))
    }
}

pub fn default_algorithm() -> Algorithm {
    Algorithm::new(AlgorithmMode::ThreePhase, AlgorithmParameters::default())
}

/// Receive events into `log` until the given connection status appears.
/// Panics if it does not show up within a generous (auto-advanced) window.
pub async fn wait_for_status(
    events: &mut UnboundedReceiver<DeviceEvent>,
    wanted: SessionState,
    log: &mut Vec<DeviceEvent>,
) {
    timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let reached = event == DeviceEvent::ConnectionStatusChanged(wanted);
            log.push(event);
            if reached {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached status {wanted}"));
}

/// Drain everything currently queued on the event channel into `log`.
pub fn drain_events(events: &mut UnboundedReceiver<DeviceEvent>, log: &mut Vec<DeviceEvent>) {
    while let Ok(event) = events.try_recv() {
        log.push(event);
    }
}
