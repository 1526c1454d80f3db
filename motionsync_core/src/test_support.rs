//! In-memory context and transport for unit tests.

use async_trait::async_trait;
use motionsync_env::{
    BroadcastTransport, BufferedCall, CallTarget, EnvError, Inbound, PeerId, ReplicationFrame,
    ServerTime, SyncContext, Timestamp,
};
use std::sync::Mutex;
use std::time::Duration;

/// Manually driven clocks. `sleep` advances both.
pub struct TestContext {
    ticks_per_second: i64,
    now: Mutex<i64>,
    server_ms: Mutex<i64>,
}

impl TestContext {
    pub fn new(ticks_per_second: i64) -> Self {
        Self {
            ticks_per_second,
            now: Mutex::new(0),
            server_ms: Mutex::new(0),
        }
    }

    pub fn set_now(&self, ticks: i64) {
        *self.now.lock().unwrap() = ticks;
    }

    pub fn set_server(&self, ms: i64) {
        *self.server_ms.lock().unwrap() = ms;
    }
}

#[async_trait]
impl SyncContext for TestContext {
    fn now(&self) -> Timestamp {
        Timestamp(*self.now.lock().unwrap())
    }

    fn server_now(&self) -> ServerTime {
        ServerTime(*self.server_ms.lock().unwrap())
    }

    async fn sleep(&self, duration: Duration) {
        let ms = duration.as_millis() as i64;
        *self.now.lock().unwrap() += ms * self.ticks_per_second / 1000;
        *self.server_ms.lock().unwrap() += ms;
    }

    fn seed(&self) -> u64 {
        0
    }
}

/// Records outgoing traffic and serves a manually filled inbox.
pub struct RecordingTransport {
    peer: PeerId,
    calls: Mutex<Vec<(BufferedCall, CallTarget)>>,
    frames: Mutex<Vec<ReplicationFrame>>,
    inbox: Mutex<Vec<Inbound>>,
    failing: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            calls: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            inbox: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<(BufferedCall, CallTarget)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<ReplicationFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.frames.lock().unwrap().clear();
    }

    pub fn push(&self, inbound: Inbound) {
        self.inbox.lock().unwrap().push(inbound);
    }

    pub fn fail_sends(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl BroadcastTransport for RecordingTransport {
    fn call(&self, call: BufferedCall, target: CallTarget) -> Result<(), EnvError> {
        if *self.failing.lock().unwrap() {
            return Err(EnvError::network("closed"));
        }
        self.calls.lock().unwrap().push((call, target));
        Ok(())
    }

    fn replicate(&self, frame: ReplicationFrame) -> Result<(), EnvError> {
        if *self.failing.lock().unwrap() {
            return Err(EnvError::network("closed"));
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn drain(&self) -> Vec<Inbound> {
        std::mem::take(&mut *self.inbox.lock().unwrap())
    }

    fn local_peer(&self) -> PeerId {
        self.peer
    }
}
