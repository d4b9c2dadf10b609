//! In-memory consumer transport for tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kafka_facade::{
    ConsumerSettings, ConsumerTransport, KafkaError, PartitionControl, Pipeline, RawMessage,
    Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct NoopControl;

#[async_trait]
impl PartitionControl for NoopControl {
    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// Feeds messages pushed with [`MemoryTransport::deliver`] to the pipeline and
/// records every lifecycle call.
pub struct MemoryTransport {
    sender: mpsc::UnboundedSender<RawMessage>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<RawMessage>>>,
    stop: watch::Sender<bool>,
    processed: watch::Sender<usize>,
    connects: StdMutex<Vec<ConsumerSettings>>,
    subscribes: StdMutex<Vec<(String, bool)>>,
    disconnects: StdMutex<usize>,
    fail_connect: AtomicBool,
    fail_subscribe: StdMutex<Option<String>>,
    fail_disconnect: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        let (sender, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            inbox: Mutex::new(Some(inbox)),
            stop: watch::channel(false).0,
            processed: watch::channel(0).0,
            connects: StdMutex::new(Vec::new()),
            subscribes: StdMutex::new(Vec::new()),
            disconnects: StdMutex::new(0),
            fail_connect: AtomicBool::new(false),
            fail_subscribe: StdMutex::new(None),
            fail_disconnect: AtomicBool::new(false),
        })
    }

    pub fn failing_connect() -> Arc<Self> {
        let transport = Self::new();
        transport.fail_connect.store(true, Ordering::SeqCst);
        transport
    }

    pub fn failing_subscribe(topic: &str) -> Arc<Self> {
        let transport = Self::new();
        *transport.fail_subscribe.lock().unwrap() = Some(topic.to_string());
        transport
    }

    /// Stops the run loop on disconnect but reports the disconnect as failed.
    pub fn failing_disconnect() -> Arc<Self> {
        let transport = Self::new();
        transport.fail_disconnect.store(true, Ordering::SeqCst);
        transport
    }

    pub fn deliver(&self, message: RawMessage) {
        self.sender.send(message).unwrap();
    }

    pub fn connects(&self) -> Vec<ConsumerSettings> {
        self.connects.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> Vec<(String, bool)> {
        self.subscribes.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    /// Waits until the pipeline has finished `count` deliveries.
    pub async fn wait_processed(&self, count: usize) {
        let mut processed = self.processed.subscribe();
        tokio::time::timeout(WAIT, processed.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for deliveries")
            .unwrap();
    }
}

#[async_trait]
impl ConsumerTransport for MemoryTransport {
    async fn connect(&self, settings: &ConsumerSettings) -> Result<()> {
        self.connects.lock().unwrap().push(settings.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(KafkaError::Other("broker unreachable".to_string()));
        }
        self.stop.send_replace(false);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<()> {
        if self.fail_subscribe.lock().unwrap().as_deref() == Some(topic) {
            return Err(KafkaError::Other("unknown topic or partition".to_string()));
        }
        self.subscribes
            .lock()
            .unwrap()
            .push((topic.to_string(), from_beginning));
        Ok(())
    }

    async fn run(&self, pipeline: Arc<Pipeline>) -> Result<()> {
        let mut inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| KafkaError::Other("run loop already active".to_string()))?;
        let mut stop = self.stop.subscribe();

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(raw) => {
                        pipeline.process(raw, Arc::new(NoopControl)).await;
                        self.processed.send_modify(|n| *n += 1);
                    }
                    None => break,
                },
                _ = stop.changed() => {}
            }
        }

        *self.inbox.lock().await = Some(inbox);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        self.stop.send_replace(true);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(KafkaError::Other("leave group timed out".to_string()));
        }
        Ok(())
    }
}

/// Receives one item or fails the test after [`WAIT`].
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for handler")
        .expect("handler channel closed")
}
