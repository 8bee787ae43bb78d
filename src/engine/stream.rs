// src/engine/stream.rs
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;


struct Channel<T> {
    history: Vec<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    producers: usize,
    closed: bool,
    sentinel: bool,
}

/// Append-only, multi-subscriber record channel.
///
/// Every subscriber receives the full record sequence, including records emitted before it subscribed.
/// The stream closes once every registered producer has released its `Emitter`.
pub struct Stream<T> {
    name: Arc<str>,
    inner: Arc<Mutex<Channel<T>>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream {
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Stream<T> {
    /// Open stream waiting for producers.
    pub fn new(name: &str) -> Self {
        Stream {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(Channel {
                history: Vec::new(),
                subscribers: Vec::new(),
                producers: 0,
                closed: false,
                sentinel: false,
            })),
        }
    }

    /// Bounded stream that is already complete.
    pub fn closed_with(name: &str, items: Vec<T>) -> Self {
        let stream = Stream::new(name);
        {
            let mut channel = stream.lock();
            channel.history = items;
            channel.closed = true;
        }
        stream
    }

    /// Designated "no value supplied" stream. Joins pair every key of the other side with `placeholder`.
    pub fn sentinel(name: &str, placeholder: T) -> Self {
        let stream = Stream::closed_with(name, vec![placeholder]);
        stream.lock().sentinel = true;
        stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_sentinel(&self) -> bool {
        self.lock().sentinel
    }

    /// Producers currently registered.
    pub fn producers(&self) -> usize {
        self.lock().producers
    }

    /// Number of records emitted so far.
    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a producer. The stream stays open until this and every other emitter is released.
    pub fn emitter(&self) -> Emitter<T> {
        let mut channel = self.lock();
        debug_assert!(!channel.closed, "emitter registered on closed stream {}", self.name);
        channel.producers += 1;
        Emitter {
            stream: self.clone(),
            released: false,
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = self.lock();
        for item in &channel.history {
            let _ = tx.send(item.clone());
        }
        if !channel.closed {
            channel.subscribers.push(tx);
        }
        Subscription {
            name: self.name.clone(),
            sentinel: channel.sentinel,
            rx,
        }
    }

    /// Snapshot of everything emitted so far.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Channel<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}


/// Producer handle on a stream. Dropping it releases the producer.
pub struct Emitter<T: Clone + Send + 'static> {
    stream: Stream<T>,
    released: bool,
}

impl<T: Clone + Send + 'static> Emitter<T> {
    pub fn emit(&self, item: T) {
        let mut channel = self.stream.lock();
        channel.subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        channel.history.push(item);
    }

    pub fn stream_name(&self) -> &str {
        self.stream.name()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut channel = self.stream.lock();
        channel.producers = channel.producers.saturating_sub(1);
        if channel.producers == 0 {
            channel.closed = true;
            channel.subscribers.clear();
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Emitter<T> {
    fn drop(&mut self) {
        self.release();
    }
}


/// Consumer side of a stream. Yields `None` once the stream is closed and drained.
pub struct Subscription<T> {
    name: Arc<str>,
    sentinel: bool,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    /// Waits for close and returns every record.
    pub async fn drain(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        items
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<T> {
        UnboundedReceiverStream::new(self.rx)
    }
}
