//! Two-channel priority queue: expedited messages are always drained
//! before normal ones on the same sender/receiver pair (spec §5).

use tokio::sync::mpsc;

pub struct PrioritySender<T> {
    expedited: mpsc::Sender<T>,
    normal: mpsc::Sender<T>,
}

impl<T> Clone for PrioritySender<T> {
    fn clone(&self) -> Self {
        Self { expedited: self.expedited.clone(), normal: self.normal.clone() }
    }
}

impl<T> PrioritySender<T> {
    pub async fn send_normal(&self, value: T) -> Result<(), mpsc::error::SendError<T>> {
        self.normal.send(value).await
    }

    pub async fn send_expedited(&self, value: T) -> Result<(), mpsc::error::SendError<T>> {
        self.expedited.send(value).await
    }
}

pub struct PriorityReceiver<T> {
    expedited: mpsc::Receiver<T>,
    normal: mpsc::Receiver<T>,
}

impl<T> PriorityReceiver<T> {
    /// Receives the next message, always preferring whatever is waiting
    /// on the expedited channel.
    pub async fn recv(&mut self) -> Option<T> {
        if let Ok(value) = self.expedited.try_recv() {
            return Some(value);
        }
        tokio::select! {
            biased;
            value = self.expedited.recv() => value,
            value = self.normal.recv() => value,
        }
    }
}

pub struct PriorityChannel;

impl PriorityChannel {
    pub fn new<T>(capacity: usize) -> (PrioritySender<T>, PriorityReceiver<T>) {
        let (expedited_tx, expedited_rx) = mpsc::channel(capacity);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        (
            PrioritySender { expedited: expedited_tx, normal: normal_tx },
            PriorityReceiver { expedited: expedited_rx, normal: normal_rx },
        )
    }
}
