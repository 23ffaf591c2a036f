use std::future::Future;

use tokio::{sync::mpsc, task::JoinHandle};

use super::model::UserRecord;

/// Live feed of one user's record.
///
/// Updates are delivered through a bounded queue: when the consumer falls
/// behind, the producer waits instead of buffering without limit. Dropping
/// the subscription (or calling [`Subscription::cancel`]) stops the producer.
pub struct Subscription {
    updates: mpsc::Receiver<UserRecord>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F, Fut>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<UserRecord>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, updates) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(producer(tx));
        Self { updates, task }
    }

    /// Next re-queried record, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<UserRecord> {
        self.updates.recv().await
    }

    pub fn cancel(&mut self) {
        self.updates.close();
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
