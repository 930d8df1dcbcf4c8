use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Delivery, OrderMessage, OrderQueue, QueueError};

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    message: OrderMessage,
    attempts: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    /// Received but not yet settled, by receipt.
    unacked: HashMap<String, Entry>,
}

/// In-process queue. Nacked messages go to the back of the line.
///
/// Unacked messages live only as long as the process, so this queue gives
/// no crash recovery. Use [`super::SqliteOrderQueue`] for that.
#[derive(Debug, Default)]
pub struct MemoryOrderQueue {
    state: Mutex<State>,
}

impl MemoryOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages received and not yet settled.
    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

#[async_trait]
impl OrderQueue for MemoryOrderQueue {
    async fn enqueue(&self, message: OrderMessage) -> Result<String, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.state.lock().await.ready.push_back(Entry {
            message_id: message_id.clone(),
            message,
            attempts: 0,
        });
        Ok(message_id)
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(mut entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        entry.attempts += 1;
        let receipt = uuid::Uuid::new_v4().to_string();
        let delivery = Delivery {
            message_id: entry.message_id.clone(),
            receipt: receipt.clone(),
            message: entry.message.clone(),
            attempt: entry.attempts,
        };
        state.unacked.insert(receipt, entry);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .unacked
            .remove(&delivery.receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entry = state
            .unacked
            .remove(&delivery.receipt)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))?;
        state.ready.push_back(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let queue = MemoryOrderQueue::new();
        queue.enqueue(OrderMessage::new("o-1", "u")).await.unwrap();
        queue.enqueue(OrderMessage::new("o-2", "u")).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(first.message.order_id, "o-1");
        assert_eq!(first.attempt, 1);
        assert_eq!(queue.unacked_len().await, 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.unacked_len().await, 0);
        assert!(queue.ack(&first).await.is_err());

        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.message.order_id, "o-2");
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_new_receipt() {
        let queue = MemoryOrderQueue::new();
        let id = queue.enqueue(OrderMessage::new("o-1", "u")).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        queue.nack(&first).await.unwrap();

        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.message_id, id);
        assert_ne!(again.receipt, first.receipt);
        assert_eq!(again.attempt, 2);
    }
}
