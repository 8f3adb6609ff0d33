use crate::data::SessionId;
use crate::network::ServerEvent;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;
use tracing::debug;

/// A derived event waiting to be handed to the fan-out engine once its
/// session's broadcast delay elapses.
pub struct DelayedDelivery {
    pub room: SessionId,
    pub event: ServerEvent,
}

/// Schedules delayed fan-out using a single timer wheel. `schedule` is
/// non-blocking; a background task drains the wheel and dispatches ready
/// deliveries to `ready_rx`. Zero-delay events bypass the scheduler entirely
/// at the call site and go straight to fan-out.
pub struct DelayScheduler {
    queue_tx: mpsc::UnboundedSender<(Duration, DelayedDelivery)>,
}

impl DelayScheduler {
    /// Spawns the background worker and returns a handle plus the receiver
    /// the caller should drain to actually dispatch ready deliveries.
    pub fn spawn() -> (Self, mpsc::UnboundedReceiver<DelayedDelivery>) {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<(Duration, DelayedDelivery)>();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel::<DelayedDelivery>();

        tokio::spawn(async move {
            let mut wheel: DelayQueue<DelayedDelivery> = DelayQueue::new();

            loop {
                tokio::select! {
                    incoming = queue_rx.recv() => {
                        match incoming {
                            Some((delay, delivery)) => {
                                wheel.insert(delivery, delay);
                            }
                            None if wheel.is_empty() => break,
                            None => {}
                        }
                    }
                    expired = wheel.next(), if !wheel.is_empty() => {
                        if let Some(Ok(expired)) = expired {
                            let delivery = expired.into_inner();
                            debug!(room = %delivery.room, "delayed delivery ready");
                            let _ = ready_tx.send(delivery);
                        }
                    }
                }
            }
        });

        (Self { queue_tx }, ready_rx)
    }

    /// Schedules `delivery` to become ready after `delay_ms`. Callers should
    /// only invoke this for `delay_ms > 0`; zero-delay dispatch is direct.
    pub fn schedule(&self, delay_ms: u32, delivery: DelayedDelivery) {
        let _ = self
            .queue_tx
            .send((Duration::from_millis(delay_ms as u64), delivery));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduled_delivery_becomes_ready_after_delay() {
        let (scheduler, mut ready_rx) = DelayScheduler::spawn();
        let event = ServerEvent::RoomJoined {
            session_id: "S1".into(),
        };
        scheduler.schedule(
            20,
            DelayedDelivery {
                room: "S1".into(),
                event,
            },
        );

        let delivery = tokio::time::timeout(Duration::from_secs(2), ready_rx.recv())
            .await
            .expect("delivery should become ready")
            .expect("channel open");
        assert_eq!(delivery.room, "S1".to_string());
    }

    #[tokio::test]
    async fn multiple_deliveries_all_arrive() {
        let (scheduler, mut ready_rx) = DelayScheduler::spawn();
        for i in 0..3 {
            scheduler.schedule(
                10,
                DelayedDelivery {
                    room: format!("S{}", i),
                    event: ServerEvent::RoomJoined {
                        session_id: format!("S{}", i),
                    },
                },
            );
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let delivery = tokio::time::timeout(Duration::from_secs(2), ready_rx.recv())
                .await
                .expect("should not time out")
                .expect("channel open");
            seen.insert(delivery.room);
        }
        assert_eq!(seen.len(), 3);
    }
}
