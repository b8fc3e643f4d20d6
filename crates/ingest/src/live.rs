//! 실시간 팬아웃 채널
//!
//! 현재 연결된 구독자 모두에게 메시지를 최선 노력(best-effort)으로 전달합니다.
//!
//! - 발행 이전에 연결된 구독자만 메시지를 받습니다. 재생 버퍼는 없습니다.
//! - 발행은 `try_send`만 사용하므로 느린 구독자가 발행자를 막지 않습니다.
//! - 큐가 가득 찼거나 닫힌 구독자는 활성 집합에서 제거됩니다.
//!
//! 전역 인스턴스는 없습니다. [`LiveChannel`]을 명시적으로 생성해
//! 파이프라인과 전송 계층에 복제해서 넘깁니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use trapwire_core::metrics as m;

/// 구독자에게 전달되는 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    /// 이벤트 종류 레이블 (예: `new_event`)
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    /// 발행 시각
    pub timestamp: DateTime<Utc>,
}

impl LiveMessage {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

type SubscriberMap = HashMap<u64, mpsc::Sender<Arc<LiveMessage>>>;

struct LiveInner {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
    /// 구독자별 큐 용량
    capacity: usize,
}

impl LiveInner {
    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 실시간 팬아웃 채널 핸들
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<LiveInner>,
}

impl LiveChannel {
    /// 구독자별 큐 용량으로 채널을 생성합니다. 0은 1로 취급합니다.
    pub fn new(subscriber_capacity: usize) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: subscriber_capacity.max(1),
            }),
        }
    }

    /// 새 구독을 등록합니다. 반환된 [`Subscription`]을 drop하면 구독이 해제됩니다.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let count = {
            let mut subscribers = self.inner.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        gauge!(m::LIVE_SUBSCRIBERS).set(count as f64);
        tracing::debug!(subscriber = id, subscribers = count, "live subscriber connected");

        Subscription {
            id,
            rx,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// 레이블과 페이로드로 메시지를 만들어 발행합니다. 전달된 구독자 수를 반환합니다.
    pub fn publish(&self, event_type: &str, data: serde_json::Value) -> usize {
        self.publish_message(LiveMessage::new(event_type, data))
    }

    /// 메시지를 모든 구독자에게 발행합니다. 전달된 구독자 수를 반환합니다.
    pub fn publish_message(&self, message: LiveMessage) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;
        let mut dropped = 0u64;

        let remaining = {
            let mut subscribers = self.inner.lock();
            subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = *id, "live subscriber queue full, dropping subscriber");
                    dropped += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = *id, "live subscriber gone, removing");
                    dropped += 1;
                    false
                }
            });
            subscribers.len()
        };

        counter!(m::LIVE_MESSAGES_PUBLISHED_TOTAL).increment(1);
        if dropped > 0 {
            counter!(m::LIVE_SUBSCRIBERS_DROPPED_TOTAL).increment(dropped);
            gauge!(m::LIVE_SUBSCRIBERS).set(remaining as f64);
        }
        delivered
    }

    /// 현재 활성 구독자 수
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn subscriber_capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for LiveChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 활성 구독
///
/// 채널에서 제거된 뒤에도 이미 큐에 들어온 메시지는 받을 수 있으며,
/// 그 다음 `recv`가 `None`을 반환합니다.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<LiveMessage>>,
    channel: Weak<LiveInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 다음 메시지를 기다립니다. 채널에서 제거되었으면 `None`을 반환합니다.
    pub async fn recv(&mut self) -> Option<Arc<LiveMessage>> {
        self.rx.recv().await
    }

    /// 대기 없이 큐에 있는 메시지를 꺼냅니다.
    pub fn try_recv(&mut self) -> Option<Arc<LiveMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.channel.upgrade() else {
            return;
        };
        let remaining = {
            let mut subscribers = inner.lock();
            subscribers.remove(&self.id);
            subscribers.len()
        };
        gauge!(m::LIVE_SUBSCRIBERS).set(remaining as f64);
        tracing::debug!(subscriber = self.id, subscribers = remaining, "live subscriber disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let live = LiveChannel::new(8);
        let mut a = live.subscribe();
        let mut b = live.subscribe();
        assert_eq!(live.subscriber_count(), 2);

        assert_eq!(live.publish("new_event", json!({"n": 1})), 2);

        for sub in [&mut a, &mut b] {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.event_type, "new_event");
            assert_eq!(msg.data["n"], 1);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let live = LiveChannel::new(32);
        let mut early = live.subscribe();
        for n in 0..10 {
            live.publish("new_event", json!({ "n": n }));
        }

        let mut late = live.subscribe();
        assert!(late.try_recv().is_none());

        live.publish("new_event", json!({"n": 10}));
        assert_eq!(late.recv().await.unwrap().data["n"], 10);

        let mut seen = 0;
        while early.try_recv().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 11);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_others() {
        let live = LiveChannel::new(2);
        let mut slow = live.subscribe();
        let mut fast = live.subscribe();

        for n in 0..5 {
            live.publish("new_event", json!({ "n": n }));
            // fast 구독자는 매번 비움
            assert_eq!(fast.recv().await.unwrap().data["n"], n);
        }

        assert_eq!(live.subscriber_count(), 1);
        // 제거 전에 큐에 들어간 메시지는 남아 있고, 그 뒤는 종료
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let live = LiveChannel::new(4);
        let sub = live.subscribe();
        let other = live.subscribe();
        assert_ne!(sub.id(), other.id());
        drop(sub);
        assert_eq!(live.subscriber_count(), 1);
        assert_eq!(live.publish("new_event", json!(null)), 1);
    }

    #[test]
    fn publish_without_subscribers() {
        let live = LiveChannel::default();
        assert_eq!(live.publish("new_event", json!({})), 0);
        assert_eq!(live.subscriber_capacity(), 256);
    }

    #[test]
    fn message_wire_shape() {
        let msg = LiveMessage::new("new_event", json!({"id": "1"}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "new_event");
        assert_eq!(value["data"]["id"], "1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn subscription_outlives_channel() {
        let live = LiveChannel::new(1);
        let sub = live.subscribe();
        drop(live);
        drop(sub);
    }
}
