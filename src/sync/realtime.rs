use actix_web::web::Bytes;
use chrono::{Local, NaiveDate, NaiveDateTime};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use strum_macros::{AsRefStr, Display};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::utils::query_cache::QueryCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// A warden submitted a room
    Submitted,
    /// A queued submission reached the database
    Synced,
    StudentsChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceEvent {
    pub kind: EventKind,
    pub floor_number: Option<u8>,
    pub room_number: Option<String>,
    #[schema(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    #[schema(value_type = String, format = "date-time")]
    pub at: NaiveDateTime,
}

impl AttendanceEvent {
    pub fn room(kind: EventKind, date: NaiveDate, floor_number: u8, room_number: &str) -> Self {
        Self {
            kind,
            floor_number: Some(floor_number),
            room_number: Some(room_number.to_string()),
            date: Some(date),
            at: Local::now().naive_local(),
        }
    }

    pub fn students_changed() -> Self {
        Self {
            kind: EventKind::StudentsChanged,
            floor_number: None,
            room_number: None,
            date: None,
            at: Local::now().naive_local(),
        }
    }
}

/// Fan-out of attendance changes to SSE subscribers and the cache listener.
#[derive(Clone)]
pub struct Realtime {
    tx: broadcast::Sender<AttendanceEvent>,
}

impl Realtime {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers saw the event.
    pub fn publish(&self, event: AttendanceEvent) -> usize {
        debug!(kind = %event.kind, "Publishing attendance event");
        // no subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.tx.subscribe()
    }
}

pub fn sse_frame(event: &AttendanceEvent) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("event: {}\ndata: {}\n\n", event.kind, data)))
}

/// Body stream for a `text/event-stream` response. Lagging receivers skip
/// the events they missed; the stream ends when the hub goes away.
pub fn event_stream(
    rx: broadcast::Receiver<AttendanceEvent>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match sse_frame(&event) {
                    Ok(frame) => return Some((Ok(frame), rx)),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

pub fn invalidate_for(cache: &QueryCache, event: &AttendanceEvent) {
    match (event.kind, event.date) {
        (EventKind::StudentsChanged, _) | (_, None) => cache.invalidate_all(),
        (_, Some(date)) => cache.invalidate_date(date),
    }
}

/// Keeps the read cache honest for writes that did not go through a handler,
/// such as offline queue replays.
pub fn spawn_cache_invalidator(realtime: &Realtime, cache: QueryCache) {
    let mut rx = realtime.subscribe();
    actix_web::rt::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => invalidate_for(&cache, &event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache listener lagged, clearing cache");
                    cache.invalidate_all();
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    #[test]
    fn frames_carry_kind_and_json_payload() {
        let event = AttendanceEvent::room(EventKind::Submitted, day(), 3, "305");
        let frame = sse_frame(&event).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        assert!(text.starts_with("event: submitted\ndata: {"));
        assert!(text.contains("\"room_number\":\"305\""));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let hub = Realtime::new(4);
        assert_eq!(hub.publish(AttendanceEvent::students_changed()), 0);
    }

    #[actix_web::test]
    async fn stream_yields_published_events_in_order() {
        let hub = Realtime::new(8);
        let stream = event_stream(hub.subscribe());
        futures::pin_mut!(stream);

        hub.publish(AttendanceEvent::room(EventKind::Submitted, day(), 1, "101"));
        hub.publish(AttendanceEvent::room(EventKind::Synced, day(), 1, "102"));

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert!(std::str::from_utf8(&first).unwrap().contains("\"101\""));
        assert!(std::str::from_utf8(&second).unwrap().starts_with("event: synced"));

        drop(hub);
        assert!(stream.next().await.is_none());
    }

    #[actix_web::test]
    async fn events_invalidate_the_matching_day() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        let other_day = day().succ_opt().unwrap();
        cache.put_rooms(1, day(), Arc::new(Vec::new())).await;
        cache.put_rooms(1, other_day, Arc::new(Vec::new())).await;

        invalidate_for(&cache, &AttendanceEvent::room(EventKind::Synced, day(), 1, "101"));
        assert!(cache.rooms(1, day()).await.is_none());
        assert!(cache.rooms(1, other_day).await.is_some());

        invalidate_for(&cache, &AttendanceEvent::students_changed());
        assert!(cache.rooms(1, other_day).await.is_none());
    }
}
