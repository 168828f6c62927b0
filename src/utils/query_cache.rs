use chrono::NaiveDate;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::model::{attendance::AttendanceRecord, floor::FloorSummary, room::RoomSummary};
use crate::utils::stats::DashboardStats;

/// Every cached read is tied to the attendance day it describes.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Floors(NaiveDate),
    Rooms { floor: u8, date: NaiveDate },
    DayRecords(NaiveDate),
    Dashboard(NaiveDate),
}

impl CacheKey {
    fn date(&self) -> NaiveDate {
        match self {
            CacheKey::Floors(d) | CacheKey::DayRecords(d) | CacheKey::Dashboard(d) => *d,
            CacheKey::Rooms { date, .. } => *date,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Cached {
    Floors(Arc<Vec<FloorSummary>>),
    Rooms(Arc<Vec<RoomSummary>>),
    Records(Arc<Vec<AttendanceRecord>>),
    Dashboard(Arc<DashboardStats>),
}

/// Short-lived cache for the polling-heavy read endpoints.
#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<CacheKey, Cached>,
}

impl QueryCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    pub async fn floors(&self, date: NaiveDate) -> Option<Arc<Vec<FloorSummary>>> {
        match self.inner.get(&CacheKey::Floors(date)).await {
            Some(Cached::Floors(v)) => Some(v),
            _ => None,
        }
    }

    pub async fn put_floors(&self, date: NaiveDate, floors: Arc<Vec<FloorSummary>>) {
        self.inner
            .insert(CacheKey::Floors(date), Cached::Floors(floors))
            .await;
    }

    pub async fn rooms(&self, floor: u8, date: NaiveDate) -> Option<Arc<Vec<RoomSummary>>> {
        match self.inner.get(&CacheKey::Rooms { floor, date }).await {
            Some(Cached::Rooms(v)) => Some(v),
            _ => None,
        }
    }

    pub async fn put_rooms(&self, floor: u8, date: NaiveDate, rooms: Arc<Vec<RoomSummary>>) {
        self.inner
            .insert(CacheKey::Rooms { floor, date }, Cached::Rooms(rooms))
            .await;
    }

    pub async fn day_records(&self, date: NaiveDate) -> Option<Arc<Vec<AttendanceRecord>>> {
        match self.inner.get(&CacheKey::DayRecords(date)).await {
            Some(Cached::Records(v)) => Some(v),
            _ => None,
        }
    }

    pub async fn put_day_records(&self, date: NaiveDate, records: Arc<Vec<AttendanceRecord>>) {
        self.inner
            .insert(CacheKey::DayRecords(date), Cached::Records(records))
            .await;
    }

    pub async fn dashboard(&self, date: NaiveDate) -> Option<Arc<DashboardStats>> {
        match self.inner.get(&CacheKey::Dashboard(date)).await {
            Some(Cached::Dashboard(v)) => Some(v),
            _ => None,
        }
    }

    pub async fn put_dashboard(&self, date: NaiveDate, stats: Arc<DashboardStats>) {
        self.inner
            .insert(CacheKey::Dashboard(date), Cached::Dashboard(stats))
            .await;
    }

    /// Drops every entry describing `date`.
    pub fn invalidate_date(&self, date: NaiveDate) {
        if let Err(e) = self.inner.invalidate_entries_if(move |k, _| k.date() == date) {
            tracing::warn!(error = ?e, %date, "Scoped invalidation failed, clearing cache");
            self.inner.invalidate_all();
        }
    }

    /// Roster changes touch every day.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, n).unwrap()
    }

    fn floor(n: u8) -> FloorSummary {
        FloorSummary {
            floor_number: n,
            total_rooms: 4,
            total_students: 10,
            completed_rooms: 1,
        }
    }

    #[actix_web::test]
    async fn hits_are_typed_per_key() {
        let cache = QueryCache::new(100, Duration::from_secs(60));
        cache.put_floors(day(1), Arc::new(vec![floor(1)])).await;

        assert_eq!(cache.floors(day(1)).await.unwrap()[0].floor_number, 1);
        assert!(cache.floors(day(2)).await.is_none());
        assert!(cache.dashboard(day(1)).await.is_none());
    }

    #[actix_web::test]
    async fn date_invalidation_leaves_other_days_alone() {
        let cache = QueryCache::new(100, Duration::from_secs(60));
        cache.put_floors(day(1), Arc::new(vec![floor(1)])).await;
        cache.put_rooms(2, day(1), Arc::new(Vec::new())).await;
        cache.put_floors(day(2), Arc::new(vec![floor(2)])).await;

        cache.invalidate_date(day(1));

        assert!(cache.floors(day(1)).await.is_none());
        assert!(cache.rooms(2, day(1)).await.is_none());
        assert!(cache.floors(day(2)).await.is_some());

        cache.invalidate_all();
        assert!(cache.floors(day(2)).await.is_none());
    }
}
