// Copyright (c) 2025 - Cowboy AI, Inc.
//! Patient analytics
//!
//! Analytics keeps one [`PatientActivity`] record per logical event and derives
//! every aggregate from those records when asked. Counters are never bumped in
//! place, so a redelivered event cannot count twice.
//!
//! Record keys:
//!
//! - `CREATED`: `{subject_id}` (one creation per patient)
//! - `UPDATED` / `DELETED`: `{subject_id} {kind} {produced_at nanos}`
//!
//! Subject ids never contain whitespace, so a later key can never collide with
//! a creation key.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    bounded, create_once, ProvisionError, ProvisionOutcome, Provisioned, Provisioner,
    ProvisioningSource, DEFAULT_STORAGE_TIMEOUT,
};
use crate::events::{DomainEvent, EventType, SubjectId};
use crate::store::{ResourceStore, StoreResult};
use crate::subjects::ConsumerGroup;

/// One patient lifecycle event as seen by analytics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientActivity {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub event_type: EventType,
    pub patient_name: String,
    pub patient_email: String,
    pub produced_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub provisioning_source: ProvisioningSource,
}

impl PatientActivity {
    pub fn record(event: &DomainEvent, source: ProvisioningSource) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject_id: event.subject_id.clone(),
            event_type: event.event_type,
            patient_name: event.name().unwrap_or_default().to_string(),
            patient_email: event.email().unwrap_or_default().to_string(),
            produced_at: event.produced_at,
            recorded_at: Utc::now(),
            provisioning_source: source,
        }
    }

    /// Store key identifying the logical event
    pub fn key_for(event: &DomainEvent) -> String {
        match event.event_type {
            EventType::Created => event.subject_id.as_str().to_string(),
            kind => {
                let stamp = event
                    .produced_at
                    .timestamp_nanos_opt()
                    .unwrap_or_else(|| event.produced_at.timestamp());
                format!("{} {} {}", event.subject_id, kind, stamp)
            }
        }
    }

    fn date(&self) -> NaiveDate {
        self.produced_at.date_naive()
    }
}

impl Provisioned for PatientActivity {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    fn status(&self) -> &str {
        match self.event_type {
            EventType::Created => "CREATED",
            EventType::Updated => "UPDATED",
            EventType::Deleted => "DELETED",
        }
    }

    fn source(&self) -> ProvisioningSource {
        self.provisioning_source
    }
}

/// Patient counts for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    /// Patients created on or before `date` and not deleted by then
    pub total_patients: u64,
    pub new_patients: u64,
    pub updated_patients: u64,
    pub deleted_patients: u64,
}

impl DailyMetrics {
    fn compute(date: NaiveDate, activity: &[PatientActivity]) -> Self {
        let mut live: HashSet<&SubjectId> = HashSet::new();
        let mut deleted: HashSet<&SubjectId> = HashSet::new();
        let mut metrics = Self {
            date,
            total_patients: 0,
            new_patients: 0,
            updated_patients: 0,
            deleted_patients: 0,
        };

        for record in activity {
            let day = record.date();
            if day > date {
                continue;
            }

            match record.event_type {
                EventType::Created => {
                    live.insert(&record.subject_id);
                    if day == date {
                        metrics.new_patients += 1;
                    }
                }
                EventType::Updated => {
                    if day == date {
                        metrics.updated_patients += 1;
                    }
                }
                EventType::Deleted => {
                    deleted.insert(&record.subject_id);
                    if day == date {
                        metrics.deleted_patients += 1;
                    }
                }
            }
        }

        metrics.total_patients = live.difference(&deleted).count() as u64;
        metrics
    }
}

/// Records patient activity for reporting
#[derive(Clone)]
pub struct AnalyticsProvisioner {
    store: Arc<dyn ResourceStore<PatientActivity>>,
    storage_timeout: Duration,
}

impl AnalyticsProvisioner {
    pub fn new(store: Arc<dyn ResourceStore<PatientActivity>>) -> Self {
        Self {
            store,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    async fn activity(&self) -> StoreResult<Vec<PatientActivity>> {
        bounded(self.storage_timeout, self.store.list()).await
    }

    /// Counts for a single day
    pub async fn daily_metrics(&self, date: NaiveDate) -> StoreResult<DailyMetrics> {
        let activity = self.activity().await?;
        Ok(DailyMetrics::compute(date, &activity))
    }

    /// Counts for every day in `start..=end`
    pub async fn metrics_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyMetrics>> {
        let activity = self.activity().await?;
        Ok(start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| DailyMetrics::compute(day, &activity))
            .collect())
    }

    /// Counts for the 30 days ending with `today`, oldest first
    pub async fn last_30_days_metrics(&self, today: NaiveDate) -> StoreResult<Vec<DailyMetrics>> {
        let start = today.checked_sub_days(Days::new(29)).unwrap_or(NaiveDate::MIN);
        self.metrics_between(start, today).await
    }

    /// Events produced on any day in `start..=end`
    pub async fn event_count_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<usize> {
        Ok(self
            .activity()
            .await?
            .iter()
            .filter(|record| (start..=end).contains(&record.date()))
            .count())
    }

    /// Number of distinct events recorded
    pub async fn total_events(&self) -> StoreResult<usize> {
        Ok(self.activity().await?.len())
    }

    /// Events of one patient, oldest first
    pub async fn events_for(&self, subject_id: &SubjectId) -> StoreResult<Vec<PatientActivity>> {
        let mut events: Vec<_> = self
            .activity()
            .await?
            .into_iter()
            .filter(|record| &record.subject_id == subject_id)
            .collect();
        events.sort_by_key(|record| record.produced_at);
        Ok(events)
    }
}

#[async_trait]
impl Provisioner for AnalyticsProvisioner {
    type Resource = PatientActivity;

    fn service(&self) -> &str {
        ConsumerGroup::Analytics.as_str()
    }

    async fn provision(
        &self,
        event: &DomainEvent,
        source: ProvisioningSource,
    ) -> Result<ProvisionOutcome<PatientActivity>, ProvisionError> {
        event.validate()?;

        let key = PatientActivity::key_for(event);
        let outcome = create_once(self.store.as_ref(), &key, self.storage_timeout, || {
            PatientActivity::record(event, source)
        })
        .await?;

        if outcome.is_created() {
            debug!(subject_id = %event.subject_id, event_type = %event.event_type, "Recorded patient activity");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn event(kind: EventType, id: &str, produced_at: DateTime<Utc>) -> DomainEvent {
        DomainEvent::new(
            kind,
            SubjectId::new(id).unwrap(),
            "Jane",
            "jane@x.com",
            produced_at,
        )
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn analytics() -> AnalyticsProvisioner {
        AnalyticsProvisioner::new(Arc::new(InMemoryStore::<PatientActivity>::new()))
    }

    #[test]
    fn test_activity_keys() {
        let created = event(EventType::Created, "p1", at(1, 9));
        let updated = event(EventType::Updated, "p1", at(1, 9));

        assert_eq!(PatientActivity::key_for(&created), "p1");
        assert!(PatientActivity::key_for(&updated).starts_with("p1 updated "));
    }

    /// A subject id that spells out another patient's update key is still its own creation
    #[tokio::test]
    async fn test_creation_key_never_matches_update_key() {
        let analytics = analytics();
        let produced_at = DateTime::from_timestamp(0, 5).unwrap();
        analytics
            .provision(&event(EventType::Updated, "p1", produced_at), ProvisioningSource::Event)
            .await
            .unwrap();

        let outcome = analytics
            .provision(
                &event(EventType::Created, "p1:updated:5", produced_at),
                ProvisioningSource::Event,
            )
            .await
            .unwrap();

        assert!(outcome.is_created());
        assert_eq!(analytics.total_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_last_30_days_window() {
        let analytics = analytics();
        let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        analytics
            .provision(&event(EventType::Created, "p1", at(1, 9)), ProvisioningSource::Event)
            .await
            .unwrap();
        analytics
            .provision(&event(EventType::Created, "p2", at(2, 9)), ProvisioningSource::Event)
            .await
            .unwrap();

        let metrics = analytics.last_30_days_metrics(today).await.unwrap();

        assert_eq!(metrics.len(), 30);
        assert_eq!(metrics[0].date, date(2));
        assert_eq!(metrics[0].new_patients, 1);
        assert_eq!(metrics[0].total_patients, 2);
        assert_eq!(metrics[29].date, today);
        assert_eq!(metrics[29].total_patients, 2);
    }

    #[tokio::test]
    async fn test_event_count_between() {
        let analytics = analytics();
        let events = [
            event(EventType::Created, "p1", at(1, 9)),
            event(EventType::Updated, "p1", at(2, 0)),
            event(EventType::Updated, "p1", at(2, 23)),
            event(EventType::Deleted, "p1", at(3, 8)),
        ];
        for e in &events {
            analytics.provision(e, ProvisioningSource::Event).await.unwrap();
        }

        assert_eq!(analytics.event_count_between(date(2), date(2)).await.unwrap(), 2);
        assert_eq!(analytics.event_count_between(date(1), date(3)).await.unwrap(), 4);
        assert_eq!(analytics.event_count_between(date(4), date(9)).await.unwrap(), 0);
        assert_eq!(analytics.event_count_between(date(3), date(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_events_count_once() {
        let analytics = analytics();
        let created = event(EventType::Created, "p1", at(1, 9));
        let updated = event(EventType::Updated, "p1", at(1, 10));

        for _ in 0..3 {
            analytics
                .provision(&created, ProvisioningSource::Event)
                .await
                .unwrap();
            analytics
                .provision(&updated, ProvisioningSource::Event)
                .await
                .unwrap();
        }

        let metrics = analytics.daily_metrics(date(1)).await.unwrap();
        assert_eq!(metrics.new_patients, 1);
        assert_eq!(metrics.updated_patients, 1);
        assert_eq!(metrics.total_patients, 1);
        assert_eq!(analytics.total_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_metrics_across_days() {
        let analytics = analytics();
        let events = [
            event(EventType::Created, "p1", at(1, 9)),
            event(EventType::Created, "p2", at(2, 9)),
            event(EventType::Updated, "p1", at(2, 12)),
            event(EventType::Deleted, "p1", at(3, 8)),
        ];
        for e in &events {
            analytics.provision(e, ProvisioningSource::Event).await.unwrap();
        }

        let metrics = analytics.metrics_between(date(1), date(3)).await.unwrap();

        assert_eq!(metrics.len(), 3);
        assert_eq!(
            metrics[1],
            DailyMetrics {
                date: date(2),
                total_patients: 2,
                new_patients: 1,
                updated_patients: 1,
                deleted_patients: 0,
            }
        );
        assert_eq!(metrics[2].total_patients, 1);
        assert_eq!(metrics[2].deleted_patients, 1);
    }

    #[tokio::test]
    async fn test_events_for_subject_in_order() {
        let analytics = analytics();
        analytics
            .provision(&event(EventType::Updated, "p1", at(2, 9)), ProvisioningSource::Event)
            .await
            .unwrap();
        analytics
            .provision(&event(EventType::Created, "p1", at(1, 9)), ProvisioningSource::Event)
            .await
            .unwrap();
        analytics
            .provision(&event(EventType::Created, "p2", at(1, 9)), ProvisioningSource::Event)
            .await
            .unwrap();

        let events = analytics
            .events_for(&SubjectId::new("p1").unwrap())
            .await
            .unwrap();

        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::Created, EventType::Updated]);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let analytics = analytics();

        let metrics = analytics.metrics_between(date(3), date(1)).await.unwrap();

        assert!(metrics.is_empty());
    }
}
