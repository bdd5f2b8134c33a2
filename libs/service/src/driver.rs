use std::time::Duration;

use anyhow::Result;
use derive_more::Display;
use expand_core::{PrepareReport, RelationId};
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::service::Service;

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum PartitionStatus {
    #[display(fmt = "done")]
    Done,
    #[display(fmt = "failed: {}", _0)]
    Failed(String),
    #[display(fmt = "not started")]
    NotStarted,
    #[display(fmt = "does not exist")]
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition: RelationId,
    pub status: PartitionStatus,
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct ExpandReport {
    pub root: RelationId,
    pub prepare: PrepareReport,
    /// Ordered by partition id.
    pub partitions: Vec<PartitionReport>,
}

impl ExpandReport {
    /// `true` once every partition that still exists has been redistributed.
    pub fn is_complete(&self) -> bool {
        self.partitions.iter().all(|partition| {
            matches!(
                partition.status,
                PartitionStatus::Done | PartitionStatus::DoesNotExist
            )
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|partition| matches!(partition.status, PartitionStatus::Failed(_)))
    }

    pub fn not_started(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|partition| partition.status == PartitionStatus::NotStarted)
    }
}

/// Runs a full expansion of one root: prepare once, then redistribute every
/// partition holding rows.
///
/// Progress only lives in the returned report. Both phases are idempotent, so
/// an incomplete run is finished by running it again.
pub struct ExpandDriver {
    service: Service,
    workers: usize,
    max_retries: usize,
    retry_backoff: Duration,
    deadline: Option<Duration>,
}

impl ExpandDriver {
    pub fn new(service: Service) -> Self {
        let config = service.config();
        let workers = config.workers.max(1);
        let max_retries = config.max_retries;
        let retry_backoff = config.retry_backoff;
        let deadline = config.deadline;
        Self {
            service,
            workers,
            max_retries,
            retry_backoff,
            deadline,
        }
    }

    pub fn with_workers(self, workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: usize) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn with_retry_backoff(self, retry_backoff: Duration) -> Self {
        Self {
            retry_backoff,
            ..self
        }
    }

    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }

    pub async fn run(&self, root: RelationId) -> Result<ExpandReport> {
        let stop_at = self.deadline.map(|deadline| Instant::now() + deadline);
        let prepare = self.service.prepare_report(root).await?;
        let partitions = self.service.leaf_partitions(root)?;
        tracing::info!(
            root = %root,
            partitions = partitions.len(),
            workers = self.workers,
            "redistributing partitions"
        );

        let mut reports = stream::iter(partitions)
            .map(|partition| self.redistribute_partition(root, partition, stop_at))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;
        reports.sort_by_key(|report| report.partition);

        let report = ExpandReport {
            root,
            prepare,
            partitions: reports,
        };

        let failed = report.failed().count();
        let not_started = report.not_started().count();
        if failed > 0 {
            tracing::warn!(
                root = %root,
                failed = failed,
                "one or more partitions failed to expand, re-run to finish"
            );
        }
        if not_started > 0 {
            tracing::warn!(
                root = %root,
                not_started = not_started,
                "stopped early, re-run to resume"
            );
        }
        if report.is_complete() {
            tracing::info!(root = %root, "expansion complete");
        }
        Ok(report)
    }

    async fn redistribute_partition(
        &self,
        root: RelationId,
        partition: RelationId,
        stop_at: Option<Instant>,
    ) -> PartitionReport {
        let mut attempts = 0;

        loop {
            if stop_at.map_or(false, |stop_at| Instant::now() >= stop_at) && attempts == 0 {
                return PartitionReport {
                    partition,
                    status: PartitionStatus::NotStarted,
                    attempts,
                };
            }

            match self.service.storage().relation_exists(partition) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(partition = %partition, "partition no longer exists");
                    return PartitionReport {
                        partition,
                        status: PartitionStatus::DoesNotExist,
                        attempts,
                    };
                }
                Err(err) => {
                    return PartitionReport {
                        partition,
                        status: PartitionStatus::Failed(format!("{:#}", err)),
                        attempts,
                    };
                }
            }

            attempts += 1;
            match self.service.redistribute_outcome(root, partition).await {
                Ok(_) => {
                    return PartitionReport {
                        partition,
                        status: PartitionStatus::Done,
                        attempts,
                    }
                }
                Err(failure) if attempts > self.max_retries => {
                    return PartitionReport {
                        partition,
                        status: PartitionStatus::Failed(failure.message),
                        attempts,
                    }
                }
                Err(failure) => {
                    tracing::debug!(
                        partition = %partition,
                        attempt = attempts,
                        error = %failure,
                        "retrying partition"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use expand_core::{DistributionPolicy, LockManager, LockMode};
    use tempfile::TempDir;

    use super::*;
    use crate::config::ExpandConfig;

    async fn setup(dir: &TempDir, config: ExpandConfig) -> Service {
        let service = Service::open(ExpandConfig {
            data_dir: dir.path().to_path_buf(),
            ..config
        })
        .unwrap();
        for sql in &[
            "set segments 4",
            "create table sales partitioned distributed by (id)",
            "create partition sales_2023 of sales partitioned",
            "create partition sales_2023_q1 of sales_2023",
            "create partition sales_2023_q2 of sales_2023",
            "create partition sales_2024 of sales",
            "set segments 8",
        ] {
            service.execute(sql).await.unwrap();
        }
        service
    }

    fn policy(service: &Service, name: &str) -> DistributionPolicy {
        service.resolve(name).unwrap().policy
    }

    #[tokio::test]
    async fn test_expand_hash_root() {
        let dir = TempDir::new().unwrap();
        let service = setup(
            &dir,
            ExpandConfig {
                workers: 2,
                ..ExpandConfig::default()
            },
        )
        .await;
        let root = service.resolve("sales").unwrap().id;

        let report = service.expand(root).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.prepare.segment_count, 8);
        assert!(report.prepare.root_rewritten);
        assert_eq!(report.partitions.len(), 3);
        assert!(report
            .partitions
            .iter()
            .all(|partition| partition.status == PartitionStatus::Done
                && partition.attempts == 1));

        let expanded = DistributionPolicy::hash(vec!["id"], 8);
        for name in &["sales", "sales_2023", "sales_2023_q1", "sales_2023_q2", "sales_2024"] {
            assert_eq!(policy(&service, name), expanded);
        }
        assert_eq!(service.locks().held(root), None);

        // Hash leaves are reshuffled again, the root is already expanded.
        let report = service.expand(root).await.unwrap();
        assert!(!report.prepare.root_rewritten);
        assert!(report.is_complete());
        assert_eq!(policy(&service, "sales_2024"), expanded);
    }

    #[tokio::test]
    async fn test_expand_random_root() {
        let dir = TempDir::new().unwrap();
        let service = Service::open(ExpandConfig {
            data_dir: dir.path().to_path_buf(),
            ..ExpandConfig::default()
        })
        .unwrap();
        for sql in &[
            "set segments 4",
            "create table events partitioned distributed randomly",
            "create partition events_1 of events",
            "create partition events_2 of events",
            "create table orders distributed by (order_id)",
            "set segments 6",
        ] {
            service.execute(sql).await.unwrap();
        }

        let events = service.resolve("events").unwrap().id;
        let report = service.expand(events).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(policy(&service, "events"), DistributionPolicy::random(6));
        assert_eq!(policy(&service, "events_1"), DistributionPolicy::random(6));
        assert_eq!(policy(&service, "events_2"), DistributionPolicy::random(6));

        // A table without partitions is redistributed as its own partition.
        let orders = service.resolve("orders").unwrap().id;
        let report = service.expand(orders).await.unwrap();
        assert_eq!(report.partitions.len(), 1);
        assert_eq!(report.partitions[0].partition, orders);
        assert_eq!(
            policy(&service, "orders"),
            DistributionPolicy::hash(vec!["order_id"], 6)
        );
    }

    #[tokio::test]
    async fn test_root_without_partitions() {
        let dir = TempDir::new().unwrap();
        let service = Service::open(ExpandConfig {
            data_dir: dir.path().to_path_buf(),
            ..ExpandConfig::default()
        })
        .unwrap();
        for sql in &[
            "set segments 4",
            "create table logs partitioned distributed randomly",
            "set segments 8",
        ] {
            service.execute(sql).await.unwrap();
        }

        let logs = service.resolve("logs").unwrap().id;
        let report = service.expand(logs).await.unwrap();
        assert_eq!(
            report.partitions,
            vec![PartitionReport {
                partition: logs,
                status: PartitionStatus::Done,
                attempts: 1,
            }]
        );
        assert_eq!(policy(&service, "logs"), DistributionPolicy::random(8));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_rerun_finishes() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, ExpandConfig::default()).await;
        let root = service.resolve("sales").unwrap().id;
        let sales_2024 = service.resolve("sales_2024").unwrap().id;
        assert_eq!(service.prepare(root).await.unwrap(), 0);

        // Another operation holds the root exclusively.
        let blocker = service.locks().owner();
        blocker.acquire(root, LockMode::Exclusive).unwrap();
        assert!(ExpandDriver::new(service.clone()).run(root).await.is_err());

        let report = ExpandDriver::new(service.clone())
            .redistribute_partition(root, sales_2024, None)
            .await;
        assert_eq!(report.attempts, 1);
        assert_eq!(
            report.status,
            PartitionStatus::Failed(format!(
                "could not obtain share lock on relation {}, exclusive lock is held by another operation",
                root
            ))
        );
        assert_eq!(service.redistribute(root, sales_2024).await, 3);
        assert_eq!(policy(&service, "sales_2024"), DistributionPolicy::random(8));

        drop(blocker);
        let report = service.expand(root).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.failed().count(), 0);
        assert_eq!(
            policy(&service, "sales_2024"),
            DistributionPolicy::hash(vec!["id"], 8)
        );
    }

    #[tokio::test]
    async fn test_retries() {
        let dir = TempDir::new().unwrap();
        let service = setup(
            &dir,
            ExpandConfig {
                max_retries: 2,
                retry_backoff: Duration::from_millis(10),
                ..ExpandConfig::default()
            },
        )
        .await;
        let root = service.resolve("sales").unwrap().id;
        let partition = service.resolve("sales_2024").unwrap().id;

        // Replicated roots can never be redistributed, so every attempt fails.
        service
            .storage()
            .set_policy(root, &DistributionPolicy::replicated(8))
            .unwrap();
        let driver = ExpandDriver::new(service.clone());
        let report = driver.redistribute_partition(root, partition, None).await;
        assert_eq!(report.attempts, 3);
        assert!(matches!(report.status, PartitionStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_deadline() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, ExpandConfig::default()).await;
        let root = service.resolve("sales").unwrap().id;

        let report = ExpandDriver::new(service.clone())
            .with_deadline(Duration::from_secs(0))
            .run(root)
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.not_started().count(), 3);
        assert!(report
            .partitions
            .iter()
            .all(|partition| partition.attempts == 0));
        // Prepare still ran.
        assert_eq!(policy(&service, "sales"), DistributionPolicy::hash(vec!["id"], 8));
        assert_eq!(policy(&service, "sales_2024"), DistributionPolicy::random(8));

        let report = service.expand(root).await.unwrap();
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_dropped_partition() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, ExpandConfig::default()).await;
        let root = service.resolve("sales").unwrap().id;
        let sales_2024 = service.resolve("sales_2024").unwrap().id;
        service.execute("drop table sales_2024").await.unwrap();

        let driver = ExpandDriver::new(service.clone());
        let report = driver.redistribute_partition(root, sales_2024, None).await;
        assert_eq!(report.status, PartitionStatus::DoesNotExist);
        assert_eq!(report.attempts, 0);

        let report = driver.run(root).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.partitions.len(), 2);
    }

    #[tokio::test]
    async fn test_expand_statement() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, ExpandConfig::default()).await;

        let output = service.execute("expand sales").await.unwrap();
        assert_eq!(
            output
                .rows()
                .iter()
                .map(|row| (row[0].as_str(), row[1].as_str(), row[2].as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("sales_2023_q1", "done", "1"),
                ("sales_2023_q2", "done", "1"),
                ("sales_2024", "done", "1"),
            ]
        );
    }
}
