//! Integration tests for the local work scheduler

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use orchard_work::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Returns the scripted results in order, then `Success`
    #[derive(Default)]
    struct ScriptedWorker {
        runs: AtomicU32,
        script: Mutex<Vec<WorkResult>>,
    }

    impl ScriptedWorker {
        fn with_script(results: &[WorkResult]) -> Arc<Self> {
            let mut script = results.to_vec();
            script.reverse();
            Arc::new(Self {
                runs: AtomicU32::new(0),
                script: Mutex::new(script),
            })
        }

        fn runs(&self) -> u32 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn do_work(&self, _ctx: WorkContext) -> WorkResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(WorkResult::Success)
        }
    }

    /// Never finishes on its own
    #[derive(Default)]
    struct StuckWorker {
        runs: AtomicU32,
    }

    #[async_trait]
    impl Worker for StuckWorker {
        async fn do_work(&self, _ctx: WorkContext) -> WorkResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            WorkResult::Success
        }
    }

    fn scheduler_with(conditions: Arc<StaticConditions>, config: SchedulerConfig) -> LocalWorkScheduler {
        LocalWorkScheduler::new(conditions, config).unwrap()
    }

    fn scheduler() -> LocalWorkScheduler {
        scheduler_with(Arc::new(StaticConditions::default()), test_config())
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            constraint_poll: Duration::from_secs(1),
            backoff: Duration::from_secs(10),
            max_attempts: 3,
            expedited_quota: 1,
            expedited_window: Duration::from_secs(3600),
        }
    }

    async fn wait_for(scheduler: &LocalWorkScheduler, id: WorkId, state: WorkState) {
        for _ in 0..1000 {
            if scheduler.work_info(id).unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "work never reached {state:?}, last {:?}",
            scheduler.work_info(id).unwrap().state
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_time_work_succeeds() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[]);
        let id = scheduler
            .enqueue(WorkRequest::one_time(worker.clone()).with_tag("download"))
            .unwrap()
            .id()
            .unwrap();

        wait_for(&scheduler, id, WorkState::Succeeded).await;
        assert_eq!(worker.runs(), 1);
        let infos = scheduler.work_infos_by_tag("download");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].run_attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_policy_does_not_duplicate() {
        let scheduler = scheduler();
        let worker = Arc::new(StuckWorker::default());

        let first = scheduler
            .enqueue_unique(
                "pkg/5",
                ExistingWorkPolicy::Keep,
                WorkRequest::one_time(worker.clone()),
            )
            .unwrap();
        let second = scheduler
            .enqueue_unique(
                "pkg/5",
                ExistingWorkPolicy::Keep,
                WorkRequest::one_time(worker.clone()),
            )
            .unwrap();

        let id = first.id().unwrap();
        assert_eq!(second, EnqueueOutcome::Kept(id));
        wait_for(&scheduler, id, WorkState::Running).await;
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_policy_reenqueues_after_finish() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[]);

        let first = scheduler
            .enqueue_unique("check", ExistingWorkPolicy::Keep, WorkRequest::one_time(worker.clone()))
            .unwrap()
            .id()
            .unwrap();
        wait_for(&scheduler, first, WorkState::Succeeded).await;

        let second = scheduler
            .enqueue_unique("check", ExistingWorkPolicy::Keep, WorkRequest::one_time(worker.clone()))
            .unwrap();
        assert!(matches!(second, EnqueueOutcome::Enqueued(id) if id != first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_policy_cancels_existing() {
        let scheduler = scheduler();
        let stuck = Arc::new(StuckWorker::default());

        let old = scheduler
            .enqueue_unique("job", ExistingWorkPolicy::Replace, WorkRequest::one_time(stuck))
            .unwrap()
            .id()
            .unwrap();
        wait_for(&scheduler, old, WorkState::Running).await;

        let new = scheduler
            .enqueue_unique(
                "job",
                ExistingWorkPolicy::Replace,
                WorkRequest::one_time(ScriptedWorker::with_script(&[])),
            )
            .unwrap()
            .id()
            .unwrap();

        assert_eq!(scheduler.work_info(old).unwrap().state, WorkState::Cancelled);
        wait_for(&scheduler, new, WorkState::Succeeded).await;
        assert_eq!(scheduler.work_infos_for_unique("job")[0].id, new);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_tag_stops_running_work() {
        let scheduler = scheduler();
        let id = scheduler
            .enqueue(WorkRequest::one_time(Arc::new(StuckWorker::default())).with_tag("package:a"))
            .unwrap()
            .id()
            .unwrap();
        wait_for(&scheduler, id, WorkState::Running).await;

        assert_eq!(scheduler.cancel_by_tag("package:a"), 1);
        assert_eq!(scheduler.work_info(id).unwrap().state, WorkState::Cancelled);
        // Already finished work is not counted again
        assert_eq!(scheduler.cancel_by_tag("package:a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_then_success() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[WorkResult::Retry, WorkResult::Retry]);
        let id = scheduler
            .enqueue(WorkRequest::one_time(worker.clone()))
            .unwrap()
            .id()
            .unwrap();

        wait_for(&scheduler, id, WorkState::Succeeded).await;
        assert_eq!(worker.runs(), 3);
        assert_eq!(scheduler.work_info(id).unwrap().run_attempt_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_fails() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[WorkResult::Retry; 5]);
        let id = scheduler
            .enqueue(WorkRequest::one_time(worker.clone()))
            .unwrap()
            .id()
            .unwrap();

        wait_for(&scheduler, id, WorkState::Failed).await;
        assert_eq!(worker.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expedited_quota_drops_request() {
        let scheduler = scheduler();
        let request = || {
            WorkRequest::one_time(ScriptedWorker::with_script(&[]))
                .expedited(OutOfQuotaPolicy::DropWorkRequest)
        };

        assert!(matches!(
            scheduler.enqueue(request()).unwrap(),
            EnqueueOutcome::Enqueued(_)
        ));
        assert_eq!(scheduler.enqueue(request()).unwrap(), EnqueueOutcome::Dropped);

        let fallback = WorkRequest::one_time(ScriptedWorker::with_script(&[]))
            .expedited(OutOfQuotaPolicy::RunAsNonExpedited);
        assert!(matches!(
            scheduler.enqueue(fallback).unwrap(),
            EnqueueOutcome::Enqueued(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_constraints_gate_execution() {
        let conditions = Arc::new(StaticConditions::default());
        conditions.set_network(NetworkState::Metered);
        let scheduler = scheduler_with(conditions.clone(), test_config());
        let worker = ScriptedWorker::with_script(&[]);

        let id = scheduler
            .enqueue(WorkRequest::one_time(worker.clone()).with_constraints(Constraints {
                network: NetworkType::Unmetered,
                ..Constraints::default()
            }))
            .unwrap()
            .id()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(worker.runs(), 0);
        assert_eq!(scheduler.work_info(id).unwrap().state, WorkState::Enqueued);

        conditions.set_network(NetworkState::Unmetered);
        wait_for(&scheduler, id, WorkState::Succeeded).await;
        assert_eq!(worker.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_work_repeats() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[]);
        let id = scheduler
            .enqueue_unique(
                "auto_check",
                ExistingWorkPolicy::Keep,
                WorkRequest::periodic(
                    worker.clone(),
                    Duration::from_secs(3 * 3600),
                    Duration::from_secs(30 * 60),
                ),
            )
            .unwrap()
            .id()
            .unwrap();

        for _ in 0..1000 {
            if worker.runs() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        assert!(worker.runs() >= 2);
        assert!(!scheduler.work_info(id).unwrap().state.is_finished());

        let updated = scheduler
            .enqueue_unique(
                "auto_check",
                ExistingWorkPolicy::Update,
                WorkRequest::periodic(
                    worker.clone(),
                    Duration::from_secs(6 * 3600),
                    Duration::from_secs(30 * 60),
                ),
            )
            .unwrap();
        assert_eq!(updated, EnqueueOutcome::Updated(id));

        assert!(scheduler.cancel_unique("auto_check"));
        assert_eq!(scheduler.work_info(id).unwrap().state, WorkState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_work_runs_once_per_interval() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[]);
        scheduler
            .enqueue(WorkRequest::periodic(
                worker.clone(),
                Duration::from_secs(3600),
                Duration::from_secs(600),
            ))
            .unwrap();

        // First run waits for the flex window of the first period
        tokio::time::sleep(Duration::from_secs(49 * 60)).await;
        assert_eq!(worker.runs(), 0);

        // Windows open at 50m, 1h50m and 2h50m
        tokio::time::sleep(Duration::from_secs(2 * 3600 + 11 * 60 + 1)).await;
        assert_eq!(worker.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flex_equal_to_interval_does_not_spin() {
        let scheduler = scheduler();
        let worker = ScriptedWorker::with_script(&[]);
        scheduler
            .enqueue(WorkRequest::periodic(
                worker.clone(),
                Duration::from_millis(200),
                Duration::from_millis(200),
            ))
            .unwrap();

        // One run at the start of each period: 0, 200, 400 and 600ms
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(worker.runs(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_work() {
        let scheduler = scheduler();
        let id = scheduler
            .enqueue(WorkRequest::one_time(Arc::new(StuckWorker::default())))
            .unwrap()
            .id()
            .unwrap();

        scheduler.shutdown();
        assert_eq!(scheduler.work_info(id).unwrap().state, WorkState::Cancelled);
        assert!(scheduler
            .enqueue(WorkRequest::one_time(ScriptedWorker::with_script(&[])))
            .is_err());
        assert_eq!(scheduler.prune_finished(), 1);
    }
}
