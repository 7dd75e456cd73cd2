#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scheduler_config::LeaderStrategy;
    use scheduler_core::LockBackend;
    use scheduler_dispatcher::JobScheduler;
    use scheduler_infrastructure::FileLockBackend;
    use scheduler_testing_utils::{
        ConcurrencyProbe, CountingHandler, InMemoryLockBackend, TestConfigBuilder, TestEnv,
    };
    use tempfile::TempDir;

    async fn file_scheduler(dir: &TempDir, id: &str) -> (JobScheduler, Arc<CountingHandler>) {
        let lock_path = dir.path().join("leader.lock");
        let config = TestConfigBuilder::new()
            .instance_id(id)
            .leader_strategy(LeaderStrategy::File)
            .lock_path(lock_path.to_string_lossy())
            .build();
        let scheduler = JobScheduler::from_config(&config).await.unwrap();

        let handler = Arc::new(CountingHandler::new());
        scheduler
            .every(Duration::from_millis(30))
            .name("tick")
            .register(handler.clone())
            .await
            .unwrap();
        (scheduler, handler)
    }

    async fn wait_for_leader(a: &JobScheduler, b: &JobScheduler) -> bool {
        TestEnv::wait_for(
            || async { a.is_leader() || b.is_leader() },
            Duration::from_secs(1),
        )
        .await
    }

    #[tokio::test]
    async fn test_only_file_lock_holder_fires() {
        let dir = TempDir::new().unwrap();
        let (a, a_calls) = file_scheduler(&dir, "node-a").await;
        let (b, b_calls) = file_scheduler(&dir, "node-b").await;
        a.start().await.unwrap();
        b.start().await.unwrap();
        assert!(wait_for_leader(&a, &b).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(a.is_leader() ^ b.is_leader());
        let (leader_calls, follower_calls) = if a.is_leader() {
            (a_calls.calls(), b_calls.calls())
        } else {
            (b_calls.calls(), a_calls.calls())
        };
        assert!(leader_calls > 0);
        assert_eq!(follower_calls, 0);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_follower_takes_over_after_leader_stops() {
        let dir = TempDir::new().unwrap();
        let (a, a_calls) = file_scheduler(&dir, "node-a").await;
        a.start().await.unwrap();
        assert!(TestEnv::wait_for(|| async { a.is_leader() }, Duration::from_secs(1)).await);

        let (b, b_calls) = file_scheduler(&dir, "node-b").await;
        b.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!b.is_leader());
        assert!(a_calls.calls() > 0);
        assert_eq!(b_calls.calls(), 0);

        a.shutdown().await.unwrap();

        // lock_timeout(300ms) + heartbeat(100ms) 之内接管，留出调度余量
        assert!(TestEnv::wait_for(|| async { b.is_leader() }, Duration::from_millis(600)).await);
        assert!(TestEnv::wait_for(|| async { b_calls.calls() > 0 }, Duration::from_millis(300)).await);

        b.shutdown().await.unwrap();
        let lock = FileLockBackend::new(dir.path().join("leader.lock"));
        assert!(lock.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crashed_leader_lock_goes_stale() {
        let dir = TempDir::new().unwrap();
        let (a, _) = file_scheduler(&dir, "node-a").await;
        a.start().await.unwrap();
        assert!(TestEnv::wait_for(|| async { a.is_leader() }, Duration::from_secs(1)).await);

        let (b, b_calls) = file_scheduler(&dir, "node-b").await;
        b.start().await.unwrap();

        // 不释放锁，只停止心跳
        a.leader_election().stop_heartbeat();
        assert!(TestEnv::wait_for(|| async { b.is_leader() }, Duration::from_secs(1)).await);
        assert!(TestEnv::wait_for(|| async { b_calls.calls() > 0 }, Duration::from_millis(300)).await);

        let lock = FileLockBackend::new(dir.path().join("leader.lock"));
        assert_eq!(lock.read().await.unwrap().unwrap().instance_id, "node-b");
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_three_instances_share_memory_lock() {
        let lock = InMemoryLockBackend::new();
        let mut schedulers = Vec::new();
        for i in 0..3 {
            let config = TestConfigBuilder::new()
                .instance_id(format!("node-{i}"))
                .leader_strategy(LeaderStrategy::Redis)
                .build();
            let scheduler =
                JobScheduler::with_backends(&config, Some(Arc::new(lock.clone())), None);
            scheduler.start().await.unwrap();
            schedulers.push(scheduler);
        }

        assert!(
            TestEnv::wait_for(
                || async { schedulers.iter().any(|s| s.is_leader()) },
                Duration::from_secs(1)
            )
            .await
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        let leaders: Vec<_> = schedulers.iter().filter(|s| s.is_leader()).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(lock.holder().as_deref(), Some(leaders[0].instance_id()));

        for scheduler in &schedulers {
            scheduler.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_step_down_discards_queued_scheduled_runs() {
        let lock = InMemoryLockBackend::new();
        let config = TestConfigBuilder::new()
            .instance_id("node-a")
            .leader_strategy(LeaderStrategy::Redis)
            .max_concurrent_jobs(1)
            .build();
        let scheduler = JobScheduler::with_backends(&config, Some(Arc::new(lock.clone())), None);

        let blocker = ConcurrencyProbe::new(Duration::from_millis(300));
        scheduler
            .every(Duration::from_secs(3600))
            .name("blocker")
            .disabled()
            .register(Arc::new(blocker.clone()))
            .await
            .unwrap();
        let tick = Arc::new(CountingHandler::new());
        scheduler
            .every(Duration::from_millis(40))
            .name("tick")
            .disabled()
            .register(tick.clone())
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        assert!(TestEnv::wait_for(|| async { scheduler.is_leader() }, Duration::from_secs(1)).await);

        // 手动触发占满全局并发，随后的定时触发只能排队
        scheduler.trigger_job("blocker").await.unwrap();
        assert!(TestEnv::wait_for(|| async { blocker.running() == 1 }, Duration::from_millis(200)).await);
        scheduler.set_job_enabled("tick", true).await.unwrap();
        assert!(
            TestEnv::wait_for(
                || async { scheduler.get_stats().await.pending_executions == 1 },
                Duration::from_millis(200)
            )
            .await
        );

        scheduler.leader_election().stop_heartbeat();
        scheduler.leader_election().force_step_down().await;
        assert!(!scheduler.is_leader());
        assert!(
            TestEnv::wait_for(
                || async { scheduler.get_stats().await.pending_executions == 0 },
                Duration::from_millis(200)
            )
            .await
        );

        // 运行中的执行照常完成，但排队的定时触发不会在从节点上执行
        assert!(TestEnv::wait_for(|| async { blocker.completed() == 1 }, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(tick.calls(), 0);
        assert!(!scheduler.is_leader());

        scheduler.shutdown().await.unwrap();
    }
}
