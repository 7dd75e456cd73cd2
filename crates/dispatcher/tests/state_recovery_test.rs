#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scheduler_core::{handler_fn, ExecutionStatus, SchedulerEvent, StateStore};
    use scheduler_dispatcher::JobScheduler;
    use scheduler_infrastructure::JsonFileStateStore;
    use scheduler_testing_utils::{CountingHandler, TestConfigBuilder, TestEnv};
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_restart_restores_counters_and_reports_crashed_executions() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let config = TestConfigBuilder::new()
            .instance_id("node-a")
            .state_path(state_path.to_string_lossy())
            .build();

        let first = JobScheduler::from_config(&config).await.unwrap();
        let report = first
            .every(Duration::from_secs(3600))
            .name("report")
            .register(Arc::new(CountingHandler::new()))
            .await
            .unwrap();
        let slow = first
            .every(Duration::from_secs(3600))
            .name("slow")
            .register(handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }))
            .await
            .unwrap();

        for _ in 0..2 {
            first.trigger_job(&report).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        first.trigger_job(&slow).await.unwrap();
        assert!(
            TestEnv::wait_for(
                || async {
                    first.get_job_state(&report).await.unwrap().success_count == 2
                        && first.state_manager().running_executions().await.len() == 1
                },
                Duration::from_secs(1),
            )
            .await
        );
        let in_flight = first.state_manager().running_executions().await[0]
            .execution_id
            .clone();

        // 模拟进程在执行途中退出：写入快照后不再结束执行
        assert!(first.state_manager().persist_state().await);
        first.state_manager().shutdown().await;

        let snapshot = JsonFileStateStore::new(&state_path)
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.running_executions.len(), 1);

        let second = JobScheduler::from_config(&config).await.unwrap();
        let mut events = second.subscribe();
        second
            .every(Duration::from_secs(3600))
            .name("report")
            .register(Arc::new(CountingHandler::new()))
            .await
            .unwrap();
        second.start().await.unwrap();

        let state = second.get_job_state(&report).await.unwrap();
        assert_eq!(state.execution_count, 2);
        assert_eq!(state.success_count, 2);
        assert_eq!(
            state.last_execution.map(|e| e.status),
            Some(ExecutionStatus::Completed)
        );
        // 未重新注册的任务同样保留状态
        assert!(second.get_job_state(&slow).await.is_some());

        let mut crashed = None;
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::JobsCrashed { executions } = event {
                crashed = Some(executions);
            }
        }
        let crashed = crashed.expect("jobs-crashed event");
        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].execution_id, in_flight);
        assert_eq!(crashed[0].job_id, slow);

        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_persists_final_state() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("nested").join("state.json");
        let config = TestConfigBuilder::new()
            .state_path(state_path.to_string_lossy())
            .build();

        let scheduler = JobScheduler::from_config(&config).await.unwrap();
        let id = scheduler
            .every(Duration::from_secs(3600))
            .name("audit")
            .register(Arc::new(CountingHandler::new()))
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        scheduler.trigger_job(&id).await.unwrap();
        assert!(
            TestEnv::wait_for(
                || async { scheduler.get_job_state(&id).await.unwrap().success_count == 1 },
                Duration::from_secs(1),
            )
            .await
        );
        scheduler.shutdown().await.unwrap();

        let snapshot = JsonFileStateStore::new(&state_path)
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.jobs[&id].success_count, 1);
        assert!(snapshot.running_executions.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::write(&state_path, "{ not json").unwrap();
        let config = TestConfigBuilder::new()
            .state_path(state_path.to_string_lossy())
            .build();

        let scheduler = JobScheduler::from_config(&config).await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.state_manager().get_all_states().await.is_empty());
        scheduler.shutdown().await.unwrap();
    }
}
