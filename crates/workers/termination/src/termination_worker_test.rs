#[cfg(test)]
mod test {
    use crate::TerminationWorker;
    use agentd_core_dependency::{Context, Engine, EngineConfig, EngineError, Manifold, TaskWorker, Worker, WorkerState};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_signal_terminates_agent() {
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let worker = TerminationWorker::with_signal(async move {
            let _ = signal_rx.await;
        });

        signal_tx.send(()).unwrap();
        assert!(matches!(worker.wait().await, Err(EngineError::TerminateAgent)));
    }

    #[tokio::test]
    async fn test_kill_is_clean() {
        let worker = TerminationWorker::with_signal(std::future::pending());
        worker.kill();
        worker.kill();
        assert!(worker.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_stops_engine() {
        let signal = CancellationToken::new();
        let engine = Engine::new(EngineConfig::default()).unwrap();

        let manifold_signal = signal.clone();
        let manifold = Manifold::new(move |_ctx: Context| {
            let signal = manifold_signal.clone();
            async move { Ok(TerminationWorker::with_signal(async move { signal.cancelled().await })) }
        });
        engine.install("termination", manifold).await.unwrap();
        engine
            .install(
                "idle",
                Manifold::new(|_ctx: Context| async {
                    Ok(TaskWorker::spawn("idle", |token| async move {
                        token.cancelled().await;
                        Ok(())
                    }))
                }),
            )
            .await
            .unwrap();

        let mut reports = engine.subscribe_reports();
        tokio::time::timeout(
            Duration::from_secs(10),
            reports.wait_for(|report| {
                report.worker_state("termination") == Some(WorkerState::Started)
                    && report.worker_state("idle") == Some(WorkerState::Started)
            }),
        )
        .await
        .unwrap()
        .unwrap();

        signal.cancel();
        assert!(matches!(engine.wait().await, Err(EngineError::TerminateAgent)));
        assert_eq!(engine.report().worker_state("idle"), Some(WorkerState::Stopped));
    }
}
