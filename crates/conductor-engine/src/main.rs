use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conductor_bus::{CorrelationConfig, CorrelationCoordinator, RedisBusClient};
use conductor_engine::{
    AiWorkflowGenerator, CapabilityRegistry, ExecutorConfig, GeneratorConfig, Orchestrator,
    OrchestratorConfig, RecoveryConfig, RecoveryManager, RegistryConfig, TaskExecutor,
    TaskExecutorConfig, TemplateStore, WorkflowExecutor,
};
use conductor_storage::{RedisExecutionStore, StoreConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor=debug,conductor_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("conductor starting...");
    let config = OrchestratorConfig::from_env();

    // Bus and state store share one Redis deployment
    let bus = Arc::new(RedisBusClient::connect(&config.redis_url).await?);
    let store = Arc::new(
        RedisExecutionStore::connect(
            &config.redis_url,
            StoreConfig::default().with_execution_ttl(config.execution_ttl),
        )
        .await?,
    );
    tracing::info!("redis connections established");

    let coordinator = Arc::new(CorrelationCoordinator::new(
        bus.clone(),
        CorrelationConfig::default(),
    ));
    coordinator.start().await?;

    let registry = Arc::new(CapabilityRegistry::new(
        bus.clone(),
        RegistryConfig::default().with_stale_threshold(config.capability_stale_threshold),
    ));
    registry.start().await?;
    // Ask every service to announce itself before traffic arrives
    registry.request_refresh(None).await?;

    let templates = Arc::new(TemplateStore::load_dir(&config.template_dir)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = Arc::new(TaskExecutor::new(
        coordinator.clone(),
        TaskExecutorConfig {
            default_task_timeout: config.default_task_timeout,
        },
    ));
    let executor = Arc::new(WorkflowExecutor::new(
        store.clone(),
        tasks,
        ExecutorConfig::default()
            .with_max_concurrent(config.max_concurrent)
            .with_default_workflow_timeout(config.default_workflow_timeout),
        shutdown_rx.clone(),
    ));

    let recovery = Arc::new(RecoveryManager::new(
        store.clone(),
        RecoveryConfig {
            recovery_interval: config.recovery_interval,
            max_execution_time: config.max_execution_time,
            max_task_time: config.max_task_time,
            activity_window: config.activity_window,
            retention: config.retention,
            ..RecoveryConfig::default()
        },
    ));
    recovery.start();

    let generator = Arc::new(AiWorkflowGenerator::new(
        coordinator.clone(),
        registry.clone(),
        GeneratorConfig::default(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        bus.clone(),
        executor,
        templates,
        generator,
    ));

    let server = {
        let orchestrator = orchestrator.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    tracing::info!("conductor ready for workflow requests");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    recovery.stop();
    registry.stop();
    coordinator.stop();
    let _ = server.await;

    tracing::info!("conductor stopped");
    Ok(())
}
