//! Main application state and service coordination
//!
//! `ServiceContext` holds the shared components the HTTP layer and the
//! health checks read from. `AppState` owns the context plus the background
//! tasks and drives startup and graceful shutdown.

use crate::admin::AdminService;
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::platform::InMemoryPlatform;
use crate::queue::QueueReconciler;
use crate::scheduler::{ReconcileScheduler, ReconcileTrigger, SchedulerHandle, SchedulerLiveness};
use crate::storage::{InMemoryRepository, JsonFileRepository, Repository};
use crate::types::Member;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Components shared between the scheduler, HTTP handlers and health checks
pub struct ServiceContext {
    config: AppConfig,
    repository: Arc<dyn Repository>,
    platform: Arc<InMemoryPlatform>,
    reconciler: Arc<QueueReconciler>,
    admin: AdminService,
    trigger: ReconcileTrigger,
    metrics: Arc<MetricsCollector>,
    scheduler: SchedulerLiveness,
    is_running: RwLock<bool>,
    started_at: Instant,
}

impl ServiceContext {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    pub fn platform(&self) -> Arc<InMemoryPlatform> {
        self.platform.clone()
    }

    pub fn reconciler(&self) -> Arc<QueueReconciler> {
        self.reconciler.clone()
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub fn trigger(&self) -> &ReconcileTrigger {
        &self.trigger
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub(crate) async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    /// Whether the reconciliation loop is still alive
    pub fn scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Main application state containing all service components
pub struct AppState {
    context: Arc<ServiceContext>,
    health_server: Arc<HealthServer>,
    scheduler: Option<ReconcileScheduler>,
    scheduler_handle: Option<SchedulerHandle>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} queue service", config.service.name);
        info!(
            "Configuration: refresh={}s, http_port={}, storage={}",
            config.scheduler.refresh_seconds,
            config.service.http_port,
            config
                .storage
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "memory".to_string())
        );

        let repository = Self::initialize_repository(&config).await?;
        Self::ensure_superuser(&config, repository.as_ref()).await?;
        let platform = Arc::new(InMemoryPlatform::new());
        Self::with_components(config, repository, platform)
    }

    /// Assemble the service around an existing repository and platform bridge
    pub fn with_components(
        config: AppConfig,
        repository: Arc<dyn Repository>,
        platform: Arc<InMemoryPlatform>,
    ) -> Result<Self, ServiceError> {
        let schedule = config
            .session_schedule()
            .map_err(|e| ServiceError::Configuration {
                message: format!("{:#}", e),
            })?;

        let metrics = Arc::new(
            MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })?,
        );

        let reconciler = Arc::new(
            QueueReconciler::new(
                repository.clone(),
                platform.clone(),
                platform.clone(),
                schedule,
            )
            .with_metrics(metrics.clone())
            .with_dry_run(config.scheduler.dry_run),
        );
        if config.scheduler.dry_run {
            warn!("Dry run enabled: status messages and queue changes will not be written");
        }

        let (scheduler, trigger) = ReconcileScheduler::new(
            reconciler.clone(),
            config.refresh_interval(),
            config.scheduler.trigger_buffer,
        );
        let admin = AdminService::new(reconciler.clone()).with_trigger(trigger.clone());

        let context = Arc::new(ServiceContext {
            config,
            repository,
            platform,
            reconciler,
            admin,
            trigger,
            metrics: metrics.clone(),
            scheduler: scheduler.liveness(),
            is_running: RwLock::new(false),
            started_at: Instant::now(),
        });

        let health_config = HealthServerConfig {
            port: context.config.service.http_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, metrics).with_context(context.clone()));

        Ok(Self {
            context,
            health_server,
            scheduler: Some(scheduler),
            scheduler_handle: None,
            background_tasks: Vec::new(),
        })
    }

    /// Start the HTTP server, the scheduler and maintenance tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} queue service", self.context.config.service.name);
        self.context.set_running(true).await;

        self.start_http_server().await?;
        self.start_scheduler()?;
        self.start_background_tasks();

        info!("✅ Queue service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown");
        self.context.set_running(false).await;

        // Lets an in-flight pass reach its commit before returning
        if let Some(handle) = self.scheduler_handle.take() {
            handle
                .shutdown(self.context.config.shutdown_timeout())
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("{:#}", e),
                })?;
            info!("✅ Reconciliation scheduler stopped");
        }

        if let Err(e) = self.health_server.stop().await {
            warn!("Failed to stop HTTP server: {}", e);
        }

        self.stop_background_tasks().await;

        match self.context.repository.list_servers().await {
            Ok(servers) => info!("Final state: {} servers tracked", servers.len()),
            Err(e) => warn!("Failed to read final state: {}", e),
        }
        info!("✅ Queue service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.context.config
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        self.context.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.context.is_running().await
    }

    async fn initialize_repository(config: &AppConfig) -> Result<Arc<dyn Repository>, ServiceError> {
        match &config.storage.path {
            Some(path) => {
                let repository =
                    JsonFileRepository::open(path)
                        .await
                        .map_err(|e| ServiceError::Storage {
                            message: format!("{:#}", e),
                        })?;
                Ok(Arc::new(repository))
            }
            None => {
                info!("No storage path configured, records are kept in memory only");
                Ok(Arc::new(InMemoryRepository::new()))
            }
        }
    }

    async fn ensure_superuser(
        config: &AppConfig,
        repository: &dyn Repository,
    ) -> Result<(), ServiceError> {
        let Some(superuser) = &config.superuser else {
            warn!("No superuser configured; only per-server admins can run admin commands");
            return Ok(());
        };

        repository
            .upsert_member(Member::superuser(superuser.id, superuser.name.clone()))
            .await
            .map_err(|e| ServiceError::Storage {
                message: format!("Failed to store superuser: {:#}", e),
            })?;
        info!("Superuser {} ({}) registered", superuser.name, superuser.id);
        Ok(())
    }

    async fn start_http_server(&mut self) -> Result<(), ServiceError> {
        let health_server = self.health_server.clone();
        let port = self.context.config.service.http_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });
        self.background_tasks.push(handle);

        // Give the listener a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        info!("✅ HTTP server started on port {}", port);
        Ok(())
    }

    fn start_scheduler(&mut self) -> Result<(), ServiceError> {
        let scheduler = self
            .scheduler
            .take()
            .ok_or_else(|| ServiceError::Initialization {
                message: "Scheduler already started".to_string(),
            })?;
        self.scheduler_handle = Some(scheduler.spawn());
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let context = self.context.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            info!("Health metrics task started");

            while context.is_running().await {
                interval.tick().await;
                refresh_health_metrics(&context).await;
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
        info!("{} background tasks started", self.background_tasks.len());
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }
        info!("✅ All {} background tasks stopped", task_count);
    }
}

/// Publish uptime and component health gauges
async fn refresh_health_metrics(context: &ServiceContext) {
    let metrics = context.metrics();
    metrics
        .service()
        .uptime_seconds
        .set(context.uptime().as_secs() as i64);

    let repository_ok = context.repository.list_servers().await.is_ok();
    let scheduler_ok = context.scheduler_running();
    if !scheduler_ok {
        warn!("Reconciliation scheduler is not running");
    }
    metrics.update_component_health("repository", repository_ok);
    metrics.update_component_health("scheduler", scheduler_ok);
    metrics.update_health_status(if repository_ok && scheduler_ok { 2 } else { 0 });

    debug!("Updated service health metrics");
}
