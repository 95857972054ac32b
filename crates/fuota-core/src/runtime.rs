// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the FUOTA engine.
//!
//! This module provides [`FuotaRuntime`] which allows embedding the engine
//! into an existing tokio application: the host owns the database pool and
//! the network-server client, the runtime owns the periodic workers.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fuota_core::runtime::FuotaRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     fuota_core::migrations::run_postgres(&pool).await?;
//!
//!     let runtime = FuotaRuntime::builder()
//!         .pool(pool)
//!         .backend(Arc::new(MyNetworkServerClient::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::applayer::fragmentation::FragmentationSyncWorker;
use crate::applayer::multicastsetup::{ClassCSessionSyncWorker, SetupSyncWorker};
use crate::backend::NetworkServerClient;
use crate::config::{Config, SyncConfig};
use crate::fuota::{DeploymentWorker, DeploymentWorkerConfig};

/// Builder for creating a [`FuotaRuntime`].
pub struct FuotaRuntimeBuilder {
    pool: Option<PgPool>,
    backend: Option<Arc<dyn NetworkServerClient>>,
    deployment: DeploymentWorkerConfig,
    multicast_setup_sync: SyncConfig,
    fragmentation_sync: SyncConfig,
}

impl std::fmt::Debug for FuotaRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuotaRuntimeBuilder")
            .field("pool", &self.pool.as_ref().map(|_| "..."))
            .field("backend", &self.backend.as_ref().map(|_| "..."))
            .field("deployment", &self.deployment)
            .field("multicast_setup_sync", &self.multicast_setup_sync)
            .field("fragmentation_sync", &self.fragmentation_sync)
            .finish()
    }
}

impl Default for FuotaRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            backend: None,
            deployment: DeploymentWorkerConfig::default(),
            multicast_setup_sync: SyncConfig::default(),
            fragmentation_sync: SyncConfig::default(),
        }
    }
}

impl FuotaRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database pool (required).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the network-server client (required).
    pub fn backend(mut self, backend: Arc<dyn NetworkServerClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Take all worker settings from a loaded [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.deployment = DeploymentWorkerConfig {
            interval: config.deployment_interval,
            batch_size: config.deployment_batch_size,
            mc_group_id: config.mc_group_id,
            frag_index: config.frag_index,
            multicast_setup_retries: config.multicast_setup_sync.max_retries,
            fragmentation_session_retries: config.fragmentation_sync.max_retries,
        };
        self.multicast_setup_sync = config.multicast_setup_sync;
        self.fragmentation_sync = config.fragmentation_sync;
        self
    }

    /// Override the deployment driver settings.
    pub fn deployment_config(mut self, config: DeploymentWorkerConfig) -> Self {
        self.deployment = config;
        self
    }

    /// Override the multicast setup / Class-C session sync settings.
    pub fn multicast_setup_sync_config(mut self, config: SyncConfig) -> Self {
        self.multicast_setup_sync = config;
        self
    }

    /// Override the fragmentation session sync settings.
    pub fn fragmentation_sync_config(mut self, config: SyncConfig) -> Self {
        self.fragmentation_sync = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<FuotaRuntimeConfig> {
        let pool = self.pool.ok_or_else(|| anyhow::anyhow!("pool is required"))?;
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;

        Ok(FuotaRuntimeConfig {
            pool,
            backend,
            deployment: self.deployment,
            multicast_setup_sync: self.multicast_setup_sync,
            fragmentation_sync: self.fragmentation_sync,
        })
    }
}

/// Configuration for a [`FuotaRuntime`].
pub struct FuotaRuntimeConfig {
    pool: PgPool,
    backend: Arc<dyn NetworkServerClient>,
    deployment: DeploymentWorkerConfig,
    multicast_setup_sync: SyncConfig,
    fragmentation_sync: SyncConfig,
}

impl std::fmt::Debug for FuotaRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuotaRuntimeConfig")
            .field("pool", &"...")
            .field("backend", &"...")
            .field("deployment", &self.deployment)
            .field("multicast_setup_sync", &self.multicast_setup_sync)
            .field("fragmentation_sync", &self.fragmentation_sync)
            .finish()
    }
}

impl FuotaRuntimeConfig {
    /// Start the runtime, spawning the periodic workers.
    pub async fn start(self) -> Result<FuotaRuntime> {
        let mut shutdowns = Vec::new();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let deployment = DeploymentWorker::new(
            self.pool.clone(),
            self.backend.clone(),
            self.deployment,
        );
        shutdowns.push(deployment.shutdown_handle());
        handles.push(tokio::spawn(async move { deployment.run().await }));

        let setup_sync = SetupSyncWorker::new(
            self.pool.clone(),
            self.backend.clone(),
            self.multicast_setup_sync,
        );
        shutdowns.push(setup_sync.shutdown_handle());
        handles.push(tokio::spawn(async move { setup_sync.run().await }));

        let class_c_sync = ClassCSessionSyncWorker::new(
            self.pool.clone(),
            self.backend.clone(),
            self.multicast_setup_sync,
        );
        shutdowns.push(class_c_sync.shutdown_handle());
        handles.push(tokio::spawn(async move { class_c_sync.run().await }));

        let fragmentation_sync = FragmentationSyncWorker::new(
            self.pool.clone(),
            self.backend.clone(),
            self.fragmentation_sync,
        );
        shutdowns.push(fragmentation_sync.shutdown_handle());
        handles.push(tokio::spawn(async move { fragmentation_sync.run().await }));

        info!("FuotaRuntime started");

        Ok(FuotaRuntime { shutdowns, handles })
    }
}

/// A running FUOTA engine that can be embedded in an application.
///
/// The runtime manages the deployment driver and the three provisioning
/// sync workers. Call [`shutdown`](Self::shutdown) for graceful
/// termination.
pub struct FuotaRuntime {
    shutdowns: Vec<Arc<Notify>>,
    handles: Vec<JoinHandle<()>>,
}

impl FuotaRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FuotaRuntimeBuilder {
        FuotaRuntimeBuilder::new()
    }

    /// Check if all workers are still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().all(|h| !h.is_finished())
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals every worker to stop after its current tick and waits for
    /// them to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("FuotaRuntime shutting down...");

        for shutdown in &self.shutdowns {
            shutdown.notify_one();
        }

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
                return Err(anyhow::anyhow!("worker task panicked: {}", e));
            }
        }

        info!("FuotaRuntime shutdown complete");
        Ok(())
    }
}
