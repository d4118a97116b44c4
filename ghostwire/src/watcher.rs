//! The long-lived supervisor: polls the owning pod's role label and toggles
//! the DNAT jump rule, serving metrics and health on the side.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ghostwire_k8s::{
    labels::{LabelReader, PodLabels},
    poller::{PollerConfig, RolePoller, TransitionHandler},
};
use ghostwire_nat::{self as nat, CommandExecutor, Executor, NAT_TABLE};
use std::{sync::Arc, time::Duration};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::oneshot,
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    admin,
    config::{ConfigFile, WatcherArgs, WatcherSettings},
    metrics::{ErrorKind, Metrics},
    readiness::Readiness,
};

/// Grace period for draining the admin server at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: &WatcherArgs, file: &ConfigFile) -> Result<()> {
    let settings = WatcherSettings::resolve(args, file)?;
    let client = ghostwire_k8s::Client::try_default()
        .await
        .context("create kubernetes client")?;
    let reader: Arc<dyn LabelReader> = Arc::new(PodLabels::new(
        client,
        settings.pod_namespace.clone(),
        settings.pod_name.clone(),
    ));
    let executor: Arc<dyn Executor> = Arc::new(CommandExecutor::new());
    supervise(settings, executor, reader).await
}

async fn supervise(
    settings: WatcherSettings,
    executor: Arc<dyn Executor>,
    reader: Arc<dyn LabelReader>,
) -> Result<()> {
    info!(
        pod_name = %settings.pod_name,
        namespace = %settings.pod_namespace,
        label_key = %settings.label_key,
        nat_chain = %settings.chain,
        jump_hook = %settings.hook,
        dual_stack = settings.dual_stack,
        listen_addr = %settings.listen_addr,
        poll_interval = ?settings.poll_interval,
        "starting watcher"
    );

    let metrics = Arc::new(Metrics::new());
    metrics.set_jump_active(false);
    let readiness = Arc::new(Readiness::new());

    seed_rule_count(&metrics, &settings);
    verify_chain(&*executor, &settings, &metrics, &readiness).await;

    let reader = Arc::new(InstrumentedLabels {
        inner: reader,
        metrics: metrics.clone(),
        readiness: readiness.clone(),
    });

    let handler = Arc::new(JumpManager {
        executor: executor.clone(),
        hook: settings.hook.clone(),
        chain: settings.chain.clone(),
        dual_stack: settings.dual_stack,
        active_value: settings.active_value.clone(),
        preview_value: settings.preview_value.clone(),
        metrics: metrics.clone(),
    });

    let poller = Arc::new(RolePoller::new(PollerConfig {
        reader,
        label_key: settings.label_key.clone(),
        active_value: settings.active_value.clone(),
        preview_value: settings.preview_value.clone(),
        poll_interval: settings.poll_interval,
        handler: Some(handler),
    })?);

    let (drain_tx, drain_rx) = drain::channel();
    let poller_task = tokio::spawn(poller.run(drain_rx));

    let (close_tx, close_rx) = oneshot::channel();
    let mut server_task = tokio::spawn(admin::serve(
        settings.listen_addr,
        metrics.clone(),
        readiness.clone(),
        close_rx,
    ));

    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    let mut server_finished = false;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        result = &mut server_task => {
            server_finished = true;
            report_server_exit(result);
        }
    }

    drain_tx.drain().await;
    if let Err(error) = poller_task.await {
        error!(%error, "role poller task panicked");
    }

    let _ = close_tx.send(());
    if !server_finished {
        match time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
            Ok(result) => report_server_exit(result),
            Err(_) => warn!("timed out waiting for admin server shutdown"),
        }
    }

    info!("watcher shutdown complete");
    Ok(())
}

fn report_server_exit(result: Result<Result<(), hyper::Error>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => debug!("admin server stopped"),
        Ok(Err(error)) => error!(%error, "admin server failed"),
        Err(error) => error!(%error, "admin server task panicked"),
    }
}

/// Seeds the rule-count gauge from the audit map the preparer wrote.
/// Failures are diagnostic only.
fn seed_rule_count(metrics: &Metrics, settings: &WatcherSettings) {
    match nat::count_audit_lines(&settings.audit_path) {
        Ok(count) => metrics.set_dnat_rules(count),
        Err(error) => warn!(
            audit_path = %settings.audit_path.display(),
            %error,
            "failed to count dnat mappings"
        ),
    }
}

/// Confirms the prepared chain exists. The watcher keeps running either
/// way; an unverified chain just keeps `/healthz` unhealthy.
async fn verify_chain(
    executor: &dyn Executor,
    settings: &WatcherSettings,
    metrics: &Metrics,
    readiness: &Readiness,
) {
    match nat::chain_exists(executor, NAT_TABLE, &settings.chain).await {
        Ok(true) => {
            readiness.set_chain_verified();
            info!(chain = %settings.chain, "dnat chain verified");
        }
        Ok(false) => {
            metrics.incr_error(ErrorKind::ChainVerify);
            warn!(chain = %settings.chain, "dnat chain missing");
        }
        Err(error) => {
            metrics.incr_error(ErrorKind::ChainVerify);
            error!(chain = %settings.chain, %error, "failed to verify dnat chain");
        }
    }
}

/// Wraps the label reader so every successful read marks labels as readable
/// and every failure feeds the error counter.
struct InstrumentedLabels {
    inner: Arc<dyn LabelReader>,
    metrics: Arc<Metrics>,
    readiness: Arc<Readiness>,
}

#[async_trait]
impl LabelReader for InstrumentedLabels {
    async fn get_label(&self, key: &str) -> Result<String> {
        match self.inner.get_label(key).await {
            Ok(value) => {
                self.readiness.set_labels_read();
                Ok(value)
            }
            Err(error) => {
                self.metrics.incr_error(ErrorKind::LabelRead);
                Err(error)
            }
        }
    }
}

/// Applies role transitions to the kernel: `preview` activates the jump,
/// `active` removes it. On failure the gauge keeps its previous value so
/// the next successful transition restores truth.
struct JumpManager {
    executor: Arc<dyn Executor>,
    hook: String,
    chain: String,
    dual_stack: bool,
    active_value: String,
    preview_value: String,
    metrics: Arc<Metrics>,
}

#[async_trait]
impl TransitionHandler for JumpManager {
    async fn on_transition(&self, previous: &str, current: &str) -> Result<()> {
        if current == self.preview_value {
            info!(previous_role = previous, current_role = current, "activating dnat jump");
            nat::add_jump(
                &*self.executor,
                NAT_TABLE,
                &self.hook,
                &self.chain,
                self.dual_stack,
            )
            .await
            .map_err(|error| {
                self.metrics.incr_error(ErrorKind::Iptables);
                anyhow::Error::from(error).context("add jump")
            })?;
            self.metrics.set_jump_active(true);
        } else if current == self.active_value {
            info!(previous_role = previous, current_role = current, "deactivating dnat jump");
            nat::remove_jump(
                &*self.executor,
                NAT_TABLE,
                &self.hook,
                &self.chain,
                self.dual_stack,
            )
            .await
            .map_err(|error| {
                self.metrics.incr_error(ErrorKind::Iptables);
                anyhow::Error::from(error).context("remove jump")
            })?;
            self.metrics.set_jump_active(false);
        } else {
            debug!(previous_role = previous, current_role = current, "ignoring transition");
        }
        Ok(())
    }
}
