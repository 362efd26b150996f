//! ruo - Release Upgrade Operator binary.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, CustomResourceExt};
use tracing::{error, info, warn};

use ruo::cluster::{ClusterApi, KubeCluster};
use ruo::config::{BUILD_DATE, COMMIT, Command, Config, Settings, VERSION};
use ruo::controller::{self, Context};
use ruo::crd::{ReleaseManifest, UpgradePlan};
use ruo::external::{HelmChart, Plan};
use ruo::{health, metrics};

#[tokio::main]
async fn main() {
    let config = Config::from_args();
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    if let Some(Command::Crd) = config.command {
        if let Err(e) = print_crds() {
            eprintln!("Failed to render CRDs: {e}");
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting ruo v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    if let Err(e) = run(&config).await {
        error!("Operator failed: {}", e);
        std::process::exit(1);
    }
}

fn print_crds() -> Result<()> {
    for crd in [UpgradePlan::crd(), ReleaseManifest::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

/// JSON for production, compact text otherwise. `RUST_LOG` overrides `--log-level`.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

/// Main operator loop.
async fn run(config: &Config) -> Result<()> {
    let settings = Arc::new(Settings::from(config));

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let health_state = health::HealthState::default();
    let health_port = config.health_port;
    let health_state_clone = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_state_clone).await {
            error!("Health server failed: {}", e);
        }
    });

    let metrics_port = config.metrics_port;
    let registry_clone = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_port, registry_clone).await {
            error!("Metrics server failed: {}", e);
        }
    });

    // helm-controller Jobs are traced back to their plan through this HelmChart cache.
    let helm_charts: Api<HelmChart> = Api::namespaced(client.clone(), &settings.chart_namespace);
    let (chart_store, chart_writer) = reflector::store();
    let chart_reflector = reflector(chart_writer, watcher(helm_charts, watcher::Config::default()))
        .default_backoff()
        .for_each(|_| futures::future::ready(()));
    tokio::spawn(chart_reflector);

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let ctx = Arc::new(Context {
        cluster,
        settings: settings.clone(),
        metrics,
    });

    let plans: Api<UpgradePlan> = Api::all(client.clone());
    let suc_plans: Api<Plan> = Api::namespaced(client.clone(), &settings.upgrade_namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &settings.upgrade_namespace);
    let jobs: Api<Job> = Api::all(client.clone());
    let manifests: Api<ReleaseManifest> = Api::all(client.clone());

    // Objects created by the operator carry the plan-name identity label.
    let owned = watcher::Config::default().labels(&settings.keys.plan_name);

    let plan_controller = Controller::new(plans, watcher::Config::default());
    let plan_store = plan_controller.store();

    let plan_keys = settings.keys.clone();
    let secret_keys = settings.keys.clone();
    let job_settings = settings.clone();

    health_state.set_ready(true);

    info!("Starting UpgradePlan controller");
    plan_controller
        .watches(suc_plans, owned.clone(), move |plan| {
            controller::map_plan(&plan_keys, &plan)
        })
        .watches(secrets, owned, move |secret| {
            controller::map_secret(&secret_keys, &secret)
        })
        .watches(jobs, watcher::Config::default(), move |job| {
            controller::map_job(&job_settings, &job, |chart| chart_store.get(chart))
        })
        .watches(manifests, watcher::Config::default(), move |manifest| {
            controller::map_release_manifest(&manifest, &plan_store.state())
        })
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => info!("Reconciled: {}", obj),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        })
        .await;

    Ok(())
}
