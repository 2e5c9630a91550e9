/**
 * SENSORSIM KERNEL - Point d'entrée du simulateur
 *
 * RÔLE : Bootstrap complet : config, modèle machine (restauration + canaux
 * configurés), polling, bridge MQTT optionnel, API HTTP.
 * À l'arrêt (Ctrl-C) la configuration est sauvegardée si demandé.
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sensorsim_kernel::config::{load_config, KernelConfig};
use sensorsim_kernel::http::{build_router, AppState};
use sensorsim_kernel::machine::MachineModel;
use sensorsim_kernel::mqtt::spawn_mqtt_bridge;
use sensorsim_kernel::state::{new_state, Shared};

fn build_machine(cfg: &KernelConfig) -> MachineModel {
    let mut machine = MachineModel::new();
    machine.set_state(cfg.machine.state);
    machine.set_mode(cfg.machine.mode);

    if let Some(persistence) = cfg.persistence.as_ref().filter(|p| p.restore_on_start) {
        match machine.restore(&persistence.path) {
            Ok(report) => info!(
                "Restored {} channel(s), skipped {}",
                report.restored.len(),
                report.skipped.len()
            ),
            Err(e) => warn!("Restore from {} failed: {e}", persistence.path.display()),
        }
    }

    for seed in &cfg.channels {
        let descriptor = seed.descriptor();
        if machine.contains(descriptor.id()) {
            continue;
        }
        if let Err(e) = machine.add_channel(descriptor, None, &seed.simulator_config) {
            error!("Cannot seed channel {}/{}: {e}", seed.kind, seed.identifier);
        }
    }
    machine
}

fn save_on_shutdown(machine: &Shared<MachineModel>, cfg: &KernelConfig) {
    let Some(persistence) = cfg.persistence.as_ref().filter(|p| p.save_on_shutdown) else {
        return;
    };
    match machine.lock().save(&persistence.path) {
        Ok(()) => info!("Configuration saved to {}", persistence.path.display()),
        Err(e) => error!("Save to {} failed: {e}", persistence.path.display()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Sensorsim kernel starting...");
    let cfg = load_config().await;

    let machine = new_state(build_machine(&cfg));
    if cfg.autostart_polling {
        machine.lock().start_polling();
    }

    if let Some(mqtt) = &cfg.mqtt {
        spawn_mqtt_bridge(machine.clone(), mqtt);
    }

    let app = build_router(AppState { machine: machine.clone(), cfg: new_state(cfg.clone()) });

    let addr: SocketAddr = format!("{}:{}", cfg.http.host, cfg.http.port)
        .parse()
        .context("Invalid HTTP listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    machine.lock().stop_polling();
    save_on_shutdown(&machine, &cfg);
    Ok(())
}
