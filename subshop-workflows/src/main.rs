use anyhow::Context;
use subshop_messaging_rabbitmq::{RabbitEventBus, RabbitMqOptions};
use subshop_workflows::{start_consumers, telemetry, Collaborators};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let opts = RabbitMqOptions::from_env();
    info!(exchange = %opts.exchange, service = %opts.service, "starting subshop worker");

    let bus = RabbitEventBus::connect(opts)
        .await
        .context("connecting to RabbitMQ")?;

    // in-memory collaborators; the API process injects the Postgres-backed ones
    let deps = Collaborators::in_memory();
    let consumers = start_consumers(&bus, &deps)
        .await
        .context("starting consumers")?;
    info!(consumers = consumers.len(), "worker running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    info!("shutting down");
    bus.close().await.context("closing RabbitMQ connection")?;
    Ok(())
}
