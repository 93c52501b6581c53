use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable},
    Channel,
};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::connection::RabbitConnection;
use crate::options::{dlq_queue, RabbitMqOptions};
use subshop_messaging_core::{
    process_delivery, ConsumerHandle, ConsumerSpec, ConsumerState, Disposition, MessageHandler,
    MessagingError, PooledChannel, Shutdown,
};

const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

fn subscribe_err(e: lapin::Error) -> MessagingError {
    MessagingError::Subscribe(e.to_string())
}

struct ActiveRun {
    id: u64,
    generation: u64,
    stop: Shutdown,
    task: JoinHandle<()>,
}

impl ActiveRun {
    /// Still consuming on the connection of `generation`.
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && !self.task.is_finished()
    }
}

/// What `start` should do, decided under the slot lock.
enum StartPlan {
    /// Already starting, or running on the current connection.
    Skip,
    /// Open a new run; the previous one (if any) has to be stopped.
    Open(Option<ActiveRun>),
}

struct Slot {
    state: ConsumerState,
    active: Option<ActiveRun>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: ConsumerState::Stopped,
            active: None,
        }
    }

    fn plan_start(&mut self, generation: u64) -> StartPlan {
        match self.state {
            ConsumerState::Starting => return StartPlan::Skip,
            ConsumerState::Running
                if self.active.as_ref().is_some_and(|r| r.is_live(generation)) =>
            {
                return StartPlan::Skip
            }
            _ => {}
        }
        self.state = ConsumerState::Starting;
        StartPlan::Open(self.active.take())
    }

    /// Installs a freshly opened run. Returns it back when `stop` won the race
    /// while the run was being opened; the caller must stop it.
    fn started(&mut self, run: ActiveRun) -> Option<ActiveRun> {
        if self.state == ConsumerState::Starting {
            self.state = ConsumerState::Running;
            self.active = Some(run);
            None
        } else {
            self.state = ConsumerState::Stopped;
            Some(run)
        }
    }

    fn start_failed(&mut self) {
        self.state = ConsumerState::Stopped;
    }

    /// `None` when there is nothing to stop.
    fn plan_stop(&mut self) -> Option<Option<ActiveRun>> {
        if self.state == ConsumerState::Stopped && self.active.is_none() {
            return None;
        }
        self.state = ConsumerState::Stopping;
        Some(self.active.take())
    }

    /// Called by a receive loop on exit. Runs that were already replaced are ignored.
    fn finish(&mut self, run_id: u64) {
        if self.active.as_ref().map(|r| r.id) == Some(run_id) {
            self.active = None;
            if self.state == ConsumerState::Running {
                self.state = ConsumerState::Stopped;
            }
        }
    }
}

struct ConsumerInner<H> {
    connection: Arc<RabbitConnection>,
    spec: ConsumerSpec,
    handler: Arc<H>,
    slot: Mutex<Slot>,
    runs: AtomicU64,
}

/// Long-lived queue consumer with manual acknowledgement.
///
/// Each successful `start` owns one pooled channel until the run ends. A run
/// ends on `stop`, or when the broker closes the channel; in the second case
/// the reconnect supervisor calls `start` again through the registry.
pub struct RabbitConsumer<H: MessageHandler> {
    inner: Arc<ConsumerInner<H>>,
}

impl<H: MessageHandler> Clone for RabbitConsumer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: MessageHandler> RabbitConsumer<H> {
    pub fn new(connection: Arc<RabbitConnection>, spec: ConsumerSpec, handler: Arc<H>) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                connection,
                spec,
                handler,
                slot: Mutex::new(Slot::new()),
                runs: AtomicU64::new(0),
            }),
        }
    }

    pub fn spec(&self) -> &ConsumerSpec {
        &self.inner.spec
    }

    pub fn state(&self) -> ConsumerState {
        self.slot().state
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn open(&self) -> Result<ActiveRun, MessagingError> {
        let spec = &self.inner.spec;
        let opts = self.inner.connection.options();

        let channel = self.inner.connection.borrow_channel().await?;
        declare_topology(&channel, opts, spec).await?;

        let tag = format!("{}-{}", opts.service, spec.queue);
        let deliveries = channel
            .basic_consume(
                &spec.queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                    no_local: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_err)?;

        let id = self.inner.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let stop = Shutdown::new();
        let generation = channel.generation();
        let task = tokio::spawn(self.clone().receive_loop(id, channel, deliveries, stop.clone()));

        info!(queue = %spec.queue, exchange = %opts.exchange, bindings = ?spec.bindings, "consuming");
        Ok(ActiveRun {
            id,
            generation,
            stop,
            task,
        })
    }

    async fn receive_loop(
        self,
        run_id: u64,
        channel: PooledChannel<RabbitConnection>,
        mut deliveries: lapin::Consumer,
        stop: Shutdown,
    ) {
        let queue = self.inner.spec.queue.clone();
        let tag = deliveries.tag().to_string();

        loop {
            tokio::select! {
                _ = stop.wait() => {
                    let cancel = channel.basic_cancel(&tag, BasicCancelOptions::default());
                    match tokio::time::timeout(CANCEL_TIMEOUT, cancel).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(%queue, error = %e, "basic_cancel failed"),
                        Err(_) => warn!(%queue, "basic_cancel timed out"),
                    }
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.dispatch(delivery).await,
                    Some(Err(e)) => {
                        warn!(%queue, error = %e, "delivery stream failed, waiting for reconnect");
                        break;
                    }
                    None => {
                        warn!(%queue, "consumer channel closed, waiting for reconnect");
                        break;
                    }
                },
            }
        }

        // a prefetched delivery may still be unacked on this channel; closing it
        // makes the broker requeue it, and a consumer channel never serves publishes
        drop(deliveries);
        channel.invalidate();
        self.slot().finish(run_id);
        info!(%queue, "consumer loop exited");
    }

    #[instrument(
        skip_all,
        fields(
            queue = %self.inner.spec.queue,
            routing_key = delivery.routing_key.as_str(),
            redelivered = delivery.redelivered
        )
    )]
    async fn dispatch(&self, delivery: Delivery) {
        let handler = self.inner.handler.as_ref();
        let routing_key = delivery.routing_key.as_str();
        let disposition = process_delivery(handler, routing_key, &delivery.data).await;

        let settled = match disposition {
            Disposition::Ack => delivery.acker.ack(BasicAckOptions { multiple: false }).await,
            Disposition::Requeue => {
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    })
                    .await
            }
            Disposition::Reject => {
                delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
        };
        if let Err(e) = settled {
            error!(error = %e, ?disposition, "failed to settle delivery");
        }
    }
}

#[async_trait]
impl<H: MessageHandler> ConsumerHandle for RabbitConsumer<H> {
    async fn start(&self) -> Result<(), MessagingError> {
        let generation = self.inner.connection.generation();
        let stale = match self.slot().plan_start(generation) {
            StartPlan::Skip => return Ok(()),
            StartPlan::Open(stale) => stale,
        };
        if let Some(old) = stale {
            old.stop.trigger();
        }

        self.inner
            .connection
            .register_consumer(&self.inner.spec.name, Arc::new(self.clone()));

        let result = self.open().await;
        let mut slot = self.slot();
        match result {
            Ok(run) => {
                if let Some(run) = slot.started(run) {
                    // stopped while starting
                    run.stop.trigger();
                }
                Ok(())
            }
            Err(e) => {
                slot.start_failed();
                error!(consumer = %self.inner.spec.name, error = %e, "consumer start failed");
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<(), MessagingError> {
        self.inner.connection.registry().unregister(&self.inner.spec.name);
        let Some(active) = self.slot().plan_stop() else {
            return Ok(());
        };

        if let Some(run) = active {
            run.stop.trigger();
            if let Err(e) = run.task.await {
                warn!(consumer = %self.inner.spec.name, error = %e, "consumer task ended abnormally");
            }
        }

        self.slot().state = ConsumerState::Stopped;
        info!(consumer = %self.inner.spec.name, "consumer stopped");
        Ok(())
    }
}

fn queue_options(opts: &RabbitMqOptions) -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: opts.durable,
        auto_delete: false,
        exclusive: false,
        nowait: false,
        passive: false,
    }
}

/// Durable queue, optional dead-letter queue, and one binding per pattern.
async fn declare_topology(
    ch: &Channel,
    opts: &RabbitMqOptions,
    spec: &ConsumerSpec,
) -> Result<(), MessagingError> {
    let mut args = FieldTable::default();
    if opts.dead_letter {
        let dlq = dlq_queue(&spec.queue);
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(opts.exchange.clone().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dlq.clone().into()),
        );

        ch.queue_declare(&dlq, queue_options(opts), FieldTable::default())
            .await
            .map_err(subscribe_err)?;
        ch.queue_bind(
            &dlq,
            &opts.exchange,
            &dlq,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(subscribe_err)?;
    }

    ch.queue_declare(&spec.queue, queue_options(opts), args)
        .await
        .map_err(subscribe_err)?;

    for rk in &spec.bindings {
        ch.queue_bind(
            &spec.queue,
            &opts.exchange,
            rk,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(subscribe_err)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_run(id: u64, generation: u64) -> ActiveRun {
        ActiveRun {
            id,
            generation,
            stop: Shutdown::new(),
            task: tokio::spawn(std::future::pending::<()>()),
        }
    }

    async fn finished_run(id: u64, generation: u64) -> ActiveRun {
        let task = tokio::spawn(async {});
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
        ActiveRun {
            id,
            generation,
            stop: Shutdown::new(),
            task,
        }
    }

    fn running(run: ActiveRun) -> Slot {
        let mut slot = Slot::new();
        assert!(matches!(slot.plan_start(run.generation), StartPlan::Open(None)));
        assert!(slot.started(run).is_none());
        slot
    }

    #[tokio::test]
    async fn start_is_skipped_while_live_or_starting() {
        let mut slot = running(pending_run(1, 3));
        assert_eq!(slot.state, ConsumerState::Running);
        assert!(matches!(slot.plan_start(3), StartPlan::Skip));

        let mut starting = Slot::new();
        assert!(matches!(starting.plan_start(3), StartPlan::Open(None)));
        assert!(matches!(starting.plan_start(3), StartPlan::Skip));
    }

    #[tokio::test]
    async fn run_from_an_older_connection_is_replaced() {
        let mut slot = running(pending_run(1, 3));

        match slot.plan_start(4) {
            StartPlan::Open(Some(stale)) => assert_eq!(stale.id, 1),
            _ => panic!("stale run should be handed back for stopping"),
        }
        assert_eq!(slot.state, ConsumerState::Starting);
        assert!(slot.started(pending_run(2, 4)).is_none());
        assert_eq!(slot.active.as_ref().map(|r| r.id), Some(2));
    }

    #[tokio::test]
    async fn dead_run_is_replaced_on_the_same_connection() {
        let mut slot = running(finished_run(1, 3).await);
        assert!(matches!(slot.plan_start(3), StartPlan::Open(Some(_))));
    }

    #[tokio::test]
    async fn stop_during_start_hands_the_new_run_back() {
        let mut slot = Slot::new();
        assert!(matches!(slot.plan_start(1), StartPlan::Open(None)));

        assert!(matches!(slot.plan_stop(), Some(None)));
        assert_eq!(slot.state, ConsumerState::Stopping);

        let orphan = slot.started(pending_run(1, 1)).expect("run must be returned");
        assert_eq!(orphan.id, 1);
        assert_eq!(slot.state, ConsumerState::Stopped);
        assert!(slot.active.is_none());
        assert!(slot.plan_stop().is_none());
    }

    #[tokio::test]
    async fn failed_start_can_be_retried() {
        let mut slot = Slot::new();
        assert!(matches!(slot.plan_start(1), StartPlan::Open(None)));
        slot.start_failed();
        assert_eq!(slot.state, ConsumerState::Stopped);
        assert!(matches!(slot.plan_start(2), StartPlan::Open(None)));
    }

    #[tokio::test]
    async fn only_the_current_run_clears_the_slot() {
        let mut slot = running(pending_run(2, 1));

        slot.finish(1);
        assert_eq!(slot.state, ConsumerState::Running);
        assert!(slot.active.is_some());

        slot.finish(2);
        assert_eq!(slot.state, ConsumerState::Stopped);
        assert!(slot.active.is_none());
    }

    #[tokio::test]
    async fn lost_connection_leaves_a_restartable_slot() {
        let mut slot = running(pending_run(1, 1));

        // receive loop exits after the broker closed the channel
        slot.finish(1);
        match slot.plan_start(2) {
            StartPlan::Open(None) => {}
            _ => panic!("expected a fresh start"),
        }
        assert!(slot.started(pending_run(2, 2)).is_none());
        assert_eq!(slot.state, ConsumerState::Running);
    }
}
