//! Run lifecycle state machine
//!
//! Routes instrument events to the run store and to every registered sink.
//! Events are handled one at a time; within one event the store and all sinks
//! run concurrently and the dispatcher waits for every one of them before
//! taking the next event.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xps_models::{Frame, RunEvent, RunSink, RunStart, RunStop};
use xps_store::{EntityState, IncrementalStore, RunHandle};

/// Everything known about the run in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub scan_name: String,
    /// `None` when the store was unavailable at start
    pub run: Option<RunHandle>,
    pub entities: EntityState,
    /// Results received so far in this run
    pub frames_seen: u64,
}

impl RunContext {
    fn new(scan_name: String, run: Option<RunHandle>) -> Self {
        Self {
            scan_name,
            run,
            entities: EntityState::Uninitialized,
            frames_seen: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DispatcherState {
    #[default]
    Idle,
    Active(RunContext),
}

/// Single-task event dispatcher
pub struct RunDispatcher {
    store: Option<IncrementalStore>,
    sinks: Vec<Arc<dyn RunSink>>,
    state: DispatcherState,
}

impl RunDispatcher {
    /// Create a dispatcher. Without a store, events only reach the sinks.
    pub fn new(store: Option<IncrementalStore>) -> Self {
        Self {
            store,
            sinks: Vec::new(),
            state: DispatcherState::Idle,
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn RunSink>) {
        info!("Registered sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn state(&self) -> &DispatcherState {
        &self.state
    }

    pub fn run_context(&self) -> Option<&RunContext> {
        match &self.state {
            DispatcherState::Idle => None,
            DispatcherState::Active(ctx) => Some(ctx),
        }
    }

    /// Handle events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<RunEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("Event channel closed, dispatcher exiting");
    }

    /// Handle one event. Never fails: every error is logged.
    pub async fn dispatch(&mut self, event: RunEvent) {
        debug!("Dispatching {} event", event.kind());
        match event {
            RunEvent::Start(start) => self.handle_start(start).await,
            RunEvent::Result(frame) => self.handle_result(frame).await,
            RunEvent::Stop(stop) => self.handle_stop(stop).await,
        }
    }

    async fn handle_start(&mut self, start: RunStart) {
        if let DispatcherState::Active(ctx) = &self.state {
            warn!(
                "Start of '{}' while '{}' is still running, stopping it first",
                start.scan_name, ctx.scan_name
            );
            self.state = DispatcherState::Idle;
            self.notify_stop(&RunStop::default()).await;
        }

        let run = match &self.store {
            Some(store) => {
                let scan_name = start.scan_name.clone();
                match store.run_blocking(move |s| s.on_start(&scan_name)).await {
                    Ok(run) => Some(run),
                    Err(e) => {
                        error!("Run '{}' continues without storage: {}", start.scan_name, e);
                        None
                    }
                }
            }
            None => None,
        };

        self.state = DispatcherState::Active(RunContext::new(start.scan_name.clone(), run));
        info!("Run '{}' started", start.scan_name);

        let results = join_all(self.sinks.iter().map(|sink| sink.on_start(&start))).await;
        self.log_sink_failures("start", results);
    }

    async fn handle_result(&mut self, frame: Frame) {
        let DispatcherState::Active(ctx) = &mut self.state else {
            warn!(
                "Result for frame {} outside a run, ignoring",
                frame.frame_number
            );
            return;
        };

        let frame = Arc::new(frame);
        let first = ctx.frames_seen == 0;
        ctx.frames_seen += 1;

        if let (Some(store), Some(run), false) =
            (&self.store, &ctx.run, ctx.entities.is_initialized())
        {
            let run = run.clone();
            let shapes = Arc::clone(&frame);
            match store
                .run_blocking(move |s| s.ensure_entities(&run, &shapes))
                .await
            {
                Ok(set) => ctx.entities = EntityState::Initialized(set),
                Err(e) => error!("Failed to create entities for '{}': {}", ctx.scan_name, e),
            }
        }

        // The first frame only fixes entity shapes
        if first {
            debug!(
                "Frame {} of '{}' used for entity shapes",
                frame.frame_number, ctx.scan_name
            );
            return;
        }

        let store = self.store.as_ref().filter(|_| ctx.entities.is_initialized());
        let scan_name = ctx.scan_name.clone();
        let entities = ctx.entities.clone();
        let data = Arc::clone(&frame);
        let append = async move {
            match store {
                Some(store) => Some(
                    store
                        .run_blocking(move |s| s.append_frame(&scan_name, &entities, &data))
                        .await,
                ),
                None => None,
            }
        };
        let deliver = join_all(self.sinks.iter().map(|sink| sink.on_frame(Arc::clone(&frame))));

        let (appended, results) = tokio::join!(append, deliver);

        match appended {
            Some(Ok(report)) => debug!(
                "Frame {} stored at offset {} ({} peaks)",
                frame.frame_number, report.offset, report.peak_rows
            ),
            Some(Err(e)) => error!("Failed to store frame {}: {}", frame.frame_number, e),
            None => {}
        }
        self.log_sink_failures("frame", results);
    }

    async fn handle_stop(&mut self, stop: RunStop) {
        let DispatcherState::Active(ctx) = std::mem::take(&mut self.state) else {
            warn!("Stop outside a run, ignoring");
            return;
        };

        if let (Some(store), Some(run), Some(timings)) =
            (&self.store, ctx.run, stop.function_timings.clone())
        {
            if let Err(e) = store
                .run_blocking(move |s| s.finalize(&run, &timings))
                .await
            {
                error!("Failed to store timings for '{}': {}", ctx.scan_name, e);
            }
        }

        self.notify_stop(&stop).await;
        info!(
            "Run '{}' stopped after {} frames",
            ctx.scan_name, ctx.frames_seen
        );
    }

    async fn notify_stop(&self, stop: &RunStop) {
        let results = join_all(self.sinks.iter().map(|sink| sink.on_stop(stop))).await;
        self.log_sink_failures("stop", results);
    }

    fn log_sink_failures(&self, hook: &str, results: Vec<anyhow::Result<()>>) {
        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                error!("Sink '{}' failed on {}: {:#}", sink.name(), hook, e);
            }
        }
    }
}
