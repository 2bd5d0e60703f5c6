use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use xps_broadcaster::{BroadcasterConfig, FrameBroadcaster};
use xps_codec::{unpack_frame_message, HeaderMessage};
use xps_daemon::{DispatcherState, RunDispatcher};
use xps_models::{
    Frame, FrameImages, PeakRow, RunEvent, RunSink, RunStart, RunStop, Sample2D, Table,
};
use xps_store::{
    BackendError, EntityHandle, EntitySchema, IncrementalStore, MemoryBackend, RunHandle,
    StoreBackend, TIMINGS_TABLE,
};

/// Records every hook call as a short string.
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            anyhow::bail!("sink failure");
        }
        Ok(())
    }
}

#[async_trait]
impl RunSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_start(&self, start: &RunStart) -> anyhow::Result<()> {
        self.record(format!("start:{}", start.scan_name))
    }

    async fn on_frame(&self, frame: Arc<Frame>) -> anyhow::Result<()> {
        self.record(format!("frame:{}", frame.frame_number))
    }

    async fn on_stop(&self, stop: &RunStop) -> anyhow::Result<()> {
        self.record(format!("stop:{}", stop.function_timings.is_some()))
    }
}

/// Memory backend whose array patches always fail.
struct BrokenPatches(MemoryBackend);

impl StoreBackend for BrokenPatches {
    fn create_or_get(&self, name: &str) -> Result<RunHandle, BackendError> {
        self.0.create_or_get(name)
    }

    fn write_initial(
        &self,
        parent: &RunHandle,
        name: &str,
        schema: &EntitySchema,
    ) -> Result<EntityHandle, BackendError> {
        self.0.write_initial(parent, name, schema)
    }

    fn array_len(&self, handle: &EntityHandle) -> Result<u64, BackendError> {
        self.0.array_len(handle)
    }

    fn patch_at_offset(
        &self,
        _handle: &EntityHandle,
        _data: &Sample2D,
        _offset: u64,
        _extend: bool,
    ) -> Result<(), BackendError> {
        Err(BackendError::other("disk full"))
    }

    fn append_partition(
        &self,
        handle: &EntityHandle,
        rows: &Table,
        partition_index: usize,
    ) -> Result<(), BackendError> {
        self.0.append_partition(handle, rows, partition_index)
    }

    fn read_slice(&self, handle: &EntityHandle, index: u64) -> Result<Vec<f64>, BackendError> {
        self.0.read_slice(handle, index)
    }

    fn read_table(&self, handle: &EntityHandle) -> Result<Table, BackendError> {
        self.0.read_table(handle)
    }
}

fn frame(frame_number: u64) -> Frame {
    Frame {
        frame_number,
        shot_num: 100 + frame_number as i64,
        images: FrameImages::uniform(Sample2D::from_fn(5, 4, |x, y| {
            (frame_number as usize * 7 + x * 4 + y) as f64
        })),
        detected_peaks: vec![PeakRow {
            x: 12.0,
            h: 3.0,
            fwhm: 1.0,
        }],
    }
}

fn start(scan: &str) -> RunEvent {
    RunEvent::Start(RunStart {
        scan_name: scan.to_string(),
    })
}

fn stop() -> RunEvent {
    RunEvent::Stop(RunStop::default())
}

fn timings() -> Table {
    let mut table = Table::new(vec!["function".into(), "seconds".into()]);
    table.push_row(vec!["integrate".into(), 0.02.into()]).unwrap();
    table
}

fn dispatcher() -> (Arc<MemoryBackend>, Arc<RecordingSink>, RunDispatcher) {
    let backend = Arc::new(MemoryBackend::new());
    let sink = Arc::new(RecordingSink::default());
    let mut dispatcher = RunDispatcher::new(Some(IncrementalStore::new(backend.clone())));
    dispatcher.add_sink(sink.clone());
    (backend, sink, dispatcher)
}

#[tokio::test]
async fn test_result_while_idle_is_ignored() {
    let (backend, sink, mut dispatcher) = dispatcher();

    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    dispatcher.dispatch(RunEvent::Result(frame(1))).await;
    dispatcher.dispatch(stop()).await;

    assert_eq!(dispatcher.state(), &DispatcherState::Idle);
    assert_eq!(backend.write_count(), 0);
    assert!(backend.run_names().is_empty());
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_first_frame_only_creates_entities() {
    let (backend, sink, mut dispatcher) = dispatcher();

    dispatcher.dispatch(start("scan-1")).await;
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;

    let ctx = dispatcher.run_context().unwrap();
    assert_eq!(ctx.frames_seen, 1);
    let entities = ctx.entities.entities().unwrap();
    for handle in entities.arrays() {
        assert_eq!(backend.array_len(handle).unwrap(), 0);
    }
    assert_eq!(sink.calls(), vec!["start:scan-1"]);

    dispatcher.dispatch(RunEvent::Result(frame(1))).await;
    let ctx = dispatcher.run_context().unwrap();
    let entities = ctx.entities.entities().unwrap();
    for handle in entities.arrays() {
        assert_eq!(backend.array_len(handle).unwrap(), 1);
    }
    let stored = backend
        .read_slice(entities.array("shot_mean").unwrap(), 0)
        .unwrap();
    assert_eq!(stored[0], 7.0);
    assert_eq!(sink.calls(), vec!["start:scan-1", "frame:1"]);
}

#[tokio::test]
async fn test_offsets_track_frames_across_run() {
    let (backend, sink, mut dispatcher) = dispatcher();

    dispatcher.dispatch(start("scan-1")).await;
    for n in 0..=5 {
        dispatcher.dispatch(RunEvent::Result(frame(n))).await;
    }
    let entities = dispatcher
        .run_context()
        .unwrap()
        .entities
        .entities()
        .unwrap()
        .clone();

    dispatcher
        .dispatch(RunEvent::Stop(RunStop {
            function_timings: Some(timings()),
        }))
        .await;

    assert_eq!(dispatcher.state(), &DispatcherState::Idle);
    for handle in entities.arrays() {
        assert_eq!(backend.array_len(handle).unwrap(), 5);
    }
    for slice in 0..5u64 {
        let data = backend
            .read_slice(entities.array("vfft").unwrap(), slice)
            .unwrap();
        assert_eq!(data[0], ((slice + 1) * 7) as f64);
    }
    assert_eq!(backend.read_table(entities.peaks()).unwrap().len(), 5);

    let timings_handle = EntityHandle::new("scan-1", TIMINGS_TABLE, xps_store::EntityKind::Table);
    assert_eq!(backend.read_table(&timings_handle).unwrap(), timings());
    assert_eq!(sink.calls().last().unwrap(), "stop:true");
}

#[tokio::test]
async fn test_start_while_active_stops_previous_run() {
    let (backend, sink, mut dispatcher) = dispatcher();

    dispatcher.dispatch(start("scan-1")).await;
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    dispatcher.dispatch(start("scan-2")).await;

    let ctx = dispatcher.run_context().unwrap();
    assert_eq!(ctx.scan_name, "scan-2");
    assert!(!ctx.entities.is_initialized());
    assert_eq!(sink.calls(), vec!["start:scan-1", "stop:false", "start:scan-2"]);
    assert!(!backend
        .entity_names("scan-1")
        .contains(&TIMINGS_TABLE.to_string()));

    // The new run warms up again
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    assert_eq!(sink.calls().len(), 3);
    assert!(dispatcher
        .run_context()
        .unwrap()
        .entities
        .is_initialized());
}

#[tokio::test]
async fn test_repeated_scan_name_keeps_first_run_slices() {
    let (backend, sink, mut dispatcher) = dispatcher();

    dispatcher.dispatch(start("scan-1")).await;
    for n in 0..=3 {
        dispatcher.dispatch(RunEvent::Result(frame(n))).await;
    }
    dispatcher.dispatch(stop()).await;

    dispatcher.dispatch(start("scan-1")).await;
    for n in 0..=2 {
        dispatcher.dispatch(RunEvent::Result(frame(n))).await;
    }

    // Old entities are never reused, so nothing lands past slice 2
    let ctx = dispatcher.run_context().unwrap();
    assert!(!ctx.entities.is_initialized());
    let shot_mean = EntityHandle::new("scan-1", "shot_mean", xps_store::EntityKind::Array);
    assert_eq!(backend.array_len(&shot_mean).unwrap(), 3);

    // Viewers still get the second run's frames
    assert_eq!(
        sink.calls()[5..].to_vec(),
        vec!["start:scan-1", "frame:1", "frame:2"]
    );
}

#[tokio::test]
async fn test_store_failure_does_not_stop_sinks() {
    let backend = Arc::new(BrokenPatches(MemoryBackend::new()));
    let sink = Arc::new(RecordingSink::default());
    let mut dispatcher = RunDispatcher::new(Some(IncrementalStore::new(backend.clone())));
    dispatcher.add_sink(sink.clone());

    dispatcher.dispatch(start("scan-1")).await;
    for n in 0..3 {
        dispatcher.dispatch(RunEvent::Result(frame(n))).await;
    }

    assert_eq!(
        sink.calls(),
        vec!["start:scan-1", "frame:1", "frame:2"]
    );
    // Peak rows still land even though every array patch failed
    let peaks = dispatcher
        .run_context()
        .unwrap()
        .entities
        .entities()
        .unwrap()
        .peaks()
        .clone();
    assert_eq!(backend.read_table(&peaks).unwrap().len(), 2);
}

#[tokio::test]
async fn test_failing_sink_isolated() {
    let (backend, healthy, mut dispatcher) = dispatcher();
    let failing = Arc::new(RecordingSink::failing());
    dispatcher.add_sink(failing.clone());

    dispatcher.dispatch(start("scan-1")).await;
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    dispatcher.dispatch(RunEvent::Result(frame(1))).await;
    dispatcher.dispatch(stop()).await;

    let expected = vec!["start:scan-1", "frame:1", "stop:false"];
    assert_eq!(healthy.calls(), expected);
    assert_eq!(failing.calls(), expected);
    assert_eq!(backend.run_names(), vec!["scan-1"]);
}

#[tokio::test]
async fn test_without_store() {
    let sink = Arc::new(RecordingSink::default());
    let mut dispatcher = RunDispatcher::new(None);
    dispatcher.add_sink(sink.clone());

    dispatcher.dispatch(start("scan-1")).await;
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    dispatcher.dispatch(RunEvent::Result(frame(1))).await;

    let ctx = dispatcher.run_context().unwrap();
    assert!(ctx.run.is_none());
    assert_eq!(sink.calls(), vec!["start:scan-1", "frame:1"]);
}

#[tokio::test]
async fn test_run_consumes_channel_in_order() {
    let (backend, sink, dispatcher) = dispatcher();
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(dispatcher.run(rx));

    tx.send(start("scan-9")).await.unwrap();
    tx.send(RunEvent::Result(frame(0))).await.unwrap();
    tx.send(RunEvent::Result(frame(1))).await.unwrap();
    tx.send(stop()).await.unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sink.calls(), vec!["start:scan-9", "frame:1", "stop:false"]);
    assert_eq!(backend.run_names(), vec!["scan-9"]);
}

/// Full path: dispatcher, memory store and two live viewers.
#[tokio::test]
async fn test_scan_with_two_viewers() {
    let backend = Arc::new(MemoryBackend::new());
    let broadcaster = Arc::new(
        FrameBroadcaster::new(BroadcasterConfig {
            url: "ws://127.0.0.1:0/xps_operator".to_string(),
            ..Default::default()
        })
        .unwrap(),
    );
    broadcaster.start().await.unwrap();
    let url = format!(
        "ws://{}/xps_operator",
        broadcaster.local_addr().await.unwrap()
    );

    let mut viewers = Vec::new();
    for _ in 0..2 {
        let (ws, _) = connect_async(&url).await.unwrap();
        viewers.push(ws);
    }
    tokio::time::timeout(Duration::from_secs(2), async {
        while broadcaster.viewer_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut dispatcher = RunDispatcher::new(Some(IncrementalStore::new(backend.clone())));
    dispatcher.add_sink(broadcaster.clone());

    dispatcher.dispatch(start("scan-1")).await;
    dispatcher.dispatch(RunEvent::Result(frame(0))).await;
    let entities = dispatcher
        .run_context()
        .unwrap()
        .entities
        .entities()
        .unwrap()
        .clone();
    assert_eq!(entities.arrays().len(), 6);

    dispatcher.dispatch(RunEvent::Result(frame(1))).await;
    dispatcher.dispatch(stop()).await;

    for handle in entities.arrays() {
        assert_eq!(backend.array_len(handle).unwrap(), 1);
    }

    for ws in viewers.iter_mut() {
        let mut received = Vec::new();
        while let Ok(Some(Ok(message))) =
            tokio::time::timeout(Duration::from_millis(300), ws.next()).await
        {
            received.push(message);
        }

        // Start header, then header + payload for frame 1 only
        assert_eq!(received.len(), 3);
        match &received[0] {
            Message::Text(text) => assert!(matches!(
                HeaderMessage::parse(text).unwrap(),
                HeaderMessage::Start(_)
            )),
            other => panic!("expected start header, got {:?}", other),
        }
        match &received[1] {
            Message::Text(text) => match HeaderMessage::parse(text).unwrap() {
                HeaderMessage::Frame(header) => assert_eq!(header.frame_number, 1),
                other => panic!("expected frame header, got {:?}", other),
            },
            other => panic!("expected frame header, got {:?}", other),
        }
        match &received[2] {
            Message::Binary(bytes) => {
                let message = unpack_frame_message(bytes).unwrap();
                assert_eq!((message.width, message.height), (5, 4));
            }
            other => panic!("expected payload, got {:?}", other),
        }
    }

    broadcaster.stop().await.unwrap();
}
