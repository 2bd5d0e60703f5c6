//! Run-level store operations on top of a [`StoreBackend`]

use std::sync::Arc;

use tracing::{debug, info, warn};
use xps_models::{Frame, Table};

use crate::backend::{EntityHandle, EntitySchema, RunHandle, StoreBackend};
use crate::error::{BackendError, Result, StoreError};

/// Table receiving detected peaks, one partition append per frame.
pub const PEAKS_TABLE: &str = "detected_peaks";

/// One-shot table written when a run stops.
pub const TIMINGS_TABLE: &str = "function_timings";

/// Peak rows always go to the single growing partition.
const PEAKS_PARTITION: usize = 0;

/// Handles created from a run's first frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySet {
    run: RunHandle,
    arrays: Vec<EntityHandle>,
    peaks: EntityHandle,
}

impl EntitySet {
    pub fn run(&self) -> &RunHandle {
        &self.run
    }

    pub fn arrays(&self) -> &[EntityHandle] {
        &self.arrays
    }

    pub fn array(&self, name: &str) -> Option<&EntityHandle> {
        self.arrays.iter().find(|h| h.name() == name)
    }

    pub fn peaks(&self) -> &EntityHandle {
        &self.peaks
    }
}

/// Entity lifecycle within one run. Shapes are only known once real data
/// arrives, so entities move from `Uninitialized` to `Initialized` exactly
/// once, on the first frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EntityState {
    #[default]
    Uninitialized,
    Initialized(EntitySet),
}

impl EntityState {
    pub fn entities(&self) -> Option<&EntitySet> {
        match self {
            EntityState::Uninitialized => None,
            EntityState::Initialized(set) => Some(set),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, EntityState::Initialized(_))
    }
}

/// What one `append_frame` call wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    /// Offset the array slices were written at
    pub offset: u64,
    pub arrays: usize,
    pub peak_rows: usize,
}

/// Per-run array/table store.
///
/// All methods block on the backend; use [`IncrementalStore::run_blocking`]
/// from async code.
#[derive(Clone)]
pub struct IncrementalStore {
    backend: Arc<dyn StoreBackend>,
}

impl IncrementalStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Run `f` on the blocking thread pool with a clone of this store.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&IncrementalStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Create the run node for `scan_name`, or reuse an existing one.
    pub fn on_start(&self, scan_name: &str) -> Result<RunHandle> {
        let run = self
            .backend
            .create_or_get(scan_name)
            .map_err(|e| StoreError::backend(scan_name, "runs", None, e))?;
        info!(run = scan_name, "Run node ready");
        Ok(run)
    }

    /// Create one array per image and the peaks table, shaped after
    /// `first_frame`.
    ///
    /// Entities left behind by an earlier run of the same name are rejected
    /// with [`BackendError::NotEmpty`]: slice `n` of a run must be its `n`th
    /// appended frame.
    pub fn ensure_entities(&self, run: &RunHandle, first_frame: &Frame) -> Result<EntitySet> {
        let mut arrays = Vec::new();
        for (name, sample) in first_frame.images.named() {
            let schema = EntitySchema::Array {
                slice_shape: sample.shape().to_vec(),
            };
            let handle = self
                .backend
                .write_initial(run, name, &schema)
                .map_err(|e| StoreError::backend(run.name(), name, None, e))?;
            let length = self
                .backend
                .array_len(&handle)
                .map_err(|e| StoreError::backend(run.name(), name, None, e))?;
            if length > 0 {
                return Err(StoreError::backend(
                    run.name(),
                    name,
                    Some(length),
                    BackendError::NotEmpty {
                        name: name.to_string(),
                        length,
                    },
                ));
            }
            arrays.push(handle);
        }

        let schema = EntitySchema::Table {
            columns: first_frame.peaks_table().columns,
        };
        let peaks = self
            .backend
            .write_initial(run, PEAKS_TABLE, &schema)
            .map_err(|e| StoreError::backend(run.name(), PEAKS_TABLE, None, e))?;
        let rows = self
            .backend
            .read_table(&peaks)
            .map_err(|e| StoreError::backend(run.name(), PEAKS_TABLE, None, e))?
            .len() as u64;
        if rows > 0 {
            return Err(StoreError::backend(
                run.name(),
                PEAKS_TABLE,
                None,
                BackendError::NotEmpty {
                    name: PEAKS_TABLE.to_string(),
                    length: rows,
                },
            ));
        }

        info!(
            run = run.name(),
            arrays = arrays.len(),
            shape = ?first_frame.images.shot_mean.shape(),
            "Created run entities"
        );

        Ok(EntitySet {
            run: run.clone(),
            arrays,
            peaks,
        })
    }

    /// Append one slice per array at its current length, and the frame's
    /// peaks as one partition.
    ///
    /// Every entity is attempted even if an earlier one fails; the first
    /// failure is returned and the rest are logged.
    pub fn append_frame(
        &self,
        scan_name: &str,
        state: &EntityState,
        frame: &Frame,
    ) -> Result<AppendReport> {
        let Some(entities) = state.entities() else {
            return Err(StoreError::Precondition {
                run: scan_name.to_string(),
                frame_number: frame.frame_number,
            });
        };
        let run = entities.run().name();

        let mut failures = Vec::new();
        let mut offset = None;
        let mut written = 0;

        for (name, sample) in frame.images.named() {
            let Some(handle) = entities.array(name) else {
                failures.push(StoreError::backend(
                    run,
                    name,
                    None,
                    BackendError::EntityNotFound(name.to_string()),
                ));
                continue;
            };

            let length = match self.backend.array_len(handle) {
                Ok(length) => length,
                Err(e) => {
                    failures.push(StoreError::backend(run, name, None, e));
                    continue;
                }
            };

            match self.backend.patch_at_offset(handle, sample, length, true) {
                Ok(()) => {
                    offset.get_or_insert(length);
                    written += 1;
                }
                Err(e) => failures.push(StoreError::backend(run, name, Some(length), e)),
            }
        }

        let peaks = frame.peaks_table();
        if let Err(e) = self
            .backend
            .append_partition(entities.peaks(), &peaks, PEAKS_PARTITION)
        {
            failures.push(StoreError::backend(run, PEAKS_TABLE, None, e));
        }

        let mut failures = failures.into_iter();
        if let Some(first) = failures.next() {
            for other in failures {
                warn!(error = %other, "Additional store failure");
            }
            return Err(first);
        }

        debug!(
            run,
            frame = frame.frame_number,
            offset = ?offset,
            "Appended frame"
        );

        Ok(AppendReport {
            offset: offset.unwrap_or_default(),
            arrays: written,
            peak_rows: peaks.len(),
        })
    }

    /// Write the run's timing summary as a one-shot table.
    pub fn finalize(&self, run: &RunHandle, function_timings: &Table) -> Result<EntityHandle> {
        let schema = EntitySchema::Table {
            columns: function_timings.columns.clone(),
        };
        let handle = self
            .backend
            .write_initial(run, TIMINGS_TABLE, &schema)
            .map_err(|e| StoreError::backend(run.name(), TIMINGS_TABLE, None, e))?;
        self.backend
            .append_partition(&handle, function_timings, 0)
            .map_err(|e| StoreError::backend(run.name(), TIMINGS_TABLE, None, e))?;

        info!(
            run = run.name(),
            rows = function_timings.len(),
            "Wrote function timings"
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use xps_models::{FrameImages, PeakRow, Sample2D};

    fn frame(frame_number: u64) -> Frame {
        Frame {
            frame_number,
            shot_num: 10 + frame_number as i64,
            images: FrameImages::uniform(Sample2D::from_fn(4, 4, |x, y| {
                (frame_number * 100 + x as u64 * 4 + y as u64) as f64
            })),
            detected_peaks: vec![PeakRow {
                x: frame_number as f64,
                h: 1.0,
                fwhm: 0.5,
            }],
        }
    }

    fn store() -> (Arc<MemoryBackend>, IncrementalStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), IncrementalStore::new(backend))
    }

    #[test]
    fn test_append_offsets_follow_length() {
        let (backend, store) = store();
        let run = store.on_start("scan-1").unwrap();
        let state = EntityState::Initialized(store.ensure_entities(&run, &frame(0)).unwrap());

        for n in 1..=5u64 {
            let report = store.append_frame("scan-1", &state, &frame(n)).unwrap();
            assert_eq!(report.offset, n - 1, "append #{n}");
            assert_eq!(report.arrays, 6);
        }

        let entities = state.entities().unwrap();
        for handle in entities.arrays() {
            assert_eq!(backend.array_len(handle).unwrap(), 5);
        }
        let first = backend
            .read_slice(entities.array("shot_mean").unwrap(), 0)
            .unwrap();
        assert_eq!(first[0], 100.0);
        assert_eq!(backend.read_table(entities.peaks()).unwrap().len(), 5);
    }

    #[test]
    fn test_entities_start_empty() {
        let (backend, store) = store();
        let run = store.on_start("scan-1").unwrap();
        let set = store.ensure_entities(&run, &frame(0)).unwrap();

        assert_eq!(set.arrays().len(), 6);
        for handle in set.arrays() {
            assert_eq!(backend.array_len(handle).unwrap(), 0);
        }
        assert_eq!(
            backend.entity_names("scan-1"),
            vec![
                "detected_peaks",
                "ifft",
                "integrated_frames",
                "shot_mean",
                "shot_recent",
                "shot_std",
                "vfft"
            ]
        );
    }

    #[test]
    fn test_rerun_of_same_scan_rejects_old_entities() {
        let (backend, store) = store();
        let run = store.on_start("scan-1").unwrap();
        let state = EntityState::Initialized(store.ensure_entities(&run, &frame(0)).unwrap());
        for n in 1..=3u64 {
            store.append_frame("scan-1", &state, &frame(n)).unwrap();
        }

        let again = store.on_start("scan-1").unwrap();
        assert_eq!(again, run);
        let err = store.ensure_entities(&again, &frame(0)).unwrap_err();
        match err {
            StoreError::Backend {
                run, offset, source, ..
            } => {
                assert_eq!(run, "scan-1");
                assert_eq!(offset, Some(3));
                assert!(matches!(source, BackendError::NotEmpty { length: 3, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        let shot_mean = state.entities().unwrap().array("shot_mean").unwrap();
        assert_eq!(backend.array_len(shot_mean).unwrap(), 3);
    }

    #[test]
    fn test_append_before_entities_is_precondition_error() {
        let (backend, store) = store();
        store.on_start("scan-1").unwrap();
        let writes = backend.write_count();

        let err = store
            .append_frame("scan-1", &EntityState::Uninitialized, &frame(1))
            .unwrap_err();
        match err {
            StoreError::Precondition { run, frame_number } => {
                assert_eq!(run, "scan-1");
                assert_eq!(frame_number, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.write_count(), writes);
    }

    #[test]
    fn test_shape_change_is_tagged_store_error() {
        let (_, store) = store();
        let run = store.on_start("scan-1").unwrap();
        let state = EntityState::Initialized(store.ensure_entities(&run, &frame(0)).unwrap());

        let mut odd = frame(1);
        odd.images.vfft = Sample2D::zeros(2, 2);
        let err = store.append_frame("scan-1", &state, &odd).unwrap_err();
        match err {
            StoreError::Backend {
                run, entity, offset, ..
            } => {
                assert_eq!(run, "scan-1");
                assert_eq!(entity, "vfft");
                assert_eq!(offset, Some(0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_finalize_writes_timings() {
        let (backend, store) = store();
        let run = store.on_start("scan-1").unwrap();
        let mut timings = Table::new(vec!["function".into(), "seconds".into()]);
        timings.push_row(vec!["fft".into(), 0.125.into()]).unwrap();

        let handle = store.finalize(&run, &timings).unwrap();
        assert_eq!(handle.name(), TIMINGS_TABLE);
        assert_eq!(backend.read_table(&handle).unwrap(), timings);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let (backend, store) = store();
        let run = store
            .run_blocking(|s| s.on_start("scan-async"))
            .await
            .unwrap();
        assert_eq!(run.name(), "scan-async");
        assert_eq!(backend.run_names(), vec!["scan-async"]);
    }
}
