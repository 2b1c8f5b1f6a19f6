use crate::fusion::options::FusionOptions;
use crate::fusion::processor::FrameProcessor;
use crate::track::notify::{LogObserver, TrackObserver};
use crate::track::{FinalizeEvent, ReportEvent};
use log::warn;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

/// Forwards reports to the log and final reports to an optional Python callable.
///
struct PyObserver {
    log: LogObserver,
    on_finalized: Option<PyObject>,
}

impl TrackObserver for PyObserver {
    fn on_report(&mut self, event: &ReportEvent) -> anyhow::Result<()> {
        self.log.on_report(event)
    }

    fn on_finalized(&mut self, event: &FinalizeEvent) -> anyhow::Result<()> {
        self.log.on_finalized(event)?;
        if let Some(callback) = &self.on_finalized {
            Python::with_gil(|py| callback.call1(py, (event.summary.clone(),)))?;
        }
        Ok(())
    }
}

/// Fusion engine attached to a pipeline stage.
///
#[pyclass]
#[pyo3(name = "FusionEngine")]
pub struct PyFusionEngine(Option<FrameProcessor>);

impl PyFusionEngine {
    fn inner(&mut self) -> PyResult<&mut FrameProcessor> {
        self.0
            .as_mut()
            .ok_or_else(|| PyValueError::new_err("The engine is shut down"))
    }
}

#[pymethods]
impl PyFusionEngine {
    #[new]
    #[pyo3(signature = (options_json = None, on_finalized = None))]
    pub fn new(options_json: Option<&str>, on_finalized: Option<PyObject>) -> PyResult<Self> {
        let opts = match options_json {
            Some(json) => FusionOptions::from_json_str(json)
                .map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => FusionOptions::default(),
        };
        let observer = PyObserver {
            log: LogObserver,
            on_finalized,
        };
        Ok(Self(Some(FrameProcessor::new(opts, observer))))
    }

    /// Processes one frame snapshot and returns it unchanged. A non-negative `tick` numbers the
    /// frame in reports and crop names.
    ///
    #[pyo3(signature = (tick, frame_json))]
    pub fn process(&mut self, py: Python<'_>, tick: i64, frame_json: String) -> PyResult<String> {
        let engine = self.inner()?;
        py.allow_threads(|| {
            let res = match u64::try_from(tick) {
                Ok(frame_seq) => engine.process_json_numbered(&frame_json, frame_seq),
                Err(_) => engine.process_json(&frame_json),
            };
            if let Err(e) = res {
                warn!("Tick {}: snapshot is skipped: {}", tick, e);
            }
        });
        Ok(frame_json)
    }

    /// Final-reports every live track. Returns the number of final reports made.
    ///
    #[pyo3(signature = ())]
    pub fn finalize(&mut self, py: Python<'_>) -> PyResult<usize> {
        let engine = self.inner()?;
        Ok(py.allow_threads(|| engine.finalize_all()))
    }

    /// Live tracks as JSON documents
    ///
    #[pyo3(signature = ())]
    pub fn live_tracks(&mut self) -> PyResult<Vec<String>> {
        self.inner()?
            .live_tracks()
            .iter()
            .map(|t| serde_json::to_string(t).map_err(|e| PyValueError::new_err(e.to_string())))
            .collect()
    }
}

impl Drop for PyFusionEngine {
    fn drop(&mut self) {
        // the dispatch worker may wait for the GIL to call back into Python
        let engine = self.0.take();
        Python::with_gil(|py| py.allow_threads(move || drop(engine)));
    }
}

#[pymodule]
#[pyo3(name = "similari_fusion")]
fn similari_fusion(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();
    m.add_class::<PyFusionEngine>()?;
    Ok(())
}
