use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::types::ADC_MAX;
use crate::window::SignalWindow;

/// Per-window classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Normal,
    Anomalous,
}

/// Result of one window evaluation. `confidence` is the anomaly-class
/// probability in [0, 1]. Ephemeral; only the hysteresis counter outlives it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: Label,
    pub confidence: f32,
}

impl Classification {
    /// The safe default used when the model cannot (or should not) be asked.
    pub fn normal() -> Self {
        Self {
            label: Label::Normal,
            confidence: 0.0,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.label == Label::Anomalous
    }
}

/// Errors that can occur around the classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("model declares no outputs")]
    NoOutputs,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// Seam for the opaque pre-trained classifier, so tests can inject a mock.
#[async_trait]
pub trait AnomalyModel: Send + Sync {
    /// Classify one normalized window. The input length always equals the
    /// configured window capacity.
    async fn classify(&self, window: Vec<f32>) -> Result<Classification, ClassifierError>;
}

/// ONNX Runtime backed classifier. The artifact is loaded once at startup;
/// a missing or corrupt file is fatal there, never recovered at runtime.
pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    output_name: String,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        info!("Loading classifier model from {:?}", path);

        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(path.to_path_buf()));
        }

        let session = Session::builder()
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;

        // skl2onnx exports [label, probabilities]; prefer the probability
        // output, otherwise fall back to the last declared one.
        let output_name = session
            .outputs()
            .iter()
            .find(|o| o.name() == "probabilities")
            .or_else(|| session.outputs().last())
            .map(|o| o.name().to_string())
            .ok_or(ClassifierError::NoOutputs)?;

        info!("Classifier model loaded, reading output '{}'", output_name);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            output_name,
        })
    }
}

fn run_inference(
    session: &Mutex<Session>,
    output_name: &str,
    window: Vec<f32>,
) -> Result<Classification, ClassifierError> {
    let width = window.len();
    let input = Array2::<f32>::from_shape_vec((1, width), window)
        .map_err(|e| ClassifierError::Inference(e.to_string()))?;
    let input_tensor =
        Value::from_array(input).map_err(|e| ClassifierError::Inference(e.to_string()))?;

    let mut session = session.lock();
    let outputs = session
        .run(ort::inputs![input_tensor])
        .map_err(|e| ClassifierError::Inference(e.to_string()))?;

    let output = outputs
        .get(output_name)
        .ok_or_else(|| ClassifierError::Inference(format!("missing output '{}'", output_name)))?;
    let (_, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| ClassifierError::Inference(e.to_string()))?;

    // Two-class probability layout [p_normal, p_anomaly]; the anomaly class
    // is the last element either way.
    let confidence = data
        .last()
        .copied()
        .ok_or_else(|| ClassifierError::Inference("empty output tensor".to_string()))?;

    let label = if confidence >= 0.5 {
        Label::Anomalous
    } else {
        Label::Normal
    };

    Ok(Classification { label, confidence })
}

#[async_trait]
impl AnomalyModel for OnnxClassifier {
    async fn classify(&self, window: Vec<f32>) -> Result<Classification, ClassifierError> {
        let session = self.session.clone();
        let output_name = self.output_name.clone();

        // Inference runs on the blocking pool so a slow model never stalls
        // the session or accept loops.
        tokio::task::spawn_blocking(move || run_inference(&session, &output_name, window))
            .await
            .map_err(|e| ClassifierError::Worker(e.to_string()))?
    }
}

/// Adapter between the raw signal window and the model: pads, normalizes,
/// short-circuits padding-dominated windows, and absorbs model failures.
#[derive(Clone)]
pub struct WindowClassifier {
    model: Arc<dyn AnomalyModel>,
    min_valid_signals: usize,
}

impl WindowClassifier {
    pub fn new(model: Arc<dyn AnomalyModel>, min_valid_signals: usize) -> Self {
        Self {
            model,
            min_valid_signals,
        }
    }

    /// Evaluate the current window. Never fails: insufficient signal and
    /// model errors both map to a Normal result (logged), so one bad
    /// evaluation can never tear down the session.
    pub async fn evaluate(&self, window: &SignalWindow) -> Classification {
        let normalized: Vec<f32> = window
            .padded()
            .iter()
            .map(|v| (*v / ADC_MAX) as f32)
            .collect();

        let valid = normalized.iter().filter(|v| **v != 0.0).count();
        if valid < self.min_valid_signals {
            warn!(
                "Insufficient valid signals: {}/{}, skipping classification",
                valid,
                normalized.len()
            );
            return Classification::normal();
        }

        match self.model.classify(normalized).await {
            Ok(result) => result,
            Err(e) => {
                error!("Anomaly detection error: {}", e);
                Classification::normal()
            }
        }
    }
}
