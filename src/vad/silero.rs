//! Silero VAD via ONNX Runtime (ort crate).
//!
//! Processes 512-sample windows at 16 kHz and returns speech probability.
//! Maintains LSTM hidden state (h, c tensors) across calls within a phase.
//!
//! When the `onnx` feature is disabled, `SileroScorer::load` always returns
//! `None` and interrupts degrade to disabled.

use std::path::Path;
use tracing::warn;
#[cfg(feature = "onnx")]
use tracing::info;

/// Silero VAD window size (samples at 16 kHz).
pub const WINDOW_SIZE: usize = 512;

/// Sample rate expected by the model.
pub const SAMPLE_RATE: u32 = 16_000;

/// Model file looked up inside the model directory.
pub const MODEL_FILE: &str = "silero_vad.onnx";

// -----------------------------------------------------------------------
// onnx: real ONNX implementation
// -----------------------------------------------------------------------
#[cfg(feature = "onnx")]
mod inner {
    use super::*;
    use crate::error::ScorerError;
    use crate::vad::SpeechScorer;
    use ort::session::Session;

    const STATE_SIZE: usize = 2 * 1 * 128;

    pub struct SileroScorer {
        session: Session,
        /// LSTM hidden state h: shape [2, 1, 128]
        h: Vec<f32>,
        /// LSTM cell state c: shape [2, 1, 128]
        c: Vec<f32>,
    }

    impl SileroScorer {
        pub fn load(model_dir: &Path) -> Option<Self> {
            let model_path = model_dir.join(MODEL_FILE);
            if !model_path.exists() {
                warn!(
                    "Silero VAD model not found at {}, interrupts disabled",
                    model_path.display()
                );
                return None;
            }

            match Session::builder()
                .and_then(|b| b.with_intra_threads(1))
                .and_then(|b| b.with_inter_threads(1))
                .and_then(|b| b.commit_from_file(&model_path))
            {
                Ok(session) => {
                    info!("Silero VAD loaded from {}", model_path.display());
                    Some(Self {
                        session,
                        h: vec![0.0f32; STATE_SIZE],
                        c: vec![0.0f32; STATE_SIZE],
                    })
                }
                Err(e) => {
                    warn!("Failed to load Silero VAD: {}, interrupts disabled", e);
                    None
                }
            }
        }

        fn infer_window(&mut self, window: &[f32]) -> Result<f32, ScorerError> {
            let err = |what: &str, e: ort::Error| ScorerError::Inference(format!("{what}: {e}"));

            let input_tensor =
                ort::value::Value::from_array(([1, WINDOW_SIZE], window.to_vec()))
                    .map_err(|e| err("input value", e))?;
            let sr_tensor = ort::value::Value::from_array(([1], vec![SAMPLE_RATE as i64]))
                .map_err(|e| err("sr value", e))?;
            let h_tensor = ort::value::Value::from_array(([2, 1, 128], self.h.clone()))
                .map_err(|e| err("h value", e))?;
            let c_tensor = ort::value::Value::from_array(([2, 1, 128], self.c.clone()))
                .map_err(|e| err("c value", e))?;

            let inputs = ort::inputs![
                "input" => input_tensor,
                "sr" => sr_tensor,
                "h" => h_tensor,
                "c" => c_tensor,
            ];
            let outputs = self
                .session
                .run(inputs)
                .map_err(|e| err("inference", e))?;

            // Output[0]: speech probability, Output[1]: new h, Output[2]: new c
            let prob = {
                let (_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| err("extract prob", e))?;
                *data
                    .first()
                    .ok_or_else(|| ScorerError::Inference("empty probability output".into()))?
            };
            {
                let (_shape, data) = outputs[1]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| err("extract h", e))?;
                self.h = data.to_vec();
            }
            {
                let (_shape, data) = outputs[2]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| err("extract c", e))?;
                self.c = data.to_vec();
            }

            Ok(prob)
        }
    }

    impl SpeechScorer for SileroScorer {
        fn score(&mut self, frame: &[f32]) -> Result<f32, ScorerError> {
            if frame.len() < WINDOW_SIZE {
                return Err(ScorerError::FrameSize {
                    expected: WINDOW_SIZE,
                    got: frame.len(),
                });
            }
            let mut max_prob: f32 = 0.0;
            for window in frame.chunks_exact(WINDOW_SIZE) {
                max_prob = max_prob.max(self.infer_window(window)?);
            }
            Ok(max_prob)
        }

        fn reset(&mut self) {
            self.h = vec![0.0f32; STATE_SIZE];
            self.c = vec![0.0f32; STATE_SIZE];
        }

        fn name(&self) -> String {
            "silero".to_string()
        }
    }
}

// -----------------------------------------------------------------------
// Stub: no onnx feature
// -----------------------------------------------------------------------
#[cfg(not(feature = "onnx"))]
mod inner {
    use super::*;
    use crate::error::ScorerError;
    use crate::vad::SpeechScorer;

    /// Placeholder type; never constructed without the `onnx` feature.
    pub struct SileroScorer {
        _private: (),
    }

    impl SileroScorer {
        pub fn load(_model_dir: &Path) -> Option<Self> {
            warn!("Silero VAD not available (onnx feature disabled), interrupts disabled");
            None
        }
    }

    impl SpeechScorer for SileroScorer {
        fn score(&mut self, _frame: &[f32]) -> Result<f32, ScorerError> {
            Ok(0.0)
        }

        fn name(&self) -> String {
            "silero (unavailable)".to_string()
        }
    }
}

pub use inner::SileroScorer;
