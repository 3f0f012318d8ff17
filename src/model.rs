use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{Device, DeviceOptions},
    errors::{Result, TriageError},
    traits::ImageClassifier,
};

/// What the checkpoint is expected to be.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub architecture: String,
    pub checkpoint: PathBuf,
    pub num_classes: usize,
    pub input_size: u32,
    pub drop_path_rate: f32,
}

/// Interface and metadata read from an exported checkpoint.
///
/// Shapes use `-1` for dynamic dimensions. The metadata fields are optional
/// custom properties written by the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSignature {
    pub input_name: String,
    pub input_shape: Option<Vec<i64>>,
    pub output_name: String,
    pub output_shape: Option<Vec<i64>>,
    pub architecture: Option<String>,
    pub num_classes: Option<usize>,
    pub drop_path_rate: Option<f32>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureMismatch {
    #[error("input `{name}` is not a tensor")]
    InputNotTensor { name: String },

    #[error("output `{name}` is not a tensor")]
    OutputNotTensor { name: String },

    #[error("input `{name}` has rank {rank}, expected 4 (N x 3 x H x W)")]
    InputRank { name: String, rank: usize },

    #[error("input `{name}` has {channels} channels, expected 3")]
    InputChannels { name: String, channels: i64 },

    #[error("input `{name}` is {height}x{width}, expected {expected}x{expected}")]
    InputSize {
        name: String,
        height: i64,
        width: i64,
        expected: u32,
    },

    #[error("output `{name}` has rank {rank}, expected 2 (N x classes)")]
    OutputRank { name: String, rank: usize },

    #[error("{source_name} declares {found} classes, expected {expected}")]
    NumClasses {
        source_name: &'static str,
        found: i64,
        expected: usize,
    },

    #[error("checkpoint was exported from `{found}`, expected `{expected}`")]
    Architecture { found: String, expected: String },

    #[error("checkpoint was built with drop path rate {found}, expected {expected}")]
    DropPathRate { found: f32, expected: f32 },
}

fn dim_matches(dim: i64, expected: i64) -> bool {
    dim < 0 || dim == expected
}

impl CheckpointSignature {
    /// Collects every way the checkpoint differs from `spec`.
    pub fn mismatches(&self, spec: &ModelSpec) -> Vec<SignatureMismatch> {
        let mut problems = Vec::new();

        match &self.input_shape {
            None => problems.push(SignatureMismatch::InputNotTensor {
                name: self.input_name.clone(),
            }),
            Some(shape) if shape.len() != 4 => problems.push(SignatureMismatch::InputRank {
                name: self.input_name.clone(),
                rank: shape.len(),
            }),
            Some(shape) => {
                if !dim_matches(shape[1], 3) {
                    problems.push(SignatureMismatch::InputChannels {
                        name: self.input_name.clone(),
                        channels: shape[1],
                    });
                }
                let size = i64::from(spec.input_size);
                if !dim_matches(shape[2], size) || !dim_matches(shape[3], size) {
                    problems.push(SignatureMismatch::InputSize {
                        name: self.input_name.clone(),
                        height: shape[2],
                        width: shape[3],
                        expected: spec.input_size,
                    });
                }
            }
        }

        match &self.output_shape {
            None => problems.push(SignatureMismatch::OutputNotTensor {
                name: self.output_name.clone(),
            }),
            Some(shape) if shape.len() != 2 => problems.push(SignatureMismatch::OutputRank {
                name: self.output_name.clone(),
                rank: shape.len(),
            }),
            Some(shape) => {
                if !dim_matches(shape[1], spec.num_classes as i64) {
                    problems.push(SignatureMismatch::NumClasses {
                        source_name: "output shape",
                        found: shape[1],
                        expected: spec.num_classes,
                    });
                }
            }
        }

        if let Some(n) = self.num_classes {
            if n != spec.num_classes {
                problems.push(SignatureMismatch::NumClasses {
                    source_name: "metadata",
                    found: n as i64,
                    expected: spec.num_classes,
                });
            }
        }

        if let Some(arch) = &self.architecture {
            if arch != &spec.architecture {
                problems.push(SignatureMismatch::Architecture {
                    found: arch.clone(),
                    expected: spec.architecture.clone(),
                });
            }
        }

        if let Some(rate) = self.drop_path_rate {
            if (rate - spec.drop_path_rate).abs() > 1e-6 {
                problems.push(SignatureMismatch::DropPathRate {
                    found: rate,
                    expected: spec.drop_path_rate,
                });
            }
        }

        problems
    }

    fn read(session: &Session) -> Result<Self> {
        let input = session.inputs.first().ok_or_else(|| {
            TriageError::model("モデル入力取得", "checkpoint declares no inputs")
        })?;
        let output = session.outputs.first().ok_or_else(|| {
            TriageError::model("モデル出力取得", "checkpoint declares no outputs")
        })?;

        let metadata = session
            .metadata()
            .map_err(|e| TriageError::model("モデルメタデータ取得", e))?;
        let custom = |key: &str| -> Result<Option<String>> {
            metadata
                .custom(key)
                .map_err(|e| TriageError::model(format!("メタデータ読み込み: {key}"), e))
        };

        Ok(Self {
            input_name: input.name.clone(),
            input_shape: input.input_type.tensor_shape().map(|s| s.to_vec()),
            output_name: output.name.clone(),
            output_shape: output.output_type.tensor_shape().map(|s| s.to_vec()),
            architecture: custom("architecture")?,
            num_classes: custom("num_classes")?.and_then(|v| v.trim().parse().ok()),
            drop_path_rate: custom("drop_path_rate")?.and_then(|v| v.trim().parse().ok()),
        })
    }
}

/// ONNX Runtime backed classifier.
pub struct Model {
    num_classes: usize,
    signature: CheckpointSignature,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(spec: &ModelSpec, device: DeviceOptions) -> Result<Self> {
        let mut session = build_session(&spec.checkpoint, device)?;

        let signature = CheckpointSignature::read(&session)?;
        debug!(?signature, "checkpoint signature");
        let problems = signature.mismatches(spec);
        if !problems.is_empty() {
            return Err(TriageError::Checkpoint {
                path: spec.checkpoint.clone(),
                problems: problems.iter().map(ToString::to_string).collect(),
            });
        }
        if signature.architecture.is_none() {
            warn!(
                "checkpoint carries no architecture metadata, assuming `{}`",
                spec.architecture
            );
        }

        // モデル初期化
        let size = spec.input_size as usize;
        let data = Array4::<f32>::zeros((1, 3, size, size));
        session
            .run(ort::inputs![signature.input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| TriageError::model("初期化テンソル作成", e))?])
            .map_err(|e| TriageError::model("モデル初期化実行", e))?;

        info!(
            checkpoint = %spec.checkpoint.display(),
            architecture = %spec.architecture,
            classes = spec.num_classes,
            "model loaded"
        );

        Ok(Self {
            num_classes: spec.num_classes,
            signature,
            session: Mutex::new(session),
        })
    }
}

impl ImageClassifier for Model {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.signature.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.signature.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix2>()?
            .to_owned())
    }
}

fn execution_providers(device: DeviceOptions) -> Vec<ExecutionProviderDispatch> {
    let id = device.device_id;
    match device.device {
        Device::Cpu => vec![],
        Device::Cuda => vec![CUDAExecutionProvider::default()
            .with_device_id(id)
            .build()
            .error_on_failure()],
        Device::TensorRt => vec![TensorRTExecutionProvider::default()
            .with_device_id(id)
            .build()
            .error_on_failure()],
        Device::Auto => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(id)
                .build(),
            CUDAExecutionProvider::default().with_device_id(id).build(),
        ],
    }
}

fn build_session(checkpoint: &Path, device: DeviceOptions) -> Result<Session> {
    let mut builder = SessionBuilder::new()
        .map_err(|e| TriageError::model("セッションビルダー初期化", e))?
        .with_execution_providers(execution_providers(device))
        .map_err(|e| TriageError::model(format!("実行プロバイダー設定 ({:?})", device.device), e))?
        .with_memory_pattern(true)
        .map_err(|e| TriageError::model("メモリパターン設定", e))?;
    if let Some(threads) = device.num_threads {
        builder = builder
            .with_intra_threads(threads)
            .map_err(|e| TriageError::model("スレッド数設定", e))?;
    }

    builder.commit_from_file(checkpoint).map_err(|e| TriageError::Checkpoint {
        path: checkpoint.to_path_buf(),
        problems: vec![format!("モデルファイル読み込み: {e}")],
    })
}
