use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::errors::{Result, TriageError};
use crate::labels::{LabelSet, OverridePolicy, DEFAULT_CLASS_NAMES};
use crate::model::ModelSpec;
use crate::transform::{ChannelOrder, Transform};

/// Label whose confident predictions are diverted to their own directory.
pub const TRASH_CLASS: usize = 0;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Name of the model architecture the checkpoint was exported from
    #[arg(short, long, default_value = "convnext_tiny")]
    pub model: String,

    /// ONNX checkpoint
    #[arg(short, long, default_value = "ckpt/checkpoint-best_t5.onnx")]
    pub ckpt: PathBuf,

    /// Directory holding the images to sort
    #[arg(short, long, default_value = "images_2")]
    pub img_dir: PathBuf,

    /// Root of the per-class output directories
    #[arg(short, long, default_value = "demo_2")]
    pub out_dir: PathBuf,

    /// Number of classes the checkpoint predicts (defaults to the number of class names)
    #[arg(long)]
    pub nb_classes: Option<usize>,

    #[arg(long, value_delimiter = ',', default_values = DEFAULT_CLASS_NAMES)]
    pub class_names: Vec<String>,

    #[arg(long, default_value_t = 384)]
    pub input_size: u32,

    #[arg(long)]
    pub crop_pct: Option<f64>,

    /// Drop path rate the checkpoint was trained with
    #[arg(long, default_value_t = 0.0)]
    pub drop_path: f32,

    #[arg(long, default_value = "true", value_parser = parse_bool, action = ArgAction::Set)]
    pub imagenet_default_mean_and_std: bool,

    /// Feed channels in BGR order, as the checkpoint was trained on OpenCV decoded images
    #[arg(long, default_value = "true", value_parser = parse_bool, action = ArgAction::Set)]
    pub bgr: bool,

    /// Confidence thresholds; only the first one is used
    #[arg(long, value_delimiter = ',', default_values_t = [0.8, 0.55, 0.2])]
    pub pos_thr: Vec<f32>,

    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Intra-op threads for inference (ONNX Runtime picks when omitted)
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Log failed images and continue instead of aborting the batch
    #[arg(long)]
    pub keep_going: bool,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Device {
    /// Try TensorRT, then CUDA, then fall back to CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    #[value(name = "tensorrt")]
    TensorRt,
}

/// Where and how inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOptions {
    pub device: Device,
    pub device_id: i32,
    pub num_threads: Option<usize>,
}

impl Config {
    /// Checks everything that can be checked before touching the model.
    pub fn validate(&self) -> Result<()> {
        if !self.img_dir.is_dir() {
            return Err(TriageError::validation(
                "img_dir",
                format!("{} is not a directory", self.img_dir.display()),
            ));
        }
        if !self.ckpt.is_file() {
            return Err(TriageError::validation(
                "ckpt",
                format!("{} does not exist", self.ckpt.display()),
            ));
        }
        self.validate_values()
    }

    /// Value checks that do not touch the filesystem.
    pub fn validate_values(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(TriageError::validation("input_size", "must be positive"));
        }
        if let Some(pct) = self.crop_pct {
            if !(pct > 0.0 && pct <= 1.0) {
                return Err(TriageError::validation(
                    "crop_pct",
                    format!("{pct} is outside (0, 1]"),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.drop_path) {
            return Err(TriageError::validation(
                "drop_path",
                format!("{} is outside [0, 1)", self.drop_path),
            ));
        }
        if self.pos_thr.is_empty() {
            return Err(TriageError::validation("pos_thr", "must not be empty"));
        }
        if let Some(t) = self.pos_thr.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(TriageError::validation(
                "pos_thr",
                format!("{t} is outside [0, 1]"),
            ));
        }
        let nb_classes = self.nb_classes();
        if nb_classes == 0 || nb_classes > self.class_names.len() {
            return Err(TriageError::validation(
                "nb_classes",
                format!(
                    "{nb_classes} does not fit the {} class names",
                    self.class_names.len()
                ),
            ));
        }
        Ok(())
    }

    pub fn nb_classes(&self) -> usize {
        self.nb_classes.unwrap_or(self.class_names.len())
    }

    pub fn trash_threshold(&self) -> Result<f32> {
        self.pos_thr
            .first()
            .copied()
            .ok_or_else(|| TriageError::validation("pos_thr", "must not be empty"))
    }

    /// Thresholds after the first are accepted for compatibility but unused.
    pub fn ignored_thresholds(&self) -> &[f32] {
        self.pos_thr.get(1..).unwrap_or_default()
    }

    pub fn label_set(&self) -> Result<LabelSet> {
        LabelSet::new(self.class_names.iter().take(self.nb_classes()).cloned())?.with_override(
            TRASH_CLASS,
            OverridePolicy {
                threshold: self.trash_threshold()?,
                destination: format!("trash{TRASH_CLASS}"),
            },
        )
    }

    pub fn transform(&self) -> Transform {
        let order = if self.bgr {
            ChannelOrder::Bgr
        } else {
            ChannelOrder::Rgb
        };
        Transform::eval(
            self.input_size,
            self.crop_pct,
            self.imagenet_default_mean_and_std,
            order,
        )
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            architecture: self.model.clone(),
            checkpoint: self.ckpt.clone(),
            num_classes: self.nb_classes(),
            input_size: self.input_size,
            drop_path_rate: self.drop_path,
        }
    }

    pub const fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            device: self.device,
            device_id: self.device_id,
            num_threads: self.num_threads,
        }
    }

    pub const fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Accepts the usual spellings of a boolean flag value.
pub fn parse_bool(s: &str) -> std::result::Result<bool, String> {
    match s.to_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        _ => Err(format!("Boolean value expected, got `{s}`")),
    }
}
