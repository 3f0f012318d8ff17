pub mod classification;
pub mod config;
pub mod errors;
pub mod labels;
pub mod model;
pub mod traits;
pub mod transform;

pub mod mocks;

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageDecoder, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use walkdir::WalkDir;

pub use classification::Prediction;
pub use config::Config;
pub use errors::{Result, TriageError};
pub use labels::{Destination, LabelSet, OverridePolicy, Route};
pub use model::Model;
pub use traits::*;
pub use transform::Transform;

/// Extension forced onto every copied file.
pub const OUTPUT_EXTENSION: &str = "png";

/// Result of routing one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub source: PathBuf,
    pub prediction: Prediction,
    pub label: String,
    pub route: Route,
    pub destination: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TriageSummary {
    pub total: usize,
    /// Copies per output directory name.
    pub copied: BTreeMap<String, usize>,
    pub failed: Vec<(PathBuf, String)>,
}

impl TriageSummary {
    fn record(&mut self, outcome: &Outcome) {
        let dir = outcome
            .destination
            .parent()
            .and_then(Path::file_name)
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        *self.copied.entry(dir).or_default() += 1;
    }

    pub fn copied_total(&self) -> usize {
        self.copied.values().sum()
    }
}

pub struct TriageProcessor<M: ImageClassifier> {
    model: M,
    transform: Transform,
    labels: LabelSet,
    config: Config,
}

impl<M: ImageClassifier> TriageProcessor<M> {
    pub fn new(model: M, config: Config) -> Result<Self> {
        config.validate_values()?;
        let labels = config.label_set()?;
        if model.num_classes() != labels.len() {
            return Err(TriageError::Configuration {
                message: format!(
                    "model predicts {} classes but {} labels are configured",
                    model.num_classes(),
                    labels.len()
                ),
            });
        }
        for ignored in config.ignored_thresholds() {
            warn!("threshold {ignored} in --pos-thr is ignored, only the first value is used");
        }

        Ok(Self {
            model,
            transform: config.transform(),
            labels,
            config,
        })
    }

    pub fn process_directory(&self) -> Result<TriageSummary> {
        let input_dir = &self.config.img_dir;
        if !input_dir.is_dir() {
            return Err(TriageError::FileSystem {
                path: input_dir.clone(),
                operation: "ディレクトリ存在確認".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }

        self.prepare_output_dirs()?;
        let image_files = self.collect_image_files(input_dir)?;

        let mut summary = TriageSummary {
            total: image_files.len(),
            ..TriageSummary::default()
        };
        if image_files.is_empty() {
            info!("no .jpg or .png files found in {}", input_dir.display());
            return Ok(summary);
        }

        let pb = ProgressBar::new(image_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| TriageError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );

        for input_file in &image_files {
            match self.process_single_image(input_file) {
                Ok(outcome) => {
                    pb.suspend(|| {
                        info!(
                            "{} {} {} {:.4} -> {}",
                            outcome.source.display(),
                            outcome.prediction.class_index,
                            outcome.label,
                            outcome.prediction.confidence,
                            outcome.destination.display()
                        )
                    });
                    summary.record(&outcome);
                }
                Err(e) if self.config.keep_going => {
                    pb.suspend(|| warn!("skipping {}: {e}", input_file.display()));
                    summary.failed.push((input_file.clone(), e.to_string()));
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }
            pb.inc(1);
        }

        pb.finish();
        Ok(summary)
    }

    /// Creates one directory per label and per override destination.
    pub fn prepare_output_dirs(&self) -> Result<()> {
        for name in self.labels.directory_names() {
            let dir = self.config.out_dir.join(name);
            fs::create_dir_all(&dir)
                .map_err(|e| TriageError::file_system(&dir, "出力ディレクトリ作成", e))?;
        }
        Ok(())
    }

    /// Lists `.jpg`/`.png` files directly inside `input_path`, sorted.
    /// Symlinks count when they resolve to a regular file.
    pub fn collect_image_files(&self, input_path: &Path) -> Result<Vec<PathBuf>> {
        let mut image_files = Vec::new();

        for entry in WalkDir::new(input_path).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.path().is_file() && is_supported_image_format(entry.path()) {
                image_files.push(entry.into_path());
            }
        }

        image_files.sort();
        Ok(image_files)
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Prediction> {
        let tensor = self.transform.apply(image);
        let logits = self.model.predict(tensor.view())?;
        if logits.nrows() == 0 {
            return Err(TriageError::model("推論結果取得", "model returned no rows"));
        }
        Prediction::from_logits(logits.row(0))
            .ok_or_else(|| TriageError::model("推論結果取得", "model returned no scores"))
    }

    pub fn process_single_image(&self, input_file: &Path) -> Result<Outcome> {
        let image = decode_image(input_file)?;
        let prediction = self.classify(&image)?;
        let destination = self.labels.route(&prediction)?;

        let output_file = self.output_path(input_file, &destination)?;
        fs::copy(input_file, &output_file)
            .map_err(|e| TriageError::file_system(&output_file, "画像コピー", e))?;

        Ok(Outcome {
            source: input_file.to_path_buf(),
            prediction,
            label: destination.label.to_string(),
            route: destination.route,
            destination: output_file,
        })
    }

    /// `out_dir/<destination>/<stem>.png`
    pub fn output_path(&self, input_file: &Path, destination: &Destination<'_>) -> Result<PathBuf> {
        let name = input_file.file_name().ok_or_else(|| {
            TriageError::validation("input file", format!("{} has no file name", input_file.display()))
        })?;
        let stem = match input_file.extension() {
            Some(_) => input_file.file_stem().unwrap_or(name),
            // a bare `.png` is all stem to `Path`
            None => OsStr::new(""),
        };
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(OUTPUT_EXTENSION);
        Ok(self.config.out_dir.join(destination.dir_name).join(file_name))
    }
}

impl TriageProcessor<Model> {
    pub fn with_onnx_model(config: Config) -> Result<Self> {
        config.validate()?;
        let model = Model::new(&config.model_spec(), config.device_options())?;
        Self::new(model, config)
    }
}

/// Name ends in `.jpg` or `.png`, case-insensitive. Names that are not valid
/// UTF-8 are matched on their lossy form.
pub fn is_supported_image_format(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .is_some_and(|name| name.ends_with(".jpg") || name.ends_with(".png"))
}

/// Decodes by content rather than extension, then applies the EXIF
/// orientation so the classifier sees the image upright.
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let decode_error = |operation: &str, source: Box<dyn std::error::Error + Send + Sync>| {
        TriageError::ImageProcessing {
            path: path.to_path_buf(),
            operation: operation.to_string(),
            source,
        }
    };
    let mut decoder = ImageReader::open(path)
        .map_err(|e| TriageError::file_system(path, "画像ファイルオープン", e))?
        .with_guessed_format()
        .map_err(|e| decode_error("フォーマット判定", Box::new(e)))?
        .into_decoder()
        .map_err(|e| decode_error("デコーダー作成", Box::new(e)))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| decode_error("EXIF向き取得", Box::new(e)))?;
    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| decode_error("画像読み込み", Box::new(e)))?;
    image.apply_orientation(orientation);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockClassifier;
    use clap::Parser;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn config(input: &Path, output: &Path) -> Config {
        Config::parse_from([
            OsStr::new("conv-triage"),
            OsStr::new("--img-dir"),
            input.as_os_str(),
            OsStr::new("--out-dir"),
            output.as_os_str(),
        ])
    }

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPG", true),
            ("test.png", true),
            ("test.Png", true),
            (".png", true),
            ("archive.tar.jpg", true),
            ("test.jpeg", false),
            ("testjpg", false),
            ("test.webp", false),
            ("test.txt", false),
            ("test", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected, "{filename}");
        }
    }

    #[test]
    fn test_output_path_forces_png() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let processor = TriageProcessor::new(
            MockClassifier::constant(4, 1, 0.9),
            config(temp_dir.path(), Path::new("out")),
        )?;
        let destination = Destination {
            dir_name: "trash0",
            label: "其他",
            route: Route::Override,
        };

        let path = processor.output_path(Path::new("in/photo.final.JPG"), &destination)?;
        assert_eq!(path, Path::new("out/trash0/photo.final.png"));

        let path = processor.output_path(Path::new("in/.PNG"), &destination)?;
        assert_eq!(path, Path::new("out/trash0/.png"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_matched() {
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"caf\xe9.JPG");
        assert!(is_supported_image_format(Path::new(name)));
        let name = OsStr::from_bytes(b"caf\xe9.gif");
        assert!(!is_supported_image_format(Path::new(name)));
    }

    /// JPEG bytes with an APP1 segment whose only IFD0 entry is Orientation.
    fn jpeg_with_orientation(image: &DynamicImage, orientation: u16) -> Vec<u8> {
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .unwrap();

        let mut exif = b"Exif\0\0MM\0\x2a\0\0\0\x08\0\x01\x01\x12\0\x03\0\0\0\x01".to_vec();
        exif.extend_from_slice(&orientation.to_be_bytes());
        exif.extend_from_slice(&[0; 6]);

        let mut out = encoded[..2].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&encoded[2..]);
        out
    }

    #[test]
    fn test_decode_applies_exif_orientation() -> Result<()> {
        let temp_dir = TempDir::new()?;
        // left half white, right half black
        let wide = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgb([255; 3])
            } else {
                Rgb([0; 3])
            }
        }));

        let upright = temp_dir.path().join("upright.jpg");
        fs::write(&upright, jpeg_with_orientation(&wide, 1))?;
        let image = decode_image(&upright)?;
        assert_eq!((image.width(), image.height()), (40, 20));

        let rotated = temp_dir.path().join("rotated.jpg");
        fs::write(&rotated, jpeg_with_orientation(&wide, 6))?;
        let image = decode_image(&rotated)?.to_rgb8();
        assert_eq!(image.dimensions(), (20, 40));
        // a quarter turn clockwise moves the white half to the top
        assert!(image.get_pixel(10, 5)[0] > 200);
        assert!(image.get_pixel(10, 35)[0] < 50);
        Ok(())
    }

    #[test]
    fn test_missing_image_reports_open_step() {
        match decode_image(Path::new("/nonexistent/a.jpg")) {
            Err(TriageError::FileSystem { operation, .. }) => {
                assert_eq!(operation, "画像ファイルオープン")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = TriageProcessor::new(
            MockClassifier::constant(3, 1, 0.9),
            config(temp_dir.path(), temp_dir.path()),
        );
        assert!(matches!(result, Err(TriageError::Configuration { .. })));
    }

    #[test]
    fn test_collect_is_flat() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = temp_dir.path();
        fs::create_dir_all(input.join("nested"))?;
        fs::write(input.join("nested/inner.jpg"), b"x")?;
        fs::write(input.join("top.png"), b"x")?;
        fs::create_dir_all(input.join("dir.jpg"))?;

        let processor = TriageProcessor::new(
            MockClassifier::constant(4, 1, 0.9),
            config(input, &input.join("out")),
        )?;
        let files = processor.collect_image_files(input)?;
        assert_eq!(files, vec![input.join("top.png")]);
        Ok(())
    }
}
