use std::fs;
use std::path::PathBuf;

use clap::Parser;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use conv_triage::mocks::MockClassifier;
use conv_triage::{Config, ImageClassifier, TriageError, TriageProcessor};

#[test]
fn test_config_validation() {
    let temp_dir = TempDir::new().unwrap();
    let model_path = temp_dir.path().join("test_model.onnx");
    let input_dir = temp_dir.path().join("input");

    fs::create_dir_all(&input_dir).unwrap();
    fs::write(&model_path, b"dummy_model").unwrap();

    let config = Config::parse_from([
        "conv-triage",
        "--img-dir",
        input_dir.to_str().unwrap(),
        "--ckpt",
        model_path.to_str().unwrap(),
        "--device",
        "cpu",
    ]);
    config.validate().unwrap();

    let spec = config.model_spec();
    assert_eq!(spec.checkpoint, model_path);
    assert_eq!(spec.num_classes, 4);
    assert_eq!(spec.input_size, 384);
}

#[test]
fn test_invalid_checkpoint_is_fatal_before_the_loop() {
    let temp_dir = TempDir::new().unwrap();
    let model_path = temp_dir.path().join("broken.onnx");
    let input_dir = temp_dir.path().join("input");
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(&model_path, b"not a protobuf").unwrap();

    let config = Config::parse_from([
        "conv-triage",
        "--img-dir",
        input_dir.to_str().unwrap(),
        "--out-dir",
        output_dir.to_str().unwrap(),
        "--ckpt",
        model_path.to_str().unwrap(),
        "--device",
        "cpu",
    ]);

    let result = TriageProcessor::with_onnx_model(config);
    assert!(matches!(result, Err(TriageError::Checkpoint { .. })));
    assert!(!output_dir.exists());
}

#[test]
fn test_missing_input_dir_is_rejected() {
    let config = Config::parse_from([
        "conv-triage",
        "--img-dir",
        "/nonexistent/input",
        "--out-dir",
        "/nonexistent/output",
    ]);
    let processor = TriageProcessor::new(MockClassifier::constant(4, 1, 0.9), config).unwrap();
    assert!(matches!(
        processor.process_directory(),
        Err(TriageError::FileSystem { .. })
    ));
}

#[test]
fn test_trait_abstraction() {
    let mock_model = MockClassifier::constant(4, 2, 0.6);
    assert_eq!(mock_model.num_classes(), 4);

    let config = Config::parse_from(["conv-triage", "--input-size", "224", "--crop-pct", "0.9"]);
    let processor = TriageProcessor::new(mock_model, config).unwrap();

    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([255, 0, 0])));
    let prediction = processor.classify(&image).unwrap();
    assert_eq!(prediction.class_index, 2);
    assert!((prediction.confidence - 0.6).abs() < 1e-5);
}

#[test]
fn test_path_handling() {
    let test_cases = vec![
        ("/absolute/path/to/file.png", true),
        ("relative/path/to/file.JPG", true),
        ("relative/path/to/file.jpeg", false),
        ("", false),
    ];

    for (path_str, should_be_valid) in test_cases {
        let path = PathBuf::from(path_str);
        assert_eq!(
            conv_triage::is_supported_image_format(&path),
            should_be_valid,
            "Path validation failed for: {}",
            path_str
        );
    }
}
