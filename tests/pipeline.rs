#![cfg(unix)]

mod common;

use std::fs;

use common::Workspace;
use dicom_segmentation::{
    OutputFormat, Pipeline, PipelineError, PipelineState, SortBy, VoxelData, VoxelType, codec,
};

#[test]
fn nifti_masks_are_copied_byte_for_byte() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    let liver = ws.add_mask("liver.nii.gz", 1);
    let spleen = ws.add_mask("spleen.nii.gz", 2);
    ws.install_copying_tool();

    let mut pipeline = Pipeline::new(ws.config());
    let summary = pipeline.run().expect("pipeline should succeed");

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(summary.organs_written, 2);
    assert!(!summary.is_degraded());
    assert_eq!(summary.masks.organs().collect::<Vec<_>>(), ["liver", "spleen"]);
    assert_eq!(ws.output_names(), ["liver.nii.gz", "spleen.nii.gz"]);
    assert_eq!(fs::read(&liver).unwrap(), fs::read(ws.output.join("liver.nii.gz")).unwrap());
    assert_eq!(fs::read(&spleen).unwrap(), fs::read(ws.output.join("spleen.nii.gz")).unwrap());
    assert!(ws.staging_is_empty());
}

#[test]
fn nrrd_masks_keep_their_geometry() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    ws.add_mask("liver.nii.gz", 1);
    ws.install_copying_tool();

    let mut config = ws.config();
    config.output_format = OutputFormat::Nrrd;
    let summary = Pipeline::new(config).run().expect("pipeline should succeed");

    assert_eq!(summary.organs_written, 1);
    assert_eq!(ws.output_names(), ["liver.nrrd"]);
    let written = codec::read_volume(&ws.output.join("liver.nrrd")).unwrap();
    let expected = common::mask(1);
    assert_eq!(written.data, expected.data);
    assert!(written.geometry.approx_eq(&expected.geometry, 1e-5));
    assert!(ws.staging_is_empty());
}

#[test]
fn uncompressed_masks_are_found_by_fallback() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    ws.add_mask("spleen.nii", 1);
    ws.install_copying_tool();

    let summary = Pipeline::new(ws.config()).run().expect("pipeline should succeed");

    assert_eq!(summary.masks.organs().collect::<Vec<_>>(), ["spleen"]);
    assert_eq!(ws.output_names(), ["spleen.nii.gz"]);
}

#[test]
fn staged_volume_matches_the_series() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    ws.install_copying_tool();

    Pipeline::new(ws.config()).run().expect("pipeline should succeed");

    let volume = codec::read_volume(&ws.captured_input).unwrap();
    assert_eq!(volume.voxel_type(), VoxelType::F32);
    assert_eq!(
        volume.dim(),
        (3, usize::from(common::ROWS), usize::from(common::COLUMNS))
    );
    assert!(volume.geometry.approx_eq(&common::mask(1).geometry, 1e-4));

    // Slices are written in reverse z order, 100 apart; no window is applied
    let VoxelData::F32(voxels) = &volume.data else {
        panic!("staged volume should be float32");
    };
    let columns = usize::from(common::COLUMNS);
    for ((z, y, x), &value) in voxels.indexed_iter() {
        assert_eq!(value, ((2 - z) * 100 + y * columns + x) as f32, "voxel ({z}, {y}, {x})");
    }
}

#[test]
fn decoded_series_is_described_by_its_file() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    let dest = ws.staging.join("input.nii.gz");

    let staged = codec::decode_series(&ws.input, &dest, SortBy::default()).unwrap();

    assert_eq!(staged.path, dest);
    assert_eq!(staged.dim, (3, usize::from(common::ROWS), usize::from(common::COLUMNS)));
    assert!(staged.geometry.approx_eq(&common::mask(1).geometry, 1e-4));
    let written = codec::read_volume(&staged.path).unwrap();
    assert_eq!(written.dim(), staged.dim);
}

#[test]
fn fast_mode_reaches_the_tool() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 2);
    ws.install_copying_tool();

    Pipeline::new(ws.config()).run().unwrap();
    let args = fs::read_to_string(&ws.recorded_args).unwrap();
    assert!(args.trim_end().ends_with("--fast"));

    let mut config = ws.config();
    config.fast_mode = false;
    Pipeline::new(config).run().unwrap();
    let args = fs::read_to_string(&ws.recorded_args).unwrap();
    assert!(args.starts_with("-i "));
    assert!(!args.contains("--fast"));
    assert!(!args.contains("--ml"));
}

#[test]
fn failing_tool_leaves_output_untouched() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    fs::create_dir_all(&ws.output).unwrap();
    fs::write(ws.output.join("previous.txt"), "keep").unwrap();
    ws.install_failing_tool("CUDA out of memory");

    let mut pipeline = Pipeline::new(ws.config());
    let err = pipeline.run().unwrap_err();

    match err {
        PipelineError::SegmentationFailed { status, stderr } => {
            assert_eq!(status.code(), Some(1));
            assert!(stderr.contains("CUDA out of memory"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(ws.output_names(), ["previous.txt"]);
    assert!(ws.staging_is_empty());
}

#[test]
fn tool_without_output_is_a_degraded_success() {
    let ws = Workspace::new();
    common::write_series(&ws.input, 3);
    ws.install_copying_tool();

    let mut pipeline = Pipeline::new(ws.config());
    let summary = pipeline.run().expect("empty output is not an error");

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(summary.organs_written, 0);
    assert!(summary.masks.is_empty());
    assert_eq!(summary.staged_listing, Some(vec![]));
    assert!(ws.output.is_dir());
    assert!(ws.output_names().is_empty());
    assert!(ws.staging_is_empty());
}

#[test]
fn missing_input_writes_nothing() {
    let ws = Workspace::new();
    ws.install_copying_tool();

    let err = Pipeline::new(ws.config()).run().unwrap_err();

    assert!(matches!(err, PipelineError::InputNotFound(_)));
    assert!(!ws.output.exists());
    assert!(!ws.recorded_args.exists());
    assert!(ws.staging_is_empty());
}

#[test]
fn directory_without_dicom_fails_before_segmentation() {
    let ws = Workspace::new();
    fs::create_dir_all(&ws.input).unwrap();
    fs::write(ws.input.join("README"), "no images here").unwrap();
    ws.install_copying_tool();

    let err = Pipeline::new(ws.config()).run().unwrap_err();

    assert!(matches!(err, PipelineError::NoSeriesFound(_)));
    assert!(!ws.recorded_args.exists());
    assert!(ws.staging_is_empty());
}
