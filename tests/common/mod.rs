#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use dicom::{
    core::{DataElement, PrimitiveValue, VR},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::tags;
use dicom_segmentation::{Geometry, PipelineConfig, Volume, VoxelData, codec};
use ndarray::Array3;
use tempfile::TempDir;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const SERIES_UID: &str = "1.2.826.0.1.3680043.2.1125.7.1";

pub const ROWS: u16 = 4;
pub const COLUMNS: u16 = 3;
pub const SLICE_GAP: f64 = 2.5;

fn strs(values: &[&str]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|value| value.to_string()).collect())
}

/// Writes one CT slice at `z`; instance numbers start at 1
pub fn write_slice(dir: &Path, series_uid: &str, index: usize, z: f64) {
    let pixels: Vec<u16> = (0..ROWS * COLUMNS).map(|i| i + 100 * index as u16).collect();
    let sop_uid = format!("{series_uid}.{}", index + 1);
    let z = z.to_string();

    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(CT_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid.as_str())),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
        DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from((index + 1).to_string()),
        ),
        DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, strs(&["-10", "-20", z.as_str()])),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            strs(&["1", "0", "0", "0", "1", "0"]),
        ),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, strs(&["0.5", "0.75"])),
        DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from("2.5")),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(ROWS)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(COLUMNS)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.into())),
    ]);

    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_uid.as_str()),
        )
        .expect("should have built file meta group");
    file.write_to_file(dir.join(format!("IM{index:04}")))
        .expect("should have written DICOM slice");
}

/// Writes `count` slices, deliberately out of spatial order
pub fn write_series(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for index in 0..count {
        let z = ((count - 1 - index) as f64) * SLICE_GAP;
        write_slice(dir, SERIES_UID, index, z);
    }
}

pub fn mask(label: u8) -> Volume {
    let data = Array3::from_shape_fn((3, 4, 3), |(z, y, x)| if (x + y + z) % 2 == 0 { label } else { 0 });
    Volume::new(
        VoxelData::U8(data),
        Geometry {
            spacing: [0.75, 0.5, 2.5],
            origin: [-10.0, -20.0, 0.0],
            ..Geometry::default()
        },
    )
}

/// Filesystem layout of one pipeline test
pub struct Workspace {
    pub root: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub staging: PathBuf,
    pub fixtures: PathBuf,
    pub script: PathBuf,
    /// Arguments the stub tool was called with
    pub recorded_args: PathBuf,
    /// Copy of the volume the stub tool received
    pub captured_input: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let path = root.path().to_path_buf();
        let workspace = Self {
            input: path.join("dicom"),
            output: path.join("out"),
            staging: path.join("staging"),
            fixtures: path.join("fixtures"),
            script: path.join("segment.sh"),
            recorded_args: path.join("args.txt"),
            captured_input: path.join("captured.nii.gz"),
            root,
        };
        fs::create_dir_all(&workspace.staging).unwrap();
        fs::create_dir_all(&workspace.fixtures).unwrap();
        workspace
    }

    /// Adds a mask file the stub tool will emit
    pub fn add_mask(&self, name: &str, label: u8) -> PathBuf {
        let path = self.fixtures.join(name);
        codec::write_volume(&mask(label), &path).unwrap();
        path
    }

    /// Stub tool that copies every fixture into its output directory
    pub fn install_copying_tool(&self) {
        let script = format!(
            r#"echo "$@" > '{args}'
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift 2 ;;
    -o) output="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -f "$input" ] || {{ echo "input volume missing" >&2; exit 2; }}
cp "$input" '{captured}'
mkdir -p "$output"
for file in '{fixtures}'/*; do
  [ -e "$file" ] && cp "$file" "$output"/
done
echo "segmented"
"#,
            args = self.recorded_args.display(),
            captured = self.captured_input.display(),
            fixtures = self.fixtures.display(),
        );
        fs::write(&self.script, script).unwrap();
    }

    /// Stub tool that fails with `message` on its error stream
    pub fn install_failing_tool(&self, message: &str) {
        fs::write(&self.script, format!("echo '{message}' >&2\nexit 1\n")).unwrap();
    }

    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.input, &self.output);
        config.segmenter_program = PathBuf::from("sh");
        config.segmenter_args = vec![self.script.clone().into_os_string()];
        config.staging_root = Some(self.staging.clone());
        config
    }

    pub fn staging_is_empty(&self) -> bool {
        fs::read_dir(&self.staging).unwrap().next().is_none()
    }

    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
