use crate::{
    enums::SortBy,
    volume::{Geometry, Volume, VoxelData, cross, dot, norm},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::PixelDecoder,
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No DICOM series found in {}", .0.display())]
    NoSeriesFound(PathBuf),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type DicomFile = FileDicomObject<InMemDicomObject>;

/// One decoded image of a series
struct Slice {
    path: PathBuf,
    image: Array2<f32>,
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
    pixel_spacing: Option<[f64; 2]>,
    slice_spacing: Option<f64>,
    instance_number: Option<i32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from the largest DICOM series in a directory
    ///
    /// Every regular file is considered; files that are not DICOM or carry no
    /// pixel data are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeLoaderError::NoSeriesFound`] if no image slice could be
    /// read, or [`VolumeLoaderError::InconsistentDimensions`] if the slices of
    /// the chosen series differ in size.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let dir = path.as_ref();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let objects: Vec<(PathBuf, DicomFile)> = paths
            .into_par_iter()
            .filter_map(|path| match open_file(&path) {
                Ok(object) if object.element(tags::PIXEL_DATA).is_ok() => Some((path, object)),
                Ok(_) => {
                    debug!("Skipping {}: no pixel data", path.display());
                    None
                }
                Err(err) => {
                    debug!("Skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();

        let series = Self::pick_series(objects);
        if series.is_empty() {
            return Err(VolumeLoaderError::NoSeriesFound(dir.to_path_buf()));
        }
        info!("Found {} DICOM files", series.len());

        Self::load_from_dicom_objects(dir, series, sort_by)
    }

    fn load_from_dicom_objects(
        source: &Path,
        objects: Vec<(PathBuf, DicomFile)>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<Slice> = objects
            .into_par_iter()
            .filter_map(|(path, object)| Self::extract_slice(path, &object))
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoSeriesFound(source.to_path_buf()));
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let geometry = Self::get_geometry(&slices);
        let volume_array = Self::build_volume_array(&slices);

        Ok(Volume::new(VoxelData::F32(volume_array), geometry))
    }

    /// Keeps the series with the most slices, ties going to the lowest UID
    fn pick_series(objects: Vec<(PathBuf, DicomFile)>) -> Vec<(PathBuf, DicomFile)> {
        let mut groups: BTreeMap<String, Vec<(PathBuf, DicomFile)>> = BTreeMap::new();
        for (path, object) in objects {
            let uid = Self::get_string(&object, tags::SERIES_INSTANCE_UID).unwrap_or_default();
            groups.entry(uid).or_default().push((path, object));
        }

        let mut chosen: Option<(String, Vec<_>)> = None;
        for (uid, group) in groups {
            match &chosen {
                Some((_, best)) if best.len() >= group.len() => {
                    warn!("Ignoring series {uid} ({} files)", group.len());
                }
                _ => {
                    if let Some((ignored, best)) = chosen.take() {
                        warn!("Ignoring series {ignored} ({} files)", best.len());
                    }
                    chosen = Some((uid, group));
                }
            }
        }

        chosen.map(|(_, group)| group).unwrap_or_default()
    }

    fn extract_slice(path: PathBuf, dicom_object: &DicomFile) -> Option<Slice> {
        let image = match Self::decode_image(dicom_object) {
            Some(image) => image,
            None => {
                warn!("Skipping {}: pixel data could not be decoded", path.display());
                return None;
            }
        };

        Some(Slice {
            image,
            position: Self::get_floats(dicom_object, tags::IMAGE_POSITION_PATIENT)
                .and_then(|v| <[f64; 3]>::try_from(v.get(..3)?).ok()),
            orientation: Self::get_floats(dicom_object, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|v| <[f64; 6]>::try_from(v.get(..6)?).ok()),
            pixel_spacing: Self::get_floats(dicom_object, tags::PIXEL_SPACING)
                .and_then(|v| <[f64; 2]>::try_from(v.get(..2)?).ok()),
            slice_spacing: [tags::SPACING_BETWEEN_SLICES, tags::SLICE_THICKNESS]
                .into_iter()
                .find_map(|tag| {
                    let value = dicom_object.element(tag).ok()?.to_float64().ok()?;
                    (value > 0.0).then_some(value)
                }),
            instance_number: dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok()),
            path,
        })
    }

    fn decode_image(dicom_object: &DicomFile) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        pixel_data
            .to_ndarray::<f32>()
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn get_floats(dicom_object: &DicomFile, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        dicom_object.element(tag).ok()?.to_multi_float64().ok()
    }

    fn get_string(dicom_object: &DicomFile, tag: dicom::core::Tag) -> Option<String> {
        let value = dicom_object.element(tag).ok()?.to_str().ok()?;
        Some(value.trim_end_matches(['\0', ' ']).to_string())
    }

    fn slice_normal(slices: &[Slice]) -> [f64; 3] {
        slices
            .iter()
            .find_map(|slice| slice.orientation)
            .map(|o| cross([o[0], o[1], o[2]], [o[3], o[4], o[5]]))
            .unwrap_or([0.0, 0.0, 1.0])
    }

    fn sort_slices(slices: &mut [Slice], sort_by: SortBy) {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let normal = Self::slice_normal(slices);
                slices.sort_by(|a, b| {
                    let a = a.position.map(|p| dot(p, normal));
                    let b = b.position.map(|p| dot(p, normal));
                    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.instance_number),
            SortBy::None => slices.sort_by(|a, b| a.path.cmp(&b.path)),
        }
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }

    fn get_geometry(slices: &[Slice]) -> Geometry {
        let mut geometry = Geometry::default();
        let first = &slices[0];

        if let Some(o) = slices.iter().find_map(|slice| slice.orientation) {
            geometry.direction[0] = [o[0], o[1], o[2]];
            geometry.direction[1] = [o[3], o[4], o[5]];
            geometry.direction[2] = cross(geometry.direction[0], geometry.direction[1]);
        }
        if let Some(position) = first.position {
            geometry.origin = position;
        }
        // Pixel Spacing is (row spacing, column spacing), i.e. (y, x)
        if let Some([row, column]) = slices.iter().find_map(|slice| slice.pixel_spacing) {
            geometry.spacing[0] = column;
            geometry.spacing[1] = row;
        }

        let last = &slices[slices.len() - 1];
        if let (Some(start), Some(end)) = (first.position, last.position) {
            let span = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
            let distance = norm(span);
            if slices.len() > 1 && distance > f64::EPSILON {
                geometry.direction[2] = span.map(|c| c / distance);
                geometry.spacing[2] = distance / (slices.len() - 1) as f64;
                return geometry;
            }
        }

        if let Some(spacing) = slices.iter().find_map(|slice| slice.slice_spacing) {
            geometry.spacing[2] = spacing;
        }
        geometry
    }
}
