use crate::{enums::SortBy, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

const DEFAULT_SLICE_SPACING: f32 = 1.0;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

struct SliceRecord {
    order: Option<f32>,
    position_z: Option<f32>,
    /// Column and row spacing, in that order.
    pixel_spacing: Option<(f32, f32)>,
    thickness: Option<f32>,
    image: Array2<f32>,
}

/// Why an object did not make it into the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skipped {
    MissingSortKey,
    Undecodable,
}

/// Stacks the slices of one DICOM series into a [`Volume`].
///
/// Intensities are kept as stored values unless `rescale` is set, in which
/// case the modality LUT (Rescale Slope / Intercept) is applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeLoader {
    pub sort_by: SortBy,
    pub rescale: bool,
}

impl VolumeLoader {
    pub fn new(sort_by: SortBy) -> Self {
        Self {
            sort_by,
            rescale: false,
        }
    }

    pub fn with_rescale(mut self, rescale: bool) -> Self {
        self.rescale = rescale;
        self
    }

    /// Load a volume from DICOM objects
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent
    /// or no kept slice carries a pixel spacing
    pub fn load_from_dicom_objects(
        &self,
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<Volume, VolumeLoaderError> {
        let start = Instant::now();
        let extracted: Vec<_> = dicom_objects
            .par_iter()
            .map(|dicom_object| self.extract_slice_record(dicom_object))
            .collect();

        let mut records = Vec::with_capacity(extracted.len());
        let (mut missing_sort_key, mut undecodable) = (0usize, 0usize);
        for result in extracted {
            match result {
                Ok(record) => records.push(record),
                Err(Skipped::MissingSortKey) => missing_sort_key += 1,
                Err(Skipped::Undecodable) => undecodable += 1,
            }
        }
        if missing_sort_key > 0 {
            warn!(
                skipped = missing_sort_key,
                sort_by = ?self.sort_by,
                "skipped DICOM objects without the sort key"
            );
        }
        if undecodable > 0 {
            warn!(
                skipped = undecodable,
                "skipped DICOM objects without decodable pixel data"
            );
        }

        if records.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        self.sort_records(&mut records);
        Self::validate_dimensions(&records)?;

        let (spacing_x, spacing_y) =
            Self::get_pixel_spacing(&records).ok_or(VolumeLoaderError::MissingSpacing)?;
        let spacing_z = Self::get_slice_spacing(&records);

        let volume_array = Self::build_volume_array(&records);
        let (depth, height, width) = volume_array.dim();
        info!(
            slices = depth,
            rows = height,
            columns = width,
            spacing = ?(spacing_x, spacing_y, spacing_z),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded DICOM volume"
        );

        Ok(Volume::new(volume_array, (spacing_x, spacing_y, spacing_z)))
    }

    /// Load a volume from file paths, opening the files in parallel.
    /// Any file that cannot be read fails the load.
    pub fn load_from_file_paths(
        &self,
        paths: &[impl AsRef<Path> + Sync],
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        self.load_from_dicom_objects(&objects?)
    }

    /// Load a volume from a directory.
    ///
    /// Every regular file with a `.dcm` extension, a numeric extension
    /// (`slice.0042`) or no extension at all is treated as a slice of the
    /// series. Candidates that are not readable DICOM files are skipped.
    pub fn load_from_directory(&self, path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && Self::is_candidate(path))
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        paths.sort();
        debug!(
            directory = %path.as_ref().display(),
            files = paths.len(),
            "reading DICOM series"
        );

        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path) {
                Ok(object) => Some(object),
                Err(error) => {
                    warn!(file = %path.display(), %error, "skipping unreadable file");
                    None
                }
            })
            .collect();

        self.load_from_dicom_objects(&objects)
    }

    fn is_candidate(path: &Path) -> bool {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) => {
                ext.eq_ignore_ascii_case("dcm") || ext.bytes().all(|b| b.is_ascii_digit())
            }
            None => true,
        }
    }

    fn extract_slice_record(
        &self,
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<SliceRecord, Skipped> {
        let order =
            Self::get_sort_order(dicom_object, &self.sort_by).ok_or(Skipped::MissingSortKey)?;
        let image = self
            .decode_image(dicom_object)
            .ok_or(Skipped::Undecodable)?;
        Ok(SliceRecord {
            order,
            position_z: Self::get_position_z(dicom_object),
            pixel_spacing: Self::get_pixel_spacing_of(dicom_object),
            thickness: dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float32().ok())
                .filter(|thickness| *thickness > 0.0),
            image,
        })
    }

    fn get_position_z(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<f32> {
        dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?
            .get(2)
            .copied()
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                dicom_object.element(tags::IMAGE_POSITION_PATIENT).ok()?;
                Some(Self::get_position_z(dicom_object))
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn decode_image(&self, dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let modality_lut = if self.rescale {
            ModalityLutOption::Default
        } else {
            ModalityLutOption::None
        };
        let options = ConvertOptions::new()
            .with_modality_lut(modality_lut)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_records(&self, records: &mut [SliceRecord]) {
        if !matches!(self.sort_by, SortBy::None) {
            records.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if matches!(self.sort_by, SortBy::ImagePositionPatient) {
            records.reverse();
        }
    }

    fn validate_dimensions(records: &[SliceRecord]) -> Result<(), VolumeLoaderError> {
        let first_dim = records[0].image.dim();
        if records.iter().any(|record| record.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(records: &[SliceRecord]) -> Array3<f32> {
        let (height, width) = records[0].image.dim();
        let depth = records.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, record) in records.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&record.image);
        }

        volume
    }


    fn get_pixel_spacing_of(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Option<(f32, f32)> {
        let pixel_spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float32()
            .ok()?;

        match pixel_spacing.as_slice() {
            [row, column, ..] => Some((*column, *row)),
            [both] => Some((*both, *both)),
            [] => None,
        }
    }

    fn get_pixel_spacing(records: &[SliceRecord]) -> Option<(f32, f32)> {
        records.iter().find_map(|record| record.pixel_spacing)
    }

    fn get_slice_spacing(records: &[SliceRecord]) -> f32 {
        let from_positions = match records {
            [first, second, ..] => match (first.position_z, second.position_z) {
                (Some(a), Some(b)) if (a - b).abs() > f32::EPSILON => Some((a - b).abs()),
                _ => None,
            },
            _ => None,
        };

        from_positions
            .or_else(|| records.iter().find_map(|record| record.thickness))
            .unwrap_or_else(|| {
                warn!(
                    fallback = DEFAULT_SLICE_SPACING,
                    "no slice spacing in series, using fallback"
                );
                DEFAULT_SLICE_SPACING
            })
    }
}
