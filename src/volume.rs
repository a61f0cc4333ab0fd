use crate::enums::Interpolation;
use crate::enums::Orientation;
use crate::interpolator::Interpolator;

use nalgebra::Point3;
use nalgebra::Vector3;
use ndarray::Array2;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// Scalar volume with voxel `(0, 0, 0)` at the world origin.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    /// Voxel spacing in mm along (x, y, z).
    pub spacing: (f32, f32, f32),
    pub interpolated_dim: (u32, u32, u32),
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: (f32, f32, f32)) -> Self {
        let original_dim = data.dim();
        Self {
            data,
            spacing,
            interpolated_dim: Interpolator::get_isotropic_dimensions(spacing, original_dim),
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Minimum and maximum voxel value, `(0.0, 0.0)` for an empty volume.
    pub fn scalar_range(&self) -> (f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        self.data
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            )
    }

    /// World-space corners spanned by the voxel centers.
    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        let (depth, height, width) = self.dim();
        let (sx, sy, sz) = self.spacing;
        let max = Point3::new(
            width.saturating_sub(1) as f32 * sx,
            height.saturating_sub(1) as f32 * sy,
            depth.saturating_sub(1) as f32 * sz,
        );
        (Point3::origin(), max)
    }

    pub fn center(&self) -> Point3<f32> {
        let (min, max) = self.bounds();
        nalgebra::center(&min, &max)
    }

    /// Continuous (z, y, x) index of a world point, `None` outside the bounds.
    fn world_to_index(&self, point: &Point3<f32>) -> Option<(f32, f32, f32)> {
        let (depth, height, width) = self.dim();
        if depth == 0 || height == 0 || width == 0 {
            return None;
        }
        let (sx, sy, sz) = self.spacing;
        let x = point.x / sx;
        let y = point.y / sy;
        let z = point.z / sz;
        let inside = |v: f32, n: usize| v >= -1e-4 && v <= (n - 1) as f32 + 1e-4;
        if !(inside(x, width) && inside(y, height) && inside(z, depth)) {
            return None;
        }
        let clamp = |v: f32, n: usize| v.clamp(0.0, (n - 1) as f32);
        Some((clamp(z, depth), clamp(y, height), clamp(x, width)))
    }

    /// Value at a world point, `None` outside the bounds.
    pub fn sample(&self, point: &Point3<f32>, interpolation: Interpolation) -> Option<f32> {
        let (z, y, x) = self.world_to_index(point)?;
        let view = self.data.view();
        let value = match interpolation {
            Interpolation::Nearest => Interpolator::nearest(&view, z, y, x),
            Interpolation::Linear => Interpolator::trilinear_interpolate(&view, z, y, x),
        };
        Some(value)
    }

    /// Central-difference gradient in value units per mm, zero outside the bounds.
    pub fn gradient(&self, point: &Point3<f32>, interpolation: Interpolation) -> Vector3<f32> {
        let (sx, sy, sz) = self.spacing;
        let (min, max) = self.bounds();
        let clamp = |p: Point3<f32>| {
            Point3::new(
                p.x.clamp(min.x, max.x),
                p.y.clamp(min.y, max.y),
                p.z.clamp(min.z, max.z),
            )
        };
        let diff = |offset: Vector3<f32>, step: f32| {
            let ahead = self.sample(&clamp(*point + offset), interpolation);
            let behind = self.sample(&clamp(*point - offset), interpolation);
            match (ahead, behind) {
                (Some(a), Some(b)) => (a - b) / (2.0 * step),
                _ => 0.0,
            }
        };
        Vector3::new(
            diff(Vector3::new(sx, 0.0, 0.0), sx),
            diff(Vector3::new(0.0, sy, 0.0), sy),
            diff(Vector3::new(0.0, 0.0, sz), sz),
        )
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    fn get_output_dimensions(&self, orientation: &Orientation) -> (u32, u32) {
        // Always return (width, height) - standard image convention
        match orientation {
            Orientation::Axial => {
                // Looking down Z-axis: X is width, Y is height
                (self.interpolated_dim.2, self.interpolated_dim.1)
            }
            Orientation::Coronal => {
                // Looking down Y-axis: X is width, Z is height
                (self.interpolated_dim.2, self.interpolated_dim.0)
            }
            Orientation::Sagittal => {
                // Looking down X-axis: Y is width, Z is height
                (self.interpolated_dim.1, self.interpolated_dim.0)
            }
        }
    }

    /// Slice resampled to square pixels, rows running along the first array axis.
    pub fn resample_slice(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Option<Array2<f32>> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        let (width, height) = self.get_output_dimensions(&orientation);

        if slice.dim() == (height as usize, width as usize) {
            return Some(slice.to_owned());
        }
        Some(Self::interpolate_slice(&slice, width, height, interpolation))
    }

    fn interpolate_slice(
        slice: &ArrayView2<'_, f32>,
        width: u32,
        height: u32,
        interpolation: Interpolation,
    ) -> Array2<f32> {
        let (slice_height, slice_width) = slice.dim();

        let pixel_data: Vec<f32> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    // Normalized coordinates with half-pixel offset
                    let norm_x = (x as f32 + 0.5) / width as f32;
                    let norm_y = (y as f32 + 0.5) / height as f32;

                    let src_x = norm_x * slice_width as f32 - 0.5;
                    let src_y = norm_y * slice_height as f32 - 0.5;

                    let src_x = src_x.max(0.0).min((slice_width - 1) as f32);
                    let src_y = src_y.max(0.0).min((slice_height - 1) as f32);

                    match interpolation {
                        Interpolation::Nearest => Interpolator::nearest_pixel(slice, src_y, src_x),
                        Interpolation::Linear => {
                            Interpolator::bilinear_interpolate(slice, src_y, src_x)
                        }
                    }
                })
            })
            .collect();

        Array2::from_shape_vec((height as usize, width as usize), pixel_data)
            .expect("pixel buffer matches output dimensions")
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}
