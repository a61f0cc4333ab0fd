//! The two end-to-end runs: bone isosurface export and direct volume
//! rendering of the same series.

use crate::camera::Camera;
use crate::config::{OutputSettings, Settings, ViewSettings};
use crate::enums::{Interpolation, Orientation};
use crate::figure::{FigureError, save_snapshot};
use crate::mesh::MeshError;
use crate::rasterizer::MeshRenderer;
use crate::surface::SurfaceExtractor;
use crate::threshold::ImageThreshold;
use crate::volume::Volume;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

use nalgebra::{Point3, Vector3};
use ndarray::s;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use web_time::Instant;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Error loading DICOM series: {0}")]
    Load(#[from] VolumeLoaderError),
    #[error("Error writing mesh: {0}")]
    Mesh(#[from] MeshError),
    #[error("Error writing figure: {0}")]
    Figure(#[from] FigureError),
    #[error("Error creating output directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsosurfaceReport {
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Voxels at or below the threshold.
    pub background_voxels: usize,
    pub extraction_time: Duration,
    pub stl_path: PathBuf,
    /// Figures and snapshots in the order they were written.
    pub images: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RayCastReport {
    pub render_time: Duration,
    pub image: PathBuf,
}

fn load_volume(settings: &Settings) -> Result<Volume, PipelineError> {
    let input = &settings.input;
    let volume = VolumeLoader::new(input.sort_by)
        .with_rescale(input.rescale)
        .load_from_directory(&input.dicom_dir)?;
    Ok(volume)
}

/// Heatmap of the configured slice, mirrored left to right to match the
/// radiological view. Falls back to the middle slice when out of range.
fn save_slice_heatmap(
    volume: &Volume,
    output: &OutputSettings,
    name: &str,
    interpolation: Interpolation,
) -> Result<PathBuf, PipelineError> {
    let orientation = output.slice_orientation;
    let slice = match volume.resample_slice(output.slice_index, orientation, interpolation) {
        Some(slice) => slice,
        None => {
            let (depth, height, width) = volume.dim();
            let middle = match orientation {
                Orientation::Axial => depth,
                Orientation::Coronal => height,
                Orientation::Sagittal => width,
            } / 2;
            warn!(
                index = output.slice_index,
                middle, "slice index outside the volume, using the middle slice"
            );
            volume
                .resample_slice(middle, orientation, interpolation)
                .ok_or(FigureError::EmptyArray)?
        }
    };
    let path = output.figure_path(name);
    output
        .heatmap
        .save(&slice.slice_move(s![.., ..;-1]), &path)?;
    Ok(path)
}

fn apply_view(camera: &mut Camera, view: &ViewSettings) {
    if let Some([x, y, z]) = view.position {
        camera.set_position(Point3::new(x, y, z));
    }
    if let Some([x, y, z]) = view.focal_point {
        camera.set_focal_point(Point3::new(x, y, z));
    }
    camera.set_view_angle(view.view_angle);
    camera.set_roll(view.roll);
}

/// Threshold, bone surface, STL export and snapshots.
pub struct IsosurfacePipeline;

impl IsosurfacePipeline {
    pub fn run(settings: &Settings) -> Result<IsosurfaceReport, PipelineError> {
        let volume = load_volume(settings)?;
        Self::run_on_volume(settings, &volume)
    }

    pub fn run_on_volume(
        settings: &Settings,
        volume: &Volume,
    ) -> Result<IsosurfaceReport, PipelineError> {
        let iso = &settings.isosurface;
        let output = &settings.output;
        std::fs::create_dir_all(&output.dir)?;
        let mut images = Vec::new();

        images.push(save_slice_heatmap(
            volume,
            output,
            &iso.original_slice_name,
            Interpolation::Linear,
        )?);

        let threshold = ImageThreshold::binary_above(iso.threshold).replace_out(iso.label);
        let background_voxels = threshold.count_in(volume);
        let mask = threshold.apply(volume);
        info!(
            threshold = iso.threshold,
            background_voxels,
            total_voxels = volume.data().len(),
            "thresholded volume"
        );
        // nearest keeps the mask binary
        images.push(save_slice_heatmap(
            &mask,
            output,
            &iso.thresholded_slice_name,
            Interpolation::Nearest,
        )?);

        let start = Instant::now();
        let mesh = SurfaceExtractor::new(iso.label).extract(&mask);
        let extraction_time = start.elapsed();

        let renderer = MeshRenderer {
            background: iso.background,
            color: iso.color,
            ..MeshRenderer::default()
        };
        let mut camera = Camera::default();
        for view in &iso.views {
            apply_view(&mut camera, view);
            let frame = renderer.render(&mesh, &camera, iso.width, iso.height);
            let path = output.figure_path(&view.name);
            save_snapshot(&frame, &path)?;
            images.push(path);
        }

        let stl_path = output.dir.join(&iso.stl_name);
        mesh.write_stl(&stl_path, iso.stl_format)?;

        // final frame from the last view's camera
        let frame = renderer.render(&mesh, &camera, iso.width, iso.height);
        let path = output.figure_path(&iso.snapshot_name);
        save_snapshot(&frame, &path)?;
        images.push(path);

        Ok(IsosurfaceReport {
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
            background_voxels,
            extraction_time,
            stl_path,
            images,
        })
    }
}

/// Direct volume rendering with the configured transfer functions.
pub struct RayCastPipeline;

impl RayCastPipeline {
    pub fn run(settings: &Settings) -> Result<RayCastReport, PipelineError> {
        let volume = load_volume(settings)?;
        Self::run_on_volume(settings, &volume)
    }

    pub fn run_on_volume(
        settings: &Settings,
        volume: &Volume,
    ) -> Result<RayCastReport, PipelineError> {
        let rc = &settings.raycast;
        let output = &settings.output;
        std::fs::create_dir_all(&output.dir)?;

        let camera = Self::camera(settings, volume);
        let start = Instant::now();
        let frame = rc
            .caster
            .render(volume, &rc.property, &camera, rc.width, rc.height);
        let render_time = start.elapsed();

        let image = output.figure_path(&rc.snapshot_name);
        save_snapshot(&frame, &image)?;
        Ok(RayCastReport { render_time, image })
    }

    /// Looks at the volume center from the configured offset.
    pub fn camera(settings: &Settings, volume: &Volume) -> Camera {
        let rc = &settings.raycast;
        let center = volume.center();
        let [dx, dy, dz] = rc.camera_offset;
        let [ux, uy, uz] = rc.view_up;
        let mut camera = Camera::new(
            center + Vector3::new(dx, dy, dz),
            center,
            Vector3::new(ux, uy, uz),
        );
        camera.set_view_angle(rc.view_angle);
        camera
    }
}
