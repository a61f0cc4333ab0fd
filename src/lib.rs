//! # DICOM volume rendering
//!
//! This crate loads a DICOM CT series into a volume and produces two kinds
//! of output from it:
//!
//!  - a bone surface: the volume is thresholded into a binary label volume,
//!    the label boundary is extracted as a closed triangle mesh, written as
//!    STL and rendered from configurable camera poses
//!  - a direct volume rendering: rays are cast through the volume and the
//!    samples are composited with color and opacity transfer functions
//!
//! Both runs also export heatmaps of a slice before and after thresholding.
//! DICOM files are decoded in parallel using rayon, as are the rendered
//! image rows. DICOM files are assumed to have the following attributes:
//!   - Axial data set
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series (Series Instance UID) and acquisition
//!     (Acquisition Number)
//!
//! # Examples
//!
//! ## Extracting the bone surface
//!
//! ```no_run
//! # use dicom_volume_render::{ImageThreshold, SortBy, StlFormat, SurfaceExtractor, VolumeLoader};
//! let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
//!     .load_from_directory("vhm_head")
//!     .expect("should have loaded files from directory");
//! let bone = ImageThreshold::binary_above(400.0).apply(&volume);
//! let mesh = SurfaceExtractor::new(1.0).extract(&bone);
//! mesh.write_stl("bones.stl", StlFormat::Binary)
//!     .expect("should have written the mesh");
//! ```
//!
//! ## Ray casting with the default head transfer function
//!
//! ```no_run
//! # use dicom_volume_render::{Camera, SortBy, VolumeLoader, VolumeProperty, VolumeRayCaster};
//! # use nalgebra::Vector3;
//! let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
//!     .load_from_directory("vhm_head")
//!     .expect("should have loaded files from directory");
//! let center = volume.center();
//! let camera = Camera::new(center + Vector3::new(600.0, 0.0, 0.0), center, -Vector3::z());
//! let image = VolumeRayCaster::default().render(
//!     &volume,
//!     &VolumeProperty::default(),
//!     &camera,
//!     480,
//!     600,
//! );
//! image.save("RC.png").expect("should have written the image");
//! ```

pub mod camera;
pub mod config;
pub mod enums;
pub mod figure;
mod interpolator;
pub mod mesh;
pub mod pipeline;
pub mod rasterizer;
pub mod ray_caster;
pub mod surface;
pub mod threshold;
pub mod transfer_function;
pub mod volume;
pub mod volume_loader;

pub use camera::Camera;
pub use config::{CliArgs, Command, Settings, SettingsError};
pub use enums::{BlendMode, Interpolation, Orientation, SortBy, StlFormat};
pub use figure::{Colormap, FigureError, Heatmap, save_snapshot};
pub use mesh::{Mesh, MeshError};
pub use pipeline::{
    IsosurfacePipeline, IsosurfaceReport, PipelineError, RayCastPipeline, RayCastReport,
};
pub use rasterizer::MeshRenderer;
pub use ray_caster::{VolumeProperty, VolumeRayCaster};
pub use surface::SurfaceExtractor;
pub use threshold::{ImageThreshold, ThresholdRange};
pub use transfer_function::{ColorTransferFunction, PiecewiseFunction};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};

/// Install the `tracing` subscriber used by the binary. `RUST_LOG` selects
/// the level, `info` when unset.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
