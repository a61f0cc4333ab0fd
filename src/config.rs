//! Runtime settings: built-in defaults, an optional TOML file and
//! `DICOM_RENDER_*` environment variables, then command-line overrides.

use crate::enums::{Orientation, SortBy, StlFormat};
use crate::figure::Heatmap;
use crate::ray_caster::{VolumeProperty, VolumeRayCaster};

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "DICOM_RENDER";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Error loading configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input: InputSettings,
    pub output: OutputSettings,
    pub isosurface: IsosurfaceSettings,
    pub raycast: RayCastSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub dicom_dir: PathBuf,
    pub sort_by: SortBy,
    /// Apply the modality rescale so values are in Hounsfield units.
    pub rescale: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            dicom_dir: PathBuf::from("vhm_head"),
            sort_by: SortBy::default(),
            rescale: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    /// Image file extension; selects the encoder.
    pub image_format: String,
    pub heatmap: Heatmap,
    pub slice_orientation: Orientation,
    pub slice_index: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("figs"),
            image_format: "png".to_string(),
            heatmap: Heatmap::default(),
            slice_orientation: Orientation::Coronal,
            slice_index: 256,
        }
    }
}

impl OutputSettings {
    /// Path of the figure called `name` inside the output directory.
    pub fn figure_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.image_format))
    }
}

/// Camera changes applied before one isosurface snapshot. Unset points keep
/// the camera's previous state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewSettings {
    pub name: String,
    #[serde(default)]
    pub position: Option<[f32; 3]>,
    #[serde(default)]
    pub focal_point: Option<[f32; 3]>,
    #[serde(default = "default_view_angle")]
    pub view_angle: f32,
    #[serde(default)]
    pub roll: f32,
}

fn default_view_angle() -> f32 {
    30.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IsosurfaceSettings {
    /// Values above this become the surface label, everything else 0.
    pub threshold: f32,
    pub label: f32,
    pub width: u32,
    pub height: u32,
    pub background: [f32; 3],
    pub color: [f32; 3],
    pub views: Vec<ViewSettings>,
    pub stl_name: String,
    pub stl_format: StlFormat,
    pub snapshot_name: String,
    pub original_slice_name: String,
    pub thresholded_slice_name: String,
}

impl Default for IsosurfaceSettings {
    fn default() -> Self {
        Self {
            threshold: 400.0,
            label: 1.0,
            width: 480,
            height: 600,
            background: [0.0; 3],
            color: [1.0; 3],
            views: vec![
                ViewSettings {
                    name: "vtk_1".to_string(),
                    position: Some([-500.0, 245.5, 122.0]),
                    focal_point: Some([301.0, 245.5, 122.0]),
                    view_angle: 30.0,
                    roll: -90.0,
                },
                ViewSettings {
                    name: "vtk_2".to_string(),
                    position: Some([301.0, 1045.0, 122.0]),
                    focal_point: None,
                    view_angle: 30.0,
                    roll: 0.0,
                },
            ],
            stl_name: "bones.stl".to_string(),
            stl_format: StlFormat::Binary,
            snapshot_name: "MC".to_string(),
            original_slice_name: "CT_Original".to_string(),
            thresholded_slice_name: "CT_Thresholded".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RayCastSettings {
    pub property: VolumeProperty,
    pub caster: VolumeRayCaster,
    /// Camera position relative to the volume center, in mm.
    pub camera_offset: [f32; 3],
    pub view_up: [f32; 3],
    pub view_angle: f32,
    pub width: u32,
    pub height: u32,
    pub snapshot_name: String,
}

impl Default for RayCastSettings {
    fn default() -> Self {
        Self {
            property: VolumeProperty::default(),
            caster: VolumeRayCaster::default(),
            camera_offset: [600.0, 0.0, 0.0],
            view_up: [0.0, 0.0, -1.0],
            view_angle: 30.0,
            width: 480,
            height: 600,
            snapshot_name: "RC".to_string(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `config_file` (when given) and the process
    /// environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_env(config_file, Self::environment())
    }

    pub(crate) fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub(crate) fn load_with_env(
        config_file: Option<&Path>,
        environment: Environment,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = config_file {
            debug!(path = %path.display(), "reading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: &str| Err(SettingsError::Invalid(msg.to_string()));

        let iso = &self.isosurface;
        if iso.width == 0 || iso.height == 0 {
            return invalid("isosurface image size must be non-zero");
        }
        if iso.views.is_empty() {
            return invalid("at least one isosurface view is required");
        }
        let rc = &self.raycast;
        if rc.width == 0 || rc.height == 0 {
            return invalid("ray-cast image size must be non-zero");
        }
        if rc.caster.sample_distance.is_nan() || rc.caster.sample_distance <= 0.0 {
            return invalid("sample distance must be positive");
        }
        let unit = rc.property.scalar_opacity_unit_distance;
        if unit.is_nan() || unit <= 0.0 {
            return invalid("scalar opacity unit distance must be positive");
        }
        if rc.property.color.is_empty() || rc.property.scalar_opacity.is_empty() {
            return invalid("transfer functions need at least one control point");
        }
        if self.output.image_format.is_empty() {
            return invalid("image format must not be empty");
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn apply_cli(&mut self, args: &CliArgs) -> Result<(), SettingsError> {
        if let Some(dir) = &args.dicom_dir {
            self.input.dicom_dir = dir.clone();
        }
        if let Some(dir) = &args.output_dir {
            self.output.dir = dir.clone();
        }
        if let Some(sort_by) = args.sort_by {
            self.input.sort_by = sort_by;
        }
        if args.rescale {
            self.input.rescale = true;
        }
        match &args.command {
            Some(Command::Isosurface {
                threshold: Some(threshold),
            }) => self.isosurface.threshold = *threshold,
            Some(Command::Raycast {
                sample_distance: Some(distance),
            }) => self.raycast.caster.sample_distance = *distance,
            _ => {}
        }
        self.validate()
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Bone isosurface extraction and volume ray-casting of DICOM CT series"
)]
pub struct CliArgs {
    /// TOML configuration file layered over the built-in defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the DICOM series.
    #[arg(short, long)]
    pub dicom_dir: Option<PathBuf>,

    /// Directory figures, snapshots and meshes are written to.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Slice ordering of the series.
    #[arg(long, value_enum)]
    pub sort_by: Option<SortBy>,

    /// Convert stored values to Hounsfield units using the rescale slope and intercept.
    #[arg(long)]
    pub rescale: bool,

    /// Pipeline to run; both run when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Threshold, extract the bone surface, export STL and snapshots.
    Isosurface {
        /// Values above this are bone.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Direct volume rendering with the configured transfer functions.
    Raycast {
        /// Step along each ray in mm.
        #[arg(long)]
        sample_distance: Option<f32>,
    },
}
