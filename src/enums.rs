use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Sampling used when a value is needed between voxel centers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Encoding used by the STL writer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StlFormat {
    #[default]
    Binary,
    Ascii,
}

/// How samples along a ray are combined into a pixel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Front-to-back alpha compositing
    #[default]
    Composite,
    MaximumIntensity,
}
