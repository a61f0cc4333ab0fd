use crate::volume::Volume;

use rayon::prelude::*;

/// Which voxel values count as "in" for an [`ImageThreshold`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdRange {
    /// `value <= lower`
    ByLower { lower: f32 },
    /// `value >= upper`
    ByUpper { upper: f32 },
    /// `lower <= value <= upper`
    Between { lower: f32, upper: f32 },
}

impl ThresholdRange {
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        match *self {
            ThresholdRange::ByLower { lower } => value <= lower,
            ThresholdRange::ByUpper { upper } => value >= upper,
            ThresholdRange::Between { lower, upper } => value >= lower && value <= upper,
        }
    }
}

/// Voxel-wise threshold filter.
///
/// Values inside the range are replaced by `in_value`, values outside by
/// `out_value`; a `None` replacement keeps the original value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageThreshold {
    pub range: ThresholdRange,
    pub in_value: Option<f32>,
    pub out_value: Option<f32>,
}

impl ImageThreshold {
    pub fn new(range: ThresholdRange) -> Self {
        Self {
            range,
            in_value: None,
            out_value: None,
        }
    }

    /// Binary mask: 0 for values `<= lower`, 1 above.
    pub fn binary_above(lower: f32) -> Self {
        Self::new(ThresholdRange::ByLower { lower })
            .replace_in(0.0)
            .replace_out(1.0)
    }

    pub fn replace_in(mut self, value: f32) -> Self {
        self.in_value = Some(value);
        self
    }

    pub fn replace_out(mut self, value: f32) -> Self {
        self.out_value = Some(value);
        self
    }

    #[inline]
    fn map(&self, value: f32) -> f32 {
        let replacement = if self.range.contains(value) {
            self.in_value
        } else {
            self.out_value
        };
        replacement.unwrap_or(value)
    }

    pub fn apply(&self, volume: &Volume) -> Volume {
        let mut data = volume.data().clone();
        data.par_mapv_inplace(|v| self.map(v));
        Volume::new(data, volume.spacing())
    }

    /// Number of voxels that fall inside the range.
    pub fn count_in(&self, volume: &Volume) -> usize {
        volume
            .data()
            .par_iter()
            .filter(|&&v| self.range.contains(v))
            .count()
    }
}
