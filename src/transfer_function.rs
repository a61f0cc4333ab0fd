//! Piecewise-linear transfer functions mapping voxel values to color and
//! opacity.
//!
//! Control points are kept sorted by value; adding a point at an existing
//! value replaces it. Values outside the covered range take the color or
//! opacity of the nearest end point.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ControlPoint<T> {
    x: f32,
    value: T,
}

fn insert_point<T>(points: &mut Vec<ControlPoint<T>>, x: f32, value: T) {
    match points.binary_search_by(|p| p.x.total_cmp(&x)) {
        Ok(index) => points[index].value = value,
        Err(index) => points.insert(index, ControlPoint { x, value }),
    }
}

/// Locate `x` between two control points and return them with the blend
/// factor, or the single clamping point outside the range.
fn bracket<T: Copy>(points: &[ControlPoint<T>], x: f32) -> Option<(T, T, f32)> {
    let first = points.first()?;
    let last = points.last()?;
    if x <= first.x {
        return Some((first.value, first.value, 0.0));
    }
    if x >= last.x {
        return Some((last.value, last.value, 0.0));
    }
    let upper = points.partition_point(|p| p.x <= x);
    let (a, b) = (&points[upper - 1], &points[upper]);
    let t = (x - a.x) / (b.x - a.x);
    Some((a.value, b.value, t))
}

/// Maps a scalar to an RGB color in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<[f32; 4]>")]
pub struct ColorTransferFunction {
    points: Vec<ControlPoint<[f32; 3]>>,
}

impl ColorTransferFunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rgb_point(&mut self, x: f32, r: f32, g: f32, b: f32) -> &mut Self {
        insert_point(&mut self.points, x, [r, g, b]);
        self
    }

    pub fn remove_all_points(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Covered value range, `None` without control points.
    pub fn range(&self) -> Option<(f32, f32)> {
        Some((self.points.first()?.x, self.points.last()?.x))
    }

    /// Black when no control point is set.
    pub fn evaluate(&self, x: f32) -> [f32; 3] {
        match bracket(&self.points, x) {
            Some((a, b, t)) => [0, 1, 2].map(|i| a[i] + (b[i] - a[i]) * t),
            None => [0.0; 3],
        }
    }
}

impl From<Vec<[f32; 4]>> for ColorTransferFunction {
    fn from(points: Vec<[f32; 4]>) -> Self {
        let mut function = Self::new();
        for [x, r, g, b] in points {
            function.add_rgb_point(x, r, g, b);
        }
        function
    }
}

/// Maps a scalar to a single value, typically an opacity in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<[f32; 2]>")]
pub struct PiecewiseFunction {
    points: Vec<ControlPoint<f32>>,
}

impl PiecewiseFunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, x: f32, y: f32) -> &mut Self {
        insert_point(&mut self.points, x, y);
        self
    }

    pub fn remove_all_points(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn range(&self) -> Option<(f32, f32)> {
        Some((self.points.first()?.x, self.points.last()?.x))
    }

    /// Zero when no control point is set.
    pub fn evaluate(&self, x: f32) -> f32 {
        match bracket(&self.points, x) {
            Some((a, b, t)) => a + (b - a) * t,
            None => 0.0,
        }
    }
}

impl From<Vec<[f32; 2]>> for PiecewiseFunction {
    fn from(points: Vec<[f32; 2]>) -> Self {
        let mut function = Self::new();
        for [x, y] in points {
            function.add_point(x, y);
        }
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_color() -> ColorTransferFunction {
        let mut color = ColorTransferFunction::new();
        color
            .add_rgb_point(0.0, 0.0, 0.0, 0.0)
            .add_rgb_point(500.0, 1.0, 0.5, 0.3)
            .add_rgb_point(1000.0, 1.0, 0.5, 0.3)
            .add_rgb_point(1150.0, 1.0, 1.0, 0.9);
        color
    }

    #[test]
    fn color_interpolates_between_points() {
        let color = head_color();
        let [r, g, b] = color.evaluate(250.0);
        assert!((r - 0.5).abs() < 1e-6 && (g - 0.25).abs() < 1e-6 && (b - 0.15).abs() < 1e-6);
        assert_eq!(color.evaluate(750.0), [1.0, 0.5, 0.3]);
    }

    #[test]
    fn color_clamps_outside_range() {
        let color = head_color();
        assert_eq!(color.evaluate(-1000.0), [0.0, 0.0, 0.0]);
        assert_eq!(color.evaluate(4000.0), [1.0, 1.0, 0.9]);
        assert_eq!(color.range(), Some((0.0, 1150.0)));
    }

    #[test]
    fn points_stay_sorted_and_replace_duplicates() {
        let mut opacity = PiecewiseFunction::new();
        opacity.add_point(1150.0, 0.85).add_point(0.0, 0.0).add_point(500.0, 0.15);
        opacity.add_point(500.0, 0.2);
        assert_eq!(opacity.len(), 3);
        assert!((opacity.evaluate(250.0) - 0.1).abs() < 1e-6);
        assert!((opacity.evaluate(1075.0) - 0.775).abs() < 1e-5);
    }

    #[test]
    fn empty_functions_are_black_and_transparent() {
        assert_eq!(ColorTransferFunction::new().evaluate(10.0), [0.0; 3]);
        assert_eq!(PiecewiseFunction::new().evaluate(10.0), 0.0);
        assert!(PiecewiseFunction::new().range().is_none());
    }

    #[test]
    fn built_from_control_point_lists() {
        let opacity = PiecewiseFunction::from(vec![[100.0, 1.0], [0.0, 0.0], [90.0, 0.5]]);
        assert_eq!(opacity.range(), Some((0.0, 100.0)));
        assert!((opacity.evaluate(95.0) - 0.75).abs() < 1e-6);

        let color = ColorTransferFunction::from(vec![[0.0, 0.0, 0.0, 0.0], [10.0, 1.0, 1.0, 1.0]]);
        assert_eq!(color.evaluate(5.0), [0.5, 0.5, 0.5]);
    }
}
