use crate::camera::Camera;
use crate::mesh::Mesh;

use image::{ImageBuffer, RgbImage};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

/// Screen position in pixels plus normalized depth.
type ScreenVertex = [f32; 3];

/// Z-buffered triangle renderer lit by a headlight at the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRenderer {
    pub background: [f32; 3],
    pub color: [f32; 3],
    pub ambient: f32,
    pub diffuse: f32,
}

impl Default for MeshRenderer {
    fn default() -> Self {
        Self {
            background: [0.0; 3],
            color: [1.0; 3],
            ambient: 0.0,
            diffuse: 1.0,
        }
    }
}

impl MeshRenderer {
    pub fn render(&self, mesh: &Mesh, camera: &Camera, width: u32, height: u32) -> RgbImage {
        let (w, h) = (width as usize, height as usize);
        let mut depth = vec![f32::INFINITY; w * h];
        let mut color = vec![self.background; w * h];

        if let Some(bounds) = mesh.bounds() {
            let (near, far) = camera.clipping_range(&bounds);
            let view = camera.view_matrix();
            let projection = camera.projection_matrix(width as f32 / height as f32, near, far);

            let eye_space: Vec<Point3<f32>> = mesh
                .vertices
                .par_iter()
                .map(|v| view.transform_point(v))
                .collect();
            let screen: Vec<Option<ScreenVertex>> = eye_space
                .par_iter()
                .map(|p| {
                    if -p.z < near {
                        return None;
                    }
                    let ndc = projection.project_point(p);
                    Some([
                        (ndc.x + 1.0) * 0.5 * width as f32,
                        (1.0 - ndc.y) * 0.5 * height as f32,
                        ndc.z,
                    ])
                })
                .collect();

            let shades: Vec<[f32; 3]> = mesh
                .triangles
                .par_iter()
                .map(|&[a, b, c]| {
                    let (pa, pb, pc) = (
                        eye_space[a as usize],
                        eye_space[b as usize],
                        eye_space[c as usize],
                    );
                    let normal = (pb - pa)
                        .cross(&(pc - pa))
                        .try_normalize(f32::EPSILON)
                        .unwrap_or_else(Vector3::zeros);
                    // headlight shines down the view axis; lit from both sides
                    let intensity = self.ambient + self.diffuse * normal.z.abs();
                    self.color.map(|c| (c * intensity).clamp(0.0, 1.0))
                })
                .collect();

            let mut culled = 0usize;
            for (tri, shade) in mesh.triangles.iter().zip(&shades) {
                let vertices = tri.map(|v| screen[v as usize]);
                let [Some(v0), Some(v1), Some(v2)] = vertices else {
                    culled += 1;
                    continue;
                };
                Self::fill_triangle([v0, v1, v2], *shade, w, h, &mut depth, &mut color);
            }
            debug!(
                triangles = mesh.triangle_count(),
                culled, near, far, "rasterized mesh"
            );
        }

        let pixels: Vec<u8> = color
            .into_iter()
            .flat_map(|rgb| rgb.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect();
        ImageBuffer::from_raw(width, height, pixels)
            .expect("pixel buffer matches image dimensions")
    }

    fn fill_triangle(
        [v0, v1, v2]: [ScreenVertex; 3],
        shade: [f32; 3],
        width: usize,
        height: usize,
        depth: &mut [f32],
        color: &mut [[f32; 3]],
    ) {
        let edge = |a: &ScreenVertex, b: &ScreenVertex, x: f32, y: f32| {
            (b[0] - a[0]) * (y - a[1]) - (b[1] - a[1]) * (x - a[0])
        };
        let area = edge(&v0, &v1, v2[0], v2[1]);
        if area.abs() < f32::EPSILON {
            return;
        }

        let min_x = v0[0].min(v1[0]).min(v2[0]).floor().max(0.0) as usize;
        let min_y = v0[1].min(v1[1]).min(v2[1]).floor().max(0.0) as usize;
        let max_x = (v0[0].max(v1[0]).max(v2[0]).ceil().max(0.0) as usize).min(width);
        let max_y = (v0[1].max(v1[1]).max(v2[1]).ceil().max(0.0) as usize).min(height);

        for py in min_y..max_y {
            for px in min_x..max_x {
                let (x, y) = (px as f32 + 0.5, py as f32 + 0.5);
                let w0 = edge(&v1, &v2, x, y) / area;
                let w1 = edge(&v2, &v0, x, y) / area;
                let w2 = edge(&v0, &v1, x, y) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * v0[2] + w1 * v1[2] + w2 * v2[2];
                let index = py * width + px;
                if z < depth[index] {
                    depth[index] = z;
                    color[index] = shade;
                }
            }
        }
    }
}
