//! Discrete label-surface extraction.
//!
//! The boundary between voxels carrying a label and all other voxels is
//! extracted with boolean surface nets: every lattice cell whose eight
//! corner voxels disagree gets one vertex at the mean of its sign-changing
//! edge midpoints, and every sign-changing lattice edge emits one quad
//! joining the four cells around it. The lattice is padded with one layer
//! of outside voxels so labels touching the volume border still produce a
//! closed surface.

use crate::mesh::Mesh;
use crate::volume::Volume;

use nalgebra::Point3;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::info;
use web_time::Instant;

const CORNER_OFFSETS: [(i64, i64, i64); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (1, 1, 0),
    (0, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (1, 1, 1),
    (0, 1, 1),
];

const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Voxel occupancy on the padded lattice; corner coordinates run from -1 to
/// the axis length inclusive.
struct Lattice {
    width: i64,
    height: i64,
    depth: i64,
    inside: Vec<bool>,
}

impl Lattice {
    fn new(volume: &Volume, label: f32) -> Self {
        let (depth, height, width) = volume.dim();
        let (depth, height, width) = (depth as i64, height as i64, width as i64);
        let data = volume.data();
        let (pw, ph, pd) = (width + 2, height + 2, depth + 2);

        let inside = (0..pw * ph * pd)
            .into_par_iter()
            .map(|linear| {
                let x = linear % pw - 1;
                let y = (linear / pw) % ph - 1;
                let z = linear / (pw * ph) - 1;
                let in_range =
                    (0..width).contains(&x) && (0..height).contains(&y) && (0..depth).contains(&z);
                in_range && (data[[z as usize, y as usize, x as usize]] - label).abs() < 0.5
            })
            .collect();

        Self {
            width,
            height,
            depth,
            inside,
        }
    }

    #[inline]
    fn is_inside(&self, x: i64, y: i64, z: i64) -> bool {
        let (pw, ph) = (self.width + 2, self.height + 2);
        self.inside[(((z + 1) * ph + (y + 1)) * pw + (x + 1)) as usize]
    }

    /// Linear index of the cell whose lowest corner is `(x, y, z)`.
    #[inline]
    fn cell_index(&self, x: i64, y: i64, z: i64) -> i64 {
        let (cw, ch) = (self.width + 1, self.height + 1);
        ((z + 1) * ch + (y + 1)) * cw + (x + 1)
    }
}

/// Extracts the surface enclosing all voxels equal to `label`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceExtractor {
    pub label: f32,
}

impl SurfaceExtractor {
    pub fn new(label: f32) -> Self {
        Self { label }
    }

    /// Triangles are wound counter-clockwise seen from outside the label.
    pub fn extract(&self, volume: &Volume) -> Mesh {
        let start = Instant::now();
        let lattice = Lattice::new(volume, self.label);
        let (sx, sy, sz) = volume.spacing();

        let mut vertices = Vec::new();
        let mut cell_vertex: HashMap<i64, u32> = HashMap::new();

        for z in -1..lattice.depth {
            for y in -1..lattice.height {
                for x in -1..lattice.width {
                    let corners =
                        CORNER_OFFSETS.map(|(dx, dy, dz)| lattice.is_inside(x + dx, y + dy, z + dz));
                    if corners.iter().all(|&c| c) || corners.iter().all(|&c| !c) {
                        continue;
                    }

                    let (mut acc, mut n) = ([0.0f32; 3], 0u32);
                    for (a, b) in CUBE_EDGES {
                        if corners[a] == corners[b] {
                            continue;
                        }
                        let (ax, ay, az) = CORNER_OFFSETS[a];
                        let (bx, by, bz) = CORNER_OFFSETS[b];
                        acc[0] += x as f32 + (ax + bx) as f32 * 0.5;
                        acc[1] += y as f32 + (ay + by) as f32 * 0.5;
                        acc[2] += z as f32 + (az + bz) as f32 * 0.5;
                        n += 1;
                    }

                    let n = n as f32;
                    cell_vertex.insert(lattice.cell_index(x, y, z), vertices.len() as u32);
                    vertices.push(Point3::new(
                        acc[0] / n * sx,
                        acc[1] / n * sy,
                        acc[2] / n * sz,
                    ));
                }
            }
        }

        let mut triangles = Vec::new();
        let cell = |x: i64, y: i64, z: i64| cell_vertex.get(&lattice.cell_index(x, y, z)).copied();
        let mut emit = |quad: [Option<u32>; 4], flip: bool| {
            if let [Some(q0), Some(q1), Some(q2), Some(q3)] = quad {
                let [q0, q1, q2, q3] = if flip { [q0, q3, q2, q1] } else { [q0, q1, q2, q3] };
                triangles.push([q0, q1, q2]);
                triangles.push([q0, q2, q3]);
            }
        };

        for z in 0..lattice.depth {
            for y in 0..lattice.height {
                for x in -1..lattice.width {
                    let a = lattice.is_inside(x, y, z);
                    if a == lattice.is_inside(x + 1, y, z) {
                        continue;
                    }
                    let quad = [
                        cell(x, y - 1, z - 1),
                        cell(x, y, z - 1),
                        cell(x, y, z),
                        cell(x, y - 1, z),
                    ];
                    // listed order faces +x
                    emit(quad, !a);
                }
            }
        }

        for z in 0..lattice.depth {
            for y in -1..lattice.height {
                for x in 0..lattice.width {
                    let a = lattice.is_inside(x, y, z);
                    if a == lattice.is_inside(x, y + 1, z) {
                        continue;
                    }
                    let quad = [
                        cell(x - 1, y, z - 1),
                        cell(x, y, z - 1),
                        cell(x, y, z),
                        cell(x - 1, y, z),
                    ];
                    // listed order faces -y
                    emit(quad, a);
                }
            }
        }

        for z in -1..lattice.depth {
            for y in 0..lattice.height {
                for x in 0..lattice.width {
                    let a = lattice.is_inside(x, y, z);
                    if a == lattice.is_inside(x, y, z + 1) {
                        continue;
                    }
                    let quad = [
                        cell(x - 1, y - 1, z),
                        cell(x, y - 1, z),
                        cell(x, y, z),
                        cell(x - 1, y, z),
                    ];
                    // listed order faces +z
                    emit(quad, !a);
                }
            }
        }

        let mesh = Mesh::new(vertices, triangles);
        info!(
            label = self.label,
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extracted label surface"
        );
        mesh
    }
}
