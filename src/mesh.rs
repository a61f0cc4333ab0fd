use crate::enums::StlFormat;

use nalgebra::{Point3, Vector3};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Triangle {triangle} references vertex {vertex} of {count}")]
    InvalidIndex {
        triangle: usize,
        vertex: u32,
        count: usize,
    },
}

/// Indexed triangle mesh in world coordinates (mm).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f32>>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle(&self, index: usize) -> [Point3<f32>; 3] {
        let [a, b, c] = self.triangles[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Axis-aligned bounding box, `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(min, max), v| {
            (min.inf(v), max.sup(v))
        }))
    }

    /// Unit normal following the counter-clockwise winding, zero for
    /// degenerate triangles.
    pub fn face_normal(&self, index: usize) -> Vector3<f32> {
        let [a, b, c] = self.triangle(index);
        (b - a)
            .cross(&(c - a))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector3::zeros)
    }

    /// Area-weighted vertex normals.
    pub fn vertex_normals(&self) -> Vec<Vector3<f32>> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for (i, tri) in self.triangles.iter().enumerate() {
            let [a, b, c] = self.triangle(i);
            let weighted = (b - a).cross(&(c - a));
            for &v in tri {
                normals[v as usize] += weighted;
            }
        }
        normals
            .into_iter()
            .map(|n| n.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros))
            .collect()
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        let count = self.vertices.len();
        for (triangle, tri) in self.triangles.iter().enumerate() {
            if let Some(&vertex) = tri.iter().find(|&&v| v as usize >= count) {
                return Err(MeshError::InvalidIndex {
                    triangle,
                    vertex,
                    count,
                });
            }
        }
        Ok(())
    }

    pub fn write_stl(&self, path: impl AsRef<Path>, format: StlFormat) -> Result<(), MeshError> {
        self.validate()?;
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        match format {
            StlFormat::Binary => {
                let triangles = (0..self.triangle_count()).map(|i| self.stl_triangle(i));
                stl_io::write_stl(&mut writer, triangles)?;
            }
            StlFormat::Ascii => self.write_ascii_stl(&mut writer)?,
        }
        writer.flush()?;
        info!(
            path = %path.display(),
            triangles = self.triangle_count(),
            ?format,
            "wrote STL mesh"
        );
        Ok(())
    }

    pub fn read_stl(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let mut reader = BufReader::new(File::open(path)?);
        let indexed = stl_io::read_stl(&mut reader)?;
        let vertices = indexed
            .vertices
            .iter()
            .map(|v| Point3::new(v[0], v[1], v[2]))
            .collect();
        let triangles = indexed
            .faces
            .iter()
            .map(|face| face.vertices.map(|i| i as u32))
            .collect();
        Ok(Self::new(vertices, triangles))
    }

    fn stl_triangle(&self, index: usize) -> stl_io::Triangle {
        let n = self.face_normal(index);
        let [a, b, c] = self.triangle(index);
        let vertex = |p: Point3<f32>| stl_io::Vertex::new([p.x, p.y, p.z]);
        stl_io::Triangle {
            normal: stl_io::Normal::new([n.x, n.y, n.z]),
            vertices: [vertex(a), vertex(b), vertex(c)],
        }
    }

    fn write_ascii_stl(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(writer, "solid mesh")?;
        for i in 0..self.triangle_count() {
            let n = self.face_normal(i);
            writeln!(writer, "  facet normal {:e} {:e} {:e}", n.x, n.y, n.z)?;
            writeln!(writer, "    outer loop")?;
            for p in self.triangle(i) {
                writeln!(writer, "      vertex {:e} {:e} {:e}", p.x, p.y, p.z)?;
            }
            writeln!(writer, "    endloop")?;
            writeln!(writer, "  endfacet")?;
        }
        writeln!(writer, "endsolid mesh")
    }
}
