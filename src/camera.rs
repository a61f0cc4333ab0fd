use nalgebra::{Isometry3, Perspective3, Point3, Rotation3, Unit, Vector3};

const DEGENERATE_EPSILON: f32 = 1e-6;

/// Perspective camera described by an eye position, a focal point and a
/// view-up vector, with a vertical view angle in degrees.
///
/// The view-up vector is kept orthogonal to the direction of projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Point3<f32>,
    focal_point: Point3<f32>,
    view_up: Vector3<f32>,
    view_angle: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 1.0),
            focal_point: Point3::origin(),
            view_up: Vector3::y(),
            view_angle: 30.0,
        }
    }
}

impl Camera {
    pub fn new(position: Point3<f32>, focal_point: Point3<f32>, view_up: Vector3<f32>) -> Self {
        let mut camera = Self {
            position,
            focal_point,
            view_up,
            ..Self::default()
        };
        camera.orthogonalize_view_up();
        camera
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn focal_point(&self) -> Point3<f32> {
        self.focal_point
    }

    pub fn view_up(&self) -> Vector3<f32> {
        self.view_up
    }

    pub fn view_angle(&self) -> f32 {
        self.view_angle
    }

    pub fn set_position(&mut self, position: Point3<f32>) {
        self.position = position;
        self.orthogonalize_view_up();
    }

    pub fn set_focal_point(&mut self, focal_point: Point3<f32>) {
        self.focal_point = focal_point;
        self.orthogonalize_view_up();
    }

    pub fn set_view_up(&mut self, view_up: Vector3<f32>) {
        self.view_up = view_up;
        self.orthogonalize_view_up();
    }

    pub fn set_view_angle(&mut self, degrees: f32) {
        self.view_angle = degrees.clamp(1e-6, 179.0);
    }

    pub fn distance(&self) -> f32 {
        (self.focal_point - self.position).norm()
    }

    /// Unit vector from the position towards the focal point.
    pub fn direction_of_projection(&self) -> Vector3<f32> {
        (self.focal_point - self.position)
            .try_normalize(DEGENERATE_EPSILON)
            .unwrap_or_else(|| -Vector3::z())
    }

    /// Rotate the view-up vector about the direction of projection.
    pub fn roll(&mut self, degrees: f32) {
        let axis = Unit::new_normalize(self.direction_of_projection());
        let rotation = Rotation3::from_axis_angle(&axis, degrees.to_radians());
        self.view_up = rotation * self.view_up;
        self.orthogonalize_view_up();
    }

    /// Set the absolute roll angle.
    ///
    /// Zero roll keeps world +Y pointing up on screen. When looking along the
    /// Y axis the current view-up is the zero reference instead.
    pub fn set_roll(&mut self, degrees: f32) {
        let dop = self.direction_of_projection();
        let reference = Vector3::y() - dop * dop.y;
        if let Some(reference) = reference.try_normalize(1e-4) {
            self.view_up = reference;
        }
        self.roll(degrees);
    }

    /// Current roll angle in degrees, as understood by [`Camera::set_roll`].
    pub fn get_roll(&self) -> f32 {
        let dop = self.direction_of_projection();
        let Some(reference) = (Vector3::y() - dop * dop.y).try_normalize(1e-4) else {
            return 0.0;
        };
        let sin = reference.cross(&self.view_up).dot(&dop);
        let cos = reference.dot(&self.view_up);
        sin.atan2(cos).to_degrees()
    }

    /// Right-handed camera frame: right, up and direction of projection.
    pub fn basis(&self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let forward = self.direction_of_projection();
        let right = forward
            .cross(&self.view_up)
            .try_normalize(DEGENERATE_EPSILON)
            .unwrap_or_else(|| any_perpendicular(&forward));
        let up = right.cross(&forward);
        (right, up, forward)
    }

    /// World to camera transform; the camera looks down its -Z axis.
    pub fn view_matrix(&self) -> Isometry3<f32> {
        let (_, up, _) = self.basis();
        Isometry3::look_at_rh(&self.position, &self.focal_point, &up)
    }

    pub fn projection_matrix(&self, aspect: f32, near: f32, far: f32) -> Perspective3<f32> {
        Perspective3::new(aspect, self.view_angle.to_radians(), near, far)
    }

    /// Near and far distances enclosing an axis-aligned box.
    pub fn clipping_range(&self, bounds: &(Point3<f32>, Point3<f32>)) -> (f32, f32) {
        let (min, max) = bounds;
        let center = nalgebra::center(min, max);
        let radius = (max - min).norm() * 0.5;
        let depth = (center - self.position).dot(&self.direction_of_projection());
        let far = (depth + radius).max(1e-3);
        let near = (depth - radius).max(far * 1e-3);
        (near, far)
    }

    /// Primary ray through the center of pixel `(px, py)`; row 0 is the top.
    pub fn ray(&self, px: u32, py: u32, width: u32, height: u32) -> (Point3<f32>, Vector3<f32>) {
        let (right, up, forward) = self.basis();
        let tan = (self.view_angle.to_radians() * 0.5).tan();
        let aspect = width as f32 / height as f32;
        let sx = (2.0 * (px as f32 + 0.5) / width as f32 - 1.0) * tan * aspect;
        let sy = (1.0 - 2.0 * (py as f32 + 0.5) / height as f32) * tan;
        let direction = (forward + right * sx + up * sy).normalize();
        (self.position, direction)
    }

    fn orthogonalize_view_up(&mut self) {
        let dop = self.direction_of_projection();
        let up = self.view_up - dop * self.view_up.dot(&dop);
        self.view_up = up
            .try_normalize(DEGENERATE_EPSILON)
            .unwrap_or_else(|| any_perpendicular(&dop));
    }
}

fn any_perpendicular(v: &Vector3<f32>) -> Vector3<f32> {
    let helper = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&helper).normalize()
}
