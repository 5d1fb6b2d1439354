use glam::{DMat4, DVec3, DVec4};
use specfit_image::ImageSize;

use crate::error::FitError;

/// Perspective projection of a calibrated camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians.
    pub vertical_fov: f64,
    /// Near clipping distance.
    pub near: f64,
    /// Far clipping distance.
    pub far: f64,
}

impl Projection {
    /// Create a projection, ordering the clipping planes.
    pub fn new(vertical_fov: f64, near: f64, far: f64) -> Self {
        Self {
            vertical_fov,
            near: near.min(far),
            far: far.max(near),
        }
    }
}

/// A point projected into a view's image plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    /// Horizontal pixel coordinate, `0` at the left edge.
    pub x: f64,
    /// Vertical pixel coordinate, `0` at the top edge.
    pub y: f64,
    /// Distance along the optical axis.
    pub depth: f64,
}

/// One calibrated camera pose.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    /// Rigid transform from world to camera coordinates; the camera looks down −Z.
    pub world_to_camera: DMat4,
    /// Perspective projection.
    pub projection: Projection,
    /// Size of the photograph taken from this pose.
    pub image_size: ImageSize,
    /// Index of the light active in this view.
    pub light_index: usize,
}

impl View {
    /// Camera to world transform.
    pub fn camera_to_world(&self) -> DMat4 {
        self.world_to_camera.inverse()
    }

    /// Camera center in world coordinates.
    pub fn camera_position(&self) -> DVec3 {
        self.camera_to_world().transform_point3(DVec3::ZERO)
    }

    /// Project a world point to pixel coordinates.
    ///
    /// Returns `None` for points outside the viewing frustum.
    pub fn project(&self, world: DVec3) -> Option<Projected> {
        let cam = self.world_to_camera * DVec4::new(world.x, world.y, world.z, 1.0);
        let depth = -cam.z;
        if !(depth > self.projection.near && depth < self.projection.far) {
            return None;
        }

        let f = 1.0 / (0.5 * self.projection.vertical_fov).tan();
        let aspect = self.image_size.width as f64 / self.image_size.height as f64;
        let ndc_x = f * cam.x / (aspect * depth);
        let ndc_y = f * cam.y / depth;
        if ndc_x.abs() > 1.0 || ndc_y.abs() > 1.0 {
            return None;
        }

        Some(Projected {
            x: 0.5 * (ndc_x + 1.0) * self.image_size.width as f64,
            y: 0.5 * (1.0 - ndc_y) * self.image_size.height as f64,
            depth,
        })
    }
}

/// A point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Position in the coordinates of the camera it is attached to.
    pub position: DVec3,
    /// Linear RGB intensity.
    pub intensity: DVec3,
}

impl Light {
    /// A light co-located with the camera.
    pub fn flash(intensity: DVec3) -> Self {
        Self {
            position: DVec3::ZERO,
            intensity,
        }
    }
}

/// Ordered collection of calibrated views and the lights they use.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSet {
    views: Vec<View>,
    lights: Vec<Light>,
    primary_view: usize,
}

impl ViewSet {
    /// Build a view set, checking every light index and the primary view.
    pub fn new(
        views: Vec<View>,
        lights: Vec<Light>,
        primary_view: usize,
    ) -> Result<Self, FitError> {
        if let Some(view) = views.iter().find(|v| v.light_index >= lights.len()) {
            return Err(FitError::CountMismatch {
                stage: "view set",
                what: "lights",
                expected: view.light_index + 1,
                actual: lights.len(),
            });
        }
        if !views.is_empty() && primary_view >= views.len() {
            return Err(FitError::CountMismatch {
                stage: "view set",
                what: "views before the primary view",
                expected: primary_view + 1,
                actual: views.len(),
            });
        }
        Ok(Self {
            views,
            lights,
            primary_view,
        })
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// `true` when there are no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// All views in order.
    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// The view at `index`.
    pub fn view(&self, index: usize) -> Option<&View> {
        self.views.get(index)
    }

    /// Index of the representative view used for single-view reconstruction.
    pub fn primary_view(&self) -> usize {
        self.primary_view
    }

    /// World position of the light used by the view at `index`.
    pub fn light_world_position(&self, index: usize) -> Option<DVec3> {
        let view = self.views.get(index)?;
        let light = self.lights.get(view.light_index)?;
        Some(view.camera_to_world().transform_point3(light.position))
    }

    /// RGB intensity of the light used by the view at `index`.
    pub fn light_intensity(&self, index: usize) -> Option<DVec3> {
        let view = self.views.get(index)?;
        self.lights.get(view.light_index).map(|l| l.intensity)
    }
}
