use macroquad::math::{Mat3, Vec2};

/// World to viewport transform.
///
/// The world origin sits at the centre of the viewport and one world unit
/// spans `height * zoom` pixels. The matrix is rebuilt lazily after any
/// parameter changes.
#[derive(Debug, Clone)]
pub struct Camera {
    /// World position shifted to the viewport centre
    pos_x: f32,
    pos_y: f32,
    /// Viewport heights per world unit
    zoom: f32,
    /// Viewport size in pixels
    width: f32,
    height: f32,

    /// Last built transform, valid while `dirty` is false
    matrix: Mat3,
    dirty: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    pub fn new() -> Self {
        Self {
            pos_x: 0.0,
            pos_y: 0.0,
            zoom: 1.0,
            width: 1.0,
            height: 1.0,
            matrix: Mat3::IDENTITY,
            dirty: true,
        }
    }

    pub fn pos_x(&self) -> f32 {
        self.pos_x
    }

    pub fn set_pos_x(&mut self, value: f32) {
        self.pos_x = value;
        self.dirty = true;
    }

    pub fn pos_y(&self) -> f32 {
        self.pos_y
    }

    pub fn set_pos_y(&mut self, value: f32) {
        self.pos_y = value;
        self.dirty = true;
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, value: f32) {
        self.zoom = value;
        self.dirty = true;
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, value: f32) {
        self.width = value;
        self.dirty = true;
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn set_height(&mut self, value: f32) {
        self.height = value;
        self.dirty = true;
    }

    /// Updates the viewport size, leaving the cache intact if nothing changed
    pub fn resize(&mut self, width: f32, height: f32) {
        if self.width != width {
            self.set_width(width);
        }
        if self.height != height {
            self.set_height(height);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn matrix(&mut self) -> Mat3 {
        if self.dirty {
            let scale = self.height * self.zoom;
            self.matrix = Mat3::from_translation(Vec2::new(self.width * 0.5, self.height * 0.5))
                * Mat3::from_scale(Vec2::splat(scale))
                * Mat3::from_translation(Vec2::new(self.pos_x, self.pos_y));
            self.dirty = false;
        }
        self.matrix
    }

    pub fn world_to_viewport(&mut self, point: Vec2) -> Vec2 {
        self.matrix().transform_point2(point)
    }
}
