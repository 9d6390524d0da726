use crate::camera::Camera;
use macroquad::prelude::*;
use shared::{GameState, TICK_RATE};

/// EXAMPLE: zoom factor derived from the server tick
pub fn zoom_for_tick(tick: u64) -> f32 {
    (tick as f64 / TICK_RATE).sin() as f32
}

pub struct Renderer {
    camera: Camera,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            camera: Camera::new(),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.camera.resize(width, height);
    }

    pub fn render(&mut self, state: &GameState) {
        self.camera.set_zoom(zoom_for_tick(state.current_tick));

        // EXAMPLE: white background
        clear_background(WHITE);

        // EXAMPLE: red unit-sized square
        self.draw_quad(Vec2::new(-0.5, -0.5), Vec2::new(1.0, 1.0), RED);
    }

    fn draw_quad(&mut self, origin: Vec2, size: Vec2, color: Color) {
        let a = self.camera.world_to_viewport(origin);
        let b = self.camera.world_to_viewport(origin + Vec2::new(size.x, 0.0));
        let c = self.camera.world_to_viewport(origin + size);
        let d = self.camera.world_to_viewport(origin + Vec2::new(0.0, size.y));

        draw_triangle(a, b, c, color);
        draw_triangle(a, c, d, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_zoom_starts_at_zero() {
        assert_approx_eq!(zoom_for_tick(0), 0.0);
    }

    #[test]
    fn test_zoom_follows_sine_of_seconds() {
        let tick = (TICK_RATE * std::f64::consts::FRAC_PI_2).round() as u64;
        assert_approx_eq!(zoom_for_tick(tick), 1.0, 1e-3);
        assert_approx_eq!(zoom_for_tick(60), 1.0f64.sin() as f32);
    }

    #[test]
    fn test_resize_updates_camera() {
        let mut renderer = Renderer::new();
        renderer.resize(640.0, 480.0);
        assert_eq!(renderer.camera().width(), 640.0);
        assert_eq!(renderer.camera().height(), 480.0);
    }
}
