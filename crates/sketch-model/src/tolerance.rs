/// Tolerances for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Points closer than this are considered coincident.
    pub coincidence: f64,
    /// Distance band within which a line touching a circle counts as tangent.
    pub tangency: f64,
    /// Angles smaller than this (radians) are considered zero.
    pub angular: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            coincidence: 1e-6,
            tangency: 1e-9,
            angular: 1e-10,
        }
    }
}

impl Tolerance {
    pub fn points_coincident(&self, a: &nalgebra::Vector2<f64>, b: &nalgebra::Vector2<f64>) -> bool {
        (a - b).norm() < self.coincidence
    }

    pub fn is_zero_length(&self, length: f64) -> bool {
        length.abs() < self.coincidence
    }

    pub fn is_zero_angle(&self, angle: f64) -> bool {
        angle.abs() < self.angular
    }
}

/// Default tolerance used across the workspace.
pub fn default_tolerance() -> Tolerance {
    Tolerance::default()
}
