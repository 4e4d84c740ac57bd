//! Transformation matrix and graphics state tracked by the interpreter.
//!
//! Only the state that matters for image discovery is kept: the current
//! transformation matrix (for DPI estimation), the fill/stroke paint (for
//! pattern resolution) and the text rendering mode.

use lopdf::Object;

/// 2D transformation matrix [a, b, c, d, e, f]
/// Represents: | a b 0 |
///             | c d 0 |
///             | e f 1 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub fn identity() -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    /// Concatenate another matrix: self * other
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Horizontal scale factor of the transform.
    pub fn scale_x(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Vertical scale factor of the transform.
    pub fn scale_y(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    /// Build a matrix from six numeric content-stream operands.
    pub fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() < 6 {
            return None;
        }
        let n = |obj: &Object| -> Option<f32> {
            match obj {
                Object::Integer(v) => Some(*v as f32),
                Object::Real(v) => Some(*v),
                _ => None,
            }
        };
        Some(Matrix {
            a: n(&operands[0])?,
            b: n(&operands[1])?,
            c: n(&operands[2])?,
            d: n(&operands[3])?,
            e: n(&operands[4])?,
            f: n(&operands[5])?,
        })
    }
}

/// Fill or stroke paint. Discovery only cares whether the active color space
/// is a pattern space and which pattern was last selected by `scn`/`SCN`.
#[derive(Debug, Clone, Default)]
pub struct Paint {
    pub is_pattern_space: bool,
    pub pattern_name: Option<Vec<u8>>,
}

impl Paint {
    pub fn device() -> Self {
        Paint::default()
    }

    pub fn pattern_space() -> Self {
        Paint {
            is_pattern_space: true,
            pattern_name: None,
        }
    }
}

/// Mutable, stack-scoped graphics state. One live instance per content-stream
/// traversal; sub-streams (forms, patterns, mask groups) get a derived copy so
/// their mutations never leak into the parent.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill: Paint,
    pub stroke: Paint,
    pub text_render_mode: i64,
}

impl GraphicsState {
    pub fn new(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            fill: Paint::device(),
            stroke: Paint::device(),
            text_render_mode: 0,
        }
    }

    /// Fresh state for a nested content stream, inheriting only the
    /// transform context.
    pub fn derive(&self, matrix: &Matrix) -> Self {
        GraphicsState::new(self.ctm.concat(matrix))
    }

    pub fn text_mode_fills(&self) -> bool {
        matches!(self.text_render_mode, 0 | 2 | 4 | 6)
    }

    pub fn text_mode_strokes(&self) -> bool {
        matches!(self.text_render_mode, 1 | 2 | 5 | 6)
    }
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState::new(Matrix::identity())
    }
}
