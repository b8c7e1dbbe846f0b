//! Board object model: the shape entities placed on a whiteboard canvas.
//!
//! Every object on a board is one of five kinds — rectangle, ellipse,
//! text, sticky note, or freehand path — represented as the tagged
//! [`Shape`] sum type so that mutation and rendering code can match
//! exhaustively instead of dispatching on a stringly-typed `type` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Hard ceiling on objects per board, enforced on both ends:
/// the client refuses to emit a create intent past it, and the
/// server drops create requests past it without a broadcast.
pub const MAX_OBJECTS_PER_BOARD: usize = 50;

// ───────────────────────────────────────────────────────────────────
// Geometry primitives
// ───────────────────────────────────────────────────────────────────

/// 2D position in board (world) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::ORIGIN
    }
}

/// RGB fill color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Fill {
    pub const BLACK: Fill = Fill { r: 0, g: 0, b: 0 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Fill {
    fn default() -> Self {
        Self::BLACK
    }
}

// ───────────────────────────────────────────────────────────────────
// Shapes
// ───────────────────────────────────────────────────────────────────

/// Kind and geometry of one board object.
///
/// Each variant carries only the fields its kind needs. Geometry is
/// validated at creation time: all coordinates must be finite, and a
/// path below two points is degenerate and rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Rectangle { x: f64, y: f64, width: f64, height: f64 },
    Ellipse { x: f64, y: f64, width: f64, height: f64 },
    Note { x: f64, y: f64, width: f64, height: f64 },
    Text { x: f64, y: f64, width: f64, height: f64, value: String },
    Path { x: f64, y: f64, points: Vec<Point> },
}

/// Shape validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("geometry fields must be finite")]
    NonFiniteGeometry,
    #[error("path requires at least 2 points, got {0}")]
    DegeneratePath(usize),
}

impl Shape {
    /// Kind tag for logging and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Rectangle { .. } => "rectangle",
            Shape::Ellipse { .. } => "ellipse",
            Shape::Note { .. } => "note",
            Shape::Text { .. } => "text",
            Shape::Path { .. } => "path",
        }
    }

    /// Top-left anchor of the shape.
    pub fn origin(&self) -> Point {
        match self {
            Shape::Rectangle { x, y, .. }
            | Shape::Ellipse { x, y, .. }
            | Shape::Note { x, y, .. }
            | Shape::Text { x, y, .. }
            | Shape::Path { x, y, .. } => Point::new(*x, *y),
        }
    }

    /// Check the creation-time geometry invariants.
    pub fn validate(&self) -> Result<(), ShapeError> {
        match self {
            Shape::Rectangle { x, y, width, height }
            | Shape::Ellipse { x, y, width, height }
            | Shape::Note { x, y, width, height }
            | Shape::Text { x, y, width, height, .. } => {
                if ![x, y, width, height].iter().all(|v| v.is_finite()) {
                    return Err(ShapeError::NonFiniteGeometry);
                }
                Ok(())
            }
            Shape::Path { x, y, points } => {
                if !x.is_finite() || !y.is_finite() || points.iter().any(|p| !p.is_finite()) {
                    return Err(ShapeError::NonFiniteGeometry);
                }
                if points.len() < 2 {
                    return Err(ShapeError::DegeneratePath(points.len()));
                }
                Ok(())
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Board entities
// ───────────────────────────────────────────────────────────────────

/// One shape/text/path entity placed on a board.
///
/// Owned durably by the object store; ids and timestamps are assigned
/// there, never by clients. An object belongs to exactly one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardObject {
    pub id: Uuid,
    pub board_id: Uuid,
    pub shape: Shape,
    pub fill: Fill,
    pub created_by: Uuid,
    /// Unix milliseconds.
    pub created_at: u64,
    pub updated_at: u64,
}

/// The slice of a stored board the live session reads and patches.
///
/// Full board CRUD (member lists, roles) lives behind the HTTP API and
/// the permission gate; the session only needs identity and title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub name: String,
    pub updated_at: u64,
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_finite() {
        assert!(Point::new(1.0, 2.0).is_finite());
        assert!(!Point::new(f64::NAN, 2.0).is_finite());
        assert!(!Point::new(1.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_shape_kind_tags() {
        let rect = Shape::Rectangle { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let path = Shape::Path { x: 0.0, y: 0.0, points: vec![Point::ORIGIN, Point::new(1.0, 1.0)] };
        assert_eq!(rect.kind(), "rectangle");
        assert_eq!(path.kind(), "path");
    }

    #[test]
    fn test_rectangle_validates() {
        let rect = Shape::Rectangle { x: 10.0, y: 10.0, width: 100.0, height: 100.0 };
        assert!(rect.validate().is_ok());
    }

    #[test]
    fn test_non_finite_geometry_rejected() {
        let rect = Shape::Rectangle { x: f64::NAN, y: 0.0, width: 1.0, height: 1.0 };
        assert_eq!(rect.validate(), Err(ShapeError::NonFiniteGeometry));

        let ellipse = Shape::Ellipse { x: 0.0, y: 0.0, width: f64::INFINITY, height: 1.0 };
        assert_eq!(ellipse.validate(), Err(ShapeError::NonFiniteGeometry));
    }

    #[test]
    fn test_degenerate_path_rejected() {
        let empty = Shape::Path { x: 0.0, y: 0.0, points: vec![] };
        assert_eq!(empty.validate(), Err(ShapeError::DegeneratePath(0)));

        let single = Shape::Path { x: 0.0, y: 0.0, points: vec![Point::ORIGIN] };
        assert_eq!(single.validate(), Err(ShapeError::DegeneratePath(1)));

        let ok = Shape::Path {
            x: 0.0,
            y: 0.0,
            points: vec![Point::ORIGIN, Point::new(5.0, 5.0)],
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_path_non_finite_point_rejected() {
        let path = Shape::Path {
            x: 0.0,
            y: 0.0,
            points: vec![Point::ORIGIN, Point::new(f64::NAN, 1.0)],
        };
        assert_eq!(path.validate(), Err(ShapeError::NonFiniteGeometry));
    }

    #[test]
    fn test_shape_origin() {
        let text = Shape::Text { x: 3.0, y: 4.0, width: 50.0, height: 20.0, value: "hi".into() };
        assert_eq!(text.origin(), Point::new(3.0, 4.0));
    }
}
