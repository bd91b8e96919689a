//! Object model: canvas records, shape kinds, and sparse patches.
//!
//! DESIGN
//! ======
//! Shapes are a closed tagged union (`Shape`, tagged by `kind`). Every kind
//! has a matching sparse patch struct; `ShapePatch` is the union of those.
//! Both are generated from one table by `shape_kinds!` so a field added to a
//! kind automatically becomes patchable, mergeable, and validated.
//!
//! Patches are validated at the pipeline boundary: field-level checks
//! (finite numbers) happen before any cache write, and kind/shape rules are
//! checked against the patched result before it replaces the cached record.
//! Absent (`None`) patch fields are never serialized, so the remote store
//! never receives them as overwrites.

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::keys::{ObjectId, UserId};

/// Default fill color for new filled shapes.
pub const DEFAULT_FILL: &str = "#D94B4B";
/// Default stroke color for new shapes and edges.
pub const DEFAULT_STROKE: &str = "#1F1A17";

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Rejection of a record or patch at the pipeline entry boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("patch kind {found} does not match object kind {expected}")]
    KindMismatch { expected: ShapeKind, found: ShapeKind },
    #[error("field {field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("field {field} must not be negative")]
    Negative { field: &'static str },
    #[error("{0}")]
    Malformed(String),
}

impl ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::KindMismatch { .. } => "E_KIND_MISMATCH",
            Self::NonFinite { .. } => "E_NON_FINITE",
            Self::Negative { .. } => "E_NEGATIVE",
            Self::Malformed(_) => "E_MALFORMED",
        }
    }
}

/// Per-field sanity check applied to every shape and patch field.
trait FieldCheck {
    fn check(&self, field: &'static str) -> Result<(), ValidationError>;
}

impl FieldCheck for f64 {
    fn check(&self, field: &'static str) -> Result<(), ValidationError> {
        if self.is_finite() { Ok(()) } else { Err(ValidationError::NonFinite { field }) }
    }
}

impl FieldCheck for u32 {
    fn check(&self, _field: &'static str) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl FieldCheck for String {
    fn check(&self, _field: &'static str) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl FieldCheck for Vec<f64> {
    fn check(&self, field: &'static str) -> Result<(), ValidationError> {
        self.iter().try_for_each(|v| v.check(field))
    }
}

impl<T: FieldCheck> FieldCheck for Option<T> {
    fn check(&self, field: &'static str) -> Result<(), ValidationError> {
        match self {
            Some(value) => value.check(field),
            None => Ok(()),
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value < 0.0 { Err(ValidationError::Negative { field }) } else { Ok(()) }
}

fn polyline(points: &[f64]) -> Result<(), ValidationError> {
    if points.len() < 4 || points.len() % 2 != 0 {
        return Err(ValidationError::Malformed(format!(
            "points must hold at least two x/y pairs, got {} values",
            points.len()
        )));
    }
    Ok(())
}

// =============================================================================
// SHAPE KINDS
// =============================================================================

macro_rules! shape_kinds {
    (
        $(
            $(#[$meta:meta])*
            $variant:ident => $tag:literal, $shape:ident, $patch:ident {
                $( $field:ident : $ty:ty ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub struct $shape {
                $( pub $field: $ty, )*
            }

            impl $shape {
                fn check_fields(&self) -> Result<(), ValidationError> {
                    $( self.$field.check(stringify!($field))?; )*
                    Ok(())
                }
            }

            #[doc = concat!("Sparse update for [`", stringify!($shape), "`]. Only present fields are applied.")]
            #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
            pub struct $patch {
                $(
                    #[serde(default, skip_serializing_if = "Option::is_none")]
                    pub $field: Option<$ty>,
                )*
            }

            impl $patch {
                fn apply_to(&self, shape: &mut $shape) {
                    $(
                        if let Some(value) = &self.$field {
                            shape.$field = value.clone();
                        }
                    )*
                }

                fn merge(&mut self, later: Self) {
                    $(
                        if later.$field.is_some() {
                            self.$field = later.$field;
                        }
                    )*
                }

                fn is_empty(&self) -> bool {
                    true $( && self.$field.is_none() )*
                }

                fn check_fields(&self) -> Result<(), ValidationError> {
                    $( self.$field.check(stringify!($field))?; )*
                    Ok(())
                }
            }
        )*

        /// Discriminant of [`Shape`] and [`ShapePatch`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ShapeKind {
            $( #[serde(rename = $tag)] $variant, )*
        }

        impl ShapeKind {
            pub const ALL: &'static [ShapeKind] = &[$( ShapeKind::$variant ),*];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $tag, )*
                }
            }
        }

        /// Kind-specific geometry and style of a canvas object.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind")]
        pub enum Shape {
            $( #[serde(rename = $tag)] $variant($shape), )*
        }

        impl Shape {
            #[must_use]
            pub fn kind(&self) -> ShapeKind {
                match self {
                    $( Self::$variant(_) => ShapeKind::$variant, )*
                }
            }

            fn check_fields(&self) -> Result<(), ValidationError> {
                match self {
                    $( Self::$variant(shape) => shape.check_fields(), )*
                }
            }
        }

        /// Sparse, kind-tagged update to a [`Shape`].
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind")]
        pub enum ShapePatch {
            $( #[serde(rename = $tag)] $variant($patch), )*
        }

        impl ShapePatch {
            #[must_use]
            pub fn kind(&self) -> ShapeKind {
                match self {
                    $( Self::$variant(_) => ShapeKind::$variant, )*
                }
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                match self {
                    $( Self::$variant(patch) => patch.is_empty(), )*
                }
            }

            fn check_fields(&self) -> Result<(), ValidationError> {
                match self {
                    $( Self::$variant(patch) => patch.check_fields(), )*
                }
            }

            /// Apply present fields onto `shape`.
            ///
            /// # Errors
            ///
            /// Returns `KindMismatch` if the patch targets a different kind.
            pub fn apply_to(&self, shape: &mut Shape) -> Result<(), ValidationError> {
                match (self, shape) {
                    $(
                        (Self::$variant(patch), Shape::$variant(target)) => {
                            patch.apply_to(target);
                            Ok(())
                        }
                    )*
                    (patch, shape) => Err(ValidationError::KindMismatch { expected: shape.kind(), found: patch.kind() }),
                }
            }

            /// Fold a later patch into this one. Later fields win; a patch of a
            /// different kind replaces this one outright.
            pub fn merge(&mut self, later: ShapePatch) {
                match (self, later) {
                    $( (Self::$variant(current), ShapePatch::$variant(next)) => current.merge(next), )*
                    (current, next) => *current = next,
                }
            }
        }
    };
}

shape_kinds! {
    /// Axis-aligned rectangle with optional rounded corners.
    Rect => "rect", RectShape, RectPatch {
        width: f64,
        height: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
        corner_radius: f64,
    }
    /// Circle centred on the object position.
    Circle => "circle", CircleShape, CirclePatch {
        radius: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
    }
    /// Ellipse centred on the object position.
    Ellipse => "ellipse", EllipseShape, EllipsePatch {
        radius_x: f64,
        radius_y: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
    }
    /// Text block wrapped to `width`.
    Text => "text", TextShape, TextPatch {
        text: String,
        font_size: f64,
        font_family: String,
        fill: String,
        width: f64,
    }
    /// Polyline; `points` are flat x/y pairs relative to the object position.
    Line => "line", LineShape, LinePatch {
        points: Vec<f64>,
        stroke: String,
        stroke_width: f64,
    }
    /// Polyline with an arrowhead at the last point.
    Arrow => "arrow", ArrowShape, ArrowPatch {
        points: Vec<f64>,
        stroke: String,
        stroke_width: f64,
        pointer_length: f64,
        pointer_width: f64,
    }
    /// Regular polygon inscribed in a circle of `radius`.
    Polygon => "polygon", PolygonShape, PolygonPatch {
        sides: u32,
        radius: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
    }
    Star => "star", StarShape, StarPatch {
        num_points: u32,
        inner_radius: f64,
        outer_radius: f64,
        fill: String,
        stroke: String,
        stroke_width: f64,
    }
    Image => "image", ImageShape, ImagePatch {
        width: f64,
        height: f64,
        src: String,
    }
    /// Embedded diagram: diagram source plus its last rendered SVG.
    Diagram => "diagram", DiagramShape, DiagramPatch {
        width: f64,
        height: f64,
        source: String,
        svg: String,
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Shape {
    /// Field checks plus per-kind geometry rules.
    ///
    /// # Errors
    ///
    /// Returns the first rule violated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.check_fields()?;
        match self {
            Self::Rect(s) => {
                non_negative("width", s.width)?;
                non_negative("height", s.height)?;
                non_negative("stroke_width", s.stroke_width)?;
                non_negative("corner_radius", s.corner_radius)
            }
            Self::Circle(s) => {
                non_negative("radius", s.radius)?;
                non_negative("stroke_width", s.stroke_width)
            }
            Self::Ellipse(s) => {
                non_negative("radius_x", s.radius_x)?;
                non_negative("radius_y", s.radius_y)?;
                non_negative("stroke_width", s.stroke_width)
            }
            Self::Text(s) => {
                non_negative("font_size", s.font_size)?;
                non_negative("width", s.width)
            }
            Self::Line(s) => {
                polyline(&s.points)?;
                non_negative("stroke_width", s.stroke_width)
            }
            Self::Arrow(s) => {
                polyline(&s.points)?;
                non_negative("stroke_width", s.stroke_width)?;
                non_negative("pointer_length", s.pointer_length)?;
                non_negative("pointer_width", s.pointer_width)
            }
            Self::Polygon(s) => {
                if s.sides < 3 {
                    return Err(ValidationError::Malformed(format!("polygon needs at least 3 sides, got {}", s.sides)));
                }
                non_negative("radius", s.radius)?;
                non_negative("stroke_width", s.stroke_width)
            }
            Self::Star(s) => {
                if s.num_points < 3 {
                    return Err(ValidationError::Malformed(format!(
                        "star needs at least 3 points, got {}",
                        s.num_points
                    )));
                }
                non_negative("inner_radius", s.inner_radius)?;
                non_negative("stroke_width", s.stroke_width)?;
                if s.inner_radius > s.outer_radius {
                    return Err(ValidationError::Malformed("star inner_radius exceeds outer_radius".into()));
                }
                Ok(())
            }
            Self::Image(s) => {
                non_negative("width", s.width)?;
                non_negative("height", s.height)
            }
            Self::Diagram(s) => {
                non_negative("width", s.width)?;
                non_negative("height", s.height)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Constructors with default styling
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn rect(width: f64, height: f64) -> Self {
        Self::Rect(RectShape {
            width,
            height,
            fill: DEFAULT_FILL.into(),
            stroke: DEFAULT_STROKE.into(),
            stroke_width: 1.0,
            corner_radius: 0.0,
        })
    }

    #[must_use]
    pub fn circle(radius: f64) -> Self {
        Self::Circle(CircleShape { radius, fill: DEFAULT_FILL.into(), stroke: DEFAULT_STROKE.into(), stroke_width: 1.0 })
    }

    #[must_use]
    pub fn ellipse(radius_x: f64, radius_y: f64) -> Self {
        Self::Ellipse(EllipseShape {
            radius_x,
            radius_y,
            fill: DEFAULT_FILL.into(),
            stroke: DEFAULT_STROKE.into(),
            stroke_width: 1.0,
        })
    }

    #[must_use]
    pub fn text(text: impl Into<String>, font_size: f64) -> Self {
        Self::Text(TextShape {
            text: text.into(),
            font_size,
            font_family: "sans-serif".into(),
            fill: DEFAULT_STROKE.into(),
            width: 200.0,
        })
    }

    #[must_use]
    pub fn line(points: Vec<f64>) -> Self {
        Self::Line(LineShape { points, stroke: DEFAULT_STROKE.into(), stroke_width: 2.0 })
    }

    #[must_use]
    pub fn arrow(points: Vec<f64>) -> Self {
        Self::Arrow(ArrowShape {
            points,
            stroke: DEFAULT_STROKE.into(),
            stroke_width: 2.0,
            pointer_length: 10.0,
            pointer_width: 10.0,
        })
    }

    #[must_use]
    pub fn polygon(sides: u32, radius: f64) -> Self {
        Self::Polygon(PolygonShape {
            sides,
            radius,
            fill: DEFAULT_FILL.into(),
            stroke: DEFAULT_STROKE.into(),
            stroke_width: 1.0,
        })
    }

    #[must_use]
    pub fn star(num_points: u32, inner_radius: f64, outer_radius: f64) -> Self {
        Self::Star(StarShape {
            num_points,
            inner_radius,
            outer_radius,
            fill: DEFAULT_FILL.into(),
            stroke: DEFAULT_STROKE.into(),
            stroke_width: 1.0,
        })
    }

    #[must_use]
    pub fn image(src: impl Into<String>, width: f64, height: f64) -> Self {
        Self::Image(ImageShape { width, height, src: src.into() })
    }

    #[must_use]
    pub fn diagram(source: impl Into<String>, width: f64, height: f64) -> Self {
        Self::Diagram(DiagramShape { width, height, source: source.into(), svg: String::new() })
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Who changed a record and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touch {
    pub at: i64,
    pub by: UserId,
}

impl Touch {
    #[must_use]
    pub fn now(by: &UserId) -> Self {
        Self { at: now_ms(), by: by.clone() }
    }
}

/// One canvas object: common envelope plus kind-specific shape fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub x: f64,
    pub y: f64,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    #[serde(flatten)]
    pub shape: Shape,
    pub created_at: i64,
    pub created_by: UserId,
    pub updated_at: i64,
    pub updated_by: UserId,
}

impl ObjectRecord {
    /// Stamp a new record; `created_*` and `updated_*` start out identical.
    #[must_use]
    pub fn from_new(id: ObjectId, fields: NewObject, touch: &Touch) -> Self {
        Self {
            id,
            x: fields.x,
            y: fields.y,
            rotation: fields.rotation,
            shape: fields.shape,
            created_at: touch.at,
            created_by: touch.by.clone(),
            updated_at: touch.at,
            updated_by: touch.by.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    /// Shallow-merge `patch` over this record and stamp the update.
    ///
    /// The patched result is validated before it is committed, so on error
    /// the record is left untouched. `updated_at` never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for a kind mismatch or an invalid result.
    pub fn apply_patch(&mut self, patch: &ObjectPatch, touch: &Touch) -> Result<(), ValidationError> {
        let mut next = self.clone();
        if let Some(x) = patch.x {
            next.x = x;
        }
        if let Some(y) = patch.y {
            next.y = y;
        }
        if let Some(rotation) = patch.rotation {
            next.rotation = rotation;
        }
        if let Some(shape) = &patch.shape {
            shape.apply_to(&mut next.shape)?;
        }
        next.shape.validate()?;
        next.updated_at = touch.at.max(self.updated_at);
        next.updated_by = touch.by.clone();
        *self = next;
        Ok(())
    }
}

/// Caller-supplied fields for a new object. Ids and stamps are assigned by
/// the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObject {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(flatten)]
    pub shape: Shape,
}

impl NewObject {
    #[must_use]
    pub fn new(x: f64, y: f64, shape: Shape) -> Self {
        Self { x, y, rotation: 0.0, shape }
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.x.check("x")?;
        self.y.check("y")?;
        self.rotation.check("rotation")?;
        self.shape.validate()
    }
}

/// Sparse update to an [`ObjectRecord`]. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapePatch>,
}

impl ObjectPatch {
    /// Patch that moves an object.
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = Some(rotation);
        self
    }

    #[must_use]
    pub fn with_shape(mut self, shape: ShapePatch) -> Self {
        self.shape = Some(shape);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_none()
            && self.y.is_none()
            && self.rotation.is_none()
            && self.shape.as_ref().is_none_or(ShapePatch::is_empty)
    }

    /// Shape kind this patch targets, if it carries shape fields.
    #[must_use]
    pub fn kind(&self) -> Option<ShapeKind> {
        self.shape.as_ref().map(ShapePatch::kind)
    }

    /// Fold a later patch into this one; later fields win on collision.
    pub fn merge(&mut self, later: ObjectPatch) {
        if later.x.is_some() {
            self.x = later.x;
        }
        if later.y.is_some() {
            self.y = later.y;
        }
        if later.rotation.is_some() {
            self.rotation = later.rotation;
        }
        if let Some(next) = later.shape {
            match &mut self.shape {
                Some(current) => current.merge(next),
                None => self.shape = Some(next),
            }
        }
    }

    /// Entry-boundary field checks that need no target record.
    ///
    /// # Errors
    ///
    /// Returns the first non-finite field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.x.check("x")?;
        self.y.check("y")?;
        self.rotation.check("rotation")?;
        match &self.shape {
            Some(shape) => shape.check_fields(),
            None => Ok(()),
        }
    }
}

/// One entry of a batch update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: ObjectId,
    pub patch: ObjectPatch,
}

impl RecordUpdate {
    #[must_use]
    pub fn new(id: ObjectId, patch: ObjectPatch) -> Self {
        Self { id, patch }
    }
}
