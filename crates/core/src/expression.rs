//! Structured raster-algebra expressions.
//!
//! The normalization step subtracts a runtime statistic from every cell. The
//! expression is kept as a tree and only rendered to the calculator grammar at
//! the engine boundary, so no value is ever spliced into hand-written text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to one band of one bound raster (`A`, band 1 ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandRef {
    /// Calculator variable name, `A`..=`Z`.
    pub raster: char,
    /// 1-based band index.
    pub band: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
        }
    }
}

/// Per-cell expression over one or more bound rasters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RasterExpression {
    Band(BandRef),
    Literal { value: f64 },
    Binary {
        op: BinaryOp,
        lhs: Box<RasterExpression>,
        rhs: Box<RasterExpression>,
    },
    Clamp {
        value: Box<RasterExpression>,
        min: f64,
        max: f64,
    },
}

impl RasterExpression {
    pub fn band(raster: char, band: u32) -> Self {
        Self::Band(BandRef { raster, band })
    }

    pub fn literal(value: f64) -> Self {
        Self::Literal { value }
    }

    fn binary(self, op: BinaryOp, rhs: RasterExpression) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: RasterExpression) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(self, rhs: RasterExpression) -> Self {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(self, rhs: RasterExpression) -> Self {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(self, rhs: RasterExpression) -> Self {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn clamp(self, min: f64, max: f64) -> Self {
        Self::Clamp {
            value: Box::new(self),
            min,
            max,
        }
    }

    /// `band - median`, the elevation relative to the zone's median.
    pub fn normalize(band: BandRef, median: f64) -> Self {
        Self::Band(band).sub(Self::literal(median))
    }

    /// Linear map of `[in_min, in_max]` onto `[out_min, out_max]`.
    ///
    /// A constant input (`in_min == in_max`) maps every cell to `out_min`.
    pub fn linear_rescale(band: BandRef, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> Self {
        let span = in_max - in_min;
        if !(span.is_finite() && span > 0.0) {
            // keep the band in the tree so the output inherits extent and no-data
            return Self::Band(band)
                .mul(Self::literal(0.0))
                .add(Self::literal(out_min));
        }

        Self::Band(band)
            .sub(Self::literal(in_min))
            .mul(Self::literal(out_max - out_min))
            .div(Self::literal(span))
            .add(Self::literal(out_min))
    }

    /// Distinct band references in first-use order.
    pub fn band_refs(&self) -> Vec<BandRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs(&self, refs: &mut Vec<BandRef>) {
        match self {
            Self::Band(band) => {
                if !refs.contains(band) {
                    refs.push(*band);
                }
            }
            Self::Literal { .. } => {}
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(refs);
                rhs.collect_refs(refs);
            }
            Self::Clamp { value, .. } => value.collect_refs(refs),
        }
    }

    /// Evaluates the expression for a single cell.
    ///
    /// Returns `None` when a referenced band has no value for the cell.
    pub fn evaluate(&self, lookup: &dyn Fn(BandRef) -> Option<f64>) -> Option<f64> {
        match self {
            Self::Band(band) => lookup(*band),
            Self::Literal { value } => Some(*value),
            Self::Binary { op, lhs, rhs } => {
                Some(op.apply(lhs.evaluate(lookup)?, rhs.evaluate(lookup)?))
            }
            Self::Clamp { value, min, max } => Some(value.evaluate(lookup)?.clamp(*min, *max)),
        }
    }

    /// Renders the expression in `gdal_calc.py` syntax.
    ///
    /// Band indices are passed separately (`--A_band`), so only the variable
    /// name appears in the text.
    pub fn to_gdal_calc(&self) -> String {
        match self {
            Self::Band(band) => band.raster.to_string(),
            Self::Literal { value } => format_literal(*value),
            Self::Binary { op, lhs, rhs } => format!(
                "({} {} {})",
                lhs.to_gdal_calc(),
                op.symbol(),
                rhs.to_gdal_calc()
            ),
            Self::Clamp { value, min, max } => format!(
                "clip({}, {}, {})",
                value.to_gdal_calc(),
                format_literal(*min),
                format_literal(*max)
            ),
        }
    }
}

impl fmt::Display for RasterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_gdal_calc())
    }
}

/// Formats a float so that it parses back to the same value and never
/// depends on the process locale.
pub fn format_literal(value: f64) -> String {
    let text = format!("{value:?}");
    if value.is_sign_negative() {
        format!("({text})")
    } else {
        text
    }
}
