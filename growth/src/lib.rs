//! Pure, deterministic cost/price curve evaluation.
//!
//! Everything in here is plain data + math: no ECS, no clocks. Curves are
//! declared in content (RON) and evaluated by the generator engine and the
//! upgrade shop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub trait GrowthStrategy {
    /// Value at `level`. Level 0 is the base value.
    fn calculate(&self, level: u32) -> f64;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinearGrowth {
    pub base: f64,
    /// Added once per level.
    pub increment: f64,
}

impl GrowthStrategy for LinearGrowth {
    fn calculate(&self, level: u32) -> f64 {
        self.base + self.increment * level as f64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExponentialGrowth {
    pub base: f64,
    /// Multiplier per level (1.15 is the usual idle-game rate).
    pub factor: f64,
}

impl GrowthStrategy for ExponentialGrowth {
    fn calculate(&self, level: u32) -> f64 {
        self.base * self.factor.powi(level as i32)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepGrowth {
    pub base: f64,
    /// Every `step_at` levels the value grows by `step_increment`.
    pub step_at: u32,
    pub step_increment: f64,
}

impl GrowthStrategy for StepGrowth {
    fn calculate(&self, level: u32) -> f64 {
        let steps = level / self.step_at;
        self.base + self.step_increment * steps as f64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaticGrowth {
    pub base: f64,
}

impl GrowthStrategy for StaticGrowth {
    fn calculate(&self, _: u32) -> f64 {
        self.base
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Growth {
    Linear(LinearGrowth),
    Exponential(ExponentialGrowth),
    Step(StepGrowth),
    Static(StaticGrowth),
}

impl GrowthStrategy for Growth {
    fn calculate(&self, level: u32) -> f64 {
        match self {
            Growth::Linear(g) => g.calculate(level),
            Growth::Exponential(g) => g.calculate(level),
            Growth::Step(g) => g.calculate(level),
            Growth::Static(g) => g.calculate(level),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CurveError {
    #[error("price table is empty")]
    EmptyTable,
    #[error("price curve has no segments")]
    NoSegments,
    #[error("segment {index} starts at level {found}, expected {expected} (segments must be contiguous from level 1)")]
    SegmentGap {
        index: usize,
        expected: u32,
        found: u32,
    },
    #[error("segment {index} is empty ({from}..{to})")]
    EmptySegment { index: usize, from: u32, to: u32 },
    #[error("only the last segment may be open-ended")]
    OpenEndedNotLast,
    #[error("last segment must be open-ended")]
    MissingOpenEnd,
}

/// One `[from_level, to_level)` slice of a segmented price curve.
///
/// `to_level: None` means the segment extends to infinity and must be last.
/// Within a segment the growth is evaluated relative to `from_level`, so a
/// segment starting at 50 prices level 50 at its growth's level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveSegment {
    pub from_level: u32,
    pub to_level: Option<u32>,
    pub growth: Growth,
}

/// Price of a generator level, resolved from content.
///
/// Either an explicit per-level table (index 0 = level 1) or a list of
/// contiguous growth segments selected by which range contains the level.
/// Evaluation is pure: the same (curve, level) always yields the same price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PriceCurve {
    Table(Vec<f64>),
    Segmented(Vec<CurveSegment>),
}

impl PriceCurve {
    /// Structural validation, run once at content-load time.
    pub fn validate(&self) -> Result<(), CurveError> {
        match self {
            PriceCurve::Table(table) => {
                if table.is_empty() {
                    return Err(CurveError::EmptyTable);
                }
                Ok(())
            }
            PriceCurve::Segmented(segments) => {
                if segments.is_empty() {
                    return Err(CurveError::NoSegments);
                }
                let mut expected = 1u32;
                for (index, seg) in segments.iter().enumerate() {
                    if seg.from_level != expected {
                        return Err(CurveError::SegmentGap {
                            index,
                            expected,
                            found: seg.from_level,
                        });
                    }
                    match seg.to_level {
                        Some(to) => {
                            if to <= seg.from_level {
                                return Err(CurveError::EmptySegment {
                                    index,
                                    from: seg.from_level,
                                    to,
                                });
                            }
                            if index == segments.len() - 1 {
                                return Err(CurveError::MissingOpenEnd);
                            }
                            expected = to;
                        }
                        None => {
                            if index != segments.len() - 1 {
                                return Err(CurveError::OpenEndedNotLast);
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Price for buying `level` (1-based). A table clamps levels past its
    /// end to the last entry.
    ///
    /// Assumes `validate` passed; an unvalidated curve may misprice but
    /// never panics.
    pub fn price_for_level(&self, level: u32) -> f64 {
        let level = level.max(1);
        match self {
            PriceCurve::Table(table) => {
                let idx = (level as usize - 1).min(table.len().saturating_sub(1));
                table.get(idx).copied().unwrap_or(0.0)
            }
            PriceCurve::Segmented(segments) => {
                let seg = segments
                    .iter()
                    .find(|s| {
                        level >= s.from_level && s.to_level.map_or(true, |to| level < to)
                    })
                    .or_else(|| segments.last());
                match seg {
                    Some(s) => s.growth.calculate(level - s.from_level),
                    None => 0.0,
                }
            }
        }
    }
}
