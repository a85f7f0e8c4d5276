//! N-dimensional calibration tables with multilinear interpolation.
//!
//! A table is a set of strictly increasing axes plus a dense grid whose first
//! axis varies fastest. Queries outside an axis keep the slope of that axis'
//! edge interval, so lookups are total and never panic.

use crate::error::TableError;

#[derive(Debug, Clone, PartialEq)]
pub struct Table<const N: usize> {
    axes: [Vec<f32>; N],
    data: Vec<f32>,
}

pub type Table2 = Table<2>;
pub type Table3 = Table<3>;

/// Index `i` of the interval bracketing `q`, with `axis[i] <= q < axis[i + 1]`.
///
/// Clamped to `[0, len - 2]`: values below the axis use the first interval,
/// values at or above the last point use the last one. `axis` must have at
/// least two points.
#[inline]
pub fn find_index(axis: &[f32], q: f32) -> usize {
    let last = axis.len().saturating_sub(2);
    axis.partition_point(|&a| a <= q).saturating_sub(1).min(last)
}

impl<const N: usize> Table<N> {
    pub fn new(axes: [Vec<f32>; N], data: Vec<f32>) -> Result<Self, TableError> {
        for (d, axis) in axes.iter().enumerate() {
            if axis.len() < 2 {
                return Err(TableError::AxisTooShort {
                    axis: d,
                    len: axis.len(),
                });
            }
            let increasing = axis.iter().all(|v| v.is_finite())
                && axis.windows(2).all(|w| w[0] < w[1]);
            if !increasing {
                return Err(TableError::AxisNotIncreasing { axis: d });
            }
        }
        let expected: usize = axes.iter().map(Vec::len).product();
        if data.len() != expected {
            return Err(TableError::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        if let Some(index) = data.iter().position(|v| !v.is_finite()) {
            return Err(TableError::NonFinite { index });
        }
        Ok(Self { axes, data })
    }

    pub fn axis(&self, d: usize) -> &[f32] {
        &self.axes[d]
    }

    pub fn shape(&self) -> [usize; N] {
        core::array::from_fn(|d| self.axes[d].len())
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn flat_index(&self, idx: [usize; N]) -> usize {
        let mut flat = 0;
        let mut stride = 1;
        for d in 0..N {
            flat += idx[d] * stride;
            stride *= self.axes[d].len();
        }
        flat
    }

    /// Raw grid value at `idx`, or `None` when any index is out of range.
    pub fn get(&self, idx: [usize; N]) -> Option<f32> {
        if idx.iter().zip(&self.axes).any(|(&i, a)| i >= a.len()) {
            return None;
        }
        self.data.get(self.flat_index(idx)).copied()
    }

    /// Interpolated value at `q`.
    ///
    /// Each of the `2^N` cell corners is weighted by the product over axes of
    /// the fractional distance to the opposite face.
    pub fn lookup(&self, q: [f32; N]) -> f32 {
        let mut base = [0usize; N];
        let mut frac = [0f32; N];
        for d in 0..N {
            let axis = &self.axes[d];
            let i = find_index(axis, q[d]);
            base[d] = i;
            frac[d] = (q[d] - axis[i]) / (axis[i + 1] - axis[i]);
        }

        let mut acc = 0.0f32;
        for corner in 0..(1usize << N) {
            let mut idx = base;
            let mut weight = 1.0f32;
            for d in 0..N {
                if corner & (1 << d) != 0 {
                    idx[d] += 1;
                    weight *= frac[d];
                } else {
                    weight *= 1.0 - frac[d];
                }
            }
            if weight != 0.0 {
                acc += weight * self.data[self.flat_index(idx)];
            }
        }
        acc
    }
}

/// Bilinear lookup, `x` on the first axis.
#[inline]
pub fn lookup_2d(table: &Table<2>, x: f32, y: f32) -> f32 {
    table.lookup([x, y])
}

/// Trilinear lookup, `x` on the first axis.
#[inline]
pub fn lookup_3d(table: &Table<3>, x: f32, y: f32, z: f32) -> f32 {
    table.lookup([x, y, z])
}
