//! Linear algebra type system for the tracking filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 6; // [north, east, alt, v_north, v_east, v_up]

// ===== State Indices =====
pub const IDX_NORTH: usize = 0;
pub const IDX_EAST: usize = 1;
pub const IDX_ALT: usize = 2;
pub const IDX_V_NORTH: usize = 3;
pub const IDX_V_EAST: usize = 4;
pub const IDX_V_UP: usize = 5;

// ===== Filter Types =====
pub type StateVec6 = SVector<f64, STATE_DIM>;
pub type StateMat6 = SMatrix<f64, STATE_DIM, STATE_DIM>;

// A fix measures the full state (position + velocity), so H = I and
// measurement types share the state dimension.
pub type MeasurementVec6 = StateVec6;
pub type MeasurementNoise6 = StateMat6;
pub type KalmanGain6 = StateMat6;

/// Pivot magnitude below which the matrix is treated as singular.
pub const SINGULAR_PIVOT_EPS: f64 = 1e-12;

/// Invert a 6×6 matrix by Gauss–Jordan elimination with partial pivoting.
///
/// Returns `None` when the matrix is singular (or numerically close to it),
/// which the caller treats as "skip this update".
pub fn invert_gauss_jordan(m: &StateMat6) -> Option<StateMat6> {
    let mut a = *m;
    let mut inv = StateMat6::identity();

    for col in 0..STATE_DIM {
        // Partial pivot: largest magnitude in this column at or below the diagonal
        let mut pivot_row = col;
        let mut pivot_abs = a[(col, col)].abs();
        for row in (col + 1)..STATE_DIM {
            let candidate = a[(row, col)].abs();
            if candidate > pivot_abs {
                pivot_abs = candidate;
                pivot_row = row;
            }
        }

        if !pivot_abs.is_finite() || pivot_abs < SINGULAR_PIVOT_EPS {
            return None;
        }

        if pivot_row != col {
            a.swap_rows(pivot_row, col);
            inv.swap_rows(pivot_row, col);
        }

        let pivot = a[(col, col)];
        for j in 0..STATE_DIM {
            a[(col, j)] /= pivot;
            inv[(col, j)] /= pivot;
        }

        for row in 0..STATE_DIM {
            if row == col {
                continue;
            }
            let factor = a[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for j in 0..STATE_DIM {
                a[(row, j)] -= factor * a[(col, j)];
                inv[(row, j)] -= factor * inv[(col, j)];
            }
        }
    }

    Some(inv)
}

/// Force exact symmetry: P = (P + Pᵀ) / 2
pub fn symmetrize(p: &mut StateMat6) {
    *p = (*p + p.transpose()) * 0.5;
}
