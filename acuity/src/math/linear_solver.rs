//! Dense linear solver for the Levenberg-Marquardt normal equations.
//!
//! Gaussian elimination with partial pivoting on small fixed-size systems.

/// Solve the NxN system `a · x = b`.
///
/// Returns `None` when a pivot is negligible relative to the largest
/// diagonal entry of `a` (singular or numerically rank-deficient matrix).
#[allow(clippy::needless_range_loop)]
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut matrix = *a;
    let mut rhs = *b;

    let scale = (0..N).fold(0.0f64, |m, i| m.max(matrix[i][i].abs()));
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    let tolerance = scale * 1e-14;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = matrix[col][col].abs();
        for row in (col + 1)..N {
            if matrix[row][col].abs() > max_val {
                max_val = matrix[row][col].abs();
                max_row = row;
            }
        }

        if !(max_val > tolerance) {
            return None;
        }

        if max_row != col {
            matrix.swap(col, max_row);
            rhs.swap(col, max_row);
        }

        for row in (col + 1)..N {
            let factor = matrix[row][col] / matrix[col][col];
            let pivot_row = matrix[col];
            for (j, m) in matrix[row].iter_mut().enumerate().skip(col) {
                *m -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= matrix[i][j] * xj;
        }
        x[i] = sum / matrix[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}
