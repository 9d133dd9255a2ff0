//! Dense complex solves via `faer` LU with partial pivoting.

use faer::complex_native::c64;
use faer::linalg::solvers::SpSolver;
use ndarray::Array2;
use num_complex::Complex64;

use crate::backend::ComputeError;

/// Solve $\mathbf{A}\mathbf{X} = \mathbf{B}$.
///
/// # Errors
/// [`ComputeError::Singular`] when the factorisation produces non-finite
/// values (exactly singular $\mathbf{A}$).
pub fn solve_lu(
    matrix: &Array2<Complex64>,
    rhs: &Array2<Complex64>,
) -> Result<Array2<Complex64>, ComputeError> {
    let dim = matrix.nrows();
    if dim != matrix.ncols() {
        return Err(ComputeError::Dimension(format!(
            "matrix is {}x{}, expected square",
            dim,
            matrix.ncols()
        )));
    }
    if rhs.nrows() != dim {
        return Err(ComputeError::Dimension(format!(
            "right-hand side has {} rows, matrix has {}",
            rhs.nrows(),
            dim
        )));
    }

    let a = faer::Mat::<c64>::from_fn(dim, dim, |i, j| {
        let c = matrix[[i, j]];
        c64::new(c.re, c.im)
    });
    let b = faer::Mat::<c64>::from_fn(dim, rhs.ncols(), |i, j| {
        let c = rhs[[i, j]];
        c64::new(c.re, c.im)
    });

    let lu = a.partial_piv_lu();
    let x = lu.solve(&b);

    let solution = Array2::from_shape_fn((dim, rhs.ncols()), |(i, j)| {
        let c = x.read(i, j);
        Complex64::new(c.re, c.im)
    });
    if solution.iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
        return Err(ComputeError::Singular(format!(
            "LU solve of {}x{} system produced non-finite values",
            dim, dim
        )));
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_solve_complex_system() {
        let matrix = Array2::from_shape_vec(
            (2, 2),
            vec![
                Complex64::new(1.0, 1.0),
                Complex64::new(2.0, 0.0),
                Complex64::new(0.0, 1.0),
                Complex64::new(3.0, -1.0),
            ],
        )
        .unwrap();
        let rhs = Array2::from_shape_vec(
            (2, 2),
            vec![
                Complex64::new(5.0, 1.0),
                Complex64::new(1.0, 0.0),
                Complex64::new(4.0, 2.0),
                Complex64::new(0.0, 0.0),
            ],
        )
        .unwrap();

        let sol = solve_lu(&matrix, &rhs).unwrap();
        let check = matrix.dot(&sol);
        for (a, b) in check.iter().zip(rhs.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_rejects_non_square() {
        let matrix = Array2::<Complex64>::zeros((2, 3));
        let rhs = Array2::<Complex64>::zeros((2, 1));
        assert!(matches!(
            solve_lu(&matrix, &rhs),
            Err(ComputeError::Dimension(_))
        ));
    }
}
