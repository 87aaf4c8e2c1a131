//! Symmetric eigen-decomposition for the feature basis
//!
//! Cyclic Jacobi sweeps over a dense row-major matrix. The covariance
//! matrices involved are `waveform_window` square (tens of rows), where
//! Jacobi is accurate and simple.

use crate::error::DetectionError;

/// Maximum number of full sweeps before giving up
pub const MAX_SWEEPS: usize = 64;

/// Eigenvalues (descending) and matching unit eigenvectors
#[derive(Debug, Clone, PartialEq)]
pub struct EigenDecomposition {
    pub eigenvalues: Vec<f64>,
    /// `eigenvectors[k]` belongs to `eigenvalues[k]`
    pub eigenvectors: Vec<Vec<f64>>,
}

/// Decompose the symmetric `n x n` matrix `a` (row-major)
///
/// # Errors
///
/// Returns `DetectionError::ConvergenceFailed` if the off-diagonal mass is
/// still significant after `MAX_SWEEPS` sweeps.
pub fn eigen_symmetric(a: &[f64], n: usize) -> Result<EigenDecomposition, DetectionError> {
    debug_assert_eq!(a.len(), n * n);
    let mut a = a.to_vec();
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tol = 1e-12 * scale.max(f64::MIN_POSITIVE);

    let mut converged = false;
    for _sweep in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i * n + j] * a[i * n + j])
            .sum::<f64>()
            .sqrt();
        if off <= tol {
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                rotate(&mut a, &mut v, n, p, q);
            }
        }
    }
    if !converged {
        return Err(DetectionError::ConvergenceFailed { sweeps: MAX_SWEEPS });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[j * n + j].total_cmp(&a[i * n + i]).then(i.cmp(&j)));

    Ok(EigenDecomposition {
        eigenvalues: order.iter().map(|&k| a[k * n + k]).collect(),
        eigenvectors: order
            .iter()
            .map(|&k| (0..n).map(|row| v[row * n + k]).collect())
            .collect(),
    })
}

/// Annihilate `a[p][q]` with one Jacobi rotation, accumulating it into `v`
fn rotate(a: &mut [f64], v: &mut [f64], n: usize, p: usize, q: usize) {
    let a_pq = a[p * n + q];
    if a_pq == 0.0 {
        return;
    }

    let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * a_pq);
    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    a[p * n + p] -= t * a_pq;
    a[q * n + q] += t * a_pq;
    a[p * n + q] = 0.0;
    a[q * n + p] = 0.0;

    for r in 0..n {
        if r != p && r != q {
            let a_rp = a[r * n + p];
            let a_rq = a[r * n + q];
            let new_rp = c * a_rp - s * a_rq;
            let new_rq = s * a_rp + c * a_rq;
            a[r * n + p] = new_rp;
            a[p * n + r] = new_rp;
            a[r * n + q] = new_rq;
            a[q * n + r] = new_rq;
        }
    }

    for r in 0..n {
        let v_rp = v[r * n + p];
        let v_rq = v[r * n + q];
        v[r * n + p] = c * v_rp - s * v_rq;
        v[r * n + q] = s * v_rp + c * v_rq;
    }
}

/// Modified Gram-Schmidt in place
///
/// A vector that collapses (numerically dependent on the previous ones) is
/// replaced by the first standard basis vector that is independent, so the
/// result is always exactly orthonormal.
pub fn orthonormalize(vectors: &mut [Vec<f64>]) {
    for k in 0..vectors.len() {
        let n = vectors[k].len();
        let mut candidate = vectors[k].clone();
        let mut fallback = 0usize;
        loop {
            // two passes keep the residual orthogonal to working precision
            for _ in 0..2 {
                for prev in vectors.iter().take(k) {
                    let dot: f64 = candidate.iter().zip(prev).map(|(a, b)| a * b).sum();
                    for (x, p) in candidate.iter_mut().zip(prev) {
                        *x -= dot * p;
                    }
                }
            }

            let norm = candidate.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 1e-9 || fallback >= n {
                let norm = norm.max(f64::MIN_POSITIVE);
                candidate.iter_mut().for_each(|x| *x /= norm);
                break;
            }

            candidate = vec![0.0; n];
            candidate[fallback] = 1.0;
            fallback += 1;
        }
        vectors[k] = candidate;
    }
}
