//! Damped normal equations for a frame-chained least-squares problem.
//!
//! Per-frame parameter blocks couple only with their neighbours (temporal
//! terms) and with one shared block (body shape):
//!
//! ```text
//! | D0  U0              B0 |
//! | U0' D1  U1          B1 |
//! |     U1' D2  ...     B2 |
//! |             ...     .. |
//! | B0' B1' B2' ...     C  |
//! ```
//!
//! The chain is eliminated with block Thomas, the shared block through its
//! Schur complement.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// JᵀJ と Jᵀr をブロック単位で保持
#[derive(Debug, Clone)]
pub struct BlockSystem {
    pub diag: Vec<DMatrix<f64>>,
    /// フレーム t と t+1 の結合（t 行 × t+1 列）
    pub upper: Vec<DMatrix<f64>>,
    /// フレーム t と共有ブロックの結合
    pub cross: Vec<DMatrix<f64>>,
    pub shared: DMatrix<f64>,
    pub grad: Vec<DVector<f64>>,
    pub grad_shared: DVector<f64>,
}

/// 解いたステップ
#[derive(Debug, Clone)]
pub struct Step {
    pub frames: Vec<DVector<f64>>,
    pub shared: DVector<f64>,
}

impl BlockSystem {
    pub fn new(frames: usize, dim: usize, shared_dim: usize) -> Self {
        Self {
            diag: vec![DMatrix::zeros(dim, dim); frames],
            upper: vec![DMatrix::zeros(dim, dim); frames.saturating_sub(1)],
            cross: vec![DMatrix::zeros(dim, shared_dim); frames],
            shared: DMatrix::zeros(shared_dim, shared_dim),
            grad: vec![DVector::zeros(dim); frames],
            grad_shared: DVector::zeros(shared_dim),
        }
    }

    pub fn frames(&self) -> usize {
        self.diag.len()
    }

    pub fn dim(&self) -> usize {
        self.diag.first().map_or(0, |d| d.nrows())
    }

    pub fn shared_dim(&self) -> usize {
        self.shared.nrows()
    }

    /// (H + damping·I) δ = -g を解く。正定値でなければ None
    pub fn solve(&self, damping: f64) -> Option<Step> {
        let frames = self.frames();
        let d = self.dim();
        let m = self.shared_dim();

        // 前進消去。右辺の列は [-g_t | B_t]
        let mut factors: Vec<Cholesky<f64, Dyn>> = Vec::with_capacity(frames);
        let mut rhs: Vec<DMatrix<f64>> = Vec::with_capacity(frames);
        for t in 0..frames {
            let mut s = self.diag[t].clone();
            for i in 0..d {
                s[(i, i)] += damping;
            }
            let mut r = DMatrix::<f64>::zeros(d, 1 + m);
            r.set_column(0, &(-&self.grad[t]));
            if m > 0 {
                r.columns_mut(1, m).copy_from(&self.cross[t]);
            }
            if t > 0 {
                let u = &self.upper[t - 1];
                let prev = &factors[t - 1];
                let ut = u.transpose();
                s -= &ut * prev.solve(u);
                r -= &ut * prev.solve(&rhs[t - 1]);
            }
            factors.push(s.cholesky()?);
            rhs.push(r);
        }

        // 後退代入
        let mut x: Vec<DMatrix<f64>> = vec![DMatrix::zeros(d, 1 + m); frames];
        for t in (0..frames).rev() {
            let mut r = rhs[t].clone();
            if t + 1 < frames {
                r -= &self.upper[t] * &x[t + 1];
            }
            x[t] = factors[t].solve(&r);
        }

        let y: Vec<DVector<f64>> = x.iter().map(|xt| xt.column(0).into_owned()).collect();
        if m == 0 {
            return Some(Step {
                frames: y,
                shared: DVector::zeros(0),
            });
        }

        // 共有ブロックのシューア補元
        let mut schur = self.shared.clone();
        for i in 0..m {
            schur[(i, i)] += damping;
        }
        let mut rhs_shared = -&self.grad_shared;
        for t in 0..frames {
            let bt = self.cross[t].transpose();
            schur -= &bt * x[t].columns(1, m);
            rhs_shared -= &bt * &y[t];
        }
        let shared = schur.cholesky()?.solve(&rhs_shared);

        let frames = y
            .iter()
            .zip(&x)
            .map(|(yt, xt)| yt - xt.columns(1, m) * &shared)
            .collect();
        Some(Step { frames, shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ブロック構造を展開した密行列で解いた結果と比較
    fn dense(sys: &BlockSystem, damping: f64) -> DVector<f64> {
        let (t_n, d, m) = (sys.frames(), sys.dim(), sys.shared_dim());
        let n = t_n * d + m;
        let mut h = DMatrix::<f64>::zeros(n, n);
        let mut g = DVector::<f64>::zeros(n);
        for t in 0..t_n {
            h.view_mut((t * d, t * d), (d, d)).copy_from(&sys.diag[t]);
            if m > 0 {
                h.view_mut((t * d, t_n * d), (d, m)).copy_from(&sys.cross[t]);
                h.view_mut((t_n * d, t * d), (m, d)).copy_from(&sys.cross[t].transpose());
            }
            g.rows_mut(t * d, d).copy_from(&sys.grad[t]);
            if t + 1 < t_n {
                h.view_mut((t * d, (t + 1) * d), (d, d)).copy_from(&sys.upper[t]);
                h.view_mut(((t + 1) * d, t * d), (d, d)).copy_from(&sys.upper[t].transpose());
            }
        }
        if m > 0 {
            h.view_mut((t_n * d, t_n * d), (m, m)).copy_from(&sys.shared);
            g.rows_mut(t_n * d, m).copy_from(&sys.grad_shared);
        }
        for i in 0..n {
            h[(i, i)] += damping;
        }
        h.cholesky().unwrap().solve(&(-g))
    }

    fn sample_system(frames: usize, d: usize, m: usize) -> BlockSystem {
        let mut sys = BlockSystem::new(frames, d, m);
        let mut seed = 1.0;
        let mut next = || {
            seed = (seed * 37.0 + 11.0) % 101.0;
            seed / 101.0 - 0.5
        };
        for t in 0..frames {
            let a = DMatrix::from_fn(d + 2, d, |_, _| next());
            sys.diag[t] = a.transpose() * &a + DMatrix::identity(d, d) * 2.0;
            sys.grad[t] = DVector::from_fn(d, |_, _| next());
            sys.cross[t] = DMatrix::from_fn(d, m, |_, _| next() * 0.1);
            if t + 1 < frames {
                sys.upper[t] = DMatrix::identity(d, d) * -0.5;
            }
        }
        sys.shared = DMatrix::identity(m, m) * (frames as f64);
        sys.grad_shared = DVector::from_fn(m, |_, _| next());
        sys
    }

    #[test]
    fn test_solve_matches_dense() {
        let sys = sample_system(5, 4, 3);
        let step = sys.solve(1e-3).unwrap();
        let expected = dense(&sys, 1e-3);
        for t in 0..5 {
            for i in 0..4 {
                assert!((step.frames[t][i] - expected[t * 4 + i]).abs() < 1e-9);
            }
        }
        for i in 0..3 {
            assert!((step.shared[i] - expected[20 + i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_solve_without_shared_block() {
        let sys = sample_system(3, 2, 0);
        let step = sys.solve(0.0).unwrap();
        assert_eq!(step.frames.len(), 3);
        assert_eq!(step.shared.len(), 0);
        let expected = dense(&sys, 0.0);
        assert!((step.frames[2][1] - expected[5]).abs() < 1e-9);
    }

    #[test]
    fn test_indefinite_returns_none() {
        let mut sys = BlockSystem::new(1, 2, 0);
        sys.diag[0] = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(sys.solve(0.0).is_none());
    }
}
