//! Differential operator for spectral differentiation

use crate::mesh::MeshError;

/// Signed wavenumber indices in standard FFT frequency ordering,
/// non-negative frequencies first. The `2*pi/L` prefactor is left to
/// the influence-function collaborator; the DC and Nyquist bins carry
/// no derivative.
#[derive(Debug)]
pub struct DifferentialOperator {
    d_op: [Vec<i64>; 3],
}

impl DifferentialOperator {
    pub fn new(grid: &[usize; 3]) -> Result<DifferentialOperator, MeshError> {
        let mut d_op: [Vec<i64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for i in 0..3 {
            let n = grid[i];
            if n < 2 {
                return Err(MeshError::GridTooSmall(i, n, 2));
            }
            let mut op = vec![0i64; n];
            op[0] = 0;
            op[n / 2] = 0;
            for j in 1..n / 2 {
                op[j] = j as i64;
                op[n - j] = -(j as i64);
            }
            d_op[i] = op;
        }
        Ok(DifferentialOperator { d_op })
    }

    pub fn axis(&self, i: usize) -> &[i64] {
        &self.d_op[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_point_operator() {
        let op = DifferentialOperator::new(&[8, 8, 8]).unwrap();
        println!("d_op[0] = {:?}", op.axis(0));
        assert!(op.axis(0) == [0, 1, 2, 3, 0, -3, -2, -1]);
    }

    #[test]
    fn antisymmetric_away_from_dc_and_nyquist() {
        let grid = [32, 16, 24];
        let op = DifferentialOperator::new(&grid).unwrap();
        for i in 0..3 {
            let n = grid[i];
            assert!(op.axis(i)[0] == 0);
            assert!(op.axis(i)[n / 2] == 0);
            for k in 1..n / 2 {
                assert!(op.axis(i)[k] == -op.axis(i)[n - k]);
            }
        }
    }

    #[test]
    fn rejects_degenerate_grid() {
        let err = DifferentialOperator::new(&[8, 1, 8]).unwrap_err();
        println!("{}", err);
        assert!(matches!(err, MeshError::GridTooSmall(1, 1, 2)));
    }
}
