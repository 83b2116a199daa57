//! Geometry of the local charge-assignment/FFT grid

use std::fmt;

use crate::mesh::{GridConstants, MeshError, Parameters, ProcessDomain};

/// Tolerance below which a boundary computation is treated as having
/// landed exactly on a mesh plane. A sub-box face shared by two ranks
/// evaluates to numerically identical coordinates on both sides, so
/// applying the same tolerance on both sides gives every
/// boundary-coincident mesh point exactly one owner.
pub const ROUND_ERROR_PREC: f64 = 1.0e-14;

fn float_is_zero(x: f64) -> bool {
    x.abs() < ROUND_ERROR_PREC
}

/// The local mesh of one rank: the inner region it owns plus the ghost
/// margins it needs so that charge assignment near the sub-box faces
/// never reaches for remote data mid-computation.
///
/// `in_ld`/`in_ur` are local (margin-relative) indices with `in_ur`
/// exclusive; `ld_ind` is the global index of the local origin and may
/// be negative (periodic wrap of the low-side margin).
#[derive(Debug)]
pub struct LocalGrid {
    /// Global index of the lower corner of the local mesh, margins
    /// included.
    pub ld_ind: [i64; 3],
    /// Spatial position of that corner.
    pub ld_pos: [f64; 3],
    /// Full local extent per axis, margins on both sides included.
    pub dim: [usize; 3],
    /// Number of local mesh points, `dim[0]*dim[1]*dim[2]`.
    pub size: usize,
    /// Extent of the inner (owned) region per axis.
    pub inner: [usize; 3],
    /// Local index of the first inner point per axis.
    pub in_ld: [usize; 3],
    /// Local index one past the last inner point per axis.
    pub in_ur: [usize; 3],
    /// Ghost margin width per face, ordered `{-x,+x,-y,+y,-z,+z}`.
    pub margin: [usize; 6],
    /// Margin widths reported by the neighbour on the opposite side of
    /// each face; filled by [`exchange_margins`](crate::mesh::exchange_margins).
    pub r_margin: [usize; 6],
    /// Flattening stride to advance one row within an assignment
    /// stencil, `dim[2] - cao`.
    pub q_2_off: isize,
    /// Flattening stride to advance one plane within an assignment
    /// stencil, `dim[2]*(dim[1] - cao)`.
    pub q_21_off: isize,
}

impl LocalGrid {
    /// Converts this rank's spatial sub-box into mesh-index geometry.
    ///
    /// Purely local; `r_margin` is left at zero until the margins have
    /// been exchanged with the neighbours.
    pub fn new(p: &Parameters, c: &GridConstants, dom: &ProcessDomain) -> Result<LocalGrid, MeshError> {
        // total physical margin beyond the owned sub-box
        let mut full_skin = [0.0; 3];
        for i in 0..3 {
            full_skin[i] = c.cao_cut[i] + p.skin + p.additional_grid[i];
            let extent = dom.my_right[i] - dom.my_left[i];
            if full_skin[i] > 0.5 * extent {
                return Err(MeshError::SkinTooLarge(i, full_skin[i], 0.5 * extent));
            }
        }

        // tightest integer mesh interval inside the owned sub-box
        // (global indices)
        let mut in_ld = [0i64; 3];
        let mut in_ur = [0i64; 3];
        for i in 0..3 {
            in_ld[i] = (dom.my_left[i] * c.ai[i] - p.grid_off[i]).ceil() as i64;
            in_ur[i] = (dom.my_right[i] * c.ai[i] - p.grid_off[i]).floor() as i64;
        }

        // a mesh point exactly on a shared face belongs to the
        // upper-side rank: pull in_ur off the face here, and in_ld off
        // the face where ceil() already rounded past it
        for i in 0..3 {
            if float_is_zero(dom.my_right[i] * c.ai[i] - p.grid_off[i] - in_ur[i] as f64) {
                in_ur[i] -= 1;
            }
            if float_is_zero(1.0 + dom.my_left[i] * c.ai[i] - p.grid_off[i] - in_ld[i] as f64) {
                in_ld[i] -= 1;
            }
        }

        let mut inner = [0usize; 3];
        for i in 0..3 {
            let n = in_ur[i] - in_ld[i] + 1;
            if n < 1 {
                return Err(MeshError::EmptyInnerRegion(i));
            }
            inner[i] = n as usize;
        }

        // origin of the full local mesh, margin included; this is a
        // margin boundary, not an ownership boundary, so no tie-break
        let mut ld_ind = [0i64; 3];
        let mut ld_pos = [0.0; 3];
        for i in 0..3 {
            ld_ind[i] = ((dom.my_left[i] - full_skin[i]) * c.ai[i] - p.grid_off[i]).ceil() as i64;
            ld_pos[i] = (ld_ind[i] as f64 + p.grid_off[i]) * c.a[i];
        }

        let mut margin = [0usize; 6];
        for i in 0..3 {
            let m = in_ld[i] - ld_ind[i];
            if m < 0 {
                return Err(MeshError::NegativeMargin(i, m));
            }
            margin[2 * i] = m as usize;
        }

        // uppermost mesh point still needed locally
        let mut ind = [0i64; 3];
        for i in 0..3 {
            let upper = (dom.my_right[i] + full_skin[i]) * c.ai[i] - p.grid_off[i];
            ind[i] = upper.floor() as i64;
            if upper - ind[i] as f64 == 0.0 {
                ind[i] -= 1;
            }
            let m = ind[i] - in_ur[i];
            if m < 0 {
                return Err(MeshError::NegativeMargin(i, m));
            }
            margin[2 * i + 1] = m as usize;
        }

        let mut dim = [0usize; 3];
        let mut size = 1;
        for i in 0..3 {
            dim[i] = (ind[i] - ld_ind[i] + 1) as usize;
            size *= dim[i];
        }

        // shift the inner bounds from global to local coordinates
        let mut in_ld_local = [0usize; 3];
        let mut in_ur_local = [0usize; 3];
        for i in 0..3 {
            in_ld_local[i] = margin[2 * i];
            in_ur_local[i] = margin[2 * i] + inner[i];
        }

        let q_2_off = dim[2] as isize - p.cao as isize;
        let q_21_off = dim[2] as isize * (dim[1] as isize - p.cao as isize);

        Ok(LocalGrid {
            ld_ind,
            ld_pos,
            dim,
            size,
            inner,
            in_ld: in_ld_local,
            in_ur: in_ur_local,
            margin,
            r_margin: [0; 6],
            q_2_off,
            q_21_off,
        })
    }

    /// Global index of the first inner mesh point on the given axis.
    pub fn inner_start(&self, axis: usize) -> i64 {
        self.ld_ind[axis] + self.in_ld[axis] as i64
    }
}

impl fmt::Display for LocalGrid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "local grid:")?;
        writeln!(f, "  dim = {:?}, size = {}", self.dim, self.size)?;
        writeln!(f, "  ld_ind = {:?}, ld_pos = {:?}", self.ld_ind, self.ld_pos)?;
        writeln!(f, "  inner = {:?} [{:?} - {:?}]", self.inner, self.in_ld, self.in_ur)?;
        writeln!(f, "  margin = {:?}", self.margin)?;
        write!(f, "  r_margin = {:?}", self.r_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Differentiation, ProcessDomain};

    fn params(grid: [usize; 3], box_l: [f64; 3], grid_off: f64, cao: usize, skin: f64) -> (Parameters, GridConstants) {
        let p = Parameters {
            grid,
            box_l,
            grid_off: [grid_off; 3],
            cao,
            skin,
            additional_grid: [0.0; 3],
            n_interpol: 0,
            diff: Differentiation::Ik,
        };
        p.validate().unwrap();
        let c = GridConstants::new(&p);
        (p, c)
    }

    fn domains(numtasks: i32, node_grid: [i32; 3], box_l: [f64; 3]) -> Vec<ProcessDomain> {
        (0..numtasks)
            .map(|r| ProcessDomain::from_rank(r, numtasks, node_grid, box_l).unwrap())
            .collect()
    }

    #[test]
    fn single_rank_unit_spacing() {
        let (p, c) = params([8, 8, 8], [8.0; 3], 0.5, 3, 0.0);
        let dom = ProcessDomain::from_rank(0, 1, [1, 1, 1], p.box_l).unwrap();
        let local = LocalGrid::new(&p, &c, &dom).unwrap();
        println!("{}", local);
        for i in 0..3 {
            assert!(local.inner[i] == 8);
            assert!(local.ld_ind[i] == -2);
            assert!(local.margin[2 * i] == 2);
            assert!(local.margin[2 * i + 1] == 1);
            assert!(local.dim[i] == 11);
            assert!(local.in_ld[i] == 2);
            assert!(local.in_ur[i] == 10);
            assert!(local.ld_pos[i] == -1.5);
        }
        assert!(local.size == 11 * 11 * 11);
        assert!(local.q_2_off == 8);
        assert!(local.q_21_off == 88);
    }

    #[test]
    fn two_ranks_split_x() {
        let (p, c) = params([8, 8, 8], [8.0; 3], 0.5, 3, 0.0);
        let doms = domains(2, [2, 1, 1], p.box_l);
        let lo = LocalGrid::new(&p, &c, &doms[0]).unwrap();
        let hi = LocalGrid::new(&p, &c, &doms[1]).unwrap();
        println!("{}", lo);
        println!("{}", hi);
        // inner regions sum to the global extent with no double count
        assert!(lo.inner[0] + hi.inner[0] == 8);
        assert!(lo.inner_start(0) == 0);
        assert!(hi.inner_start(0) == lo.inner_start(0) + lo.inner[0] as i64);
        // unsplit axes look like the single-rank case
        assert!(lo.inner[1] == 8 && lo.dim[1] == 11);
    }

    /// Every spatial point must belong to exactly one rank's inner
    /// region, even when the decomposition boundary coincides with a
    /// mesh plane (grid_off = 0 puts mesh points exactly on x = 4).
    #[test]
    fn boundary_point_has_one_owner() {
        let (p, c) = params([8, 8, 8], [8.0; 3], 0.0, 3, 0.0);
        let doms = domains(2, [2, 1, 1], p.box_l);
        let lo = LocalGrid::new(&p, &c, &doms[0]).unwrap();
        let hi = LocalGrid::new(&p, &c, &doms[1]).unwrap();
        println!("lo inner x: {} + {}", lo.inner_start(0), lo.inner[0]);
        println!("hi inner x: {} + {}", hi.inner_start(0), hi.inner[0]);
        // the point at x = 4 resolves to the upper rank
        assert!(lo.inner_start(0) == 0 && lo.inner[0] == 4);
        assert!(hi.inner_start(0) == 4 && hi.inner[0] == 4);
    }

    /// Boundaries within floating-point rounding of a mesh plane snap
    /// to it, so both sides of a one-ulp-perturbed face still agree.
    #[test]
    fn tolerance_snaps_perturbed_boundary() {
        let (p, c) = params([8, 8, 8], [8.0; 3], 0.0, 3, 0.0);
        let eps = 1.0e-15;
        let mut below = ProcessDomain::from_rank(0, 2, [2, 1, 1], p.box_l).unwrap();
        let mut above = ProcessDomain::from_rank(1, 2, [2, 1, 1], p.box_l).unwrap();
        below.my_right[0] = 4.0 + eps;
        above.my_left[0] = 4.0 + eps;
        let lo = LocalGrid::new(&p, &c, &below).unwrap();
        let hi = LocalGrid::new(&p, &c, &above).unwrap();
        println!("lo: start {} count {}", lo.inner_start(0), lo.inner[0]);
        println!("hi: start {} count {}", hi.inner_start(0), hi.inner[0]);
        assert!(lo.inner_start(0) + lo.inner[0] as i64 == hi.inner_start(0));
        assert!(lo.inner[0] + hi.inner[0] == 8);
    }

    fn check_tiling(grid: [usize; 3], box_l: [f64; 3], node_grid: [i32; 3], cao: usize, skin: f64) {
        let (p, c) = params(grid, box_l, 0.5, cao, skin);
        let numtasks = node_grid[0] * node_grid[1] * node_grid[2];
        let mut cover = vec![0u32; grid[0] * grid[1] * grid[2]];
        for dom in domains(numtasks, node_grid, box_l) {
            let local = LocalGrid::new(&p, &c, &dom).unwrap();
            for x in 0..local.inner[0] as i64 {
                for y in 0..local.inner[1] as i64 {
                    for z in 0..local.inner[2] as i64 {
                        let gx = local.inner_start(0) + x;
                        let gy = local.inner_start(1) + y;
                        let gz = local.inner_start(2) + z;
                        assert!(gx >= 0 && (gx as usize) < grid[0]);
                        assert!(gy >= 0 && (gy as usize) < grid[1]);
                        assert!(gz >= 0 && (gz as usize) < grid[2]);
                        let idx = ((gx as usize) * grid[1] + gy as usize) * grid[2] + gz as usize;
                        cover[idx] += 1;
                    }
                }
            }
        }
        let overlaps = cover.iter().filter(|&&n| n > 1).count();
        let gaps = cover.iter().filter(|&&n| n == 0).count();
        println!("{:?} over {:?}: {} overlaps, {} gaps", grid, node_grid, overlaps, gaps);
        assert!(overlaps == 0);
        assert!(gaps == 0);
    }

    #[test]
    fn inner_regions_tile_the_global_mesh() {
        let grid = [32, 16, 24];
        let box_l = [16.0, 16.0, 6.0];
        check_tiling(grid, box_l, [1, 1, 1], 3, 0.3);
        check_tiling(grid, box_l, [2, 1, 1], 3, 0.3);
        check_tiling(grid, box_l, [2, 2, 1], 3, 0.3);
        check_tiling(grid, box_l, [2, 2, 2], 3, 0.3);
        // sub-unit spacings on every axis
        check_tiling([32, 16, 24], [8.0, 4.0, 12.0], [2, 2, 2], 3, 0.0);
        // odd process count along one axis
        check_tiling([32, 16, 24], [16.0, 16.0, 6.0], [4, 1, 1], 3, 0.0);
    }

    #[test]
    fn idempotent_rebuild() {
        let (p, c) = params([32, 16, 24], [16.0, 16.0, 6.0], 0.5, 5, 0.25);
        let dom = ProcessDomain::from_rank(3, 4, [2, 2, 1], p.box_l).unwrap();
        let first = LocalGrid::new(&p, &c, &dom).unwrap();
        let second = LocalGrid::new(&p, &c, &dom).unwrap();
        assert!(first.ld_ind == second.ld_ind);
        assert!(first.ld_pos == second.ld_pos);
        assert!(first.dim == second.dim);
        assert!(first.inner == second.inner);
        assert!(first.margin == second.margin);
        assert!(first.in_ld == second.in_ld && first.in_ur == second.in_ur);
    }

    #[test]
    fn oversized_skin_is_reported() {
        let (p, c) = params([8, 8, 8], [8.0; 3], 0.5, 3, 0.0);
        let mut p = p;
        p.skin = 3.0; // full_skin = 4.5 > half of 8
        let dom = ProcessDomain::from_rank(0, 1, [1, 1, 1], p.box_l).unwrap();
        let err = LocalGrid::new(&p, &c, &dom).unwrap_err();
        println!("{}", err);
        assert!(matches!(err, MeshError::SkinTooLarge(0, _, _)));
    }
}
