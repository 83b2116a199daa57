//! Decomposition of the charge-assignment mesh over a 3D Cartesian
//! process grid, and the communication schedule for its ghost margins.
//!
//! Everything here runs once at solver (re)configuration time: the
//! geometry of the local FFT grid is derived from this rank's spatial
//! sub-box, margin widths are exchanged with the six Cartesian
//! neighbours, and the resulting send/receive sub-blocks drive the
//! halo exchange of mesh data before and after the transform.

use std::error::Error;
use std::fmt;

use mpi::traits::*;

mod decomposition;
pub use self::decomposition::*;

mod local;
pub use self::local::*;

mod send;
pub use self::send::*;

mod diff_op;
pub use self::diff_op::*;

mod caf;
pub use self::caf::*;

/// How the long-range solver differentiates in Fourier space.
///
/// - `Ik`: multiply by the wavenumber, needs the differential operator.
/// - `Analytic`: differentiate the assignment function itself, needs
///   the derivative variant of the interpolation cache.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Differentiation {
    Ik,
    Analytic,
}

impl Differentiation {
    pub fn from_name(name: &str) -> Option<Differentiation> {
        match name {
            "ik" => Some(Differentiation::Ik),
            "analytic" => Some(Differentiation::Analytic),
            _ => None,
        }
    }
}

pub enum MeshError {
    BadBoxLength(usize, f64),
    GridTooSmall(usize, usize, usize),
    NegativeSkin(f64),
    BadAssignmentOrder(usize),
    SkinTooLarge(usize, f64, f64),
    EmptyInnerRegion(usize),
    NegativeMargin(usize, i64),
    BadRecvBlock(usize, usize),
    BadTopology([i32; 3], i32),
    BlockSizeMismatch(usize, usize, usize),
}

impl fmt::Debug for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use MeshError::*;
        match self {
            BadBoxLength(i, l) => write!(f, "box length along axis {} is {}, must be positive", i, l),
            GridTooSmall(i, n, min) => write!(f, "grid resolution along axis {} is {}, need at least {}", i, n, min),
            NegativeSkin(s) => write!(f, "skin is {}, must be non-negative", s),
            BadAssignmentOrder(cao) => write!(f, "charge assignment order is {}, must be between 1 and 7", cao),
            SkinTooLarge(i, skin, extent) => write!(f, "cutoff + skin + additional margin along axis {} is {}, exceeds half the local sub-box extent {}", i, skin, extent),
            EmptyInnerRegion(i) => write!(f, "local sub-box along axis {} is thinner than one mesh cell", i),
            NegativeMargin(i, w) => write!(f, "negative margin ({}) on axis {}", w, i),
            BadRecvBlock(dir, axis) => write!(f, "receive block for direction {} is inverted on axis {}: neighbour reported an inconsistent margin", dir, axis),
            BadTopology(grid, size) => write!(f, "process grid {}x{}x{} does not match communicator size {}", grid[0], grid[1], grid[2], size),
            BlockSizeMismatch(dir, expected, got) => write!(f, "halo exchange in direction {} delivered {} elements, expected {}", dir, got, expected),
        }
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for MeshError {}

/// Global, immutable-after-construction solver parameters. A change to
/// any of these invalidates every derived structure; rebuild them all
/// by calling [`prepare`] again.
pub struct Parameters {
    /// Global mesh resolution per axis.
    pub grid: [usize; 3],
    /// Box edge lengths.
    pub box_l: [f64; 3],
    /// Mesh offset in fractions of the spacing, 0.5 for a centred mesh.
    pub grid_off: [f64; 3],
    /// Charge assignment order, i.e. the width of the assignment
    /// stencil in mesh points.
    pub cao: usize,
    /// Verlet list safety margin.
    pub skin: f64,
    /// Extra physical margin, e.g. for the interpolation order of
    /// other terms.
    pub additional_grid: [f64; 3],
    /// Sampling resolution of the assignment-function cache.
    pub n_interpol: usize,
    /// k-space differentiation strategy.
    pub diff: Differentiation,
}

impl Parameters {
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.cao < 1 || self.cao > 7 {
            return Err(MeshError::BadAssignmentOrder(self.cao));
        }
        for i in 0..3 {
            if self.box_l[i] <= 0.0 {
                return Err(MeshError::BadBoxLength(i, self.box_l[i]));
            }
            // d_op needs at least the DC and Nyquist bins, charge
            // assignment needs cao points per axis
            let min = self.cao.max(2);
            if self.grid[i] < min {
                return Err(MeshError::GridTooSmall(i, self.grid[i], min));
            }
        }
        if self.skin < 0.0 {
            return Err(MeshError::NegativeSkin(self.skin));
        }
        Ok(())
    }
}

/// Mesh spacing and assignment cutoff, per axis. Recomputed whenever
/// the box length or the grid resolution changes.
#[derive(Copy, Clone)]
pub struct GridConstants {
    /// Inverse mesh spacing, grid / box_l.
    pub ai: [f64; 3],
    /// Mesh spacing.
    pub a: [f64; 3],
    /// Half-width of the charge assignment stencil in physical units.
    pub cao_cut: [f64; 3],
    /// Position offset for locating the first assignment grid point.
    pub pos_shift: f64,
}

impl GridConstants {
    /// Caller must have validated the parameters: a zero box length
    /// divides by zero here.
    pub fn new(p: &Parameters) -> GridConstants {
        let mut ai = [0.0; 3];
        let mut a = [0.0; 3];
        let mut cao_cut = [0.0; 3];
        for i in 0..3 {
            ai[i] = (p.grid[i] as f64) / p.box_l[i];
            a[i] = 1.0 / ai[i];
            cao_cut[i] = 0.5 * a[i] * (p.cao as f64);
        }
        let pos_shift = ((p.cao - 1) / 2) as f64 - (p.cao % 2) as f64 / 2.0;
        GridConstants { ai, a, cao_cut, pos_shift }
    }
}

/// Interface to the distributed-FFT collaborator: consumes the local
/// grid dimensions and margins to allocate and plan a padded local
/// transform.
pub trait TransformPlanner {
    fn plan(&mut self, dim: [usize; 3], margin: [usize; 6], grid: [usize; 3], grid_off: [f64; 3]) -> Result<(), MeshError>;
}

/// Interface to the charge-assignment-cache collaborator: rebuilds the
/// interpolation table (and, if requested, its derivative) for the
/// given assignment order and sampling resolution.
pub trait AssignmentBuilder {
    fn rebuild(&mut self, cao: usize, n_interpol: usize, derivative: bool);
}

/// All per-rank derived structures. Owned by the solver instance that
/// built them; never mutated field-by-field after construction.
pub struct MeshPrep {
    pub constants: GridConstants,
    pub local: LocalGrid,
    pub send: SendGrid,
    pub d_op: DifferentialOperator,
}

/// Runs the whole preparation pipeline: grid constants, local mesh
/// geometry, margin exchange with the six neighbours, send/receive
/// schedule, assignment cache rebuild and transform planning.
///
/// Blocks on the pairwise margin exchange, so must be called on all
/// ranks. Any error is terminal for this decomposition.
pub fn prepare(
    world: &impl Communicator,
    params: &Parameters,
    domain: &ProcessDomain,
    caf: &mut CafPolicy,
    builder: &mut impl AssignmentBuilder,
    planner: &mut impl TransformPlanner,
) -> Result<MeshPrep, MeshError> {
    log::debug!("prepare() started on rank {}", domain.rank);
    params.validate()?;
    let constants = GridConstants::new(params);

    let mut local = LocalGrid::new(params, &constants, domain)?;
    local.r_margin = exchange_margins(world, domain, &local.margin);
    let send = SendGrid::new(&local)?;
    log::debug!("{}", local);
    log::debug!("{}", send);

    caf.apply(params.cao, params.n_interpol, params.diff, builder);

    log::debug!("planning transform on rank {}", domain.rank);
    planner.plan(local.dim, local.margin, params.grid, params.grid_off)?;

    let d_op = DifferentialOperator::new(&params.grid)?;

    log::debug!("prepare() finished on rank {}", domain.rank);
    Ok(MeshPrep { constants, local, send, d_op })
}
