//! garnet: domain decomposition and ghost-cell exchange preparation
//! for a distributed P3M electrostatics solver.
//!
//! Each MPI rank derives the geometry of its local charge-assignment
//! mesh from the global box and its share of the spatial
//! decomposition, exchanges margin widths with its six Cartesian
//! neighbours, and builds the send/receive schedule that drives the
//! halo exchange around the FFT. The transform itself and the
//! influence function are external collaborators; here they are stood
//! in for by recorders that log what they were asked to set up.

use std::error::Error;
use std::path::PathBuf;

use mpi::traits::*;
use ndarray::prelude::*;

mod setup;
use setup::*;

mod mesh;
use mesh::*;

/// Stand-in for the distributed-FFT collaborator: records the plan
/// request a real backend would use to allocate its padded local
/// buffers.
struct PlanRecorder {
    planned: Option<([usize; 3], [usize; 6])>,
}

impl TransformPlanner for PlanRecorder {
    fn plan(&mut self, dim: [usize; 3], margin: [usize; 6], grid: [usize; 3], grid_off: [f64; 3]) -> Result<(), MeshError> {
        log::info!(
            "transform plan requested: dim = {:?}, margin = {:?}, grid = {:?}, grid_off = {:?}",
            dim, margin, grid, grid_off
        );
        self.planned = Some((dim, margin));
        Ok(())
    }
}

/// Stand-in for the charge-assignment-cache collaborator.
struct TableRecorder {
    rebuilds: usize,
}

impl AssignmentBuilder for TableRecorder {
    fn rebuild(&mut self, cao: usize, n_interpol: usize, derivative: bool) {
        log::info!(
            "assignment table rebuild: cao = {}, {} sample points, derivative: {}",
            cao, n_interpol, derivative
        );
        self.rebuilds += 1;
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let id = world.rank();

    // Prepare configuration file

    let args: Vec<String> = std::env::args().collect();
    let path = args
        .get(1)
        .ok_or(InputError::InvalidInputFile("no file supplied"))?;
    let path = PathBuf::from(path);

    let mut config = Configuration::from_file(&path)?;
    config.with_context("constants");

    let grid_in = config.integer3("mesh", "grid")?;
    let box_l = config.real3("mesh", "box_l")?;
    let cao = config.integer("mesh", "cao")? as usize;
    let skin = config.real("mesh", "skin").unwrap_or(0.0);
    let grid_off = config.real3("mesh", "grid_off").unwrap_or([0.5; 3]);
    let additional_grid = config.real3("mesh", "additional_grid").unwrap_or([0.0; 3]);
    let n_interpol = config.integer("mesh", "n_interpol").unwrap_or(32768) as usize;
    let diff_name = config.string("mesh", "differentiation").unwrap_or_else(|_| "ik".to_owned());
    let diff = Differentiation::from_name(&diff_name)
        .ok_or_else(|| InputError::CouldNotParse("differentiation".to_owned(), diff_name))?;
    let node_grid_in = config
        .integer3("mesh", "node_grid")
        .unwrap_or([world.size() as i64, 1, 1]);

    let mut grid = [0usize; 3];
    let mut node_grid = [0i32; 3];
    for i in 0..3 {
        grid[i] = grid_in[i].max(0) as usize;
        node_grid[i] = node_grid_in[i] as i32;
    }

    let params = Parameters {
        grid,
        box_l,
        grid_off,
        cao,
        skin,
        additional_grid,
        n_interpol,
        diff,
    };

    // Decomposition and preparation

    let domain = ProcessDomain::cartesian(&world, node_grid, box_l)?;

    if id == 0 {
        println!(
            "Preparing {}x{}x{} mesh on {} tasks ({}x{}x{} process grid)...",
            grid[0], grid[1], grid[2], world.size(),
            node_grid[0], node_grid[1], node_grid[2]
        );
    }

    let mut caf = CafPolicy::new();
    let mut builder = TableRecorder { rebuilds: 0 };
    let mut planner = PlanRecorder { planned: None };
    let prep = prepare(&world, &params, &domain, &mut caf, &mut builder, &mut planner)?;

    log::info!("rank {} owns {:?} inner points of {:?} local", id, prep.local.inner, prep.local.dim);
    log::debug!(
        "rank {}: {} assignment table rebuild(s), transform plan recorded: {}",
        id, builder.rebuilds, planner.planned.is_some()
    );

    // Halo self-check: spread a field that is 1 on every inner point;
    // the margins are then filled from the neighbours' inner regions,
    // so every local cell must end up at exactly 1.

    let local = &prep.local;
    let mut density = Array3::<f64>::zeros((local.dim[0], local.dim[1], local.dim[2]));
    density
        .slice_mut(s![
            local.in_ld[0]..local.in_ur[0],
            local.in_ld[1]..local.in_ur[1],
            local.in_ld[2]..local.in_ur[2]
        ])
        .fill(1.0);

    spread_grid(&world, &domain, &prep.send, &mut density)?;

    let inner_points: usize = local.inner.iter().product();
    let holes = density.iter().filter(|&&v| v != 1.0).count();
    if holes == 0 {
        log::info!(
            "rank {}: ghost spread filled all {} margin cells",
            id, local.size - inner_points
        );
    } else {
        log::warn!("rank {}: ghost spread left {} cells unfilled", id, holes);
    }

    // The reverse operation folds the margins back onto their owners;
    // for a uniform decomposition the inner sum then matches the full
    // local mesh size.

    gather_grid(&world, &domain, &prep.send, &mut density)?;
    let inner_sum: f64 = density
        .slice(s![
            local.in_ld[0]..local.in_ur[0],
            local.in_ld[1]..local.in_ur[1],
            local.in_ld[2]..local.in_ur[2]
        ])
        .sum();
    log::info!(
        "rank {}: inner sum after gather = {} (local mesh has {} points)",
        id, inner_sum, local.size
    );

    if id == 0 {
        println!("Preparation complete: local dim = {:?}, margin = {:?}, transfer buffer = {} elements.",
            prep.local.dim, prep.local.margin, prep.send.max);
    }

    Ok(())
}
