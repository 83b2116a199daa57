//! Placement of this rank within the Cartesian process grid

use mpi::traits::*;

use crate::mesh::MeshError;

/// This rank's share of the spatial decomposition: the owned sub-box
/// and the six neighbouring ranks in the `{-x,+x,-y,+y,-z,+z}`
/// directions. With a single process along an axis the rank is its own
/// neighbour on both faces (periodic wraparound).
#[derive(Debug)]
pub struct ProcessDomain {
    pub rank: i32,
    /// Number of processes along each axis.
    pub node_grid: [i32; 3],
    /// This rank's coordinate in the process grid.
    pub node_pos: [i32; 3],
    /// Adjacent ranks, ordered `{-x,+x,-y,+y,-z,+z}`.
    pub node_neighbors: [i32; 6],
    /// Lower corner of the owned sub-box.
    pub my_left: [f64; 3],
    /// Upper corner of the owned sub-box.
    pub my_right: [f64; 3],
}

impl ProcessDomain {
    /// Splits the box evenly over `node_grid` processes and works out
    /// where the calling process sits.
    pub fn cartesian(comm: &impl Communicator, node_grid: [i32; 3], box_l: [f64; 3]) -> Result<ProcessDomain, MeshError> {
        ProcessDomain::from_rank(comm.rank(), comm.size(), node_grid, box_l)
    }

    /// Same as [`ProcessDomain::cartesian`], but for an explicit rank
    /// and task count. Ranks are assigned in row-major order, the
    /// z-coordinate varying fastest.
    pub fn from_rank(rank: i32, numtasks: i32, node_grid: [i32; 3], box_l: [f64; 3]) -> Result<ProcessDomain, MeshError> {
        if node_grid.iter().any(|&n| n < 1) || node_grid[0] * node_grid[1] * node_grid[2] != numtasks {
            return Err(MeshError::BadTopology(node_grid, numtasks));
        }

        let node_pos = [
            rank / (node_grid[1] * node_grid[2]),
            (rank / node_grid[2]) % node_grid[1],
            rank % node_grid[2],
        ];

        let rank_of = |pos: [i32; 3]| -> i32 {
            (pos[0] * node_grid[1] + pos[1]) * node_grid[2] + pos[2]
        };

        let mut node_neighbors = [0; 6];
        for i in 0..3 {
            let mut lower = node_pos;
            lower[i] = (node_pos[i] - 1 + node_grid[i]) % node_grid[i];
            let mut upper = node_pos;
            upper[i] = (node_pos[i] + 1) % node_grid[i];
            node_neighbors[2 * i] = rank_of(lower);
            node_neighbors[2 * i + 1] = rank_of(upper);
        }

        // adjacent ranks evaluate the identical expression for their
        // shared plane, so both sides see the same boundary value
        let mut my_left = [0.0; 3];
        let mut my_right = [0.0; 3];
        for i in 0..3 {
            my_left[i] = (node_pos[i] as f64) * box_l[i] / (node_grid[i] as f64);
            my_right[i] = ((node_pos[i] + 1) as f64) * box_l[i] / (node_grid[i] as f64);
        }

        Ok(ProcessDomain {
            rank,
            node_grid,
            node_pos,
            node_neighbors,
            my_left,
            my_right,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rank_is_own_neighbour() {
        let dom = ProcessDomain::from_rank(0, 1, [1, 1, 1], [8.0, 8.0, 8.0]).unwrap();
        assert!(dom.node_pos == [0, 0, 0]);
        assert!(dom.node_neighbors == [0; 6]);
        assert!(dom.my_left == [0.0; 3]);
        assert!(dom.my_right == [8.0; 3]);
    }

    #[test]
    fn two_ranks_split_x() {
        let a = ProcessDomain::from_rank(0, 2, [2, 1, 1], [8.0, 8.0, 8.0]).unwrap();
        let b = ProcessDomain::from_rank(1, 2, [2, 1, 1], [8.0, 8.0, 8.0]).unwrap();
        println!("a: left = {:?}, right = {:?}", a.my_left, a.my_right);
        println!("b: left = {:?}, right = {:?}", b.my_left, b.my_right);
        // each rank's x-neighbours reference the other rank
        assert!(a.node_neighbors[0] == 1 && a.node_neighbors[1] == 1);
        assert!(b.node_neighbors[0] == 0 && b.node_neighbors[1] == 0);
        // y and z wrap onto themselves
        assert!(a.node_neighbors[2..] == [0, 0, 0, 0]);
        // shared plane has the identical value on both sides
        assert!(a.my_right[0] == 4.0);
        assert!(b.my_left[0] == 4.0);
        assert!(b.my_right[0] == 8.0);
    }

    #[test]
    fn eight_ranks_positions_and_neighbours() {
        let box_l = [8.0, 8.0, 8.0];
        let dom = ProcessDomain::from_rank(5, 8, [2, 2, 2], box_l).unwrap();
        // rank 5 = (1, 0, 1) in row-major order with z fastest
        assert!(dom.node_pos == [1, 0, 1]);
        assert!(dom.node_neighbors[0] == 1); // (0,0,1)
        assert!(dom.node_neighbors[1] == 1); // wraps back
        assert!(dom.node_neighbors[2] == 7); // (1,1,1)
        assert!(dom.node_neighbors[4] == 4); // (1,0,0)
        assert!(dom.my_left == [4.0, 0.0, 4.0]);
        assert!(dom.my_right == [8.0, 4.0, 8.0]);
    }

    #[test]
    fn rejects_mismatched_topology() {
        let err = ProcessDomain::from_rank(0, 4, [2, 1, 1], [8.0; 3]).unwrap_err();
        println!("{}", err);
        assert!(matches!(err, MeshError::BadTopology(_, 4)));
    }
}
