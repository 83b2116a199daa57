//! Send/receive schedule for the ghost-margin exchange

use std::fmt;

use mpi::traits::*;
use ndarray::prelude::*;

use crate::mesh::{LocalGrid, MeshError, ProcessDomain};

/// The rectangular sub-blocks of the local mesh exchanged with each of
/// the six Cartesian neighbours, lower bounds inclusive and upper
/// bounds exclusive, in local coordinates.
///
/// The send blocks are built face by face in axis order: once an axis
/// has been handled, later blocks stop short of its margins, so the
/// blocks nest like onion shells and every corner and edge cell is
/// transmitted exactly once.
#[derive(Debug)]
pub struct SendGrid {
    pub s_ld: [[usize; 3]; 6],
    pub s_ur: [[usize; 3]; 6],
    pub s_dim: [[usize; 3]; 6],
    pub s_size: [usize; 6],
    pub r_ld: [[usize; 3]; 6],
    pub r_ur: [[usize; 3]; 6],
    pub r_dim: [[usize; 3]; 6],
    pub r_size: [usize; 6],
    /// Largest element count over all twelve blocks; a single transfer
    /// buffer of this size suffices for every exchange.
    pub max: usize,
}

/// The direction opposite to `dir`, i.e. the face the matching message
/// arrives on.
fn opposite(dir: usize) -> usize {
    if dir % 2 == 0 { dir + 1 } else { dir - 1 }
}

impl SendGrid {
    /// Derives the full schedule. Requires `local.r_margin` to have
    /// been filled by [`exchange_margins`]; a neighbour that reported
    /// an inconsistent margin shows up here as an inverted receive
    /// block.
    pub fn new(local: &LocalGrid) -> Result<SendGrid, MeshError> {
        let mut s_ld = [[0usize; 3]; 6];
        let mut s_ur = [[0usize; 3]; 6];

        let mut done = [false; 3];
        for i in 0..3 {
            for j in 0..3 {
                let lo_margin = if done[j] { local.margin[2 * j] } else { 0 };
                let hi_margin = if done[j] { local.margin[2 * j + 1] } else { 0 };
                // low face
                s_ld[2 * i][j] = lo_margin;
                s_ur[2 * i][j] = if j == i {
                    local.margin[2 * j]
                } else {
                    local.dim[j] - hi_margin
                };
                // high face
                s_ld[2 * i + 1][j] = if j == i { local.in_ur[j] } else { lo_margin };
                s_ur[2 * i + 1][j] = if j == i {
                    local.dim[j]
                } else {
                    local.dim[j] - hi_margin
                };
            }
            done[i] = true;
        }

        let mut s_dim = [[0usize; 3]; 6];
        let mut s_size = [0usize; 6];
        let mut max = 0;
        for dir in 0..6 {
            s_size[dir] = 1;
            for j in 0..3 {
                s_dim[dir][j] = s_ur[dir][j] - s_ld[dir][j];
                s_size[dir] *= s_dim[dir][j];
            }
            max = max.max(s_size[dir]);
        }

        // receive blocks: along the exchange axis the block sits where
        // the neighbour's send block lands, sized by the margin the
        // neighbour reported; identical to the send block elsewhere
        let mut r_ld = [[0usize; 3]; 6];
        let mut r_ur = [[0usize; 3]; 6];
        for i in 0..3 {
            for j in 0..3 {
                let (lo, hi) = (2 * i, 2 * i + 1);
                if j == i {
                    let bounds = [
                        (lo, s_ld[lo][j] as i64 + local.margin[2 * j] as i64,
                             s_ur[lo][j] as i64 + local.r_margin[2 * j] as i64),
                        (hi, s_ld[hi][j] as i64 - local.r_margin[2 * j + 1] as i64,
                             s_ur[hi][j] as i64 - local.margin[2 * j + 1] as i64),
                    ];
                    for &(dir, ld, ur) in bounds.iter() {
                        if ld < 0 || ur < ld || ur > local.dim[j] as i64 {
                            return Err(MeshError::BadRecvBlock(dir, j));
                        }
                        r_ld[dir][j] = ld as usize;
                        r_ur[dir][j] = ur as usize;
                    }
                } else {
                    r_ld[lo][j] = s_ld[lo][j];
                    r_ur[lo][j] = s_ur[lo][j];
                    r_ld[hi][j] = s_ld[hi][j];
                    r_ur[hi][j] = s_ur[hi][j];
                }
            }
        }

        let mut r_dim = [[0usize; 3]; 6];
        let mut r_size = [0usize; 6];
        for dir in 0..6 {
            r_size[dir] = 1;
            for j in 0..3 {
                r_dim[dir][j] = r_ur[dir][j] - r_ld[dir][j];
                r_size[dir] *= r_dim[dir][j];
            }
            max = max.max(r_size[dir]);
        }

        Ok(SendGrid {
            s_ld,
            s_ur,
            s_dim,
            s_size,
            r_ld,
            r_ur,
            r_dim,
            r_size,
            max,
        })
    }
}

impl fmt::Display for SendGrid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "send grid: max = {}", self.max)?;
        for dir in 0..6 {
            writeln!(
                f,
                "  dir {}: s_dim {:?} s_ld {:?} s_ur {:?} s_size {}",
                dir, self.s_dim[dir], self.s_ld[dir], self.s_ur[dir], self.s_size[dir]
            )?;
            writeln!(
                f,
                "         r_dim {:?} r_ld {:?} r_ur {:?} r_size {}",
                self.r_dim[dir], self.r_ld[dir], self.r_ur[dir], self.r_size[dir]
            )?;
        }
        Ok(())
    }
}

/// Exchanges this rank's margin widths pairwise with the six
/// neighbours; the result is the width of the data each neighbour will
/// send into our mesh, indexed by the face it arrives on.
///
/// Communication is split into two passes by position parity along the
/// exchange axis, so no ring of same-direction sends can deadlock.
/// Self-communication (one process along an axis) is a local copy.
///
/// Must be called on all ranks, and must complete before any receive
/// block is derived.
pub fn exchange_margins(world: &impl Communicator, dom: &ProcessDomain, margin: &[usize; 6]) -> [usize; 6] {
    let mut r_margin = [0usize; 6];
    for dir in 0..6 {
        let opp = opposite(dir);
        if dom.node_neighbors[dir] != dom.rank {
            for evenodd in 0..2i32 {
                if (dom.node_pos[dir / 2] + evenodd) % 2 == 0 {
                    log::debug!("{}: sending margin[{}] to {}", dom.rank, dir, dom.node_neighbors[dir]);
                    world
                        .process_at_rank(dom.node_neighbors[dir])
                        .send(&(margin[dir] as i32));
                } else {
                    log::debug!("{}: receiving r_margin[{}] from {}", dom.rank, opp, dom.node_neighbors[opp]);
                    let (m, _status) = world.process_at_rank(dom.node_neighbors[opp]).receive::<i32>();
                    r_margin[opp] = m as usize;
                }
            }
        } else {
            r_margin[opp] = margin[dir];
        }
    }
    r_margin
}

fn pack_block(mesh: &Array3<f64>, ld: &[usize; 3], ur: &[usize; 3], buf: &mut Vec<f64>) {
    buf.clear();
    buf.extend(mesh.slice(s![ld[0]..ur[0], ld[1]..ur[1], ld[2]..ur[2]]).iter());
}

fn unpack_add(buf: &[f64], mesh: &mut Array3<f64>, ld: &[usize; 3], ur: &[usize; 3]) {
    let mut block = mesh.slice_mut(s![ld[0]..ur[0], ld[1]..ur[1], ld[2]..ur[2]]);
    for (cell, v) in block.iter_mut().zip(buf.iter()) {
        *cell += *v;
    }
}

fn unpack_assign(buf: &[f64], mesh: &mut Array3<f64>, ld: &[usize; 3], ur: &[usize; 3]) {
    let mut block = mesh.slice_mut(s![ld[0]..ur[0], ld[1]..ur[1], ld[2]..ur[2]]);
    for (cell, v) in block.iter_mut().zip(buf.iter()) {
        *cell = *v;
    }
}

/// One send/receive with the neighbour pair of `dir`, two-phase by
/// position parity, short-circuited to a buffer swap when the rank is
/// its own neighbour. Sends toward `node_neighbors[dir]`, receives
/// from `node_neighbors[opposite(dir)]`.
fn exchange_blocks(
    world: &impl Communicator,
    dom: &ProcessDomain,
    dir: usize,
    send_buf: &mut Vec<f64>,
    recv_buf: &mut Vec<f64>,
) {
    let opp = opposite(dir);
    if dom.node_neighbors[dir] != dom.rank {
        recv_buf.clear();
        for evenodd in 0..2i32 {
            if (dom.node_pos[dir / 2] + evenodd) % 2 == 0 {
                world
                    .process_at_rank(dom.node_neighbors[dir])
                    .synchronous_send(&send_buf[..]);
            } else {
                let (mut tmp, _status) = world.process_at_rank(dom.node_neighbors[opp]).receive_vec::<f64>();
                recv_buf.append(&mut tmp);
            }
        }
    } else {
        std::mem::swap(send_buf, recv_buf);
    }
}

/// Accumulates ghost-margin contributions into the inner region of
/// every rank: for each direction, the send block is shipped to that
/// neighbour and the arriving block is *added* into the matching
/// receive block. Used on the assigned charge density before the
/// forward transform.
///
/// Must be called on all ranks.
pub fn gather_grid(
    world: &impl Communicator,
    dom: &ProcessDomain,
    sm: &SendGrid,
    mesh: &mut Array3<f64>,
) -> Result<(), MeshError> {
    let mut send_buf: Vec<f64> = Vec::with_capacity(sm.max);
    let mut recv_buf: Vec<f64> = Vec::with_capacity(sm.max);

    for dir in 0..6 {
        let opp = opposite(dir);
        pack_block(mesh, &sm.s_ld[dir], &sm.s_ur[dir], &mut send_buf);
        exchange_blocks(world, dom, dir, &mut send_buf, &mut recv_buf);
        if recv_buf.len() != sm.r_size[opp] {
            return Err(MeshError::BlockSizeMismatch(opp, sm.r_size[opp], recv_buf.len()));
        }
        unpack_add(&recv_buf, mesh, &sm.r_ld[opp], &sm.r_ur[opp]);
    }
    Ok(())
}

/// The inverse walk of [`gather_grid`]: directions in descending
/// order, the roles of the send and receive blocks swapped, and the
/// arriving data *overwrites* the margin cells. Used to distribute the
/// computed potential or field back into the ghost margins before
/// force gathering.
///
/// Must be called on all ranks.
pub fn spread_grid(
    world: &impl Communicator,
    dom: &ProcessDomain,
    sm: &SendGrid,
    mesh: &mut Array3<f64>,
) -> Result<(), MeshError> {
    let mut send_buf: Vec<f64> = Vec::with_capacity(sm.max);
    let mut recv_buf: Vec<f64> = Vec::with_capacity(sm.max);

    for dir in (0..6).rev() {
        let opp = opposite(dir);
        pack_block(mesh, &sm.r_ld[opp], &sm.r_ur[opp], &mut send_buf);
        exchange_blocks(world, dom, opp, &mut send_buf, &mut recv_buf);
        if recv_buf.len() != sm.s_size[dir] {
            return Err(MeshError::BlockSizeMismatch(dir, sm.s_size[dir], recv_buf.len()));
        }
        unpack_assign(&recv_buf, mesh, &sm.s_ld[dir], &sm.s_ur[dir]);
    }
    Ok(())
}
