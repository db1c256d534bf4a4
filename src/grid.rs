use simulation_common::Vec3;

/// Periodic 3D cell list used to find pair-interaction neighbours.
///
/// Cells are at least `r_cut` wide, so every neighbour within the cutoff lies
/// in the 3x3x3 block around a particle's cell. When the box holds fewer than
/// three cells along any axis the list falls back to an all-pairs scan.
#[derive(Debug, Clone)]
pub struct CellList {
    dims: [usize; 3],
    all_pairs: bool,
    num_particles: usize,
    // Grid cell index for each particle
    particle_cells: Vec<usize>,
    // Number of particles in each grid cell
    cell_counts: Vec<usize>,
    // Start index in cell_particle_indices for each grid cell (prefix sum)
    cell_starts: Vec<usize>,
    // Particle indices sorted by grid cell
    cell_particle_indices: Vec<usize>,
}

impl CellList {
    /// Bins `positions` (wrapped into `[-L/2, L/2)`) into cells of width >= `r_cut`.
    pub fn build(positions: &[Vec3], box_lengths: Vec3, r_cut: f64) -> Self {
        let num_particles = positions.len();
        let mut dims = [1usize; 3];
        for (axis, dim) in dims.iter_mut().enumerate() {
            if r_cut > 0.0 {
                *dim = ((box_lengths[axis] / r_cut).floor() as usize).max(1);
            }
        }
        let all_pairs = dims.iter().any(|&d| d < 3);
        if all_pairs {
            return CellList {
                dims,
                all_pairs,
                num_particles,
                particle_cells: Vec::new(),
                cell_counts: Vec::new(),
                cell_starts: Vec::new(),
                cell_particle_indices: Vec::new(),
            };
        }

        let num_cells = dims[0] * dims[1] * dims[2];

        // Phase 1: assign a cell to each particle
        let particle_cells: Vec<usize> = positions
            .iter()
            .map(|pos| {
                let mut coords = [0usize; 3];
                for axis in 0..3 {
                    let frac = pos[axis] / box_lengths[axis] + 0.5;
                    let c = (frac * dims[axis] as f64).floor() as isize;
                    coords[axis] = c.clamp(0, dims[axis] as isize - 1) as usize;
                }
                (coords[2] * dims[1] + coords[1]) * dims[0] + coords[0]
            })
            .collect();

        // Phase 2: count particles per cell
        let mut cell_counts = vec![0usize; num_cells];
        for &cell in &particle_cells {
            cell_counts[cell] += 1;
        }

        // Phase 3: prefix sum for cell start indices
        let mut cell_starts = vec![0usize; num_cells];
        let mut total = 0;
        for (start, count) in cell_starts.iter_mut().zip(&cell_counts) {
            *start = total;
            total += count;
        }

        // Phase 4: scatter particle indices into their cell's block
        let mut write_offsets = cell_starts.clone();
        let mut cell_particle_indices = vec![0usize; num_particles];
        for (idx, &cell) in particle_cells.iter().enumerate() {
            cell_particle_indices[write_offsets[cell]] = idx;
            write_offsets[cell] += 1;
        }

        CellList {
            dims,
            all_pairs,
            num_particles,
            particle_cells,
            cell_counts,
            cell_starts,
            cell_particle_indices,
        }
    }

    /// True when the list degenerated to an all-pairs scan.
    pub fn is_all_pairs(&self) -> bool {
        self.all_pairs
    }

    /// Calls `f` for every candidate neighbour of `particle_idx` (never the particle itself).
    ///
    /// Candidates still have to be checked against the cutoff by the caller.
    #[inline(always)]
    pub fn for_each_neighbor<F>(&self, particle_idx: usize, mut f: F)
    where
        F: FnMut(usize),
    {
        if self.all_pairs {
            for j in (0..self.num_particles).filter(|&j| j != particle_idx) {
                f(j);
            }
            return;
        }

        let [nx, ny, nz] = self.dims;
        let cell = self.particle_cells[particle_idx];
        let cx = cell % nx;
        let cy = (cell / nx) % ny;
        let cz = cell / (nx * ny);

        for dz in [nz - 1, 0, 1] {
            for dy in [ny - 1, 0, 1] {
                for dx in [nx - 1, 0, 1] {
                    // periodic wrap; dims >= 3 so the 27 cells are distinct
                    let x = (cx + dx) % nx;
                    let y = (cy + dy) % ny;
                    let z = (cz + dz) % nz;
                    let neighbor_cell = (z * ny + y) * nx + x;
                    let start = self.cell_starts[neighbor_cell];
                    let end = start + self.cell_counts[neighbor_cell];
                    for &j in &self.cell_particle_indices[start..end] {
                        if j != particle_idx {
                            f(j);
                        }
                    }
                }
            }
        }
    }
}
