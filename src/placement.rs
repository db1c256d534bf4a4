use crate::error::{require_positive, SimError, SimResult};
use rand::prelude::*;
use rand::seq::SliceRandom;
use simulation_common::{Snapshot, SystemConfig, Vec3};

// Random offset applied to each bead, as a fraction of the lattice spacing
const JITTER_FRACTION: f64 = 0.05;

/// Builds linear bead chains on a simple cubic lattice at the configured number density.
///
/// Lattice sites are visited along a space-filling serpentine path, so
/// consecutive sites are always nearest neighbours. The path is cut into one
/// segment per chain; the seeded RNG shuffles which segment each chain gets
/// and jitters every bead slightly off its site.
pub fn place_chains(config: &SystemConfig) -> SimResult<Snapshot> {
    require_positive("number_density", config.number_density)?;
    require_positive("bead_mass", config.bead_mass)?;
    if config.n_chains == 0 || config.chain_length == 0 {
        return Err(SimError::parameter("n_chains * chain_length", 0.0, "must be at least 1"));
    }

    let chain_length = config.chain_length as usize;
    let num_beads = config.n_chains as usize * chain_length;
    let sites_per_side = (num_beads as f64).cbrt().ceil() as usize;
    let box_side = (num_beads as f64 / config.number_density).cbrt();
    let spacing = box_side / sites_per_side as f64;

    let path = serpentine_path(sites_per_side);
    let mut segments: Vec<usize> = (0..config.n_chains as usize).collect();
    let mut rng = StdRng::seed_from_u64(config.placement_seed);
    segments.shuffle(&mut rng);

    let mut snapshot = Snapshot::new(Vec3::splat(box_side));
    let bond_type = format!("{0}-{0}", config.bead_type);
    let jitter = JITTER_FRACTION * spacing;

    for segment in segments {
        let mut previous: Option<usize> = None;
        for site in &path[segment * chain_length..(segment + 1) * chain_length] {
            let lattice_pos = Vec3::new(
                -0.5 * box_side + (site[0] as f64 + 0.5) * spacing,
                -0.5 * box_side + (site[1] as f64 + 0.5) * spacing,
                -0.5 * box_side + (site[2] as f64 + 0.5) * spacing,
            );
            let offset = Vec3::new(
                rng.random_range(-jitter..jitter),
                rng.random_range(-jitter..jitter),
                rng.random_range(-jitter..jitter),
            );
            let idx = snapshot.push_particle(&config.bead_type, lattice_pos + offset, config.bead_mass);
            if let Some(prev) = previous {
                snapshot.push_bond(prev, idx, &bond_type);
            }
            previous = Some(idx);
        }
    }

    Ok(snapshot)
}

/// Lattice coordinates of an `n`^3 cube in an order where each site neighbours the next.
fn serpentine_path(n: usize) -> Vec<[usize; 3]> {
    let mut path = Vec::with_capacity(n * n * n);
    let mut row = 0usize;
    for z in 0..n {
        for yi in 0..n {
            let y = if z % 2 == 0 { yi } else { n - 1 - yi };
            for xi in 0..n {
                let x = if row % 2 == 0 { xi } else { n - 1 - xi };
                path.push([x, y, z]);
            }
            row += 1;
        }
    }
    path
}
