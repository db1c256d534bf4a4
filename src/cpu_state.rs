use crate::error::{SimError, SimResult};
use simulation_common::{wrap_coordinate, BondRecord, Snapshot, Vec3};

/// Holds the live particle configuration on the CPU.
#[derive(Debug)]
pub struct ParticleState {
    pub timestep: u64,
    pub box_lengths: Vec3,

    // --- Per-particle arrays ---
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub forces: Vec<Vec3>,
    pub masses: Vec<f64>,
    pub type_ids: Vec<usize>,

    // --- Topology ---
    pub types: Vec<String>,
    pub bonds: Vec<BondRecord>,
    pub bond_types: Vec<String>,
    /// Bonded partners of each particle; these pairs skip the pair force.
    pub exclusions: Vec<Vec<usize>>,

    // --- Results of the last force evaluation ---
    pub potential_energy: f64,
    /// Sum over interacting pairs of `r_ij . f_ij`.
    pub virial: f64,
}

impl ParticleState {
    /// Creates the state from a validated snapshot, wrapping positions into the box.
    pub fn from_snapshot(snapshot: Snapshot) -> SimResult<Self> {
        snapshot.validate().map_err(|e| SimError::InvalidSnapshot(e.to_string()))?;
        let num_particles = snapshot.num_particles();

        let mut exclusions = vec![Vec::new(); num_particles];
        for bond in &snapshot.bonds {
            exclusions[bond.i].push(bond.j);
            exclusions[bond.j].push(bond.i);
        }
        for partners in &mut exclusions {
            partners.sort_unstable();
            partners.dedup();
        }

        let mut state = Self {
            timestep: snapshot.timestep,
            box_lengths: snapshot.box_lengths,
            positions: snapshot.positions,
            velocities: snapshot.velocities,
            forces: vec![Vec3::zero(); num_particles],
            masses: snapshot.masses,
            type_ids: snapshot.type_ids,
            types: snapshot.types,
            bonds: snapshot.bonds,
            bond_types: snapshot.bond_types,
            exclusions,
            potential_energy: 0.0,
            virial: 0.0,
        };
        state.wrap_positions();
        Ok(state)
    }

    /// Copies the current configuration out as a snapshot.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            timestep: self.timestep,
            box_lengths: self.box_lengths,
            positions: self.positions.clone(),
            velocities: self.velocities.clone(),
            masses: self.masses.clone(),
            type_ids: self.type_ids.clone(),
            types: self.types.clone(),
            bonds: self.bonds.clone(),
            bond_types: self.bond_types.clone(),
        }
    }

    pub fn num_particles(&self) -> usize {
        self.positions.len()
    }

    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }

    pub fn volume(&self) -> f64 {
        self.box_lengths.product()
    }

    #[inline(always)]
    pub fn is_excluded(&self, i: usize, j: usize) -> bool {
        self.exclusions[i].binary_search(&j).is_ok()
    }

    /// Wraps every position back into `[-L/2, L/2)`.
    pub fn wrap_positions(&mut self) {
        let box_lengths = self.box_lengths;
        for pos in &mut self.positions {
            for axis in 0..3 {
                pos[axis] = wrap_coordinate(pos[axis], box_lengths[axis]);
            }
        }
    }

    /// Total kinetic energy.
    pub fn kinetic_energy(&self) -> f64 {
        self.velocities
            .iter()
            .zip(&self.masses)
            .map(|(v, m)| 0.5 * m * v.length_squared())
            .sum()
    }

    /// Translational degrees of freedom, less the three of the centre of mass.
    pub fn degrees_of_freedom(&self) -> f64 {
        let n = self.num_particles();
        if n > 1 {
            (3 * n - 3) as f64
        } else {
            (3 * n) as f64
        }
    }

    /// Instantaneous temperature in energy units (kT).
    pub fn instantaneous_kt(&self) -> f64 {
        let dof = self.degrees_of_freedom();
        if dof > 0.0 {
            2.0 * self.kinetic_energy() / dof
        } else {
            0.0
        }
    }

    /// Virial pressure from the last force evaluation.
    pub fn pressure(&self) -> f64 {
        (2.0 * self.kinetic_energy() + self.virial) / (3.0 * self.volume())
    }

    /// Resizes the box and scales positions affinely with it.
    pub fn scale_box(&mut self, new_box: Vec3) {
        let factors = new_box.div_elem(self.box_lengths);
        for pos in &mut self.positions {
            *pos = pos.mul_elem(factors);
        }
        self.box_lengths = new_box;
        self.wrap_positions();
    }

    /// Subtracts the centre-of-mass velocity from every particle.
    pub fn remove_com_motion(&mut self) {
        let total_mass = self.total_mass();
        if total_mass <= 0.0 {
            return;
        }
        let mut momentum = Vec3::zero();
        for (v, m) in self.velocities.iter().zip(&self.masses) {
            momentum += *v * *m;
        }
        let com_velocity = momentum / total_mass;
        for v in &mut self.velocities {
            *v -= com_velocity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimer() -> Snapshot {
        let mut snap = Snapshot::new(Vec3::splat(10.0));
        snap.push_particle("A", Vec3::new(0.0, 0.0, 0.0), 1.0);
        snap.push_particle("A", Vec3::new(6.0, 0.0, 0.0), 3.0);
        snap.push_bond(0, 1, "A-A");
        snap.velocities[0] = Vec3::new(1.0, 0.0, 0.0);
        snap
    }

    #[test]
    fn loading_wraps_and_builds_exclusions() {
        let state = ParticleState::from_snapshot(dimer()).unwrap();
        assert_eq!(state.positions[1].x, -4.0);
        assert!(state.is_excluded(0, 1));
        assert!(state.is_excluded(1, 0));
        assert_eq!(state.total_mass(), 4.0);
        assert_eq!(state.kinetic_energy(), 0.5);
    }

    #[test]
    fn com_motion_is_removed() {
        let mut state = ParticleState::from_snapshot(dimer()).unwrap();
        state.remove_com_motion();
        let momentum = state.velocities[0] * state.masses[0] + state.velocities[1] * state.masses[1];
        assert!(momentum.length() < 1e-12);
    }

    #[test]
    fn box_scaling_moves_particles_with_the_box() {
        let mut state = ParticleState::from_snapshot(dimer()).unwrap();
        state.scale_box(Vec3::new(5.0, 10.0, 10.0));
        assert_eq!(state.box_lengths, Vec3::new(5.0, 10.0, 10.0));
        assert_eq!(state.positions[1].x, -2.0);
    }

    #[test]
    fn rejects_invalid_snapshot() {
        let mut snap = dimer();
        snap.masses.pop();
        assert!(matches!(ParticleState::from_snapshot(snap), Err(SimError::InvalidSnapshot(_))));
    }
}
