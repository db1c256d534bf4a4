use crate::vecmath::Vec3;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A bond between two particles, referencing an entry in `Snapshot::bond_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondRecord {
    pub i: usize,
    pub j: usize,
    pub type_id: usize,
}

/// A particle configuration in real units.
///
/// The box is orthorhombic and centred on the origin, so every wrapped
/// coordinate lies in `[-L/2, L/2)` along its axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The engine timestep at which the snapshot was taken.
    pub timestep: u64,
    /// Edge lengths of the periodic box.
    pub box_lengths: Vec3,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub masses: Vec<f64>,
    /// Index into `types` for every particle.
    pub type_ids: Vec<usize>,
    /// Particle type labels, e.g. `["A", "B"]`.
    pub types: Vec<String>,
    #[serde(default)]
    pub bonds: Vec<BondRecord>,
    #[serde(default)]
    pub bond_types: Vec<String>,
}

impl Snapshot {
    /// Creates an empty snapshot with the given box.
    pub fn new(box_lengths: Vec3) -> Self {
        Snapshot {
            timestep: 0,
            box_lengths,
            positions: Vec::new(),
            velocities: Vec::new(),
            masses: Vec::new(),
            type_ids: Vec::new(),
            types: Vec::new(),
            bonds: Vec::new(),
            bond_types: Vec::new(),
        }
    }

    /// Number of particles in the snapshot.
    pub fn num_particles(&self) -> usize {
        self.positions.len()
    }

    /// Sum of all particle masses.
    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }

    /// Returns the id of the particle type `name`, registering it if new.
    pub fn type_id(&mut self, name: &str) -> usize {
        match self.types.iter().position(|t| t == name) {
            Some(id) => id,
            None => {
                self.types.push(name.to_string());
                self.types.len() - 1
            }
        }
    }

    /// Returns the id of the bond type `name`, registering it if new.
    pub fn bond_type_id(&mut self, name: &str) -> usize {
        match self.bond_types.iter().position(|t| t == name) {
            Some(id) => id,
            None => {
                self.bond_types.push(name.to_string());
                self.bond_types.len() - 1
            }
        }
    }

    /// Appends a particle at rest.
    pub fn push_particle(&mut self, type_name: &str, position: Vec3, mass: f64) -> usize {
        let type_id = self.type_id(type_name);
        self.positions.push(position);
        self.velocities.push(Vec3::zero());
        self.masses.push(mass);
        self.type_ids.push(type_id);
        self.positions.len() - 1
    }

    /// Appends a bond between particles `i` and `j`.
    pub fn push_bond(&mut self, i: usize, j: usize, bond_type: &str) {
        let type_id = self.bond_type_id(bond_type);
        self.bonds.push(BondRecord { i, j, type_id });
    }

    /// Checks that every per-particle array has the same length and all ids are in range.
    pub fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        if self.velocities.len() != n || self.masses.len() != n || self.type_ids.len() != n {
            anyhow::bail!(
                "per-particle arrays differ in length (positions {}, velocities {}, masses {}, type_ids {})",
                n,
                self.velocities.len(),
                self.masses.len(),
                self.type_ids.len()
            );
        }
        if !(self.box_lengths.is_finite() && self.box_lengths.min_component() > 0.0) {
            anyhow::bail!("box lengths must be positive, got {:?}", self.box_lengths);
        }
        if let Some(bad) = self.masses.iter().find(|m| !(**m > 0.0)) {
            anyhow::bail!("particle masses must be positive, found {}", bad);
        }
        if let Some(bad) = self.type_ids.iter().find(|id| **id >= self.types.len()) {
            anyhow::bail!("type id {} has no entry in types ({} known)", bad, self.types.len());
        }
        for bond in &self.bonds {
            if bond.i >= n || bond.j >= n || bond.i == bond.j {
                anyhow::bail!("bond ({}, {}) references invalid particles", bond.i, bond.j);
            }
            if bond.type_id >= self.bond_types.len() {
                anyhow::bail!("bond type id {} has no entry in bond_types", bond.type_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_types_once() {
        let mut snap = Snapshot::new(Vec3::splat(5.0));
        let a = snap.push_particle("A", Vec3::zero(), 1.0);
        let b = snap.push_particle("A", Vec3::new(1.0, 0.0, 0.0), 2.0);
        snap.push_bond(a, b, "A-A");
        assert_eq!(snap.types, vec!["A".to_string()]);
        assert_eq!(snap.total_mass(), 3.0);
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn rejects_dangling_bond() {
        let mut snap = Snapshot::new(Vec3::splat(5.0));
        snap.push_particle("A", Vec3::zero(), 1.0);
        snap.push_bond(0, 3, "A-A");
        assert!(snap.validate().is_err());
    }
}
