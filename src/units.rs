//! Reference values and reduced-unit conversion.
//!
//! A configuration is stored in real units. Reference values declare how
//! large one reduced unit of mass, distance and energy is, and every derived
//! reduced quantity is recomputed from them on demand.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use simulation_common::Vec3;

/// Physical dimension of a quantity being converted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityKind {
    Mass,
    Distance,
    Energy,
    Density,
    Volume,
    Time,
}

/// Reference mass, distance and energy. Each is strictly positive.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValues {
    mass: f64,
    distance: f64,
    energy: f64,
}

impl Default for ReferenceValues {
    fn default() -> Self {
        ReferenceValues { mass: 1.0, distance: 1.0, energy: 1.0 }
    }
}

impl ReferenceValues {
    /// Creates reference values, rejecting any that are not positive.
    pub fn new(mass: f64, distance: f64, energy: f64) -> SimResult<Self> {
        let mut refs = ReferenceValues::default();
        refs.update(Some(mass), Some(distance), Some(energy))?;
        Ok(refs)
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Updates only the supplied fields. All supplied values are checked before any is stored.
    pub fn update(
        &mut self,
        mass: Option<f64>,
        distance: Option<f64>,
        energy: Option<f64>,
    ) -> SimResult<()> {
        for (quantity, value) in [("mass", mass), ("distance", distance), ("energy", energy)] {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(SimError::InvalidReference { quantity, value });
                }
            }
        }
        if let Some(mass) = mass {
            self.mass = mass;
        }
        if let Some(distance) = distance {
            self.distance = distance;
        }
        if let Some(energy) = energy {
            self.energy = energy;
        }
        Ok(())
    }

    /// Size of one reduced unit of `kind`, expressed in real units.
    pub fn factor(&self, kind: QuantityKind) -> f64 {
        match kind {
            QuantityKind::Mass => self.mass,
            QuantityKind::Distance => self.distance,
            QuantityKind::Energy => self.energy,
            QuantityKind::Volume => self.distance.powi(3),
            QuantityKind::Density => self.mass / self.distance.powi(3),
            QuantityKind::Time => (self.mass * self.distance * self.distance / self.energy).sqrt(),
        }
    }

    /// Converts a real-unit quantity to reduced units.
    pub fn to_reduced(&self, value: f64, kind: QuantityKind) -> f64 {
        value / self.factor(kind)
    }

    /// Converts a reduced-unit quantity to real units.
    pub fn to_real(&self, value: f64, kind: QuantityKind) -> f64 {
        value * self.factor(kind)
    }

    /// Converts a real-unit length vector (e.g. box lengths) to reduced units.
    pub fn to_reduced_vec(&self, value: Vec3) -> Vec3 {
        value / self.distance
    }

    /// Converts a reduced-unit length vector to real units.
    pub fn to_real_vec(&self, value: Vec3) -> Vec3 {
        value * self.distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const KINDS: [QuantityKind; 6] = [
        QuantityKind::Mass,
        QuantityKind::Distance,
        QuantityKind::Energy,
        QuantityKind::Density,
        QuantityKind::Volume,
        QuantityKind::Time,
    ];

    #[test]
    fn defaults_are_identity() {
        let refs = ReferenceValues::default();
        for kind in KINDS {
            assert_eq!(refs.to_reduced(3.5, kind), 3.5);
            assert_eq!(refs.to_real(3.5, kind), 3.5);
        }
    }

    #[test]
    fn conversions_are_inverse_for_arbitrary_references() {
        for (m, d, e) in [(2.0, 2.0, 1.0), (12.011, 0.35, 0.276), (1e-3, 1e4, 7.0)] {
            let refs = ReferenceValues::new(m, d, e).unwrap();
            for kind in KINDS {
                for x in [0.0, 1.0, 0.731, 4.2e5] {
                    let round_trip = refs.to_real(refs.to_reduced(x, kind), kind);
                    assert_relative_eq!(round_trip, x, max_relative = 1e-12);
                }
            }
        }
    }

    #[test]
    fn density_scales_as_mass_over_volume() {
        let refs = ReferenceValues::new(2.0, 2.0, 1.0).unwrap();
        assert_eq!(refs.factor(QuantityKind::Density), 0.25);
        assert_eq!(refs.factor(QuantityKind::Volume), 8.0);
        assert_eq!(refs.to_reduced(1.5, QuantityKind::Density), 6.0);
    }

    #[test]
    fn time_unit_follows_mass_distance_energy() {
        let refs = ReferenceValues::new(4.0, 3.0, 1.0).unwrap();
        assert_relative_eq!(refs.factor(QuantityKind::Time), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn rejected_update_leaves_values_untouched() {
        let mut refs = ReferenceValues::new(2.0, 3.0, 4.0).unwrap();
        let err = refs.update(Some(5.0), Some(-1.0), None).unwrap_err();
        assert_eq!(err, SimError::InvalidReference { quantity: "distance", value: -1.0 });
        assert_eq!(refs, ReferenceValues::new(2.0, 3.0, 4.0).unwrap());
        assert!(refs.update(None, None, Some(0.0)).is_err());
        assert!(refs.update(Some(f64::NAN), None, None).is_err());
    }

    #[test]
    fn partial_update_changes_only_given_fields() {
        let mut refs = ReferenceValues::default();
        refs.update(None, Some(0.5), None).unwrap();
        assert_eq!(refs.mass(), 1.0);
        assert_eq!(refs.distance(), 0.5);
        assert_eq!(refs.energy(), 1.0);
        assert_eq!(refs.to_reduced_vec(Vec3::splat(2.0)), Vec3::splat(4.0));
    }
}
