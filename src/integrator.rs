//! Integration methods and the single slot that holds the active one.

use crate::engine::Engine;
use crate::error::{require_finite, require_non_negative, require_positive, SimError, SimResult};
use log::debug;
use serde::{Deserialize, Serialize};
use simulation_common::Vec3;
use std::fmt;

/// Thermostat set point: constant, or ramped linearly over a window of timesteps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Temperature {
    Constant(f64),
    /// `start` until `t_start`, `end` after `t_start + t_ramp`, linear in between.
    Ramp {
        start: f64,
        end: f64,
        t_start: u64,
        t_ramp: u64,
    },
}

impl Temperature {
    /// kT at absolute engine timestep `timestep`.
    pub fn at(&self, timestep: u64) -> f64 {
        match *self {
            Temperature::Constant(kt) => kt,
            Temperature::Ramp { start, end, t_start, t_ramp } => {
                if timestep <= t_start {
                    start
                } else if t_ramp == 0 || timestep >= t_start.saturating_add(t_ramp) {
                    end
                } else {
                    let frac = (timestep - t_start) as f64 / t_ramp as f64;
                    start + (end - start) * frac
                }
            }
        }
    }

    fn validate(&self) -> SimResult<()> {
        match *self {
            Temperature::Constant(kt) => require_non_negative("kT", kt),
            Temperature::Ramp { start, end, .. } => {
                require_non_negative("kT start", start)?;
                require_non_negative("kT end", end)
            }
        }
    }
}

impl From<f64> for Temperature {
    fn from(kt: f64) -> Self {
        Temperature::Constant(kt)
    }
}

/// The integration method attached to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActiveMethod {
    None,
    Nvt {
        kt: Temperature,
        tau_kt: f64,
    },
    Npt {
        kt: Temperature,
        tau_kt: f64,
        pressure: f64,
        tau_pressure: f64,
    },
    Langevin {
        kt: Temperature,
        alpha: f64,
    },
    Nve,
    /// Thermostatted dynamics while the box is driven towards `final_box_lengths` (real units).
    VolumeRamp {
        kt: Temperature,
        tau_kt: f64,
        period: u64,
        final_box_lengths: Vec3,
    },
    /// Energy-conserving dynamics with each step's displacement clamped.
    DisplacementCapped {
        maximum_displacement: f64,
    },
}

/// Fieldless tag of an [`ActiveMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Unattached,
    Nvt,
    Npt,
    Langevin,
    Nve,
    VolumeRamp,
    DisplacementCapped,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodKind::Unattached => "unattached",
            MethodKind::Nvt => "NVT",
            MethodKind::Npt => "NPT",
            MethodKind::Langevin => "Langevin",
            MethodKind::Nve => "NVE",
            MethodKind::VolumeRamp => "volume ramp",
            MethodKind::DisplacementCapped => "displacement capped",
        };
        f.write_str(name)
    }
}

impl ActiveMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            ActiveMethod::None => MethodKind::Unattached,
            ActiveMethod::Nvt { .. } => MethodKind::Nvt,
            ActiveMethod::Npt { .. } => MethodKind::Npt,
            ActiveMethod::Langevin { .. } => MethodKind::Langevin,
            ActiveMethod::Nve => MethodKind::Nve,
            ActiveMethod::VolumeRamp { .. } => MethodKind::VolumeRamp,
            ActiveMethod::DisplacementCapped { .. } => MethodKind::DisplacementCapped,
        }
    }

    /// Thermostat target, if the method has one.
    pub fn temperature(&self) -> Option<&Temperature> {
        match self {
            ActiveMethod::Nvt { kt, .. }
            | ActiveMethod::Npt { kt, .. }
            | ActiveMethod::Langevin { kt, .. }
            | ActiveMethod::VolumeRamp { kt, .. } => Some(kt),
            _ => None,
        }
    }

    /// Checks every numeric parameter. Nothing is attached if this fails.
    pub fn validate(&self) -> SimResult<()> {
        match self {
            ActiveMethod::None | ActiveMethod::Nve => Ok(()),
            ActiveMethod::Nvt { kt, tau_kt } => {
                kt.validate()?;
                require_positive("tau_kt", *tau_kt)
            }
            ActiveMethod::Npt { kt, tau_kt, pressure, tau_pressure } => {
                kt.validate()?;
                require_positive("tau_kt", *tau_kt)?;
                require_finite("pressure", *pressure)?;
                require_positive("tau_pressure", *tau_pressure)
            }
            ActiveMethod::Langevin { kt, alpha } => {
                kt.validate()?;
                require_non_negative("alpha", *alpha)
            }
            ActiveMethod::VolumeRamp { kt, tau_kt, period, final_box_lengths } => {
                kt.validate()?;
                require_positive("tau_kt", *tau_kt)?;
                if *period == 0 {
                    return Err(SimError::parameter("period", 0.0, "must be at least 1"));
                }
                for length in final_box_lengths.to_array() {
                    require_positive("final_box_lengths", length)?;
                }
                Ok(())
            }
            ActiveMethod::DisplacementCapped { maximum_displacement } => {
                require_positive("maximum_displacement", *maximum_displacement)
            }
        }
    }
}

/// Holds at most one active method and keeps the engine's integrator list in sync with it.
#[derive(Debug, Clone)]
pub struct MethodSlot {
    active: ActiveMethod,
}

impl Default for MethodSlot {
    fn default() -> Self {
        MethodSlot { active: ActiveMethod::None }
    }
}

impl MethodSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &ActiveMethod {
        &self.active
    }

    pub fn kind(&self) -> MethodKind {
        self.active.kind()
    }

    /// Validates `method`, then detaches everything from the engine and attaches `method`.
    ///
    /// Detach and attach happen under one exclusive borrow of the engine, so no
    /// caller can observe zero or two attached methods. Returns the method that
    /// was previously active.
    pub fn replace<E: Engine + ?Sized>(&mut self, engine: &mut E, method: ActiveMethod) -> SimResult<ActiveMethod> {
        method.validate()?;
        if !engine.is_loaded() {
            return Err(SimError::UninitializedSimulation);
        }
        let detached = engine.remove_methods();
        if detached.len() > 1 {
            debug!("Engine held {} methods before the swap; all were detached.", detached.len());
        }
        if method != ActiveMethod::None {
            engine.push_method(method.clone());
        }
        debug!("Integrator method: {} -> {}.", self.active.kind(), method.kind());
        Ok(std::mem::replace(&mut self.active, method))
    }
}
