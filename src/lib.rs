//! Control layer for molecular-dynamics runs.
//!
//! A [`Simulation`] wraps an integration [`Engine`] and manages reduced units,
//! the attached integration method and the live force parameters.

pub mod cpu_state;
pub mod engine;
pub mod error;
pub mod forces;
pub mod grid;
pub mod integrator;
pub mod placement;
pub mod simulation;
pub mod thermo;
pub mod units;

pub use engine::{CpuEngine, Device, Engine};
pub use error::{SimError, SimResult};
pub use forces::{bead_spring, Adjustment, Force, ForceKind, ForceRegistry, LennardJones, LjParams, TypePair, WallSpec};
pub use integrator::{ActiveMethod, MethodKind, Temperature};
pub use placement::place_chains;
pub use simulation::{Simulation, SimulationOptions};
pub use thermo::{ThermoLog, ThermoSample};
pub use units::{QuantityKind, ReferenceValues};
