//! The simulation controller.
//!
//! [`Simulation`] owns the engine, the live force terms, the reference
//! values and the single integrator slot. Every mutating call takes
//! `&mut self`, so force edits and method swaps can only happen between runs.

use crate::engine::{CpuEngine, Device, Engine};
use crate::error::{require_non_negative, require_positive, SimResult};
use crate::forces::{Force, ForceKind, ForceRegistry, LennardJones, TypePair, WallSpec};
use crate::integrator::{ActiveMethod, MethodKind, MethodSlot, Temperature};
use crate::thermo::ThermoLog;
use crate::units::{QuantityKind, ReferenceValues};
use log::{debug, info, trace};
use simulation_common::{Axis, ControlConfig, Snapshot, Vec3};
use std::time::Instant;

/// Controller-level settings.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Integration timestep in the snapshot's own time units; see [`Simulation::real_time_step`].
    pub dt: f64,
    /// Seed for velocity draws and Langevin noise.
    pub seed: u64,
    pub device: Device,
    /// Thermodynamic quantities are sampled every this many steps.
    pub log_write_freq: u64,
    pub reference: ReferenceValues,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            dt: 0.0001,
            seed: 42,
            device: Device::default(),
            log_write_freq: 1000,
            reference: ReferenceValues::default(),
        }
    }
}

impl SimulationOptions {
    /// Builds options from the `[control]` table of a configuration file.
    pub fn from_control(control: &ControlConfig) -> SimResult<Self> {
        let mut reference = ReferenceValues::default();
        reference.update(control.reference.mass, control.reference.distance, control.reference.energy)?;
        Ok(SimulationOptions {
            dt: control.dt,
            seed: control.seed,
            device: Device::Cpu { threads: control.threads },
            log_write_freq: control.log_write_freq,
            reference,
        })
    }
}

/// Box resizing schedule for a volume-ramp run, in reduced units.
#[derive(Debug, Clone, Copy)]
struct BoxRamp {
    start: Vec3,
    end: Vec3,
    end_real: Vec3,
    period: u64,
}

/// Drives an [`Engine`] through a sequence of runs.
pub struct Simulation<E: Engine = CpuEngine> {
    engine: E,
    forces: ForceRegistry,
    slot: MethodSlot,
    reference: ReferenceValues,
    dt: f64,
    thermo: ThermoLog,
}

impl Simulation<CpuEngine> {
    /// Creates a controller on the CPU engine with no configuration loaded.
    pub fn new(forcefield: Vec<Force>, options: SimulationOptions) -> SimResult<Self> {
        let engine = CpuEngine::new(options.device, options.seed)?;
        Self::with_engine(engine, forcefield, options)
    }

    /// Creates a controller on the CPU engine and loads `snapshot` into it.
    pub fn from_snapshot(snapshot: Snapshot, forcefield: Vec<Force>, options: SimulationOptions) -> SimResult<Self> {
        let mut sim = Self::new(forcefield, options)?;
        sim.load_state(snapshot)?;
        Ok(sim)
    }
}

impl<E: Engine> Simulation<E> {
    /// Creates a controller around an existing engine.
    pub fn with_engine(engine: E, forcefield: Vec<Force>, options: SimulationOptions) -> SimResult<Self> {
        require_positive("dt", options.dt)?;
        info!(
            "Simulation controller: dt = {}, {} force term(s), thermo every {} steps.",
            options.dt,
            forcefield.len(),
            options.log_write_freq.max(1)
        );
        Ok(Simulation {
            engine,
            forces: ForceRegistry::new(forcefield),
            slot: MethodSlot::new(),
            reference: options.reference,
            dt: options.dt,
            thermo: ThermoLog::new(options.log_write_freq),
        })
    }

    /// Loads a particle configuration (real units) into the engine.
    ///
    /// Walls already present move to the faces of the new box.
    pub fn load_state(&mut self, snapshot: Snapshot) -> SimResult<()> {
        self.engine.load_snapshot(snapshot)?;
        self.forces.rescale_walls(self.engine.box_lengths()?);
        Ok(())
    }

    // --- Reference values ---

    pub fn reference(&self) -> &ReferenceValues {
        &self.reference
    }

    /// Updates any of the reference values. Nothing changes if one is invalid.
    pub fn set_reference(&mut self, mass: Option<f64>, distance: Option<f64>, energy: Option<f64>) -> SimResult<()> {
        self.reference.update(mass, distance, energy)?;
        debug!(
            "Reference values: mass {}, distance {}, energy {}.",
            self.reference.mass(),
            self.reference.distance(),
            self.reference.energy()
        );
        Ok(())
    }

    pub fn set_reference_mass(&mut self, mass: f64) -> SimResult<()> {
        self.set_reference(Some(mass), None, None)
    }

    pub fn set_reference_distance(&mut self, distance: f64) -> SimResult<()> {
        self.set_reference(None, Some(distance), None)
    }

    pub fn set_reference_energy(&mut self, energy: f64) -> SimResult<()> {
        self.set_reference(None, None, Some(energy))
    }

    // --- Derived quantities ---

    /// Box lengths in real units.
    pub fn box_lengths(&self) -> SimResult<Vec3> {
        self.engine.box_lengths()
    }

    pub fn box_lengths_reduced(&self) -> SimResult<Vec3> {
        Ok(self.reference.to_reduced_vec(self.box_lengths()?))
    }

    pub fn volume(&self) -> SimResult<f64> {
        Ok(self.box_lengths()?.product())
    }

    pub fn volume_reduced(&self) -> SimResult<f64> {
        Ok(self.reference.to_reduced(self.volume()?, QuantityKind::Volume))
    }

    /// Total particle mass in real units.
    pub fn mass(&self) -> SimResult<f64> {
        self.engine.total_mass()
    }

    pub fn mass_reduced(&self) -> SimResult<f64> {
        Ok(self.reference.to_reduced(self.mass()?, QuantityKind::Mass))
    }

    /// Mass density in real units.
    pub fn density(&self) -> SimResult<f64> {
        Ok(self.mass()? / self.volume()?)
    }

    pub fn density_reduced(&self) -> SimResult<f64> {
        Ok(self.reference.to_reduced(self.density()?, QuantityKind::Density))
    }

    /// Integration timestep converted to real time units.
    pub fn real_time_step(&self) -> f64 {
        self.reference.to_real(self.dt, QuantityKind::Time)
    }

    // --- Timestep ---

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Sets the timestep used by every subsequent run.
    pub fn set_dt(&mut self, dt: f64) -> SimResult<()> {
        require_positive("dt", dt)?;
        debug!("dt: {} -> {}.", self.dt, dt);
        self.dt = dt;
        Ok(())
    }

    // --- State inspection ---

    pub fn method(&self) -> &ActiveMethod {
        self.slot.active()
    }

    pub fn method_kind(&self) -> MethodKind {
        self.slot.kind()
    }

    pub fn timestep(&self) -> u64 {
        self.engine.timestep()
    }

    pub fn snapshot(&self) -> SimResult<Snapshot> {
        self.engine.snapshot()
    }

    pub fn thermo_log(&self) -> &ThermoLog {
        &self.thermo
    }

    pub fn forces(&self) -> &ForceRegistry {
        &self.forces
    }

    /// The live Lennard-Jones parameters; edits apply from the next run.
    pub fn pair_force_mut(&mut self) -> SimResult<&mut LennardJones> {
        self.forces.pair_force_mut()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    // --- Runs ---

    /// Runs constant-temperature dynamics for `n_steps`.
    pub fn run_nvt(&mut self, kt: impl Into<Temperature>, tau_kt: f64, n_steps: u64) -> SimResult<()> {
        let method = ActiveMethod::Nvt { kt: kt.into(), tau_kt };
        self.run_with(method, n_steps, None)
    }

    /// Runs constant-temperature, constant-pressure dynamics for `n_steps`.
    pub fn run_npt(
        &mut self,
        kt: impl Into<Temperature>,
        tau_kt: f64,
        pressure: f64,
        tau_pressure: f64,
        n_steps: u64,
    ) -> SimResult<()> {
        let method = ActiveMethod::Npt { kt: kt.into(), tau_kt, pressure, tau_pressure };
        self.run_with(method, n_steps, None)
    }

    /// Runs Langevin dynamics with drag coefficient `alpha`.
    pub fn run_langevin(&mut self, n_steps: u64, kt: impl Into<Temperature>, alpha: f64) -> SimResult<()> {
        let method = ActiveMethod::Langevin { kt: kt.into(), alpha };
        self.run_with(method, n_steps, None)
    }

    /// Runs energy-conserving dynamics.
    pub fn run_nve(&mut self, n_steps: u64) -> SimResult<()> {
        self.run_with(ActiveMethod::Nve, n_steps, None)
    }

    /// Runs thermostatted dynamics while moving the box linearly to `final_box_lengths` (real units).
    ///
    /// The box is updated every `period` steps and on the last step, so the
    /// run always ends at exactly the requested box.
    pub fn run_update_volume(
        &mut self,
        kt: impl Into<Temperature>,
        tau_kt: f64,
        n_steps: u64,
        period: u64,
        final_box_lengths: Vec3,
    ) -> SimResult<()> {
        let method = ActiveMethod::VolumeRamp { kt: kt.into(), tau_kt, period, final_box_lengths };
        method.validate()?;
        let start = self.box_lengths_reduced()?;
        let ramp = BoxRamp {
            start,
            end: self.reference.to_reduced_vec(final_box_lengths),
            end_real: final_box_lengths,
            period,
        };
        self.run_with(method, n_steps, Some(ramp))
    }

    /// Runs energy-conserving dynamics with each particle's per-step displacement capped.
    pub fn run_displacement_cap(&mut self, n_steps: u64, maximum_displacement: f64) -> SimResult<()> {
        self.run_with(ActiveMethod::DisplacementCapped { maximum_displacement }, n_steps, None)
    }

    /// A linear kT ramp from `kt_start` to `kt_final` over the next `n_steps` steps.
    pub fn temperature_ramp(&self, n_steps: u64, kt_start: f64, kt_final: f64) -> Temperature {
        Temperature::Ramp { start: kt_start, end: kt_final, t_start: self.timestep(), t_ramp: n_steps }
    }

    /// Draws fresh velocities at temperature `kt`.
    pub fn thermalize(&mut self, kt: f64) -> SimResult<()> {
        require_non_negative("kT", kt)?;
        self.engine.thermalize(kt)
    }

    fn run_with(&mut self, method: ActiveMethod, n_steps: u64, ramp: Option<BoxRamp>) -> SimResult<()> {
        let kind = method.kind();
        self.slot.replace(&mut self.engine, method)?;
        if n_steps == 0 {
            debug!("{} attached without running.", kind);
            return Ok(());
        }

        info!("Starting {} run: {} steps at dt = {}.", kind, n_steps, self.dt);
        let start_time = Instant::now();
        let start_timestep = self.engine.timestep();
        self.engine.prepare(&self.forces)?;

        for step in 1..=n_steps {
            self.engine.step(&self.forces, self.dt)?;

            if let Some(ramp) = ramp {
                if step % ramp.period == 0 || step == n_steps {
                    let new_box = if step == n_steps {
                        ramp.end_real
                    } else {
                        let frac = step as f64 / n_steps as f64;
                        self.reference.to_real_vec(ramp.start + (ramp.end - ramp.start) * frac)
                    };
                    self.engine.resize_box(new_box)?;
                    self.forces.rescale_walls(new_box);
                    trace!("Box resized to {:?} at step {}.", new_box.to_array(), step);
                }
            } else if kind == MethodKind::Npt {
                let new_box = self.engine.box_lengths()?;
                self.forces.rescale_walls(new_box);
            }

            let timestep = self.engine.timestep();
            if self.thermo.is_due(timestep) {
                let sample = self.engine.thermo()?;
                debug!(
                    "t = {} | KE {:.4} | PE {:.4} | kT {:.4} | P {:.4} | V {:.4}",
                    sample.timestep, sample.kinetic_energy, sample.potential_energy, sample.kt, sample.pressure, sample.volume
                );
                self.thermo.push(sample);
            }
        }

        let elapsed = start_time.elapsed();
        info!(
            "{} run finished: timesteps {} -> {} in {:.3} s.",
            kind,
            start_timestep,
            self.engine.timestep(),
            elapsed.as_secs_f64()
        );
        Ok(())
    }

    // --- Force edits ---

    /// Scales or shifts Lennard-Jones epsilon on the selected type pairs (all if `None`).
    pub fn adjust_epsilon(
        &mut self,
        scale_by: Option<f64>,
        shift_by: Option<f64>,
        type_filter: Option<&[TypePair]>,
    ) -> SimResult<usize> {
        let count = self.forces.adjust_epsilon(scale_by, shift_by, type_filter)?;
        info!("Adjusted epsilon on {} pair(s) (scale {:?}, shift {:?}).", count, scale_by, shift_by);
        Ok(count)
    }

    /// Scales or shifts Lennard-Jones sigma on the selected type pairs (all if `None`).
    pub fn adjust_sigma(
        &mut self,
        scale_by: Option<f64>,
        shift_by: Option<f64>,
        type_filter: Option<&[TypePair]>,
    ) -> SimResult<usize> {
        let count = self.forces.adjust_sigma(scale_by, shift_by, type_filter)?;
        info!("Adjusted sigma on {} pair(s) (scale {:?}, shift {:?}).", count, scale_by, shift_by);
        Ok(count)
    }

    /// Adds Lennard-Jones walls on both box faces normal to `axis`.
    pub fn add_walls(&mut self, axis: Axis, sigma: f64, epsilon: f64, r_cut: f64) -> SimResult<()> {
        let box_lengths = self.box_lengths()?;
        self.forces.add_walls(WallSpec { axis, sigma, epsilon, r_cut }, box_lengths)
    }

    /// Removes all walls normal to `axis`, returning how many wall pairs were removed.
    pub fn remove_walls(&mut self, axis: Axis) -> usize {
        let removed = self.forces.remove_walls(axis);
        debug!("Removed {} wall pair(s) along {:?}.", removed, axis);
        removed
    }

    pub fn add_force(&mut self, force: Force) {
        self.forces.add_force(force);
    }

    /// Removes every force term of `kind`. A missing kind is a no-op.
    pub fn remove_force(&mut self, kind: ForceKind) -> Vec<Force> {
        self.forces.remove_force(kind)
    }
}

impl<E: Engine> std::fmt::Debug for Simulation<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("loaded", &self.engine.is_loaded())
            .field("timestep", &self.engine.timestep())
            .field("method", self.slot.active())
            .field("dt", &self.dt)
            .field("reference", &self.reference)
            .field("forces", &self.forces.len())
            .finish()
    }
}
