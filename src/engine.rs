//! The integration engine behind the controller.
//!
//! [`Engine`] is the seam the controller drives: it owns the live
//! configuration and an integrator method list, and advances the state one
//! step at a time. [`CpuEngine`] is the bundled implementation, a
//! velocity-Verlet integrator with weak-coupling thermostat/barostat and
//! Langevin dynamics, parallelised with rayon.

use crate::cpu_state::ParticleState;
use crate::error::{SimError, SimResult};
use crate::forces::{lj_pair, ForceRegistry, PairTable, Wall};
use crate::grid::CellList;
use crate::integrator::ActiveMethod;
use crate::thermo::ThermoSample;
use log::{debug, info, trace};
use rand::prelude::*;
use rand_distr::{Normal, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use simulation_common::{minimum_image, BondParams, Snapshot, Vec3};

// Per-step clamps keep the weak-coupling schemes stable far from equilibrium
const MAX_THERMOSTAT_SCALE: f64 = 0.1;
const MAX_BAROSTAT_SCALE: f64 = 0.01;

/// Where force evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// CPU with a dedicated thread pool of `threads` workers, or rayon's global pool if `None`.
    Cpu { threads: Option<usize> },
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu { threads: None }
    }
}

/// Operations the controller needs from an integration engine.
pub trait Engine {
    /// True once a configuration has been loaded.
    fn is_loaded(&self) -> bool;

    /// Replaces the live configuration.
    fn load_snapshot(&mut self, snapshot: Snapshot) -> SimResult<()>;

    /// Copy of the live configuration.
    fn snapshot(&self) -> SimResult<Snapshot>;

    fn box_lengths(&self) -> SimResult<Vec3>;

    fn total_mass(&self) -> SimResult<f64>;

    fn timestep(&self) -> u64;

    /// Methods currently attached, in the order they integrate.
    fn methods(&self) -> &[ActiveMethod];

    /// Detaches every attached method and returns them.
    fn remove_methods(&mut self) -> Vec<ActiveMethod>;

    fn push_method(&mut self, method: ActiveMethod);

    /// Resizes the box, scaling particle positions with it.
    fn resize_box(&mut self, box_lengths: Vec3) -> SimResult<()>;

    /// Draws velocities from the Maxwell-Boltzmann distribution at `kt`.
    fn thermalize(&mut self, kt: f64) -> SimResult<()>;

    /// Picks up the current force parameters and evaluates forces. Called before each run.
    fn prepare(&mut self, forces: &ForceRegistry) -> SimResult<()>;

    /// Advances one timestep with the attached method.
    fn step(&mut self, forces: &ForceRegistry, dt: f64) -> SimResult<()>;

    fn thermo(&self) -> SimResult<ThermoSample>;
}

/// Force parameters resolved against the loaded particle and bond types.
#[derive(Debug, Clone)]
struct PreparedForces {
    pairs: Option<PairTable>,
    bonds: Vec<Option<BondParams>>,
}

/// Reference CPU engine.
pub struct CpuEngine {
    state: Option<ParticleState>,
    methods: Vec<ActiveMethod>,
    prepared: Option<PreparedForces>,
    pool: Option<rayon::ThreadPool>,
    seed: u64,
    rng: StdRng,
}

impl CpuEngine {
    /// Creates an engine with no configuration loaded.
    pub fn new(device: Device, seed: u64) -> SimResult<Self> {
        let pool = match device {
            Device::Cpu { threads: Some(threads) } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| SimError::Device(e.to_string()))?;
                info!("Using a dedicated pool of {} threads.", threads);
                Some(pool)
            }
            Device::Cpu { threads: None } => {
                info!("Using {} Rayon threads.", rayon::current_num_threads());
                None
            }
        };
        Ok(CpuEngine {
            state: None,
            methods: Vec::new(),
            prepared: None,
            pool,
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn state(&self) -> SimResult<&ParticleState> {
        self.state.as_ref().ok_or(SimError::UninitializedSimulation)
    }

    /// Evaluates pair, wall and bond forces at the current positions.
    fn compute_forces(&mut self, walls: &[Wall]) -> SimResult<()> {
        let prepared = self.prepared.as_ref().ok_or(SimError::UninitializedSimulation)?;
        let state = self.state.as_ref().ok_or(SimError::UninitializedSimulation)?;
        let box_lengths = state.box_lengths;

        // --- 1. Pair and wall forces (parallel over particles) ---
        let cells = prepared
            .pairs
            .as_ref()
            .map(|table| CellList::build(&state.positions, box_lengths, table.max_r_cut));
        let per_particle: Vec<(Vec3, f64, f64)> = install(self.pool.as_ref(), || {
            (0..state.num_particles())
                .into_par_iter()
                .map(|i| {
                    let pos_i = state.positions[i];
                    let mut force = Vec3::zero();
                    let mut energy = 0.0;
                    let mut virial = 0.0;

                    if let (Some(table), Some(cells)) = (prepared.pairs.as_ref(), cells.as_ref()) {
                        let type_i = state.type_ids[i];
                        cells.for_each_neighbor(i, |j| {
                            if state.is_excluded(i, j) {
                                return;
                            }
                            if let Some(params) = table.get(type_i, state.type_ids[j]) {
                                let dr = minimum_image(pos_i - state.positions[j], box_lengths);
                                let r2 = dr.length_squared();
                                if let Some((f_over_r, u)) = lj_pair(params, r2) {
                                    force += dr * f_over_r;
                                    // each pair is visited from both ends
                                    energy += 0.5 * u;
                                    virial += 0.5 * f_over_r * r2;
                                }
                            }
                        });
                    }

                    for wall in walls {
                        let (f_wall, u_wall) = wall.evaluate(pos_i);
                        force += f_wall;
                        energy += u_wall;
                    }
                    (force, energy, virial)
                })
                .collect()
        });

        let mut forces: Vec<Vec3> = Vec::with_capacity(per_particle.len());
        let mut potential_energy = 0.0;
        let mut total_virial = 0.0;
        for (f, u, w) in per_particle {
            forces.push(f);
            potential_energy += u;
            total_virial += w;
        }

        // --- 2. Bonded forces (serial) ---
        for bond in &state.bonds {
            let Some(params) = prepared.bonds.get(bond.type_id).copied().flatten() else {
                continue;
            };
            let dr = minimum_image(state.positions[bond.i] - state.positions[bond.j], box_lengths);
            let r = dr.length();
            if r < 1e-12 {
                continue;
            }
            let stretch = r - params.r0;
            let f_i = dr * (-params.k * stretch / r);
            forces[bond.i] += f_i;
            forces[bond.j] -= f_i;
            potential_energy += 0.5 * params.k * stretch * stretch;
            total_virial += dr.dot(f_i);
        }

        let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;
        state.forces = forces;
        state.potential_energy = potential_energy;
        state.virial = total_virial;
        Ok(())
    }

    /// Adds Langevin drag and random forces for this step.
    fn apply_langevin(&mut self, kt: f64, alpha: f64, dt: f64) -> SimResult<()> {
        let seed = self.seed;
        let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;
        let timestep = state.timestep;
        let noise_scale = (2.0 * alpha * kt / dt).sqrt();
        let velocities = &state.velocities;
        install(self.pool.as_ref(), || {
            state.forces.par_iter_mut().enumerate().for_each(|(idx, force)| {
                // per-particle stream so the result does not depend on thread scheduling
                let mut rng = StdRng::seed_from_u64(noise_seed(seed, idx as u64, timestep));
                let noise = Vec3::new(
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                );
                *force += velocities[idx] * (-alpha) + noise * noise_scale;
            });
        });
        Ok(())
    }
}

/// Runs `op` inside the dedicated pool if there is one, else on rayon's global pool.
fn install<R: Send>(pool: Option<&rayon::ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

// SplitMix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for the noise stream of one particle at one timestep.
fn noise_seed(seed: u64, particle: u64, timestep: u64) -> u64 {
    mix64(mix64(mix64(seed) ^ particle) ^ timestep)
}

impl Engine for CpuEngine {
    fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    fn load_snapshot(&mut self, snapshot: Snapshot) -> SimResult<()> {
        let state = ParticleState::from_snapshot(snapshot)?;
        info!(
            "Loaded configuration: {} particles, {} types, {} bonds, box {:?}.",
            state.num_particles(),
            state.types.len(),
            state.bonds.len(),
            state.box_lengths.to_array()
        );
        self.state = Some(state);
        self.prepared = None;
        Ok(())
    }

    fn snapshot(&self) -> SimResult<Snapshot> {
        Ok(self.state()?.to_snapshot())
    }

    fn box_lengths(&self) -> SimResult<Vec3> {
        Ok(self.state()?.box_lengths)
    }

    fn total_mass(&self) -> SimResult<f64> {
        Ok(self.state()?.total_mass())
    }

    fn timestep(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.timestep)
    }

    fn methods(&self) -> &[ActiveMethod] {
        &self.methods
    }

    fn remove_methods(&mut self) -> Vec<ActiveMethod> {
        std::mem::take(&mut self.methods)
    }

    fn push_method(&mut self, method: ActiveMethod) {
        self.methods.push(method);
    }

    fn resize_box(&mut self, box_lengths: Vec3) -> SimResult<()> {
        if !(box_lengths.is_finite() && box_lengths.min_component() > 0.0) {
            return Err(SimError::parameter("box_lengths", box_lengths.min_component(), "must be positive"));
        }
        let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;
        state.scale_box(box_lengths);
        Ok(())
    }

    fn thermalize(&mut self, kt: f64) -> SimResult<()> {
        let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;
        for (v, m) in state.velocities.iter_mut().zip(&state.masses) {
            let normal = Normal::new(0.0, (kt / m).sqrt())
                .map_err(|_| SimError::parameter("kT", kt, "must not be negative"))?;
            *v = Vec3::new(
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
            );
        }
        state.remove_com_motion();
        debug!("Thermalized velocities at kT = {:.4} (measured {:.4}).", kt, state.instantaneous_kt());
        Ok(())
    }

    fn prepare(&mut self, forces: &ForceRegistry) -> SimResult<()> {
        let state = self.state()?;
        let pairs = forces.pair_force().ok().map(|lj| lj.resolve(&state.types));
        let bonds = forces
            .bond_force()
            .map(|b| b.resolve(&state.bond_types))
            .unwrap_or_else(|| vec![None; state.bond_types.len()]);
        self.prepared = Some(PreparedForces { pairs, bonds });
        let walls: Vec<Wall> = forces.walls().cloned().collect();
        self.compute_forces(&walls)
    }

    fn step(&mut self, forces: &ForceRegistry, dt: f64) -> SimResult<()> {
        if self.prepared.is_none() {
            self.prepare(forces)?;
        }
        let method = self.methods.first().cloned().unwrap_or(ActiveMethod::None);
        let walls: Vec<Wall> = forces.walls().cloned().collect();

        {
            let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;
            if method == ActiveMethod::None {
                trace!("No integration method attached; timestep {} leaves particles in place.", state.timestep);
                state.timestep += 1;
                return Ok(());
            }

            // --- 1. Half kick and drift ---
            let cap = match method {
                ActiveMethod::DisplacementCapped { maximum_displacement } => Some(maximum_displacement),
                _ => None,
            };
            let forces_now = &state.forces;
            let masses = &state.masses;
            state
                .velocities
                .iter_mut()
                .zip(state.positions.iter_mut())
                .enumerate()
                .for_each(|(idx, (v, x))| {
                    *v += forces_now[idx] * (0.5 * dt / masses[idx]);
                    let mut dx = *v * dt;
                    if let Some(max) = cap {
                        let len = dx.length();
                        if len > max {
                            dx = dx * (max / len);
                        }
                    }
                    *x += dx;
                });
            state.wrap_positions();
        }

        // --- 2. New forces ---
        self.compute_forces(&walls)?;
        let timestep = self.timestep();
        if let ActiveMethod::Langevin { kt, alpha } = method {
            self.apply_langevin(kt.at(timestep), alpha, dt)?;
        }

        let state = self.state.as_mut().ok_or(SimError::UninitializedSimulation)?;

        // --- 3. Second half kick ---
        for ((v, f), m) in state.velocities.iter_mut().zip(&state.forces).zip(&state.masses) {
            *v += *f * (0.5 * dt / m);
        }

        // --- 4. Thermostat and barostat ---
        let thermostat = match &method {
            ActiveMethod::Nvt { kt, tau_kt }
            | ActiveMethod::Npt { kt, tau_kt, .. }
            | ActiveMethod::VolumeRamp { kt, tau_kt, .. } => Some((kt.at(timestep), *tau_kt)),
            _ => None,
        };
        if let Some((target_kt, tau_kt)) = thermostat {
            let current_kt = state.instantaneous_kt();
            if current_kt > 1e-12 {
                let lambda_sq = 1.0 + dt / tau_kt * (target_kt / current_kt - 1.0);
                let lambda = lambda_sq
                    .max(0.0)
                    .sqrt()
                    .clamp(1.0 - MAX_THERMOSTAT_SCALE, 1.0 + MAX_THERMOSTAT_SCALE);
                for v in &mut state.velocities {
                    *v = *v * lambda;
                }
            }
        }
        if let ActiveMethod::Npt { pressure, tau_pressure, .. } = method {
            let current = state.pressure();
            let mu = (1.0 - dt / tau_pressure * (pressure - current))
                .max(0.0)
                .cbrt()
                .clamp(1.0 - MAX_BAROSTAT_SCALE, 1.0 + MAX_BAROSTAT_SCALE);
            let new_box = state.box_lengths * mu;
            state.scale_box(new_box);
        }

        state.timestep += 1;
        trace!(
            "Step {} | KE {:.4} | PE {:.4}",
            state.timestep,
            state.kinetic_energy(),
            state.potential_energy
        );
        Ok(())
    }

    fn thermo(&self) -> SimResult<ThermoSample> {
        let state = self.state()?;
        Ok(ThermoSample {
            timestep: state.timestep,
            kinetic_energy: state.kinetic_energy(),
            potential_energy: state.potential_energy,
            kt: state.instantaneous_kt(),
            pressure: state.pressure(),
            volume: state.volume(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forces::{Force, LennardJones, LjParams, TypePair};
    use crate::integrator::Temperature;
    use approx::assert_relative_eq;

    fn lj_registry() -> ForceRegistry {
        let mut lj = LennardJones::new();
        lj.set(TypePair::new("A", "A"), LjParams { epsilon: 1.0, sigma: 1.0, r_cut: 2.5 }).unwrap();
        ForceRegistry::new(vec![Force::LennardJones(lj)])
    }

    fn pair_at(distance: f64) -> Snapshot {
        let mut snap = Snapshot::new(Vec3::splat(10.0));
        snap.push_particle("A", Vec3::new(-0.5 * distance, 0.0, 0.0), 1.0);
        snap.push_particle("A", Vec3::new(0.5 * distance, 0.0, 0.0), 1.0);
        snap
    }

    #[test]
    fn pair_forces_obey_newtons_third_law() {
        let mut engine = CpuEngine::new(Device::default(), 1).unwrap();
        engine.load_snapshot(pair_at(1.0)).unwrap();
        engine.prepare(&lj_registry()).unwrap();
        let state = engine.state().unwrap();
        // r = sigma: repulsive with magnitude 24 epsilon / sigma
        assert_relative_eq!(state.forces[0].x, -24.0, epsilon = 1e-9);
        assert_relative_eq!(state.forces[1].x, 24.0, epsilon = 1e-9);
        assert_relative_eq!(state.potential_energy, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn nve_conserves_energy_for_a_dimer() {
        let mut engine = CpuEngine::new(Device::Cpu { threads: Some(2) }, 1).unwrap();
        engine.load_snapshot(pair_at(1.2)).unwrap();
        let forces = lj_registry();
        engine.push_method(ActiveMethod::Nve);
        engine.prepare(&forces).unwrap();
        let start = engine.thermo().unwrap();
        for _ in 0..2000 {
            engine.step(&forces, 0.001).unwrap();
        }
        let end = engine.thermo().unwrap();
        assert_eq!(end.timestep, 2000);
        assert_relative_eq!(
            start.kinetic_energy + start.potential_energy,
            end.kinetic_energy + end.potential_energy,
            epsilon = 1e-4
        );
    }

    #[test]
    fn displacement_cap_limits_each_step() {
        let mut engine = CpuEngine::new(Device::default(), 1).unwrap();
        // heavily overlapping pair
        engine.load_snapshot(pair_at(0.5)).unwrap();
        let forces = lj_registry();
        engine.push_method(ActiveMethod::DisplacementCapped { maximum_displacement: 0.01 });
        engine.prepare(&forces).unwrap();
        let before = engine.snapshot().unwrap().positions;
        engine.step(&forces, 0.005).unwrap();
        let after = engine.snapshot().unwrap().positions;
        for (a, b) in before.iter().zip(&after) {
            assert!((*b - *a).length() <= 0.01 + 1e-12);
        }
    }

    #[test]
    fn thermalize_removes_com_momentum() {
        let mut snap = Snapshot::new(Vec3::splat(10.0));
        for i in 0..50 {
            snap.push_particle("A", Vec3::new(-4.5 + 0.18 * i as f64, 0.0, 0.0), 1.0 + (i % 3) as f64);
        }
        let mut engine = CpuEngine::new(Device::default(), 7).unwrap();
        engine.load_snapshot(snap).unwrap();
        engine.thermalize(1.5).unwrap();
        let state = engine.state().unwrap();
        let mut momentum = Vec3::zero();
        for (v, m) in state.velocities.iter().zip(&state.masses) {
            momentum += *v * *m;
        }
        assert!(momentum.length() < 1e-9);
        assert!(state.instantaneous_kt() > 0.0);
    }

    #[test]
    fn noise_seeds_do_not_alias_across_particles_and_steps() {
        // index/timestep pairs that collide under a linear combination of the two
        assert_ne!(noise_seed(42, 0x58C7, 0), noise_seed(42, 0, 0x9E37_79B9));
        assert_ne!(noise_seed(42, 1, 0), noise_seed(42, 0, 1));
        assert_ne!(noise_seed(1, 0, 0), noise_seed(2, 0, 0));
        assert_eq!(noise_seed(7, 3, 11), noise_seed(7, 3, 11));
    }

    #[test]
    fn langevin_runs_on_a_dedicated_pool() {
        let mut engine = CpuEngine::new(Device::Cpu { threads: Some(2) }, 5).unwrap();
        engine.load_snapshot(pair_at(1.2)).unwrap();
        let forces = lj_registry();
        engine.push_method(ActiveMethod::Langevin { kt: Temperature::Constant(1.0), alpha: 1.0 });
        engine.prepare(&forces).unwrap();
        for _ in 0..20 {
            engine.step(&forces, 0.002).unwrap();
        }
        let snap = engine.snapshot().unwrap();
        assert!(snap.velocities.iter().all(|v| v.is_finite()));
        assert!(snap.velocities.iter().any(|v| v.length() > 0.0));
    }

    #[test]
    fn operations_need_a_configuration() {
        let mut engine = CpuEngine::new(Device::default(), 1).unwrap();
        assert!(!engine.is_loaded());
        assert_eq!(engine.box_lengths().unwrap_err(), SimError::UninitializedSimulation);
        assert_eq!(engine.thermalize(1.0).unwrap_err(), SimError::UninitializedSimulation);
        assert_eq!(engine.timestep(), 0);
    }
}
