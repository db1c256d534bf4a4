use approx::assert_relative_eq;
use md_control::{
    bead_spring, place_chains, ActiveMethod, Engine, Force, ForceKind, LennardJones, LjParams, MethodKind, SimError,
    Simulation, SimulationOptions, TypePair,
};
use simulation_common::{Axis, BeadParams, BondParams, ForcefieldConfig, Snapshot, SystemConfig};
use std::collections::BTreeMap;

fn chains(number_density: f64) -> Snapshot {
    place_chains(&SystemConfig {
        n_chains: 4,
        chain_length: 8,
        bead_type: "A".to_string(),
        bead_mass: 1.0,
        number_density,
        placement_seed: 3,
    })
    .unwrap()
}

fn forcefield() -> Vec<Force> {
    let mut beads = BTreeMap::new();
    beads.insert("A".to_string(), BeadParams { epsilon: 1.0, sigma: 1.0 });
    beads.insert("B".to_string(), BeadParams { epsilon: 0.5, sigma: 1.2 });
    let mut bonds = BTreeMap::new();
    bonds.insert("A-A".to_string(), BondParams { k: 100.0, r0: 1.0 });
    bead_spring(&ForcefieldConfig { r_cut: 2.5, beads, bonds }).unwrap()
}

fn options() -> SimulationOptions {
    SimulationOptions { dt: 0.002, log_write_freq: 50, ..SimulationOptions::default() }
}

fn dilute_sim() -> Simulation {
    let mut sim = Simulation::from_snapshot(chains(0.05), forcefield(), options()).unwrap();
    sim.thermalize(1.0).unwrap();
    sim
}

fn epsilons(sim: &Simulation) -> Vec<f64> {
    sim.forces().pair_force().unwrap().iter().map(|(_, p)| p.epsilon).collect()
}

#[test]
fn default_references_leave_quantities_unchanged() {
    let sim = dilute_sim();
    assert_eq!(sim.box_lengths_reduced().unwrap(), sim.box_lengths().unwrap());
    assert_relative_eq!(sim.volume_reduced().unwrap(), sim.volume().unwrap());
    assert_relative_eq!(sim.mass_reduced().unwrap(), sim.mass().unwrap());
    assert_relative_eq!(sim.density_reduced().unwrap(), sim.density().unwrap());
}

#[test]
fn reduced_quantities_follow_reference_values() {
    let mut sim = dilute_sim();
    sim.set_reference_mass(2.0).unwrap();
    sim.set_reference_distance(2.0).unwrap();

    let box_real = sim.box_lengths().unwrap();
    let box_reduced = sim.box_lengths_reduced().unwrap();
    for axis in 0..3 {
        assert_relative_eq!(2.0 * box_reduced[axis], box_real[axis], epsilon = 1e-12);
    }
    assert_relative_eq!(2.0 * sim.mass_reduced().unwrap(), sim.mass().unwrap(), epsilon = 1e-12);
    assert_relative_eq!(8.0 * sim.volume_reduced().unwrap(), sim.volume().unwrap(), epsilon = 1e-9);
    assert_relative_eq!(sim.density_reduced().unwrap(), 4.0 * sim.density().unwrap(), epsilon = 1e-12);
}

#[test]
fn invalid_reference_is_rejected_without_change() {
    let mut sim = dilute_sim();
    let err = sim.set_reference(Some(3.0), Some(0.0), None).unwrap_err();
    assert!(matches!(err, SimError::InvalidReference { quantity: "distance", .. }));
    assert_eq!(sim.reference().mass(), 1.0);
    assert_eq!(sim.reference().distance(), 1.0);
}

#[test]
fn switching_methods_leaves_exactly_one_attached() {
    let mut sim = dilute_sim();
    sim.run_nvt(1.0, 0.1, 20).unwrap();
    assert_eq!(sim.method_kind(), MethodKind::Nvt);
    assert_eq!(sim.engine().methods().len(), 1);

    sim.run_npt(1.0, 0.1, 0.05, 1.0, 20).unwrap();
    assert_eq!(sim.method_kind(), MethodKind::Npt);
    assert_eq!(sim.engine().methods().len(), 1);
    assert_eq!(sim.engine().methods()[0].kind(), MethodKind::Npt);

    sim.run_langevin(20, 1.0, 0.5).unwrap();
    sim.run_nve(20).unwrap();
    sim.run_displacement_cap(20, 0.05).unwrap();
    assert_eq!(sim.method_kind(), MethodKind::DisplacementCapped);
    assert_eq!(sim.engine().methods().len(), 1);
    assert_eq!(sim.timestep(), 100);
}

#[test]
fn rejected_method_keeps_previous_one() {
    let mut sim = dilute_sim();
    sim.run_nve(10).unwrap();
    let err = sim.run_nvt(-1.0, 0.1, 10).unwrap_err();
    assert!(matches!(err, SimError::InvalidParameter { .. }));
    assert_eq!(sim.method(), &ActiveMethod::Nve);
    assert_eq!(sim.engine().methods(), &[ActiveMethod::Nve]);
    assert_eq!(sim.timestep(), 10);
}

#[test]
fn dt_persists_across_runs_and_switches() {
    let mut sim = dilute_sim();
    sim.set_dt(0.003).unwrap();
    sim.run_nvt(1.0, 0.1, 10).unwrap();
    assert_eq!(sim.dt(), 0.003);
    sim.run_langevin(10, 1.0, 1.0).unwrap();
    assert_eq!(sim.dt(), 0.003);
}

#[test]
fn epsilon_scale_round_trips() {
    let mut sim = dilute_sim();
    let original = epsilons(&sim);
    sim.adjust_epsilon(Some(0.5), None, None).unwrap();
    sim.run_nvt(1.0, 0.1, 10).unwrap();
    sim.adjust_epsilon(Some(2.0), None, None).unwrap();
    for (before, after) in original.iter().zip(epsilons(&sim)) {
        assert_relative_eq!(*before, after, epsilon = 1e-3);
    }
}

#[test]
fn epsilon_shift_adds_exactly_one() {
    let mut sim = dilute_sim();
    let original = epsilons(&sim);
    let changed = sim.adjust_epsilon(None, Some(1.0), None).unwrap();
    assert_eq!(changed, original.len());
    for (before, after) in original.iter().zip(epsilons(&sim)) {
        assert_eq!(after, before + 1.0);
    }
}

#[test]
fn sigma_adjustment_respects_filter() {
    let mut sim = dilute_sim();
    let filter = [TypePair::new("B", "A")];
    sim.adjust_sigma(Some(2.0), None, Some(&filter)).unwrap();
    let lj = sim.forces().pair_force().unwrap();
    assert_relative_eq!(lj.get(&TypePair::new("A", "B")).unwrap().sigma, 2.2);
    assert_eq!(lj.get(&TypePair::new("A", "A")).unwrap().sigma, 1.0);
}

#[test]
fn ambiguous_adjustments_raise() {
    let mut sim = dilute_sim();
    let original = epsilons(&sim);
    assert!(matches!(sim.adjust_epsilon(Some(0.5), Some(1.0), None), Err(SimError::InvalidAdjustment(_))));
    assert!(matches!(sim.adjust_epsilon(None, None, None), Err(SimError::InvalidAdjustment(_))));
    assert!(matches!(sim.adjust_sigma(Some(0.5), Some(1.0), None), Err(SimError::InvalidAdjustment(_))));
    assert!(matches!(sim.adjust_sigma(None, None, None), Err(SimError::InvalidAdjustment(_))));
    assert_eq!(epsilons(&sim), original);
}

#[test]
fn update_volume_reaches_target_box() {
    let mut sim = dilute_sim();
    let original = sim.box_lengths().unwrap();
    sim.run_update_volume(1.0, 0.1, 100, 10, original * 0.5).unwrap();
    let final_box = sim.box_lengths().unwrap();
    for axis in 0..3 {
        assert_relative_eq!(final_box[axis], 0.5 * original[axis], epsilon = 1e-9);
    }
    assert_eq!(sim.method_kind(), MethodKind::VolumeRamp);
}

#[test]
fn update_volume_with_walls_moves_walls() {
    let mut sim = dilute_sim();
    let original = sim.box_lengths().unwrap();
    sim.add_walls(Axis::Z, 1.0, 1.0, 1.0).unwrap();
    // period does not divide n_steps; the final step still lands on the target
    sim.run_update_volume(1.0, 0.1, 95, 10, original * 0.5).unwrap();

    let final_box = sim.box_lengths().unwrap();
    for axis in 0..3 {
        assert_relative_eq!(final_box[axis], 0.5 * original[axis], epsilon = 1e-9);
    }
    let walls: Vec<_> = sim.forces().walls().collect();
    assert_eq!(walls.len(), 1);
    let (lower, upper) = walls[0].planes();
    assert_relative_eq!(upper, 0.25 * original.z, epsilon = 1e-9);
    assert_relative_eq!(lower, -0.25 * original.z, epsilon = 1e-9);
}

#[test]
fn update_volume_uses_reference_distance() {
    let mut sim = dilute_sim();
    sim.set_reference_distance(3.0).unwrap();
    let original = sim.box_lengths().unwrap();
    sim.run_update_volume(1.0, 0.1, 40, 10, original * 0.8).unwrap();
    let final_box = sim.box_lengths().unwrap();
    assert_relative_eq!(final_box.x, 0.8 * original.x, epsilon = 1e-9);
}

#[test]
fn repeated_walls_accumulate_and_remove_by_axis() {
    let mut sim = dilute_sim();
    sim.add_walls(Axis::X, 1.0, 1.0, 1.0).unwrap();
    sim.add_walls(Axis::X, 1.0, 1.0, 1.0).unwrap();
    sim.add_walls(Axis::Y, 1.0, 1.0, 1.0).unwrap();
    assert_eq!(sim.forces().walls().count(), 3);

    assert_eq!(sim.remove_walls(Axis::X), 2);
    let remaining: Vec<Axis> = sim.forces().walls().map(|w| w.spec.axis).collect();
    assert_eq!(remaining, vec![Axis::Y]);
    sim.run_nvt(1.0, 0.1, 10).unwrap();
}

#[test]
fn invalid_wall_is_rejected() {
    let mut sim = dilute_sim();
    let before = sim.forces().len();
    assert!(matches!(sim.add_walls(Axis::X, 1.0, 1.0, 0.0), Err(SimError::InvalidParameter { .. })));
    assert_eq!(sim.forces().len(), before);
}

#[test]
fn removing_missing_force_is_a_noop() {
    let mut sim = dilute_sim();
    let before = sim.forces().len();
    let removed = sim.remove_force(ForceKind::Wall);
    assert!(removed.is_empty());
    assert_eq!(sim.forces().len(), before);
}

#[test]
fn removing_pair_force_disables_adjustments() {
    let mut sim = dilute_sim();
    let removed = sim.remove_force(ForceKind::LennardJones);
    assert_eq!(removed.len(), 1);
    assert!(matches!(sim.adjust_epsilon(Some(0.5), None, None), Err(SimError::ForceNotFound(_))));
    assert!(matches!(sim.add_walls(Axis::X, 1.0, 1.0, 1.0), Err(SimError::ForceNotFound(_))));

    let mut lj = LennardJones::new();
    lj.set(TypePair::new("A", "A"), LjParams { epsilon: 2.0, sigma: 1.0, r_cut: 2.5 }).unwrap();
    sim.add_force(Force::LennardJones(lj));
    assert_eq!(sim.adjust_epsilon(None, Some(0.5), None).unwrap(), 1);
    sim.run_nve(10).unwrap();
}

#[test]
fn operations_before_load_fail() {
    let mut sim = Simulation::new(forcefield(), options()).unwrap();
    assert_eq!(sim.run_nvt(1.0, 0.1, 10).unwrap_err(), SimError::UninitializedSimulation);
    assert_eq!(sim.add_walls(Axis::X, 1.0, 1.0, 1.0).unwrap_err(), SimError::UninitializedSimulation);
    assert_eq!(sim.thermalize(1.0).unwrap_err(), SimError::UninitializedSimulation);
    assert_eq!(sim.density().unwrap_err(), SimError::UninitializedSimulation);
    assert_eq!(sim.method_kind(), MethodKind::Unattached);

    sim.load_state(chains(0.05)).unwrap();
    sim.run_nvt(1.0, 0.1, 10).unwrap();
    assert_eq!(sim.timestep(), 10);
}

#[test]
fn nvt_drives_temperature_towards_target() {
    let mut sim = dilute_sim();
    sim.run_nvt(2.0, 0.02, 2000).unwrap();
    let last = sim.thermo_log().last().copied().unwrap();
    assert_eq!(last.timestep, 2000);
    assert!(last.kt.is_finite());
    assert!((last.kt - 2.0).abs() < 0.6, "kT = {}", last.kt);
}

#[test]
fn thread_pool_device_runs() {
    let options = SimulationOptions { device: md_control::Device::Cpu { threads: Some(2) }, ..options() };
    let mut sim = Simulation::from_snapshot(chains(0.05), forcefield(), options).unwrap();
    sim.thermalize(1.0).unwrap();
    sim.run_langevin(50, 1.0, 1.0).unwrap();
    let snap = sim.snapshot().unwrap();
    assert!(snap.positions.iter().all(|p| p.is_finite()));
    assert_eq!(snap.timestep, 50);
}
