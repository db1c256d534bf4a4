//! Force terms and the registry that owns them.
//!
//! The registry is the controller's view of the live forcefield: pair
//! parameters are edited in place between runs and picked up by the engine
//! on its next step.

use crate::error::{require_non_negative, require_positive, SimError, SimResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use simulation_common::{Axis, BondParams, ForcefieldConfig, Vec3};
use std::collections::BTreeMap;
use std::fmt;

/// Unordered pair of particle type labels. `("B", "A")` and `("A", "B")` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypePair {
    first: String,
    second: String,
}

impl TypePair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            TypePair { first: a, second: b }
        } else {
            TypePair { first: b, second: a }
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }
}

impl<A: Into<String>, B: Into<String>> From<(A, B)> for TypePair {
    fn from((a, b): (A, B)) -> Self {
        TypePair::new(a, b)
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

/// Lennard-Jones parameters for one type pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LjParams {
    pub epsilon: f64,
    pub sigma: f64,
    pub r_cut: f64,
}

impl LjParams {
    fn validate(&self) -> SimResult<()> {
        require_non_negative("epsilon", self.epsilon)?;
        require_non_negative("sigma", self.sigma)?;
        require_positive("r_cut", self.r_cut)
    }
}

/// Evaluates the 12-6 Lennard-Jones pair interaction at squared separation `r2`.
///
/// Returns `(f_over_r, energy)`, where the force on particle i is
/// `f_over_r * (r_i - r_j)`, or `None` beyond the cutoff.
#[inline(always)]
pub fn lj_pair(params: &LjParams, r2: f64) -> Option<(f64, f64)> {
    if r2 >= params.r_cut * params.r_cut || r2 <= 0.0 {
        return None;
    }
    let sr2 = params.sigma * params.sigma / r2;
    let sr6 = sr2 * sr2 * sr2;
    let sr12 = sr6 * sr6;
    let energy = 4.0 * params.epsilon * (sr12 - sr6);
    let f_over_r = 24.0 * params.epsilon * (2.0 * sr12 - sr6) / r2;
    Some((f_over_r, energy))
}

/// A scale-or-shift edit applied to one LJ field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Scale(f64),
    Shift(f64),
}

impl Adjustment {
    /// Builds an adjustment from the optional `scale_by`/`shift_by` pair. Exactly one must be set.
    pub fn from_options(scale_by: Option<f64>, shift_by: Option<f64>) -> SimResult<Self> {
        match (scale_by, shift_by) {
            (Some(scale), None) => {
                require_non_negative("scale_by", scale)?;
                Ok(Adjustment::Scale(scale))
            }
            (None, Some(shift)) => {
                if !shift.is_finite() {
                    return Err(SimError::parameter("shift_by", shift, "must be finite"));
                }
                Ok(Adjustment::Shift(shift))
            }
            (Some(_), Some(_)) => Err(SimError::InvalidAdjustment("both were given")),
            (None, None) => Err(SimError::InvalidAdjustment("neither was given")),
        }
    }

    pub fn apply(self, value: f64) -> f64 {
        match self {
            Adjustment::Scale(factor) => value * factor,
            Adjustment::Shift(offset) => value + offset,
        }
    }
}

/// Which LJ field an adjustment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LjField {
    Epsilon,
    Sigma,
}

impl LjField {
    fn name(self) -> &'static str {
        match self {
            LjField::Epsilon => "epsilon",
            LjField::Sigma => "sigma",
        }
    }

    fn get(self, params: &LjParams) -> f64 {
        match self {
            LjField::Epsilon => params.epsilon,
            LjField::Sigma => params.sigma,
        }
    }

    fn set(self, params: &mut LjParams, value: f64) {
        match self {
            LjField::Epsilon => params.epsilon = value,
            LjField::Sigma => params.sigma = value,
        }
    }
}

/// Lennard-Jones pair force keyed by type pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LennardJones {
    params: BTreeMap<TypePair, LjParams>,
}

impl LennardJones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the parameters for one pair.
    pub fn set(&mut self, pair: impl Into<TypePair>, params: LjParams) -> SimResult<()> {
        params.validate()?;
        self.params.insert(pair.into(), params);
        Ok(())
    }

    pub fn get(&self, pair: &TypePair) -> Option<&LjParams> {
        self.params.get(pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypePair, &LjParams)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Largest cutoff over all pairs.
    pub fn max_r_cut(&self) -> f64 {
        self.params.values().map(|p| p.r_cut).fold(0.0, f64::max)
    }

    /// Applies `adjustment` to `field` on every pair selected by `type_filter` (default: all).
    ///
    /// New values are computed for all selected pairs before any is written; a
    /// negative or non-finite result rejects the whole call. Returns the number
    /// of pairs changed.
    pub fn adjust(
        &mut self,
        field: LjField,
        adjustment: Adjustment,
        type_filter: Option<&[TypePair]>,
    ) -> SimResult<usize> {
        let updates: Vec<(TypePair, f64)> = self
            .params
            .iter()
            .filter(|(pair, _)| type_filter.map_or(true, |filter| filter.contains(pair)))
            .map(|(pair, params)| (pair.clone(), adjustment.apply(field.get(params))))
            .collect();

        if let Some((_, bad)) = updates.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return Err(SimError::parameter(field.name(), *bad, "adjustment would make it negative"));
        }

        for (pair, value) in &updates {
            if let Some(params) = self.params.get_mut(pair) {
                field.set(params, *value);
            }
        }
        debug!("Adjusted {} on {} pair(s) with {:?}.", field.name(), updates.len(), adjustment);
        Ok(updates.len())
    }

    /// Builds a dense `n_types x n_types` lookup table for the engine.
    pub(crate) fn resolve(&self, types: &[String]) -> PairTable {
        let n_types = types.len();
        let mut entries = vec![None; n_types * n_types];
        for (i, a) in types.iter().enumerate() {
            for (j, b) in types.iter().enumerate() {
                let params = self.params.get(&TypePair::new(a.as_str(), b.as_str())).copied();
                if params.is_none() && i <= j {
                    warn!("No Lennard-Jones parameters for pair {}-{}; the pair will not interact.", a, b);
                }
                entries[i * n_types + j] = params;
            }
        }
        PairTable { n_types, entries, max_r_cut: self.max_r_cut() }
    }
}

/// Dense per-type-id view of a `LennardJones` force, rebuilt before each run.
#[derive(Debug, Clone)]
pub(crate) struct PairTable {
    n_types: usize,
    entries: Vec<Option<LjParams>>,
    pub max_r_cut: f64,
}

impl PairTable {
    #[inline(always)]
    pub fn get(&self, type_i: usize, type_j: usize) -> Option<&LjParams> {
        self.entries.get(type_i * self.n_types + type_j).and_then(|p| p.as_ref())
    }
}

/// Harmonic bond force keyed by bond type name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonicBond {
    params: BTreeMap<String, BondParams>,
}

impl HarmonicBond {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, bond_type: impl Into<String>, params: BondParams) -> SimResult<()> {
        require_non_negative("k", params.k)?;
        require_non_negative("r0", params.r0)?;
        self.params.insert(bond_type.into(), params);
        Ok(())
    }

    pub fn get(&self, bond_type: &str) -> Option<&BondParams> {
        self.params.get(bond_type)
    }

    pub(crate) fn resolve(&self, bond_types: &[String]) -> Vec<Option<BondParams>> {
        bond_types
            .iter()
            .map(|name| {
                let params = self.params.get(name).copied();
                if params.is_none() {
                    warn!("No harmonic bond parameters for bond type '{}'.", name);
                }
                params
            })
            .collect()
    }
}

/// Parameters of a pair of confining walls along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallSpec {
    pub axis: Axis,
    pub sigma: f64,
    pub epsilon: f64,
    pub r_cut: f64,
}

impl WallSpec {
    fn validate(&self) -> SimResult<()> {
        require_non_negative("wall sigma", self.sigma)?;
        require_non_negative("wall epsilon", self.epsilon)?;
        require_positive("wall r_cut", self.r_cut)
    }
}

/// Two Lennard-Jones walls on opposite box faces along `spec.axis`.
///
/// The lower wall pushes towards `+axis`, the upper one towards `-axis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub spec: WallSpec,
    lower: f64,
    upper: f64,
}

impl Wall {
    /// Places the walls on the faces of a box with the given lengths.
    pub fn new(spec: WallSpec, box_lengths: Vec3) -> Self {
        let half = 0.5 * box_lengths[spec.axis.index()];
        Wall { spec, lower: -half, upper: half }
    }

    /// Plane coordinates `(lower, upper)` along the wall axis.
    pub fn planes(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Moves both planes to the faces of a resized box.
    pub fn rescale(&mut self, box_lengths: Vec3) {
        let half = 0.5 * box_lengths[self.spec.axis.index()];
        self.lower = -half;
        self.upper = half;
    }

    /// Force and energy on a particle at `position`.
    ///
    /// Particles on the far side of a plane do not interact with it.
    pub fn evaluate(&self, position: Vec3) -> (Vec3, f64) {
        let coord = position[self.spec.axis.index()];
        let params = LjParams { epsilon: self.spec.epsilon, sigma: self.spec.sigma, r_cut: self.spec.r_cut };
        let mut f_axis = 0.0;
        let mut energy = 0.0;
        // distance to each plane, signed so positive means inside the box
        for (distance, direction) in [(coord - self.lower, 1.0), (self.upper - coord, -1.0)] {
            if distance > 0.0 {
                if let Some((f_over_r, u)) = lj_pair(&params, distance * distance) {
                    f_axis += direction * f_over_r * distance;
                    energy += u;
                }
            }
        }
        (self.spec.axis.unit() * f_axis, energy)
    }
}

/// Discriminant of a `Force`, used to address whole force terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceKind {
    LennardJones,
    HarmonicBond,
    Wall,
}

impl fmt::Display for ForceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForceKind::LennardJones => "lennard_jones",
            ForceKind::HarmonicBond => "harmonic_bond",
            ForceKind::Wall => "wall",
        };
        f.write_str(name)
    }
}

/// One force term of the forcefield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Force {
    LennardJones(LennardJones),
    HarmonicBond(HarmonicBond),
    Wall(Wall),
}

impl Force {
    pub fn kind(&self) -> ForceKind {
        match self {
            Force::LennardJones(_) => ForceKind::LennardJones,
            Force::HarmonicBond(_) => ForceKind::HarmonicBond,
            Force::Wall(_) => ForceKind::Wall,
        }
    }
}

/// Owns the live force terms of a simulation.
#[derive(Debug, Clone, Default)]
pub struct ForceRegistry {
    forces: Vec<Force>,
}

impl ForceRegistry {
    pub fn new(forces: Vec<Force>) -> Self {
        ForceRegistry { forces }
    }

    pub fn forces(&self) -> &[Force] {
        &self.forces
    }

    pub fn len(&self) -> usize {
        self.forces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forces.is_empty()
    }

    pub fn contains(&self, kind: ForceKind) -> bool {
        self.forces.iter().any(|f| f.kind() == kind)
    }

    /// The Lennard-Jones pair force.
    pub fn pair_force(&self) -> SimResult<&LennardJones> {
        self.forces
            .iter()
            .find_map(|f| match f {
                Force::LennardJones(lj) => Some(lj),
                _ => None,
            })
            .ok_or_else(|| SimError::ForceNotFound(ForceKind::LennardJones.to_string()))
    }

    /// Mutable access to the Lennard-Jones pair force.
    pub fn pair_force_mut(&mut self) -> SimResult<&mut LennardJones> {
        self.forces
            .iter_mut()
            .find_map(|f| match f {
                Force::LennardJones(lj) => Some(lj),
                _ => None,
            })
            .ok_or_else(|| SimError::ForceNotFound(ForceKind::LennardJones.to_string()))
    }

    pub(crate) fn bond_force(&self) -> Option<&HarmonicBond> {
        self.forces.iter().find_map(|f| match f {
            Force::HarmonicBond(bonds) => Some(bonds),
            _ => None,
        })
    }

    /// Scales or shifts epsilon on the selected pairs. See [`LennardJones::adjust`].
    pub fn adjust_epsilon(
        &mut self,
        scale_by: Option<f64>,
        shift_by: Option<f64>,
        type_filter: Option<&[TypePair]>,
    ) -> SimResult<usize> {
        let adjustment = Adjustment::from_options(scale_by, shift_by)?;
        self.pair_force_mut()?.adjust(LjField::Epsilon, adjustment, type_filter)
    }

    /// Scales or shifts sigma on the selected pairs. See [`LennardJones::adjust`].
    pub fn adjust_sigma(
        &mut self,
        scale_by: Option<f64>,
        shift_by: Option<f64>,
        type_filter: Option<&[TypePair]>,
    ) -> SimResult<usize> {
        let adjustment = Adjustment::from_options(scale_by, shift_by)?;
        self.pair_force_mut()?.adjust(LjField::Sigma, adjustment, type_filter)
    }

    /// Appends a force term.
    pub fn add_force(&mut self, force: Force) {
        debug!("Adding {} force.", force.kind());
        self.forces.push(force);
    }

    /// Removes every force of `kind` and returns them.
    ///
    /// Removing a kind that is not present is a no-op and returns an empty `Vec`.
    pub fn remove_force(&mut self, kind: ForceKind) -> Vec<Force> {
        let (removed, kept): (Vec<Force>, Vec<Force>) =
            self.forces.drain(..).partition(|f| f.kind() == kind);
        self.forces = kept;
        if removed.is_empty() {
            warn!("remove_force: no {} force present, nothing removed.", kind);
        } else {
            debug!("Removed {} {} force(s).", removed.len(), kind);
        }
        removed
    }

    /// Adds a pair of walls bounding the box along `spec.axis`.
    ///
    /// A second call with the same axis adds another independent pair.
    pub fn add_walls(&mut self, spec: WallSpec, box_lengths: Vec3) -> SimResult<()> {
        spec.validate()?;
        self.pair_force()?;
        self.forces.push(Force::Wall(Wall::new(spec, box_lengths)));
        debug!("Added walls along {:?} at +/-{:.4}.", spec.axis, 0.5 * box_lengths[spec.axis.index()]);
        Ok(())
    }

    /// Removes every wall along `axis`. Returns how many wall pairs were removed.
    pub fn remove_walls(&mut self, axis: Axis) -> usize {
        let before = self.forces.len();
        self.forces.retain(|f| !matches!(f, Force::Wall(w) if w.spec.axis == axis));
        before - self.forces.len()
    }

    pub fn walls(&self) -> impl Iterator<Item = &Wall> {
        self.forces.iter().filter_map(|f| match f {
            Force::Wall(w) => Some(w),
            _ => None,
        })
    }

    /// Moves every wall to the faces of a resized box.
    pub fn rescale_walls(&mut self, box_lengths: Vec3) {
        for force in &mut self.forces {
            if let Force::Wall(wall) = force {
                wall.rescale(box_lengths);
            }
        }
    }
}

/// Builds a bead-spring forcefield: LJ between every pair of bead types, with
/// arithmetic-mean mixing of epsilon and sigma, plus harmonic bonds.
pub fn bead_spring(config: &ForcefieldConfig) -> SimResult<Vec<Force>> {
    require_positive("r_cut", config.r_cut)?;
    let bead_types: Vec<(&String, _)> = config.beads.iter().collect();

    let mut lj = LennardJones::new();
    for (i, (name_i, bead_i)) in bead_types.iter().enumerate() {
        for (name_j, bead_j) in &bead_types[i..] {
            let params = LjParams {
                epsilon: (bead_i.epsilon + bead_j.epsilon) / 2.0,
                sigma: (bead_i.sigma + bead_j.sigma) / 2.0,
                r_cut: config.r_cut,
            };
            lj.set(TypePair::new(name_i.as_str(), name_j.as_str()), params)?;
        }
    }

    let mut forces = vec![Force::LennardJones(lj)];
    if !config.bonds.is_empty() {
        let mut bonds = HarmonicBond::new();
        for (bond_type, params) in &config.bonds {
            bonds.set(bond_type.as_str(), *params)?;
        }
        forces.push(Force::HarmonicBond(bonds));
    }
    Ok(forces)
}
