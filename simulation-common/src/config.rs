use crate::vecmath::Axis;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// Initial configuration: linear bead chains placed on a lattice
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SystemConfig {
    pub n_chains: u32,
    pub chain_length: u32,
    #[serde(default = "default_bead_type")]
    pub bead_type: String,
    #[serde(default = "default_unit")]
    pub bead_mass: f64,
    /// Target number density (particles per unit volume) used to size the box.
    pub number_density: f64,
    #[serde(default = "default_placement_seed")]
    pub placement_seed: u64,
}

fn default_bead_type() -> String {
    "A".to_string()
}

fn default_unit() -> f64 {
    1.0
}

fn default_placement_seed() -> u64 {
    42
}

// Per-bead Lennard-Jones parameters, mixed arithmetically for unlike pairs
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct BeadParams {
    pub epsilon: f64,
    pub sigma: f64,
}

// Harmonic bond parameters: V = k/2 (r - r0)^2
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct BondParams {
    pub k: f64,
    pub r0: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForcefieldConfig {
    pub r_cut: f64,
    pub beads: BTreeMap<String, BeadParams>,
    #[serde(default)]
    pub bonds: BTreeMap<String, BondParams>,
}

// Reference values declaring what one simulation unit means in real units
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub mass: Option<f64>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
}

// Controller-level settings shared by every stage of the protocol
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_log_write_freq")]
    pub log_write_freq: u64,
    /// Number of worker threads for force evaluation (None = rayon default).
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub reference: ReferenceConfig,
}

fn default_dt() -> f64 {
    0.0001
}

fn default_seed() -> u64 {
    42
}

fn default_log_write_freq() -> u64 {
    1000
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            dt: default_dt(),
            seed: default_seed(),
            log_write_freq: default_log_write_freq(),
            threads: None,
            reference: ReferenceConfig::default(),
        }
    }
}

/// One step of a run protocol, executed in order by the driver.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stage {
    Nvt {
        kt: f64,
        tau_kt: f64,
        n_steps: u64,
    },
    /// NVT with the temperature ramped linearly from `kt_start` to `kt_final`.
    NvtRamp {
        kt_start: f64,
        kt_final: f64,
        tau_kt: f64,
        n_steps: u64,
    },
    Npt {
        kt: f64,
        tau_kt: f64,
        pressure: f64,
        tau_pressure: f64,
        n_steps: u64,
    },
    Langevin {
        kt: f64,
        alpha: f64,
        n_steps: u64,
    },
    Nve {
        n_steps: u64,
    },
    UpdateVolume {
        kt: f64,
        tau_kt: f64,
        n_steps: u64,
        period: u64,
        /// Target box in real units.
        #[serde(default)]
        final_box_lengths: Option<[f64; 3]>,
        /// Target box as a multiple of the current box.
        #[serde(default)]
        final_box_scale: Option<f64>,
    },
    DisplacementCap {
        n_steps: u64,
        maximum_displacement: f64,
    },
    Thermalize {
        kt: f64,
    },
    SetDt {
        dt: f64,
    },
    AdjustEpsilon {
        #[serde(default)]
        scale_by: Option<f64>,
        #[serde(default)]
        shift_by: Option<f64>,
        #[serde(default)]
        type_filter: Option<Vec<[String; 2]>>,
    },
    AdjustSigma {
        #[serde(default)]
        scale_by: Option<f64>,
        #[serde(default)]
        shift_by: Option<f64>,
        #[serde(default)]
        type_filter: Option<Vec<[String; 2]>>,
    },
    AddWalls {
        axis: Axis,
        sigma: f64,
        epsilon: f64,
        r_cut: f64,
    },
    RemoveWalls {
        axis: Axis,
    },
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_thermo: bool,
    #[serde(default = "default_true")]
    pub save_summary: bool,
}

fn default_true() -> bool {
    true
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub system: SystemConfig,
    pub forcefield: ForcefieldConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub protocol: Vec<Stage>,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.system.n_chains == 0 || self.system.chain_length == 0 {
            anyhow::bail!("n_chains and chain_length must be greater than 0.");
        }
        if !(self.system.number_density > 0.0) {
            anyhow::bail!("number_density must be positive.");
        }
        if !(self.system.bead_mass > 0.0) {
            anyhow::bail!("bead_mass must be positive.");
        }
        if !(self.forcefield.r_cut > 0.0) {
            anyhow::bail!("forcefield r_cut must be positive.");
        }
        if !self.forcefield.beads.contains_key(&self.system.bead_type) {
            anyhow::bail!(
                "bead type '{}' has no entry in [forcefield.beads].",
                self.system.bead_type
            );
        }
        if self.system.chain_length > 1 && self.forcefield.bonds.is_empty() {
            anyhow::bail!("chains longer than one bead need at least one [forcefield.bonds] entry.");
        }
        if self.control.log_write_freq == 0 {
            anyhow::bail!("log_write_freq must be greater than 0.");
        }
        for (idx, stage) in self.protocol.iter().enumerate() {
            if let Stage::UpdateVolume { final_box_lengths, final_box_scale, .. } = stage {
                if final_box_lengths.is_some() == final_box_scale.is_some() {
                    anyhow::bail!(
                        "protocol stage {} (update_volume) needs exactly one of final_box_lengths or final_box_scale.",
                        idx
                    );
                }
            }
        }
        // Numeric ranges of stage parameters are checked by the controller when the stage runs.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[system]
n_chains = 4
chain_length = 5
number_density = 0.5

[forcefield]
r_cut = 2.5
beads = { A = { epsilon = 1.0, sigma = 1.0 } }
bonds = { "A-A" = { k = 300.0, r0 = 1.1 } }

[control]
dt = 0.003
threads = 2

[[protocol]]
kind = "nvt"
kt = 1.0
tau_kt = 0.1
n_steps = 100

[[protocol]]
kind = "update_volume"
kt = 1.0
tau_kt = 0.1
n_steps = 200
period = 5
final_box_scale = 0.8

[[protocol]]
kind = "add_walls"
axis = "x"
sigma = 1.0
epsilon = 1.0
r_cut = 1.12

[[protocol]]
kind = "adjust_epsilon"
scale_by = 0.5
type_filter = [["A", "A"]]

[output]
base_filename = "chains"
"#;

    #[test]
    fn parses_protocol_stages() {
        let config = SimulationConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.control.dt, 0.003);
        assert_eq!(config.control.seed, 42);
        assert_eq!(config.control.threads, Some(2));
        assert_eq!(config.protocol.len(), 4);
        assert_eq!(config.protocol[0], Stage::Nvt { kt: 1.0, tau_kt: 0.1, n_steps: 100 });
        assert_eq!(
            config.protocol[2],
            Stage::AddWalls { axis: Axis::X, sigma: 1.0, epsilon: 1.0, r_cut: 1.12 }
        );
        match &config.protocol[3] {
            Stage::AdjustEpsilon { scale_by, shift_by, type_filter } => {
                assert_eq!(*scale_by, Some(0.5));
                assert!(shift_by.is_none());
                assert_eq!(type_filter.as_ref().map(|f| f.len()), Some(1));
            }
            other => panic!("unexpected stage {:?}", other),
        }
        assert!(config.output.save_thermo);
    }

    #[test]
    fn rejects_ambiguous_volume_target() {
        let bad = EXAMPLE.replace("final_box_scale = 0.8", "final_box_scale = 0.8\nfinal_box_lengths = [1.0, 1.0, 1.0]");
        assert!(SimulationConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn rejects_unknown_bead_type() {
        let bad = EXAMPLE.replace("number_density = 0.5", "number_density = 0.5\nbead_type = \"B\"");
        assert!(SimulationConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SimulationConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, EXAMPLE).unwrap();
        let config = SimulationConfig::load(&path).unwrap();
        assert_eq!(config.system.n_chains, 4);
    }
}
