pub mod config;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    BeadParams, BondParams, ControlConfig, ForcefieldConfig, OutputConfig, ReferenceConfig,
    SimulationConfig, Stage, SystemConfig,
};
pub use snapshot::{BondRecord, Snapshot};
pub use vecmath::{minimum_image, wrap_coordinate, Axis, Vec3};
