//! Error type for the simulation controller.
//!
//! Every fallible controller operation validates its inputs before touching
//! the engine or the force parameters, so an `Err` always means nothing was
//! changed.

use thiserror::Error;

/// Errors raised by the simulation controller and its components.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// A reference mass, distance or energy was not strictly positive.
    #[error("invalid reference {quantity}: {value} (must be a positive, finite number)")]
    InvalidReference {
        /// Which reference value was rejected.
        quantity: &'static str,
        value: f64,
    },

    /// A physical parameter is outside its domain.
    ///
    /// Covers negative temperatures, non-positive time constants and cutoffs,
    /// and adjustments that would drive epsilon or sigma negative.
    #[error("invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A scale/shift request supplied both or neither of `scale_by` and `shift_by`.
    #[error("exactly one of scale_by or shift_by must be given ({0})")]
    InvalidAdjustment(&'static str),

    /// The requested force term is not part of the current forcefield.
    #[error("force not found: {0}")]
    ForceNotFound(String),

    /// The operation needs a particle configuration and none is loaded.
    #[error("no particle configuration has been loaded into the simulation")]
    UninitializedSimulation,

    /// A configuration snapshot failed validation on load.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The compute device could not be initialised.
    #[error("device initialisation failed: {0}")]
    Device(String),
}

impl SimError {
    pub(crate) fn parameter(name: &'static str, value: f64, reason: &'static str) -> Self {
        SimError::InvalidParameter { name, value, reason }
    }
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Fails unless `value` is finite and strictly greater than zero.
pub(crate) fn require_positive(name: &'static str, value: f64) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::parameter(name, value, "must be positive"))
    }
}

/// Fails unless `value` is finite and not negative.
pub(crate) fn require_non_negative(name: &'static str, value: f64) -> SimResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::parameter(name, value, "must not be negative"))
    }
}

/// Fails unless `value` is finite.
pub(crate) fn require_finite(name: &'static str, value: f64) -> SimResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::parameter(name, value, "must be finite"))
    }
}
