use serde::{Deserialize, Serialize};
use std::path::Path;

/// Thermodynamic quantities at one timestep, in simulation units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermoSample {
    pub timestep: u64,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    /// Instantaneous temperature (kT).
    pub kt: f64,
    pub pressure: f64,
    pub volume: f64,
}

/// Samples recorded every `write_freq` steps across all runs of a simulation.
#[derive(Debug, Clone)]
pub struct ThermoLog {
    write_freq: u64,
    samples: Vec<ThermoSample>,
}

impl ThermoLog {
    pub fn new(write_freq: u64) -> Self {
        ThermoLog { write_freq: write_freq.max(1), samples: Vec::new() }
    }

    pub fn write_freq(&self) -> u64 {
        self.write_freq
    }

    /// True if a sample is due at `timestep`.
    pub fn is_due(&self, timestep: u64) -> bool {
        timestep % self.write_freq == 0
    }

    pub fn push(&mut self, sample: ThermoSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[ThermoSample] {
        &self.samples
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<&ThermoSample> {
        self.samples.last()
    }

    /// Writes all samples as CSV with a header row.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for sample in &self.samples {
            writer.serialize(sample)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestep: u64) -> ThermoSample {
        ThermoSample {
            timestep,
            kinetic_energy: 1.5,
            potential_energy: -2.0,
            kt: 1.0,
            pressure: 0.1,
            volume: 1000.0,
        }
    }

    #[test]
    fn cadence_follows_write_freq() {
        let log = ThermoLog::new(10);
        assert!(log.is_due(0));
        assert!(!log.is_due(5));
        assert!(log.is_due(20));
        assert_eq!(ThermoLog::new(0).write_freq(), 1);
    }

    #[test]
    fn writes_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thermo.csv");
        let mut log = ThermoLog::new(1);
        log.push(sample(0));
        log.push(sample(1));
        log.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("timestep,kinetic_energy,potential_energy,kt,pressure,volume")
        );
        assert_eq!(lines.count(), 2);
    }
}
