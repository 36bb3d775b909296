//! Precoding Configuration
//!
//! Immutable description of the layers-to-ports mapping applied per
//! precoding resource block group (PRG), per 3GPP TS 38.214.

use crate::PhyError;
use common::MAX_RB;
use num_complex::Complex32;
use num_traits::Zero;

/// Complex weight matrix mapping layers onto antenna ports for one PRG.
///
/// Weights are stored row-major with one row of layer coefficients per port,
/// so the per-port coefficient sequence is a contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecodingWeightMatrix {
    weights: Vec<Complex32>,
    nof_ports: usize,
    nof_layers: usize,
}

impl PrecodingWeightMatrix {
    /// Create an all-zero weight matrix.
    pub fn new(nof_ports: usize, nof_layers: usize) -> Self {
        Self {
            weights: vec![Complex32::zero(); nof_ports * nof_layers],
            nof_ports,
            nof_layers,
        }
    }

    /// Identity mapping of `n` layers onto `n` ports.
    pub fn make_identity(n: usize) -> Self {
        let mut matrix = Self::new(n, n);
        for i in 0..n {
            matrix.set_coefficient(i, i, Complex32::new(1.0, 0.0));
        }
        matrix
    }

    /// Number of antenna ports.
    pub fn nof_ports(&self) -> usize {
        self.nof_ports
    }

    /// Number of layers.
    pub fn nof_layers(&self) -> usize {
        self.nof_layers
    }

    /// Coefficient applied to `layer` when mapping onto `port`.
    pub fn coefficient(&self, layer: usize, port: usize) -> Complex32 {
        assert!(
            layer < self.nof_layers && port < self.nof_ports,
            "Coefficient index (i.e., layer {} port {}) is out of range (i.e., {}x{}).",
            layer,
            port,
            self.nof_ports,
            self.nof_layers
        );
        self.weights[port * self.nof_layers + layer]
    }

    /// Overwrite the coefficient applied to `layer` when mapping onto `port`.
    pub fn set_coefficient(&mut self, layer: usize, port: usize, value: Complex32) {
        assert!(
            layer < self.nof_layers && port < self.nof_ports,
            "Coefficient index (i.e., layer {} port {}) is out of range (i.e., {}x{}).",
            layer,
            port,
            self.nof_ports,
            self.nof_layers
        );
        self.weights[port * self.nof_layers + layer] = value;
    }

    /// Per-layer coefficients for one port.
    pub fn port_coefficients(&self, port: usize) -> &[Complex32] {
        assert!(
            port < self.nof_ports,
            "Port index (i.e., {}) is out of range (i.e., {}).",
            port,
            self.nof_ports
        );
        &self.weights[port * self.nof_layers..(port + 1) * self.nof_layers]
    }
}

/// Precoding configuration for one transmission: the PRG granularity and one
/// weight matrix per PRG.
///
/// The configuration is produced by the beamforming stage and only read by
/// the mapping engine.
#[derive(Debug, Clone)]
pub struct PrecodingConfiguration {
    nof_layers: usize,
    nof_ports: usize,
    prg_size: usize,
    prg_weights: Vec<PrecodingWeightMatrix>,
}

impl PrecodingConfiguration {
    /// Create a configuration from the PRG size in resource blocks and one
    /// weight matrix per PRG.
    pub fn new(
        prg_size: usize,
        prg_weights: Vec<PrecodingWeightMatrix>,
    ) -> Result<Self, PhyError> {
        if prg_size == 0 {
            return Err(PhyError::InvalidConfiguration(
                "PRG size must be at least one resource block".to_string(),
            ));
        }
        let first = prg_weights.first().ok_or_else(|| {
            PhyError::InvalidConfiguration("At least one PRG weight matrix is required".to_string())
        })?;
        let nof_ports = first.nof_ports();
        let nof_layers = first.nof_layers();
        if nof_layers == 0 || nof_layers > nof_ports {
            return Err(PhyError::InvalidConfiguration(format!(
                "Number of layers {} must be in range [1, {}]",
                nof_layers, nof_ports
            )));
        }
        if prg_weights
            .iter()
            .any(|m| m.nof_ports() != nof_ports || m.nof_layers() != nof_layers)
        {
            return Err(PhyError::InvalidConfiguration(format!(
                "All PRG weight matrices must be {}x{}",
                nof_ports, nof_layers
            )));
        }
        Ok(Self {
            nof_layers,
            nof_ports,
            prg_size,
            prg_weights,
        })
    }

    /// Configuration with a single PRG spanning the entire band.
    pub fn make_wideband(weights: PrecodingWeightMatrix) -> Result<Self, PhyError> {
        Self::new(MAX_RB, vec![weights])
    }

    /// Number of layers.
    pub fn nof_layers(&self) -> usize {
        self.nof_layers
    }

    /// Number of antenna ports.
    pub fn nof_ports(&self) -> usize {
        self.nof_ports
    }

    /// PRG size in resource blocks.
    pub fn prg_size(&self) -> usize {
        self.prg_size
    }

    /// Number of PRGs.
    pub fn nof_prg(&self) -> usize {
        self.prg_weights.len()
    }

    /// Weight matrix of one PRG.
    pub fn prg_coefficients(&self, i_prg: usize) -> &PrecodingWeightMatrix {
        &self.prg_weights[i_prg]
    }

    /// Coefficient applied to `layer` when mapping onto `port` within `prg`.
    pub fn coefficient(&self, layer: usize, port: usize, prg: usize) -> Complex32 {
        self.prg_weights[prg].coefficient(layer, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matrix() {
        let matrix = PrecodingWeightMatrix::make_identity(2);
        assert_eq!(matrix.coefficient(0, 0), Complex32::new(1.0, 0.0));
        assert_eq!(matrix.coefficient(1, 1), Complex32::new(1.0, 0.0));
        assert_eq!(matrix.coefficient(0, 1), Complex32::zero());
        assert_eq!(matrix.coefficient(1, 0), Complex32::zero());
        assert_eq!(matrix.port_coefficients(1), &[
            Complex32::zero(),
            Complex32::new(1.0, 0.0)
        ]);
    }

    #[test]
    fn test_wideband_configuration() {
        let config =
            PrecodingConfiguration::make_wideband(PrecodingWeightMatrix::make_identity(2)).unwrap();
        assert_eq!(config.nof_layers(), 2);
        assert_eq!(config.nof_ports(), 2);
        assert_eq!(config.nof_prg(), 1);
        assert_eq!(config.prg_size(), MAX_RB);
        assert_eq!(config.coefficient(0, 0, 0), Complex32::new(1.0, 0.0));
    }

    #[test]
    fn test_rejects_more_layers_than_ports() {
        let matrix = PrecodingWeightMatrix::new(1, 2);
        assert!(PrecodingConfiguration::make_wideband(matrix).is_err());
    }

    #[test]
    fn test_rejects_mismatched_prg_matrices() {
        let result = PrecodingConfiguration::new(
            2,
            vec![
                PrecodingWeightMatrix::make_identity(2),
                PrecodingWeightMatrix::make_identity(4),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_prg_size() {
        let result =
            PrecodingConfiguration::new(0, vec![PrecodingWeightMatrix::make_identity(1)]);
        assert!(result.is_err());
    }
}
