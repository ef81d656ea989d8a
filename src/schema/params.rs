//! Emulation parameters and the gene bounds that describe the search space.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named emulation parameter a gene can encode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Link bandwidth in Mbit/s.
    Bandwidth,
    /// One-way propagation delay in milliseconds.
    Delay,
    /// Uplink drop-tail queue depth in packets.
    UplinkQueue,
    /// Uplink packet loss rate.
    UplinkLoss,
    /// Downlink packet loss rate.
    DownlinkLoss,
    /// Topology flag, true when the gene value exceeds 0.5.
    Topology,
}

impl Parameter {
    /// Parameters every search space must contain.
    pub const REQUIRED: [Parameter; 4] = [
        Parameter::Bandwidth,
        Parameter::Delay,
        Parameter::UplinkQueue,
        Parameter::UplinkLoss,
    ];

    /// Field name used in configuration files and search log records.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Bandwidth => "bandwidth",
            Parameter::Delay => "delay",
            Parameter::UplinkQueue => "uplink_queue",
            Parameter::UplinkLoss => "uplink_loss",
            Parameter::DownlinkLoss => "downlink_loss",
            Parameter::Topology => "topology",
        }
    }

    /// How the real-valued gene is interpreted when decoded.
    pub fn kind(self) -> GeneKind {
        match self {
            Parameter::Delay | Parameter::UplinkQueue => GeneKind::Integer,
            Parameter::Topology => GeneKind::Flag,
            _ => GeneKind::Continuous,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interpretation of a gene at evaluation time.
///
/// All genes are mutated and crossed over as real numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneKind {
    Continuous,
    /// Rounded up to the next whole number.
    Integer,
    /// `value > 0.5` means true.
    Flag,
}

/// Closed interval `[lower, upper]` for one gene.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneBound {
    /// Parameter this gene encodes.
    pub parameter: Parameter,
    /// Lower bound (inclusive).
    pub lower: f64,
    /// Upper bound (inclusive).
    pub upper: f64,
    /// Maximum normal-mutation step. Derived from the population size when unset.
    #[serde(default)]
    pub max_step: Option<f64>,
}

impl GeneBound {
    pub fn new(parameter: Parameter, lower: f64, upper: f64) -> Self {
        Self {
            parameter,
            lower,
            upper,
            max_step: None,
        }
    }

    /// Width of the interval.
    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    /// Clamp a value into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    /// Whether a value lies inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Ordered gene bounds; gene `i` of every genome is governed by `genes[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpace {
    pub genes: Vec<GeneBound>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            genes: vec![
                GeneBound::new(Parameter::Delay, 5.0, 150.0),
                GeneBound::new(Parameter::Bandwidth, 1.0, 20.0),
                GeneBound::new(Parameter::UplinkQueue, 10.0, 500.0),
                GeneBound::new(Parameter::UplinkLoss, 0.0, 0.1),
                GeneBound::new(Parameter::DownlinkLoss, 0.0, 0.1),
            ],
        }
    }
}

impl ParameterSpace {
    pub fn new(genes: Vec<GeneBound>) -> Self {
        Self { genes }
    }

    /// Number of genes.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Index of the gene encoding `parameter`.
    pub fn index_of(&self, parameter: Parameter) -> Option<usize> {
        self.genes.iter().position(|g| g.parameter == parameter)
    }

    /// Normal-mutation step for each gene.
    ///
    /// Explicit `max_step` values win; otherwise `scale * span / (population + 1)`.
    pub fn mutation_steps(&self, population_size: usize, scale: f64) -> Vec<f64> {
        let divisor = (population_size + 1) as f64;
        self.genes
            .iter()
            .map(|g| g.max_step.unwrap_or(scale * g.span() / divisor))
            .collect()
    }

    /// Decode gene values into named emulation parameters.
    ///
    /// Missing optional genes fall back: downlink loss mirrors uplink loss and
    /// the topology flag is left unset. Values are clamped into their bounds first.
    pub fn decode(&self, values: &[f64]) -> EmulationParams {
        let get = |parameter: Parameter| {
            self.index_of(parameter)
                .and_then(|i| values.get(i).map(|v| self.genes[i].clamp(*v)))
        };

        let uplink_loss = get(Parameter::UplinkLoss).unwrap_or(0.0);
        EmulationParams {
            bandwidth: get(Parameter::Bandwidth).unwrap_or(0.0),
            delay: get(Parameter::Delay).map_or(0, whole),
            uplink_queue: get(Parameter::UplinkQueue).map_or(0, whole),
            uplink_loss,
            downlink_loss: get(Parameter::DownlinkLoss).unwrap_or(uplink_loss),
            topology: get(Parameter::Topology).map(|v| v > 0.5),
        }
    }

    /// Encode named parameters back into gene values (inverse of [`decode`](Self::decode)
    /// up to integer rounding).
    pub fn encode(&self, params: &EmulationParams) -> Vec<f64> {
        self.genes
            .iter()
            .map(|g| {
                let value = match g.parameter {
                    Parameter::Bandwidth => params.bandwidth,
                    Parameter::Delay => params.delay as f64,
                    Parameter::UplinkQueue => params.uplink_queue as f64,
                    Parameter::UplinkLoss => params.uplink_loss,
                    Parameter::DownlinkLoss => params.downlink_loss,
                    Parameter::Topology => match params.topology {
                        Some(true) => 1.0,
                        _ => 0.0,
                    },
                };
                g.clamp(value)
            })
            .collect()
    }
}

/// Round an integer-valued parameter up to the next whole number.
pub fn whole(value: f64) -> u32 {
    value.max(0.0).ceil() as u32
}

/// A decoded emulation configuration handed to the experiment harness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmulationParams {
    /// Link bandwidth in Mbit/s.
    pub bandwidth: f64,
    /// Propagation delay in milliseconds.
    pub delay: u32,
    /// Uplink queue depth in packets.
    pub uplink_queue: u32,
    /// Uplink loss rate.
    pub uplink_loss: f64,
    /// Downlink loss rate.
    pub downlink_loss: f64,
    /// Topology flag, when the space encodes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kinds() {
        let mut space = ParameterSpace::default();
        space
            .genes
            .push(GeneBound::new(Parameter::Topology, 0.0, 1.0));

        let params = space.decode(&[27.2, 9.6, 174.1, 0.004, 0.003, 0.7]);
        assert_eq!(params.delay, 28);
        assert_eq!(params.uplink_queue, 175);
        assert_eq!(params.bandwidth, 9.6);
        assert_eq!(params.downlink_loss, 0.003);
        assert_eq!(params.topology, Some(true));

        let params = space.decode(&[27.2, 9.6, 174.1, 0.004, 0.003, 0.5]);
        assert_eq!(params.topology, Some(false));
    }

    #[test]
    fn test_downlink_mirrors_uplink() {
        let space = ParameterSpace::new(vec![
            GeneBound::new(Parameter::Bandwidth, 1.0, 20.0),
            GeneBound::new(Parameter::Delay, 5.0, 150.0),
            GeneBound::new(Parameter::UplinkQueue, 10.0, 500.0),
            GeneBound::new(Parameter::UplinkLoss, 0.0, 0.1),
        ]);
        let params = space.decode(&[10.0, 30.0, 100.0, 0.02]);
        assert_eq!(params.downlink_loss, 0.02);
        assert_eq!(params.topology, None);
    }

    #[test]
    fn test_decode_clamps() {
        let space = ParameterSpace::default();
        let params = space.decode(&[500.0, -3.0, 10.0, 0.5, 0.0]);
        assert_eq!(params.delay, 150);
        assert_eq!(params.bandwidth, 1.0);
        assert_eq!(params.uplink_loss, 0.1);
    }

    #[test]
    fn test_mutation_steps() {
        let mut space = ParameterSpace::new(vec![
            GeneBound::new(Parameter::Delay, 25.0, 35.0),
            GeneBound::new(Parameter::Bandwidth, 0.0, 10.0),
        ]);
        space.genes[1].max_step = Some(0.25);

        let steps = space.mutation_steps(4, 1.5);
        assert!((steps[0] - 3.0).abs() < 1e-12);
        assert_eq!(steps[1], 0.25);
    }

    #[test]
    fn test_encode_decode() {
        let space = ParameterSpace::default();
        let values = space.encode(&EmulationParams {
            bandwidth: 12.5,
            delay: 40,
            uplink_queue: 200,
            uplink_loss: 0.01,
            downlink_loss: 0.02,
            topology: None,
        });
        assert_eq!(values, vec![40.0, 12.5, 200.0, 0.01, 0.02]);
        assert_eq!(space.decode(&values).uplink_queue, 200);
    }

    #[test]
    fn test_parameter_serde_names() {
        let json = serde_json::to_string(&Parameter::UplinkQueue).unwrap();
        assert_eq!(json, "\"uplink_queue\"");
    }
}
