//! Parameter descriptors and control-rate parameter access

use crate::{error::Result, plugin::PluginInstance};

/// Stable parameter identifier. Not an index into the parameter list.
pub type ParamId = u32;

/// Parameter flags reported by the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterFlags {
    /// Can be automated by the host
    pub can_automate: bool,
    /// Output only; the host must not set it
    pub is_read_only: bool,
    /// Bypass switch of the plugin
    pub is_bypass: bool,
    /// Discrete list of named values
    pub is_list: bool,
}

/// Descriptor of one plugin parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// Stable identifier
    pub id: ParamId,
    /// Full title
    pub title: String,
    /// Short title
    pub short_title: String,
    /// Unit label (e.g. "Hz", "dB", "%")
    pub units: String,
    /// Default normalized value in [0, 1]
    pub default_normalized: f64,
    /// Plain value at normalized 0
    pub min: f64,
    /// Plain value at normalized 1
    pub max: f64,
    /// 0 = continuous, N > 0 = N + 1 discrete steps
    pub step_count: u32,
    /// Flags
    pub flags: ParameterFlags,
}

impl ParameterDescriptor {
    /// Convert normalized value (0.0-1.0) to plain value
    pub fn normalized_to_plain(&self, normalized: f64) -> f64 {
        let normalized = normalized.clamp(0.0, 1.0);
        if self.is_discrete() {
            let steps = self.step_count as f64;
            let step = (normalized * steps).round();
            self.min + (step / steps) * (self.max - self.min)
        } else {
            self.min + normalized * (self.max - self.min)
        }
    }

    /// Convert plain value to normalized value (0.0-1.0)
    pub fn plain_to_normalized(&self, plain: f64) -> f64 {
        if (self.max - self.min).abs() < f64::EPSILON {
            0.0
        } else {
            ((plain - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
        }
    }

    /// Format a normalized value with its unit
    pub fn format_value(&self, normalized: f64) -> String {
        let plain = self.normalized_to_plain(normalized);

        if self.is_boolean() {
            if normalized >= 0.5 { "On" } else { "Off" }.to_string()
        } else if self.is_discrete() {
            format!("{:.0} {}", plain, self.units).trim_end().to_string()
        } else if self.units.is_empty() {
            format!("{:.3}", plain)
        } else {
            format!("{:.3} {}", plain, self.units)
        }
    }

    /// Number of distinct values, `None` for continuous parameters
    pub fn value_count(&self) -> Option<u32> {
        self.is_discrete().then(|| self.step_count + 1)
    }

    /// Check if this is a discrete/stepped parameter
    pub fn is_discrete(&self) -> bool {
        self.step_count > 0
    }

    /// Check if this is a two-state switch
    pub fn is_boolean(&self) -> bool {
        self.step_count == 1
    }
}

/// A parameter value change at a sample position of the next block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChange {
    /// Parameter ID
    pub id: ParamId,
    /// New normalized value (0.0 to 1.0)
    pub value: f64,
    /// Sample offset within the block
    pub sample_offset: u32,
}

/// Batch parameter update, applied in order, stopping at the first failure
pub struct ParameterUpdate<'a> {
    updates: Vec<(ParamId, f64)>,
    plugin: &'a mut PluginInstance,
}

impl<'a> ParameterUpdate<'a> {
    pub(crate) fn new(plugin: &'a mut PluginInstance) -> Self {
        Self {
            updates: Vec::new(),
            plugin,
        }
    }

    /// Queue a parameter value
    pub fn set(&mut self, id: ParamId, value: f64) -> &mut Self {
        self.updates.push((id, value));
        self
    }

    /// Apply all parameter updates
    pub fn apply(self) -> Result<()> {
        for (id, value) in self.updates {
            self.plugin.set_parameter(id, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(step_count: u32, min: f64, max: f64, units: &str) -> ParameterDescriptor {
        ParameterDescriptor {
            id: 1,
            title: "Cutoff".to_string(),
            short_title: "Cut".to_string(),
            units: units.to_string(),
            default_normalized: 0.5,
            min,
            max,
            step_count,
            flags: ParameterFlags::default(),
        }
    }

    #[test]
    fn test_continuous_conversion() {
        let param = descriptor(0, 20.0, 20020.0, "Hz");
        assert_eq!(param.normalized_to_plain(0.0), 20.0);
        assert_eq!(param.normalized_to_plain(0.5), 10020.0);
        assert!((param.plain_to_normalized(10020.0) - 0.5).abs() < 1e-12);
        assert_eq!(param.value_count(), None);
        assert_eq!(param.format_value(0.0), "20.000 Hz");
    }

    #[test]
    fn test_discrete_steps() {
        // 4 steps: 5 values 0, 1, 2, 3, 4
        let param = descriptor(4, 0.0, 4.0, "");
        assert_eq!(param.value_count(), Some(5));
        assert_eq!(param.normalized_to_plain(0.3), 1.0);
        assert_eq!(param.normalized_to_plain(0.9), 4.0);
        assert_eq!(param.format_value(0.5), "2");
    }

    #[test]
    fn test_boolean() {
        let param = descriptor(1, 0.0, 1.0, "");
        assert!(param.is_boolean());
        assert_eq!(param.format_value(1.0), "On");
        assert_eq!(param.format_value(0.2), "Off");
    }

    #[test]
    fn test_degenerate_range() {
        let param = descriptor(0, 3.0, 3.0, "");
        assert_eq!(param.plain_to_normalized(3.0), 0.0);
    }
}
