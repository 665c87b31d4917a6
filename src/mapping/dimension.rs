//! `DIMENSION` mappings: reuse another entry's array as a coordinate.

use tracing::debug;

use super::MapArguments;
use crate::buffer::TypedBuffer;
use crate::error::{Result, TokamapError};

/// Resolves the entry registered for a probe.
///
/// For `data` and `time` requests the signal-specific entry `<probe>/<signal>`
/// is preferred over the bare `<probe>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionMapping {
    probe: String,
}

impl DimensionMapping {
    /// Look up `probe` in the same mapping table.
    pub fn new(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
        }
    }

    /// Probe name.
    pub fn probe(&self) -> &str {
        &self.probe
    }

    /// Delegate to the probe's entry.
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        if let Some(suffix) = args.signal.suffix() {
            let key = format!("{}/{}", self.probe, suffix);
            if args.entries.contains_key(&key) {
                debug!(probe = %self.probe, key = %key, "Resolving dimension");
                return args.delegate(&key);
            }
        }
        if !args.entries.contains_key(&self.probe) {
            return Err(TokamapError::Mapping(format!(
                "dimension probe '{}' has no mapping",
                self.probe
            )));
        }
        debug!(probe = %self.probe, "Resolving dimension");
        args.delegate(&self.probe)
    }
}
