//! `CUSTOM` mappings: device-specific logic supplied by the host.

use tracing::debug;

use super::MapArguments;
use crate::buffer::TypedBuffer;
use crate::error::{Result, TokamapError};

/// Device-specific resolution logic registered under a `CUSTO_TYPE` tag.
pub trait CustomHandler: Send + Sync {
    /// Produce the value for the current request.
    fn map(&self, args: &MapArguments<'_>) -> anyhow::Result<TypedBuffer>;
}

impl<F> CustomHandler for F
where
    F: Fn(&MapArguments<'_>) -> anyhow::Result<TypedBuffer> + Send + Sync,
{
    fn map(&self, args: &MapArguments<'_>) -> anyhow::Result<TypedBuffer> {
        self(args)
    }
}

/// Dispatch to the handler registered for a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMapping {
    custom_type: String,
}

impl CustomMapping {
    /// Dispatch to the handler registered for `custom_type`.
    pub fn new(custom_type: impl Into<String>) -> Self {
        Self {
            custom_type: custom_type.into(),
        }
    }

    /// The custom-kind tag.
    pub fn custom_type(&self) -> &str {
        &self.custom_type
    }

    /// Run the registered handler.
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        let handler = args
            .providers
            .custom_handler(&self.custom_type)
            .ok_or_else(|| TokamapError::UnknownCustomType(self.custom_type.clone()))?;
        debug!(custom_type = %self.custom_type, "Dispatching custom mapping");
        handler.map(args).map_err(|reason| TokamapError::Plugin {
            name: self.custom_type.clone(),
            reason,
        })
    }
}
