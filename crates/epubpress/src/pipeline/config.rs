use crate::config::Config;
use crate::render::RenderOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_entry_bytes: u64,
    pub render: RenderOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: crate::epub::DEFAULT_MAX_ENTRY_BYTES,
            render: RenderOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_entry_bytes: config.limits.max_entry_bytes,
            render: RenderOptions::from_config(config),
        }
    }
}
