// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    Fifo,
    #[default]
    Mailbox,
}

/// Renderer settings, read from the `[render]` table of the app config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    pub application_name: String,
    pub clear_color: [f32; 4],
    pub present_mode: PresentModePreference,
    /// `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    pub require_discrete_gpu: bool,
    pub require_sampler_anisotropy: bool,
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            application_name: "cadence".to_string(),
            clear_color: [0.0, 0.0, 0.2, 1.0],
            present_mode: PresentModePreference::Mailbox,
            fence_timeout_ms: None,
            require_discrete_gpu: false,
            require_sampler_anisotropy: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        match self.fence_timeout_ms {
            Some(ms) => ms.saturating_mul(1_000_000),
            None => u64::MAX,
        }
    }
}
