//! Gateway configuration.

/// Settings applied to every session handled by a [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Extension appended to synthesized pipe upload names (e.g. `".txt"`).
    pub pipe_extension: String,
    /// Register the SFTP subsystem.
    pub sftp_enabled: bool,
    /// Wrap every session in the logging middleware.
    pub logging: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pipe_extension: String::new(),
            sftp_enabled: true,
            logging: true,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pipe upload extension.
    pub fn with_pipe_extension(mut self, ext: impl Into<String>) -> Self {
        self.pipe_extension = ext.into();
        self
    }

    /// Enable or disable the SFTP subsystem.
    pub fn with_sftp(mut self, enabled: bool) -> Self {
        self.sftp_enabled = enabled;
        self
    }

    /// Enable or disable the logging middleware.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }
}
