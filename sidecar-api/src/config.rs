use std::path::PathBuf;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ApiConfig {
    #[envconfig(from = "AGNOSTIC_SIDECAR_API_ENABLED", default = "false")]
    pub enabled: bool,

    #[envconfig(from = "AGNOSTIC_SIDECAR_API_BIND", default = "0.0.0.0:8080")]
    pub bind: String,

    /// Every path accepted by the API resolves inside this directory.
    #[envconfig(from = "AGNOSTIC_SIDECAR_DATA_ROOT", default = "/data")]
    pub data_root: PathBuf,

    /// Game server log tailed by `/api/logs/stream`, relative to the data root.
    #[envconfig(from = "AGNOSTIC_SIDECAR_STDOUT_FILE", default = "stdout.log")]
    pub stdout_file: String,

    /// Requests per minute allowed for a single client.
    #[envconfig(from = "AGNOSTIC_SIDECAR_RATE_LIMIT", default = "60")]
    pub rate_limit: u32,

    #[envconfig(from = "AGNOSTIC_SIDECAR_MAX_UPLOAD_BYTES", default = "524288000")]
    pub max_upload_bytes: usize,
}

impl ApiConfig {
    pub fn stdout_log_path(&self) -> PathBuf {
        self.data_root.join(&self.stdout_file)
    }
}
