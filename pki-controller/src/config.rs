use kvdi_pki::PkiConfig;

/// Controller configuration
///
/// # Environment variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | WORK_DIR | ./work_dir/pki | Root of the file-backed secret store |
/// | CLUSTER_FILE | - | JSON VDICluster descriptor |
/// | CLUSTER_NAME | kvdi | Cluster name when no descriptor is given |
/// | APP_NAMESPACE | default | App namespace when no descriptor is given |
/// | SESSIONS_FILE | - | JSON list of `{session, serviceIp}` entries |
/// | LOG_LEVEL | info | Default log level |
/// | LOG_JSON | false | Emit JSON logs |
/// | LOG_DIR | - | Directory for daily rotated log files |
/// | MAX_ATTEMPTS | 10 | Reconcile attempts per resource |
///
/// `PKI_KEY_SIZE` and `CLUSTER_SUFFIX` are read by [`PkiConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    pub cluster_file: Option<String>,
    pub cluster_name: String,
    pub app_namespace: Option<String>,
    pub sessions_file: Option<String>,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    pub max_attempts: u32,
    pub pki: PkiConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./work_dir/pki".into()),
            cluster_file: non_empty_var("CLUSTER_FILE"),
            cluster_name: std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "kvdi".into()),
            app_namespace: non_empty_var("APP_NAMESPACE"),
            sessions_file: non_empty_var("SESSIONS_FILE"),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: std::env::var("LOG_JSON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: non_empty_var("LOG_DIR"),
            max_attempts: std::env::var("MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
            pki: PkiConfig::from_env(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
