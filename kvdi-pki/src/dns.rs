use std::fs;
use std::path::Path;

/// Default location of the resolver configuration inside a pod.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Cluster DNS names for a service in a namespace.
///
/// The fully qualified variant is only emitted when the cluster suffix is known.
pub fn dns_names(svc_name: &str, svc_namespace: &str, cluster_suffix: &str) -> Vec<String> {
    let mut names = vec![
        svc_name.to_string(),
        format!("{svc_name}.{svc_namespace}"),
        format!("{svc_name}.{svc_namespace}.svc"),
    ];
    if !cluster_suffix.is_empty() {
        names.push(format!("{svc_name}.{svc_namespace}.svc.{cluster_suffix}"));
    }
    names
}

/// DNS names for a pod behind a headless service of the same namespace.
pub fn headless_dns_names(
    pod_name: &str,
    svc_name: &str,
    svc_namespace: &str,
    cluster_suffix: &str,
) -> Vec<String> {
    let mut names = dns_names(svc_name, svc_namespace, cluster_suffix);
    names.push(format!("{pod_name}.{svc_name}"));
    names.push(format!("{pod_name}.{svc_name}.{svc_namespace}"));
    names.push(format!("{pod_name}.{svc_name}.{svc_namespace}.svc"));
    if !cluster_suffix.is_empty() {
        names.push(format!(
            "{pod_name}.{svc_name}.{svc_namespace}.svc.{cluster_suffix}"
        ));
    }
    names
}

/// Read the cluster suffix from the last entry of the resolver search path.
///
/// Returns `None` when the file is unreadable or has no search line, which is
/// the case when running outside of a cluster.
pub fn cluster_suffix_from_resolv_conf<P: AsRef<Path>>(path: P) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    parse_cluster_suffix(&contents)
}

fn parse_cluster_suffix(contents: &str) -> Option<String> {
    let line = contents
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("search"))?;
    line.split_whitespace()
        .skip(1)
        .last()
        .map(|suffix| suffix.trim_end_matches('.').to_string())
        .filter(|suffix| !suffix.is_empty())
}
