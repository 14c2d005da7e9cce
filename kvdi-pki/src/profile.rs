use crate::cluster::{Session, VdiCluster};
use crate::dns;
use crate::error::Result;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    string::Ia5String, IsCa, KeyUsagePurpose, SanType, SerialNumber,
};
use std::net::{IpAddr, Ipv4Addr};
use time::{Duration, OffsetDateTime};

pub const ORGANIZATION: &str = "kVDI";

pub const CA_VALIDITY_DAYS: u32 = 365 * 10;
pub const APP_VALIDITY_DAYS: u32 = 365 * 10;
pub const SESSION_VALIDITY_DAYS: u32 = 365;

/// The two app certificates issued for a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppRole {
    /// HTTPS certificate of the app, also usable as a client.
    Server,
    /// Certificate the app dials desktop sessions with.
    Client,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::Server => "app-server",
            AppRole::Client => "app-client",
        }
    }
}

impl std::fmt::Display for AppRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct CaProfile {
    pub common_name: String,
    pub organization: String,
    pub validity_days: u32,
}

impl CaProfile {
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            organization: ORGANIZATION.to_string(),
            validity_days: CA_VALIDITY_DAYS,
        }
    }

    /// The root CA of a cluster, named after the cluster's CA name.
    pub fn for_cluster(cluster: &VdiCluster) -> Self {
        Self::new(&cluster.ca_name())
    }
}

#[derive(Clone, Debug)]
pub struct CertProfile {
    pub common_name: String,
    pub organization: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub validity_days: u32,
    pub is_client: bool,
    pub is_server: bool,
}

impl CertProfile {
    /// Certificate the app serves HTTPS with.
    pub fn app_server(cluster: &VdiCluster, cluster_suffix: &str) -> Self {
        let app_name = cluster.app_name();
        Self {
            dns_names: dns::dns_names(&app_name, cluster.core_namespace(), cluster_suffix),
            common_name: app_name,
            organization: ORGANIZATION.to_string(),
            ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            validity_days: APP_VALIDITY_DAYS,
            is_client: true,
            is_server: true,
        }
    }

    /// Certificate the app dials desktop sessions with.
    pub fn app_client(cluster: &VdiCluster, cluster_suffix: &str) -> Self {
        let app_name = cluster.app_name();
        Self {
            dns_names: dns::dns_names(&app_name, cluster.core_namespace(), cluster_suffix),
            common_name: app_name,
            organization: ORGANIZATION.to_string(),
            ip_addresses: vec![],
            validity_days: APP_VALIDITY_DAYS,
            is_client: true,
            is_server: false,
        }
    }

    pub fn for_app(role: AppRole, cluster: &VdiCluster, cluster_suffix: &str) -> Self {
        match role {
            AppRole::Server => Self::app_server(cluster, cluster_suffix),
            AppRole::Client => Self::app_client(cluster, cluster_suffix),
        }
    }

    /// Certificate for a desktop session's proxy, bound to its service IP.
    ///
    /// The IP is added both as an IP SAN and as a DNS name, since some
    /// clients only match on DNS entries.
    pub fn session(session: &Session, service_ip: IpAddr, cluster_suffix: &str) -> Self {
        let mut dns_names = dns::headless_dns_names(
            session.name(),
            session.name(),
            session.namespace(),
            cluster_suffix,
        );
        dns_names.push(service_ip.to_string());
        Self {
            common_name: service_ip.to_string(),
            organization: ORGANIZATION.to_string(),
            dns_names,
            ip_addresses: vec![service_ip],
            validity_days: SESSION_VALIDITY_DAYS,
            is_client: true,
            is_server: true,
        }
    }
}

fn distinguished_name(common_name: &str, organization: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, organization);
    dn
}

fn validity(params: &mut CertificateParams, validity_days: u32) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(validity_days as i64);
}

pub(crate) fn create_ca_params(profile: &CaProfile) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&profile.common_name, &profile.organization);
    params.subject_alt_names = vec![SanType::DnsName(Ia5String::try_from(
        profile.common_name.as_str(),
    )?)];
    params.serial_number = Some(SerialNumber::from(1u64));

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    validity(&mut params, profile.validity_days);
    Ok(params)
}

pub(crate) fn create_cert_params(profile: &CertProfile) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&profile.common_name, &profile.organization);

    // Built by hand: CertificateParams::new would turn the IP string into an IP SAN
    let mut sans = Vec::with_capacity(profile.dns_names.len() + profile.ip_addresses.len());
    for name in &profile.dns_names {
        sans.push(SanType::DnsName(Ia5String::try_from(name.as_str())?));
    }
    for ip in &profile.ip_addresses {
        sans.push(SanType::IpAddress(*ip));
    }
    params.subject_alt_names = sans;
    params.serial_number = Some(SerialNumber::from(random_serial()));

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    let mut extended_key_usages = vec![];
    if profile.is_client {
        extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
    }
    if profile.is_server {
        extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    params.extended_key_usages = extended_key_usages;

    validity(&mut params, profile.validity_days);
    Ok(params)
}

/// Positive 63-bit serial, never 1 (reserved for the CA).
fn random_serial() -> u64 {
    loop {
        let serial = rand::random::<u64>() >> 1;
        if serial > 1 {
            return serial;
        }
    }
}
