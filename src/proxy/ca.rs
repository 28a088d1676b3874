use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::ServerConfig;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, info};

use super::error::ProxyError;

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca.key";
const CA_COMMON_NAME: &str = "FinderSniffer Root CA";

/// 本地根证书颁发机构
///
/// 根证书落盘复用，叶子证书按主机名现签现用并缓存。
/// 根证书需要在手机上作为受信任证书安装，由代理的 /cert 端点下发。
pub struct CertificateAuthority {
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_cert_pem: String,
    // host -> 现成的TLS服务端配置
    configs: DashMap<String, Arc<ServerConfig>>,
}

impl CertificateAuthority {
    /// 加载或生成根证书；生成/加载失败对整个进程是致命的
    pub async fn load_or_create(ca_dir: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let ca_dir = ca_dir.as_ref();
        tokio::fs::create_dir_all(ca_dir).await?;
        let cert_path = ca_dir.join(CA_CERT_FILE);
        let key_path = ca_dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let ca_cert_pem = tokio::fs::read_to_string(&cert_path).await?;
            let key_pem = tokio::fs::read_to_string(&key_path).await?;
            let ca_key = KeyPair::from_pem(&key_pem)?;
            // 用落盘参数重建签名用的证书对象，下发给设备的仍是原始PEM
            let ca_cert = CertificateParams::from_ca_cert_pem(&ca_cert_pem)?.self_signed(&ca_key)?;
            info!("加载根证书: {}", cert_path.display());
            return Ok(Self {
                ca_cert,
                ca_key,
                ca_cert_pem,
                configs: DashMap::new(),
            });
        }

        let ca_key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        dn.push(DnType::OrganizationName, "FinderSniffer");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages.push(KeyUsagePurpose::KeyCertSign);
        params.key_usages.push(KeyUsagePurpose::CrlSign);
        let ca_cert = params.self_signed(&ca_key)?;
        let ca_cert_pem = ca_cert.pem();

        tokio::fs::write(&cert_path, &ca_cert_pem).await?;
        tokio::fs::write(&key_path, ca_key.serialize_pem()).await?;
        info!("✅ 生成根证书: {}", cert_path.display());

        Ok(Self {
            ca_cert,
            ca_key,
            ca_cert_pem,
            configs: DashMap::new(),
        })
    }

    /// 下发给设备安装的根证书PEM
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// 根证书DER，给需要把根证书放进信任库的一侧用
    pub fn ca_cert_der(&self) -> rustls::pki_types::CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    /// 取主机名对应的TLS服务端配置，叶子证书不存在则现签
    pub fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>, ProxyError> {
        if let Some(config) = self.configs.get(host) {
            return Ok(Arc::clone(&config));
        }

        debug!("为主机签发叶子证书: {}", host);
        let leaf_key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![host.to_string()])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;
        let leaf = params.signed_by(&leaf_key, &self.ca_cert, &self.ca_key)?;

        let chain = vec![leaf.der().clone(), self.ca_cert.der().clone()];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        let config = Arc::new(
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(chain, key)?,
        );

        self.configs.insert(host.to_string(), Arc::clone(&config));
        Ok(config)
    }
}
