//! Narrow provider interfaces for out-of-scope collaborators (§6.4).
//!
//! The orchestrator never embeds a keyring, wallet, or object-store client
//! directly — it depends only on these traits, matching the teacher's
//! `async_trait`-over-a-narrow-interface pattern used for its swarm/runtime
//! daemon collaborators.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Credential {
    pub user: String,
    pub password: String,
    pub tns: String,
}

/// Fallback chain: wallet → keyring → env vars → config file → interactive
/// prompt. Concrete providers decide how `get` is satisfied; the trait only
/// promises the caller a `Credential` or a descriptive failure.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get(&self, env_id: &str) -> anyhow::Result<Credential>;
}

/// Sets an OS-auth-style connection string (`/@tns`) backed by an
/// auto-login wallet, requiring `cwallet.sso` to be present on disk.
pub trait WalletProvider: Send + Sync {
    fn set_connection_via_wallet(&self, tns: &str, wallet_dir: &Path) -> anyhow::Result<String>;
}

pub struct FsWalletProvider;

impl WalletProvider for FsWalletProvider {
    fn set_connection_via_wallet(&self, tns: &str, wallet_dir: &Path) -> anyhow::Result<String> {
        let sso = wallet_dir.join("cwallet.sso");
        if !sso.exists() {
            anyhow::bail!(
                "wallet directory {} has no cwallet.sso",
                wallet_dir.display()
            );
        }
        // SAFETY-free: this only affects this process's environment table,
        // and the orchestrator is single-threaded when the phase machine is
        // wiring up connections.
        unsafe {
            std::env::set_var("TNS_ADMIN", wallet_dir);
        }
        Ok(format!("/@{tns}"))
    }
}

/// Optional Data Pump object-store target (§6.4): produces a `dumpfile=`
/// URL template containing a `%L` marker for parallel file numbering.
pub trait ObjectStoreProvider: Send + Sync {
    fn dumpfile_template(
        &self,
        namespace: &str,
        bucket: &str,
        path_prefix: &str,
        credential_name: &str,
    ) -> String;
}

pub struct OciObjectStoreProvider;

impl ObjectStoreProvider for OciObjectStoreProvider {
    fn dumpfile_template(
        &self,
        namespace: &str,
        bucket: &str,
        path_prefix: &str,
        credential_name: &str,
    ) -> String {
        let _ = credential_name;
        format!(
            "https://objectstorage.{{region}}.oraclecloud.com/n/{namespace}/b/{bucket}/o/{}export_%L.dmp",
            path_prefix.trim_end_matches('/').to_string() + "/"
        )
    }
}

/// Environment-variable credential provider, used as the terminal link in
/// the fallback chain and in test mode.
pub struct EnvCredentialProvider {
    pub prefix: String,
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get(&self, env_id: &str) -> anyhow::Result<Credential> {
        let user = std::env::var(format!("{}_{env_id}_USER", self.prefix))
            .map_err(|_| anyhow::anyhow!("no {env_id} credential in environment"))?;
        let password = std::env::var(format!("{}_{env_id}_PASSWORD", self.prefix))?;
        let tns = std::env::var(format!("{}_{env_id}_TNS", self.prefix))?;
        Ok(Credential { user, password, tns })
    }
}

pub fn default_wallet_dir(target_sid: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".oracle_wallets")
        .join(target_sid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_provider_fails_without_cwallet() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsWalletProvider;
        let err = provider
            .set_connection_via_wallet("ORCLPDB", dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("cwallet.sso"));
    }

    #[test]
    fn wallet_provider_succeeds_with_cwallet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cwallet.sso"), b"").unwrap();
        let provider = FsWalletProvider;
        let conn = provider
            .set_connection_via_wallet("ORCLPDB", dir.path())
            .unwrap();
        assert_eq!(conn, "/@ORCLPDB");
    }

    #[test]
    fn object_store_template_contains_parallel_marker() {
        let provider = OciObjectStoreProvider;
        let url = provider.dumpfile_template("ns1", "bucket1", "exports", "cred1");
        assert!(url.contains("%L"));
        assert!(url.contains("ns1"));
        assert!(url.contains("bucket1"));
    }
}
