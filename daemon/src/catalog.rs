//! Discovery of configured authentication brokers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use authgate_common::daemon_proto::BrokerInfo;
use authgate_common::descriptor::BrokerDescriptor;

use crate::broker::UnixBroker;

/// One usable broker: its display attributes plus a shared proxy.
pub struct BrokerHandle {
    pub name: String,
    pub brand_icon: String,
    pub broker: Arc<UnixBroker>,
}

#[derive(Default)]
pub struct BrokerCatalog {
    brokers: Vec<BrokerHandle>,
}

impl BrokerCatalog {
    /// Builds the catalog from every `*.toml` descriptor in `broker_dir`.
    ///
    /// A missing directory or an invalid descriptor disables the affected
    /// broker(s) only; the daemon itself keeps running so that already
    /// configured brokers stay usable.
    pub fn load_from_dir<P: AsRef<Path> + std::fmt::Debug>(
        broker_dir: P,
        conn_timeout: Duration,
    ) -> Self {
        let entries = match std::fs::read_dir(&broker_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "unable to read broker directory {:?} [{:?}], no brokers loaded",
                    broker_dir, err
                );
                return BrokerCatalog::default();
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "toml").unwrap_or(false))
            .collect();
        // Stable load order, so the first configured broker is predictable.
        paths.sort();

        let mut brokers = Vec::new();
        for path in paths {
            match BrokerDescriptor::load(&path) {
                Ok(descriptor) => {
                    info!("loaded broker {:?} from {:?}", descriptor.name, path);
                    brokers.push(BrokerHandle {
                        name: descriptor.name.clone(),
                        brand_icon: descriptor.brand_icon.clone(),
                        broker: Arc::new(UnixBroker::new(&descriptor, conn_timeout)),
                    });
                }
                Err(err) => {
                    warn!("skipping broker configuration {:?} [{}]", path, err);
                }
            }
        }

        if brokers.is_empty() {
            warn!("no authentication brokers configured, logins cannot proceed");
        }

        BrokerCatalog { brokers }
    }

    pub fn broker_by_name(&self, name: &str) -> Option<&BrokerHandle> {
        self.brokers.iter().find(|b| b.name == name)
    }

    pub fn list(&self) -> Vec<BrokerInfo> {
        self.brokers
            .iter()
            .map(|b| BrokerInfo {
                name: b.name.clone(),
                brand_icon: b.brand_icon.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "authgate-catalog-{}-{}",
            tag,
            uuid::Uuid::new_v4().as_simple()
        ));
        std::fs::create_dir_all(&dir).expect("failed to create scratch dir");
        dir
    }

    #[test]
    fn test_load_from_dir_skips_invalid_descriptors() {
        let dir = scratch_dir("mixed");

        std::fs::write(
            dir.join("good.toml"),
            "name = \"Good Broker\"\nbrand_icon = \"good\"\n\n[ipc]\nname = \"/run/good/sock\"\nobject = \"/com/good\"\ninterface = \"com.good.Broker\"\n",
        )
        .expect("failed to write descriptor");
        std::fs::write(dir.join("bad.toml"), "name = \"No Ipc Section\"\n")
            .expect("failed to write descriptor");
        std::fs::write(dir.join("ignored.conf"), "not a descriptor")
            .expect("failed to write file");

        let catalog = BrokerCatalog::load_from_dir(&dir, Duration::from_secs(2));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.broker_by_name("Good Broker").is_some());
        assert!(catalog.broker_by_name("No Ipc Section").is_none());

        let listed = catalog.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Good Broker");
        assert_eq!(listed[0].brand_icon, "good");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_from_missing_dir_is_empty() {
        let catalog = BrokerCatalog::load_from_dir(
            "/this/path/does/not/exist",
            Duration::from_secs(2),
        );
        assert!(catalog.is_empty());
    }
}
