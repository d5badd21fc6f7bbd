use crate::config_id::ConfigId;
use crate::schema::SchemaRegistry;
use crate::store::ConfigurationStore;

/// Assigns configuration pids to elements
///
/// References evaluate to the pid of the element they point at. Whatever stores the evaluated configuration decides
/// what those pids look like.
pub trait PidResolver {
    /// Pid of the element identified by `id`, `None` if there is no such (enabled) element
    fn lookup_pid(&self, id: &ConfigId) -> Option<String>;

    /// Pids of all enabled instances of `pid`, used for wildcard references
    fn instances(&self, _pid: &str) -> Vec<String> {
        vec![]
    }
}

/// Resolver backed by a [ConfigurationStore]: the canonical [ConfigId] string is the pid
///
/// Nested elements always resolve. Top-level elements resolve when the store holds an enabled element with that
/// identity, written with the pid or the alias registered for it.
pub struct StoreResolver<'a> {
    store: &'a ConfigurationStore,
    registry: Option<&'a SchemaRegistry>,
}

impl<'a> StoreResolver<'a> {
    pub fn new(store: &'a ConfigurationStore, registry: Option<&'a SchemaRegistry>) -> Self {
        Self { store, registry }
    }

    fn alias(&self, pid: &str) -> Option<&'a str> {
        self.registry
            .and_then(|registry| registry.entry(pid))
            .and_then(|entry| entry.alias())
    }
}

impl PidResolver for StoreResolver<'_> {
    fn lookup_pid(&self, id: &ConfigId) -> Option<String> {
        if id.is_nested() {
            return Some(id.to_string());
        }

        let alias = self.alias(id.pid());
        let element = match id.id() {
            Some(instance) => self.store.factory_instance(id.pid(), alias, instance),
            None => self.store.singleton(id.pid(), alias),
        };
        element
            .filter(|element| element.is_enabled())
            .map(|_| id.to_string())
    }

    fn instances(&self, pid: &str) -> Vec<String> {
        let mut names = vec![pid];
        names.extend(self.alias(pid));

        let mut pids = vec![];
        for name in names {
            for id in self.store.factory_ids(name) {
                let pid = ConfigId::new(pid, Some(id)).to_string();
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
        pids
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::document::Document;
    use crate::element::ConfigElement;
    use crate::schema::{SchemaSource, TypeSchema};
    use pretty_assertions::assert_eq;

    #[test]
    fn store_backed_pids() {
        let (registry, _) = SchemaRegistry::default().add_source(&SchemaSource::new(
            "s".into(),
            vec![TypeSchema::factory("com.example.port").alias("port")],
        ));
        let store = ConfigurationStore::default().add(
            &Document::new("a.hcl".into())
                .with_element(ConfigElement::new("port").with_id("http"))
                .with_element(
                    ConfigElement::new("port")
                        .with_id("off")
                        .with_attribute("configurationEnabled", "false"),
                ),
        );
        let resolver = StoreResolver::new(&store, Some(&registry));

        let http = ConfigId::new("com.example.port", Some("http".into()));
        assert_eq!(resolver.lookup_pid(&http), Some("com.example.port[http]".into()));
        assert_eq!(
            resolver.lookup_pid(&ConfigId::new("com.example.port", Some("off".into()))),
            None
        );
        assert_eq!(
            resolver.lookup_pid(&ConfigId::new("com.example.port", Some("missing".into()))),
            None
        );

        let nested = ConfigId::nested(&http, "com.example.tls", None, "tls");
        assert_eq!(
            resolver.lookup_pid(&nested),
            Some("com.example.port[http]/com.example.tls(tls)".into())
        );
        assert_eq!(resolver.instances("com.example.port"), vec!["com.example.port[http]"]);
    }
}
