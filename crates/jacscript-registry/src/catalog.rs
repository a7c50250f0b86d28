//! The service catalog consulted by the compiler.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::builtin;
use crate::spec::{PacketSpec, ServiceSpec};

/// Errors raised while adding services to a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("service '{name}' already registered")]
    DuplicateService { name: String },

    #[error("service class {class_identifier:#010x} already registered")]
    DuplicateClass { class_identifier: u32 },
}

/// All services known to the compiler, plus the `_system` packets every
/// service shares.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    services: Vec<ServiceSpec>,
    by_name: FxHashMap<String, usize>,
    by_class: FxHashMap<u32, usize>,
    system: ServiceSpec,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCatalog {
    /// A catalog with only the `_system` service.
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            by_name: FxHashMap::default(),
            by_class: FxHashMap::default(),
            system: builtin::system(),
        }
    }

    /// A catalog with the built-in services registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for spec in builtin::services() {
            // built-in names and classes are distinct
            let _ = catalog.register(spec);
        }
        catalog
    }

    pub fn register(&mut self, spec: ServiceSpec) -> Result<(), RegistryError> {
        let key = spec.name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(RegistryError::DuplicateService { name: spec.name });
        }
        if self.by_class.contains_key(&spec.class_identifier) {
            return Err(RegistryError::DuplicateClass {
                class_identifier: spec.class_identifier,
            });
        }
        let idx = self.services.len();
        self.by_name.insert(key, idx);
        self.by_class.insert(spec.class_identifier, idx);
        self.services.push(spec);
        Ok(())
    }

    /// Look a service up by name, ignoring case.
    pub fn by_name(&self, name: &str) -> Option<&ServiceSpec> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.services[i])
    }

    pub fn by_class(&self, class_identifier: u32) -> Option<&ServiceSpec> {
        self.by_class
            .get(&class_identifier)
            .map(|&i| &self.services[i])
    }

    /// The packets every service shares (`reading`, `intensity`, ...).
    pub fn system(&self) -> &ServiceSpec {
        &self.system
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter()
    }

    /// Resolve `service.<id>` to a register, event or command.
    ///
    /// A packet matches when its own name matches, or when `id` names a
    /// `_system` packet with the same identifier and kind. The latter lets
    /// scripts write `thermometer.reading` for the `temperature` register.
    pub fn member<'a>(&'a self, service: &'a ServiceSpec, id: &str) -> Option<&'a PacketSpec> {
        let generic = self
            .system
            .packets
            .iter()
            .rev()
            .find(|p| p.matches_name(id));
        service.packets.iter().find(|p| {
            (p.kind.is_register() || p.kind.is_event() || p.kind.is_command())
                && (p.matches_name(id)
                    || generic.is_some_and(|g| g.identifier == p.identifier && g.kind == p.kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{FieldSpec, PacketKind};

    #[test]
    fn builtins_resolve_by_name_and_class() {
        let catalog = ServiceCatalog::with_builtins();
        let button = catalog.by_name("Button").unwrap();
        assert_eq!(button.class_identifier, builtin::BUTTON);
        assert_eq!(catalog.by_class(builtin::BUTTON).map(|s| s.name.as_str()), Some("button"));
        assert!(catalog.by_name("flux_capacitor").is_none());
    }

    #[test]
    fn generic_reading_maps_to_service_register() {
        let catalog = ServiceCatalog::with_builtins();
        let thermo = catalog.by_name("thermometer").unwrap();
        let reading = catalog.member(thermo, "reading").unwrap();
        assert_eq!(reading.name, "temperature");
        assert_eq!(reading.identifier, 0x101);
        let direct = catalog.member(thermo, "temperature").unwrap();
        assert_eq!(direct, reading);
    }

    #[test]
    fn generic_name_respects_kind() {
        let catalog = ServiceCatalog::with_builtins();
        let button = catalog.by_name("button").unwrap();
        // `active` is an event in _system; the button has no event 0x03
        assert!(catalog.member(button, "change").is_none());
        assert!(catalog.member(button, "active").is_some());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut catalog = ServiceCatalog::with_builtins();
        let err = catalog.register(ServiceSpec::new("button", 1)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateService {
                name: "button".into()
            }
        );
        let err = catalog
            .register(ServiceSpec::new("other", builtin::SERVO))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateClass { .. }));
    }

    #[test]
    fn custom_service() {
        let mut catalog = ServiceCatalog::new();
        catalog
            .register(
                ServiceSpec::new("gauge", 0x1234_5678).with_packet(
                    PacketSpec::register("value", PacketKind::Rw, 0x02)
                        .with_field(FieldSpec::new("value", -4)),
                ),
            )
            .unwrap();
        let gauge = catalog.by_name("gauge").unwrap();
        assert_eq!(catalog.member(gauge, "value").unwrap().payload_size(), 4);
    }
}
