//! One view over an assembly's types, shared by static metadata inspection
//! and by whatever the host exposes for assemblies it actually loaded.
//! Plugin discovery runs against this trait only, so both paths classify a
//! given assembly the same way.

use crate::config::MarkerSettings;
use crate::models::manifest::ModManifest;
use crate::models::plugin_reference::PluginReference;
use crate::models::type_reference::TypeReference;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque handle of a type inside one catalog.
pub type TypeToken = u32;

const MAX_BASE_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseType {
    /// Defined in the same assembly.
    Defined(TypeToken),
    /// Defined elsewhere; `assembly` is the referenced assembly's simple name when known.
    Foreign {
        assembly: Option<String>,
        reference: TypeReference,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescription {
    pub reference: TypeReference,
    pub is_interface: bool,
    pub is_abstract: bool,
}

pub trait TypeCatalog: Send + Sync {
    fn assembly_name(&self) -> &str;

    fn referenced_assemblies(&self) -> &[String];

    fn defined_types(&self) -> Vec<TypeToken>;

    fn describe(&self, ty: TypeToken) -> Option<&TypeDescription>;

    fn base_type(&self, ty: TypeToken) -> Option<BaseType>;

    /// String arguments of the first `attribute` applied to `ty`, `None` for a
    /// missing attribute or one whose constructor does not take only strings.
    fn attribute_arguments(&self, ty: TypeToken, attribute: &TypeReference)
        -> Option<Vec<Option<String>>>;

    fn find_type(&self, reference: &TypeReference) -> Option<TypeToken> {
        self.defined_types()
            .into_iter()
            .find(|ty| self.describe(*ty).is_some_and(|d| reference.matches(&d.reference)))
    }
}

/// Resolves other assemblies by simple name while walking base types.
pub trait AssemblyResolver {
    fn resolve(&self, assembly_name: &str) -> Option<Arc<dyn TypeCatalog>>;
}

/// Resolves nothing; base chains stop at the assembly boundary.
pub struct NoResolver;

impl AssemblyResolver for NoResolver {
    fn resolve(&self, _assembly_name: &str) -> Option<Arc<dyn TypeCatalog>> {
        None
    }
}

/// Decides which base types mark plugin classes and which attribute carries
/// their identity.
pub trait MarkerRecognizer {
    fn is_root_plugin(&self, base: &TypeReference) -> bool;
    fn is_internal_plugin(&self, base: &TypeReference) -> bool;
    fn plugin_attribute(&self) -> &TypeReference;
}

#[derive(Clone, Debug)]
pub struct PluginMarkers {
    root: TypeReference,
    internal: TypeReference,
    attribute: TypeReference,
}

impl PluginMarkers {
    pub fn new(root: TypeReference, internal: TypeReference, attribute: TypeReference) -> Self {
        Self {
            root,
            internal,
            attribute,
        }
    }

    pub fn from_settings(settings: &MarkerSettings) -> Self {
        Self::new(
            TypeReference::parse_full_name(&settings.root_plugin),
            TypeReference::parse_full_name(&settings.internal_plugin),
            TypeReference::parse_full_name(&settings.plugin_attribute),
        )
    }
}

impl Default for PluginMarkers {
    fn default() -> Self {
        Self::from_settings(&MarkerSettings::default())
    }
}

impl MarkerRecognizer for PluginMarkers {
    /// The root base class is never generic.
    fn is_root_plugin(&self, base: &TypeReference) -> bool {
        base.generic_arity == 0 && self.root.matches(base)
    }

    /// The internal base class exists in a plain and a one-parameter generic form.
    fn is_internal_plugin(&self, base: &TypeReference) -> bool {
        if base.generic_arity > 1 {
            return false;
        }
        let mut wanted = self.internal.clone();
        wanted.generic_arity = base.generic_arity;
        wanted.matches(base)
    }

    fn plugin_attribute(&self) -> &TypeReference {
        &self.attribute
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginKind {
    Root,
    Internal,
}

/// Plugin classes found in one assembly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginScan {
    pub root: Option<PluginReference>,
    pub internal: Vec<PluginReference>,
}

impl PluginScan {
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.internal.is_empty()
    }
}

fn is_object_root(reference: &TypeReference) -> bool {
    !reference.is_nested()
        && reference.generic_arity == 0
        && reference.name == "Object"
        && reference.namespace() == Some("System")
}

/// Walks the base chain of `ty` until a plugin marker, `System.Object`, or a
/// base that cannot be resolved.
pub fn find_marker(
    catalog: &dyn TypeCatalog,
    ty: TypeToken,
    resolver: &dyn AssemblyResolver,
    markers: &dyn MarkerRecognizer,
) -> Option<PluginKind> {
    let mut foreign: Option<Arc<dyn TypeCatalog>> = None;
    let mut token = ty;

    for _ in 0..MAX_BASE_DEPTH {
        let current: &dyn TypeCatalog = match &foreign {
            Some(target) => target.as_ref(),
            None => catalog,
        };
        let (reference, assembly) = match current.base_type(token)? {
            BaseType::Defined(base) => {
                token = base;
                (current.describe(base)?.reference.clone(), None)
            }
            BaseType::Foreign {
                assembly,
                reference,
            } => (reference, Some(assembly)),
        };

        if markers.is_root_plugin(&reference) {
            return Some(PluginKind::Root);
        }
        if markers.is_internal_plugin(&reference) {
            return Some(PluginKind::Internal);
        }
        if is_object_root(&reference) {
            return None;
        }

        if let Some(assembly) = assembly {
            let target = resolver.resolve(assembly.as_deref()?)?;
            token = target.find_type(&reference)?;
            foreign = Some(target);
        }
    }

    debug!(assembly = catalog.assembly_name(), "base type chain too deep");
    None
}

fn read_plugin(
    catalog: &dyn TypeCatalog,
    ty: TypeToken,
    reference: &TypeReference,
    markers: &dyn MarkerRecognizer,
    defaults: Option<&ModManifest>,
) -> Option<PluginReference> {
    let arguments = catalog.attribute_arguments(ty, markers.plugin_attribute())?;
    match (arguments.as_slice(), defaults) {
        ([], Some(manifest)) => Some(PluginReference::from_manifest(reference.clone(), manifest)),
        ([Some(guid), Some(name), Some(version)], _) => {
            match PluginReference::from_attribute(reference.clone(), guid, name, version) {
                Ok(plugin) => Some(plugin),
                Err(e) => {
                    debug!(plugin = %reference, "ignoring plugin attribute: {e}");
                    None
                }
            }
        }
        _ => None,
    }
}

/// Finds every concrete plugin class in `catalog`. A root plugin whose
/// attribute has no arguments takes its identity from `manifest`; internal
/// plugins must always carry all three arguments.
pub fn scan_plugins(
    catalog: &dyn TypeCatalog,
    resolver: &dyn AssemblyResolver,
    markers: &dyn MarkerRecognizer,
    manifest: &ModManifest,
) -> PluginScan {
    let mut scan = PluginScan::default();

    for ty in catalog.defined_types() {
        let Some(description) = catalog.describe(ty) else {
            continue;
        };
        if description.is_interface || description.is_abstract {
            continue;
        }

        match find_marker(catalog, ty, resolver, markers) {
            Some(PluginKind::Root) => {
                let Some(plugin) =
                    read_plugin(catalog, ty, &description.reference, markers, Some(manifest))
                else {
                    continue;
                };
                if let Some(existing) = &scan.root {
                    warn!(
                        assembly = catalog.assembly_name(),
                        "ignoring second root plugin {} (already found {})",
                        plugin.type_ref,
                        existing.type_ref
                    );
                    continue;
                }
                scan.root = Some(plugin);
            }
            Some(PluginKind::Internal) => {
                if let Some(plugin) = read_plugin(catalog, ty, &description.reference, markers, None)
                {
                    scan.internal.push(plugin);
                }
            }
            None => {}
        }
    }

    scan
}

#[derive(Clone, Debug)]
struct RuntimeType {
    description: TypeDescription,
    base: Option<BaseType>,
    attributes: Vec<(TypeReference, Vec<Option<String>>)>,
}

/// Catalog filled in by a host from its own reflection data, for assemblies
/// that are loaded for real.
#[derive(Clone, Debug, Default)]
pub struct RuntimeCatalog {
    name: String,
    references: Vec<String>,
    types: Vec<RuntimeType>,
    by_name: HashMap<String, TypeToken>,
}

impl RuntimeCatalog {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn reference(mut self, assembly: &str) -> Self {
        self.references.push(assembly.to_string());
        self
    }

    pub fn define(&mut self, description: TypeDescription, base: Option<BaseType>) -> TypeToken {
        let token = self.types.len() as TypeToken;
        self.by_name.insert(description.reference.to_string(), token);
        self.types.push(RuntimeType {
            description,
            base,
            attributes: Vec::new(),
        });
        token
    }

    pub fn apply_attribute(
        &mut self,
        ty: TypeToken,
        attribute: TypeReference,
        arguments: Vec<Option<String>>,
    ) {
        if let Some(entry) = self.types.get_mut(ty as usize) {
            entry.attributes.push((attribute, arguments));
        }
    }
}

impl TypeCatalog for RuntimeCatalog {
    fn assembly_name(&self) -> &str {
        &self.name
    }

    fn referenced_assemblies(&self) -> &[String] {
        &self.references
    }

    fn defined_types(&self) -> Vec<TypeToken> {
        (0..self.types.len() as TypeToken).collect()
    }

    fn describe(&self, ty: TypeToken) -> Option<&TypeDescription> {
        self.types.get(ty as usize).map(|t| &t.description)
    }

    fn base_type(&self, ty: TypeToken) -> Option<BaseType> {
        self.types.get(ty as usize)?.base.clone()
    }

    fn attribute_arguments(
        &self,
        ty: TypeToken,
        attribute: &TypeReference,
    ) -> Option<Vec<Option<String>>> {
        self.types
            .get(ty as usize)?
            .attributes
            .iter()
            .find(|(t, _)| attribute.matches(t))
            .map(|(_, args)| args.clone())
    }

    fn find_type(&self, reference: &TypeReference) -> Option<TypeToken> {
        let token = *self.by_name.get(&reference.to_string())?;
        self.describe(token)
            .is_some_and(|d| reference.matches(&d.reference))
            .then_some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ModManifest {
        ModManifest::from_json(br#"{"guid":"com.test.mod","name":"Test","version":"2.1"}"#)
            .unwrap()
    }

    fn class(ns: &str, name: &str) -> TypeDescription {
        TypeDescription {
            reference: TypeReference::from_metadata_name(Some(ns), name),
            is_interface: false,
            is_abstract: false,
        }
    }

    fn foreign(full_name: &str) -> Option<BaseType> {
        Some(BaseType::Foreign {
            assembly: Some("ModLoader".to_string()),
            reference: TypeReference::parse_full_name(full_name),
        })
    }

    fn attribute() -> TypeReference {
        TypeReference::parse_full_name("ModLoader.PluginAttribute")
    }

    #[test]
    fn root_with_defaults_and_internal_through_local_base() {
        let mut catalog = RuntimeCatalog::new("Test").reference("ModLoader");
        let root = catalog.define(class("Test", "Entry"), foreign("ModLoader.RootPlugin"));
        catalog.apply_attribute(root, attribute(), vec![]);

        let local_base = catalog.define(
            TypeDescription {
                is_abstract: true,
                ..class("Test", "FeatureBase`1")
            },
            foreign("ModLoader.InternalPlugin`1"),
        );
        let feature = catalog.define(class("Test", "Feature"), Some(BaseType::Defined(local_base)));
        catalog.apply_attribute(
            feature,
            attribute(),
            vec![Some("com.test.feature".into()), Some("Feature".into()), Some("0.3".into())],
        );

        let scan = scan_plugins(&catalog, &NoResolver, &PluginMarkers::default(), &manifest());
        let root = scan.root.unwrap();
        assert_eq!(root.guid, "com.test.mod");
        assert_eq!(root.type_ref.name, "Entry");
        assert_eq!(scan.internal.len(), 1);
        assert_eq!(scan.internal[0].guid, "com.test.feature");
    }

    #[test]
    fn invalid_attribute_skips_candidate() {
        let mut catalog = RuntimeCatalog::new("Test");
        let root = catalog.define(class("Test", "Entry"), foreign("ModLoader.RootPlugin"));
        catalog.apply_attribute(
            root,
            attribute(),
            vec![Some("not a guid".into()), Some("Entry".into()), Some("1.0".into())],
        );
        let internal = catalog.define(class("Test", "Extra"), foreign("ModLoader.InternalPlugin"));
        catalog.apply_attribute(internal, attribute(), vec![]);

        let scan = scan_plugins(&catalog, &NoResolver, &PluginMarkers::default(), &manifest());
        assert!(scan.is_empty());
    }

    #[test]
    fn only_first_root_is_kept() {
        let mut catalog = RuntimeCatalog::new("Test");
        for name in ["A", "B"] {
            let ty = catalog.define(class("Test", name), foreign("ModLoader.RootPlugin"));
            catalog.apply_attribute(ty, attribute(), vec![]);
        }
        let scan = scan_plugins(&catalog, &NoResolver, &PluginMarkers::default(), &manifest());
        assert_eq!(scan.root.unwrap().type_ref.name, "A");
    }

    #[test]
    fn generic_root_base_is_not_a_marker() {
        let markers = PluginMarkers::default();
        assert!(markers.is_root_plugin(&TypeReference::parse_full_name("ModLoader.RootPlugin")));
        assert!(!markers.is_root_plugin(&TypeReference::parse_full_name("ModLoader.RootPlugin`1")));
        assert!(markers.is_internal_plugin(&TypeReference::parse_full_name("ModLoader.InternalPlugin`1")));
        assert!(!markers.is_internal_plugin(&TypeReference::parse_full_name("ModLoader.InternalPlugin`2")));
    }

    struct MapResolver(HashMap<String, Arc<dyn TypeCatalog>>);

    impl AssemblyResolver for MapResolver {
        fn resolve(&self, assembly_name: &str) -> Option<Arc<dyn TypeCatalog>> {
            self.0.get(assembly_name).cloned()
        }
    }

    #[test]
    fn base_chain_crosses_assemblies() {
        let mut shared = RuntimeCatalog::new("Shared");
        shared.define(
            TypeDescription {
                is_abstract: true,
                ..class("Shared", "ModBase")
            },
            foreign("ModLoader.RootPlugin"),
        );

        let mut catalog = RuntimeCatalog::new("Test").reference("Shared");
        let entry = catalog.define(
            class("Test", "Entry"),
            Some(BaseType::Foreign {
                assembly: Some("Shared".to_string()),
                reference: TypeReference::parse_full_name("Shared.ModBase"),
            }),
        );
        catalog.apply_attribute(entry, attribute(), vec![]);

        let resolver = MapResolver(HashMap::from([(
            "Shared".to_string(),
            Arc::new(shared) as Arc<dyn TypeCatalog>,
        )]));
        let markers = PluginMarkers::default();
        assert_eq!(
            find_marker(&catalog, entry, &resolver, &markers),
            Some(PluginKind::Root)
        );
        assert_eq!(find_marker(&catalog, entry, &NoResolver, &markers), None);
    }
}
