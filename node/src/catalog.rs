//! Spec catalog: declared test types, their configs, and role resolution
//!
//! Test types, config types and any other constructor parameter types live in
//! a [`SpecRegistry`], an arena of type descriptors linked to their parent by
//! index. Discovery walks that arena instead of inspecting types at runtime:
//!
//! 1. every concrete type with multi-node facts (own or inherited) is a candidate
//! 2. its inheritance chain is walked from most derived to root until a
//!    constructor parameter deriving from the config base type is found
//! 3. that config type is instantiated (parameterless constructor preferred,
//!    otherwise the first one fed with default arguments)
//! 4. the config's role members are resolved into the spec's ordered role list

use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use shared::{DiscoveryError, DiscoveryReport, RoleName, Spec, ERRORED_SKIP_REASON, MYSELF_MEMBER};

use crate::context::NodeContext;
use crate::error::CatalogError;
use crate::host::panic_message;

/// Name of the root type every multi-node config derives from
pub const CONFIG_BASE_TYPE: &str = "MultiNodeConfig";

/// Capability every multi-node config type implements
pub trait MultiNodeConfig: Send + Sync {
    /// Role-typed members in declaration order, as `(member name, role)`
    fn role_members(&self) -> Vec<(&'static str, RoleName)>;
}

/// Ordered, de-duplicated roles of a config, without the `Myself` pseudo-role
pub fn resolve_roles(config: &dyn MultiNodeConfig) -> Vec<RoleName> {
    let mut roles: Vec<RoleName> = Vec::new();
    for (member, role) in config.role_members() {
        if member == MYSELF_MEMBER || roles.contains(&role) {
            continue;
        }
        roles.push(role);
    }
    roles
}

/// Index of a type descriptor inside one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(usize);

/// Declared kind of a config constructor parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Text,
    Object,
}

/// Argument handed to a config constructor
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ArgValue {
    /// Default/zero value for a parameter kind
    pub fn default_for(kind: ParamKind) -> Self {
        match kind {
            ParamKind::Bool => ArgValue::Bool(false),
            ParamKind::Int => ArgValue::Int(0),
            ParamKind::Float => ArgValue::Float(0.0),
            ParamKind::Text => ArgValue::Text(String::new()),
            ParamKind::Object => ArgValue::Null,
        }
    }
}

pub type ConfigFactory = Arc<dyn Fn(&[ArgValue]) -> anyhow::Result<Box<dyn MultiNodeConfig>> + Send + Sync>;

pub type SpecBody = Arc<dyn Fn(NodeContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A multi-node fact declared on a test type
#[derive(Clone)]
pub struct SpecMethod {
    pub name: String,
    pub skip_reason: Option<String>,
    body: SpecBody,
}

impl SpecMethod {
    pub fn run(&self, context: NodeContext) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.body)(context)
    }
}

impl std::fmt::Debug for SpecMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecMethod")
            .field("name", &self.name)
            .field("skip_reason", &self.skip_reason)
            .finish()
    }
}

#[derive(Clone)]
struct ConfigConstructor {
    parameters: Vec<ParamKind>,
    factory: ConfigFactory,
}

#[derive(Clone)]
struct TypeDescriptor {
    name: String,
    parent: Option<TypeRef>,
    is_abstract: bool,
    /// Parameter types of each constructor, in declaration order
    constructors: Vec<Vec<TypeRef>>,
    config_constructors: Vec<ConfigConstructor>,
    methods: Vec<SpecMethod>,
}

impl TypeDescriptor {
    fn new(name: &str, parent: Option<TypeRef>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            is_abstract: false,
            constructors: Vec::new(),
            config_constructors: Vec::new(),
            methods: Vec::new(),
        }
    }
}

/// A spec resolved for execution inside a node process
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub spec: Spec,
    pub method: SpecMethod,
}

/// Arena of every type an assembly declares
#[derive(Clone)]
pub struct SpecRegistry {
    types: Vec<TypeDescriptor>,
    config_base: TypeRef,
}

impl Default for SpecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecRegistry {
    pub fn new() -> Self {
        let mut base = TypeDescriptor::new(CONFIG_BASE_TYPE, None);
        base.is_abstract = true;
        Self {
            types: vec![base],
            config_base: TypeRef(0),
        }
    }

    /// The multi-node config base type
    pub fn config_base(&self) -> TypeRef {
        self.config_base
    }

    /// Declare a test type (no parent unless `extends` is called)
    pub fn test_type(&mut self, name: &str) -> TypeBuilder<'_> {
        TypeBuilder::new(self, TypeDescriptor::new(name, None))
    }

    /// Declare a config type deriving from the config base
    pub fn config_type(&mut self, name: &str) -> TypeBuilder<'_> {
        let base = self.config_base;
        TypeBuilder::new(self, TypeDescriptor::new(name, Some(base)))
    }

    pub fn type_name(&self, ty: TypeRef) -> Option<&str> {
        self.types.get(ty.0).map(|d| d.name.as_str())
    }

    pub fn find_type(&self, name: &str) -> Option<TypeRef> {
        self.types.iter().position(|d| d.name == name).map(TypeRef)
    }

    fn descriptor(&self, ty: TypeRef) -> Result<&TypeDescriptor, CatalogError> {
        self.types
            .get(ty.0)
            .ok_or(CatalogError::InvalidTypeRef { index: ty.0 })
    }

    /// `ty` followed by its ancestors, most derived first
    fn ancestry(&self, ty: TypeRef) -> Result<Vec<TypeRef>, CatalogError> {
        let mut chain = vec![ty];
        let mut current = self.descriptor(ty)?.parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.descriptor(parent)?.parent;
        }
        Ok(chain)
    }

    /// Whether `ty` strictly derives from `base`
    pub fn is_subtype_of(&self, ty: TypeRef, base: TypeRef) -> Result<bool, CatalogError> {
        Ok(self.ancestry(ty)?.into_iter().skip(1).any(|ancestor| ancestor == base))
    }

    /// First constructor parameter deriving from the config base, searching
    /// from the most derived type towards the root
    pub fn find_config_type(&self, test_type: TypeRef) -> Result<TypeRef, CatalogError> {
        for ty in self.ancestry(test_type)? {
            for constructor in &self.descriptor(ty)?.constructors {
                for parameter in constructor {
                    if self.is_subtype_of(*parameter, self.config_base)? {
                        return Ok(*parameter);
                    }
                }
            }
        }

        Err(CatalogError::ConfigurationNotFound {
            type_name: self.descriptor(test_type)?.name.clone(),
        })
    }

    /// Construct a config, preferring its parameterless constructor
    pub fn instantiate_config(&self, config_type: TypeRef) -> Result<Box<dyn MultiNodeConfig>, CatalogError> {
        let descriptor = self.descriptor(config_type)?;
        let construction_error = |message: String| CatalogError::ConfigurationConstruction {
            config_type: descriptor.name.clone(),
            message,
        };

        let constructor = descriptor
            .config_constructors
            .iter()
            .find(|c| c.parameters.is_empty())
            .or_else(|| descriptor.config_constructors.first())
            .ok_or_else(|| construction_error("no accessible constructor".to_string()))?;

        let arguments: Vec<ArgValue> = constructor
            .parameters
            .iter()
            .map(|kind| ArgValue::default_for(*kind))
            .collect();

        match catch_unwind(AssertUnwindSafe(|| (constructor.factory)(&arguments))) {
            Ok(Ok(config)) => Ok(config),
            Ok(Err(error)) => Err(construction_error(format!("{error:#}"))),
            Err(panic) => Err(construction_error(panic_message(&*panic))),
        }
    }

    /// Multi-node facts of a type, own declarations shadowing inherited ones
    fn spec_methods(&self, ty: TypeRef) -> Result<Vec<SpecMethod>, CatalogError> {
        let mut methods: Vec<SpecMethod> = Vec::new();
        for ancestor in self.ancestry(ty)? {
            for method in &self.descriptor(ancestor)?.methods {
                if !methods.iter().any(|m| m.name == method.name) {
                    methods.push(method.clone());
                }
            }
        }
        Ok(methods)
    }

    /// Enumerate every declared multi-node spec with its roles
    pub fn discover(&self, assembly: &str) -> DiscoveryReport {
        let mut report = DiscoveryReport {
            assembly: assembly.to_string(),
            ..DiscoveryReport::default()
        };

        for (index, descriptor) in self.types.iter().enumerate() {
            if descriptor.is_abstract {
                continue;
            }
            let ty = TypeRef(index);

            let methods = match self.spec_methods(ty) {
                Ok(methods) => methods,
                Err(error) => {
                    report.errors.push(discovery_error(&descriptor.name, None, &error));
                    continue;
                }
            };
            if methods.is_empty() {
                continue;
            }

            let config_type = match self.find_config_type(ty) {
                Ok(config_type) => config_type,
                Err(error) => {
                    for method in &methods {
                        report
                            .errors
                            .push(discovery_error(&descriptor.name, Some(&method.name), &error));
                    }
                    continue;
                }
            };

            match self.instantiate_config(config_type) {
                Ok(config) => {
                    let roles = resolve_roles(config.as_ref());
                    for method in methods {
                        let spec = Spec::new(assembly, &descriptor.name, &method.name, roles.clone());
                        report.specs.push(match method.skip_reason {
                            Some(reason) => spec.with_skip_reason(reason),
                            None => spec,
                        });
                    }
                }
                Err(error) => {
                    for method in methods {
                        report
                            .errors
                            .push(discovery_error(&descriptor.name, Some(&method.name), &error));
                        report.specs.push(
                            Spec::new(assembly, &descriptor.name, &method.name, Vec::new())
                                .with_skip_reason(ERRORED_SKIP_REASON),
                        );
                    }
                }
            }
        }

        report
    }

    /// Resolve one spec for execution on a node
    pub fn resolve(&self, assembly: &str, type_name: &str, method_name: &str) -> Result<ResolvedSpec, CatalogError> {
        let not_found = || CatalogError::SpecNotFound {
            type_name: type_name.to_string(),
            method_name: method_name.to_string(),
        };

        let ty = self
            .types
            .iter()
            .position(|d| !d.is_abstract && d.name == type_name)
            .map(TypeRef)
            .ok_or_else(not_found)?;
        let method = self
            .spec_methods(ty)?
            .into_iter()
            .find(|m| m.name == method_name)
            .ok_or_else(not_found)?;

        let config = self.instantiate_config(self.find_config_type(ty)?)?;
        let mut spec = Spec::new(assembly, type_name, method_name, resolve_roles(config.as_ref()));
        if let Some(reason) = &method.skip_reason {
            spec = spec.with_skip_reason(reason.clone());
        }

        Ok(ResolvedSpec { spec, method })
    }
}

fn discovery_error(type_name: &str, method_name: Option<&str>, error: &CatalogError) -> DiscoveryError {
    DiscoveryError {
        type_name: type_name.to_string(),
        method_name: method_name.map(str::to_string),
        kind: error.kind(),
        message: error.to_string(),
    }
}

/// Fluent declaration of one type; `build` adds it to the registry
pub struct TypeBuilder<'a> {
    registry: &'a mut SpecRegistry,
    descriptor: TypeDescriptor,
}

impl<'a> TypeBuilder<'a> {
    fn new(registry: &'a mut SpecRegistry, descriptor: TypeDescriptor) -> Self {
        Self { registry, descriptor }
    }

    pub fn extends(mut self, parent: TypeRef) -> Self {
        self.descriptor.parent = Some(parent);
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.descriptor.is_abstract = true;
        self
    }

    /// A constructor taking parameters of the given types
    pub fn constructor(mut self, parameters: impl IntoIterator<Item = TypeRef>) -> Self {
        self.descriptor.constructors.push(parameters.into_iter().collect());
        self
    }

    /// A config constructor; `factory` receives one argument per parameter
    pub fn config_constructor<F>(mut self, parameters: Vec<ParamKind>, factory: F) -> Self
    where
        F: Fn(&[ArgValue]) -> anyhow::Result<Box<dyn MultiNodeConfig>> + Send + Sync + 'static,
    {
        self.descriptor.config_constructors.push(ConfigConstructor {
            parameters,
            factory: Arc::new(factory),
        });
        self
    }

    pub fn multi_node_fact<F, Fut>(self, name: &str, body: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.declare(name, None, body)
    }

    pub fn skipped_fact<F, Fut>(self, name: &str, reason: &str, body: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.declare(name, Some(reason.to_string()), body)
    }

    fn declare<F, Fut>(mut self, name: &str, skip_reason: Option<String>, body: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: SpecBody = Arc::new(move |context| Box::pin(body(context)));
        self.descriptor.methods.push(SpecMethod {
            name: name.to_string(),
            skip_reason,
            body,
        });
        self
    }

    pub fn build(self) -> TypeRef {
        self.registry.types.push(self.descriptor);
        TypeRef(self.registry.types.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::DiscoveryErrorKind;

    struct RolesConfig {
        members: Vec<(&'static str, RoleName)>,
    }

    impl MultiNodeConfig for RolesConfig {
        fn role_members(&self) -> Vec<(&'static str, RoleName)> {
            self.members.clone()
        }
    }

    fn boxed(members: Vec<(&'static str, &str)>) -> Box<dyn MultiNodeConfig> {
        Box::new(RolesConfig {
            members: members.into_iter().map(|(m, r)| (m, RoleName::new(r))).collect(),
        })
    }

    fn two_role_config(registry: &mut SpecRegistry, name: &str) -> TypeRef {
        registry
            .config_type(name)
            .config_constructor(vec![], |_| Ok(boxed(vec![("First", "first"), ("Second", "second")])))
            .build()
    }

    async fn pass(_context: NodeContext) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_resolve_roles_drops_myself_and_duplicates() {
        let config = boxed(vec![
            ("Myself", "first"),
            ("First", "first"),
            ("Second", "second"),
            ("Alias", "first"),
            ("Third", "third"),
        ]);

        let roles = resolve_roles(config.as_ref());
        let names: Vec<&str> = roles.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_node_tests_match_declared_roles() {
        let mut registry = SpecRegistry::new();
        let config = registry
            .config_type("ThreeRoles")
            .config_constructor(vec![], |_| {
                Ok(boxed(vec![("A", "alpha"), ("B", "beta"), ("Again", "alpha"), ("C", "gamma")]))
            })
            .build();
        registry
            .test_type("ClusterTests")
            .constructor([config])
            .multi_node_fact("Forms", pass)
            .build();

        let report = registry.discover("asm");
        let nodes = report.specs[0].node_tests();

        assert_eq!(nodes.len(), 3);
        for (position, node) in nodes.iter().enumerate() {
            assert_eq!(node.index, position as u32 + 1);
        }
        let names: Vec<&str> = nodes.iter().map(|n| n.role.name()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_config_found_three_levels_up() {
        let mut registry = SpecRegistry::new();
        let config = two_role_config(&mut registry, "DeepConfig");
        let unrelated = registry.test_type("Logger").build();

        let root = registry.test_type("SpecBase").abstract_type().constructor([unrelated, config]).build();
        let middle = registry.test_type("ClusterSpecBase").abstract_type().extends(root).build();
        let lower = registry
            .test_type("ShardingSpecBase")
            .abstract_type()
            .extends(middle)
            .constructor([unrelated])
            .build();
        let concrete = registry
            .test_type("ShardingSpec")
            .extends(lower)
            .multi_node_fact("Rebalances", pass)
            .build();

        assert_eq!(registry.find_config_type(concrete), Ok(config));

        let report = registry.discover("asm");
        assert!(report.errors.is_empty());
        assert_eq!(report.specs.len(), 1);
        assert_eq!(report.specs[0].type_name, "ShardingSpec");
        assert_eq!(report.specs[0].roles.len(), 2);
    }

    #[test]
    fn test_most_derived_constructor_wins() {
        let mut registry = SpecRegistry::new();
        let base_config = two_role_config(&mut registry, "BaseConfig");
        let derived_config = registry
            .config_type("DerivedConfig")
            .extends(base_config)
            .config_constructor(vec![], |_| Ok(boxed(vec![("Solo", "solo")])))
            .build();

        let base = registry.test_type("Base").abstract_type().constructor([base_config]).build();
        let concrete = registry
            .test_type("Derived")
            .extends(base)
            .constructor([derived_config])
            .multi_node_fact("Runs", pass)
            .build();

        assert_eq!(registry.find_config_type(concrete), Ok(derived_config));
        assert!(registry.is_subtype_of(derived_config, registry.config_base()).unwrap());
    }

    #[test]
    fn test_missing_config_is_a_typed_error_and_spec_is_excluded() {
        let mut registry = SpecRegistry::new();
        registry
            .test_type("NoConfigSpec")
            .multi_node_fact("Orphan", pass)
            .build();

        let report = registry.discover("asm");
        assert!(report.specs.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, DiscoveryErrorKind::ConfigurationNotFound);
        assert_eq!(report.errors[0].method_name.as_deref(), Some("Orphan"));
    }

    #[test]
    fn test_failing_config_marks_spec_errored_and_discovery_continues() {
        let mut registry = SpecRegistry::new();
        let bad = registry
            .config_type("BadConfig")
            .config_constructor(vec![], |_| Err(anyhow::anyhow!("cannot resolve seed nodes")))
            .build();
        let panicking = registry
            .config_type("PanickingConfig")
            .config_constructor(vec![], |_| panic!("config exploded"))
            .build();
        let good = two_role_config(&mut registry, "GoodConfig");

        registry.test_type("BadSpec").constructor([bad]).multi_node_fact("Bad", pass).build();
        registry
            .test_type("PanicSpec")
            .constructor([panicking])
            .multi_node_fact("Panics", pass)
            .build();
        registry.test_type("GoodSpec").constructor([good]).multi_node_fact("Good", pass).build();

        let report = registry.discover("asm");
        assert_eq!(report.specs.len(), 3);

        let bad_spec = report.specs.iter().find(|s| s.type_name == "BadSpec").unwrap();
        assert!(bad_spec.is_errored());
        assert!(bad_spec.roles.is_empty());

        let panic_spec = report.specs.iter().find(|s| s.type_name == "PanicSpec").unwrap();
        assert!(panic_spec.is_errored());

        let good_spec = report.specs.iter().find(|s| s.type_name == "GoodSpec").unwrap();
        assert!(!good_spec.is_skipped());
        assert_eq!(good_spec.roles.len(), 2);

        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.kind == DiscoveryErrorKind::ConfigurationConstruction));
        assert!(report.errors.iter().any(|e| e.message.contains("cannot resolve seed nodes")));
        assert!(report.errors.iter().any(|e| e.message.contains("config exploded")));
    }

    #[test]
    fn test_parameterless_constructor_preferred_then_defaults() {
        let mut registry = SpecRegistry::new();
        let with_default = registry
            .config_type("PreferParameterless")
            .config_constructor(vec![ParamKind::Int], |_| Err(anyhow::anyhow!("should not be used")))
            .config_constructor(vec![], |_| Ok(boxed(vec![("A", "a")])))
            .build();
        let defaults_only = registry
            .config_type("DefaultsOnly")
            .config_constructor(
                vec![ParamKind::Int, ParamKind::Text, ParamKind::Bool, ParamKind::Object],
                |args| {
                    anyhow::ensure!(
                        args == [
                            ArgValue::Int(0),
                            ArgValue::Text(String::new()),
                            ArgValue::Bool(false),
                            ArgValue::Null
                        ],
                        "unexpected arguments {args:?}"
                    );
                    Ok(boxed(vec![("B", "b")]))
                },
            )
            .build();

        assert!(registry.instantiate_config(with_default).is_ok());
        assert!(registry.instantiate_config(defaults_only).is_ok());
    }

    #[test]
    fn test_abstract_types_are_not_discovered_but_methods_are_inherited() {
        let mut registry = SpecRegistry::new();
        let config = two_role_config(&mut registry, "Config");
        let base = registry
            .test_type("AbstractSpec")
            .abstract_type()
            .constructor([config])
            .multi_node_fact("Shared", pass)
            .skipped_fact("NotYet", "flaky on CI", pass)
            .build();
        registry
            .test_type("ConcreteSpec")
            .extends(base)
            .multi_node_fact("Own", pass)
            .build();

        let report = registry.discover("asm");
        let mut names: Vec<String> = report.specs.iter().map(|s| s.display_name()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["ConcreteSpec.NotYet", "ConcreteSpec.Own", "ConcreteSpec.Shared"]
        );

        let skipped = report.specs.iter().find(|s| s.method_name == "NotYet").unwrap();
        assert_eq!(skipped.skip_reason.as_deref(), Some("flaky on CI"));
        assert_eq!(skipped.roles.len(), 2);
    }

    #[test]
    fn test_resolve_for_execution() {
        let mut registry = SpecRegistry::new();
        let config = two_role_config(&mut registry, "Config");
        registry.test_type("Spec").constructor([config]).multi_node_fact("Runs", pass).build();

        let resolved = registry.resolve("asm", "Spec", "Runs").unwrap();
        assert_eq!(resolved.spec.display_name(), "Spec.Runs");
        assert_eq!(resolved.method.name, "Runs");

        assert!(matches!(
            registry.resolve("asm", "Spec", "Missing"),
            Err(CatalogError::SpecNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve("asm", "Config", "Runs"),
            Err(CatalogError::SpecNotFound { .. })
        ));
    }
}
