use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Implementation status of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Module is fully implemented
    Implemented,

    /// Module exists as a placeholder only
    Placeholder,

    /// Module is in an error state
    Error,
}

impl ModuleStatus {
    /// All statuses, in display order
    pub const ALL: [ModuleStatus; 3] = [
        ModuleStatus::Implemented,
        ModuleStatus::Placeholder,
        ModuleStatus::Error,
    ];

    /// Lowercase wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Implemented => "implemented",
            ModuleStatus::Placeholder => "placeholder",
            ModuleStatus::Error => "error",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implemented" => Ok(ModuleStatus::Implemented),
            "placeholder" => Ok(ModuleStatus::Placeholder),
            "error" => Ok(ModuleStatus::Error),
            other => Err(format!("Invalid status: {}", other)),
        }
    }
}

/// Value object: Module name, the only key of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(pub String);

impl ModuleName {
    /// Create a module name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ModuleName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A single module definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    /// Unique module name; immutable once created
    pub name: ModuleName,

    /// Human readable description
    pub description: String,

    /// Current implementation status
    pub status: ModuleStatus,

    /// Optional version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Ordered input names
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Ordered output names
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Names of the modules this one depends on, without duplicates
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub dependencies: Vec<ModuleName>,

    /// Implementation type or path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
}

impl Module {
    /// Create a module with no inputs, outputs or dependencies
    pub fn new(
        name: impl Into<ModuleName>,
        description: impl Into<String>,
        status: ModuleStatus,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status,
            version: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            implementation: None,
        }
    }

    /// Set the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the inputs
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the outputs
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the dependencies, dropping duplicates while keeping first occurrence order
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleName>,
    {
        self.dependencies = dedup_names(dependencies.into_iter().map(Into::into));
        self
    }

    /// Set the implementation reference
    pub fn with_implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }

    /// Whether this module lists `name` as a dependency
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|dep| dep.as_str() == name)
    }

    /// Check the module against the schema rules.
    ///
    /// A name must start with an ASCII letter and contain only ASCII letters,
    /// digits and underscores. The description must not be blank.
    pub fn validate(&self) -> Result<(), ModuleValidationError> {
        let name = self.name.as_str();
        let mut chars = name.chars();
        match chars.next() {
            None => {
                return Err(ModuleValidationError::new("name", "Module name cannot be empty"));
            }
            Some(first) if !first.is_ascii_alphabetic() => {
                return Err(ModuleValidationError::new(
                    "name",
                    format!("Module name '{}' must start with a letter", name),
                ));
            }
            _ => {}
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ModuleValidationError::new(
                "name",
                format!(
                    "Module name '{}' may contain only letters, numbers, and underscores",
                    name
                ),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(ModuleValidationError::new(
                "description",
                "Description cannot be empty",
            ));
        }
        Ok(())
    }
}

fn dedup_names(names: impl IntoIterator<Item = ModuleName>) -> Vec<ModuleName> {
    let mut unique: Vec<ModuleName> = Vec::new();
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> Result<Vec<ModuleName>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<ModuleName>::deserialize(deserializer).map(dedup_names)
}

/// Schema violation found while validating a module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Validation error for {field}: {message}")]
pub struct ModuleValidationError {
    /// Offending field
    pub field: &'static str,
    /// What is wrong with it
    pub message: String,
}

impl ModuleValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Partial update of a module. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModulePatch {
    /// New description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// New status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ModuleStatus>,

    /// New version; `Some(None)` clears it
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub version: Option<Option<String>>,

    /// New inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,

    /// New outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    /// New dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<ModuleName>>,

    /// New implementation reference; `Some(None)` clears it
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub implementation: Option<Option<String>>,
}

// A present key (even `null`) becomes `Some(..)`; a missing key stays `None` via `default`.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ModulePatch {
    /// Patch that only changes the status
    pub fn status(status: ModuleStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that only changes the description
    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch on top of `module`, returning the result
    pub fn apply(&self, module: &Module) -> Module {
        let mut updated = module.clone();
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(status) = self.status {
            updated.status = status;
        }
        if let Some(version) = &self.version {
            updated.version = version.clone();
        }
        if let Some(inputs) = &self.inputs {
            updated.inputs = inputs.clone();
        }
        if let Some(outputs) = &self.outputs {
            updated.outputs = outputs.clone();
        }
        if let Some(dependencies) = &self.dependencies {
            updated.dependencies = dedup_names(dependencies.iter().cloned());
        }
        if let Some(implementation) = &self.implementation {
            updated.implementation = implementation.clone();
        }
        updated
    }
}

impl From<&Module> for ModulePatch {
    /// A patch that replaces every mutable field with the values of `module`
    fn from(module: &Module) -> Self {
        Self {
            description: Some(module.description.clone()),
            status: Some(module.status),
            version: Some(module.version.clone()),
            inputs: Some(module.inputs.clone()),
            outputs: Some(module.outputs.clone()),
            dependencies: Some(module.dependencies.clone()),
            implementation: Some(module.implementation.clone()),
        }
    }
}

/// Ordered mapping of module name to module, preserving definition order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Module>", into = "Vec<Module>")]
pub struct ModuleSet {
    order: Vec<ModuleName>,
    modules: HashMap<ModuleName, Module>,
}

impl ModuleSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a module by name
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Whether a module with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Position of a module in definition order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n.as_str() == name)
    }

    /// Iterate modules in definition order
    pub fn iter(&self) -> impl Iterator<Item = &Module> + '_ {
        self.order.iter().filter_map(move |name| self.modules.get(name))
    }

    /// Iterate names in definition order
    pub fn names(&self) -> impl Iterator<Item = &ModuleName> + '_ {
        self.order.iter()
    }

    /// Insert a module. A new name is appended; an existing one is replaced in place.
    pub fn insert(&mut self, module: Module) -> Option<Module> {
        if !self.modules.contains_key(&module.name) {
            self.order.push(module.name.clone());
        }
        self.modules.insert(module.name.clone(), module)
    }

    /// Insert a module at `index` (clamped to the end). Replaces in place if it already exists.
    pub fn insert_at(&mut self, index: usize, module: Module) -> Option<Module> {
        if !self.modules.contains_key(&module.name) {
            let index = index.min(self.order.len());
            self.order.insert(index, module.name.clone());
        }
        self.modules.insert(module.name.clone(), module)
    }

    /// Remove a module, returning its former position and value
    pub fn remove(&mut self, name: &str) -> Option<(usize, Module)> {
        let module = self.modules.remove(name)?;
        let index = self.position(name).unwrap_or(self.order.len());
        if index < self.order.len() {
            self.order.remove(index);
        }
        Some((index, module))
    }

    /// Whether both sets hold the same modules, ignoring definition order
    pub fn same_modules(&self, other: &ModuleSet) -> bool {
        self.modules == other.modules
    }

    /// Consume the set, yielding modules in definition order
    pub fn into_modules(mut self) -> Vec<Module> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|name| self.modules.remove(&name))
            .collect()
    }
}

impl From<Vec<Module>> for ModuleSet {
    fn from(modules: Vec<Module>) -> Self {
        modules.into_iter().collect()
    }
}

impl From<ModuleSet> for Vec<Module> {
    fn from(set: ModuleSet) -> Self {
        set.into_modules()
    }
}

impl FromIterator<Module> for ModuleSet {
    fn from_iter<T: IntoIterator<Item = Module>>(iter: T) -> Self {
        let mut set = ModuleSet::new();
        for module in iter {
            set.insert(module);
        }
        set
    }
}
