//! Object type configuration.
//!
//! The type configuration is supplied by whoever opens an index. It assigns
//! every indexable object type a stable numeric id, and the index files refer
//! to types only through those ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::grid::Level;

/// Numeric type id as stored in index headers.
pub type TypeId = u16;

/// Level used for types that do not declare their own index level.
pub const DEFAULT_INDEX_LEVEL: u32 = 14;

/// A single object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: String,

    /// Internal types are never served from the area index
    #[serde(default)]
    pub internal: bool,

    /// Grid level the builder indexes this type at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_level: Option<u32>,
}

impl TypeInfo {
    pub fn new(id: TypeId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            internal: false,
            index_level: None,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.index_level = Some(level);
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn level(&self) -> u32 {
        self.index_level.unwrap_or(DEFAULT_INDEX_LEVEL)
    }
}

/// Immutable set of type descriptors, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TypeConfigFile", into = "TypeConfigFile")]
pub struct TypeConfig {
    types: Vec<TypeInfo>,
}

#[derive(Serialize, Deserialize)]
struct TypeConfigFile {
    #[serde(default)]
    types: Vec<TypeInfo>,
}

impl TryFrom<TypeConfigFile> for TypeConfig {
    type Error = IndexError;

    fn try_from(file: TypeConfigFile) -> Result<Self> {
        TypeConfig::new(file.types)
    }
}

impl From<TypeConfig> for TypeConfigFile {
    fn from(config: TypeConfig) -> Self {
        TypeConfigFile {
            types: config.types,
        }
    }
}

impl TypeConfig {
    /// Build a configuration, rejecting duplicate ids or names and index
    /// levels outside the grid.
    pub fn new(mut types: Vec<TypeInfo>) -> Result<Self> {
        types.sort_by_key(|t| t.id);

        for pair in types.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(IndexError::Config(format!(
                    "duplicate type id {}",
                    pair[0].id
                )));
            }
        }

        let mut names = BTreeSet::new();
        for t in &types {
            if t.name.is_empty() {
                return Err(IndexError::Config(format!("type {} has no name", t.id)));
            }
            if !names.insert(t.name.as_str()) {
                return Err(IndexError::Config(format!("duplicate type name '{}'", t.name)));
            }
            if Level::new(t.level()).is_err() {
                return Err(IndexError::Config(format!(
                    "type '{}' has index level {}, maximum is {}",
                    t.name,
                    t.level(),
                    Level::MAX
                )));
            }
        }

        Ok(Self { types })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| IndexError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.types[i])
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TypeInfo> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn types(&self) -> &[TypeInfo] {
        &self.types
    }

    /// All types that may be served from an area index
    pub fn indexable_types(&self) -> TypeInfoSet {
        self.types
            .iter()
            .filter(|t| !t.internal)
            .map(|t| t.id)
            .collect()
    }

    /// Resolve a list of type names into a set.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Result<TypeInfoSet> {
        names
            .iter()
            .map(|name| {
                self.get_by_name(name.as_ref())
                    .map(|t| t.id)
                    .ok_or_else(|| IndexError::Config(format!("unknown type '{}'", name.as_ref())))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Ordered set of type ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfoSet {
    ids: BTreeSet<TypeId>,
}

impl TypeInfoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: TypeId) {
        self.ids.insert(id);
    }

    pub fn remove(&mut self, id: TypeId) {
        self.ids.remove(&id);
    }

    pub fn is_set(&self, id: TypeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.ids.iter().copied()
    }

    /// Types in `self` that are missing from `other`
    pub fn difference(&self, other: &TypeInfoSet) -> TypeInfoSet {
        self.ids.difference(&other.ids).copied().collect()
    }

    /// Type names for display, unknown ids rendered numerically
    pub fn names(&self, config: &TypeConfig) -> Vec<String> {
        self.iter()
            .map(|id| match config.get(id) {
                Some(t) => t.name.clone(),
                None => id.to_string(),
            })
            .collect()
    }
}

impl FromIterator<TypeId> for TypeInfoSet {
    fn from_iter<I: IntoIterator<Item = TypeId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<TypeId> for TypeInfoSet {
    fn extend<I: IntoIterator<Item = TypeId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}
