//! Capability descriptors and the registry the host supplies them through.
//!
//! A capability describes one class of collaborative behavior: the default value of
//! a new element's data cell, how to render the element when its data changes, and
//! optional hooks for presence, mounting and validation. Descriptors are validated
//! when they are built, so the engine never has to guess at their shape.
//!
//! ```
//! use elemsync::{Capability, CapabilityRegistry};
//! use serde_json::json;
//!
//! let toggle = Capability::builder("can-toggle")
//!     .default_data(json!(false))
//!     .update_element(|binding| {
//!         let _on = binding.data();
//!     })
//!     .build()?;
//!
//! let registry = CapabilityRegistry::new();
//! registry.register(toggle);
//! assert!(registry.contains("can-toggle"));
//!
//! // Leaving out a required field fails loudly.
//! assert!(Capability::builder("can-move").default_data(json!({})).build().is_err());
//! # Ok::<(), elemsync::Error>(())
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, binding::BindingHandle};

mod errors;
pub use errors::CapabilityError;

mod id;
pub use id::{CapabilityTag, ElementId, ElementKey};

/// Callback invoked with the binding of the element it concerns.
pub type ElementCallback = Arc<dyn Fn(&BindingHandle) + Send + Sync>;

/// Predicate deciding whether an element may carry a capability.
pub type ElementPredicate = Arc<dyn Fn(&ElementInfo) -> bool + Send + Sync>;

/// Factory computing an element's default data from the element itself.
pub type DefaultFactory = Arc<dyn Fn(&ElementInfo) -> Value + Send + Sync>;

/// Host-side description of an element, as far as the engine needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Explicit identifier from the markup, if any
    pub id: Option<String>,
    /// Serialized element content, used to derive an id when none is given
    pub content: String,
    /// Element attributes, available to default factories and predicates
    pub attributes: BTreeMap<String, String>,
}

impl ElementInfo {
    /// An element carrying an explicit id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// An element without an id whose content identifies it.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Adds an attribute, builder style.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// The default value of a new data cell.
#[derive(Clone)]
pub enum DefaultData {
    /// The same value for every element
    Value(Value),
    /// A value computed from the element
    Factory(DefaultFactory),
}

impl DefaultData {
    /// Resolve the default for one element.
    pub fn resolve(&self, element: &ElementInfo) -> Value {
        match self {
            DefaultData::Value(value) => value.clone(),
            DefaultData::Factory(factory) => factory(element),
        }
    }
}

impl fmt::Debug for DefaultData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultData::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultData::Factory(_) => f.write_str("Factory(<fn>)"),
        }
    }
}

/// A validated capability descriptor.
#[derive(Clone)]
pub struct Capability {
    tag: CapabilityTag,
    default_data: DefaultData,
    update_element: ElementCallback,
    update_element_awareness: Option<ElementCallback>,
    on_mount: Option<ElementCallback>,
    on_unmount: Option<ElementCallback>,
    is_valid_element: Option<ElementPredicate>,
}

impl Capability {
    /// Start building a descriptor for `tag`.
    pub fn builder(tag: impl Into<CapabilityTag>) -> CapabilityBuilder {
        CapabilityBuilder::new(tag)
    }

    pub fn tag(&self) -> &CapabilityTag {
        &self.tag
    }

    /// Default data for a new cell of `element`.
    pub fn default_for(&self, element: &ElementInfo) -> Value {
        self.default_data.resolve(element)
    }

    /// Whether `element` may carry this capability.
    pub fn accepts(&self, element: &ElementInfo) -> bool {
        self.is_valid_element
            .as_ref()
            .is_none_or(|predicate| predicate(element))
    }

    pub(crate) fn update_element(&self, binding: &BindingHandle) {
        (self.update_element)(binding)
    }

    pub(crate) fn update_element_awareness(&self, binding: &BindingHandle) {
        if let Some(callback) = &self.update_element_awareness {
            callback(binding)
        }
    }

    pub(crate) fn on_mount(&self, binding: &BindingHandle) {
        if let Some(callback) = &self.on_mount {
            callback(binding)
        }
    }

    pub(crate) fn on_unmount(&self, binding: &BindingHandle) {
        if let Some(callback) = &self.on_unmount {
            callback(binding)
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("tag", &self.tag)
            .field("default_data", &self.default_data)
            .field("update_element_awareness", &self.update_element_awareness.is_some())
            .field("on_mount", &self.on_mount.is_some())
            .field("on_unmount", &self.on_unmount.is_some())
            .field("is_valid_element", &self.is_valid_element.is_some())
            .finish()
    }
}

/// Builder for [`Capability`].
///
/// `default_data` (or `default_factory`) and `update_element` are required.
pub struct CapabilityBuilder {
    tag: CapabilityTag,
    default_data: Option<DefaultData>,
    update_element: Option<ElementCallback>,
    update_element_awareness: Option<ElementCallback>,
    on_mount: Option<ElementCallback>,
    on_unmount: Option<ElementCallback>,
    is_valid_element: Option<ElementPredicate>,
}

impl CapabilityBuilder {
    pub fn new(tag: impl Into<CapabilityTag>) -> Self {
        Self {
            tag: tag.into(),
            default_data: None,
            update_element: None,
            update_element_awareness: None,
            on_mount: None,
            on_unmount: None,
            is_valid_element: None,
        }
    }

    pub fn default_data(mut self, value: Value) -> Self {
        self.default_data = Some(DefaultData::Value(value));
        self
    }

    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ElementInfo) -> Value + Send + Sync + 'static,
    {
        self.default_data = Some(DefaultData::Factory(Arc::new(factory)));
        self
    }

    pub fn update_element<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BindingHandle) + Send + Sync + 'static,
    {
        self.update_element = Some(Arc::new(callback));
        self
    }

    pub fn update_element_awareness<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BindingHandle) + Send + Sync + 'static,
    {
        self.update_element_awareness = Some(Arc::new(callback));
        self
    }

    pub fn on_mount<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BindingHandle) + Send + Sync + 'static,
    {
        self.on_mount = Some(Arc::new(callback));
        self
    }

    pub fn on_unmount<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BindingHandle) + Send + Sync + 'static,
    {
        self.on_unmount = Some(Arc::new(callback));
        self
    }

    pub fn is_valid_element<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ElementInfo) -> bool + Send + Sync + 'static,
    {
        self.is_valid_element = Some(Arc::new(predicate));
        self
    }

    /// Validate and produce the descriptor.
    pub fn build(self) -> Result<Capability> {
        if self.tag.is_empty() {
            return Err(CapabilityError::EmptyTag.into());
        }
        let default_data = self.default_data.ok_or_else(|| CapabilityError::Incomplete {
            tag: self.tag.to_string(),
            missing: "default_data",
        })?;
        let update_element = self
            .update_element
            .ok_or_else(|| CapabilityError::Incomplete {
                tag: self.tag.to_string(),
                missing: "update_element",
            })?;

        Ok(Capability {
            tag: self.tag,
            default_data,
            update_element,
            update_element_awareness: self.update_element_awareness,
            on_mount: self.on_mount,
            on_unmount: self.on_unmount,
            is_valid_element: self.is_valid_element,
        })
    }
}

/// Table of capability descriptors keyed by tag.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<CapabilityTag, Arc<Capability>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one for the same tag.
    pub fn register(&self, capability: Capability) {
        let tag = capability.tag().clone();
        let previous = self
            .capabilities
            .write()
            .unwrap()
            .insert(tag.clone(), Arc::new(capability));
        if previous.is_some() {
            tracing::info!(%tag, "replaced capability descriptor");
        }
    }

    /// Look up the descriptor for `tag`.
    pub fn get(&self, tag: impl AsRef<str>) -> Result<Arc<Capability>> {
        let tag = tag.as_ref();
        self.capabilities
            .read()
            .unwrap()
            .get(&CapabilityTag::from(tag))
            .cloned()
            .ok_or_else(|| {
                CapabilityError::NotRegistered {
                    tag: tag.to_string(),
                }
                .into()
            })
    }

    pub fn contains(&self, tag: impl AsRef<str>) -> bool {
        self.get(tag).is_ok()
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<CapabilityTag> {
        let mut tags: Vec<_> = self.capabilities.read().unwrap().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl FromIterator<Capability> for CapabilityRegistry {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let registry = Self::new();
        for capability in iter {
            registry.register(capability);
        }
        registry
    }
}
