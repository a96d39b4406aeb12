//! Ordered in-memory store of the layers the user has added.
//!
//! Insertion order defines the default stacking; explicit moves relocate one
//! entry and keep the relative order of every other entry. Every mutation is
//! broadcast as a [`StoreEvent`] so the sidebar can redraw and the caller can
//! re-sequence the rendering surface.

use std::fmt;

use super::error::LayerError;
use super::filter::FieldFilter;
use super::layer::{LayerDescriptor, LayerName, StyleKind, TableRef};

/// Change notification emitted after a successful store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A layer was appended at `index`.
    Added { name: LayerName, index: usize },
    /// A layer left the list.
    Removed { name: LayerName },
    /// A layer was relocated; other entries keep their relative order.
    Moved { name: LayerName, from: usize, to: usize },
    /// The layer was shown or hidden.
    VisibilityChanged { name: LayerName, visible: bool },
    /// The layer is drawn with a new style.
    Restyled { name: LayerName, style: StyleKind },
    /// The user's attribute selection changed.
    FilterChanged { name: LayerName },
}

type Listener = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Ordered collection of [`LayerDescriptor`]s with unique names.
///
/// Listeners run synchronously inside the mutation and must not call back
/// into the store.
#[derive(Default)]
pub struct LayerDescriptorStore {
    layers: Vec<LayerDescriptor>,
    listeners: Vec<Listener>,
}

impl fmt::Debug for LayerDescriptorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerDescriptorStore")
            .field("layers", &self.layers)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl LayerDescriptorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a redraw callback.
    pub fn subscribe(&mut self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&self, event: StoreEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no layer has been added.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Descriptors in stacking order, bottom-most first.
    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    /// Deep copy of the ordered list.
    pub fn snapshot(&self) -> Vec<LayerDescriptor> {
        self.layers.clone()
    }

    /// Descriptor named `name`.
    pub fn get(&self, name: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|layer| layer.name().as_ref() == name)
    }

    /// Whether a descriptor named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Index of `name` in the ordered list.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.name().as_ref() == name)
    }

    /// Name a new layer for `table` drawn as `style`.
    ///
    /// The bare `schema.table` name is used unless another descriptor already
    /// shows the same table in a different style, in which case the style is
    /// appended.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{
    ///     GeometryKind, LayerDescriptor, LayerDescriptorStore, LayerName, StyleKind, TableRef,
    /// };
    ///
    /// let wells = TableRef::parse("survey", "wells").expect("table");
    /// let mut store = LayerDescriptorStore::new();
    /// let name = store.name_for(&wells, StyleKind::Circle);
    /// assert_eq!(name.as_ref(), "survey.wells");
    /// store
    ///     .add(LayerDescriptor::new(name, wells.clone(), StyleKind::Circle, GeometryKind::Point)?)
    ///     .expect("first add");
    /// assert_eq!(store.name_for(&wells, StyleKind::Heatmap).as_ref(), "survey.wells.heatmap");
    /// assert_eq!(store.name_for(&wells, StyleKind::Circle).as_ref(), "survey.wells");
    /// # Ok::<(), dashboard::domain::LayerError>(())
    /// ```
    pub fn name_for(&self, table: &TableRef, style: StyleKind) -> LayerName {
        let bare = LayerName::for_table(table);
        match self.get(bare.as_ref()) {
            Some(existing) if existing.style() != style => {
                LayerName::for_styled_table(table, style)
            }
            _ => bare,
        }
    }

    /// Append a descriptor at the top of the stack.
    ///
    /// Fails with [`LayerError::DuplicateName`] when the name is taken; the
    /// store is left unchanged.
    pub fn add(&mut self, descriptor: LayerDescriptor) -> Result<(), LayerError> {
        if self.contains(descriptor.name().as_ref()) {
            return Err(LayerError::duplicate_name(descriptor.name().clone()));
        }
        let name = descriptor.name().clone();
        self.layers.push(descriptor);
        self.emit(StoreEvent::Added {
            name,
            index: self.layers.len() - 1,
        });
        Ok(())
    }

    /// Remove `name`. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<LayerDescriptor> {
        let index = self.position(name)?;
        let removed = self.layers.remove(index);
        self.emit(StoreEvent::Removed {
            name: removed.name().clone(),
        });
        Some(removed)
    }

    /// Relocate `name` to `index`, clamped to the list bounds.
    ///
    /// Returns the index the descriptor ended up at.
    pub fn move_to(&mut self, name: &str, index: usize) -> Result<usize, LayerError> {
        let from = self
            .position(name)
            .ok_or_else(|| LayerError::not_found(name))?;
        let descriptor = self.layers.remove(from);
        let name = descriptor.name().clone();
        let to = index.min(self.layers.len());
        self.layers.insert(to, descriptor);
        self.emit(StoreEvent::Moved { name, from, to });
        Ok(to)
    }

    /// Flip visibility of `name` and return the new value.
    pub fn toggle_visible(&mut self, name: &str) -> Result<bool, LayerError> {
        let descriptor = self.get_mut(name)?;
        let visible = !descriptor.is_visible();
        descriptor.set_visible(visible);
        let name = descriptor.name().clone();
        self.emit(StoreEvent::VisibilityChanged { name, visible });
        Ok(visible)
    }

    /// Change the style of `name`; the geometry must allow it.
    pub fn set_style(&mut self, name: &str, style: StyleKind) -> Result<(), LayerError> {
        let descriptor = self.get_mut(name)?;
        descriptor.set_style(style)?;
        let name = descriptor.name().clone();
        self.emit(StoreEvent::Restyled { name, style });
        Ok(())
    }

    /// Replace the attribute selection of `name`.
    pub fn set_filter_field(
        &mut self,
        name: &str,
        filter_field: Option<FieldFilter>,
    ) -> Result<(), LayerError> {
        let descriptor = self.get_mut(name)?;
        descriptor.set_filter_field(filter_field);
        let name = descriptor.name().clone();
        self.emit(StoreEvent::FilterChanged { name });
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut LayerDescriptor, LayerError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.name().as_ref() == name)
            .ok_or_else(|| LayerError::not_found(name))
    }
}
