//! Driven port for the interactive map widget that owns drawable layers.
//!
//! Surface calls are synchronous: the widget applies every mutation to its
//! in-memory style immediately. The only asynchronous step is a full style
//! replacement, which completes through the one-shot [`StyleLoaded`] gate.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::domain::{FilterExpression, RenderLayer, TileSource};

use super::define_port_error;

define_port_error! {
    /// Errors raised by the rendering surface.
    pub enum RenderSurfaceError {
        /// A layer referenced a source that is not registered.
        MissingSource { id: String } =>
            "source {id} is not registered",
        /// The layer id is not part of the current style.
        MissingLayer { id: String } =>
            "layer {id} is not part of the style",
        /// A layer with the same id already exists.
        DuplicateLayer { id: String } =>
            "layer {id} already exists",
        /// The source is still referenced by at least one layer.
        SourceInUse { id: String } =>
            "source {id} is still used by a layer",
        /// The surface is still loading a style and rejects mutations.
        NotReady =>
            "style is still loading",
        /// The style load was abandoned before it completed.
        StyleLoadAborted { message: String } =>
            "style load aborted: {message}",
    }
}

/// Render visibility of a single style layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    None,
}

impl Visibility {
    /// Map a descriptor flag onto the layout property value.
    pub fn from_flag(visible: bool) -> Self {
        if visible { Self::Visible } else { Self::None }
    }

    /// Whether the layer is drawn.
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Visible)
    }
}

/// Map view state captured before a style swap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// `[longitude, latitude]`.
    pub center: [f64; 2],
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0],
            zoom: 2.0,
            bearing: 0.0,
            pitch: 0.0,
        }
    }
}

/// Summary of one layer in the current style, bottom-most first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleLayerSummary {
    pub id: String,
    /// Renderer layer type, e.g. `raster`, `fill` or `line`.
    #[serde(rename = "type")]
    pub kind: String,
    pub visibility: Visibility,
}

impl StyleLayerSummary {
    /// Construct a visible summary.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            visibility: Visibility::Visible,
        }
    }

    /// Whether the layer is a raster layer.
    pub fn is_raster(&self) -> bool {
        self.kind == "raster"
    }
}

/// Sending half of a style-load gate, held by the surface.
#[derive(Debug)]
pub struct StyleLoadSignal(oneshot::Sender<()>);

impl StyleLoadSignal {
    /// Release the gate. Waiters observe success.
    pub fn finish(self) {
        // The waiter may already be gone; nothing observes the result then.
        let _ = self.0.send(());
    }
}

/// One-shot gate that completes when a new style has finished loading.
///
/// Dropping the paired [`StyleLoadSignal`] without calling
/// [`StyleLoadSignal::finish`] aborts the gate.
#[derive(Debug)]
pub struct StyleLoaded(oneshot::Receiver<()>);

impl StyleLoaded {
    /// Create a pending gate and the signal that releases it.
    pub fn pending() -> (StyleLoadSignal, Self) {
        let (tx, rx) = oneshot::channel();
        (StyleLoadSignal(tx), Self(rx))
    }

    /// Create a gate that has already been released.
    pub fn ready() -> Self {
        let (signal, gate) = Self::pending();
        signal.finish();
        gate
    }

    /// Wait until the style has loaded.
    pub async fn wait(self) -> Result<(), RenderSurfaceError> {
        self.0
            .await
            .map_err(|_| RenderSurfaceError::style_load_aborted("load signal dropped"))
    }
}

/// Port for the stateful map renderer.
///
/// Layer order is bottom-most first: later layers are drawn above earlier
/// ones.
pub trait RenderSurface: Send {
    /// Whether a source with `id` is registered.
    fn has_source(&self, id: &str) -> bool;

    /// Register a vector tile source.
    fn add_source(&mut self, source: &TileSource) -> Result<(), RenderSurfaceError>;

    /// Drop a source that no layer references any more.
    fn remove_source(&mut self, id: &str) -> Result<(), RenderSurfaceError>;

    /// Whether a layer with `id` is part of the style.
    fn has_layer(&self, id: &str) -> bool;

    /// Append a layer at the top of the stack.
    fn add_layer(&mut self, layer: &RenderLayer) -> Result<(), RenderSurfaceError>;

    /// Remove a layer from the style.
    fn remove_layer(&mut self, id: &str) -> Result<(), RenderSurfaceError>;

    /// Move `id` directly below `before`, or to the top when `before` is
    /// `None`.
    fn move_layer(&mut self, id: &str, before: Option<&str>) -> Result<(), RenderSurfaceError>;

    /// Replace the filter of an existing layer.
    fn set_filter(&mut self, id: &str, filter: &FilterExpression)
    -> Result<(), RenderSurfaceError>;

    /// Set the `visibility` layout property of an existing layer.
    fn set_visibility(
        &mut self,
        id: &str,
        visibility: Visibility,
    ) -> Result<(), RenderSurfaceError>;

    /// Current visibility of a layer, if it exists.
    fn visibility(&self, id: &str) -> Option<Visibility>;

    /// Every layer of the current style, bottom-most first.
    fn style_layers(&self) -> Vec<StyleLayerSummary>;

    /// Current camera.
    fn camera(&self) -> Camera;

    /// Jump to `camera` without animation.
    fn set_camera(&mut self, camera: Camera);

    /// Replace the whole style document, discarding every source and layer.
    ///
    /// Nothing may be added until the returned gate completes.
    fn set_style(&mut self, style_url: &str) -> StyleLoaded;

    /// Layer ids in draw order, bottom-most first.
    fn layer_ids(&self) -> Vec<String> {
        self.style_layers().into_iter().map(|layer| layer.id).collect()
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for the style-load gate.
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn finished_gate_completes() {
        let (signal, gate) = StyleLoaded::pending();
        signal.finish();
        assert_eq!(gate.wait().await, Ok(()));
    }

    #[rstest]
    #[tokio::test]
    async fn dropped_signal_aborts_the_gate() {
        let (signal, gate) = StyleLoaded::pending();
        drop(signal);
        assert!(matches!(
            gate.wait().await,
            Err(RenderSurfaceError::StyleLoadAborted { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn ready_gate_needs_no_signal() {
        assert!(StyleLoaded::ready().wait().await.is_ok());
    }

    #[test]
    fn visibility_serialises_as_layout_value() {
        assert_eq!(
            serde_json::to_value(Visibility::None).expect("serialise"),
            serde_json::json!("none")
        );
        assert_eq!(Visibility::from_flag(true), Visibility::Visible);
    }
}
