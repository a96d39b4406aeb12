//! Render-order reconciliation between the layer list and the surface.
//!
//! The target stack is the descriptor list flattened into render ids:
//! descriptor order outside, role order inside (fill under outline, casing
//! under stroke). Later ids are drawn above earlier ones.

use std::collections::HashSet;

use tracing::debug;

use super::layer::LayerDescriptor;
use super::materializer::render_ids;
use super::ports::{RenderSurface, RenderSurfaceError};

/// Keeps the surface's z-order aligned with the ordered layer list.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderOrderCoordinator;

impl RenderOrderCoordinator {
    /// Flattened render ids, bottom-most first.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{
    ///     GeometryKind, LayerDescriptor, LayerName, RenderOrderCoordinator, StyleKind, TableRef,
    /// };
    ///
    /// let roads = TableRef::parse("public", "roads").expect("table");
    /// let layer = LayerDescriptor::new(
    ///     LayerName::for_table(&roads),
    ///     roads,
    ///     StyleKind::Line,
    ///     GeometryKind::LineString,
    /// )?;
    /// assert_eq!(
    ///     RenderOrderCoordinator::flatten(&[layer]),
    ///     ["public.roads-network-outline", "public.roads-network-fill"]
    /// );
    /// # Ok::<(), dashboard::domain::LayerError>(())
    /// ```
    pub fn flatten(descriptors: &[LayerDescriptor]) -> Vec<String> {
        descriptors.iter().flat_map(render_ids).collect()
    }

    /// Re-sequence the surface so managed layers follow `descriptors`.
    ///
    /// Ids missing from the surface (layers withheld by the owner filter) are
    /// skipped. When the managed layers already appear in target order no
    /// mutation is issued. Returns the number of moves performed.
    pub fn reconcile(
        &self,
        descriptors: &[LayerDescriptor],
        surface: &mut dyn RenderSurface,
    ) -> Result<usize, RenderSurfaceError> {
        let target: Vec<String> = Self::flatten(descriptors)
            .into_iter()
            .filter(|id| surface.has_layer(id))
            .collect();
        let managed: HashSet<&str> = target.iter().map(String::as_str).collect();
        let current: Vec<String> = surface
            .layer_ids()
            .into_iter()
            .filter(|id| managed.contains(id.as_str()))
            .collect();
        if current == target {
            return Ok(0);
        }

        // Walking from the top down, each id lands directly below its
        // successor; the top-most id goes to the top of the stack.
        let mut moves = 0;
        for (index, id) in target.iter().enumerate().rev() {
            let before = target.get(index + 1).map(String::as_str);
            surface.move_layer(id, before)?;
            moves += 1;
        }
        debug!(moves, layers = target.len(), "reconciled render order");
        Ok(moves)
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for ordering and idempotence.
    use super::*;
    use crate::domain::ports::StyleLayerSummary;
    use crate::domain::{
        FilterExpression, GeometryKind, LayerDescriptorStore, LayerName, StyleKind, TableRef,
        TileTemplate, apply, materialize,
    };
    use crate::outbound::HeadlessSurface;
    use rstest::rstest;

    fn descriptor(table: &str, style: StyleKind) -> LayerDescriptor {
        let geometry = match style {
            StyleKind::Fill => GeometryKind::Polygon,
            StyleKind::Line => GeometryKind::LineString,
            _ => GeometryKind::Point,
        };
        let table = TableRef::parse("public", table).expect("table");
        LayerDescriptor::new(LayerName::for_table(&table), table, style, geometry)
            .expect("descriptor")
    }

    fn realise(descriptors: &[LayerDescriptor], surface: &mut HeadlessSurface) {
        let tiles = TileTemplate::new("/tiles/{layer}/{z}/{x}/{y}.pbf", 22);
        for layer in descriptors {
            apply(
                &materialize(layer, &FilterExpression::match_all(), &tiles),
                surface,
            )
            .expect("apply");
        }
    }

    fn managed(surface: &HeadlessSurface) -> Vec<String> {
        surface
            .layer_ids()
            .into_iter()
            .filter(|id| id.starts_with("public."))
            .collect()
    }

    #[test]
    fn moving_roads_above_parcels_puts_its_ids_first() {
        let mut store = LayerDescriptorStore::new();
        store.add(descriptor("parcels", StyleKind::Fill)).expect("add parcels");
        store.add(descriptor("roads", StyleKind::Line)).expect("add roads");
        let mut surface = HeadlessSurface::new();
        realise(&store.snapshot(), &mut surface);
        assert_eq!(
            managed(&surface),
            [
                "public.parcels-fill",
                "public.parcels-outline",
                "public.roads-network-outline",
                "public.roads-network-fill"
            ]
        );

        store.move_to("public.roads", 0).expect("move");
        RenderOrderCoordinator
            .reconcile(&store.snapshot(), &mut surface)
            .expect("reconcile");

        assert_eq!(
            managed(&surface),
            [
                "public.roads-network-outline",
                "public.roads-network-fill",
                "public.parcels-fill",
                "public.parcels-outline"
            ]
        );
    }

    #[rstest]
    #[case(&[2, 0, 1])]
    #[case(&[1, 1, 0])]
    #[case(&[0, 2, 2, 1])]
    #[case(&[])]
    fn reconcile_is_idempotent(#[case] moves_to_front: &[usize]) {
        let mut store = LayerDescriptorStore::new();
        for (table, style) in [
            ("parcels", StyleKind::Fill),
            ("roads", StyleKind::Line),
            ("wells", StyleKind::Heatmap),
        ] {
            store.add(descriptor(table, style)).expect("add");
        }
        let mut surface = HeadlessSurface::new()
            .with_base_layers(vec![StyleLayerSummary::new("streets-basemap", "raster")]);
        realise(&store.snapshot(), &mut surface);

        for index in moves_to_front {
            let name = store.snapshot()[*index].name().to_string();
            store.move_to(&name, 0).expect("move");
        }
        let descriptors = store.snapshot();
        RenderOrderCoordinator
            .reconcile(&descriptors, &mut surface)
            .expect("first reconcile");
        assert_eq!(managed(&surface), RenderOrderCoordinator::flatten(&descriptors));

        let mutations = surface.mutations();
        assert_eq!(
            RenderOrderCoordinator.reconcile(&descriptors, &mut surface),
            Ok(0)
        );
        assert_eq!(surface.mutations(), mutations);
    }

    #[test]
    fn withheld_layers_are_skipped() {
        let parcels = descriptor("parcels", StyleKind::Fill);
        let lots = descriptor("lots", StyleKind::Fill);
        let wells = descriptor("wells", StyleKind::Circle);
        let mut surface = HeadlessSurface::new();
        realise(&[wells.clone(), parcels.clone()], &mut surface);

        let moves = RenderOrderCoordinator
            .reconcile(&[parcels, lots, wells], &mut surface)
            .expect("reconcile");

        assert_eq!(moves, 3);
        assert_eq!(
            managed(&surface),
            ["public.parcels-fill", "public.parcels-outline", "public.wells-circle"]
        );
    }
}
