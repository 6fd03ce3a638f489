//! Rasterizes the site boundary and exclusion zones into buildability masks
//! and the road cost multiplier raster.

use crate::config::{AssetType, ExclusionConfig};
use crate::error::LayoutError;
use crate::models::ExclusionZone;
use crate::raster::{Grid, RasterFrame};
use crate::spatial::{
    distance_to_polygon_edge, open_ring, polygon_contains, validate_polygon, Bounds, Point,
};
use std::collections::{BTreeMap, HashSet};

/// A zone converted to the local metric plane.
#[derive(Debug, Clone)]
pub struct LocalZone {
    pub id: String,
    pub polygon: Vec<Point>,
    pub buffer_m: f64,
    pub cost_multiplier: f64,
    pub asset_types: Vec<AssetType>,
    pub hard: bool,
    /// Multiplier below the allowance threshold; may lower the cost
    pub allowance: bool,
}

impl LocalZone {
    /// Inside the polygon or within the buffer of an edge.
    pub fn covers(&self, point: &Point) -> bool {
        polygon_contains(&self.polygon, point)
            || (self.buffer_m > 0.0 && distance_to_polygon_edge(&self.polygon, point) <= self.buffer_m)
    }

    pub fn applies_to(&self, asset_type: AssetType) -> bool {
        self.asset_types.is_empty() || self.asset_types.contains(&asset_type)
    }

    /// Factor applied to the road cost. Penalties never lower it.
    pub fn cost_factor(&self) -> f64 {
        if self.allowance {
            self.cost_multiplier
        } else {
            self.cost_multiplier.max(1.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExclusionMasks {
    pub frame: RasterFrame,
    /// Boundary ring in the local plane
    pub boundary: Vec<Point>,
    /// Cell centers inside the boundary
    pub boundary_mask: Grid<bool>,
    /// Inside the boundary and clear of every all-type hard zone
    pub buildable: Grid<bool>,
    /// Road cost multiplier per cell from the zones that apply to every type
    pub cost: Grid<f64>,
    /// Covered cell count per zone id
    pub zone_cells: BTreeMap<String, usize>,
    pub zones: Vec<LocalZone>,
    type_buildable: BTreeMap<AssetType, Grid<bool>>,
    type_cost: BTreeMap<AssetType, Grid<f64>>,
}

impl ExclusionMasks {
    /// Buildability for one type, including type-scoped hard zones.
    pub fn buildable_for(&self, asset_type: AssetType) -> &Grid<bool> {
        self.type_buildable
            .get(&asset_type)
            .unwrap_or(&self.buildable)
    }

    /// Road cost for connections serving one type, including type-scoped
    /// zones.
    pub fn cost_for(&self, asset_type: AssetType) -> &Grid<f64> {
        self.type_cost.get(&asset_type).unwrap_or(&self.cost)
    }

    /// Types with their own cost layer, in catalog order.
    pub fn typed_cost_layers(&self) -> impl Iterator<Item = (AssetType, &Grid<f64>)> + '_ {
        self.type_cost.iter().map(|(asset_type, grid)| (*asset_type, grid))
    }

    pub fn buildable_count(&self) -> usize {
        self.buildable.values().iter().filter(|b| **b).count()
    }

    /// Exact check of a local point against the boundary and the hard zones
    /// that apply to `asset_type`.
    pub fn point_allowed(&self, asset_type: AssetType, point: &Point) -> bool {
        polygon_contains(&self.boundary, point)
            && !self
                .zones
                .iter()
                .any(|zone| zone.hard && zone.applies_to(asset_type) && zone.covers(point))
    }
}

pub struct ExclusionMaskBuilder<'a> {
    config: &'a ExclusionConfig,
}

impl<'a> ExclusionMaskBuilder<'a> {
    pub fn new(config: &'a ExclusionConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        boundary: &[Point],
        zones: &[ExclusionZone],
        frame: RasterFrame,
    ) -> Result<ExclusionMasks, LayoutError> {
        let boundary_local: Vec<Point> = open_ring(boundary)
            .iter()
            .map(|point| frame.to_local(point))
            .collect();
        let errors = validate_polygon(&boundary_local);
        if !errors.is_empty() {
            return Err(LayoutError::InvalidInput(format!(
                "boundary: {}",
                errors.join("; ")
            )));
        }

        let mut seen = HashSet::new();
        let mut local_zones = Vec::with_capacity(zones.len());
        for zone in zones {
            if !seen.insert(zone.id.as_str()) {
                return Err(LayoutError::InvalidInput(format!(
                    "duplicate exclusion zone id '{}'",
                    zone.id
                )));
            }
            let mut errors = zone.validate();
            let polygon: Vec<Point> = open_ring(&zone.polygon)
                .iter()
                .map(|point| frame.to_local(point))
                .collect();
            if errors.is_empty() {
                errors.extend(
                    validate_polygon(&polygon)
                        .into_iter()
                        .map(|err| format!("zone {}: {}", zone.id, err)),
                );
            }
            if !errors.is_empty() {
                return Err(LayoutError::InvalidInput(errors.join("; ")));
            }
            local_zones.push(LocalZone {
                id: zone.id.clone(),
                polygon,
                buffer_m: zone.buffer_m,
                cost_multiplier: zone.cost_multiplier,
                asset_types: zone.asset_types.clone(),
                hard: zone.cost_multiplier >= self.config.hard_threshold,
                allowance: zone.cost_multiplier < self.config.allowance_threshold,
            });
        }

        let boundary_mask = Grid::from_fn(frame.rows, frame.cols, |row, col| {
            polygon_contains(&boundary_local, &frame.cell_center((row, col)))
        });
        let mut buildable = boundary_mask.clone();
        let mut cost = Grid::filled(frame.rows, frame.cols, 1.0);
        let mut hard_cost = Grid::filled(frame.rows, frame.cols, false);
        let mut type_buildable: BTreeMap<AssetType, Grid<bool>> = BTreeMap::new();
        let mut type_factor: BTreeMap<AssetType, (Grid<f64>, Grid<bool>)> = BTreeMap::new();
        let mut zone_cells = BTreeMap::new();

        for zone in &local_zones {
            let Some(bounds) = Bounds::from_points(&zone.polygon) else {
                continue;
            };
            let bounds = bounds.expand(zone.buffer_m);
            let min = Point::new(bounds.min_x, bounds.min_y);
            let max = Point::new(bounds.max_x, bounds.max_y);
            let factor = zone.cost_factor();
            let mut covered = 0usize;
            for cell in frame.cells_in_box(&min, &max) {
                if !zone.covers(&frame.cell_center(cell)) {
                    continue;
                }
                covered += 1;
                if zone.asset_types.is_empty() {
                    cost[cell] *= factor;
                    if zone.hard {
                        hard_cost[cell] = true;
                        buildable[cell] = false;
                    }
                    continue;
                }
                for asset_type in &zone.asset_types {
                    let (layer, hard) = type_factor.entry(*asset_type).or_insert_with(|| {
                        (
                            Grid::filled(frame.rows, frame.cols, 1.0),
                            Grid::filled(frame.rows, frame.cols, false),
                        )
                    });
                    layer[cell] *= factor;
                    if zone.hard {
                        hard[cell] = true;
                        type_buildable
                            .entry(*asset_type)
                            .or_insert_with(|| boundary_mask.clone())[cell] = false;
                    }
                }
            }
            tracing::debug!(
                zone = %zone.id,
                covered,
                hard = zone.hard,
                allowance = zone.allowance,
                "zone rasterized"
            );
            zone_cells.insert(zone.id.clone(), covered);
        }

        // Type masks also honour the all-type hard zones.
        for mask in type_buildable.values_mut() {
            for (cell, ok) in buildable.cells() {
                if !ok {
                    mask[cell] = false;
                }
            }
        }

        let floor = self.config.cost_floor;
        let ceiling = self.config.cost_ceiling;
        let clamp = |value: f64, hard: bool| {
            if hard {
                ceiling
            } else {
                value.max(floor).min(ceiling)
            }
        };
        let type_cost = type_factor
            .into_iter()
            .map(|(asset_type, (layer, hard))| {
                let grid = cost.map(|cell, value| {
                    clamp(value * layer[cell], hard_cost[cell] || hard[cell])
                });
                (asset_type, grid)
            })
            .collect();
        let cost = cost.map(|cell, value| clamp(*value, hard_cost[cell]));

        let masks = ExclusionMasks {
            frame,
            boundary: boundary_local,
            boundary_mask,
            buildable,
            cost,
            zone_cells,
            zones: local_zones,
            type_buildable,
            type_cost,
        };
        tracing::debug!(
            buildable = masks.buildable_count(),
            zones = masks.zones.len(),
            "exclusion masks built"
        );
        Ok(masks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    fn frame() -> RasterFrame {
        RasterFrame {
            rows: 20,
            cols: 20,
            transform: GeoTransform::north_up(0.0, 100.0, 5.0),
            cell_size_m: 5.0,
        }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn zone(id: &str, polygon: Vec<Point>, buffer_m: f64, cost_multiplier: f64) -> ExclusionZone {
        ExclusionZone {
            id: id.to_string(),
            name: id.to_string(),
            polygon,
            buffer_m,
            cost_multiplier,
            asset_types: Vec::new(),
        }
    }

    #[test]
    fn hard_zone_clears_buildability_and_saturates_cost() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        // World y grows north; this zone covers local x 40..60, y 40..60.
        let zones = vec![zone("wetland", square(40.0, 40.0, 60.0, 60.0), 0.0, 500.0)];
        let masks = builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &zones, frame())
            .unwrap();
        assert!(!masks.buildable[(10, 10)]);
        assert_eq!(masks.cost[(10, 10)], config.cost_ceiling);
        assert!(masks.buildable[(2, 2)]);
        assert_eq!(masks.cost[(2, 2)], 1.0);
        assert_eq!(masks.zone_cells["wetland"], 16);
        assert!(!masks.point_allowed(AssetType::SolarArray, &Point::new(50.0, 50.0)));
        assert!(masks.point_allowed(AssetType::SolarArray, &Point::new(10.0, 10.0)));
    }

    #[test]
    fn buffer_extends_coverage() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        let plain = builder
            .build(
                &square(0.0, 0.0, 100.0, 100.0),
                &[zone("z", square(40.0, 40.0, 60.0, 60.0), 0.0, 200.0)],
                frame(),
            )
            .unwrap();
        let buffered = builder
            .build(
                &square(0.0, 0.0, 100.0, 100.0),
                &[zone("z", square(40.0, 40.0, 60.0, 60.0), 10.0, 200.0)],
                frame(),
            )
            .unwrap();
        assert!(buffered.zone_cells["z"] > plain.zone_cells["z"]);
        // Cell center (37.5, 47.5 local) is 2.5 m outside the west edge.
        assert!(plain.buildable[(9, 7)]);
        assert!(!buffered.buildable[(9, 7)]);
    }

    #[test]
    fn soft_and_allowance_multiply_with_floor() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        let zones = vec![
            zone("soft", square(0.0, 0.0, 50.0, 100.0), 0.0, 3.0),
            zone("allow", square(25.0, 0.0, 100.0, 100.0), 0.0, 0.1),
        ];
        let masks = builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &zones, frame())
            .unwrap();
        // Overlap: 3 × 0.1 = 0.3
        assert!((masks.cost[(10, 7)] - 0.3).abs() < 1e-9);
        // Allowance alone hits the floor.
        assert!((masks.cost[(10, 15)] - config.cost_floor).abs() < 1e-9);
        assert!((masks.cost[(10, 2)] - 3.0).abs() < 1e-9);
        assert!(masks.buildable[(10, 7)]);
    }

    #[test]
    fn scoped_zone_only_blocks_its_types() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        let mut scoped = zone("setback", square(0.0, 0.0, 30.0, 100.0), 0.0, 100.0);
        scoped.asset_types = vec![AssetType::WindTurbine];
        let masks = builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &[scoped], frame())
            .unwrap();
        assert!(masks.buildable[(10, 2)]);
        assert!(masks.buildable_for(AssetType::SolarArray)[(10, 2)]);
        assert!(!masks.buildable_for(AssetType::WindTurbine)[(10, 2)]);
        assert!(masks.buildable_for(AssetType::WindTurbine)[(10, 10)]);
    }

    #[test]
    fn scoped_zones_build_their_own_cost_layer() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        let mut glare = zone("glare", square(0.0, 0.0, 50.0, 100.0), 0.0, 4.0);
        glare.asset_types = vec![AssetType::SolarArray];
        let mut setback = zone("setback", square(50.0, 0.0, 100.0, 100.0), 0.0, 200.0);
        setback.asset_types = vec![AssetType::WindTurbine];
        let zones = vec![
            glare,
            setback,
            zone("track", square(0.0, 0.0, 100.0, 50.0), 0.0, 2.0),
        ];
        let masks = builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &zones, frame())
            .unwrap();
        // Row 15 is local y 77.5 (under the track); row 2 is y 12.5.
        assert!((masks.cost[(15, 2)] - 2.0).abs() < 1e-9);
        assert!((masks.cost_for(AssetType::SolarArray)[(15, 2)] - 8.0).abs() < 1e-9);
        assert!((masks.cost_for(AssetType::SolarArray)[(2, 2)] - 4.0).abs() < 1e-9);
        assert!((masks.cost_for(AssetType::Battery)[(15, 2)] - 2.0).abs() < 1e-9);
        assert_eq!(masks.cost_for(AssetType::WindTurbine)[(2, 15)], config.cost_ceiling);
        assert!((masks.cost_for(AssetType::SolarArray)[(2, 15)] - 1.0).abs() < 1e-9);
        let layered: Vec<AssetType> = masks.typed_cost_layers().map(|(t, _)| t).collect();
        assert_eq!(layered, vec![AssetType::SolarArray, AssetType::WindTurbine]);
    }

    #[test]
    fn multipliers_above_the_allowance_threshold_never_lower_cost() {
        let config = ExclusionConfig {
            allowance_threshold: 0.5,
            ..ExclusionConfig::default()
        };
        let builder = ExclusionMaskBuilder::new(&config);
        let zones = vec![
            zone("mild", square(0.0, 0.0, 50.0, 100.0), 0.0, 0.8),
            zone("road", square(50.0, 0.0, 100.0, 100.0), 0.0, 0.4),
        ];
        let masks = builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &zones, frame())
            .unwrap();
        assert!(!masks.zones[0].allowance);
        assert!(masks.zones[1].allowance);
        assert!((masks.cost[(10, 2)] - 1.0).abs() < 1e-9);
        assert!((masks.cost[(10, 15)] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn rejects_degenerate_boundary_and_bad_zones() {
        let config = ExclusionConfig::default();
        let builder = ExclusionMaskBuilder::new(&config);
        let line = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(20.0, 0.0)];
        assert!(matches!(
            builder.build(&line, &[], frame()),
            Err(LayoutError::InvalidInput(_))
        ));
        let bad = zone("bad", square(0.0, 0.0, 10.0, 10.0), -5.0, 2.0);
        assert!(matches!(
            builder.build(&square(0.0, 0.0, 100.0, 100.0), &[bad], frame()),
            Err(LayoutError::InvalidInput(_))
        ));
        let dup = vec![
            zone("a", square(0.0, 0.0, 10.0, 10.0), 0.0, 2.0),
            zone("a", square(20.0, 20.0, 30.0, 30.0), 0.0, 2.0),
        ];
        assert!(builder
            .build(&square(0.0, 0.0, 100.0, 100.0), &dup, frame())
            .is_err());
    }
}
