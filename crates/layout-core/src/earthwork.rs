//! Cut/fill volumes for asset pads and road corridors.
//!
//! Every cell is graded at most once: pads claim cells first in asset
//! order, then road corridors in road order. Volumes go through an integer
//! liter ledger so totals reconcile exactly with the per-item figures.

use crate::error::LayoutError;
use crate::models::{CutFillResult, ItemVolume, PlacedAsset, PlacedRoad};
use crate::placement::SiteContext;
use crate::raster::{Cell, Grid};
use crate::spatial::{footprint_corners, nearest_on_polyline, polygon_contains, Bounds, Point};

const LITERS_PER_M3: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Asset,
    Road,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    id: String,
    kind: ItemKind,
    cut_l: u64,
    fill_l: u64,
    cells: usize,
}

/// Integer-liter volume ledger with running totals.
#[derive(Debug, Clone, Default)]
pub struct EarthworkLedger {
    entries: Vec<LedgerEntry>,
    total_cut_l: u64,
    total_fill_l: u64,
    claimed_cells: usize,
}

impl EarthworkLedger {
    fn open(&mut self, id: &str, kind: ItemKind) -> usize {
        self.entries.push(LedgerEntry {
            id: id.to_string(),
            kind,
            cut_l: 0,
            fill_l: 0,
            cells: 0,
        });
        self.entries.len() - 1
    }

    /// Book one cell: ground above target is cut, below is fill.
    fn record(&mut self, entry: usize, ground_m: f64, target_m: f64, cell_area_m2: f64) {
        let liters = ((ground_m - target_m).abs() * cell_area_m2 * LITERS_PER_M3).round() as u64;
        let item = &mut self.entries[entry];
        item.cells += 1;
        self.claimed_cells += 1;
        if ground_m > target_m {
            item.cut_l += liters;
            self.total_cut_l += liters;
        } else {
            item.fill_l += liters;
            self.total_fill_l += liters;
        }
    }

    /// Running totals must equal the per-item sums.
    pub fn reconcile(&self) -> Result<(), LayoutError> {
        let cut: u64 = self.entries.iter().map(|e| e.cut_l).sum();
        let fill: u64 = self.entries.iter().map(|e| e.fill_l).sum();
        let cells: usize = self.entries.iter().map(|e| e.cells).sum();
        if cut != self.total_cut_l || fill != self.total_fill_l || cells != self.claimed_cells {
            return Err(LayoutError::InvariantViolation(format!(
                "earthwork ledger out of balance: cut {} vs {} L, fill {} vs {} L, cells {} vs {}",
                cut, self.total_cut_l, fill, self.total_fill_l, cells, self.claimed_cells
            )));
        }
        Ok(())
    }

    fn sum(&self, kind: ItemKind, pick: impl Fn(&LedgerEntry) -> u64) -> u64 {
        self.entries.iter().filter(|e| e.kind == kind).map(pick).sum()
    }

    fn to_result(&self) -> CutFillResult {
        let volumes = |kind: ItemKind| -> Vec<ItemVolume> {
            self.entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| ItemVolume {
                    id: e.id.clone(),
                    cut_m3: m3(e.cut_l),
                    fill_m3: m3(e.fill_l),
                    cut_l: e.cut_l,
                    fill_l: e.fill_l,
                })
                .collect()
        };
        let asset_cut_l = self.sum(ItemKind::Asset, |e| e.cut_l);
        let asset_fill_l = self.sum(ItemKind::Asset, |e| e.fill_l);
        let road_cut_l = self.sum(ItemKind::Road, |e| e.cut_l);
        let road_fill_l = self.sum(ItemKind::Road, |e| e.fill_l);
        CutFillResult {
            total_cut_l: self.total_cut_l,
            total_fill_l: self.total_fill_l,
            asset_cut_l,
            asset_fill_l,
            road_cut_l,
            road_fill_l,
            total_cut_m3: m3(self.total_cut_l),
            total_fill_m3: m3(self.total_fill_l),
            net_m3: (self.total_cut_l as f64 - self.total_fill_l as f64) / LITERS_PER_M3,
            asset_cut_m3: m3(asset_cut_l),
            asset_fill_m3: m3(asset_fill_l),
            road_cut_m3: m3(road_cut_l),
            road_fill_m3: m3(road_fill_l),
            assets: volumes(ItemKind::Asset),
            roads: volumes(ItemKind::Road),
        }
    }
}

fn m3(liters: u64) -> f64 {
    liters as f64 / LITERS_PER_M3
}

pub struct EarthworkCalculator<'a> {
    site: SiteContext<'a>,
}

impl<'a> EarthworkCalculator<'a> {
    pub fn new(site: SiteContext<'a>) -> Self {
        Self { site }
    }

    /// Grade every pad and corridor, write per-item volumes back onto the
    /// assets and roads, and return the reconciled totals.
    pub fn compute(
        &self,
        assets: &mut [PlacedAsset],
        roads: &mut [PlacedRoad],
    ) -> Result<CutFillResult, LayoutError> {
        let frame = self.site.frame();
        let cell_area = frame.cell_area_m2();
        let mut claimed = Grid::filled(frame.rows, frame.cols, false);
        let mut ledger = EarthworkLedger::default();

        for asset in assets.iter() {
            let entry = ledger.open(&asset.id, ItemKind::Asset);
            let center = frame.to_local(&asset.position);
            let target = self.site.raw_elevation(frame.nearest_cell(&center));
            let pad = self.site.catalog.get(asset.asset_type).pad_size_m;
            let corners = footprint_corners(&center, pad, pad, asset.rotation_deg);
            for cell in self.cells_in_polygon(&corners) {
                if claimed[cell] {
                    continue;
                }
                claimed[cell] = true;
                ledger.record(entry, self.site.raw_elevation(cell), target, cell_area);
            }
        }

        for road in roads.iter() {
            let entry = ledger.open(&road.id, ItemKind::Road);
            let centerline: Vec<Point> = road.polyline.iter().map(|p| frame.to_local(p)).collect();
            let stations: Vec<(Point, f64)> = road
                .stations
                .iter()
                .map(|s| (frame.to_local(&s.position), s.elevation_m))
                .collect();
            if centerline.len() < 2 || stations.is_empty() {
                continue;
            }
            let half_width = road.width_m / 2.0;
            let Some(bounds) = Bounds::from_points(&centerline) else {
                continue;
            };
            let bounds = bounds.expand(half_width);
            let cells: Vec<Cell> = frame
                .cells_in_box(
                    &Point::new(bounds.min_x, bounds.min_y),
                    &Point::new(bounds.max_x, bounds.max_y),
                )
                .collect();
            for cell in cells {
                if claimed[cell] {
                    continue;
                }
                let center = frame.cell_center(cell);
                let within = nearest_on_polyline(&centerline, &center)
                    .is_some_and(|(_, dist)| dist <= half_width);
                if !within {
                    continue;
                }
                let target = stations
                    .iter()
                    .map(|(position, elevation)| (position.distance(&center), *elevation))
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, elevation)| elevation)
                    .unwrap_or_else(|| self.site.raw_elevation(cell));
                claimed[cell] = true;
                ledger.record(entry, self.site.raw_elevation(cell), target, cell_area);
            }
        }

        ledger.reconcile()?;
        let result = ledger.to_result();

        for (asset, volume) in assets.iter_mut().zip(&result.assets) {
            asset.cut_m3 = volume.cut_m3;
            asset.fill_m3 = volume.fill_m3;
            asset.cut_l = volume.cut_l;
            asset.fill_l = volume.fill_l;
        }
        for (road, volume) in roads.iter_mut().zip(&result.roads) {
            road.cut_m3 = volume.cut_m3;
            road.fill_m3 = volume.fill_m3;
            road.cut_l = volume.cut_l;
            road.fill_l = volume.fill_l;
        }

        tracing::info!(
            cut_m3 = result.total_cut_m3,
            fill_m3 = result.total_fill_m3,
            net_m3 = result.net_m3,
            cells = ledger.claimed_cells,
            "earthwork computed"
        );
        Ok(result)
    }

    fn cells_in_polygon(&self, polygon: &[Point]) -> Vec<Cell> {
        let frame = self.site.frame();
        let Some(bounds) = Bounds::from_points(polygon) else {
            return Vec::new();
        };
        frame
            .cells_in_box(
                &Point::new(bounds.min_x, bounds.min_y),
                &Point::new(bounds.max_x, bounds.max_y),
            )
            .filter(|cell| polygon_contains(polygon, &frame.cell_center(*cell)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetType, RouterConfig, StrategyProfile};
    use crate::models::{RoadClass, RoadEndpoint, Station};
    use crate::placement::AssetPlacementEngine;
    use crate::route_engine::RoadNetworkRouter;
    use crate::test_support::Fixture;

    fn substation_at(fixture: &Fixture, x: f64, y: f64) -> PlacedAsset {
        fixture.site().build_asset(
            "substation-001".to_string(),
            AssetType::Substation,
            &Point::new(x, y),
            0.0,
            1.0,
            None,
        )
    }

    fn straight_road(id: &str, fixture: &Fixture, from: Point, to: Point, elevation: f64) -> PlacedRoad {
        let frame = fixture.raster.frame();
        PlacedRoad {
            id: id.to_string(),
            class: RoadClass::Spur,
            polyline: vec![frame.to_world(&from), frame.to_world(&to)],
            length_m: from.distance(&to),
            width_m: 6.0,
            max_grade_pct: 0.0,
            max_terrain_grade_pct: 0.0,
            stations: vec![
                Station {
                    distance_m: 0.0,
                    position: frame.to_world(&from),
                    ground_elevation_m: elevation,
                    elevation_m: elevation,
                    grade_pct: 0.0,
                },
                Station {
                    distance_m: from.distance(&to),
                    position: frame.to_world(&to),
                    ground_elevation_m: elevation,
                    elevation_m: elevation,
                    grade_pct: 0.0,
                },
            ],
            from: RoadEndpoint::EntryPoint,
            to: RoadEndpoint::Asset {
                asset_id: "substation-001".to_string(),
            },
            fallback: false,
            attempts: 1,
            cut_m3: 0.0,
            fill_m3: 0.0,
            cut_l: 0,
            fill_l: 0,
        }
    }

    #[test]
    fn flat_ground_moves_no_earth() {
        let fixture = Fixture::new(200.0, 5.0, |_, _| 50.0);
        let mut assets = vec![substation_at(&fixture, 100.0, 100.0)];
        let mut roads = vec![straight_road(
            "road-001",
            &fixture,
            Point::new(10.0, 100.0),
            Point::new(100.0, 100.0),
            50.0,
        )];
        let result = EarthworkCalculator::new(fixture.site())
            .compute(&mut assets, &mut roads)
            .unwrap();
        assert_eq!(result.total_cut_m3, 0.0);
        assert_eq!(result.total_fill_m3, 0.0);
        assert_eq!(result.assets.len(), 1);
        assert_eq!(result.roads.len(), 1);
    }

    #[test]
    fn pad_on_a_ramp_balances_cut_and_fill() {
        // 0.5 m rise per column; the 45 m pad spans 9 columns symmetric
        // about the center cell.
        let fixture = Fixture::new(200.0, 5.0, |_, col| col as f64 * 0.5);
        let mut assets = vec![substation_at(&fixture, 102.5, 102.5)];
        let result = EarthworkCalculator::new(fixture.site())
            .compute(&mut assets, &mut [])
            .unwrap();
        assert!(result.total_cut_m3 > 0.0);
        assert_eq!(result.total_cut_m3, result.total_fill_m3);
        assert_eq!(result.net_m3, 0.0);
        assert_eq!(assets[0].cut_l, result.asset_cut_l);
        // Columns ±1..±4 cut 0.5..2.0 m over 9 rows of 25 m² cells.
        assert_eq!(result.total_cut_l, 1_125_000);
        assert_eq!(result.total_fill_l, result.total_cut_l);
    }

    #[test]
    fn overlapping_items_claim_cells_once() {
        let fixture = Fixture::new(200.0, 5.0, |row, _| row as f64 * 0.4);
        let mut assets = vec![substation_at(&fixture, 102.5, 102.5)];
        // Road runs straight through the pad with a design elevation far
        // from the ground, so any double count would show up.
        let mut roads = vec![straight_road(
            "road-001",
            &fixture,
            Point::new(52.5, 102.5),
            Point::new(152.5, 102.5),
            0.0,
        )];
        let calculator = EarthworkCalculator::new(fixture.site());
        let result = calculator.compute(&mut assets, &mut roads).unwrap();
        let pad_only = calculator
            .compute(&mut assets.clone(), &mut [])
            .unwrap();
        // The road corridor is one row of 21 cells, 9 of them under the pad.
        assert_eq!(result.asset_cut_m3, pad_only.asset_cut_m3);
        assert_eq!(result.asset_fill_m3, pad_only.asset_fill_m3);
        let road_cells_outside_pad = 21 - 9;
        let ground = 20.0 * 0.4;
        let expected_road_cut = road_cells_outside_pad as f64 * ground * 25.0;
        assert!((result.road_cut_m3 - expected_road_cut).abs() < 1e-6);
        assert_eq!(result.total_cut_l, result.asset_cut_l + result.road_cut_l);
        assert_eq!(roads[0].cut_l, result.road_cut_l);
    }

    #[test]
    fn generated_layout_reconciles() {
        let fixture = Fixture::new(300.0, 5.0, |row, col| {
            100.0 + (row as f64 * 0.15).sin() + col as f64 * 0.05
        });
        let strategy = StrategyProfile::builtin("balanced").unwrap();
        let outcome = AssetPlacementEngine::new(fixture.site(), &strategy)
            .place(2000.0, 5)
            .unwrap();
        let config = RouterConfig::default();
        let network = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions)
            .route_network(&outcome.assets, outcome.hub_id.as_deref(), None, None);
        let mut assets = outcome.assets.clone();
        let mut roads = network.roads.clone();
        let result = EarthworkCalculator::new(fixture.site())
            .compute(&mut assets, &mut roads)
            .unwrap();

        let asset_cut: u64 = assets.iter().map(|a| a.cut_l).sum();
        let asset_fill: u64 = assets.iter().map(|a| a.fill_l).sum();
        let road_cut: u64 = roads.iter().map(|r| r.cut_l).sum();
        let road_fill: u64 = roads.iter().map(|r| r.fill_l).sum();
        assert!(result.total_cut_l > 0);
        assert_eq!(asset_cut, result.asset_cut_l);
        assert_eq!(asset_fill, result.asset_fill_l);
        assert_eq!(road_cut, result.road_cut_l);
        assert_eq!(road_fill, result.road_fill_l);
        assert_eq!(result.total_cut_l, asset_cut + road_cut);
        assert_eq!(result.total_fill_l, asset_fill + road_fill);
        let item_cut: u64 = result.assets.iter().chain(&result.roads).map(|v| v.cut_l).sum();
        assert_eq!(item_cut, result.total_cut_l);
    }
}
