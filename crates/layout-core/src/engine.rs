//! Pipeline facade: exclusions, terrain, placement, routing, earthwork.

use crate::config::EngineConfig;
use crate::earthwork::EarthworkCalculator;
use crate::error::{LayoutError, Stage};
use crate::exclusion::{ExclusionMaskBuilder, ExclusionMasks};
use crate::models::{
    FlagKind, GenerationRequest, LayoutFlag, LayoutResult, LayoutStats, PlacedAsset,
};
use crate::placement::{AssetPlacementEngine, BlockGrid, SiteContext};
use crate::raster::ElevationRaster;
use crate::route_engine::RoadNetworkRouter;
use crate::spatial::Point;
use crate::terrain::{SuitabilitySet, TerrainAnalyzer, TerrainMetrics};

/// Per-request rasters, built once and shared by the later stages.
struct PreparedSite<'r> {
    raster: &'r ElevationRaster,
    metrics: TerrainMetrics,
    suitability: SuitabilitySet,
    masks: ExclusionMasks,
}

/// Assets handed to the routing and earthwork stages.
struct Placed {
    assets: Vec<PlacedAsset>,
    hub_id: Option<String>,
    block_grid: Option<BlockGrid>,
    flags: Vec<LayoutFlag>,
    candidates: usize,
}

pub struct LayoutEngine {
    config: EngineConfig,
}

impl LayoutEngine {
    pub fn new(config: EngineConfig) -> Result<Self, LayoutError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(LayoutError::Config(errors.join("; ")));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<LayoutResult, LayoutError> {
        self.generate_with_hook(request, |_| Ok(()))
    }

    /// Run the full pipeline. `hook` is called before every stage; an error
    /// from it aborts the run and is returned unchanged.
    pub fn generate_with_hook(
        &self,
        request: &GenerationRequest,
        mut hook: impl FnMut(Stage) -> Result<(), LayoutError>,
    ) -> Result<LayoutResult, LayoutError> {
        let strategy = self.config.strategy(&request.strategy)?;
        if !request.target_capacity_kw.is_finite() || request.target_capacity_kw <= 0.0 {
            return Err(LayoutError::InvalidInput(format!(
                "target capacity must be positive, got {}",
                request.target_capacity_kw
            )));
        }
        tracing::info!(
            strategy = %strategy.name,
            target_kw = request.target_capacity_kw,
            seed = request.seed,
            "layout generation started"
        );

        let prepared = self.prepare(request, &mut hook)?;
        let site = self.site(&prepared);

        hook(Stage::Placement)?;
        let outcome = AssetPlacementEngine::new(site, &strategy)
            .place(request.target_capacity_kw, request.seed)?;
        let placed = Placed {
            assets: outcome.assets,
            hub_id: outcome.hub_id,
            block_grid: outcome.block_grid,
            flags: outcome.flags,
            candidates: outcome.candidates,
        };

        self.route_and_grade(request, &strategy.name, &prepared, placed, &mut hook)
    }

    /// Re-run routing and earthwork for an existing set of assets.
    pub fn reroute(
        &self,
        request: &GenerationRequest,
        result: &LayoutResult,
    ) -> Result<LayoutResult, LayoutError> {
        let mut hook = |_: Stage| -> Result<(), LayoutError> { Ok(()) };
        let prepared = self.prepare(request, &mut hook)?;
        let placed = Self::carry_over(result, result.assets.clone());
        self.route_and_grade(request, &result.strategy, &prepared, placed, &mut hook)
    }

    /// Move one asset, then re-route and re-grade the whole layout.
    pub fn relocate_asset(
        &self,
        request: &GenerationRequest,
        result: &LayoutResult,
        asset_id: &str,
        position: Point,
    ) -> Result<LayoutResult, LayoutError> {
        let mut hook = |_: Stage| -> Result<(), LayoutError> { Ok(()) };
        let prepared = self.prepare(request, &mut hook)?;
        let site = self.site(&prepared);

        let Some(index) = result.assets.iter().position(|asset| asset.id == asset_id) else {
            return Err(LayoutError::InvalidInput(format!("unknown asset '{}'", asset_id)));
        };
        let moved = site.relocate_asset(&result.assets[index], position)?;
        tracing::info!(
            asset = %asset_id,
            x = position.x,
            y = position.y,
            "asset relocated"
        );
        let mut assets = result.assets.clone();
        assets[index] = moved;

        let placed = Self::carry_over(result, assets);
        self.route_and_grade(request, &result.strategy, &prepared, placed, &mut hook)
    }

    fn carry_over(result: &LayoutResult, mut assets: Vec<PlacedAsset>) -> Placed {
        for asset in &mut assets {
            asset.cut_m3 = 0.0;
            asset.fill_m3 = 0.0;
            asset.cut_l = 0;
            asset.fill_l = 0;
        }
        // Routing flags are recomputed; placement flags stay.
        let flags = result
            .flags
            .iter()
            .filter(|flag| matches!(flag.kind, FlagKind::UnderCapacity | FlagKind::SkippedBlock))
            .cloned()
            .collect();
        Placed {
            assets,
            hub_id: result.hub_id.clone(),
            block_grid: result.block_grid.clone(),
            flags,
            candidates: result.stats.candidates,
        }
    }

    fn prepare<'r>(
        &self,
        request: &'r GenerationRequest,
        hook: &mut impl FnMut(Stage) -> Result<(), LayoutError>,
    ) -> Result<PreparedSite<'r>, LayoutError> {
        request.elevation.validate()?;
        let frame = request.elevation.frame();

        hook(Stage::Exclusions)?;
        let masks = ExclusionMaskBuilder::new(&self.config.exclusions).build(
            &request.boundary,
            &request.exclusions,
            frame,
        )?;

        hook(Stage::Terrain)?;
        let analyzer = TerrainAnalyzer::new(&self.config.terrain, &self.config.catalog);
        let metrics = analyzer.analyze(&request.elevation, &masks.boundary_mask)?;
        let suitability = analyzer.suitability(&metrics, &masks.boundary_mask);

        Ok(PreparedSite {
            raster: &request.elevation,
            metrics,
            suitability,
            masks,
        })
    }

    fn site<'s>(&'s self, prepared: &'s PreparedSite<'_>) -> SiteContext<'s> {
        SiteContext {
            raster: prepared.raster,
            metrics: &prepared.metrics,
            suitability: &prepared.suitability,
            masks: &prepared.masks,
            catalog: &self.config.catalog,
            flat_slope_deg: self.config.terrain.flat_slope_deg,
        }
    }

    fn route_and_grade(
        &self,
        request: &GenerationRequest,
        strategy: &str,
        prepared: &PreparedSite<'_>,
        placed: Placed,
        hook: &mut impl FnMut(Stage) -> Result<(), LayoutError>,
    ) -> Result<LayoutResult, LayoutError> {
        let site = self.site(prepared);
        let Placed {
            mut assets,
            hub_id,
            block_grid,
            mut flags,
            candidates,
        } = placed;

        hook(Stage::Routing)?;
        let router = RoadNetworkRouter::new(site, &self.config.router, &self.config.exclusions);
        let network = router.route_network(
            &assets,
            hub_id.as_deref(),
            request.entry_point,
            block_grid.as_ref(),
        );
        let nodes_expanded = network.nodes_expanded;
        let fallback_roads = network.fallback_count();
        let entry_point = network.entry_point;
        let mut roads = network.roads;
        flags.extend(network.flags);

        hook(Stage::Earthwork)?;
        let earthwork = EarthworkCalculator::new(site).compute(&mut assets, &mut roads)?;

        let achieved_capacity_kw = assets.iter().map(|asset| asset.capacity_kw).sum();
        let result = LayoutResult {
            strategy: strategy.to_string(),
            target_capacity_kw: request.target_capacity_kw,
            achieved_capacity_kw,
            entry_point,
            assets,
            roads,
            earthwork,
            flags,
            stats: LayoutStats {
                buildable_cells: prepared.masks.buildable_count(),
                candidates,
                nodes_expanded,
                fallback_roads,
            },
            hub_id,
            block_grid,
        };
        tracing::info!(
            assets = result.assets.len(),
            roads = result.roads.len(),
            achieved_kw = result.achieved_capacity_kw,
            flags = result.flags.len(),
            "layout generation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::raster::{GeoTransform, Grid};

    fn flat_request(target_kw: f64) -> GenerationRequest {
        GenerationRequest {
            boundary: vec![
                Point::new(0.0, 0.0),
                Point::new(300.0, 0.0),
                Point::new(300.0, 300.0),
                Point::new(0.0, 300.0),
            ],
            elevation: ElevationRaster::new(
                GeoTransform::north_up(0.0, 300.0, 5.0),
                5.0,
                Grid::filled(60, 60, 42.0),
                None,
            )
            .unwrap(),
            exclusions: Vec::new(),
            target_capacity_kw: target_kw,
            strategy: "balanced".to_string(),
            entry_point: None,
            seed: 9,
        }
    }

    #[test]
    fn hook_sees_stages_in_pipeline_order() {
        let engine = LayoutEngine::new(EngineConfig::default()).unwrap();
        let mut seen = Vec::new();
        engine
            .generate_with_hook(&flat_request(2000.0), |stage| {
                seen.push(stage);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                Stage::Exclusions,
                Stage::Terrain,
                Stage::Placement,
                Stage::Routing,
                Stage::Earthwork
            ]
        );
    }

    #[test]
    fn hook_error_aborts_the_run() {
        let engine = LayoutEngine::new(EngineConfig::default()).unwrap();
        let err = engine
            .generate_with_hook(&flat_request(2000.0), |stage| {
                if stage == Stage::Routing {
                    Err(LayoutError::DeadlineExceeded { stage })
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retryable);
    }

    #[test]
    fn rejects_unknown_strategy_and_bad_target() {
        let engine = LayoutEngine::new(EngineConfig::default()).unwrap();
        let mut request = flat_request(1000.0);
        request.strategy = "nope".to_string();
        assert!(matches!(engine.generate(&request), Err(LayoutError::InvalidInput(_))));
        assert!(matches!(
            engine.generate(&flat_request(-5.0)),
            Err(LayoutError::InvalidInput(_))
        ));
    }

    #[test]
    fn relocation_reroutes_and_keeps_ids() {
        let engine = LayoutEngine::new(EngineConfig::default()).unwrap();
        let request = flat_request(2000.0);
        let result = engine.generate(&request).unwrap();
        let battery = result
            .assets
            .iter()
            .find(|asset| asset.id == "battery-001")
            .unwrap();
        let dx = if battery.position.x > 150.0 { -10.0 } else { 10.0 };
        let target = Point::new(battery.position.x + dx, battery.position.y);
        let moved = engine
            .relocate_asset(&request, &result, "battery-001", target)
            .unwrap();
        let relocated = moved.assets.iter().find(|a| a.id == "battery-001").unwrap();
        assert!(relocated.position.distance(&target) < 1e-9);
        assert_eq!(moved.assets.len(), result.assets.len());
        assert!(moved.flags_of(FlagKind::OrphanAsset).next().is_none());

        let outside = Point::new(-50.0, 10.0);
        assert!(matches!(
            engine.relocate_asset(&request, &result, "battery-001", outside),
            Err(LayoutError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.relocate_asset(&request, &result, "missing-001", target),
            Err(LayoutError::InvalidInput(_))
        ));
    }
}
