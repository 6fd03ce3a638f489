//! Synthetic square sites for unit tests.

use crate::config::EngineConfig;
use crate::exclusion::{ExclusionMaskBuilder, ExclusionMasks};
use crate::models::ExclusionZone;
use crate::placement::SiteContext;
use crate::raster::{ElevationRaster, GeoTransform, Grid};
use crate::spatial::Point;
use crate::terrain::{SuitabilitySet, TerrainAnalyzer, TerrainMetrics};

/// Square site whose boundary covers the whole raster. World y grows north
/// from 0, so local (x, y) maps to world (x, size_m − y).
pub(crate) struct Fixture {
    pub raster: ElevationRaster,
    pub metrics: TerrainMetrics,
    pub suitability: SuitabilitySet,
    pub masks: ExclusionMasks,
    pub config: EngineConfig,
}

/// Axis-aligned rectangle ring.
pub(crate) fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
    vec![
        Point::new(x0, y0),
        Point::new(x1, y0),
        Point::new(x1, y1),
        Point::new(x0, y1),
    ]
}

impl Fixture {
    pub fn new(size_m: f64, cell_m: f64, elevation: impl FnMut(usize, usize) -> f64) -> Self {
        Self::with_zones(size_m, cell_m, Vec::new(), elevation)
    }

    pub fn with_zones(
        size_m: f64,
        cell_m: f64,
        zones: Vec<ExclusionZone>,
        elevation: impl FnMut(usize, usize) -> f64,
    ) -> Self {
        let n = (size_m / cell_m).round() as usize;
        let config = EngineConfig::default();
        let raster = ElevationRaster::new(
            GeoTransform::north_up(0.0, size_m, cell_m),
            cell_m,
            Grid::from_fn(n, n, elevation),
            None,
        )
        .unwrap();
        let masks = ExclusionMaskBuilder::new(&config.exclusions)
            .build(&square(0.0, 0.0, size_m, size_m), &zones, raster.frame())
            .unwrap();
        let analyzer = TerrainAnalyzer::new(&config.terrain, &config.catalog);
        let metrics = analyzer.analyze(&raster, &masks.boundary_mask).unwrap();
        let suitability = analyzer.suitability(&metrics, &masks.boundary_mask);
        Self {
            raster,
            metrics,
            suitability,
            masks,
            config,
        }
    }

    pub fn site(&self) -> SiteContext<'_> {
        SiteContext {
            raster: &self.raster,
            metrics: &self.metrics,
            suitability: &self.suitability,
            masks: &self.masks,
            catalog: &self.config.catalog,
            flat_slope_deg: self.config.terrain.flat_slope_deg,
        }
    }
}
