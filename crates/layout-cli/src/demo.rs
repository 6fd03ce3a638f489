//! Synthetic sites for trying the engine without survey data.

use clap::ValueEnum;
use layout_core::{
    ElevationRaster, ExclusionZone, GenerationRequest, GeoTransform, Grid, LayoutError, Point,
    DEFAULT_SEED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoTerrain {
    /// Level ground
    Flat,
    /// Level west half, 20% grade east half
    HalfSteep,
    /// North-south ridge through the middle with a wetland on its flank
    Ridge,
}

/// Square site with its boundary inset one cell from the raster edge.
pub fn demo_request(
    terrain: DemoTerrain,
    size_m: f64,
    cell_m: f64,
) -> Result<GenerationRequest, LayoutError> {
    if !(cell_m.is_finite() && cell_m > 0.0 && size_m.is_finite() && size_m > 0.0) {
        return Err(LayoutError::InvalidInput(format!(
            "demo site needs positive size and cell, got {} m / {} m",
            size_m, cell_m
        )));
    }
    let n = ((size_m / cell_m).round() as usize).max(3);
    let size = n as f64 * cell_m;
    let elevation = Grid::from_fn(n, n, |row, col| {
        let x = (col as f64 + 0.5) * cell_m;
        let y = size - (row as f64 + 0.5) * cell_m;
        demo_elevation(terrain, x, y, size)
    });
    let raster = ElevationRaster::new(GeoTransform::north_up(0.0, size, cell_m), cell_m, elevation, None)?;

    let inset = cell_m;
    let mut exclusions = Vec::new();
    if terrain == DemoTerrain::Ridge {
        exclusions.push(ExclusionZone {
            id: "wetland".to_string(),
            name: "Seasonal wetland".to_string(),
            polygon: vec![
                Point::new(size * 0.15, size * 0.15),
                Point::new(size * 0.3, size * 0.15),
                Point::new(size * 0.3, size * 0.3),
                Point::new(size * 0.15, size * 0.3),
            ],
            buffer_m: 15.0,
            cost_multiplier: 100.0,
            asset_types: Vec::new(),
        });
    }

    Ok(GenerationRequest {
        boundary: vec![
            Point::new(inset, inset),
            Point::new(size - inset, inset),
            Point::new(size - inset, size - inset),
            Point::new(inset, size - inset),
        ],
        elevation: raster,
        exclusions,
        target_capacity_kw: (size * size / 50.0).round().max(500.0),
        strategy: "balanced".to_string(),
        entry_point: Some(Point::new(size / 2.0, 0.0)),
        seed: DEFAULT_SEED,
    })
}

fn demo_elevation(terrain: DemoTerrain, x: f64, y: f64, size: f64) -> f64 {
    match terrain {
        DemoTerrain::Flat => 100.0,
        DemoTerrain::HalfSteep => {
            let half = size / 2.0;
            100.0 + (x - half).max(0.0) * 0.2
        }
        DemoTerrain::Ridge => {
            let spread = size / 8.0;
            let d = x - size / 2.0;
            100.0 + 25.0 * (-(d * d) / (2.0 * spread * spread)).exp() + y * 0.005
        }
    }
}
