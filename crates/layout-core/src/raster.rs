//! Raster containers and the grid <-> world coordinate frame.

use crate::error::LayoutError;
use crate::spatial::{meters_per_deg_lat, meters_per_deg_lon, Point};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// (row, col)
pub type Cell = (usize, usize);

/// 8-connected neighbour offsets, orthogonal first.
pub const NEIGHBORS_8: [(i64, i64); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// Row-major 2D raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }
}

impl<T> Grid<T> {
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, LayoutError> {
        if data.len() != rows.saturating_mul(cols) {
            return Err(LayoutError::InvalidInput(format!(
                "raster data has {} values, expected {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                data.push(f(row, col));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col)
    }

    /// Offset lookup that returns None off the grid.
    pub fn get_offset(&self, cell: Cell, d_row: i64, d_col: i64) -> Option<(Cell, &T)> {
        let row = cell.0 as i64 + d_row;
        let col = cell.1 as i64 + d_col;
        if row < 0 || col < 0 {
            return None;
        }
        let next = (row as usize, col as usize);
        self.get(next.0, next.1).map(|value| (next, value))
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }

    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn cells(&self) -> impl Iterator<Item = (Cell, &T)> + '_ {
        let cols = self.cols.max(1);
        self.data
            .iter()
            .enumerate()
            .map(move |(idx, value)| ((idx / cols, idx % cols), value))
    }

    pub fn map<U>(&self, mut f: impl FnMut(Cell, &T) -> U) -> Grid<U> {
        let cols = self.cols.max(1);
        Grid {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .enumerate()
                .map(|(idx, value)| f((idx / cols, idx % cols), value))
                .collect(),
        }
    }
}

impl<T> Index<Cell> for Grid<T> {
    type Output = T;

    fn index(&self, (row, col): Cell) -> &T {
        &self.data[row * self.cols + col]
    }
}

impl<T> IndexMut<Cell> for Grid<T> {
    fn index_mut(&mut self, (row, col): Cell) -> &mut T {
        &mut self.data[row * self.cols + col]
    }
}

/// Affine transform from grid (row, col) to world (x, y), GDAL style.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Usually negative: rows grow southward.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Projected transform with square `cell_size_m` pixels, north-up.
    pub fn north_up(origin_x: f64, origin_y: f64, cell_size_m: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width: cell_size_m,
            pixel_height: -cell_size_m,
        }
    }

    /// Degree-based transform whose pixels span roughly `cell_size_m` at the
    /// origin latitude.
    pub fn geographic(origin_lon: f64, origin_lat: f64, cell_size_m: f64) -> Self {
        Self {
            origin_x: origin_lon,
            origin_y: origin_lat,
            pixel_width: cell_size_m / meters_per_deg_lon(origin_lat).max(1e-9),
            pixel_height: -cell_size_m / meters_per_deg_lat(origin_lat).max(1e-9),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.origin_x.is_finite()
            && self.origin_y.is_finite()
            && self.pixel_width.is_finite()
            && self.pixel_height.is_finite()
            && self.pixel_width.abs() > 0.0
            && self.pixel_height.abs() > 0.0
    }
}

/// Shape + transform shared by every raster in one generation run.
///
/// Besides world coordinates the frame defines a local metric plane:
/// `x` grows with column, `y` grows with row, both in meters from the
/// raster's top-left corner. All geometry is done in that plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterFrame {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub cell_size_m: f64,
}

impl RasterFrame {
    pub fn cell_area_m2(&self) -> f64 {
        self.cell_size_m * self.cell_size_m
    }

    pub fn width_m(&self) -> f64 {
        self.cols as f64 * self.cell_size_m
    }

    pub fn height_m(&self) -> f64 {
        self.rows as f64 * self.cell_size_m
    }

    /// Meters moved northward per +1 row.
    pub fn north_per_row_m(&self) -> f64 {
        if self.transform.pixel_height < 0.0 {
            -self.cell_size_m
        } else {
            self.cell_size_m
        }
    }

    /// Meters moved eastward per +1 column.
    pub fn east_per_col_m(&self) -> f64 {
        if self.transform.pixel_width < 0.0 {
            -self.cell_size_m
        } else {
            self.cell_size_m
        }
    }

    pub fn to_local(&self, world: &Point) -> Point {
        let t = &self.transform;
        Point::new(
            (world.x - t.origin_x) / t.pixel_width * self.cell_size_m,
            (world.y - t.origin_y) / t.pixel_height * self.cell_size_m,
        )
    }

    pub fn to_world(&self, local: &Point) -> Point {
        let t = &self.transform;
        Point::new(
            t.origin_x + local.x / self.cell_size_m * t.pixel_width,
            t.origin_y + local.y / self.cell_size_m * t.pixel_height,
        )
    }

    pub fn cell_center(&self, (row, col): Cell) -> Point {
        Point::new(
            (col as f64 + 0.5) * self.cell_size_m,
            (row as f64 + 0.5) * self.cell_size_m,
        )
    }

    /// Cell containing a local point, if on the raster.
    pub fn cell_at(&self, local: &Point) -> Option<Cell> {
        if !local.is_finite() {
            return None;
        }
        let col = (local.x / self.cell_size_m).floor();
        let row = (local.y / self.cell_size_m).floor();
        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Nearest cell to a local point, clamped onto the raster.
    pub fn nearest_cell(&self, local: &Point) -> Cell {
        let max_row = self.rows.saturating_sub(1) as f64;
        let max_col = self.cols.saturating_sub(1) as f64;
        let col = (local.x / self.cell_size_m).floor().clamp(0.0, max_col);
        let row = (local.y / self.cell_size_m).floor().clamp(0.0, max_row);
        (row as usize, col as usize)
    }

    /// Row and column index ranges of the cells whose centers fall in a
    /// local-plane box, before clamping to the raster. Ranges may be empty.
    pub fn cell_span(&self, min: &Point, max: &Point) -> ((i64, i64), (i64, i64)) {
        let cs = self.cell_size_m;
        let col0 = (min.x / cs - 0.5).ceil() as i64;
        let col1 = (max.x / cs - 0.5).floor() as i64 + 1;
        let row0 = (min.y / cs - 0.5).ceil() as i64;
        let row1 = (max.y / cs - 0.5).floor() as i64 + 1;
        ((row0, row1), (col0, col1))
    }

    /// Cells whose centers fall in a local-plane box, clamped to the raster.
    pub fn cells_in_box(&self, min: &Point, max: &Point) -> impl Iterator<Item = Cell> {
        let ((row0, row1), (col0, col1)) = self.cell_span(min, max);
        let clamp_idx = |v: i64, n: usize| -> usize { v.clamp(0, n as i64) as usize };
        let (row0, row1) = (clamp_idx(row0, self.rows), clamp_idx(row1, self.rows));
        let (col0, col1) = (clamp_idx(col0, self.cols), clamp_idx(col1, self.cols));
        (row0..row1).flat_map(move |row| (col0..col1).map(move |col| (row, col)))
    }
}

/// Elevation samples plus their frame. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationRaster {
    pub transform: GeoTransform,
    pub cell_size_m: f64,
    pub elevations: Grid<f64>,
    #[serde(default)]
    pub nodata: Option<f64>,
}

impl ElevationRaster {
    pub fn new(
        transform: GeoTransform,
        cell_size_m: f64,
        elevations: Grid<f64>,
        nodata: Option<f64>,
    ) -> Result<Self, LayoutError> {
        let raster = Self {
            transform,
            cell_size_m,
            elevations,
            nodata,
        };
        raster.validate()?;
        Ok(raster)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.elevations.rows() < 3 || self.elevations.cols() < 3 {
            return Err(LayoutError::InvalidInput(format!(
                "elevation raster is {}x{}, need at least 3x3",
                self.elevations.rows(),
                self.elevations.cols()
            )));
        }
        let expected = self.elevations.rows().saturating_mul(self.elevations.cols());
        if self.elevations.len() != expected {
            return Err(LayoutError::InvalidInput(format!(
                "elevation raster has {} values, expected {}x{}",
                self.elevations.len(),
                self.elevations.rows(),
                self.elevations.cols()
            )));
        }
        if !self.cell_size_m.is_finite() || self.cell_size_m <= 0.0 {
            return Err(LayoutError::InvalidInput(format!(
                "cell size must be positive, got {}",
                self.cell_size_m
            )));
        }
        if !self.transform.is_valid() {
            return Err(LayoutError::InvalidInput(
                "elevation transform has zero or non-finite pixel size".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame(&self) -> RasterFrame {
        RasterFrame {
            rows: self.elevations.rows(),
            cols: self.elevations.cols(),
            transform: self.transform,
            cell_size_m: self.cell_size_m,
        }
    }

    pub fn is_valid_value(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.nodata {
            Some(nodata) => (value - nodata).abs() > f64::EPSILON,
            None => true,
        }
    }

    pub fn value_at(&self, cell: Cell) -> Option<f64> {
        let value = *self.elevations.get(cell.0, cell.1)?;
        self.is_valid_value(value).then_some(value)
    }

    /// Bilinear elevation at a local-plane point, clamped to the raster.
    /// Nodata corners are ignored; returns None only if all four are nodata.
    pub fn sample(&self, local: &Point) -> Option<f64> {
        if !local.is_finite() {
            return None;
        }
        let rows = self.elevations.rows();
        let cols = self.elevations.cols();
        let max_y = (rows - 1) as f64;
        let max_x = (cols - 1) as f64;
        let x = (local.x / self.cell_size_m - 0.5).clamp(0.0, max_x);
        let y = (local.y / self.cell_size_m - 0.5).clamp(0.0, max_y);

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(rows - 1);
        let x1 = (x0 + 1).min(cols - 1);
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        let corners = [
            (self.value_at((y0, x0)), (1.0 - dx) * (1.0 - dy)),
            (self.value_at((y0, x1)), dx * (1.0 - dy)),
            (self.value_at((y1, x0)), (1.0 - dx) * dy),
            (self.value_at((y1, x1)), dx * dy),
        ];
        let mut sum = 0.0;
        let mut weight = 0.0;
        let mut any = false;
        for (value, w) in corners {
            if let Some(value) = value {
                sum += value * w;
                weight += w;
                any = true;
            }
        }
        if !any {
            return None;
        }
        if weight <= 1e-12 {
            return corners.iter().find_map(|(value, _)| *value);
        }
        Some(sum / weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(rows: usize, cols: usize) -> ElevationRaster {
        let grid = Grid::from_fn(rows, cols, |_, col| col as f64);
        ElevationRaster::new(GeoTransform::north_up(1000.0, 2000.0, 10.0), 10.0, grid, None).unwrap()
    }

    #[test]
    fn world_local_round_trip_and_cells() {
        let raster = ramp(4, 5);
        let frame = raster.frame();
        let world = Point::new(1025.0, 1985.0);
        let local = frame.to_local(&world);
        assert!((local.x - 25.0).abs() < 1e-9);
        assert!((local.y - 15.0).abs() < 1e-9);
        assert_eq!(frame.cell_at(&local), Some((1, 2)));
        let back = frame.to_world(&local);
        assert!((back.x - world.x).abs() < 1e-9 && (back.y - world.y).abs() < 1e-9);
        assert_eq!(frame.cell_at(&Point::new(-1.0, 0.0)), None);
        assert_eq!(frame.north_per_row_m(), -10.0);
    }

    #[test]
    fn bilinear_sample_interpolates_between_centers() {
        let raster = ramp(4, 5);
        // Halfway between col 1 and col 2 centers.
        let value = raster.sample(&Point::new(20.0, 15.0)).unwrap();
        assert!((value - 1.5).abs() < 1e-9);
        // Clamped past the edge.
        assert_eq!(raster.sample(&Point::new(-50.0, 0.0)), Some(0.0));
    }

    #[test]
    fn validate_rejects_short_sample_data() {
        let grid: Grid<f64> =
            serde_json::from_str(r#"{"rows":3,"cols":3,"data":[1.0,2.0]}"#).unwrap();
        let raster = ElevationRaster {
            transform: GeoTransform::north_up(0.0, 30.0, 10.0),
            cell_size_m: 10.0,
            elevations: grid,
            nodata: None,
        };
        assert!(matches!(raster.validate(), Err(LayoutError::InvalidInput(_))));
    }

    #[test]
    fn nodata_corners_are_skipped() {
        let mut grid = Grid::filled(3, 3, 5.0);
        grid[(1, 1)] = -9999.0;
        let raster = ElevationRaster::new(GeoTransform::north_up(0.0, 0.0, 1.0), 1.0, grid, Some(-9999.0)).unwrap();
        assert_eq!(raster.value_at((1, 1)), None);
        let value = raster.sample(&Point::new(1.2, 1.2)).unwrap();
        assert!((value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_tiny_or_mismatched_rasters() {
        assert!(Grid::from_vec(2, 2, vec![1.0; 3]).is_err());
        let grid = Grid::filled(2, 2, 0.0);
        assert!(ElevationRaster::new(GeoTransform::north_up(0.0, 0.0, 1.0), 1.0, grid, None).is_err());
    }

    #[test]
    fn cells_in_box_selects_centers() {
        let frame = ramp(10, 10).frame();
        let cells: Vec<Cell> = frame
            .cells_in_box(&Point::new(0.0, 0.0), &Point::new(20.0, 10.0))
            .collect();
        assert_eq!(cells, vec![(0, 0), (0, 1)]);
    }
}
