use crate::error::{Error, Result};

/// A batch of equally sized 2-D maps stored row-major, sample after sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MapBatch<T> {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<T>,
}

/// Integer class ids per cell.
pub type LabelBatch = MapBatch<i32>;
/// Real-valued maps: 0/1 target masks or sigmoid probabilities.
pub type MaskBatch = MapBatch<f64>;

impl<T: Copy> MapBatch<T> {
    pub fn new(batch: usize, height: usize, width: usize, data: Vec<T>) -> Result<MapBatch<T>> {
        if data.len() != batch * height * width {
            return Err(Error::Shape(format!(
                "{} maps of {}x{} need {} cells, got {}",
                batch,
                height,
                width,
                batch * height * width,
                data.len()
            )));
        }
        Ok(MapBatch { batch, height, width, data })
    }

    pub fn filled(batch: usize, height: usize, width: usize, value: T) -> MapBatch<T> {
        MapBatch { batch, height, width, data: vec![value; batch * height * width] }
    }

    /// Builds a batch from nested `[sample][row][col]` vectors.
    pub fn from_maps(maps: &[Vec<Vec<T>>]) -> Result<MapBatch<T>> {
        let height = maps.first().map_or(0, |m| m.len());
        let width = maps.first().and_then(|m| m.first()).map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(maps.len() * height * width);
        for map in maps {
            if map.len() != height || map.iter().any(|row| row.len() != width) {
                return Err(Error::Shape(format!(
                    "all maps in a batch must be {}x{}",
                    height, width
                )));
            }
            for row in map {
                data.extend_from_slice(row);
            }
        }
        MapBatch::new(maps.len(), height, width, data)
    }

    pub fn len(&self) -> usize {
        self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.batch == 0
    }

    pub fn cells_per_sample(&self) -> usize {
        self.height * self.width
    }

    pub fn sample(&self, index: usize) -> &[T] {
        let n = self.cells_per_sample();
        &self.data[index * n..(index + 1) * n]
    }

    pub fn get(&self, n: usize, y: usize, x: usize) -> T {
        self.data[(n * self.height + y) * self.width + x]
    }

    pub fn same_dims<U>(&self, other: &MapBatch<U>) -> bool {
        self.batch == other.batch && self.height == other.height && self.width == other.width
    }

    pub fn map<U, F>(&self, functor: F) -> MapBatch<U>
    where
        F: Fn(T) -> U,
    {
        MapBatch {
            batch: self.batch,
            height: self.height,
            width: self.width,
            data: self.data.iter().map(|&v| functor(v)).collect(),
        }
    }

    /// Removes `margin` cells from each of the four borders of every map.
    pub fn crop(&self, margin: usize) -> Result<MapBatch<T>> {
        if self.height <= 2 * margin || self.width <= 2 * margin {
            return Err(Error::Shape(format!(
                "cannot crop {} cells from each side of a {}x{} map",
                margin, self.height, self.width
            )));
        }
        let (oh, ow) = (self.height - 2 * margin, self.width - 2 * margin);
        let mut data = Vec::with_capacity(self.batch * oh * ow);
        for n in 0..self.batch {
            for y in margin..self.height - margin {
                let start = (n * self.height + y) * self.width + margin;
                data.extend_from_slice(&self.data[start..start + ow]);
            }
        }
        Ok(MapBatch { batch: self.batch, height: oh, width: ow, data })
    }
}

impl MapBatch<f64> {
    /// Discretizes probabilities: 1 where the value exceeds `threshold`, else 0.
    pub fn threshold(&self, threshold: f64) -> LabelBatch {
        self.map(|v| i32::from(v > threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_maps_rejects_ragged_rows() {
        let maps = vec![vec![vec![0, 1], vec![1]]];
        assert!(MapBatch::from_maps(&maps).is_err());
    }

    #[test]
    fn crop_trims_every_sample() {
        let maps: Vec<Vec<Vec<i32>>> = (0..2)
            .map(|s| (0..5).map(|y| (0..5).map(|x| s * 100 + y * 10 + x).collect()).collect())
            .collect();
        let batch = MapBatch::from_maps(&maps).unwrap();
        let cropped = batch.crop(1).unwrap();
        assert_eq!((cropped.batch, cropped.height, cropped.width), (2, 3, 3));
        assert_eq!(cropped.get(0, 0, 0), 11);
        assert_eq!(cropped.get(1, 2, 2), 133);
    }

    #[test]
    fn threshold_is_strict() {
        let probs = MapBatch::new(1, 1, 3, vec![0.2, 0.5, 0.9]).unwrap();
        assert_eq!(probs.threshold(0.5).data, vec![0, 0, 1]);
    }
}
