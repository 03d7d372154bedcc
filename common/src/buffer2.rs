//! Row-major 2D buffer used for images, stamps and pixel masks.

use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn same_shape<U>(&self, other: &Buffer2<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn rows(&self) -> slice::ChunksExact<'_, T> {
        self.pixels.chunks_exact(self.width.max(1))
    }

    #[inline]
    pub fn rows_mut(&mut self) -> slice::ChunksExactMut<'_, T> {
        self.pixels.chunks_exact_mut(self.width.max(1))
    }

    /// Apply `f` to every pixel, producing a buffer of the same shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn fill(&mut self, value: T) {
        self.pixels.fill(value);
    }

    /// Copy the `width × height` region whose top-left corner is `(x0, y0)`.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        assert!(
            x0 + width <= self.width && y0 + height <= self.height,
            "crop region {width}x{height}+{x0}+{y0} exceeds {}x{}",
            self.width,
            self.height
        );
        let mut pixels = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            let start = y * self.width + x0;
            pixels.extend_from_slice(&self.pixels[start..start + width]);
        }
        Self {
            pixels,
            width,
            height,
        }
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self::new_filled(width, height, T::default())
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

impl<T> DerefMut for Buffer2<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pixels
    }
}

impl<'a, T> IntoIterator for &'a Buffer2<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}

impl<T> From<Buffer2<T>> for Vec<T> {
    #[inline]
    fn from(buffer: Buffer2<T>) -> Self {
        buffer.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let buf = Buffer2::from_fn(3, 2, |x, y| x + 10 * y);
        assert_eq!(buf.pixels(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(buf[(2, 1)], 12);
        assert_eq!(*buf.get(1, 1), 11);
    }

    #[test]
    fn test_rows() {
        let buf = Buffer2::new(2, 3, vec![1, 2, 3, 4, 5, 6]);
        let rows: Vec<&[i32]> = buf.rows().collect();
        assert_eq!(rows, vec![&[1, 2][..], &[3, 4][..], &[5, 6][..]]);
        assert_eq!(buf.row(1), &[3, 4]);
    }

    #[test]
    fn test_crop_interior() {
        // 4x3:
        //  0  1  2  3
        // 10 11 12 13
        // 20 21 22 23
        let buf = Buffer2::from_fn(4, 3, |x, y| x + 10 * y);
        let sub = buf.crop(1, 1, 2, 2);
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.height(), 2);
        assert_eq!(sub.pixels(), &[11, 12, 21, 22]);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_crop_out_of_bounds_panics() {
        let buf = Buffer2::new_filled(4, 3, 0u8);
        buf.crop(3, 0, 2, 1);
    }

    #[test]
    fn test_map_keeps_shape() {
        let buf = Buffer2::new(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]);
        let doubled = buf.map(|v| *v as f64 * 2.0);
        assert!(doubled.same_shape(&buf));
        assert_eq!(doubled.pixels(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_fill_and_default() {
        let mut buf: Buffer2<f32> = Buffer2::new_default(2, 2);
        assert!(buf.iter().all(|&v| v == 0.0));
        buf.fill(7.0);
        assert!(buf.iter().all(|&v| v == 7.0));
    }
}
