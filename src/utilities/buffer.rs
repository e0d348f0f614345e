//! Helpers for fixed size buffers and nul padded fields.

pub trait CollectSlice: Iterator {
    /// Collects an iterator into a given slice, returning the number of collected items.
    fn collect_slice(&mut self, slice: &mut [Self::Item]) -> usize;
}

pub trait TryCollectSlice: Iterator {
    type Element;
    type Error;

    /// Attempts to collect an iterator into a given slice, returning the number of collected items.
    fn try_collect_slice(&mut self, slice: &mut [Self::Element]) -> Result<usize, Self::Error>;
}

impl<I: Iterator> CollectSlice for I {
    fn collect_slice(&mut self, slice: &mut [Self::Item]) -> usize {
        slice.iter_mut().zip(self).fold(0, |count, (dest, item)| {
            *dest = item;
            count + 1
        })
    }
}

impl<I, T, E> TryCollectSlice for I
where
    I: Iterator<Item = Result<T, E>>,
{
    type Element = T;
    type Error = E;
    fn try_collect_slice(&mut self, slice: &mut [Self::Element]) -> Result<usize, Self::Error> {
        slice.iter_mut().zip(self).try_fold(0, |count, (dest, item)| {
            *dest = item?;
            Ok(count + 1)
        })
    }
}

/// Copies `text` into a nul padded field, truncating if it doesn't fit.
pub fn pad_field<const N: usize>(text: &[u8]) -> [u8; N] {
    let mut field = [0u8; N];
    text.iter().copied().collect_slice(&mut field);
    field
}

/// The part of a nul padded field before the first nul.
pub fn trim_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|byte| *byte == 0).unwrap_or(field.len());
    &field[..end]
}
