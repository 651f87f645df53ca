use std::{
    any::type_name,
    ops::{Add, Rem, Sub},
};

use zerocopy::FromBytes;

use crate::ReadError;

/// Read a `T` from the start of `data`.
pub fn read<T: FromBytes + Copy>(data: &[u8]) -> Result<T, ReadError> {
    T::read_from_prefix(data)
        .map_err(|_| ReadError(type_name::<T>().to_string()))
        .map(|(value, _)| value)
}

/// Read a `T` at `offset` in `data`, failing instead of panicking when the offset is out of range.
pub fn read_at<T: FromBytes + Copy>(data: &[u8], offset: u64) -> Result<T, ReadError> {
    let tail = usize::try_from(offset).ok().and_then(|offset| data.get(offset..));
    match tail {
        Some(tail) => read::<T>(tail),
        None => Err(ReadError(format!("{} at {:#x} (size {:#x})", type_name::<T>(), offset, data.len()))),
    }
}

/// Borrow `length` bytes at `offset` in `data`.
pub fn slice_at(data: &[u8], offset: u64, length: u64) -> Result<&[u8], ReadError> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(usize::try_from(offset).ok()?..usize::try_from(end).ok()?))
        .ok_or_else(|| {
            ReadError(format!("{:#x} bytes at {:#x} (size {:#x})", length, offset, data.len()))
        })
}

pub fn aligned_to<T: Add<Output = T> + Sub<Output = T> + Rem<Output = T> + Eq + Copy + Default>(
    value: T, alignment: T,
) -> T {
    if alignment == T::default() || value % alignment == T::default() {
        return value;
    }
    value + alignment - (value % alignment)
}

/// Overwrite `data` at `offset` with `bytes`.
pub fn write_at(data: &mut [u8], offset: usize, bytes: &[u8]) {
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}
