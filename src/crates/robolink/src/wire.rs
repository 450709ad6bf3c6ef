//! Binary encoding shared by the client transport and the fake engine.
//!
//! Every scalar is big-endian. Lines are UTF-8 terminated by a single LF.
//! Matrices travel column-major; a pose is sixteen doubles with no header.

use std::io::{self, BufRead, Read, Write};

use crate::error::{LinkError, LinkResult};
use crate::math::Matrix;

/// Bytes occupied by a pose on the wire.
pub const POSE_BYTES: usize = 16 * 8;

/// Upper bound on any element count announced by the peer.
///
/// Guards against allocating from a corrupted length prefix.
pub const MAX_ELEMENTS: usize = 1 << 24;

/// Write `text` as one line, replacing embedded LFs with spaces.
pub fn write_line<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    let mut bytes = text.replace('\n', " ").into_bytes();
    bytes.push(b'\n');
    w.write_all(&bytes)
}

pub fn write_i32<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_be_bytes())
}

/// Item handles are unsigned 64-bit; 0 means "no item".
pub fn write_handle<W: Write>(w: &mut W, raw: u64) -> io::Result<()> {
    w.write_all(&raw.to_be_bytes())
}

pub fn write_f64<W: Write>(w: &mut W, value: f64) -> io::Result<()> {
    w.write_all(&value.to_be_bytes())
}

/// Count prefix followed by the doubles.
pub fn write_array<W: Write>(w: &mut W, values: &[f64]) -> io::Result<()> {
    write_i32(w, wire_len(values.len())?)?;
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    w.write_all(&bytes)
}

/// `rows`, `cols`, then the values column-major.
pub fn write_matrix<W: Write>(w: &mut W, matrix: &Matrix) -> io::Result<()> {
    write_i32(w, wire_len(matrix.rows())?)?;
    write_i32(w, wire_len(matrix.cols())?)?;
    let mut bytes = Vec::with_capacity(matrix.rows() * matrix.cols() * 8);
    for value in matrix.to_column_major() {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    w.write_all(&bytes)
}

/// Sixteen column-major doubles written in a single call.
///
/// The caller is responsible for checking the pose is 4×4.
pub fn write_pose<W: Write>(w: &mut W, pose: &Matrix) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(POSE_BYTES);
    for value in pose.to_column_major() {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    if bytes.len() != POSE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pose must be 4x4, got {}x{}", pose.rows(), pose.cols()),
        ));
    }
    w.write_all(&bytes)
}

fn wire_len(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {len} does not fit the wire format"),
        )
    })
}

/// Map a raw read failure to the link taxonomy. EOF means the peer hung up.
pub fn read_error(err: io::Error) -> LinkError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        LinkError::ConnectionClosed
    } else {
        LinkError::Io(err)
    }
}

/// Read up to LF (exclusive), dropping one trailing CR.
pub fn read_line<R: BufRead>(r: &mut R) -> LinkResult<String> {
    let mut bytes = Vec::new();
    let n = r.read_until(b'\n', &mut bytes).map_err(read_error)?;
    if n == 0 || bytes.last() != Some(&b'\n') {
        return Err(LinkError::ConnectionClosed);
    }
    bytes.pop();
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|err| LinkError::protocol(format!("line is not UTF-8: {err}")))
}

fn read_exact<R: Read, const N: usize>(r: &mut R) -> LinkResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(read_error)?;
    Ok(buf)
}

pub fn read_i32<R: Read>(r: &mut R) -> LinkResult<i32> {
    Ok(i32::from_be_bytes(read_exact(r)?))
}

pub fn read_handle<R: Read>(r: &mut R) -> LinkResult<u64> {
    Ok(u64::from_be_bytes(read_exact(r)?))
}

pub fn read_f64<R: Read>(r: &mut R) -> LinkResult<f64> {
    Ok(f64::from_be_bytes(read_exact(r)?))
}

/// Element count prefix: negative or oversized counts are protocol violations.
pub fn read_count<R: Read>(r: &mut R, what: &str) -> LinkResult<usize> {
    let raw = read_i32(r)?;
    let count = usize::try_from(raw)
        .map_err(|_| LinkError::protocol(format!("negative {what} count {raw}")))?;
    if count > MAX_ELEMENTS {
        return Err(LinkError::protocol(format!("{what} count {count} is too large")));
    }
    Ok(count)
}

fn read_doubles<R: Read>(r: &mut R, count: usize) -> LinkResult<Vec<f64>> {
    let mut bytes = vec![0u8; count * 8];
    r.read_exact(&mut bytes).map_err(read_error)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_be_bytes(raw)
        })
        .collect())
}

/// Count-prefixed double array. A zero count yields an empty vector.
pub fn read_array<R: Read>(r: &mut R) -> LinkResult<Vec<f64>> {
    let count = read_count(r, "array")?;
    read_doubles(r, count)
}

pub fn read_matrix<R: Read>(r: &mut R) -> LinkResult<Matrix> {
    let rows = read_count(r, "matrix row")?;
    let cols = read_count(r, "matrix column")?;
    if rows.saturating_mul(cols) > MAX_ELEMENTS {
        return Err(LinkError::protocol(format!("matrix {rows}x{cols} is too large")));
    }
    let values = read_doubles(r, rows * cols)?;
    Ok(Matrix::from_column_major(rows, cols, &values)?)
}

pub fn read_pose<R: Read>(r: &mut R) -> LinkResult<Matrix> {
    let values = read_doubles(r, 16)?;
    Ok(Matrix::from_column_major(4, 4, &values)?)
}

/// Handle followed by its type code.
pub fn read_item<R: Read>(r: &mut R) -> LinkResult<(u64, i32)> {
    let raw = read_handle(r)?;
    let kind = read_i32(r)?;
    Ok((raw, kind))
}
