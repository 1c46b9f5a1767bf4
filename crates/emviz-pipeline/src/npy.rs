//! Minimal `.npy` reader/writer for float vectors.
//!
//! Embeddings are stored one vector per object. Multi-dimensional arrays are
//! read in C order and flattened.

use thiserror::Error;

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NpyError {
    #[error("not an npy file")]
    BadMagic,
    #[error("unsupported npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("truncated npy data")]
    Truncated,
    #[error("malformed npy header: {0}")]
    Header(String),
    #[error("unsupported dtype {0:?}")]
    UnsupportedDtype(String),
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F4Le,
    F4Be,
    F8Le,
    F8Be,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        match descr {
            "<f4" => Ok(Dtype::F4Le),
            ">f4" => Ok(Dtype::F4Be),
            "<f8" => Ok(Dtype::F8Le),
            ">f8" => Ok(Dtype::F8Be),
            other => Err(NpyError::UnsupportedDtype(other.to_string())),
        }
    }

    fn width(&self) -> usize {
        match self {
            Dtype::F4Le | Dtype::F4Be => 4,
            Dtype::F8Le | Dtype::F8Be => 8,
        }
    }

    fn read(&self, b: &[u8]) -> f64 {
        match self {
            Dtype::F4Le => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Dtype::F4Be => f64::from(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            Dtype::F8Le => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            Dtype::F8Be => f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        }
    }
}

/// Encodes a 1-D little-endian `float32` array (format version 1.0).
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    let preamble = MAGIC.len() + 2 + 2;
    let unpadded = preamble + header.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.extend(std::iter::repeat(' ').take(pad));
    header.push('\n');

    let mut out = Vec::with_capacity(preamble + header.len() + values.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes a float array of any shape into a flat vector.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f64>, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let major = bytes[MAGIC.len()];
    let minor = bytes[MAGIC.len() + 1];
    let len_at = MAGIC.len() + 2;
    let (header_len, header_at) = match major {
        1 => {
            let raw = bytes.get(len_at..len_at + 2).ok_or(NpyError::Truncated)?;
            (usize::from(u16::from_le_bytes([raw[0], raw[1]])), len_at + 2)
        }
        2 | 3 => {
            let raw = bytes.get(len_at..len_at + 4).ok_or(NpyError::Truncated)?;
            let n = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            (n as usize, len_at + 4)
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };
    let data_at = header_at
        .checked_add(header_len)
        .ok_or(NpyError::Truncated)?;
    let header = bytes.get(header_at..data_at).ok_or(NpyError::Truncated)?;
    let header = std::str::from_utf8(header)
        .map_err(|_| NpyError::Header("header is not utf-8".to_string()))?;

    let dtype = Dtype::parse(&quoted_value(header, "descr")?)?;
    if bare_value(header, "fortran_order")? == "True" {
        return Err(NpyError::FortranOrder);
    }
    let count = shape_len(header)?;

    let width = dtype.width();
    let end = count
        .checked_mul(width)
        .and_then(|need| data_at.checked_add(need))
        .ok_or(NpyError::Truncated)?;
    let data = bytes.get(data_at..end).ok_or(NpyError::Truncated)?;
    Ok(data.chunks_exact(width).map(|c| dtype.read(c)).collect())
}

fn value_start<'a>(header: &'a str, field: &str) -> Result<&'a str, NpyError> {
    let needle = format!("'{field}':");
    let at = header
        .find(&needle)
        .ok_or_else(|| NpyError::Header(format!("missing {field}")))?;
    Ok(header[at + needle.len()..].trim_start())
}

fn quoted_value(header: &str, field: &str) -> Result<String, NpyError> {
    let rest = value_start(header, field)?;
    let rest = rest
        .strip_prefix('\'')
        .ok_or_else(|| NpyError::Header(format!("{field} is not a string")))?;
    let end = rest
        .find('\'')
        .ok_or_else(|| NpyError::Header(format!("unterminated {field}")))?;
    Ok(rest[..end].to_string())
}

fn bare_value<'a>(header: &'a str, field: &str) -> Result<&'a str, NpyError> {
    let rest = value_start(header, field)?;
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Ok(rest[..end].trim())
}

fn shape_len(header: &str) -> Result<usize, NpyError> {
    let rest = value_start(header, "shape")?;
    let rest = rest
        .strip_prefix('(')
        .ok_or_else(|| NpyError::Header("shape is not a tuple".to_string()))?;
    let end = rest
        .find(')')
        .ok_or_else(|| NpyError::Header("unterminated shape".to_string()))?;
    let mut count: usize = 1;
    for dim in rest[..end].split(',').map(str::trim).filter(|d| !d.is_empty()) {
        let n: usize = dim
            .parse()
            .map_err(|_| NpyError::Header(format!("bad dimension {dim:?}")))?;
        count = count
            .checked_mul(n)
            .ok_or_else(|| NpyError::Header("shape overflows".to_string()))?;
    }
    Ok(count)
}
