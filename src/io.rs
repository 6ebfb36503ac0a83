//! Traits and helpers for model I/O.

use std::io::{BufRead, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub(crate) const MODEL_MAGIC: u32 = 793_712_314;
pub(crate) const MODEL_VERSION: u32 = 12;

/// Read a model in binary format.
pub trait ReadModel
where
    Self: Sized,
{
    /// Read the model.
    fn read_model<R>(reader: &mut R) -> Result<Self>
    where
        R: BufRead;
}

/// Write a model in binary format.
pub trait WriteModel {
    /// Write the model.
    fn write_model<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write;
}

/// Read and verify the model signature.
pub(crate) fn check_signature<R>(reader: &mut R) -> Result<()>
where
    R: BufRead,
{
    let magic = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::read_error("Cannot read magic", e))?;
    if magic != MODEL_MAGIC {
        return Err(Error::Format(format!(
            "Expected {} as magic, got: {}",
            MODEL_MAGIC, magic
        )));
    }

    let version = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::read_error("Cannot read model version", e))?;
    if version > MODEL_VERSION {
        return Err(Error::Format(format!(
            "Expected {} as version, got: {}",
            MODEL_VERSION, version
        )));
    }

    Ok(())
}

/// Write the model signature.
pub(crate) fn write_signature<W>(writer: &mut W) -> Result<()>
where
    W: Write,
{
    writer
        .write_u32::<LittleEndian>(MODEL_MAGIC)
        .map_err(|e| Error::write_error("Cannot write magic", e))?;
    writer
        .write_u32::<LittleEndian>(MODEL_VERSION)
        .map_err(|e| Error::write_error("Cannot write model version", e))?;

    Ok(())
}
