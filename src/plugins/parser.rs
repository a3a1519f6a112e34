//! TES4 record header parsing.
//!
//! Every Bethesda plugin starts with a 24-byte TES4 record header followed
//! by `data_size` bytes of subrecords. Only the header record is read;
//! trailing bytes are ignored.

use super::{MasterRef, PluginHeader, PluginKind};
use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

const HEADER_LEN: usize = 24;

/// Parse the header of a plugin file on disk. The filename recorded on the
/// result is the file's name component.
pub fn parse_plugin_file(path: &Path) -> Result<PluginHeader> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file = std::fs::File::open(path)?;
    parse_plugin_header(&filename, file)
}

/// Parse a plugin header from an in-memory buffer.
pub fn parse_plugin_bytes(filename: &str, bytes: &[u8]) -> Result<PluginHeader> {
    parse_plugin_header(filename, bytes)
}

/// Parse a plugin header from a reader.
pub fn parse_plugin_header<R: Read>(filename: &str, mut reader: R) -> Result<PluginHeader> {
    let mut header = [0u8; HEADER_LEN];
    read_exact(&mut reader, &mut header, filename)?;

    let signature = &header[0..4];
    if !signature.iter().all(|b| (0x20..=0x7E).contains(b)) {
        return Err(Error::NotPlugin(filename.to_string()));
    }
    if signature != b"TES4" {
        return Err(Error::InvalidSignature(
            String::from_utf8_lossy(signature).to_string(),
        ));
    }

    let data_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let flags = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let _form_id = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let _timestamp = u32::from_le_bytes(header[16..20].try_into().unwrap());
    let form_version = u16::from_le_bytes(header[20..22].try_into().unwrap());

    let mut body = vec![0u8; data_size as usize];
    read_exact(&mut reader, &mut body, filename)?;

    let mut result = PluginHeader {
        filename: filename.to_string(),
        kind: PluginHeader::derive_kind(filename, flags),
        is_master: flags & PluginHeader::FLAG_MASTER != 0,
        is_light: flags & PluginHeader::FLAG_LIGHT != 0,
        is_localized: flags & PluginHeader::FLAG_LOCALIZED != 0,
        author: None,
        description: None,
        masters: Vec::new(),
        form_version,
        num_records: 0,
        version: 0.0,
    };

    parse_subrecords(&body, filename, &mut result)?;

    Ok(result)
}

fn parse_subrecords(body: &[u8], filename: &str, result: &mut PluginHeader) -> Result<()> {
    let mut offset = 0usize;
    // Index of the master a directly following DATA subrecord applies to.
    let mut pending_master: Option<usize> = None;

    while offset + 6 <= body.len() {
        let tag: [u8; 4] = body[offset..offset + 4].try_into().unwrap();
        let len = u16::from_le_bytes(body[offset + 4..offset + 6].try_into().unwrap()) as usize;
        offset += 6;

        if offset + len > body.len() {
            return Err(Error::Truncated(filename.to_string()));
        }
        let data = &body[offset..offset + len];
        offset += len;

        match &tag {
            b"HEDR" => {
                pending_master = None;
                if data.len() >= 8 {
                    result.version = f32::from_le_bytes(data[0..4].try_into().unwrap());
                    result.num_records = u32::from_le_bytes(data[4..8].try_into().unwrap());
                }
            }
            b"CNAM" => {
                pending_master = None;
                result.author = Some(zstring(data));
            }
            b"SNAM" => {
                pending_master = None;
                result.description = Some(zstring(data));
            }
            b"MAST" => {
                result.masters.push(MasterRef {
                    filename: zstring(data),
                    recorded_size: None,
                });
                pending_master = Some(result.masters.len() - 1);
            }
            b"DATA" => {
                if let Some(idx) = pending_master.take() {
                    if data.len() >= 8 {
                        result.masters[idx].recorded_size =
                            Some(u64::from_le_bytes(data[0..8].try_into().unwrap()));
                    }
                }
            }
            _ => {
                pending_master = None;
            }
        }
    }

    Ok(())
}

/// Null-terminated string, lossily decoded.
fn zstring(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], filename: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Truncated(filename.to_string())
        } else {
            Error::Io(e)
        }
    })
}
