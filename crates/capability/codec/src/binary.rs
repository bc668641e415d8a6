//! 小端二进制记录（归档文件中的定长记录）。

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use domain::CanonicalRecord;

use crate::error::CodecError;
use crate::layout::{RecordLayout, Slot, TypeCode};

/// 打包一条记录，长度恒等于 `layout.byte_length()`。
pub fn pack_record(record: &CanonicalRecord, layout: &RecordLayout) -> Result<Vec<u8>, CodecError> {
    let slots = layout.flatten(record)?;
    let mut buf = Vec::with_capacity(layout.byte_length());
    for (slot, code) in slots.iter().zip(layout.codes()) {
        write_slot(&mut buf, slot, *code)?;
    }
    Ok(buf)
}

/// 解包一条定长记录。
pub fn unpack_record(bytes: &[u8], layout: &RecordLayout) -> Result<CanonicalRecord, CodecError> {
    if bytes.len() != layout.byte_length() {
        return Err(CodecError::LengthMismatch {
            declared: layout.byte_length(),
            computed: bytes.len(),
        });
    }
    let mut reader = Cursor::new(bytes);
    let mut slots = Vec::with_capacity(layout.codes().len());
    for code in layout.codes() {
        slots.push(read_slot(&mut reader, *code)?);
    }
    layout.assemble(slots)
}

fn write_slot(buf: &mut Vec<u8>, slot: &Slot, code: TypeCode) -> Result<(), CodecError> {
    match (slot, code) {
        (Slot::Int(v), TypeCode::I8) => buf.write_i8(*v as i8)?,
        (Slot::Int(v), TypeCode::U8) => buf.write_u8(*v as u8)?,
        (Slot::Int(v), TypeCode::I16) => buf.write_i16::<LittleEndian>(*v as i16)?,
        (Slot::Int(v), TypeCode::U16) => buf.write_u16::<LittleEndian>(*v as u16)?,
        (Slot::Int(v), TypeCode::I32) => buf.write_i32::<LittleEndian>(*v as i32)?,
        (Slot::Int(v), TypeCode::U32) => buf.write_u32::<LittleEndian>(*v as u32)?,
        (Slot::Int(v), TypeCode::I64) => buf.write_i64::<LittleEndian>(*v)?,
        (Slot::Int(v), TypeCode::U64) => buf.write_u64::<LittleEndian>(*v as u64)?,
        (Slot::Float(v), TypeCode::F32) => buf.write_f32::<LittleEndian>(*v as f32)?,
        (Slot::Float(v), TypeCode::F64) => buf.write_f64::<LittleEndian>(*v)?,
        // 长度已在展平时校验，不足部分补 NUL
        (Slot::Text(text), TypeCode::Char | TypeCode::Str(_)) => {
            let width = code.size();
            buf.extend_from_slice(text.as_bytes());
            buf.resize(buf.len() + width.saturating_sub(text.len()), 0);
        }
        (slot, code) => {
            return Err(CodecError::LayoutMismatch(format!(
                "cannot pack {slot:?} as {code:?}"
            )));
        }
    }
    Ok(())
}

fn read_slot(reader: &mut Cursor<&[u8]>, code: TypeCode) -> Result<Slot, CodecError> {
    Ok(match code {
        TypeCode::I8 => Slot::Int(reader.read_i8()? as i64),
        TypeCode::U8 => Slot::Int(reader.read_u8()? as i64),
        TypeCode::I16 => Slot::Int(reader.read_i16::<LittleEndian>()? as i64),
        TypeCode::U16 => Slot::Int(reader.read_u16::<LittleEndian>()? as i64),
        TypeCode::I32 => Slot::Int(reader.read_i32::<LittleEndian>()? as i64),
        TypeCode::U32 => Slot::Int(reader.read_u32::<LittleEndian>()? as i64),
        TypeCode::I64 => Slot::Int(reader.read_i64::<LittleEndian>()?),
        TypeCode::U64 => Slot::Int(reader.read_u64::<LittleEndian>()? as i64),
        TypeCode::F32 => Slot::Float(reader.read_f32::<LittleEndian>()? as f64),
        TypeCode::F64 => Slot::Float(reader.read_f64::<LittleEndian>()?),
        TypeCode::Char | TypeCode::Str(_) => {
            let mut raw = vec![0u8; code.size()];
            reader.read_exact(&mut raw)?;
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            Slot::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
    })
}
