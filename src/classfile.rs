//! Structural reader for JVM class files.
//!
//! Only the parts needed to find annotation types are decoded: the constant
//! pool, the class name, the field and method tables, and the
//! `Runtime{Visible,Invisible}Annotations` attributes. Every other attribute,
//! including `Code`, `LineNumberTable` and `StackMapTable`, is skipped by its
//! declared length without being inspected. Annotation element values are walked
//! only to find where the next annotation starts.
//!
//! Events are pushed to an [`AnnotationVisitor`] as soon as they are decoded, so
//! annotations seen before a malformed section are still delivered.

use std::borrow::Cow;
use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;
const MAX_ELEMENT_NESTING: usize = 64;

const RUNTIME_VISIBLE: &str = "RuntimeVisibleAnnotations";
const RUNTIME_INVISIBLE: &str = "RuntimeInvisibleAnnotations";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFormatError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("truncated class file: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag { index: u16, tag: u8 },
    #[error("constant pool index {0} is not a UTF-8 entry")]
    NotUtf8(u16),
    #[error("constant pool index {0} is not a class entry")]
    NotClass(u16),
    #[error("unknown annotation element tag {0:#04x}")]
    BadElementTag(u8),
    #[error("annotation element values nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Receives annotation events in declaration order. All hooks default to no-ops
/// so implementors only override the targets they care about.
pub trait AnnotationVisitor {
    fn visit_class(&mut self, _internal_name: &str) {}

    fn visit_class_annotation(&mut self, _descriptor: &str, _visible: bool) {}

    fn visit_method_annotation(
        &mut self,
        _method: &str,
        _method_descriptor: &str,
        _descriptor: &str,
        _visible: bool,
    ) {
    }

    fn visit_field_annotation(
        &mut self,
        _field: &str,
        _field_descriptor: &str,
        _descriptor: &str,
        _visible: bool,
    ) {
    }
}

#[derive(Debug, Clone, Copy)]
enum Constant<'a> {
    Utf8(&'a [u8]),
    Class(u16),
    Other,
    /// Second slot of a Long or Double.
    Unusable,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFormatError::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ClassFormatError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

struct ConstantPool<'a> {
    entries: Vec<Constant<'a>>,
}

impl<'a> ConstantPool<'a> {
    fn read(reader: &mut Reader<'a>) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        // Index 0 is never valid.
        entries.push(Constant::Unusable);

        let mut index = 1u16;
        while index < count {
            let tag = reader.u8()?;
            let (entry, slots) = match tag {
                1 => {
                    let len = reader.u16()? as usize;
                    (Constant::Utf8(reader.take(len)?), 1)
                }
                7 => (Constant::Class(reader.u16()?), 1),
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    (Constant::Other, 1)
                }
                15 => {
                    reader.skip(3)?;
                    (Constant::Other, 1)
                }
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    (Constant::Other, 1)
                }
                5 | 6 => {
                    reader.skip(8)?;
                    (Constant::Other, 2)
                }
                _ => return Err(ClassFormatError::BadConstantTag { index, tag }),
            };
            entries.push(entry);
            if slots == 2 {
                entries.push(Constant::Unusable);
            }
            index = index.saturating_add(slots);
        }

        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> Result<Cow<'a, str>, ClassFormatError> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(bytes)) => Ok(decode_modified_utf8(*bytes)),
            _ => Err(ClassFormatError::NotUtf8(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<Cow<'a, str>, ClassFormatError> {
        match self.entries.get(index as usize) {
            Some(Constant::Class(name_index)) => self.utf8(*name_index),
            _ => Err(ClassFormatError::NotClass(index)),
        }
    }
}

/// Class files store strings as "modified UTF-8". Names and descriptors are
/// almost always plain ASCII, which decodes identically; anything else goes
/// through a lossy decode rather than failing the entry.
fn decode_modified_utf8(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn annotation_visibility(name: &str) -> Option<bool> {
    match name {
        RUNTIME_VISIBLE => Some(true),
        RUNTIME_INVISIBLE => Some(false),
        _ => None,
    }
}

/// Reads one class file and reports every class-, method- and field-level
/// annotation to `visitor`.
pub fn visit_annotations<V: AnnotationVisitor + ?Sized>(
    bytes: &[u8],
    visitor: &mut V,
) -> Result<(), ClassFormatError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    // minor_version, major_version
    reader.skip(4)?;

    let pool = ConstantPool::read(&mut reader)?;

    // access_flags
    reader.skip(2)?;
    let this_class = reader.u16()?;
    visitor.visit_class(pool.class_name(this_class)?.as_ref());
    // super_class
    reader.skip(2)?;
    let interfaces = reader.u16()? as usize;
    reader.skip(interfaces * 2)?;

    let fields = reader.u16()?;
    for _ in 0..fields {
        read_member(&mut reader, &pool, &mut |name, member_desc, desc, visible| {
            visitor.visit_field_annotation(name, member_desc, desc, visible)
        })?;
    }

    let methods = reader.u16()?;
    for _ in 0..methods {
        read_member(&mut reader, &pool, &mut |name, member_desc, desc, visible| {
            visitor.visit_method_annotation(name, member_desc, desc, visible)
        })?;
    }

    let attributes = reader.u16()?;
    for _ in 0..attributes {
        let name = pool.utf8(reader.u16()?)?;
        let len = reader.u32()? as usize;
        let body = reader.take(len)?;
        if let Some(visible) = annotation_visibility(&name) {
            read_annotations(body, &pool, &mut |desc| {
                visitor.visit_class_annotation(desc, visible)
            })?;
        }
    }

    Ok(())
}

fn read_member<'a>(
    reader: &mut Reader<'a>,
    pool: &ConstantPool<'a>,
    emit: &mut dyn FnMut(&str, &str, &str, bool),
) -> Result<(), ClassFormatError> {
    // access_flags
    reader.skip(2)?;
    let name = pool.utf8(reader.u16()?)?;
    let member_descriptor = pool.utf8(reader.u16()?)?;

    let attributes = reader.u16()?;
    for _ in 0..attributes {
        let attr_name = pool.utf8(reader.u16()?)?;
        let len = reader.u32()? as usize;
        let body = reader.take(len)?;
        if let Some(visible) = annotation_visibility(&attr_name) {
            read_annotations(body, pool, &mut |desc| {
                emit(name.as_ref(), member_descriptor.as_ref(), desc, visible)
            })?;
        }
    }
    Ok(())
}

fn read_annotations(
    body: &[u8],
    pool: &ConstantPool<'_>,
    emit: &mut dyn FnMut(&str),
) -> Result<(), ClassFormatError> {
    let mut reader = Reader::new(body);
    let count = reader.u16()?;
    for _ in 0..count {
        let type_descriptor = pool.utf8(reader.u16()?)?;
        emit(type_descriptor.as_ref());
        skip_element_pairs(&mut reader, 0)?;
    }
    Ok(())
}

fn skip_element_pairs(reader: &mut Reader<'_>, depth: usize) -> Result<(), ClassFormatError> {
    let pairs = reader.u16()?;
    for _ in 0..pairs {
        // element_name_index
        reader.skip(2)?;
        skip_element_value(reader, depth)?;
    }
    Ok(())
}

fn skip_element_value(reader: &mut Reader<'_>, depth: usize) -> Result<(), ClassFormatError> {
    if depth >= MAX_ELEMENT_NESTING {
        return Err(ClassFormatError::NestingTooDeep(MAX_ELEMENT_NESTING));
    }
    match reader.u8()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => {
            // Nested annotations are argument values, not annotation usages.
            reader.skip(2)?;
            skip_element_pairs(reader, depth + 1)
        }
        b'[' => {
            let values = reader.u16()?;
            for _ in 0..values {
                skip_element_value(reader, depth + 1)?;
            }
            Ok(())
        }
        other => Err(ClassFormatError::BadElementTag(other)),
    }
}
