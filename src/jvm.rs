//! Parser and decoder for JVM class files.
//!
//! Only the pieces of the class-file format the interpreter consumes are
//! materialized: the constant pool, the method table and each method's
//! `Code` attribute. Every other attribute is skipped over byte-exactly so
//! arbitrary compiler output still parses.
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;

use std::io;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

/// Values of magic bytes of a JVM class file.
const JVM_CLASS_FILE_MAGIC: u32 = 0xCAFE_BABE;

/// `CPInfo` represents constant pool entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CPInfo {
    ConstantClass {
        name_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantInterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantInteger {
        bytes: u32,
    },
    ConstantFloat {
        bytes: u32,
    },
    ConstantLong {
        hi_bytes: u32,
        lo_bytes: u32,
    },
    ConstantDouble {
        hi_bytes: u32,
        lo_bytes: u32,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    ConstantUtf8 {
        bytes: String,
    },
    ConstantMethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    ConstantMethodType {
        descriptor_index: u16,
    },
    ConstantInvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    // Placeholder for pool slot 0 and the second slot of 8-byte constants.
    Unspecified,
}

/// `ConstantKind` encodes the wire tag of a constant pool entry.
#[derive(Debug, Copy, Clone)]
enum ConstantKind {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    FieldRef,
    MethodRef,
    InterfaceMethodRef,
    NameAndType,
    MethodHandle,
    MethodType,
    InvokeDynamic,
    Unspecified,
}

impl From<u8> for ConstantKind {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Utf8,
            3 => Self::Integer,
            4 => Self::Float,
            5 => Self::Long,
            6 => Self::Double,
            7 => Self::Class,
            8 => Self::String,
            9 => Self::FieldRef,
            10 => Self::MethodRef,
            11 => Self::InterfaceMethodRef,
            12 => Self::NameAndType,
            15 => Self::MethodHandle,
            16 => Self::MethodType,
            18 => Self::InvokeDynamic,
            _ => Self::Unspecified,
        }
    }
}

/// Exception table entry of a `Code` attribute. Parsed to keep the stream
/// aligned, the runtime does not model exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInfo {
    ConstantValueAttribute {
        constant_value_index: u16,
    },
    CodeAttribute {
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        exception_table: Vec<ExceptionEntry>,
        attributes: HashMap<String, AttributeInfo>,
    },
    SourceFileAttribute {
        source_file_index: u16,
    },
}

/// Class field entry. Parsed to keep the stream aligned, the interpreter
/// models no instance or static state.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    access_flag: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: HashMap<String, AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    access_flag: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: HashMap<String, AttributeInfo>,
}

impl MethodInfo {
    pub const fn access_flag(&self) -> u16 {
        self.access_flag
    }

    pub const fn name_index(&self) -> u16 {
        self.name_index
    }

    pub const fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }

    pub const fn attributes(&self) -> &HashMap<String, AttributeInfo> {
        &self.attributes
    }
}

/// `JVMClassFile` represents a parsed Java class file.
#[derive(Debug, Clone)]
pub struct JVMClassFile {
    magic: u32,
    minor_version: u16,
    major_version: u16,
    constant_pool: Vec<CPInfo>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    attributes: HashMap<String, AttributeInfo>,
}

impl JVMClassFile {
    pub const fn magic(&self) -> u32 {
        self.magic
    }

    pub const fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub const fn major_version(&self) -> u16 {
        self.major_version
    }

    /// The constant pool, 1-indexed as on the wire: slot 0 holds a
    /// placeholder entry.
    pub fn constant_pool(&self) -> &[CPInfo] {
        &self.constant_pool
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }
}

/// `JVMParser` namespaces functions that handle parsing of Java class files.
#[derive(Debug)]
pub struct JVMParser;

impl JVMParser {
    /// Parse a preloaded Java class file image.
    pub fn parse(class_file_bytes: &[u8]) -> io::Result<JVMClassFile> {
        let mut buffer = Cursor::new(class_file_bytes);
        let magic = buffer.read_u32::<BigEndian>()?;
        if magic != JVM_CLASS_FILE_MAGIC {
            return Err(invalid_data(format!(
                "expected class file magic 0xCAFEBABE, got {magic:#010x}"
            )));
        }
        let minor_version = buffer.read_u16::<BigEndian>()?;
        let major_version = buffer.read_u16::<BigEndian>()?;
        let constant_pool = parse_constant_pool(&mut buffer)?;

        let access_flags = buffer.read_u16::<BigEndian>()?;
        let this_class = buffer.read_u16::<BigEndian>()?;
        let super_class = buffer.read_u16::<BigEndian>()?;

        let interfaces_count = buffer.read_u16::<BigEndian>()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(buffer.read_u16::<BigEndian>()?);
        }

        let fields = parse_fields(&mut buffer, &constant_pool)?;
        let methods = parse_methods(&mut buffer, &constant_pool)?;
        let attributes = parse_attribute_info(&mut buffer, &constant_pool)?;

        Ok(JVMClassFile {
            magic,
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}

/// Parse the constant pool. The returned vector mirrors the wire layout:
/// entries start at index 1 and 8-byte constants occupy two slots.
fn parse_constant_pool(
    reader: &mut (impl Read + Seek),
) -> io::Result<Vec<CPInfo>> {
    let constant_pool_count = reader.read_u16::<BigEndian>()?;
    let mut constant_pool =
        vec![CPInfo::Unspecified; constant_pool_count as usize];
    let mut index = 1usize;
    while index < constant_pool_count as usize {
        let tag = reader.read_u8()?;
        let mut wide = false;
        constant_pool[index] = match ConstantKind::from(tag) {
            ConstantKind::Utf8 => {
                let length = reader.read_u16::<BigEndian>()?;
                let mut buf = vec![0u8; length as usize];
                reader.read_exact(&mut buf)?;
                let bytes = String::from_utf8(buf).map_err(|err| {
                    invalid_data(format!("malformed Utf8 constant: {err}"))
                })?;
                CPInfo::ConstantUtf8 { bytes }
            }
            ConstantKind::Integer => CPInfo::ConstantInteger {
                bytes: reader.read_u32::<BigEndian>()?,
            },
            ConstantKind::Float => CPInfo::ConstantFloat {
                bytes: reader.read_u32::<BigEndian>()?,
            },
            ConstantKind::Long => {
                wide = true;
                CPInfo::ConstantLong {
                    hi_bytes: reader.read_u32::<BigEndian>()?,
                    lo_bytes: reader.read_u32::<BigEndian>()?,
                }
            }
            ConstantKind::Double => {
                wide = true;
                CPInfo::ConstantDouble {
                    hi_bytes: reader.read_u32::<BigEndian>()?,
                    lo_bytes: reader.read_u32::<BigEndian>()?,
                }
            }
            ConstantKind::Class => CPInfo::ConstantClass {
                name_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::String => CPInfo::ConstantString {
                string_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::FieldRef => CPInfo::ConstantFieldRef {
                class_index: reader.read_u16::<BigEndian>()?,
                name_and_type_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::MethodRef => CPInfo::ConstantMethodRef {
                class_index: reader.read_u16::<BigEndian>()?,
                name_and_type_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::InterfaceMethodRef => {
                CPInfo::ConstantInterfaceMethodRef {
                    class_index: reader.read_u16::<BigEndian>()?,
                    name_and_type_index: reader.read_u16::<BigEndian>()?,
                }
            }
            ConstantKind::NameAndType => CPInfo::ConstantNameAndType {
                name_index: reader.read_u16::<BigEndian>()?,
                descriptor_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::MethodHandle => CPInfo::ConstantMethodHandle {
                reference_kind: reader.read_u8()?,
                reference_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::MethodType => CPInfo::ConstantMethodType {
                descriptor_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::InvokeDynamic => CPInfo::ConstantInvokeDynamic {
                bootstrap_method_attr_index: reader.read_u16::<BigEndian>()?,
                name_and_type_index: reader.read_u16::<BigEndian>()?,
            },
            ConstantKind::Unspecified => {
                return Err(invalid_data(format!(
                    "unsupported constant pool tag {tag} at index {index}"
                )));
            }
        };
        // Long and Double constants take two pool slots, the second slot
        // stays unspecified.
        index += if wide { 2 } else { 1 };
    }
    Ok(constant_pool)
}

/// Parse fields. Field attributes are parsed only to keep the stream
/// aligned.
fn parse_fields(
    reader: &mut (impl Read + Seek),
    constant_pool: &[CPInfo],
) -> io::Result<Vec<FieldInfo>> {
    let fields_count = reader.read_u16::<BigEndian>()?;
    let mut fields = Vec::with_capacity(fields_count as usize);
    for _ in 0..fields_count {
        let access_flag = reader.read_u16::<BigEndian>()?;
        let name_index = reader.read_u16::<BigEndian>()?;
        let descriptor_index = reader.read_u16::<BigEndian>()?;
        let attributes = parse_attribute_info(reader, constant_pool)?;
        fields.push(FieldInfo {
            access_flag,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(fields)
}

/// Parse methods.
fn parse_methods(
    reader: &mut (impl Read + Seek),
    constant_pool: &[CPInfo],
) -> io::Result<Vec<MethodInfo>> {
    let methods_count = reader.read_u16::<BigEndian>()?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        let access_flag = reader.read_u16::<BigEndian>()?;
        let name_index = reader.read_u16::<BigEndian>()?;
        let descriptor_index = reader.read_u16::<BigEndian>()?;
        let attributes = parse_attribute_info(reader, constant_pool)?;
        methods.push(MethodInfo {
            access_flag,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(methods)
}

/// Parse an attribute table. `Code`, `ConstantValue` and `SourceFile` are
/// materialized, anything else is skipped by seeking past its length.
fn parse_attribute_info(
    reader: &mut (impl Read + Seek),
    constant_pool: &[CPInfo],
) -> io::Result<HashMap<String, AttributeInfo>> {
    let attribute_count = reader.read_u16::<BigEndian>()?;
    let mut attributes: HashMap<String, AttributeInfo> = HashMap::new();
    for _ in 0..attribute_count {
        let attribute_name_index = reader.read_u16::<BigEndian>()?;
        let attribute_name =
            match constant_pool.get(attribute_name_index as usize) {
                Some(CPInfo::ConstantUtf8 { bytes }) => bytes.clone(),
                entry => {
                    return Err(invalid_data(format!(
                        "expected attribute name at constant pool index \
                         {attribute_name_index}, got {entry:?}"
                    )));
                }
            };
        let attribute_length = reader.read_u32::<BigEndian>()?;
        let attribute_info = match attribute_name.as_str() {
            "ConstantValue" => Some(AttributeInfo::ConstantValueAttribute {
                constant_value_index: reader.read_u16::<BigEndian>()?,
            }),
            "Code" => {
                let max_stack = reader.read_u16::<BigEndian>()?;
                let max_locals = reader.read_u16::<BigEndian>()?;
                let code_length = reader.read_u32::<BigEndian>()?;
                let mut code = vec![0u8; code_length as usize];
                reader.read_exact(&mut code)?;
                let exception_table_length = reader.read_u16::<BigEndian>()?;
                let mut exception_table =
                    Vec::with_capacity(exception_table_length as usize);
                for _ in 0..exception_table_length {
                    exception_table.push(ExceptionEntry {
                        start_pc: reader.read_u16::<BigEndian>()?,
                        end_pc: reader.read_u16::<BigEndian>()?,
                        handler_pc: reader.read_u16::<BigEndian>()?,
                        catch_type: reader.read_u16::<BigEndian>()?,
                    });
                }
                let attributes = parse_attribute_info(reader, constant_pool)?;
                Some(AttributeInfo::CodeAttribute {
                    max_stack,
                    max_locals,
                    code,
                    exception_table,
                    attributes,
                })
            }
            "SourceFile" => Some(AttributeInfo::SourceFileAttribute {
                source_file_index: reader.read_u16::<BigEndian>()?,
            }),
            _ => {
                reader.seek(std::io::SeekFrom::Current(i64::from(
                    attribute_length,
                )))?;
                None
            }
        };
        if let Some(attr) = attribute_info {
            attributes.insert(attribute_name, attr);
        }
    }
    Ok(attributes)
}

/// Helper function to read a class file into a buffer.
pub fn read_class_file(fp: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(fp)
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds the class-file image of a class with a single static method
    /// `main([Ljava/lang/String;)V` whose body is `iconst_0; istore_0;
    /// return`, plus an integer and a long constant in the pool.
    pub(crate) fn sample_class_file() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        // minor, major
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&55u16.to_be_bytes());
        // constant pool: count 9, wire entries at slots 1..=8 with the
        // long constant occupying slots 5 and 6
        buf.extend_from_slice(&9u16.to_be_bytes());
        push_utf8(&mut buf, "main"); // 1
        push_utf8(&mut buf, "([Ljava/lang/String;)V"); // 2
        push_utf8(&mut buf, "Code"); // 3
        buf.push(3); // 4: Integer
        buf.extend_from_slice(&1_000_000u32.to_be_bytes());
        buf.push(5); // 5: Long
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        push_utf8(&mut buf, "Sample"); // 7
        buf.push(7); // 8: Class
        buf.extend_from_slice(&7u16.to_be_bytes());
        // access flags, this, super
        buf.extend_from_slice(&0x0021u16.to_be_bytes());
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        // interfaces, fields
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        // methods
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&0x0009u16.to_be_bytes()); // public static
        buf.extend_from_slice(&1u16.to_be_bytes()); // name: "main"
        buf.extend_from_slice(&2u16.to_be_bytes()); // descriptor
        buf.extend_from_slice(&1u16.to_be_bytes()); // one attribute
        buf.extend_from_slice(&3u16.to_be_bytes()); // "Code"
        let code: &[u8] = &[0x03, 0x3b, 0xb1];
        buf.extend_from_slice(&(12 + code.len() as u32).to_be_bytes());
        buf.extend_from_slice(&2u16.to_be_bytes()); // max_stack
        buf.extend_from_slice(&1u16.to_be_bytes()); // max_locals
        buf.extend_from_slice(&(code.len() as u32).to_be_bytes());
        buf.extend_from_slice(code);
        buf.extend_from_slice(&0u16.to_be_bytes()); // exception table
        buf.extend_from_slice(&0u16.to_be_bytes()); // code attributes
        // class attributes
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf
    }

    fn push_utf8(buf: &mut Vec<u8>, s: &str) {
        buf.push(1);
        buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn parses_header_and_pool() {
        let class_file = JVMParser::parse(&sample_class_file()).unwrap();
        assert_eq!(class_file.magic(), JVM_CLASS_FILE_MAGIC);
        assert_eq!(class_file.minor_version(), 0);
        assert_eq!(class_file.major_version(), 55);
        let pool = class_file.constant_pool();
        assert_eq!(pool[0], CPInfo::Unspecified);
        assert_eq!(
            pool[1],
            CPInfo::ConstantUtf8 {
                bytes: "main".to_string()
            }
        );
        assert_eq!(pool[4], CPInfo::ConstantInteger { bytes: 1_000_000 });
        // The long constant shadows slot 6.
        assert_eq!(
            pool[5],
            CPInfo::ConstantLong {
                hi_bytes: 0,
                lo_bytes: 7
            }
        );
        assert_eq!(pool[6], CPInfo::Unspecified);
        assert_eq!(pool[8], CPInfo::ConstantClass { name_index: 7 });
    }

    #[test]
    fn parses_code_attribute() {
        let class_file = JVMParser::parse(&sample_class_file()).unwrap();
        let methods = class_file.methods();
        assert_eq!(methods.len(), 1);
        let method = &methods[0];
        assert_eq!(method.name_index(), 1);
        assert_eq!(method.descriptor_index(), 2);
        match method.attributes().get("Code") {
            Some(AttributeInfo::CodeAttribute {
                max_stack,
                max_locals,
                code,
                ..
            }) => {
                assert_eq!(*max_stack, 2);
                assert_eq!(*max_locals, 1);
                assert_eq!(code, &vec![0x03, 0x3b, 0xb1]);
            }
            other => panic!("expected Code attribute, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_class_file();
        bytes[0] = 0xde;
        let result = JVMParser::parse(&bytes);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_truncated_image() {
        let bytes = sample_class_file();
        assert!(JVMParser::parse(&bytes[..bytes.len() - 6]).is_err());
    }
}
