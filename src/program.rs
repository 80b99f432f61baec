//! Abstract representation of the program inside a parsed class file.
use crate::jvm::{AttributeInfo, CPInfo, JVMClassFile};

use regex::Regex;

/// Primitive descriptor types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseTypeKind {
    Int,
    Long,
    Float,
    Double,
    Void,
    String,
    List,
}

/// Method descriptor type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    t: BaseTypeKind,
    sub_t: Option<Box<Type>>,
}

impl Type {
    pub const fn kind(&self) -> BaseTypeKind {
        self.t
    }
}

/// Representation of the program we want to run: the constant pool plus
/// the class methods flattened into resolved names and code blocks.
#[derive(Debug, Clone)]
pub struct Program {
    pub constant_pool: Vec<CPInfo>,
    pub methods: Vec<Method>,
}

/// A single class method, ready for interpretation.
#[derive(Debug, Clone)]
pub struct Method {
    name: String,
    descriptor: String,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    arg_types: Vec<Type>,
    return_type: Type,
}

impl Method {
    /// Build a method from its resolved name, descriptor and code block.
    /// Argument and return types are derived from the descriptor.
    pub fn new(
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Self {
        let (arg_types, return_type) = parse_method_types(descriptor);
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            max_stack,
            max_locals,
            code,
            arg_types,
            return_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub const fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub const fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of declared parameters, each parameter occupies one local
    /// slot in the supported subset.
    pub fn parameter_count(&self) -> usize {
        self.arg_types.len()
    }

    pub const fn return_type(&self) -> &Type {
        &self.return_type
    }
}

impl Program {
    /// Build a new program from a parsed class file.
    ///
    /// # Panics
    /// Panics if a method entry is missing its name or descriptor in the
    /// constant pool or carries no `Code` attribute; such a class file is
    /// structurally broken and the interpreter treats that as fatal.
    #[must_use]
    pub fn new(class_file: &JVMClassFile) -> Self {
        let constant_pool = class_file.constant_pool().to_vec();
        let mut methods = Vec::new();
        for method_info in class_file.methods() {
            let name = utf8_entry(&constant_pool, method_info.name_index())
                .expect("method name missing from constant pool");
            let descriptor =
                utf8_entry(&constant_pool, method_info.descriptor_index())
                    .expect("method descriptor missing from constant pool");
            let (max_stack, max_locals, code) =
                if let Some(AttributeInfo::CodeAttribute {
                    max_stack,
                    max_locals,
                    code,
                    ..
                }) = method_info.attributes().get("Code")
                {
                    (*max_stack, *max_locals, code.clone())
                } else {
                    panic!("method {name} carries no Code attribute")
                };
            methods.push(Method::new(
                name, descriptor, max_stack, max_locals, code,
            ));
        }
        Self {
            constant_pool,
            methods,
        }
    }

    /// Find a method by exact name and descriptor match.
    pub fn find_method(
        &self,
        name: &str,
        descriptor: &str,
    ) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Resolve a `Methodref` constant pool entry to one of our methods.
    /// The index is the 1-based pool index taken from the instruction
    /// stream.
    pub fn find_method_from_index(&self, index: usize) -> Option<&Method> {
        let name_and_type_index = match self.constant_pool.get(index)? {
            CPInfo::ConstantMethodRef {
                name_and_type_index,
                ..
            } => *name_and_type_index,
            _ => return None,
        };
        let (name_index, descriptor_index) =
            match self.constant_pool.get(name_and_type_index as usize)? {
                CPInfo::ConstantNameAndType {
                    name_index,
                    descriptor_index,
                } => (*name_index, *descriptor_index),
                _ => return None,
            };
        let name = utf8_entry(&self.constant_pool, name_index)?;
        let descriptor = utf8_entry(&self.constant_pool, descriptor_index)?;
        self.find_method(name, descriptor)
    }

    /// Resolve an integer constant pool entry. The index is the 1-based
    /// pool index taken from the instruction stream.
    pub fn integer_constant(&self, index: usize) -> Option<i32> {
        match self.constant_pool.get(index)? {
            CPInfo::ConstantInteger { bytes } => Some(*bytes as i32),
            _ => None,
        }
    }
}

/// Look up a Utf8 constant by pool index.
fn utf8_entry(constant_pool: &[CPInfo], index: u16) -> Option<&str> {
    match constant_pool.get(index as usize)? {
        CPInfo::ConstantUtf8 { bytes } => Some(bytes),
        _ => None,
    }
}

/// Parse a method descriptor, returns a tuple of argument types and
/// return type.
fn parse_method_types(descriptor: &str) -> (Vec<Type>, Type) {
    let re = Regex::new(r"\(([^\)]*)\)([^$]+)").unwrap();
    let caps = re
        .captures(descriptor)
        .unwrap_or_else(|| panic!("malformed method descriptor {descriptor}"));
    let arg_string = caps.get(1).map_or("", |m| m.as_str());
    let return_type_string = caps.get(2).map_or("", |m| m.as_str());
    let return_type = decode_type(return_type_string);

    let mut types = Vec::new();
    let mut arg_string_slice = arg_string;
    while !arg_string_slice.is_empty() {
        let t = decode_type(arg_string_slice);
        let length = decode_type_string_length(&t);
        types.push(t);
        arg_string_slice = &arg_string_slice[length..];
    }
    (types, return_type)
}

/// Returns the length in characters a type occupies in a descriptor
/// string.
fn decode_type_string_length(t: &Type) -> usize {
    match t.t {
        // "Ljava/lang/String;"
        BaseTypeKind::String => 18,
        BaseTypeKind::List => {
            1 + decode_type_string_length(t.sub_t.as_ref().unwrap())
        }
        _ => 1,
    }
}

/// Decode the leading type of a descriptor fragment.
fn decode_type(type_str: &str) -> Type {
    match &type_str[0..1] {
        "I" => Type {
            t: BaseTypeKind::Int,
            sub_t: None,
        },
        "J" => Type {
            t: BaseTypeKind::Long,
            sub_t: None,
        },
        "F" => Type {
            t: BaseTypeKind::Float,
            sub_t: None,
        },
        "D" => Type {
            t: BaseTypeKind::Double,
            sub_t: None,
        },
        "V" => Type {
            t: BaseTypeKind::Void,
            sub_t: None,
        },
        "[" => {
            let sub = decode_type(&type_str[1..]);
            Type {
                t: BaseTypeKind::List,
                sub_t: Some(Box::new(sub)),
            }
        }
        // Only java/lang/String object references appear in the subset.
        _ => Type {
            t: BaseTypeKind::String,
            sub_t: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::jvm::tests::sample_class_file;
    use crate::jvm::JVMParser;

    #[test]
    fn counts_parameters_from_descriptors() {
        let cases = [
            ("()V", 0),
            ("()I", 0),
            ("(I)I", 1),
            ("(II)I", 2),
            ("(III)V", 3),
            ("([I)I", 1),
            ("(I[II)V", 3),
            ("([Ljava/lang/String;)V", 1),
        ];
        for (descriptor, expected) in cases {
            let method = Method::new("f", descriptor, 0, 0, vec![]);
            assert_eq!(
                method.parameter_count(),
                expected,
                "descriptor {descriptor}"
            );
        }
    }

    #[test]
    fn decodes_return_types() {
        let void = Method::new("f", "(II)V", 0, 0, vec![]);
        assert_eq!(void.return_type().kind(), BaseTypeKind::Void);
        let int = Method::new("f", "()I", 0, 0, vec![]);
        assert_eq!(int.return_type().kind(), BaseTypeKind::Int);
        let array = Method::new("f", "(I)[I", 0, 0, vec![]);
        assert_eq!(array.return_type().kind(), BaseTypeKind::List);
    }

    #[test]
    fn builds_program_from_class_file() {
        let class_file = JVMParser::parse(&sample_class_file()).unwrap();
        let program = Program::new(&class_file);
        assert_eq!(program.methods.len(), 1);
        let main = program
            .find_method("main", "([Ljava/lang/String;)V")
            .unwrap();
        assert_eq!(main.max_stack(), 2);
        assert_eq!(main.max_locals(), 1);
        assert_eq!(main.code(), &[0x03, 0x3b, 0xb1]);
        assert_eq!(main.parameter_count(), 1);
    }

    #[test]
    fn resolves_integer_constants() {
        let class_file = JVMParser::parse(&sample_class_file()).unwrap();
        let program = Program::new(&class_file);
        assert_eq!(program.integer_constant(4), Some(1_000_000));
        // Slot 1 is a Utf8 entry, not an integer.
        assert_eq!(program.integer_constant(1), None);
        assert_eq!(program.integer_constant(2000), None);
    }

    #[test]
    fn resolves_method_refs() {
        let program = Program {
            constant_pool: vec![
                CPInfo::Unspecified,
                CPInfo::ConstantUtf8 {
                    bytes: "fact".to_string(),
                },
                CPInfo::ConstantUtf8 {
                    bytes: "(I)I".to_string(),
                },
                CPInfo::ConstantNameAndType {
                    name_index: 1,
                    descriptor_index: 2,
                },
                CPInfo::ConstantMethodRef {
                    class_index: 0,
                    name_and_type_index: 3,
                },
            ],
            methods: vec![Method::new("fact", "(I)I", 2, 1, vec![0xb1])],
        };
        let resolved = program.find_method_from_index(4).unwrap();
        assert_eq!(resolved.name(), "fact");
        assert_eq!(resolved.descriptor(), "(I)I");
        // A non-methodref entry does not resolve.
        assert!(program.find_method_from_index(1).is_none());
        assert!(program.find_method_from_index(900).is_none());
    }
}
