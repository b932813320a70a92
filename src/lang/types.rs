use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::op::Qualifier;

/// Bytes occupied by one stack word.
pub const WORD: i32 = 4;

/// A static NWScript type.
///
/// Every scalar occupies one 4-byte stack word, a vector occupies three and a
/// struct occupies the sum of its members. `Action` is never materialised on
/// the stack: it only appears as an engine-routine parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int,
    Float,
    String,
    Object,
    Vector,
    Location,
    Effect,
    Event,
    Talent,
    Action,
    ItemProperty,
    Struct(String),
}

impl Type {
    /// Maps a type keyword to its type. `struct` types are not keywords on
    /// their own and are handled by the parser.
    pub fn from_keyword(word: &str) -> Option<Type> {
        Some(match word {
            "void" => Type::Void,
            "int" => Type::Int,
            "float" => Type::Float,
            "string" => Type::String,
            "object" => Type::Object,
            "vector" => Type::Vector,
            "location" => Type::Location,
            "effect" => Type::Effect,
            "event" => Type::Event,
            "talent" => Type::Talent,
            "action" => Type::Action,
            "itemproperty" => Type::ItemProperty,
            _ => return None,
        })
    }

    /// Size in bytes on the runtime stack.
    ///
    /// Unknown struct names size to zero; the parser and code generator reject
    /// them before any size is needed.
    pub fn size(&self, structs: &StructMap) -> i32 {
        match self {
            Type::Void | Type::Action => 0,
            Type::Vector => 3 * WORD,
            Type::Struct(name) => structs.get(name).map(|s| s.size(structs)).unwrap_or(0),
            _ => WORD,
        }
    }

    /// Size in 4-byte words.
    pub fn words(&self, structs: &StructMap) -> i32 {
        self.size(structs) / WORD
    }

    /// Qualifier byte for single-operand instructions (`RSADDx`, `CONSTx`).
    pub fn qualifier(&self) -> Option<Qualifier> {
        Some(match self {
            Type::Int => Qualifier::Int,
            Type::Float => Qualifier::Float,
            Type::String => Qualifier::String,
            Type::Object => Qualifier::Object,
            Type::Effect => Qualifier::Effect,
            Type::Event => Qualifier::Event,
            Type::Location => Qualifier::Location,
            Type::Talent => Qualifier::Talent,
            Type::ItemProperty => Qualifier::ItemProperty,
            _ => return None,
        })
    }

    /// Inverse of [`Type::qualifier`].
    pub fn from_qualifier(qualifier: Qualifier) -> Option<Type> {
        Some(match qualifier {
            Qualifier::Int => Type::Int,
            Qualifier::Float => Type::Float,
            Qualifier::String => Type::String,
            Qualifier::Object => Type::Object,
            Qualifier::Effect => Type::Effect,
            Qualifier::Event => Type::Event,
            Qualifier::Location => Type::Location,
            Qualifier::Talent => Type::Talent,
            Qualifier::ItemProperty => Type::ItemProperty,
            _ => return None,
        })
    }

    /// Engine structures are opaque handles owned by the host.
    pub fn is_engine_structure(&self) -> bool {
        matches!(
            self,
            Type::Location | Type::Effect | Type::Event | Type::Talent | Type::ItemProperty
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Vector => write!(f, "vector"),
            Type::Location => write!(f, "location"),
            Type::Effect => write!(f, "effect"),
            Type::Event => write!(f, "event"),
            Type::Talent => write!(f, "talent"),
            Type::Action => write!(f, "action"),
            Type::ItemProperty => write!(f, "itemproperty"),
            Type::Struct(name) => write!(f, "struct {}", name),
        }
    }
}

/// A user-defined `struct` type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
}

/// Struct definitions visible to a compilation unit, keyed by name.
pub type StructMap = HashMap<String, StructDef>;

impl StructDef {
    pub fn size(&self, structs: &StructMap) -> i32 {
        self.members.iter().map(|m| m.ty.size(structs)).sum()
    }

    /// Byte offset and type of a member, relative to the start of the struct.
    pub fn member(&self, name: &str, structs: &StructMap) -> Option<(i32, Type)> {
        let mut offset = 0;
        for member in &self.members {
            if member.name == name {
                return Some((offset, member.ty.clone()));
            }
            offset += member.ty.size(structs);
        }
        None
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> StructMap {
        let mut structs = StructMap::new();
        structs.insert(
            "Point".to_string(),
            StructDef {
                name: "Point".to_string(),
                members: vec![
                    StructMember {
                        name: "tag".to_string(),
                        ty: Type::String,
                    },
                    StructMember {
                        name: "pos".to_string(),
                        ty: Type::Vector,
                    },
                    StructMember {
                        name: "hp".to_string(),
                        ty: Type::Int,
                    },
                ],
            },
        );
        structs
    }

    #[test]
    fn test_scalar_sizes() {
        let structs = StructMap::new();
        assert_eq!(Type::Int.size(&structs), 4);
        assert_eq!(Type::Effect.size(&structs), 4);
        assert_eq!(Type::Vector.size(&structs), 12);
        assert_eq!(Type::Vector.words(&structs), 3);
        assert_eq!(Type::Void.size(&structs), 0);
        assert_eq!(Type::Action.size(&structs), 0);
    }

    #[test]
    fn test_struct_size_and_members() {
        let structs = point();
        let ty = Type::Struct("Point".to_string());
        assert_eq!(ty.size(&structs), 20);

        let def = &structs["Point"];
        assert_eq!(def.member("pos", &structs), Some((4, Type::Vector)));
        assert_eq!(def.member("hp", &structs), Some((16, Type::Int)));
        assert_eq!(def.member("missing", &structs), None);
    }

    #[test]
    fn test_struct_equality_includes_name() {
        assert_eq!(
            Type::Struct("A".to_string()),
            Type::Struct("A".to_string())
        );
        assert_ne!(
            Type::Struct("A".to_string()),
            Type::Struct("B".to_string())
        );
    }

    #[test]
    fn test_keyword_round_trip() {
        for word in ["int", "float", "string", "object", "vector", "location", "itemproperty"] {
            let ty = Type::from_keyword(word).unwrap();
            assert_eq!(ty.to_string(), word);
        }
        assert_eq!(Type::from_keyword("struct"), None);
    }

    #[test]
    fn test_qualifier_round_trip() {
        for ty in [Type::Int, Type::Float, Type::String, Type::Object, Type::Talent] {
            let q = ty.qualifier().unwrap();
            assert_eq!(Type::from_qualifier(q), Some(ty));
        }
        assert_eq!(Type::Vector.qualifier(), None);
    }
}
