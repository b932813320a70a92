//! Host routine and constant catalog.
//!
//! The catalog is injected data: the compiler resolves engine calls and named
//! constants against it and the decompiler uses it to name `ACTION` calls.
//! It loads from YAML for hand editing or from postcard bytes for caching.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::lang::types::Type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Source text of the default value: a literal or a constant name.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    /// Stable routine number encoded in `ACTION`.
    pub index: u16,
    pub name: String,
    pub returns: Type,
    #[serde(default)]
    pub params: Vec<Param>,
}

impl Routine {
    pub fn required_params(&self) -> usize {
        self.params.iter().take_while(|p| p.default.is_none()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Int(i32),
    Float(f32),
    String(String),
    Object(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub ty: Type,
    pub value: ConstValue,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid catalog data: {0}")]
    Postcard(#[from] postcard::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub routines: Vec<Routine>,
    #[serde(default)]
    pub constants: Vec<Constant>,
}

impl Catalog {
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.name == name)
    }

    pub fn routine_by_index(&self, index: u16) -> Option<&Routine> {
        self.routines.iter().find(|r| r.index == index)
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn from_yaml(text: &str) -> Result<Catalog, CatalogError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, CatalogError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Catalog, CatalogError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, CatalogError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Loads a catalog file. `.yaml`/`.yml` files are parsed as YAML, anything
    /// else as postcard bytes.
    pub fn load(path: &Path) -> Result<Catalog, CatalogError> {
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Catalog::from_yaml(&std::fs::read_to_string(path)?)
        } else {
            Catalog::from_postcard(&std::fs::read(path)?)
        }
    }

    /// A small catalog of common routines and constants.
    pub fn builtin() -> Catalog {
        fn p(name: &str, ty: Type) -> Param {
            Param {
                name: name.to_string(),
                ty,
                default: None,
            }
        }
        fn d(name: &str, ty: Type, default: &str) -> Param {
            Param {
                name: name.to_string(),
                ty,
                default: Some(default.to_string()),
            }
        }
        fn r(index: u16, name: &str, returns: Type, params: Vec<Param>) -> Routine {
            Routine {
                index,
                name: name.to_string(),
                returns,
                params,
            }
        }
        fn c(name: &str, ty: Type, value: ConstValue) -> Constant {
            Constant {
                name: name.to_string(),
                ty,
                value,
            }
        }

        Catalog {
            routines: vec![
                r(0, "Random", Type::Int, vec![p("nMaxInteger", Type::Int)]),
                r(
                    1,
                    "PrintString",
                    Type::Void,
                    vec![p("sString", Type::String)],
                ),
                r(
                    2,
                    "PrintFloat",
                    Type::Void,
                    vec![
                        p("fFloat", Type::Float),
                        d("nWidth", Type::Int, "18"),
                        d("nDecimals", Type::Int, "9"),
                    ],
                ),
                r(
                    3,
                    "FloatToString",
                    Type::String,
                    vec![
                        p("fFloat", Type::Float),
                        d("nWidth", Type::Int, "18"),
                        d("nDecimals", Type::Int, "9"),
                    ],
                ),
                r(
                    4,
                    "PrintInteger",
                    Type::Void,
                    vec![p("nInteger", Type::Int)],
                ),
                r(
                    5,
                    "PrintObject",
                    Type::Void,
                    vec![p("oObject", Type::Object)],
                ),
                r(
                    6,
                    "AssignCommand",
                    Type::Void,
                    vec![p("oActionSubject", Type::Object), p("aActionToAssign", Type::Action)],
                ),
                r(
                    7,
                    "DelayCommand",
                    Type::Void,
                    vec![p("fSeconds", Type::Float), p("aActionToDelay", Type::Action)],
                ),
                r(
                    8,
                    "ExecuteScript",
                    Type::Void,
                    vec![
                        p("sScript", Type::String),
                        p("oTarget", Type::Object),
                        d("nScriptVar", Type::Int, "-1"),
                    ],
                ),
                r(
                    27,
                    "GetPosition",
                    Type::Vector,
                    vec![p("oTarget", Type::Object)],
                ),
                r(
                    92,
                    "IntToString",
                    Type::String,
                    vec![p("nInteger", Type::Int)],
                ),
                r(
                    142,
                    "Vector",
                    Type::Vector,
                    vec![
                        d("x", Type::Float, "0.0"),
                        d("y", Type::Float, "0.0"),
                        d("z", Type::Float, "0.0"),
                    ],
                ),
                r(
                    168,
                    "GetTag",
                    Type::String,
                    vec![p("oObject", Type::Object)],
                ),
                r(
                    220,
                    "ApplyEffectToObject",
                    Type::Void,
                    vec![
                        p("nDurationType", Type::Int),
                        p("eEffect", Type::Effect),
                        p("oTarget", Type::Object),
                        d("fDuration", Type::Float, "0.0"),
                    ],
                ),
                r(
                    78,
                    "EffectHeal",
                    Type::Effect,
                    vec![p("nDamageToHeal", Type::Int)],
                ),
                r(
                    681,
                    "GetLocalInt",
                    Type::Int,
                    vec![p("oObject", Type::Object), p("sVarName", Type::String)],
                ),
                r(
                    682,
                    "SetLocalInt",
                    Type::Void,
                    vec![
                        p("oObject", Type::Object),
                        p("sVarName", Type::String),
                        p("nValue", Type::Int),
                    ],
                ),
                r(
                    222,
                    "GetLocation",
                    Type::Location,
                    vec![d("oObject", Type::Object, "OBJECT_SELF")],
                ),
                r(
                    300,
                    "GetFirstPC",
                    Type::Object,
                    vec![],
                ),
            ],
            constants: vec![
                c("TRUE", Type::Int, ConstValue::Int(1)),
                c("FALSE", Type::Int, ConstValue::Int(0)),
                c("DURATION_TYPE_INSTANT", Type::Int, ConstValue::Int(0)),
                c("DURATION_TYPE_TEMPORARY", Type::Int, ConstValue::Int(1)),
                c("DURATION_TYPE_PERMANENT", Type::Int, ConstValue::Int(2)),
                c("PI", Type::Float, ConstValue::Float(3.141592)),
                c("DEFAULT_TAG", Type::String, ConstValue::String("npc".to_string())),
            ],
        }
    }
}
