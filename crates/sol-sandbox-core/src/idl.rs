//! Anchor interface descriptors (IDL) and Borsh argument encoding.
//!
//! Both the current IDL layout (`metadata.name`, explicit `discriminator`,
//! `writable`/`signer`) and the legacy one (`name`, `isMut`/`isSigner`,
//! camelCase method names) are accepted. Method lookup goes through the
//! parsed instruction list, so an unknown name is a typed error rather than a
//! missing property.

use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sol_sandbox_types::encoding::{sha256, try_base64_decode};
use sol_sandbox_types::Pubkey;
use thiserror::Error;

use crate::error::PipelineError;

pub const DISCRIMINATOR_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdlError {
    #[error("invalid interface descriptor: {0}")]
    Parse(String),

    #[error("unsupported IDL type: {0}")]
    UnsupportedType(String),

    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    #[error("missing argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' must be {expected}: {reason}")]
    InvalidArgument {
        name: String,
        expected: String,
        reason: String,
    },
}

impl From<IdlError> for PipelineError {
    fn from(e: IdlError) -> Self {
        PipelineError::InputValidation(e.to_string())
    }
}

/// An argument type from the IDL.
///
/// Shapes the encoder does not know are kept as [`IdlType::Unsupported`] so
/// the rest of the descriptor still loads; only calls that reach them fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum IdlType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    String,
    Pubkey,
    Bytes,
    Vec(Box<IdlType>),
    Option(Box<IdlType>),
    Array(Box<IdlType>, usize),
    /// A struct, enum or alias from the IDL's `types` section.
    Defined(String),
    /// Raw JSON of a type the encoder cannot handle (generics, u256, ...).
    Unsupported(Value),
}

impl TryFrom<Value> for IdlType {
    type Error = IdlError;

    fn try_from(value: Value) -> Result<Self, IdlError> {
        match value {
            Value::String(name) => Ok(match name.as_str() {
                "bool" => Self::Bool,
                "u8" => Self::U8,
                "u16" => Self::U16,
                "u32" => Self::U32,
                "u64" => Self::U64,
                "u128" => Self::U128,
                "i8" => Self::I8,
                "i16" => Self::I16,
                "i32" => Self::I32,
                "i64" => Self::I64,
                "i128" => Self::I128,
                "f32" => Self::F32,
                "f64" => Self::F64,
                "string" => Self::String,
                "pubkey" | "publicKey" => Self::Pubkey,
                "bytes" => Self::Bytes,
                other => Self::Unsupported(Value::String(other.to_string())),
            }),
            Value::Object(map) => {
                if let Some(inner) = map.get("vec") {
                    return Ok(Self::Vec(Box::new(Self::try_from(inner.clone())?)));
                }
                if let Some(inner) = map.get("option") {
                    return Ok(Self::Option(Box::new(Self::try_from(inner.clone())?)));
                }
                if let Some(Value::Array(parts)) = map.get("array") {
                    if let [inner, Value::Number(len)] = parts.as_slice() {
                        let len = len
                            .as_u64()
                            .ok_or_else(|| IdlError::Parse("array length must be an integer".into()))?;
                        return Ok(Self::Array(
                            Box::new(Self::try_from(inner.clone())?),
                            len as usize,
                        ));
                    }
                }
                // `{"defined": "Name"}` (legacy) or `{"defined": {"name": "Name"}}`.
                let defined = match map.get("defined") {
                    Some(Value::String(name)) => Some(name.clone()),
                    Some(Value::Object(inner)) if inner.get("generics").is_none() => inner
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                };
                Ok(match defined {
                    Some(name) => Self::Defined(name),
                    None => Self::Unsupported(Value::Object(map)),
                })
            }
            other => Err(IdlError::Parse(format!("invalid IDL type: {other}"))),
        }
    }
}

impl From<IdlType> for Value {
    fn from(ty: IdlType) -> Value {
        match ty {
            IdlType::Vec(inner) => json!({ "vec": Value::from(*inner) }),
            IdlType::Option(inner) => json!({ "option": Value::from(*inner) }),
            IdlType::Array(inner, len) => json!({ "array": [Value::from(*inner), len] }),
            IdlType::Defined(name) => json!({ "defined": { "name": name } }),
            IdlType::Unsupported(raw) => raw,
            scalar => Value::String(scalar.to_string()),
        }
    }
}

impl fmt::Display for IdlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::U128 => f.write_str("u128"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::I128 => f.write_str("i128"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::String => f.write_str("string"),
            Self::Pubkey => f.write_str("pubkey"),
            Self::Bytes => f.write_str("bytes"),
            Self::Vec(inner) => write!(f, "vec<{inner}>"),
            Self::Option(inner) => write!(f, "option<{inner}>"),
            Self::Array(inner, len) => write!(f, "[{inner}; {len}]"),
            Self::Defined(name) => f.write_str(name),
            Self::Unsupported(raw) => write!(f, "{raw}"),
        }
    }
}

/// Fields of a struct or enum variant: named (`{name, type}`) or tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdlDefinedFields {
    Named(Vec<IdlField>),
    Tuple(Vec<IdlType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlEnumVariant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<IdlDefinedFields>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IdlTypeDefBody {
    Struct {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<IdlDefinedFields>,
    },
    Enum { variants: Vec<IdlEnumVariant> },
    #[serde(rename = "type")]
    Alias { alias: IdlType },
}

/// One entry of the IDL's `types` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlTypeDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generics: Vec<Value>,
    #[serde(rename = "type")]
    pub body: IdlTypeDefBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlType,
}

/// One entry of an instruction's account list; composite groups nest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlAccountItem {
    pub name: String,
    #[serde(default, alias = "isMut")]
    pub writable: bool,
    #[serde(default, alias = "isSigner")]
    pub signer: bool,
    #[serde(default, alias = "isOptional")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<IdlAccountItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<u8>>,
    #[serde(default)]
    pub accounts: Vec<IdlAccountItem>,
    #[serde(default)]
    pub args: Vec<IdlField>,
}

impl IdlInstruction {
    /// Explicit discriminator, else `sha256("global:<snake_name>")[..8]`.
    pub fn discriminator_bytes(&self) -> [u8; DISCRIMINATOR_LEN] {
        if let Some(explicit) = self
            .discriminator
            .as_deref()
            .and_then(|d| <[u8; DISCRIMINATOR_LEN]>::try_from(d).ok())
        {
            return explicit;
        }
        sighash(&to_snake_case(&self.name))
    }

    /// Leaf accounts in declaration order.
    pub fn flat_accounts(&self) -> Vec<&IdlAccountItem> {
        fn walk<'a>(items: &'a [IdlAccountItem], out: &mut Vec<&'a IdlAccountItem>) {
            for item in items {
                if item.accounts.is_empty() {
                    out.push(item);
                } else {
                    walk(&item.accounts, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.accounts, &mut out);
        out
    }

    /// Discriminator followed by the Borsh encoding of `args`, given either
    /// positionally (array) or by name (object). `types` resolves
    /// `defined` argument types.
    pub fn encode(&self, args: &Value, types: &[IdlTypeDef]) -> Result<Vec<u8>, IdlError> {
        let mut out = self.discriminator_bytes().to_vec();
        if args.is_null() && self.args.is_empty() {
            return Ok(out);
        }
        let encoder = Encoder { types };
        encoder.fields("args", &self.args, args, &mut out, 0)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IdlMetadata>,
    pub instructions: Vec<IdlInstruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<IdlTypeDef>,
}

impl Idl {
    pub fn from_value(value: Value) -> Result<Self, IdlError> {
        serde_json::from_value(value).map_err(|e| IdlError::Parse(e.to_string()))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdlError> {
        serde_json::from_slice(bytes).map_err(|e| IdlError::Parse(e.to_string()))
    }

    pub fn program_name(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .map(|m| m.name.as_str())
            .or(self.name.as_deref())
    }

    /// Address recorded in the IDL, if it parses.
    pub fn address(&self) -> Option<Pubkey> {
        self.address.as_deref().and_then(|a| a.parse().ok())
    }

    /// Look up a method by its IDL name or its snake_case form.
    pub fn instruction(&self, method: &str) -> Option<&IdlInstruction> {
        let wanted = to_snake_case(method);
        self.instructions
            .iter()
            .find(|ix| ix.name == method || to_snake_case(&ix.name) == wanted)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.instructions.iter().map(|ix| ix.name.clone()).collect()
    }

    /// Encode a call to `ix` (one of this IDL's instructions).
    pub fn encode_call(&self, ix: &IdlInstruction, args: &Value) -> Result<Vec<u8>, IdlError> {
        ix.encode(args, &self.types)
    }
}

pub fn sighash(snake_name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = sha256(format!("global:{snake_name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn invalid(name: &str, ty: &IdlType, reason: impl Into<String>) -> IdlError {
    IdlError::InvalidArgument {
        name: name.to_string(),
        expected: ty.to_string(),
        reason: reason.into(),
    }
}

/// Integers may be JSON numbers or decimal strings (for u64/u128 beyond
/// what JSON numbers carry exactly).
fn integer<T>(name: &str, ty: &IdlType, value: &Value) -> Result<T, IdlError>
where
    T: std::str::FromStr + TryFrom<i128>,
{
    let parsed: Option<T> = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .and_then(|v| T::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(name, ty, format!("got {value}")))
}

fn encode_len(name: &str, ty: &IdlType, len: usize, out: &mut Vec<u8>) -> Result<(), IdlError> {
    let len = u32::try_from(len).map_err(|_| invalid(name, ty, "too long"))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Nesting limit for defined types; aliases can refer to each other.
const MAX_DEPTH: usize = 32;

static NO_FIELDS: Value = Value::Null;

struct Encoder<'a> {
    types: &'a [IdlTypeDef],
}

impl Encoder<'_> {
    fn lookup(&self, name: &str) -> Option<&IdlTypeDef> {
        // Legacy IDLs sometimes qualify names with a module path.
        let short = name.rsplit("::").next().unwrap_or(name);
        self.types
            .iter()
            .find(|def| def.name == name || def.name == short)
    }

    /// Named fields from an object (snake_case or camelCase keys) or an
    /// array in declaration order.
    fn fields(
        &self,
        name: &str,
        fields: &[IdlField],
        value: &Value,
        out: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), IdlError> {
        match value {
            Value::Array(values) => {
                if values.len() != fields.len() {
                    return Err(IdlError::ArgumentCount {
                        expected: fields.len(),
                        actual: values.len(),
                    });
                }
                for (field, value) in fields.iter().zip(values) {
                    self.value(&field.name, &field.ty, value, out, depth)?;
                }
            }
            Value::Object(map) => {
                for field in fields {
                    let value = map
                        .get(&field.name)
                        .or_else(|| map.get(&to_camel_case(&field.name)))
                        .ok_or_else(|| IdlError::MissingArgument(field.name.clone()))?;
                    self.value(&field.name, &field.ty, value, out, depth)?;
                }
            }
            other => {
                return Err(IdlError::InvalidArgument {
                    name: name.to_string(),
                    expected: "an array or object".to_string(),
                    reason: format!("got {other}"),
                })
            }
        }
        Ok(())
    }

    fn defined_fields(
        &self,
        name: &str,
        fields: Option<&IdlDefinedFields>,
        value: &Value,
        out: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), IdlError> {
        match fields {
            None => Ok(()),
            Some(IdlDefinedFields::Named(named)) => self.fields(name, named, value, out, depth),
            Some(IdlDefinedFields::Tuple(types)) => {
                let items = match value {
                    Value::Array(items) => items.as_slice(),
                    single if types.len() == 1 => std::slice::from_ref(single),
                    other => {
                        return Err(IdlError::InvalidArgument {
                            name: name.to_string(),
                            expected: format!("a tuple of {}", types.len()),
                            reason: format!("got {other}"),
                        })
                    }
                };
                if items.len() != types.len() {
                    return Err(IdlError::ArgumentCount {
                        expected: types.len(),
                        actual: items.len(),
                    });
                }
                for (ty, item) in types.iter().zip(items) {
                    self.value(name, ty, item, out, depth)?;
                }
                Ok(())
            }
        }
    }

    /// A variant is `"Name"` when it has no fields, else `{"Name": fields}`.
    fn variant(
        &self,
        name: &str,
        ty: &IdlType,
        variants: &[IdlEnumVariant],
        value: &Value,
        out: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), IdlError> {
        let (variant_name, payload) = match value {
            Value::String(s) => (s.as_str(), &NO_FIELDS),
            Value::Object(map) if map.len() == 1 => match map.iter().next() {
                Some((k, v)) => (k.as_str(), v),
                None => return Err(invalid(name, ty, "empty variant")),
            },
            other => return Err(invalid(name, ty, format!("got {other}"))),
        };
        let wanted = to_snake_case(variant_name);
        let (index, variant) = variants
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == variant_name || to_snake_case(&v.name) == wanted)
            .ok_or_else(|| invalid(name, ty, format!("unknown variant '{variant_name}'")))?;
        let index = u8::try_from(index).map_err(|_| invalid(name, ty, "too many variants"))?;
        out.push(index);
        self.defined_fields(name, variant.fields.as_ref(), payload, out, depth)
    }

    fn value(
        &self,
        name: &str,
        ty: &IdlType,
        value: &Value,
        out: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), IdlError> {
        match ty {
            IdlType::Bool => {
                let b = value
                    .as_bool()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                out.push(u8::from(b));
            }
            IdlType::U8 => out.push(integer::<u8>(name, ty, value)?),
            IdlType::U16 => out.extend_from_slice(&integer::<u16>(name, ty, value)?.to_le_bytes()),
            IdlType::U32 => out.extend_from_slice(&integer::<u32>(name, ty, value)?.to_le_bytes()),
            IdlType::U64 => out.extend_from_slice(&integer::<u64>(name, ty, value)?.to_le_bytes()),
            IdlType::U128 => {
                out.extend_from_slice(&integer::<u128>(name, ty, value)?.to_le_bytes())
            }
            IdlType::I8 => out.extend_from_slice(&integer::<i8>(name, ty, value)?.to_le_bytes()),
            IdlType::I16 => out.extend_from_slice(&integer::<i16>(name, ty, value)?.to_le_bytes()),
            IdlType::I32 => out.extend_from_slice(&integer::<i32>(name, ty, value)?.to_le_bytes()),
            IdlType::I64 => out.extend_from_slice(&integer::<i64>(name, ty, value)?.to_le_bytes()),
            IdlType::I128 => {
                out.extend_from_slice(&integer::<i128>(name, ty, value)?.to_le_bytes())
            }
            IdlType::F32 => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                out.extend_from_slice(&(v as f32).to_le_bytes());
            }
            IdlType::F64 => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            IdlType::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                encode_len(name, ty, s.len(), out)?;
                out.extend_from_slice(s.as_bytes());
            }
            IdlType::Pubkey => {
                let key: Pubkey = value
                    .as_str()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?
                    .parse()
                    .map_err(|e| invalid(name, ty, format!("{e}")))?;
                out.extend_from_slice(key.as_bytes());
            }
            IdlType::Bytes => {
                let bytes = match value {
                    Value::String(s) => {
                        try_base64_decode(s).ok_or_else(|| invalid(name, ty, "not valid base64"))?
                    }
                    Value::Array(items) => items
                        .iter()
                        .map(|v| integer::<u8>(name, ty, v))
                        .collect::<Result<Vec<u8>, _>>()?,
                    other => return Err(invalid(name, ty, format!("got {other}"))),
                };
                encode_len(name, ty, bytes.len(), out)?;
                out.extend_from_slice(&bytes);
            }
            IdlType::Vec(inner) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                encode_len(name, ty, items.len(), out)?;
                for item in items {
                    self.value(name, inner, item, out, depth)?;
                }
            }
            IdlType::Option(inner) => {
                if value.is_null() {
                    out.push(0);
                } else {
                    out.push(1);
                    self.value(name, inner, value, out, depth)?;
                }
            }
            IdlType::Array(inner, len) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid(name, ty, format!("got {value}")))?;
                if items.len() != *len {
                    return Err(invalid(
                        name,
                        ty,
                        format!("expected {len} elements, got {}", items.len()),
                    ));
                }
                for item in items {
                    self.value(name, inner, item, out, depth)?;
                }
            }
            IdlType::Defined(type_name) => {
                if depth >= MAX_DEPTH {
                    return Err(invalid(name, ty, "type nesting too deep"));
                }
                let def = self
                    .lookup(type_name)
                    .ok_or_else(|| IdlError::UnsupportedType(format!("undefined type '{type_name}'")))?;
                if !def.generics.is_empty() {
                    return Err(IdlError::UnsupportedType(format!("generic type '{type_name}'")));
                }
                match &def.body {
                    IdlTypeDefBody::Struct { fields } => {
                        self.defined_fields(name, fields.as_ref(), value, out, depth + 1)?
                    }
                    IdlTypeDefBody::Enum { variants } => {
                        self.variant(name, ty, variants, value, out, depth + 1)?
                    }
                    IdlTypeDefBody::Alias { alias } => {
                        self.value(name, alias, value, out, depth + 1)?
                    }
                }
            }
            IdlType::Unsupported(raw) => return Err(IdlError::UnsupportedType(raw.to_string())),
        }
        Ok(())
    }
}
