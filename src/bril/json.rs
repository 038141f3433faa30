//! JSON Surface
//!
//! Deserializes the Bril JSON wire format into loosely-typed raw mirror
//! structs, then cooks those into the typed representation in
//! [`types`](crate::bril::types). Serialization back out is built by hand so
//! that absent fields (no `dest`, empty `args`) are omitted the way other
//! Bril tooling expects.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::bril::types::{
    Argument, Function, Instruction, Item, Literal, Op, Program, Type,
};
use crate::error::Error;

#[derive(Debug, Deserialize)]
struct RawProgram {
    functions: Vec<RawFunction>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    args: Vec<RawArgument>,
    #[serde(rename = "type")]
    return_type: Option<RawType>,
    #[serde(default)]
    instrs: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawArgument {
    name: String,
    #[serde(rename = "type")]
    ty: RawType,
}

/// A label is an object with only a `label` key; anything else is an
/// instruction. The label variant must come first so `serde` tries it before
/// the catch-all instruction shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItem {
    Label { label: String },
    Instruction(RawInstruction),
}

#[derive(Debug, Deserialize)]
struct RawInstruction {
    op: String,
    dest: Option<String>,
    #[serde(rename = "type")]
    ty: Option<RawType>,
    value: Option<Value>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    funcs: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
}

/// A type is either a bare primitive name or a single-entry object
/// parametrizing an inner type, e.g. `{"ptr": "int"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawType {
    Prim(String),
    Param(BTreeMap<String, RawType>),
}

/// Parses a JSON-encoded Bril program into the typed representation.
///
/// # Errors
///
/// Returns an error if the input is not valid program JSON, names an unknown
/// operator or type, or contains an instruction missing a field its shape
/// requires.
pub fn parse_program(input: &str) -> Result<Program, Error> {
    let raw: RawProgram = serde_json::from_str(input)?;

    let functions = raw
        .functions
        .into_iter()
        .map(cook_function)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Program { functions })
}

fn cook_function(raw: RawFunction) -> Result<Function, Error> {
    let args = raw
        .args
        .into_iter()
        .map(|arg| {
            Ok(Argument {
                name: arg.name,
                ty: cook_type(&arg.ty)?,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let return_type = raw.return_type.as_ref().map(cook_type).transpose()?;

    let instrs = raw
        .instrs
        .into_iter()
        .map(|item| match item {
            RawItem::Label { label } => Ok(Item::Label(label)),
            RawItem::Instruction(instr) => cook_instruction(instr).map(Item::Instr),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Function {
        name: raw.name,
        args,
        return_type,
        instrs,
    })
}

fn cook_type(raw: &RawType) -> Result<Type, Error> {
    match raw {
        RawType::Prim(name) => match name.as_str() {
            "int" => Ok(Type::Int),
            "bool" => Ok(Type::Bool),
            "float" => Ok(Type::Float),
            other => Err(Error::UnknownType(other.to_string())),
        },
        RawType::Param(entries) => {
            let (name, inner) = entries
                .iter()
                .next()
                .ok_or_else(|| Error::UnknownType("{}".to_string()))?;
            match name.as_str() {
                "ptr" => Ok(Type::Ptr(Box::new(cook_type(inner)?))),
                other => Err(Error::UnknownType(other.to_string())),
            }
        }
    }
}

fn cook_instruction(raw: RawInstruction) -> Result<Instruction, Error> {
    let op = Op::from_str(&raw.op)?;

    if op == Op::Const {
        let dest = raw
            .dest
            .ok_or_else(|| Error::MalformedInstruction("const without dest".to_string()))?;
        let ty = raw
            .ty
            .as_ref()
            .ok_or_else(|| Error::MalformedInstruction(format!("const {dest} without type")))?;
        let ty = cook_type(ty)?;
        let value = raw
            .value
            .ok_or_else(|| Error::MalformedInstruction(format!("const {dest} without value")))?;
        let value = cook_literal(&value)?;

        return Ok(Instruction::Constant { dest, ty, value });
    }

    match raw.dest {
        None => Ok(Instruction::Effect {
            op,
            args: raw.args,
            funcs: raw.funcs,
            labels: raw.labels,
        }),
        Some(dest) => {
            let ty = raw.ty.as_ref().ok_or_else(|| {
                Error::MalformedInstruction(format!("value operation {dest} without type"))
            })?;
            let ty = cook_type(ty)?;

            Ok(Instruction::Value {
                op,
                dest,
                ty,
                args: raw.args,
                funcs: raw.funcs,
                labels: raw.labels,
            })
        }
    }
}

/// Booleans and integers before floats: `4` cooks to an `int` literal even
/// though it is also a valid float.
fn cook_literal(value: &Value) -> Result<Literal, Error> {
    if let Some(b) = value.as_bool() {
        return Ok(Literal::Bool(b));
    }
    if let Some(i) = value.as_i64() {
        return Ok(Literal::Int(i));
    }
    if let Some(f) = value.as_f64() {
        return Ok(Literal::Float(f));
    }

    Err(Error::MalformedInstruction(format!(
        "const value {value} is not a literal"
    )))
}

/// Serializes a typed program back to pretty-printed Bril JSON.
#[must_use]
pub fn program_to_json(program: &Program) -> String {
    let functions: Vec<Value> = program.functions.iter().map(function_value).collect();
    let value = json!({ "functions": functions });

    // A `serde_json::Value` cannot fail to serialize.
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

fn function_value(func: &Function) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), json!(func.name));

    if !func.args.is_empty() {
        let args: Vec<Value> = func
            .args
            .iter()
            .map(|arg| json!({ "name": arg.name, "type": type_value(&arg.ty) }))
            .collect();
        map.insert("args".to_string(), Value::Array(args));
    }
    if let Some(ty) = &func.return_type {
        map.insert("type".to_string(), type_value(ty));
    }

    let instrs: Vec<Value> = func.instrs.iter().map(item_value).collect();
    map.insert("instrs".to_string(), Value::Array(instrs));

    Value::Object(map)
}

fn type_value(ty: &Type) -> Value {
    match ty {
        Type::Int => json!("int"),
        Type::Bool => json!("bool"),
        Type::Float => json!("float"),
        Type::Ptr(inner) => json!({ "ptr": type_value(inner) }),
    }
}

fn item_value(item: &Item) -> Value {
    match item {
        Item::Label(label) => json!({ "label": label }),
        Item::Instr(instr) => instruction_value(instr),
    }
}

fn instruction_value(instr: &Instruction) -> Value {
    let mut map = Map::new();
    map.insert("op".to_string(), json!(instr.op().as_str()));

    match instr {
        Instruction::Constant { dest, ty, value } => {
            map.insert("dest".to_string(), json!(dest));
            map.insert("type".to_string(), type_value(ty));
            map.insert("value".to_string(), literal_value(value));
        }
        Instruction::Value { dest, ty, .. } => {
            map.insert("dest".to_string(), json!(dest));
            map.insert("type".to_string(), type_value(ty));
        }
        Instruction::Effect { .. } => {}
    }

    if !instr.args().is_empty() {
        map.insert("args".to_string(), json!(instr.args()));
    }
    if let Instruction::Value { funcs, .. } | Instruction::Effect { funcs, .. } = instr
        && !funcs.is_empty()
    {
        map.insert("funcs".to_string(), json!(funcs));
    }
    if !instr.labels().is_empty() {
        map.insert("labels".to_string(), json!(instr.labels()));
    }

    Value::Object(map)
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(v) => json!(v),
        Literal::Bool(v) => json!(v),
        Literal::Float(v) => json!(v),
    }
}
