use itertools::Itertools;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::api::error::{CoercionError, RouteError};
use crate::api::request::RequestData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralValue {
    Int(i64),
    Str(String),
}

impl From<i64> for LiteralValue {
    fn from(value: i64) -> Self {
        LiteralValue::Int(value)
    }
}

impl From<&str> for LiteralValue {
    fn from(value: &str) -> Self {
        LiteralValue::Str(value.to_string())
    }
}

/// Declared type of a handler parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Int,
    Str,
    Literal(Vec<LiteralValue>),
    Optional(Box<ParamType>),
    Path,
    Dict,
}

impl ParamType {
    pub fn optional(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }

    pub fn literal<T: Into<LiteralValue>>(values: impl IntoIterator<Item = T>) -> Self {
        ParamType::Literal(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => write!(f, "int"),
            ParamType::Str => write!(f, "str"),
            ParamType::Literal(values) => {
                let values = values
                    .iter()
                    .map(|v| match v {
                        LiteralValue::Int(i) => i.to_string(),
                        LiteralValue::Str(s) => format!("'{}'", s),
                    })
                    .join(", ");
                write!(f, "Literal[{}]", values)
            }
            ParamType::Optional(inner) => write!(f, "Optional[{}]", inner),
            ParamType::Path => write!(f, "Path"),
            ParamType::Dict => write!(f, "dict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Form,
    Json,
}

/// A coerced parameter value as handed to handlers
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    None,
    Int(i64),
    Str(String),
    Path(PathBuf),
    Dict(serde_json::Map<String, Value>),
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::None => write!(f, "None"),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::Path(v) => write!(f, "{}", v.display()),
            ParamValue::Dict(v) => write!(f, "{}", Value::Object(v.clone())),
        }
    }
}

/// Whether a handler wants the caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentUser {
    Required,
    Optional,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParam {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<ParamValue>,
}

/// Declared parameter list of a handler.
///
/// ```ignore
/// Signature::new("get_experiment")
///     .current_user()
///     .param("experiment_id", ParamType::Int)
///     .param_default("page", ParamType::Int, 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<SignatureParam>,
    pub current_user: CurrentUser,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            current_user: CurrentUser::Absent,
        }
    }

    pub fn current_user(mut self) -> Self {
        self.current_user = CurrentUser::Required;
        self
    }

    pub fn optional_current_user(mut self) -> Self {
        self.current_user = CurrentUser::Optional;
        self
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(SignatureParam {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    pub fn param_default(
        mut self,
        name: impl Into<String>,
        ty: ParamType,
        default: impl Into<ParamValue>,
    ) -> Self {
        self.params.push(SignatureParam {
            name: name.into(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    /// `Optional[...]` parameter defaulting to `None`
    pub fn optional(self, name: impl Into<String>, inner: ParamType) -> Self {
        self.param_default(name, ParamType::optional(inner), ParamValue::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub ty: ParamType,
    pub default: Option<ParamValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Int,
    String,
    Path,
}

impl Converter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Converter::Int => "int",
            Converter::String => "string",
            Converter::Path => "path",
        }
    }

    fn for_type(route: &str, name: &str, ty: &ParamType) -> Result<Self, RouteError> {
        let unsupported = || RouteError::UnsupportedType {
            route: route.to_string(),
            param: name.to_string(),
            ty: ty.to_string(),
        };
        match ty {
            ParamType::Int => Ok(Converter::Int),
            ParamType::Str => Ok(Converter::String),
            ParamType::Path => Ok(Converter::Path),
            ParamType::Literal(values) => literal_converter(values).ok_or_else(|| {
                RouteError::UnsupportedLiteral {
                    route: route.to_string(),
                    param: name.to_string(),
                }
            }),
            ParamType::Optional(inner) => match inner.as_ref() {
                ParamType::Int => Ok(Converter::Int),
                ParamType::Str => Ok(Converter::String),
                _ => Err(unsupported()),
            },
            ParamType::Dict => Err(unsupported()),
        }
    }
}

fn literal_converter(values: &[LiteralValue]) -> Option<Converter> {
    if values.is_empty() {
        None
    } else if values.iter().all(|v| matches!(v, LiteralValue::Str(_))) {
        Some(Converter::String)
    } else if values.iter().all(|v| matches!(v, LiteralValue::Int(_))) {
        Some(Converter::Int)
    } else {
        None
    }
}

/// One concrete URL shape of a handler
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    /// Typed template, e.g. `/experiments/get_experiment/{experiment_id:int}`
    pub pattern: String,
    /// Path parameters present in this shape, in URL order
    pub segments: Vec<(String, Converter)>,
    /// Values for the omitted parameters
    pub optional_defaults: BTreeMap<String, ParamValue>,
}

impl RouteSpec {
    /// Path in the router's syntax with positional capture names
    pub fn router_path(&self, base: &str) -> String {
        let captures = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, (_, converter))| match converter {
                Converter::Path => format!("*p{}", i),
                _ => format!(":p{}", i),
            })
            .collect::<Vec<_>>();
        join_route(base, &captures)
    }

    /// Segment-count and catch-all signature; two specs with the same shape are
    /// indistinguishable to the router
    pub fn shape(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|(_, c)| *c == Converter::Path)
            .collect()
    }
}

fn join_route(base: &str, parts: &[String]) -> String {
    let mut route = String::new();
    if !base.is_empty() {
        route.push('/');
        route.push_str(base);
    }
    for part in parts {
        route.push('/');
        route.push_str(part);
    }
    if route.is_empty() {
        route.push('/');
    }
    route
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteInference {
    pub routes: Vec<RouteSpec>,
    pub current_user: CurrentUser,
    pub params: Vec<ParameterSpec>,
}

impl RouteInference {
    pub fn path_params(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params
            .iter()
            .filter(|p| p.location == ParamLocation::Path)
    }
}

/// Classify every declared parameter and synthesize the 2^k route shapes
/// produced by omitting any subset of the defaulted path parameters.
pub fn infer_route(
    signature: &Signature,
    base: Option<&str>,
    arg_params: &[String],
    form_params: &[String],
    json_params: &[String],
) -> Result<RouteInference, RouteError> {
    let route = signature.name.as_str();
    let base = base.unwrap_or(route).trim_matches('/').to_string();

    for listed in arg_params.iter().chain(form_params).chain(json_params) {
        if !signature.params.iter().any(|p| &p.name == listed) {
            return Err(RouteError::UnknownParameter {
                route: route.to_string(),
                param: listed.clone(),
            });
        }
    }

    let mut params = Vec::with_capacity(signature.params.len());
    let mut parts: Vec<(String, Converter)> = Vec::new();
    let mut defaults: Vec<(String, ParamValue)> = Vec::new();

    for param in &signature.params {
        if params.iter().any(|p: &ParameterSpec| p.name == param.name) {
            return Err(RouteError::DuplicateParameter {
                route: route.to_string(),
                param: param.name.clone(),
            });
        }

        let location = if arg_params.contains(&param.name) {
            ParamLocation::Query
        } else if form_params.contains(&param.name) {
            ParamLocation::Form
        } else if json_params.contains(&param.name) {
            ParamLocation::Json
        } else {
            ParamLocation::Path
        };

        if location == ParamLocation::Path {
            if let Some((previous, Converter::Path)) = parts.last() {
                return Err(RouteError::PathNotLast {
                    route: route.to_string(),
                    param: previous.clone(),
                });
            }
            let converter = Converter::for_type(route, &param.name, &param.ty)?;
            if let Some(default) = &param.default {
                defaults.push((param.name.clone(), default.clone()));
            }
            parts.push((param.name.clone(), converter));
        }

        params.push(ParameterSpec {
            name: param.name.clone(),
            location,
            ty: param.ty.clone(),
            default: param.default.clone(),
        });
    }

    let routes = generate_routes(&base, &parts, &defaults);

    Ok(RouteInference {
        routes,
        current_user: signature.current_user,
        params,
    })
}

fn generate_routes(
    base: &str,
    parts: &[(String, Converter)],
    defaults: &[(String, ParamValue)],
) -> Vec<RouteSpec> {
    let mut routes = Vec::with_capacity(1 << defaults.len());

    for r in 0..=defaults.len() {
        for omitted in defaults.iter().combinations(r) {
            let is_omitted = |name: &str| omitted.iter().any(|(n, _)| n == name);
            let segments = parts
                .iter()
                .filter(|(name, _)| !is_omitted(name))
                .cloned()
                .collect::<Vec<_>>();
            let placeholders = segments
                .iter()
                .map(|(name, converter)| format!("{{{}:{}}}", name, converter.as_str()))
                .collect::<Vec<_>>();

            routes.push(RouteSpec {
                pattern: join_route(base, &placeholders),
                segments,
                optional_defaults: omitted.into_iter().cloned().collect(),
            });
        }
    }

    routes
}

/// Result of [`validate_parameters`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParameters {
    pub values: BTreeMap<String, ParamValue>,
    /// Request fields no declared parameter consumed
    pub leftovers: BTreeMap<String, Value>,
}

/// Resolve every declared parameter not yet in `resolved`.
///
/// Lookup order is query args, then form fields, then the JSON body.
pub fn validate_parameters(
    params: &[ParameterSpec],
    request: &RequestData,
    mut resolved: BTreeMap<String, ParamValue>,
) -> Result<ValidatedParameters, CoercionError> {
    let mut consumed: Vec<&str> = Vec::new();

    for param in params {
        if resolved.contains_key(&param.name) {
            consumed.push(&param.name);
            continue;
        }

        let raw = request
            .query_value(&param.name)
            .map(|v| Value::String(v.to_string()))
            .or_else(|| request.form_value(&param.name).map(|v| Value::String(v.to_string())))
            .or_else(|| request.json_value(&param.name).cloned());

        let value = match raw {
            Some(raw) => {
                consumed.push(&param.name);
                coerce(&param.name, &param.ty, &raw)?
            }
            None => match &param.default {
                Some(default) => default.clone(),
                None => return Err(CoercionError::Missing(param.name.clone())),
            },
        };
        resolved.insert(param.name.clone(), value);
    }

    let mut leftovers = BTreeMap::new();
    for (key, value) in request.query.iter().chain(request.form.iter()) {
        if !consumed.contains(&key.as_str()) && !leftovers.contains_key(key) {
            leftovers.insert(key.clone(), Value::String(value.clone()));
        }
    }
    if let Some(Value::Object(body)) = &request.json {
        for (key, value) in body {
            if !consumed.contains(&key.as_str()) && !leftovers.contains_key(key) {
                leftovers.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(ValidatedParameters {
        values: resolved,
        leftovers,
    })
}

/// Coerce one raw value (query/form text or a JSON value) into `ty`
pub fn coerce(name: &str, ty: &ParamType, raw: &Value) -> Result<ParamValue, CoercionError> {
    match ty {
        ParamType::Int => coerce_int(name, raw).map(ParamValue::Int),
        ParamType::Str => coerce_str(name, raw).map(ParamValue::Str),
        ParamType::Literal(allowed) => {
            let value = match literal_converter(allowed) {
                Some(Converter::Int) => LiteralValue::Int(coerce_int(name, raw)?),
                Some(_) => LiteralValue::Str(coerce_str(name, raw)?),
                None => {
                    return Err(CoercionError::UnexpectedType {
                        name: name.to_string(),
                        expected: "a homogeneous literal",
                    })
                }
            };
            if !allowed.contains(&value) {
                return Err(CoercionError::NotAllowed {
                    name: name.to_string(),
                    value: display_raw(raw),
                });
            }
            Ok(match value {
                LiteralValue::Int(v) => ParamValue::Int(v),
                LiteralValue::Str(v) => ParamValue::Str(v),
            })
        }
        ParamType::Optional(inner) => match raw {
            Value::Null => Ok(ParamValue::None),
            _ => coerce(name, inner, raw),
        },
        ParamType::Path => coerce_str(name, raw).map(|v| ParamValue::Path(PathBuf::from(v))),
        ParamType::Dict => match raw {
            Value::Object(map) => Ok(ParamValue::Dict(map.clone())),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(ParamValue::Dict(map)),
                Ok(_) => Err(CoercionError::UnexpectedType {
                    name: name.to_string(),
                    expected: "a JSON object",
                }),
                Err(e) => Err(CoercionError::InvalidDict {
                    name: name.to_string(),
                    reason: e.to_string(),
                }),
            },
            _ => Err(CoercionError::UnexpectedType {
                name: name.to_string(),
                expected: "a JSON object",
            }),
        },
    }
}

fn coerce_int(name: &str, raw: &Value) -> Result<i64, CoercionError> {
    let invalid = || CoercionError::InvalidInt {
        name: name.to_string(),
        value: display_raw(raw),
    };
    match raw {
        Value::Number(n) => n.as_i64().ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn coerce_str(name: &str, raw: &Value) -> Result<String, CoercionError> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(CoercionError::UnexpectedType {
            name: name.to_string(),
            expected: "a string",
        }),
    }
}

fn display_raw(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map positional router captures back onto the route shape's parameter names.
/// A value the converter rejects means the URL does not match this route.
pub fn bind_path_values(
    spec: &RouteSpec,
    params: &[ParameterSpec],
    captures: &HashMap<String, String>,
) -> Option<BTreeMap<String, ParamValue>> {
    let mut values = spec.optional_defaults.clone();

    for (i, (name, converter)) in spec.segments.iter().enumerate() {
        let raw = captures.get(&format!("p{}", i))?;
        let ty = params.iter().find(|p| &p.name == name).map(|p| &p.ty)?;
        let value = match converter {
            Converter::Int => raw.parse::<i64>().ok().map(ParamValue::Int)?,
            Converter::Path => ParamValue::Path(PathBuf::from(raw.trim_start_matches('/'))),
            Converter::String => ParamValue::Str(raw.clone()),
        };
        // literal path segments must still be members of the declared set
        let value = match ty {
            ParamType::Literal(_) => {
                let raw = match &value {
                    ParamValue::Int(v) => Value::from(*v),
                    _ => Value::String(raw.clone()),
                };
                coerce(name, ty, &raw).ok()?
            }
            _ => value,
        };
        values.insert(name.clone(), value);
    }

    Some(values)
}
