//! Request binding.
//!
//! A [`Binder`] turns a request into [`Bindings`]: a flat field map that
//! deserializes into any `T: DeserializeOwned`. [`DefaultBinder`] decodes
//! the body of POST/PUT/PATCH requests by content type (JSON, XML or form),
//! then overlays the query string, so body fields and query parameters land
//! in the same target:
//!
//! ```
//! use serde::Deserialize;
//! use trellis_core::{Context, HttpRequest};
//!
//! #[derive(Deserialize)]
//! struct Search {
//!     term: String,
//!     page: u32,
//! }
//!
//! let ctx = Context::new(
//!     HttpRequest::new("POST", "/search?page=3")
//!         .with_header("Content-Type", "application/json")
//!         .with_body(r#"{"term": "rust"}"#),
//! );
//! let search: Search = ctx.bind().unwrap();
//! assert_eq!(search.term, "rust");
//! assert_eq!(search.page, 3);
//! ```
//!
//! Text values (query, form, XML) are parsed into the target field's type on
//! demand; repeated keys bind to sequences.

use crate::http::{CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT_XML, CONTENT_TYPE_XML};
use crate::{Context, Error, Result};
use serde::de::value::{MapDeserializer, SeqDeserializer, StringDeserializer};
use serde::de::{self, DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::trace;

type DeError = serde_json::Error;

/// Decodes a request into [`Bindings`].
pub trait Binder: Send + Sync {
    fn bind(&self, ctx: &Context) -> Result<Bindings>;
}

/// One bound field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// A JSON value taken from a JSON body.
    Json(Value),
    /// Raw text values, in arrival order.
    Text(Vec<String>),
}

/// Field map produced by a [`Binder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    fields: BTreeMap<String, Field>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_json(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), Field::Json(value));
    }

    /// Append a text value; an existing text field for `key` grows into a sequence.
    pub fn push_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        match self.fields.entry(key.into()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => match entry.get_mut() {
                Field::Text(values) => values.push(value.into()),
                other => *other = Field::Text(vec![value.into()]),
            },
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(Field::Text(vec![value.into()]));
            }
        }
    }

    /// Replace whatever is bound to `key` with the given text values.
    pub fn set_text(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.fields.insert(key.into(), Field::Text(values));
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Deserialize the bound fields into `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        let map = MapDeserializer::<_, DeError>::new(
            self.fields
                .into_iter()
                .map(|(key, field)| (key, FieldDeserializer(field))),
        );
        T::deserialize(map).map_err(|e| Error::Bind(e.to_string()))
    }
}

/// Body by content type for POST/PUT/PATCH, then the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBinder;

impl Binder for DefaultBinder {
    fn bind(&self, ctx: &Context) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        let req = ctx.request();

        if req.is_post() || req.is_put() || req.is_patch() {
            let content_type = req.content_type().unwrap_or_default();
            trace!(content_type = %content_type, body_len = req.body.len(), "Binding request body");

            if content_type.starts_with(CONTENT_TYPE_JSON) {
                bind_json(&req.body, &mut bindings)?;
            } else if content_type.starts_with(CONTENT_TYPE_XML)
                || content_type.starts_with(CONTENT_TYPE_TEXT_XML)
            {
                bind_xml(&req.body, &mut bindings)?;
            } else if content_type.starts_with(CONTENT_TYPE_FORM) {
                bind_form(&req.body, &mut bindings)?;
            }
        }

        let mut query: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (key, value) in &ctx.url().query {
            query.entry(key.as_str()).or_default().push(value.clone());
        }
        for (key, values) in query {
            bindings.set_text(key, values);
        }

        Ok(bindings)
    }
}

fn bind_json(body: &[u8], bindings: &mut Bindings) -> Result<()> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            for (key, value) in map {
                bindings.insert_json(key, value);
            }
            Ok(())
        }
        Ok(_) => Err(Error::Bind("JSON body must be an object".to_string())),
        Err(e) => Err(Error::Bind(format!("invalid JSON body: {}", e))),
    }
}

fn bind_xml(body: &[u8], bindings: &mut Bindings) -> Result<()> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Bind(format!("XML body is not UTF-8: {}", e)))?
        .trim();
    if text.is_empty() {
        return Ok(());
    }

    let fields: BTreeMap<String, String> = quick_xml::de::from_str(text)
        .map_err(|e| Error::Bind(format!("invalid XML body: {}", e)))?;

    for (key, value) in fields {
        if key.starts_with('$') {
            continue;
        }
        let key = key.strip_prefix('@').unwrap_or(&key);
        bindings.push_text(key, value);
    }
    Ok(())
}

fn bind_form(body: &[u8], bindings: &mut Bindings) -> Result<()> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| Error::Bind(format!("invalid form body: {}", e)))?;

    for (key, value) in pairs {
        bindings.push_text(key, value);
    }
    Ok(())
}

// ========== Deserializers ==========

struct FieldDeserializer(Field);

impl<'de> IntoDeserializer<'de, DeError> for FieldDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! forward_field {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
                match self.0 {
                    Field::Json(value) => value.$method(visitor),
                    Field::Text(values) => TextDeserializer(values).$method(visitor),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for FieldDeserializer {
    type Error = DeError;

    forward_field! {
        deserialize_any deserialize_bool
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64 deserialize_char
        deserialize_str deserialize_string deserialize_bytes deserialize_byte_buf
        deserialize_option deserialize_unit deserialize_seq deserialize_map
        deserialize_identifier deserialize_ignored_any
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_unit_struct(name, visitor),
            Field::Text(values) => TextDeserializer(values).deserialize_unit_struct(name, visitor),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_newtype_struct(name, visitor),
            Field::Text(values) => {
                TextDeserializer(values).deserialize_newtype_struct(name, visitor)
            }
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_tuple(len, visitor),
            Field::Text(values) => TextDeserializer(values).deserialize_tuple(len, visitor),
        }
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_tuple_struct(name, len, visitor),
            Field::Text(values) => {
                TextDeserializer(values).deserialize_tuple_struct(name, len, visitor)
            }
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_struct(name, fields, visitor),
            Field::Text(values) => {
                TextDeserializer(values).deserialize_struct(name, fields, visitor)
            }
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.0 {
            Field::Json(value) => value.deserialize_enum(name, variants, visitor),
            Field::Text(values) => {
                TextDeserializer(values).deserialize_enum(name, variants, visitor)
            }
        }
    }
}

/// Text values parsed into whatever type the visitor asks for.
///
/// Scalars read the first value; sequences read all of them.
struct TextDeserializer(Vec<String>);

impl TextDeserializer {
    fn first(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    fn into_first(self) -> String {
        self.0.into_iter().next().unwrap_or_default()
    }

    fn parse<T>(&self, ty: &str) -> std::result::Result<T, DeError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.first().trim();
        raw.parse()
            .map_err(|e| de::Error::custom(format!("invalid {} value {:?}: {}", ty, raw, e)))
    }

    fn parse_bool(&self) -> std::result::Result<bool, DeError> {
        match self.first().trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(true),
            "false" | "0" | "off" | "no" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid bool value {:?}", other))),
        }
    }

    fn into_seq(self) -> SeqDeserializer<std::vec::IntoIter<TextDeserializer>, DeError> {
        let items: Vec<TextDeserializer> = self
            .0
            .into_iter()
            .map(|value| TextDeserializer(vec![value]))
            .collect();
        SeqDeserializer::new(items.into_iter())
    }
}

impl<'de> IntoDeserializer<'de, DeError> for TextDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_text {
    ($($method:ident => $visit:ident : $ty:ty,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
                visitor.$visit(self.parse::<$ty>(stringify!($ty))?)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for TextDeserializer {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        if self.0.len() > 1 {
            visitor.visit_seq(self.into_seq())
        } else {
            visitor.visit_string(self.into_first())
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_bool(self.parse_bool()?)
    }

    parse_text! {
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
        deserialize_char => visit_char: char,
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.into_first())
    }

    fn deserialize_string<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.into_first())
    }

    fn deserialize_identifier<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.into_first())
    }

    fn deserialize_bytes<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_byte_buf(self.into_first().into_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_byte_buf(self.into_first().into_bytes())
    }

    fn deserialize_option<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        if self.0.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_seq(self.into_seq())
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_seq(self.into_seq())
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_seq(self.into_seq())
    }

    fn deserialize_map<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        let variant: StringDeserializer<DeError> = self.into_first().into_deserializer();
        visitor.visit_enum(variant)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}
