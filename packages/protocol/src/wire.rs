//! Helpers for the `[tag, ...fields]` tuple encoding shared by the render
//! and canvas instruction streams.

use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Split a tuple into its integer tag and the remaining fields.
pub(crate) fn split_tuple<'a>(
    kind: &'static str,
    value: &'a Value,
) -> Result<(i64, &'a [Value])> {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(ProtocolError::NotATuple { kind }),
    };
    let tag = items[0]
        .as_i64()
        .ok_or(ProtocolError::NotATuple { kind })?;
    Ok((tag, &items[1..]))
}

/// Typed access to the fields of one decoded tuple.
pub(crate) struct Fields<'a> {
    instruction: &'static str,
    items: &'a [Value],
}

impl<'a> Fields<'a> {
    pub(crate) fn new(instruction: &'static str, items: &'a [Value]) -> Self {
        Self { instruction, items }
    }

    fn error(&self, index: usize, message: impl Into<String>) -> ProtocolError {
        ProtocolError::Field {
            instruction: self.instruction,
            index,
            message: message.into(),
        }
    }

    /// A field that may be absent or null.
    pub(crate) fn optional(&self, index: usize) -> Option<&'a Value> {
        match self.items.get(index) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    pub(crate) fn value(&self, index: usize) -> Result<&'a Value> {
        self.items
            .get(index)
            .ok_or_else(|| self.error(index, "is missing"))
    }

    pub(crate) fn u64(&self, index: usize) -> Result<u64> {
        self.value(index)?
            .as_u64()
            .ok_or_else(|| self.error(index, "must be a non-negative integer"))
    }

    pub(crate) fn opt_u64(&self, index: usize) -> Result<Option<u64>> {
        match self.optional(index) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.error(index, "must be a non-negative integer or null")),
        }
    }

    pub(crate) fn f64(&self, index: usize) -> Result<f64> {
        self.value(index)?
            .as_f64()
            .ok_or_else(|| self.error(index, "must be a number"))
    }

    pub(crate) fn string(&self, index: usize) -> Result<String> {
        self.value(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.error(index, "must be a string"))
    }

    pub(crate) fn opt_string(&self, index: usize) -> Result<Option<String>> {
        match self.optional(index) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.error(index, "must be a string or null")),
        }
    }

    /// Decode a field through serde.
    pub(crate) fn decode<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T> {
        serde_json::from_value(self.value(index)?.clone())
            .map_err(|e| self.error(index, e.to_string()))
    }

    pub(crate) fn opt_decode<T: serde::de::DeserializeOwned>(
        &self,
        index: usize,
    ) -> Result<Option<T>> {
        match self.optional(index) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| self.error(index, e.to_string())),
        }
    }

    /// Require the first `N` fields to be numbers.
    pub(crate) fn numbers<const N: usize>(&self) -> Result<[f64; N]> {
        if self.items.len() < N {
            return Err(self.error(self.items.len(), format!("expected {} numbers", N)));
        }
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.f64(i)?;
        }
        Ok(out)
    }
}
