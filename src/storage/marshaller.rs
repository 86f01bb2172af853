//! Pluggable serialization for command records and snapshots

use crate::core::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Serialization strategy shared by the command log and the snapshotter.
///
/// `load` must consume exactly one value from `source` so that records
/// written back to back can be read sequentially until end of stream.
/// A store must always be reopened with the marshaller that wrote it.
pub trait Marshaller: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn dump<T: Serialize + ?Sized>(&self, value: &T, sink: &mut dyn Write) -> Result<()>;

    fn load<T: DeserializeOwned>(&self, source: &mut dyn Read) -> Result<T>;

    fn to_bytes<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.dump(value, &mut buffer)?;
        Ok(buffer)
    }

    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let mut source = bytes;
        self.load(&mut source)
    }
}

/// MessagePack with named struct fields (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePack;

impl Marshaller for MessagePack {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn dump<T: Serialize + ?Sized>(&self, value: &T, mut sink: &mut dyn Write) -> Result<()> {
        rmp_serde::encode::write_named(&mut sink, value)
            .map_err(|e| PrevalenceError::Serialization(format!("msgpack encode: {}", e)))
    }

    fn load<T: DeserializeOwned>(&self, source: &mut dyn Read) -> Result<T> {
        rmp_serde::decode::from_read(source)
            .map_err(|e| PrevalenceError::Serialization(format!("msgpack decode: {}", e)))
    }
}

/// Compact JSON, one value after another with no separator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Marshaller for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn dump<T: Serialize + ?Sized>(&self, value: &T, sink: &mut dyn Write) -> Result<()> {
        serde_json::to_writer(sink, value)
            .map_err(|e| PrevalenceError::Serialization(format!("json encode: {}", e)))
    }

    fn load<T: DeserializeOwned>(&self, source: &mut dyn Read) -> Result<T> {
        // Not `from_reader`: that insists on end of input after the value.
        let mut deserializer = serde_json::Deserializer::from_reader(source);
        T::deserialize(&mut deserializer)
            .map_err(|e| PrevalenceError::Serialization(format!("json decode: {}", e)))
    }
}
