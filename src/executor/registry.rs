use super::executer::Replayable;
use crate::core::{Command, PrevalenceError, Result, System};
use crate::storage::{LogRecord, Marshaller};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;

type EncodeFn<M> = fn(&M, &dyn Any) -> Result<Vec<u8>>;
type DecodeFn<S, M> = fn(&M, &[u8]) -> Result<Box<dyn Replayable<S>>>;

struct Registration<S: System, M: Marshaller> {
    type_id: TypeId,
    encode: EncodeFn<M>,
    decode: DecodeFn<S, M>,
}

/// Maps command kinds to encoders and decoders so logged records can be
/// replayed.
///
/// Only registered command types may be executed: anything else could be
/// logged but never decoded again.
pub struct CommandRegistry<S: System, M: Marshaller> {
    commands: HashMap<&'static str, Registration<S, M>>,
}

impl<S: System, M: Marshaller> CommandRegistry<S, M> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers `C` under `C::KIND`. Its payload goes through the
    /// marshaller unless `C::codec()` declares custom hooks.
    /// Registering the same type twice is a no-op.
    pub fn register<C>(&mut self) -> Result<()>
    where
        C: Command<S> + Serialize + DeserializeOwned,
    {
        self.insert::<C>(encode_marshalled::<S, M, C>, decode_marshalled::<S, M, C>)
    }

    /// Registers a command that encodes itself through `C::codec()`.
    /// `C` does not need to be serde-serializable.
    pub fn register_custom<C: Command<S>>(&mut self) -> Result<()> {
        if !C::codec().is_custom() {
            return Err(PrevalenceError::InvalidCommand(format!(
                "command '{}' is registered as custom but declares no codec hooks",
                C::KIND
            )));
        }
        self.insert::<C>(encode_custom::<S, M, C>, decode_custom::<S, M, C>)
    }

    fn insert<C: Command<S>>(&mut self, encode: EncodeFn<M>, decode: DecodeFn<S, M>) -> Result<()> {
        let type_id = TypeId::of::<C>();
        if let Some(existing) = self.commands.get(C::KIND) {
            if existing.type_id == type_id {
                return Ok(());
            }
            return Err(PrevalenceError::InvalidCommand(format!(
                "command kind '{}' is already registered by another type",
                C::KIND
            )));
        }
        self.commands.insert(
            C::KIND,
            Registration {
                type_id,
                encode,
                decode,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.commands.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.commands.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn registration<C: Command<S>>(&self) -> Result<&Registration<S, M>> {
        self.commands
            .get(C::KIND)
            .filter(|registration| registration.type_id == TypeId::of::<C>())
            .ok_or_else(|| {
                PrevalenceError::InvalidCommand(format!(
                    "'{}' ({}) is not a registered command of this system",
                    C::KIND,
                    std::any::type_name::<C>()
                ))
            })
    }

    /// Checks that `C` can be logged and later replayed.
    pub fn validate<C: Command<S>>(&self) -> Result<()> {
        self.registration::<C>()?;

        let hooks = C::codec();
        if hooks.dump.is_some() && hooks.load.is_none() {
            return Err(PrevalenceError::InvalidCommand(format!(
                "command '{}' defines custom marshal_dump but no marshal_load",
                C::KIND
            )));
        }
        if hooks.load.is_some() && hooks.dump.is_none() {
            return Err(PrevalenceError::InvalidCommand(format!(
                "command '{}' defines custom marshal_load but no marshal_dump",
                C::KIND
            )));
        }
        Ok(())
    }

    /// Builds the log record for `command`. Nothing is written here.
    pub fn encode<C: Command<S>>(&self, marshaller: &M, command: &C) -> Result<LogRecord> {
        let registration = self.registration::<C>()?;
        let payload = (registration.encode)(marshaller, command)?;
        Ok(LogRecord::new(C::KIND, payload).coalescible(command.is_coalescible()))
    }

    pub fn decode(&self, marshaller: &M, record: &LogRecord) -> Result<Box<dyn Replayable<S>>> {
        let registration = self.commands.get(record.kind.as_str()).ok_or_else(|| {
            PrevalenceError::Serialization(format!("unknown command kind '{}'", record.kind))
        })?;
        (registration.decode)(marshaller, &record.payload)
    }
}

impl<S: System, M: Marshaller> Default for CommandRegistry<S, M> {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast<S: System, C: Command<S>>(command: &dyn Any) -> Result<&C> {
    command.downcast_ref::<C>().ok_or_else(|| {
        PrevalenceError::InvalidCommand(format!(
            "registered encoder for '{}' received another type",
            C::KIND
        ))
    })
}

fn missing_hook<S: System, C: Command<S>>(hook: &str) -> PrevalenceError {
    PrevalenceError::InvalidCommand(format!("command '{}' has no custom {}", C::KIND, hook))
}

fn encode_marshalled<S, M, C>(marshaller: &M, command: &dyn Any) -> Result<Vec<u8>>
where
    S: System,
    M: Marshaller,
    C: Command<S> + Serialize,
{
    let command = downcast::<S, C>(command)?;
    match C::codec().dump {
        Some(dump) => dump(command),
        None => marshaller.to_bytes(command),
    }
}

fn decode_marshalled<S, M, C>(marshaller: &M, payload: &[u8]) -> Result<Box<dyn Replayable<S>>>
where
    S: System,
    M: Marshaller,
    C: Command<S> + DeserializeOwned,
{
    let command: C = match C::codec().load {
        Some(load) => load(payload)?,
        None => marshaller.from_bytes(payload)?,
    };
    Ok(Box::new(command))
}

fn encode_custom<S: System, M: Marshaller, C: Command<S>>(
    _marshaller: &M,
    command: &dyn Any,
) -> Result<Vec<u8>> {
    let command = downcast::<S, C>(command)?;
    let dump = C::codec().dump.ok_or_else(|| missing_hook::<S, C>("marshal_dump"))?;
    dump(command)
}

fn decode_custom<S: System, M: Marshaller, C: Command<S>>(
    _marshaller: &M,
    payload: &[u8],
) -> Result<Box<dyn Replayable<S>>> {
    let load = C::codec().load.ok_or_else(|| missing_hook::<S, C>("marshal_load"))?;
    Ok(Box::new(load(payload)?))
}
