use crate::karisma_types::Pin;
use crate::karisma_types::SwitchKey;
use crate::karisma_types::SwitchState;
use crate::karisma_types::SwitchState::*;
use crate::karisma_types::MAX_I2C_ADDRESS;

use anyhow::Result;
use redis::streams::StreamId;
use redis::streams::StreamReadOptions;
use redis::streams::StreamReadReply;
use redis::Commands;
use redis::Connection;
use redis::FromRedisValue;
use redis::RedisError;
use redis::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to convert entry '{entry_id}' of stream '{stream_key}': {message}")]
pub struct ConvertionError {
    stream_key: String,
    entry_id: String,
    message: String,
    #[source]
    source: Option<RedisError>,
}

impl ConvertionError {
    pub fn new<S1: Into<String>, S2: Into<String>, S3: Into<String>>(
        stream_key: S1,
        entry_id: S2,
        message: S3,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            entry_id: entry_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn from_redis_error<S1: Into<String>, S2: Into<String>>(
        stream_key: S1,
        entry_id: S2,
        source: RedisError,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            entry_id: entry_id.into(),
            message: format!("{}", source),
            source: Some(source),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchSwitchStatesError {
    #[error(transparent)]
    ConvertionError(#[from] ConvertionError),

    #[error(transparent)]
    RedisError(#[from] RedisError),

    #[error(transparent)]
    SwitchStatesHandlerError(#[from] anyhow::Error),
}

/// Commands taken from one stream read, collapsed to the last state per switch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SwitchBatch {
    /// Id of the last entry read; `None` when the read timed out.
    pub last_entry_id: Option<String>,
    pub switch_states: HashMap<SwitchKey, SwitchState>,
}

/// A redis stream of switch commands with its persisted read position.
pub struct SwitchStream {
    stream_key: String,
    last_entry_id_key: String,
    block_ms: usize,
}

impl SwitchStream {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        stream_key: S1,
        last_entry_id_key: S2,
        block_ms: usize,
    ) -> SwitchStream {
        SwitchStream {
            stream_key: stream_key.into(),
            last_entry_id_key: last_entry_id_key.into(),
            block_ms,
        }
    }

    /// Position to resume from; new entries only when none was stored.
    pub fn last_entry_id(&self, redis: &mut Connection) -> Result<String, RedisError> {
        let last_entry_id = redis.get::<&str, Option<String>>(&self.last_entry_id_key)?;
        Ok(last_entry_id.unwrap_or_else(|| String::from("$")))
    }

    /// Blocks up to `block_ms` for entries after `last_entry_id`.
    pub fn read<E>(
        &self,
        redis: &mut Connection,
        last_entry_id: &str,
        convertion_error_handler: E,
    ) -> Result<SwitchBatch, DispatchSwitchStatesError>
    where
        E: Fn(ConvertionError) -> Option<ConvertionError>,
    {
        let opts = StreamReadOptions::default().block(self.block_ms);
        let reply: Option<StreamReadReply> =
            redis.xread_options(&[self.stream_key.as_str()], &[last_entry_id], &opts)?;

        let ids = reply
            .and_then(|reply| reply.keys.into_iter().next())
            .map(|stream| stream.ids)
            .unwrap_or_default();
        Ok(collect_switch_states(
            &self.stream_key,
            ids,
            convertion_error_handler,
        )?)
    }

    pub fn commit(&self, redis: &mut Connection, last_entry_id: &str) -> Result<(), RedisError> {
        redis.set::<&str, &str, ()>(&self.last_entry_id_key, last_entry_id)
    }

    /// Reads switch commands forever.
    ///
    /// `handler` sees every read, empty ones included, so it can do periodic
    /// work between commands. The position is stored once `handler` returned
    /// `Ok`; an error from `handler` ends the loop with the batch unconsumed.
    pub fn dispatch<E, H>(
        &self,
        redis: &mut Connection,
        convertion_error_handler: E,
        mut handler: H,
    ) -> Result<(), DispatchSwitchStatesError>
    where
        E: Fn(ConvertionError) -> Option<ConvertionError>,
        H: FnMut(&SwitchBatch) -> Result<()>,
    {
        let mut last_entry_id = self.last_entry_id(redis)?;
        loop {
            let batch = self.read(redis, &last_entry_id, &convertion_error_handler)?;
            handler(&batch)?;
            if let Some(id) = batch.last_entry_id {
                self.commit(redis, &id)?;
                last_entry_id = id;
            }
        }
    }
}

/// Folds stream entries into a batch; later commands for a switch win.
///
/// Entries that fail to convert are passed to `convertion_error_handler`
/// and skipped unless it hands the error back. Their id still counts as read.
fn collect_switch_states<E>(
    stream_key: &str,
    ids: Vec<StreamId>,
    convertion_error_handler: E,
) -> Result<SwitchBatch, ConvertionError>
where
    E: Fn(ConvertionError) -> Option<ConvertionError>,
{
    let mut batch = SwitchBatch::default();
    for entry in ids {
        match from_redis(stream_key, &entry.id, entry.map) {
            Ok((key, state)) => {
                batch.switch_states.insert(key, state);
            }
            Err(e) => {
                if let Some(e) = convertion_error_handler(e) {
                    return Err(e);
                }
            }
        }
        batch.last_entry_id = Some(entry.id);
    }
    Ok(batch)
}

fn from_redis(
    stream_key: &str,
    entry_id: &str,
    fields: HashMap<String, Value>,
) -> Result<(SwitchKey, SwitchState), ConvertionError> {
    let address = get_as_string(stream_key, entry_id, &fields, "address")?;

    let address = match address.parse::<u8>() {
        Ok(address) if address <= MAX_I2C_ADDRESS => address,
        _ => {
            return Err(ConvertionError::new(
                stream_key,
                entry_id,
                format!("Invalid i2c address '{}'", address),
            ))
        }
    };

    let pin = get_as_string(stream_key, entry_id, &fields, "pin")?;

    let pin = match pin.parse::<u8>().ok().and_then(|p| Pin::try_from(p).ok()) {
        Some(pin) => pin,
        None => {
            return Err(ConvertionError::new(
                stream_key,
                entry_id,
                format!("Invalid pin number '{}'", pin),
            ))
        }
    };

    let state = get_as_string(stream_key, entry_id, &fields, "state")?;

    let state = match state.as_str() {
        "On" => On,
        "Off" => Off,
        unknown => {
            return Err(ConvertionError::new(
                stream_key,
                entry_id,
                format!("Invalid switch state '{}'", unknown),
            ))
        }
    };

    Ok((SwitchKey::new(address, pin), state))
}

fn get_as_string(
    stream_key: &str,
    entry_id: &str,
    fields: &HashMap<String, Value>,
    field: &str,
) -> Result<String, ConvertionError> {
    let value = match fields.get(field) {
        Some(value) => value,
        None => {
            return Err(ConvertionError::new(
                stream_key,
                entry_id,
                format!("Field '{}' is missing", field),
            ))
        }
    };
    let value = match String::from_redis_value(value) {
        Err(e) => return Err(ConvertionError::from_redis_error(stream_key, entry_id, e)),
        Ok(value) => value,
    };
    Ok(value)
}
