//! Host functions exposed to units.
//!
//! Every execution context gets the same three imports in the
//! `extism:host/user` namespace. What they can reach depends on the
//! [`HostState`] behind them, which discovery fills in from the unit's
//! declared slots.

use std::sync::Arc;

use extism::{CurrentPlugin, Error, PluginBuilder, UserData, Val, ValType};
use tessera_telemetry::{LogLevel, Logger};
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityRegistry;
use crate::context::ContextId;

/// Maximum log message a guest may pass (64 KB).
pub(crate) const MAX_LOG_MESSAGE_LEN: u64 = 64 * 1024;

/// Maximum capability payload a guest may pass (10 MB).
pub(crate) const MAX_PAYLOAD_LEN: u64 = 10 * 1024 * 1024;

/// Maximum length of a level name or capability type key.
const MAX_KEY_LEN: u64 = 256;

/// Per-context state shared with host functions.
pub(crate) struct HostState {
    /// Context this state belongs to.
    pub(crate) context_id: ContextId,
    /// Log scope used when the unit has no logger slot.
    pub(crate) scope: String,
    /// Populated when the unit declares a `logger` slot.
    pub(crate) logger: Option<Logger>,
    /// Populated when the unit declares a `capabilities` slot.
    pub(crate) capabilities: Option<Arc<CapabilityRegistry>>,
    /// Cancelled when the component is asked to stop.
    pub(crate) cancel: CancellationToken,
}

impl HostState {
    pub(crate) fn new(context_id: ContextId, scope: impl Into<String>) -> Self {
        Self {
            context_id,
            scope: scope.into(),
            logger: None,
            capabilities: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Imports every unit may link against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostFunction {
    Log,
    Capability,
    Cancelled,
}

impl HostFunction {
    pub(crate) const ALL: [Self; 3] = [Self::Log, Self::Capability, Self::Cancelled];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Log => "tessera_log",
            Self::Capability => "tessera_capability",
            Self::Cancelled => "tessera_cancelled",
        }
    }

    fn params(self) -> Vec<ValType> {
        match self {
            Self::Log | Self::Capability => vec![extism::PTR; 2],
            Self::Cancelled => vec![],
        }
    }

    fn results(self) -> Vec<ValType> {
        match self {
            Self::Log => vec![],
            Self::Capability => vec![extism::PTR],
            Self::Cancelled => vec![ValType::I64],
        }
    }
}

pub(crate) fn register_host_functions(
    mut builder: PluginBuilder,
    user_data: &UserData<HostState>,
) -> PluginBuilder {
    for func in HostFunction::ALL {
        let ud = user_data.clone();
        let (params, results) = (func.params(), func.results());

        builder = match func {
            HostFunction::Log => {
                builder.with_function(func.name(), params, results, ud, tessera_log_impl)
            },
            HostFunction::Capability => {
                builder.with_function(func.name(), params, results, ud, tessera_capability_impl)
            },
            HostFunction::Cancelled => {
                builder.with_function(func.name(), params, results, ud, tessera_cancelled_impl)
            },
        };
    }
    builder
}

/// Read guest memory behind `val`, refusing anything longer than `limit`.
#[allow(clippy::cast_sign_loss)]
fn get_safe_bytes(plugin: &mut CurrentPlugin, val: &Val, limit: u64) -> Result<Vec<u8>, Error> {
    let ptr = match val {
        Val::I64(v) => *v as u64,
        Val::I32(v) => u64::from(*v as u32),
        _ => return Err(Error::msg("expected memory pointer value")),
    };

    let len = plugin.memory_length(ptr)?;
    if len > limit {
        return Err(Error::msg(format!(
            "guest buffer of {len} bytes exceeds the {limit} byte limit"
        )));
    }

    #[allow(clippy::cast_possible_wrap)]
    let safe_val = Val::I64(ptr as i64);
    plugin.memory_get_val(&safe_val)
}

fn arg<'a>(inputs: &'a [Val], index: usize) -> Result<&'a Val, Error> {
    inputs
        .get(index)
        .ok_or_else(|| Error::msg(format!("missing argument {index}")))
}

#[allow(clippy::needless_pass_by_value)]
fn tessera_log_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let level = get_safe_bytes(plugin, arg(inputs, 0)?, MAX_KEY_LEN)?;
    let message = get_safe_bytes(plugin, arg(inputs, 1)?, MAX_LOG_MESSAGE_LEN)?;

    let level = LogLevel::parse_lenient(&String::from_utf8_lossy(&level));
    let message = String::from_utf8_lossy(&message);

    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    let logger = state
        .logger
        .clone()
        .unwrap_or_else(|| Logger::new(state.scope.clone()));
    drop(state);

    logger.log(level, message);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn tessera_capability_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let type_key = get_safe_bytes(plugin, arg(inputs, 0)?, MAX_KEY_LEN)?;
    let input = get_safe_bytes(plugin, arg(inputs, 1)?, MAX_PAYLOAD_LEN)?;
    let type_key = String::from_utf8_lossy(&type_key).into_owned();

    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    let registry = state.capabilities.clone().ok_or_else(|| {
        Error::msg("unit did not declare a capabilities slot; tessera_capability is unavailable")
    })?;
    let caller = state.context_id;
    drop(state);

    let provider = registry
        .resolve(&type_key)
        .map_err(|e| Error::msg(e.to_string()))?;

    // Provider exports run on the service instance, which is locked while
    // they call out; calling back into it would never return.
    if provider.origin() == Some(caller) {
        return Err(Error::msg(format!(
            "capability '{type_key}' resolved to a provider in the calling unit"
        )));
    }

    let output = provider
        .invoke(&input)
        .map_err(|e| Error::msg(e.to_string()))?;

    let mem = plugin.memory_new(&output)?;
    let slot = outputs
        .get_mut(0)
        .ok_or_else(|| Error::msg("missing output slot"))?;
    *slot = plugin.memory_to_val(mem);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn tessera_cancelled_impl(
    _plugin: &mut CurrentPlugin,
    _inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let ud = user_data.get()?;
    let cancelled = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?
        .cancel
        .is_cancelled();

    let slot = outputs
        .get_mut(0)
        .ok_or_else(|| Error::msg("missing output slot"))?;
    *slot = Val::I64(i64::from(cancelled));
    Ok(())
}
