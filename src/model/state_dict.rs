//! Named parameter snapshots and partial loading into a `VarMap`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;

use crate::error::IncompatibleKeys;
use crate::{Error, Result};

/// Parameter name → tensor.
pub type StateDict = HashMap<String, Tensor>;

/// Copies of every variable in `vars`.
///
/// The tensors own their storage, so later optimizer steps or loads do not
/// show through.
pub fn state_dict(vars: &VarMap) -> Result<StateDict> {
    let data = vars.data().lock().unwrap_or_else(|e| e.into_inner());
    data.iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().detach().copy()?)))
        .collect()
}

/// Copy matching tensors from `state` into `vars`.
///
/// Returns the keys that did not line up. With `strict`, any mismatch is an
/// error and nothing is copied. A shape mismatch on a shared key is always
/// an error.
pub fn load_state_dict(vars: &VarMap, state: &StateDict, strict: bool) -> Result<IncompatibleKeys> {
    let data = vars.data().lock().unwrap_or_else(|e| e.into_inner());

    let model_keys: BTreeSet<&String> = data.keys().collect();
    let state_keys: BTreeSet<&String> = state.keys().collect();
    let keys = IncompatibleKeys {
        missing_keys: model_keys
            .difference(&state_keys)
            .map(|k| k.to_string())
            .collect(),
        unexpected_keys: state_keys
            .difference(&model_keys)
            .map(|k| k.to_string())
            .collect(),
    };
    if strict && !keys.is_empty() {
        return Err(Error::IncompatibleKeys(keys));
    }

    for name in model_keys.intersection(&state_keys) {
        let var = &data[*name];
        let src = &state[*name];
        if src.dims() != var.as_tensor().dims() {
            return Err(Error::WeightLoad(format!(
                "shape mismatch for {name}: checkpoint {:?}, model {:?}",
                src.dims(),
                var.as_tensor().dims()
            )));
        }
        let src = src.to_dtype(var.dtype())?.to_device(var.device())?;
        var.set(&src)?;
    }
    tracing::debug!(
        loaded = model_keys.len() - keys.missing_keys.len(),
        missing = keys.missing_keys.len(),
        unexpected = keys.unexpected_keys.len(),
        "loaded state dict"
    );
    Ok(keys)
}

/// Accept a non-strict load only when nothing was unexpected and every
/// missing key contains `allowed_missing`.
pub fn check_missing_only(keys: &IncompatibleKeys, allowed_missing: &str) -> Result<()> {
    let disallowed_missing: Vec<String> = keys
        .missing_keys
        .iter()
        .filter(|k| !k.contains(allowed_missing))
        .cloned()
        .collect();
    if keys.unexpected_keys.is_empty() && disallowed_missing.is_empty() {
        return Ok(());
    }
    Err(Error::IncompatibleKeys(IncompatibleKeys {
        missing_keys: disallowed_missing,
        unexpected_keys: keys.unexpected_keys.clone(),
    }))
}

/// Keys starting with `prefix.`, with the prefix removed.
pub fn strip_prefix(state: &StateDict, prefix: &str) -> StateDict {
    let prefix = format!("{prefix}.");
    state
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|k| (k.to_string(), v.clone())))
        .collect()
}

/// Every key prefixed with `prefix.`.
pub fn with_prefix(state: &StateDict, prefix: &str) -> StateDict {
    state
        .iter()
        .map(|(k, v)| (format!("{prefix}.{k}"), v.clone()))
        .collect()
}

pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<StateDict> {
    let path = path.as_ref();
    candle_core::safetensors::load(path, device)
        .map_err(|e| Error::WeightLoad(format!("{}: {e}", path.display())))
}

pub fn save_safetensors(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    candle_core::safetensors::save(state, path.as_ref())?;
    Ok(())
}
