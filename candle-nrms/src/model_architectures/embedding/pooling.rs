//! Padding-Aware Pooling
//!
//! Aggregates per-position representations into one vector per item by
//! summing only the real (non-padded) positions.
//!
//! ## Mask polarity
//! Every mask here is `U8` with `1 = padding`. Both functions reject any
//! other dtype instead of guessing the polarity.
//!
//! ## Pooling contract
//! An item whose mask is entirely padding pools to the exact zero vector.
//! The history encoder relies on this: a padded history slot contributes
//! nothing, and a user with no real history pools to zero.

use crate::core::{from_candle_error, shape_errors, UnifiedResult};
use candle_core::{DType, Tensor};

/// Check that `mask` is a `U8` padding mask
pub fn ensure_mask_dtype(field: &str, mask: &Tensor) -> UnifiedResult<()> {
    if mask.dtype() != DType::U8 {
        return Err(shape_errors::dtype(field, DType::U8, mask.dtype()));
    }
    Ok(())
}

/// Masked sum pooling
///
/// ## Arguments
/// - `hidden_states`: `[items, seq_len, hidden]`
/// - `padding_mask`: `[items, seq_len]`, `U8`, 1 = padding
///
/// ## Return
/// - `[items, hidden]`, the sum over real positions only
pub fn masked_sum_pool(hidden_states: &Tensor, padding_mask: &Tensor) -> UnifiedResult<Tensor> {
    ensure_mask_dtype("pooling mask", padding_mask)?;
    let (items, seq_len, _hidden) = hidden_states
        .dims3()
        .map_err(|_| shape_errors::rank("pooling input", 3, hidden_states.dims()))?;
    if padding_mask.dims() != [items, seq_len] {
        return Err(shape_errors::mismatch(
            "pooling mask",
            &[items, seq_len],
            padding_mask.dims(),
        ));
    }

    // keep = 1 - mask, as the hidden dtype
    let keep = padding_mask
        .to_dtype(hidden_states.dtype())
        .and_then(|m| m.affine(-1.0, 1.0))
        .and_then(|m| m.unsqueeze(2))
        .map_err(|e| from_candle_error(e, "pooling keep weights", None))?;

    hidden_states
        .broadcast_mul(&keep)
        .and_then(|x| x.sum(1))
        .map_err(|e| from_candle_error(e, "masked sum pool", None))
}

/// History slot mask from a per-token history mask
///
/// A slot is padding only when every position in it is padding, which
/// separates a missing history article from a short real title.
///
/// ## Arguments
/// - `token_mask`: `[batch, slots, seq_len]`, `U8`, 1 = padding
///
/// ## Return
/// - `[batch, slots]`, `U8`, 1 = padded slot
pub fn derive_slot_mask(token_mask: &Tensor) -> UnifiedResult<Tensor> {
    ensure_mask_dtype("history token mask", token_mask)?;
    let (_batch, _slots, seq_len) = token_mask
        .dims3()
        .map_err(|_| shape_errors::rank("history token mask", 3, token_mask.dims()))?;
    if seq_len == 0 {
        return Err(shape_errors::mismatch(
            "history token mask",
            &[1],
            &[seq_len],
        ));
    }
    token_mask
        .min(2)
        .map_err(|e| from_candle_error(e, "derive slot mask", None))
}
