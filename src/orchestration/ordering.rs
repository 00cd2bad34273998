use std::collections::HashMap;

use crate::models::{ActivationMode, MediaFormat};

/// Order receivers for dispatch.
///
/// `immediate` keeps submission order. `safe_switch` stable-sorts by media
/// format precedence (audio, video, data, mux, then anything unknown).
pub fn order_receivers(
    receiver_ids: &[String],
    formats: &HashMap<String, MediaFormat>,
    mode: ActivationMode,
) -> Vec<String> {
    let mut ordered = receiver_ids.to_vec();
    if mode == ActivationMode::SafeSwitch {
        ordered.sort_by_key(|id| {
            formats
                .get(id)
                .copied()
                .unwrap_or(MediaFormat::Unknown)
                .precedence()
        });
    }
    ordered
}
