use serde::Serialize;

/// printf-style pattern the encoder reads keyframes through.
pub const KEYFRAME_PATTERN: &str = "keyframe_%05d.png";

pub const MIN_KEYFRAMES: u32 = 2;
pub const MAX_KEYFRAMES: u32 = 24;

/// Which reference image feeds each keyframe slot, in order.
#[derive(Debug, Clone, Serialize)]
pub struct KeyframePlan {
    pub count: u32,
    pub source_indices: Vec<usize>,
}

/// Plan keyframe materialization for a profile's ordered references.
///
/// One keyframe per second of output, clamped to 2..=24. With strict lock
/// every slot uses reference 0 so the subject cannot drift between frames;
/// otherwise the references cycle in order.
pub fn plan_keyframes(reference_count: usize, duration_sec: u32, strict_lock: bool) -> KeyframePlan {
    let count = duration_sec.clamp(MIN_KEYFRAMES, MAX_KEYFRAMES);
    let source_indices = if reference_count == 0 {
        Vec::new()
    } else {
        (0..count as usize)
            .map(|i| if strict_lock { 0 } else { i % reference_count })
            .collect()
    };

    KeyframePlan {
        count,
        source_indices,
    }
}

/// File name for the keyframe at `index`, matching [`KEYFRAME_PATTERN`].
pub fn keyframe_filename(index: usize) -> String {
    format!("keyframe_{index:05}.png")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_clamped_to_range() {
        assert_eq!(plan_keyframes(1, 0, true).count, 2);
        assert_eq!(plan_keyframes(1, 1, true).count, 2);
        assert_eq!(plan_keyframes(1, 5, true).count, 5);
        assert_eq!(plan_keyframes(1, 24, true).count, 24);
        assert_eq!(plan_keyframes(1, 30, true).count, 24);
    }

    #[test]
    fn test_strict_lock_pins_first_reference() {
        let plan = plan_keyframes(3, 5, true);
        assert_eq!(plan.source_indices, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unlocked_cycles_references_in_order() {
        let plan = plan_keyframes(3, 5, false);
        assert_eq!(plan.source_indices, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_no_references_yields_empty_plan() {
        let plan = plan_keyframes(0, 5, false);
        assert!(plan.source_indices.is_empty());
    }

    #[test]
    fn test_keyframe_filenames_are_zero_padded() {
        assert_eq!(keyframe_filename(0), "keyframe_00000.png");
        assert_eq!(keyframe_filename(23), "keyframe_00023.png");
    }
}
