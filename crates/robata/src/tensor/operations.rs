use super::constant::BATCH_DIM;
use crate::backend::Backend;
use crate::config::PaddingDirection;

/// Pads a token row to the batch width.
///
/// Returns the padded ids together with a validity row marking which
/// positions hold real tokens. The validity row is what the attention mask
/// is assembled from, so it must exactly mirror the padding layout.
pub(crate) fn pad_row(
    row: &[u32],
    width: usize,
    pad_id: u32,
    direction: PaddingDirection,
) -> (Vec<u32>, Vec<bool>) {
    debug_assert!(row.len() <= width);
    let pad = width - row.len();
    let mut ids = Vec::with_capacity(width);
    let mut valid = Vec::with_capacity(width);
    match direction {
        PaddingDirection::Left => {
            ids.extend(std::iter::repeat_n(pad_id, pad));
            valid.extend(std::iter::repeat_n(false, pad));
            ids.extend_from_slice(row);
            valid.extend(std::iter::repeat_n(true, row.len()));
        }
        PaddingDirection::Right => {
            ids.extend_from_slice(row);
            valid.extend(std::iter::repeat_n(true, row.len()));
            ids.extend(std::iter::repeat_n(pad_id, pad));
            valid.extend(std::iter::repeat_n(false, pad));
        }
    }
    (ids, valid)
}

/// Concatenates pre-padded token rows into one `[batch, width]` tensor.
pub(crate) fn pack_rows<B: Backend>(rows: &[Vec<u32>], device: &B::Device) -> B {
    let stacked: Vec<B> = rows
        .iter()
        .map(|row| B::token_ids(row, device).unsqueeze(BATCH_DIM))
        .collect();
    B::cat(&stacked, BATCH_DIM)
}

/// Index of the last real token within a padded row of `width` positions.
pub(crate) fn step_position(
    direction: PaddingDirection,
    width: usize,
    real_len: usize,
) -> usize {
    match direction {
        PaddingDirection::Left => width - 1,
        PaddingDirection::Right => real_len - 1,
    }
}

/// Splits batched logits into per-request `[seq, vocab]` slices.
pub(crate) fn split_logit_rows<B: Backend>(logits: &B) -> Vec<B> {
    logits.vectorize_dim(BATCH_DIM)
}

/// Greedy selection over the vocabulary dimension at one sequence position
/// of a `[seq, vocab]` logits row.
pub(crate) fn greedy_token<B: Backend>(row: &B, position: usize) -> u32 {
    let at_position = row.slice(0, position, 1);
    at_position.argmax(1).to_u32_vec()[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CpuTensor;

    #[test]
    fn pad_row_left_prepends_pad_ids() {
        let (ids, valid) = pad_row(&[5, 6, 7], 7, 0, PaddingDirection::Left);
        assert_eq!(ids, vec![0, 0, 0, 0, 5, 6, 7]);
        assert_eq!(valid, vec![false, false, false, false, true, true, true]);
    }

    #[test]
    fn pad_row_right_appends_pad_ids() {
        let (ids, valid) = pad_row(&[5, 6, 7], 5, 9, PaddingDirection::Right);
        assert_eq!(ids, vec![5, 6, 7, 9, 9]);
        assert_eq!(valid, vec![true, true, true, false, false]);
    }

    #[test]
    fn pad_row_exact_width_is_untouched() {
        let (ids, valid) = pad_row(&[1, 2], 2, 0, PaddingDirection::Left);
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(valid, vec![true, true]);
    }

    #[test]
    fn pack_rows_stacks_along_batch() {
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let packed: CpuTensor = pack_rows(&rows, &());
        assert_eq!(packed.shape(), vec![2, 3]);
        assert_eq!(packed.to_u32_vec(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn step_position_tracks_direction() {
        assert_eq!(step_position(PaddingDirection::Left, 7, 3), 6);
        assert_eq!(step_position(PaddingDirection::Right, 7, 3), 2);
    }

    #[test]
    fn greedy_token_picks_argmax_at_position() {
        // Two positions over a vocabulary of 4; position 1 peaks at id 2.
        let row = CpuTensor::new(
            vec![2, 4],
            vec![0.9, 0.0, 0.0, 0.0, 0.0, 0.1, 0.8, 0.2],
        );
        assert_eq!(greedy_token(&row, 0), 0);
        assert_eq!(greedy_token(&row, 1), 2);
    }
}
