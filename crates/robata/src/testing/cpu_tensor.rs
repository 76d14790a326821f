use crate::backend::Backend;

/// A dense row-major host tensor carrying real data.
///
/// Just enough of a tensor to exercise packing, masking, and cache
/// bookkeeping; contents are `f32` throughout, with token ids stored as
/// their numeric values.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl CpuTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {shape:?} does not match data length {}",
            data.len()
        );
        Self { shape, data }
    }

    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Element counts outside, at, and inside `dim` for row-major walks.
    fn block_dims(&self, dim: usize) -> (usize, usize, usize) {
        let outer = self.shape[..dim].iter().product();
        let axis = self.shape[dim];
        let inner = self.shape[dim + 1..].iter().product();
        (outer, axis, inner)
    }
}

impl Backend for CpuTensor {
    type Device = ();

    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn device(&self) -> Self::Device {}

    fn token_ids(ids: &[u32], _device: &Self::Device) -> Self {
        Self::new(vec![ids.len()], ids.iter().map(|&id| id as f32).collect())
    }

    fn mask(rows: &[Vec<bool>], _device: &Self::Device) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let data = rows
            .iter()
            .flat_map(|row| row.iter().map(|&valid| if valid { 1.0 } else { 0.0 }))
            .collect();
        Self::new(vec![rows.len(), cols], data)
    }

    fn zeros(shape: &[usize], _device: &Self::Device) -> Self {
        Self::filled(shape.to_vec(), 0.0)
    }

    fn cat(tensors: &[Self], dim: usize) -> Self {
        let first = &tensors[0];
        let (outer, _, inner) = first.block_dims(dim);
        let total_axis: usize = tensors.iter().map(|t| t.shape[dim]).sum();

        let mut data = Vec::with_capacity(outer * total_axis * inner);
        for o in 0..outer {
            for t in tensors {
                let axis = t.shape[dim];
                let start = o * axis * inner;
                data.extend_from_slice(&t.data[start..start + axis * inner]);
            }
        }
        let mut shape = first.shape.clone();
        shape[dim] = total_axis;
        Self::new(shape, data)
    }

    fn unsqueeze(&self, dim: usize) -> Self {
        let mut shape = self.shape.clone();
        shape.insert(dim, 1);
        Self::new(shape, self.data.clone())
    }

    fn slice(&self, dim: usize, start: usize, len: usize) -> Self {
        let (outer, axis, inner) = self.block_dims(dim);
        let mut data = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            let base = o * axis * inner + start * inner;
            data.extend_from_slice(&self.data[base..base + len * inner]);
        }
        let mut shape = self.shape.clone();
        shape[dim] = len;
        Self::new(shape, data)
    }

    fn vectorize_dim(&self, dim: usize) -> Vec<Self> {
        let axis = self.shape[dim];
        (0..axis)
            .map(|i| {
                let slice = self.slice(dim, i, 1);
                let mut shape = slice.shape;
                shape.remove(dim);
                Self::new(shape, slice.data)
            })
            .collect()
    }

    fn argmax(&self, dim: usize) -> Self {
        let (outer, axis, inner) = self.block_dims(dim);
        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                let mut best = 0usize;
                let mut best_value = f32::NEG_INFINITY;
                for a in 0..axis {
                    let value = self.data[o * axis * inner + a * inner + i];
                    if value > best_value {
                        best_value = value;
                        best = a;
                    }
                }
                data.push(best as f32);
            }
        }
        let mut shape = self.shape.clone();
        shape.remove(dim);
        Self::new(shape, data)
    }

    fn to_u32_vec(&self) -> Vec<u32> {
        self.data.iter().map(|&v| v as u32).collect()
    }
}
