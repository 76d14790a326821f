use super::Backend;
use candle_core::{DType, Device, Tensor};

impl Backend for Tensor {
    type Device = Device;

    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn device(&self) -> Device {
        self.device().clone()
    }

    fn token_ids(ids: &[u32], device: &Device) -> Self {
        Tensor::new(ids, device).unwrap()
    }

    fn mask(rows: &[Vec<bool>], device: &Device) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let flat: Vec<u8> = rows
            .iter()
            .flat_map(|row| row.iter().map(|&valid| valid as u8))
            .collect();
        Tensor::from_vec(flat, (rows.len(), cols), device).unwrap()
    }

    fn zeros(shape: &[usize], device: &Device) -> Self {
        Tensor::zeros(shape, DType::F32, device).unwrap()
    }

    fn cat(tensors: &[Self], dim: usize) -> Self {
        Tensor::cat(tensors, dim).unwrap()
    }

    fn unsqueeze(&self, dim: usize) -> Self {
        self.unsqueeze(dim).unwrap()
    }

    fn slice(&self, dim: usize, start: usize, len: usize) -> Self {
        self.narrow(dim, start, len).unwrap()
    }

    fn vectorize_dim(&self, dim: usize) -> Vec<Self> {
        let dims = self.dims();

        let dim_size = dims[dim];
        let mut result = Vec::with_capacity(dim_size);

        // Extract each slice along the dimension, squeezing it away
        for i in 0..dim_size {
            let slice = self.narrow(dim, i, 1).unwrap();
            result.push(slice.squeeze(dim).unwrap());
        }

        result
    }

    fn argmax(&self, dim: usize) -> Self {
        self.argmax(dim).unwrap()
    }

    fn to_u32_vec(&self) -> Vec<u32> {
        self.flatten_all().unwrap().to_vec1::<u32>().unwrap()
    }
}
