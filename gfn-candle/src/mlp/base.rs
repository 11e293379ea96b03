use super::MlpConfig;
use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Returns vector of linear modules from [`MlpConfig`].
fn create_linear_layers(prefix: &str, vs: VarBuilder, config: &MlpConfig) -> Result<Vec<Linear>> {
    let mut in_out_pairs: Vec<(usize, usize)> = Vec::with_capacity(config.units.len() + 1);
    let mut in_dim = config.in_dim;
    for &out_dim in &config.units {
        in_out_pairs.push((in_dim, out_dim));
        in_dim = out_dim;
    }
    in_out_pairs.push((in_dim, config.out_dim));
    let vs = vs.pp(prefix);

    let mut layers = Vec::with_capacity(in_out_pairs.len());
    for (i, &(in_dim, out_dim)) in in_out_pairs.iter().enumerate() {
        layers.push(linear(in_dim, out_dim, vs.pp(format!("ln{}", i)))?);
    }
    Ok(layers)
}

/// Multilayer perceptron with ReLU activation function.
///
/// The final layer is linear: outputs are unnormalized logits.
pub struct Mlp {
    device: Device,
    layers: Vec<Linear>,
}

impl Mlp {
    /// Builds the perceptron on the variable store.
    pub fn build(vs: VarBuilder, config: MlpConfig) -> Result<Self> {
        let device = vs.device().clone();
        let layers = create_linear_layers("mlp", vs, &config)?;
        Ok(Self { device, layers })
    }

    /// Forward pass over a `(batch, in_dim)` input.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.to_device(&self.device)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i != last {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }
}
