//! Policy network using Burn framework

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;
use std::sync::{Mutex, PoisonError};

use super::action_space::ACTION_SIZE;
use super::encoder::{BOARD_SIZE, EncodedState, PLANES};

/// Configuration for the policy network
#[derive(Debug, Config)]
pub struct PolicyConfig {
    /// Output channels of the three 3x3 convolutions
    pub conv_channels: [usize; 3],
    /// Width of the hidden fully connected layer
    pub hidden_size: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            conv_channels: [64, 128, 128],
            hidden_size: 1024,
        }
    }
}

/// Weight init draws from the backend's global generator. Seeding and the
/// draws that follow it happen under this lock.
static INIT_LOCK: Mutex<()> = Mutex::new(());

impl PolicyConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PolicyNet<B> {
        self.init_seeded(device, None)
    }

    /// Initialise with the backend seeded first; the same seed gives the same weights.
    pub fn init_seeded<B: Backend>(&self, device: &B::Device, seed: Option<u64>) -> PolicyNet<B> {
        let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(seed) = seed {
            B::seed(seed);
        }
        PolicyNet::new(device, self)
    }
}

/// Convolutional policy: `[batch, 12, 8, 8]` planes to `[batch, ACTION_SIZE]` logits.
/// Padding keeps the 8x8 geometry until the flatten.
#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> PolicyNet<B> {
    pub fn new(device: &B::Device, config: &PolicyConfig) -> Self {
        let [c1, c2, c3] = config.conv_channels;
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        Self {
            conv1: conv([PLANES, c1]),
            conv2: conv([c1, c2]),
            conv3: conv([c2, c3]),
            hidden: LinearConfig::new(c3 * BOARD_SIZE * BOARD_SIZE, config.hidden_size)
                .init(device),
            output: LinearConfig::new(config.hidden_size, ACTION_SIZE).init(device),
            activation: Relu::new(),
        }
    }

    /// Forward pass returning raw, unmasked logits
    pub fn forward(&self, states: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(states));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.activation.forward(self.conv3.forward(x));

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(x)
    }

    /// Logits for a single encoded position
    pub fn logits(&self, state: &EncodedState, device: &B::Device) -> Vec<f32> {
        let input = states_to_tensor::<B>(std::slice::from_ref(state), device);
        let logits = self.forward(input);

        match logits.into_data().to_vec::<f32>() {
            Ok(values) => values,
            Err(err) => {
                // all-equal logits degrade to uniform play over legal moves
                tracing::warn!("Could not read policy output: {:?}", err);
                vec![0.0; ACTION_SIZE]
            }
        }
    }
}

/// Stack encoded states into a `[batch, PLANES, 8, 8]` tensor
pub fn states_to_tensor<B: Backend>(states: &[EncodedState], device: &B::Device) -> Tensor<B, 4> {
    let batch_size = states.len();
    let flat: Vec<f32> = states
        .iter()
        .flat_map(|s| s.as_slice().iter().copied())
        .collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([
        batch_size,
        PLANES,
        BOARD_SIZE,
        BOARD_SIZE,
    ])
}
