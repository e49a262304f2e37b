//! Multi-layer, optionally bidirectional LSTM that carries its hidden state
//! across calls.
//!
//! The carried state is a [`HiddenState`]: device tensors cut from the autodiff
//! graph, so repeated calls never grow it. It survives until
//! [`StatefulLstm::reset`] or until a call arrives with a different batch size.

use burn::{
    nn::{BiLstm, BiLstmConfig, Dropout, DropoutConfig, Lstm, LstmConfig, LstmState},
    prelude::*,
};

use crate::error::Error;

/// Detached `(hidden, cell)` pair, each `[layers * directions, batch, hidden]`.
///
/// Plain tensors are constant modules: they move with `to_device` but are
/// never visited as parameters nor written to records.
#[derive(Module, Debug)]
pub struct HiddenState<B: Backend> {
    hidden: Tensor<B, 3>,
    cell: Tensor<B, 3>,
}

impl<B: Backend> HiddenState<B> {
    /// Build a state from explicit tensors, dropping their autodiff history.
    pub fn new(hidden: Tensor<B, 3>, cell: Tensor<B, 3>) -> Self {
        Self {
            hidden: hidden.detach(),
            cell: cell.detach(),
        }
    }

    /// Snapshot a live state.
    pub fn detach(state: &LstmState<B, 3>) -> Self {
        Self::new(state.hidden.clone(), state.cell.clone())
    }

    /// `[layers * directions, batch, hidden]`.
    pub fn dims(&self) -> [usize; 3] {
        self.hidden.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.dims()[1]
    }

    pub fn hidden(&self) -> &Tensor<B, 3> {
        &self.hidden
    }

    pub fn cell(&self) -> &Tensor<B, 3> {
        &self.cell
    }
}

/// One recurrent layer. Its state slice is `[directions, batch, hidden]`,
/// forward direction first.
#[derive(Module, Debug)]
pub enum LstmLayer<B: Backend> {
    Unidirectional(Lstm<B>),
    Bidirectional(BiLstm<B>),
}

impl<B: Backend> LstmLayer<B> {
    fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Option<LstmState<B, 3>>,
    ) -> (Tensor<B, 3>, LstmState<B, 3>) {
        match self {
            Self::Unidirectional(lstm) => {
                let state = state.map(|LstmState { cell, hidden }| {
                    LstmState::new(cell.squeeze::<2>(0), hidden.squeeze::<2>(0))
                });
                let (out, LstmState { cell, hidden }) = lstm.forward(x, state);
                (
                    out,
                    LstmState::new(cell.unsqueeze_dim::<3>(0), hidden.unsqueeze_dim::<3>(0)),
                )
            }
            Self::Bidirectional(lstm) => lstm.forward(x, state),
        }
    }

    fn directions(&self) -> usize {
        match self {
            Self::Unidirectional(_) => 1,
            Self::Bidirectional(_) => 2,
        }
    }
}

/// Recurrent layer owning its `(hidden, cell)` state between calls.
#[derive(Module, Debug)]
pub struct StatefulLstm<B: Backend> {
    layers: Vec<LstmLayer<B>>,
    dropout: Dropout,
    d_hidden: usize,
    fail_on_batch_change: bool,
    state: Option<HiddenState<B>>,
}

/// Per-step output of a [`StatefulLstm`] call.
pub struct LstmOutput<B: Backend> {
    /// `[batch, time, hidden * directions]`, after dropout.
    pub output: Tensor<B, 3>,
    /// Final state with its autodiff history intact.
    pub state: LstmState<B, 3>,
}

impl<B: Backend> StatefulLstm<B> {
    /// Run `[batch, time, features]` through every layer, starting from the
    /// carried state.
    pub fn forward(&mut self, x: Tensor<B, 3>) -> crate::Result<LstmOutput<B>> {
        let [batch, ..] = x.dims();

        if let Some(state) = &self.state {
            if state.batch_size() != batch {
                if self.fail_on_batch_change {
                    return Err(Error::BatchSizeChanged {
                        state: state.batch_size(),
                        input: batch,
                    });
                }
                tracing::debug!(
                    state = state.batch_size(),
                    input = batch,
                    "batch size changed, discarding hidden state"
                );
                self.state = None;
            }
        }

        let mut initial = self.initial_states().into_iter();
        let mut hidden = Vec::with_capacity(self.layers.len());
        let mut cell = Vec::with_capacity(self.layers.len());

        let mut x = x;
        for layer in &self.layers {
            let (out, last) = layer.forward(x, initial.next());
            hidden.push(last.hidden);
            cell.push(last.cell);
            x = out;
        }

        let state = LstmState::new(Tensor::cat(cell, 0), Tensor::cat(hidden, 0));
        self.state = Some(HiddenState::detach(&state));

        Ok(LstmOutput {
            output: self.dropout.forward(x),
            state,
        })
    }

    /// Split the carried state into one `[directions, batch, hidden]` slice per layer.
    fn initial_states(&self) -> Vec<LstmState<B, 3>> {
        let Some(state) = &self.state else {
            return Vec::new();
        };

        state
            .cell
            .clone()
            .chunk(self.layers.len(), 0)
            .into_iter()
            .zip(state.hidden.clone().chunk(self.layers.len(), 0))
            .map(|(cell, hidden)| LstmState::new(cell, hidden))
            .collect()
    }

    pub fn directions(&self) -> usize {
        self.layers.first().map_or(1, LstmLayer::directions)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Width of each output step.
    pub fn d_output(&self) -> usize {
        self.d_hidden * self.directions()
    }

    /// Forget the carried state; the next call starts from zeros.
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn state(&self) -> Option<&HiddenState<B>> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: Option<HiddenState<B>>) {
        self.state = state;
    }
}

#[derive(Config, Debug)]
pub struct StatefulLstmConfig {
    d_input: usize,
    d_hidden: usize,
    #[config(default = 1)]
    num_layers: usize,
    #[config(default = false)]
    bidirectional: bool,
    /// Dropout on the output sequence.
    #[config(default = 0.5)]
    dropout: f64,
    /// Return [`Error::BatchSizeChanged`] instead of discarding stale state.
    #[config(default = false)]
    fail_on_batch_change: bool,
}

impl StatefulLstmConfig {
    pub fn d_output(&self) -> usize {
        if self.bidirectional {
            self.d_hidden * 2
        } else {
            self.d_hidden
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> StatefulLstm<B> {
        let layers = (0..self.num_layers)
            .map(|idx| {
                let d_input = if idx == 0 {
                    self.d_input
                } else {
                    self.d_output()
                };
                if self.bidirectional {
                    let lstm = BiLstmConfig::new(d_input, self.d_hidden, true).init(device);
                    LstmLayer::Bidirectional(lstm)
                } else {
                    let lstm = LstmConfig::new(d_input, self.d_hidden, true).init(device);
                    LstmLayer::Unidirectional(lstm)
                }
            })
            .collect();

        StatefulLstm {
            layers,
            dropout: DropoutConfig::new(self.dropout).init(),
            d_hidden: self.d_hidden,
            fail_on_batch_change: self.fail_on_batch_change,
            state: None,
        }
    }
}
